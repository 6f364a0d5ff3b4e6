use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ensure_bank, MemoryItem, MemoryQuery, MemoryStore, ReflectParams};
use crate::error::{Error, Result};

const MEMORY_TIMEOUT: Duration = Duration::from_secs(15);

/// Proxy to a remote memory service speaking the `{tool, input}` envelope
/// (the same shape this runtime's own `/tools` endpoint serves).
pub struct RemoteMemoryStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ItemEnvelope {
    item: MemoryItem,
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    items: Vec<MemoryItem>,
}

#[derive(Deserialize)]
struct MaybeItemEnvelope {
    #[serde(default)]
    item: Option<MemoryItem>,
}

#[derive(Deserialize)]
struct BanksEnvelope {
    banks: Vec<String>,
}

impl RemoteMemoryStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(MEMORY_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(anyhow::anyhow!("build memory client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call_tool<T: serde::de::DeserializeOwned>(
        &self,
        tool: &str,
        input: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/tools", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "tool": tool, "input": input }))
            .send()
            .await
            .map_err(|e| Error::upstream("memory", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "memory",
                format!("{tool} returned {status}: {body}"),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::upstream("memory", format!("{tool} bad payload: {e}")))
    }
}

#[async_trait]
impl MemoryStore for RemoteMemoryStore {
    async fn retain(&self, bank: &str, item: MemoryItem) -> Result<MemoryItem> {
        ensure_bank(bank)?;
        item.validate()?;
        let envelope: ItemEnvelope = self
            .call_tool("memory.retain", json!({ "bank": bank, "item": item }))
            .await?;
        Ok(envelope.item)
    }

    async fn recall(&self, bank: &str, query: &MemoryQuery) -> Result<Vec<MemoryItem>> {
        ensure_bank(bank)?;
        let envelope: ItemsEnvelope = self
            .call_tool("memory.recall", json!({ "bank": bank, "query": query }))
            .await?;
        Ok(envelope.items)
    }

    async fn reflect(&self, bank: &str, params: &ReflectParams) -> Result<Option<MemoryItem>> {
        ensure_bank(bank)?;
        let envelope: MaybeItemEnvelope = self
            .call_tool("memory.reflect", json!({ "bank": bank, "params": params }))
            .await?;
        Ok(envelope.item)
    }

    async fn banks(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/memory/banks", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("memory", e))?;
        if !response.status().is_success() {
            return Err(Error::upstream(
                "memory",
                format!("banks returned {}", response.status()),
            ));
        }
        let envelope: BanksEnvelope = response
            .json()
            .await
            .map_err(|e| Error::upstream("memory", format!("banks bad payload: {e}")))?;
        Ok(envelope.banks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let store = RemoteMemoryStore::new("http://localhost:9000/").unwrap();
        assert_eq!(store.base_url, "http://localhost:9000");
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_upstream_error() {
        let store = RemoteMemoryStore::new("http://127.0.0.1:1").unwrap();
        let err = store
            .recall("signals", &MemoryQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { service: "memory", .. }));
    }

    #[tokio::test]
    async fn empty_bank_fails_before_any_network_call() {
        let store = RemoteMemoryStore::new("http://127.0.0.1:1").unwrap();
        let err = store.recall("", &MemoryQuery::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
