use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

const RESEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Condensed answer from the external research service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchBundle {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// External research capability. Failures are logged and omitted by the
/// pipeline; they never fail a run.
#[async_trait]
pub trait ResearchClient: Send + Sync {
    async fn research(&self, symbol: &str, queries: &[String]) -> Result<ResearchBundle>;
}

/// HTTP client with a per-(symbol, queries) response cache. Queries are
/// batched into a single request.
pub struct HttpResearchClient {
    base_url: String,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, ResearchBundle>>,
}

impl HttpResearchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(RESEARCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(anyhow::anyhow!("build research client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_key(symbol: &str, queries: &[String]) -> String {
        format!("{symbol}\u{1f}{}", queries.join("\u{1f}"))
    }
}

#[async_trait]
impl ResearchClient for HttpResearchClient {
    async fn research(&self, symbol: &str, queries: &[String]) -> Result<ResearchBundle> {
        let key = Self::cache_key(symbol, queries);
        if let Some(hit) = self.cache.lock().get(&key).cloned() {
            return Ok(hit);
        }

        let url = format!("{}/research", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "symbol": symbol, "queries": queries }))
            .send()
            .await
            .map_err(|e| Error::upstream("research", e))?;
        if !response.status().is_success() {
            return Err(Error::upstream(
                "research",
                format!("returned {}", response.status()),
            ));
        }
        let bundle: ResearchBundle = response
            .json()
            .await
            .map_err(|e| Error::upstream("research", format!("bad payload: {e}")))?;

        self.cache.lock().insert(key, bundle.clone());
        Ok(bundle)
    }
}
