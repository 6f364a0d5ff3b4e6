use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{
    ensure_bank, MemoryItem, MemoryQuery, MemorySource, MemoryStore, ReflectParams,
};
use crate::clock::SharedClock;
use crate::error::Result;

/// Locked slice-per-bank store. Backs tests and the standalone proxy mode
/// when no remote memory backend is configured.
pub struct InMemoryStore {
    banks: Mutex<HashMap<String, Vec<MemoryItem>>>,
    clock: SharedClock,
}

impl InMemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            banks: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn retain(&self, bank: &str, mut item: MemoryItem) -> Result<MemoryItem> {
        ensure_bank(bank)?;
        item.validate()?;
        if item.id.is_none() {
            item.id = Some(Uuid::new_v4().to_string());
        }
        item.tags = super::normalize_tags(&item.tags);
        let mut banks = self.banks.lock();
        banks.entry(bank.to_string()).or_default().push(item.clone());
        Ok(item)
    }

    async fn recall(&self, bank: &str, query: &MemoryQuery) -> Result<Vec<MemoryItem>> {
        ensure_bank(bank)?;
        let banks = self.banks.lock();
        let Some(items) = banks.get(bank) else {
            return Ok(Vec::new());
        };
        // Newest first, bounded by the query limit.
        let mut matched: Vec<MemoryItem> =
            items.iter().filter(|i| query.matches(i)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.effective_limit());
        Ok(matched)
    }

    async fn reflect(&self, bank: &str, params: &ReflectParams) -> Result<Option<MemoryItem>> {
        ensure_bank(bank)?;
        let recalled = self.recall(bank, &params.query).await?;
        if recalled.is_empty() {
            return Ok(None);
        }
        let symbols: Vec<String> = {
            let mut seen = Vec::new();
            for item in &recalled {
                if !item.symbol.is_empty() && !seen.contains(&item.symbol) {
                    seen.push(item.symbol.clone());
                }
            }
            seen
        };
        Ok(Some(MemoryItem {
            id: Some(Uuid::new_v4().to_string()),
            timestamp: self.clock.now(),
            kind: "belief".to_string(),
            symbol: symbols.first().cloned().unwrap_or_default(),
            tags: vec!["reflection".to_string()],
            summary: format!(
                "{} related memories in '{bank}' covering {}",
                recalled.len(),
                if symbols.is_empty() {
                    "no symbols".to_string()
                } else {
                    symbols.join(", ")
                }
            ),
            data: BTreeMap::new(),
            source: MemorySource {
                system: "verdict.memory".to_string(),
                reference: None,
            },
        }))
    }

    async fn banks(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.banks.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
