pub mod local;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One item in a memory bank. Items are append-only once retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Assigned at retention when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Type tag, e.g. `decision`, `signal`, `market_event`, `belief`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    pub source: MemorySource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySource {
    pub system: String,
    #[serde(default)]
    pub reference: Option<String>,
}

impl MemoryItem {
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(Error::validation("memory item type is required"));
        }
        if self.summary.trim().is_empty() {
            return Err(Error::validation("memory item summary is required"));
        }
        if self.timestamp.timestamp() == 0 {
            return Err(Error::validation("memory item timestamp is required"));
        }
        Ok(())
    }
}

/// Lower-case, trim, drop empties, and dedup while preserving first
/// occurrence. Idempotent.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let normalized = tag.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

pub const DEFAULT_RECALL_LIMIT: usize = 20;

/// Any subset of filters; absent fields do not constrain recall.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub kinds: Vec<String>,
    /// Every listed tag must be present on the item.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on the summary.
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn for_symbol(symbol: &str, limit: usize) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RECALL_LIMIT)
    }

    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(symbol) = &self.symbol {
            if !item.symbol.eq_ignore_ascii_case(symbol) {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| *k == item.kind) {
            return false;
        }
        if !self.tags.is_empty() {
            let item_tags = normalize_tags(&item.tags);
            let wanted = normalize_tags(&self.tags);
            if !wanted.iter().all(|t| item_tags.contains(t)) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if item.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if item.timestamp > until {
                return false;
            }
        }
        if let Some(term) = &self.term {
            if !item
                .summary
                .to_lowercase()
                .contains(&term.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectParams {
    #[serde(default)]
    pub query: MemoryQuery,
    #[serde(default)]
    pub prompt: Option<String>,
}

pub(crate) fn ensure_bank(bank: &str) -> Result<()> {
    if bank.trim().is_empty() {
        return Err(Error::validation("memory bank is required"));
    }
    Ok(())
}

/// Narrow capability trait over the memory service. One implementation
/// calls the remote backend; the in-process one backs tests and the
/// standalone proxy mode.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Validate, assign an id if missing, and append.
    async fn retain(&self, bank: &str, item: MemoryItem) -> Result<MemoryItem>;

    async fn recall(&self, bank: &str, query: &MemoryQuery) -> Result<Vec<MemoryItem>>;

    /// Synthesized belief over recall results. `None` when no reflection
    /// model is attached.
    async fn reflect(&self, bank: &str, params: &ReflectParams) -> Result<Option<MemoryItem>>;

    async fn banks(&self) -> Result<Vec<String>>;
}
