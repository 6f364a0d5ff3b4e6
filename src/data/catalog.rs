use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::csv_source::CsvDataSource;
use crate::clock::SharedClock;
use crate::data::DataSource;
use crate::error::{Error, Result};

const CATALOG_FILE: &str = "catalog.json";
const SCHEMA_VERSION: &str = "ohlcv-1";

/// Catalog entry for one registered, content-hashed OHLCV file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: Uuid,
    pub name: String,
    pub symbol: String,
    pub source: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub path: PathBuf,
    pub sha256: String,
    pub record_count: u64,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegisterDataset {
    pub name: String,
    pub symbol: String,
    pub source: String,
    pub path: PathBuf,
}

/// JSON-file-backed dataset registry.
///
/// Registration computes the file's SHA-256 and row count, rejects
/// duplicate names, and persists the catalog atomically (temp + rename).
/// Datasets are immutable after registration: the stored digest must still
/// match the file when the dataset is consumed.
pub struct DatasetCatalog {
    root: PathBuf,
    clock: SharedClock,
    entries: RwLock<HashMap<Uuid, DatasetEntry>>,
}

impl DatasetCatalog {
    pub fn open(root: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Internal(anyhow::anyhow!("create dataset root: {e}")))?;
        let catalog_path = root.join(CATALOG_FILE);
        let entries = if catalog_path.exists() {
            let raw = std::fs::read_to_string(&catalog_path)
                .map_err(|e| Error::Internal(anyhow::anyhow!("read catalog: {e}")))?;
            let list: Vec<DatasetEntry> = serde_json::from_str(&raw)
                .map_err(|e| Error::Internal(anyhow::anyhow!("parse catalog: {e}")))?;
            list.into_iter().map(|d| (d.id, d)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            root,
            clock,
            entries: RwLock::new(entries),
        })
    }

    pub fn register(&self, request: RegisterDataset) -> Result<DatasetEntry> {
        if request.name.trim().is_empty() {
            return Err(Error::validation("dataset name is empty"));
        }
        {
            let entries = self.entries.read();
            if entries.values().any(|d| d.name == request.name) {
                return Err(Error::conflict(format!(
                    "dataset name already registered: {}",
                    request.name
                )));
            }
        }

        let sha256 = hash_file(&request.path)?;
        let source = CsvDataSource::from_path(&request.path, &request.symbol)?;
        let record_count = source.total_candles() as u64;
        let (start_date, end_date) = date_span(&source)
            .ok_or_else(|| Error::validation("dataset contains no rows"))?;

        let entry = DatasetEntry {
            id: Uuid::new_v4(),
            name: request.name,
            symbol: request.symbol,
            source: request.source,
            start_date,
            end_date,
            path: request.path,
            sha256,
            record_count,
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: self.clock.now(),
        };

        let mut entries = self.entries.write();
        entries.insert(entry.id, entry.clone());
        self.persist(&entries)?;
        tracing::info!(
            dataset = %entry.name,
            id = %entry.id,
            rows = entry.record_count,
            hash = &entry.sha256[..12],
            "dataset registered"
        );
        Ok(entry)
    }

    pub fn get(&self, id: Uuid) -> Result<DatasetEntry> {
        self.entries
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound("dataset", id.to_string()))
    }

    pub fn list(&self) -> Vec<DatasetEntry> {
        let mut all: Vec<_> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Re-hash the backing file and fail on drift. This is the gate the
    /// backtest handler uses to refuse non-reproducible runs.
    pub fn verify_hash(&self, id: Uuid) -> Result<DatasetEntry> {
        let entry = self.get(id)?;
        let current = hash_file(&entry.path)?;
        if current != entry.sha256 {
            return Err(Error::conflict(format!(
                "dataset integrity check failed for '{}': file hash {} does not match registered {}",
                entry.name,
                &current[..12],
                &entry.sha256[..12],
            )));
        }
        Ok(entry)
    }

    /// Hash-verify and load the dataset into memory.
    pub fn load_data_source(&self, id: Uuid) -> Result<(DatasetEntry, CsvDataSource)> {
        let entry = self.verify_hash(id)?;
        let source = CsvDataSource::from_path(&entry.path, &entry.symbol)?;
        Ok((entry, source))
    }

    fn persist(&self, entries: &HashMap<Uuid, DatasetEntry>) -> Result<()> {
        let mut list: Vec<_> = entries.values().cloned().collect();
        list.sort_by_key(|d| d.id);
        let payload = serde_json::to_string_pretty(&list)
            .map_err(|e| Error::Internal(anyhow::anyhow!("serialize catalog: {e}")))?;
        let final_path = self.root.join(CATALOG_FILE);
        let tmp_path = self.root.join(format!("{CATALOG_FILE}.tmp"));
        std::fs::write(&tmp_path, payload)
            .map_err(|e| Error::Internal(anyhow::anyhow!("write catalog temp: {e}")))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| Error::Internal(anyhow::anyhow!("rename catalog: {e}")))?;
        Ok(())
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::validation(format!("cannot open dataset file {}: {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::Internal(anyhow::anyhow!("read dataset file: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn date_span(source: &CsvDataSource) -> Option<(NaiveDate, NaiveDate)> {
    let mut span: Option<(NaiveDate, NaiveDate)> = None;
    for symbol in source.symbols() {
        let candles = source.candles(&symbol);
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            continue;
        };
        let (lo, hi) = (first.timestamp.date_naive(), last.timestamp.date_naive());
        span = Some(match span {
            Some((a, b)) => (a.min(lo), b.max(hi)),
            None => (lo, hi),
        });
    }
    span
}
