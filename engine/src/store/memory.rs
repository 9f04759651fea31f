//! In-process record store

use async_trait::async_trait;
use sdk::errors::CarrierError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{merge_fields, segments, Fields, RecordStore};

/// Record store kept in memory. Shared between tasks through an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, Fields>>,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes accepted so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn read(&self, path: &str) -> Result<Option<Fields>, CarrierError> {
        Ok(self.records.read().await.get(&normalize(path)).cloned())
    }

    async fn write(&self, path: &str, fields: Fields) -> Result<(), CarrierError> {
        let key = normalize(path);
        if key.is_empty() {
            return Err(CarrierError::RecordStore("Empty record path".to_string()));
        }
        let mut records = self.records.write().await;
        merge_fields(records.entry(key).or_default(), fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, CarrierError> {
        let prefix = normalize(path);
        let records = self.records.read().await;
        let children: BTreeSet<String> = records
            .keys()
            .filter_map(|key| {
                let rest = if prefix.is_empty() {
                    Some(key.as_str())
                } else {
                    key.strip_prefix(&prefix)?.strip_prefix('/')
                };
                rest.and_then(|r| r.split('/').next()).map(str::to_string)
            })
            .collect();
        Ok(children.into_iter().collect())
    }
}
