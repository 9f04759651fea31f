//! Record store backed by JSON documents on disk
//!
//! A record at `a/b/Certify` is stored as `<root>/a/b/Certify.json`. Writes go
//! through a uniquely named temporary file and a rename. The read-merge-write
//! cycle holds a lock keyed by the record file, shared by every store in the
//! process.

use async_trait::async_trait;
use sdk::errors::CarrierError;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError};
use tokio::sync::Mutex;

use super::{merge_fields, segments, Fields, RecordStore};

const RECORD_EXT: &str = "json";

/// Lock guarding read-merge-write of one record file
fn record_lock(file: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks
        .entry(file.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, path: &str) -> Result<PathBuf, CarrierError> {
        let mut dir = self.root.clone();
        for segment in segments(path) {
            if segment == "." || segment == ".." {
                return Err(CarrierError::RecordStore(format!(
                    "Invalid record path '{}'",
                    path
                )));
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    fn file_for(&self, path: &str) -> Result<PathBuf, CarrierError> {
        let dir = self.dir_for(path)?;
        if dir == self.root {
            return Err(CarrierError::RecordStore("Empty record path".to_string()));
        }
        Ok(dir.with_extension(RECORD_EXT))
    }

    async fn read_file(file: &Path) -> Result<Option<Fields>, CarrierError> {
        match tokio::fs::read_to_string(file).await {
            Ok(contents) => {
                let fields: Fields = serde_json::from_str(&contents)?;
                Ok(Some(fields))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CarrierError::RecordStore(format!(
                "Failed to read {}: {}",
                file.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn read(&self, path: &str) -> Result<Option<Fields>, CarrierError> {
        Self::read_file(&self.file_for(path)?).await
    }

    async fn write(&self, path: &str, fields: Fields) -> Result<(), CarrierError> {
        let file = self.file_for(path)?;
        let lock = record_lock(&file);
        let _guard = lock.lock().await;

        let mut stored = Self::read_file(&file).await?.unwrap_or_default();
        merge_fields(&mut stored, fields);
        let contents = serde_json::to_vec_pretty(&stored)?;

        let parent = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent).await?;

        tokio::task::spawn_blocking(move || -> Result<(), CarrierError> {
            let mut staging = tempfile::NamedTempFile::new_in(&parent)?;
            staging.write_all(&contents)?;
            staging.persist(&file).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CarrierError::RecordStore(format!("Record write task failed: {}", e)))??;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, CarrierError> {
        let dir = self.dir_for(path)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut children = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let name = if entry.file_type().await?.is_dir() {
                entry_path.file_name()
            } else if entry_path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                entry_path.file_stem()
            } else {
                None
            };
            if let Some(name) = name.and_then(|n| n.to_str()) {
                children.insert(name.to_string());
            }
        }

        Ok(children.into_iter().collect())
    }
}
