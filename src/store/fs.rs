//! Filesystem-backed backup and dead-letter persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::{BackupSink, DeadLetterSink, RecordStore, StoreError};
use crate::webhooks::DeadLetterEntry;

/// Writes each table snapshot to `<location>/<table>.json`.
pub struct JsonFileBackup {
    store: Arc<dyn RecordStore>,
}

impl JsonFileBackup {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackupSink for JsonFileBackup {
    async fn snapshot_table(&self, table: &str, location: &str) -> Result<u64, StoreError> {
        let rows = self.store.export(table).await?;
        let bytes = serde_json::to_vec(&rows)?;

        let dir = Path::new(location);
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{table}.json"));
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(table = %table, path = ?path, bytes = bytes.len(), "Table snapshot written");
        Ok(bytes.len() as u64)
    }
}

/// Appends dead letters to a JSON-lines file.
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    // serialises appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every persisted entry back.
    pub async fn read_all(&self) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
