//! License key storage backed by a JSON file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::KeyRecord;

/// Durable collection of issued license keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load every record. An unreadable or corrupt backing store yields an
    /// empty collection instead of an error.
    async fn load(&self) -> Vec<KeyRecord>;

    /// Replace the whole collection.
    async fn save(&self, records: &[KeyRecord]) -> Result<()>;

    /// Add a record to the collection.
    async fn append(&self, record: KeyRecord) -> Result<()>;

    /// Find a record by its key.
    async fn find_by_key(&self, key: &str) -> Result<Option<KeyRecord>>;

    /// Flag a record as used and return it as it was before the update.
    /// Returns None if the key is unknown.
    async fn mark_used(&self, key: &str) -> Result<Option<KeyRecord>>;
}

/// File implementation of KeyStore.
///
/// Mutations are serialized through one lock and written atomically
/// (temporary sibling file, then rename), so concurrent writers never lose
/// each other's records.
pub struct FileKeyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict read used by mutations: a missing file is empty, anything else
    /// that fails to parse is an error so we never overwrite existing keys.
    async fn read_records(&self) -> Result<Vec<KeyRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn write_records(&self, records: &[KeyRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self) -> Vec<KeyRecord> {
        match self.read_records().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "key store unreadable, treating as empty: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn save(&self, records: &[KeyRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_records(records).await
    }

    async fn append(&self, record: KeyRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_records().await?;
        records.push(record);
        self.write_records(&records).await
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<KeyRecord>> {
        let records = self.read_records().await?;
        Ok(records.into_iter().find(|r| r.key == key))
    }

    async fn mark_used(&self, key: &str) -> Result<Option<KeyRecord>> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_records().await?;
        let Some(record) = records.iter_mut().find(|r| r.key == key) else {
            return Ok(None);
        };

        let before = record.clone();
        if !record.used {
            record.used = true;
            self.write_records(&records).await?;
        }

        Ok(Some(before))
    }
}
