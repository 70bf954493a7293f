//! Key-value store for per-issue mirror metadata records.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use triage_github_issues::issue_runtime_helpers::sanitize_for_path;
use triage_github_issues::mirror_record::MetadataRecord;

use super::atomic_io::write_text_atomic;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<MetadataRecord>>;

    async fn put(&self, key: &str, record: &MetadataRecord) -> Result<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every `(key, record)` whose `field` equals `value`, ordered by key.
    async fn find_by_field(&self, field: &str, value: &str)
        -> Result<Vec<(String, MetadataRecord)>>;
}

fn record_field_matches(record: &MetadataRecord, field: &str, value: &str) -> bool {
    record
        .get(field)
        .is_some_and(|stored| stored.trim() == value.trim())
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadataRecord {
    key: String,
    record: MetadataRecord,
}

/// One pretty-printed JSON file per key under `root`. The file carries the
/// key next to the record so field lookups can recover it.
pub struct FileMetadataStore {
    root: PathBuf,
}

impl FileMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let short_hash = digest
            .iter()
            .take(4)
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        self.root
            .join(format!("{}-{short_hash}.json", sanitize_for_path(key)))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<MetadataRecord>> {
        let path = self.path_for_key(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read metadata file {}", path.display()))?;
        let stored = serde_json::from_str::<StoredMetadataRecord>(&raw)
            .with_context(|| format!("failed to parse metadata file {}", path.display()))?;
        Ok(Some(stored.record))
    }

    async fn put(&self, key: &str, record: &MetadataRecord) -> Result<()> {
        let path = self.path_for_key(key);
        let stored = StoredMetadataRecord {
            key: key.to_string(),
            record: record.clone(),
        };
        let mut payload =
            serde_json::to_string_pretty(&stored).context("failed to serialize metadata record")?;
        payload.push('\n');
        write_text_atomic(&path, &payload)
            .with_context(|| format!("failed to write metadata file {}", path.display()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for_key(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error)
                .with_context(|| format!("failed to delete metadata file {}", path.display())),
        }
    }

    async fn find_by_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<(String, MetadataRecord)>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to list metadata dir {}", self.root.display()))?;
        let mut matches = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list metadata dir {}", self.root.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read metadata file {}", path.display()))?;
            let stored = match serde_json::from_str::<StoredMetadataRecord>(&raw) {
                Ok(stored) => stored,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable metadata file");
                    continue;
                }
            };
            if record_field_matches(&stored.record, field, value) {
                matches.push((stored.key, stored.record));
            }
        }
        matches.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(matches)
    }
}

#[derive(Default)]
struct InMemoryMetadataState {
    records: BTreeMap<String, MetadataRecord>,
    failing_puts: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    state: Mutex<InMemoryMetadataState>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, InMemoryMetadataState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, key: &str) -> Option<MetadataRecord> {
        self.lock_state().records.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_state().records.keys().cloned().collect()
    }

    /// Makes the next `count` writes of `key` fail.
    pub fn fail_puts_for(&self, key: &str, count: usize) {
        self.lock_state()
            .failing_puts
            .insert(key.to_string(), count);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<MetadataRecord>> {
        Ok(self.record(key))
    }

    async fn put(&self, key: &str, record: &MetadataRecord) -> Result<()> {
        let mut state = self.lock_state();
        if let Some(remaining) = state.failing_puts.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("injected metadata write failure for {key}");
            }
        }
        state.records.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock_state().records.remove(key);
        Ok(())
    }

    async fn find_by_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<(String, MetadataRecord)>> {
        Ok(self
            .lock_state()
            .records
            .iter()
            .filter(|(_, record)| record_field_matches(record, field, value))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }
}
