//! Pool each validation issue was in when its accept/reject decision was
//! made, so `undo` can put the `unknown` label back. Reads come from memory;
//! writes are serialized and flushed on the blocking pool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use triage_github_issues::issue_state::{Decision, Pool};

use super::atomic_io::{current_unix_timestamp_ms, write_text_atomic};

const DECISION_LEDGER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLedgerEntry {
    pub decision: Decision,
    pub prior_pool: Pool,
    pub actor: String,
    pub recorded_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionLedgerFile {
    schema_version: u32,
    #[serde(default)]
    decisions: BTreeMap<String, DecisionLedgerEntry>,
}

impl Default for DecisionLedgerFile {
    fn default() -> Self {
        Self {
            schema_version: DECISION_LEDGER_SCHEMA_VERSION,
            decisions: BTreeMap::new(),
        }
    }
}

pub struct DecisionLedger {
    path: Option<PathBuf>,
    state: Mutex<DecisionLedgerFile>,
    writer: tokio::sync::Mutex<()>,
}

impl DecisionLedger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(DecisionLedgerFile::default()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Loads `decisions.json`; unreadable or foreign-schema files start empty.
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read decision ledger {}", path.display()))?;
            match serde_json::from_str::<DecisionLedgerFile>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "failed to parse decision ledger (starting fresh)"
                    );
                    DecisionLedgerFile::default()
                }
            }
        } else {
            DecisionLedgerFile::default()
        };
        if state.schema_version != DECISION_LEDGER_SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                found = state.schema_version,
                expected = DECISION_LEDGER_SCHEMA_VERSION,
                "unsupported decision ledger schema (starting fresh)"
            );
            state = DecisionLedgerFile::default();
        }
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, DecisionLedgerFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn entry(&self, issue_number: u64) -> Option<DecisionLedgerEntry> {
        self.lock_state()
            .decisions
            .get(&issue_number.to_string())
            .cloned()
    }

    /// Prior pool recorded for `decision`; `None` when the ledger has no
    /// matching entry.
    pub fn prior_pool(&self, issue_number: u64, decision: Decision) -> Option<Pool> {
        self.entry(issue_number)
            .filter(|entry| entry.decision == decision)
            .map(|entry| entry.prior_pool)
    }

    pub async fn record(
        &self,
        issue_number: u64,
        decision: Decision,
        prior_pool: Pool,
        actor: &str,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut state = self.lock_state();
            state.decisions.insert(
                issue_number.to_string(),
                DecisionLedgerEntry {
                    decision,
                    prior_pool,
                    actor: actor.to_string(),
                    recorded_unix_ms: current_unix_timestamp_ms(),
                },
            );
            state.clone()
        };
        self.save(snapshot).await
    }

    pub async fn clear(&self, issue_number: u64) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut state = self.lock_state();
            if state.decisions.remove(&issue_number.to_string()).is_none() {
                return Ok(());
            }
            state.clone()
        };
        self.save(snapshot).await
    }

    async fn save(&self, state: DecisionLedgerFile) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let mut payload = serde_json::to_string_pretty(&state)
                .context("failed to serialize decision ledger")?;
            payload.push('\n');
            write_text_atomic(&path, &payload)
                .with_context(|| format!("failed to write decision ledger {}", path.display()))
        })
        .await
        .context("decision ledger writer task failed")?
    }
}
