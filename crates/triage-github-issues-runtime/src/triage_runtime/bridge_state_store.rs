//! State-file persistence for poll checkpoints, per-issue counters, and
//! poll health, plus the append-only JSONL event logs.

use std::{
    collections::{BTreeMap, HashSet},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::atomic_io::{current_unix_timestamp_ms, write_text_atomic};

pub(super) const TRIAGE_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Health of the most recent poll cycle.
pub(super) struct BridgeHealthSnapshot {
    #[serde(default)]
    pub(super) updated_unix_ms: u64,
    #[serde(default)]
    pub(super) cycle_duration_ms: u64,
    #[serde(default)]
    pub(super) failure_streak: usize,
    #[serde(default)]
    pub(super) repo_active: bool,
    #[serde(default)]
    pub(super) last_cycle_discovered: usize,
    #[serde(default)]
    pub(super) last_cycle_processed: usize,
    #[serde(default)]
    pub(super) last_cycle_failed: usize,
    #[serde(default)]
    pub(super) last_cycle_duplicates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TriageBridgeState {
    schema_version: u32,
    #[serde(default)]
    last_issue_scan_at: Option<String>,
    #[serde(default)]
    processed_event_keys: Vec<String>,
    #[serde(default)]
    issues: BTreeMap<String, TriageIssueEventState>,
    #[serde(default)]
    health: BridgeHealthSnapshot,
}

impl Default for TriageBridgeState {
    fn default() -> Self {
        Self {
            schema_version: TRIAGE_STATE_SCHEMA_VERSION,
            last_issue_scan_at: None,
            processed_event_keys: Vec::new(),
            issues: BTreeMap::new(),
            health: BridgeHealthSnapshot::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct TriageIssueEventState {
    #[serde(default)]
    pub(super) last_event_key: Option<String>,
    #[serde(default)]
    pub(super) last_event_kind: Option<String>,
    #[serde(default)]
    pub(super) last_actor_login: Option<String>,
    #[serde(default)]
    pub(super) last_reason_code: Option<String>,
    #[serde(default)]
    pub(super) last_processed_unix_ms: Option<u64>,
    #[serde(default)]
    pub(super) total_processed_events: u64,
    #[serde(default)]
    pub(super) total_duplicate_events: u64,
    #[serde(default)]
    pub(super) total_failed_events: u64,
    #[serde(default)]
    pub(super) total_denied_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum IssueEventOutcome {
    Processed,
    /// Refused by the state machine or normalizer; nothing changed.
    Denied,
    /// A remote effect failed part-way.
    Failed,
}

pub(super) struct TriageBridgeStateStore {
    path: PathBuf,
    cap: usize,
    state: TriageBridgeState,
    processed_index: HashSet<String>,
}

impl TriageBridgeStateStore {
    pub(super) fn load(path: PathBuf, cap: usize) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            match serde_json::from_str::<TriageBridgeState>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "failed to parse triage bridge state file (starting fresh)"
                    );
                    TriageBridgeState::default()
                }
            }
        } else {
            TriageBridgeState::default()
        };

        if state.schema_version != TRIAGE_STATE_SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                expected = TRIAGE_STATE_SCHEMA_VERSION,
                found = state.schema_version,
                "unsupported triage bridge state schema (starting fresh)"
            );
            state = TriageBridgeState::default();
        }

        let cap = cap.max(1);
        if state.processed_event_keys.len() > cap {
            let keep_from = state.processed_event_keys.len() - cap;
            state.processed_event_keys.drain(..keep_from);
        }
        let processed_index = state
            .processed_event_keys
            .iter()
            .cloned()
            .collect::<HashSet<_>>();
        Ok(Self {
            path,
            cap,
            state,
            processed_index,
        })
    }

    pub(super) fn contains(&self, key: &str) -> bool {
        self.processed_index.contains(key)
    }

    /// Returns false when `key` was already recorded.
    pub(super) fn mark_processed(&mut self, key: &str) -> bool {
        if self.processed_index.contains(key) {
            return false;
        }
        self.state.processed_event_keys.push(key.to_string());
        self.processed_index.insert(key.to_string());
        while self.state.processed_event_keys.len() > self.cap {
            let removed = self.state.processed_event_keys.remove(0);
            self.processed_index.remove(&removed);
        }
        true
    }

    #[cfg(test)]
    pub(super) fn processed_event_keys(&self) -> &[String] {
        &self.state.processed_event_keys
    }

    #[cfg(test)]
    pub(super) fn issue_state(&self, issue_number: u64) -> Option<&TriageIssueEventState> {
        self.state.issues.get(&issue_number.to_string())
    }

    fn issue_state_mut(
        &mut self,
        issue_number: u64,
        event_key: &str,
        event_kind: &str,
        actor_login: &str,
    ) -> &mut TriageIssueEventState {
        let entry = self.state.issues.entry(issue_number.to_string()).or_default();
        entry.last_event_key = Some(event_key.to_string());
        entry.last_event_kind = Some(event_kind.to_string());
        entry.last_actor_login = Some(actor_login.to_string());
        entry.last_processed_unix_ms = Some(current_unix_timestamp_ms());
        entry
    }

    pub(super) fn record_issue_duplicate_event(
        &mut self,
        issue_number: u64,
        event_key: &str,
        event_kind: &str,
        actor_login: &str,
    ) {
        let entry = self.issue_state_mut(issue_number, event_key, event_kind, actor_login);
        entry.last_reason_code = Some("duplicate_event".to_string());
        entry.total_duplicate_events = entry.total_duplicate_events.saturating_add(1);
    }

    pub(super) fn record_issue_event_outcome(
        &mut self,
        issue_number: u64,
        event_key: &str,
        event_kind: &str,
        actor_login: &str,
        outcome: IssueEventOutcome,
        reason_code: &str,
    ) {
        let entry = self.issue_state_mut(issue_number, event_key, event_kind, actor_login);
        entry.last_reason_code = Some(reason_code.to_string());
        entry.total_processed_events = entry.total_processed_events.saturating_add(1);
        match outcome {
            IssueEventOutcome::Processed => {}
            IssueEventOutcome::Denied => {
                entry.total_denied_events = entry.total_denied_events.saturating_add(1);
            }
            IssueEventOutcome::Failed => {
                entry.total_failed_events = entry.total_failed_events.saturating_add(1);
            }
        }
    }

    pub(super) fn last_issue_scan_at(&self) -> Option<&str> {
        self.state.last_issue_scan_at.as_deref()
    }

    pub(super) fn update_last_issue_scan_at(&mut self, value: Option<String>) -> bool {
        if self.state.last_issue_scan_at == value {
            return false;
        }
        self.state.last_issue_scan_at = value;
        true
    }

    pub(super) fn health(&self) -> &BridgeHealthSnapshot {
        &self.state.health
    }

    pub(super) fn update_health(&mut self, value: BridgeHealthSnapshot) -> bool {
        if self.state.health == value {
            return false;
        }
        self.state.health = value;
        true
    }

    pub(super) fn save(&self) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(&self.state).context("failed to serialize state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))
    }
}

#[derive(Clone)]
pub(super) struct JsonlEventLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl JsonlEventLog {
    pub(super) fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub(super) fn append(&self, value: &Value) -> Result<()> {
        let line = serde_json::to_string(value).context("failed to encode log event")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}
