//! GitHub polling bridge for the triage bot.
//!
//! Each poll lists validation issues updated since the last scan, collects
//! command comments and timeline events, drops anything already handled
//! (persisted event keys plus footer markers in the bot's own comments), and
//! hands the rest to the [`TriageEngine`]. Issues are processed concurrently;
//! events within one issue run in order.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use triage_github_issues::issue_command_parser::{parse_triage_command, ParsedTriageCommand};
use triage_github_issues::issue_comment::{
    extract_footer_event_keys, issue_command_reason_code, render_issue_command_comment,
    IssueCommandStatus,
};
use triage_github_issues::issue_event_collection::{collect_triage_events, TriageEvent};
use triage_github_issues::issue_labels::issue_matches_required_numbers;
use triage_github_issues::issue_runtime_helpers::repository_pair_state_dir;
use triage_github_issues::issue_state::{same_login, IssueRef};
use triage_github_issues::issue_transition::TransitionRequest;
use triage_github_issues::passive_event::PlatformEvent;
use triage_github_issues::TriageError;

mod atomic_io;
mod bridge_state_store;
mod cross_repo_mirror;
mod decision_ledger;
mod github_api_client;
mod in_memory_tracker;
mod issue_tracker;
mod keyed_locks;
mod metadata_store;
mod triage_engine;

use atomic_io::current_unix_timestamp_ms;
use bridge_state_store::{
    BridgeHealthSnapshot, IssueEventOutcome, JsonlEventLog, TriageBridgeStateStore,
};
use github_api_client::GithubApiClient;

pub use cross_repo_mirror::{CrossRepoMirror, MirrorOutcome};
pub use decision_ledger::{DecisionLedger, DecisionLedgerEntry};
pub use in_memory_tracker::InMemoryIssueTracker;
pub use issue_tracker::{GithubTracker, IssueTracker};
pub use keyed_locks::KeyedLocks;
pub use metadata_store::{FileMetadataStore, InMemoryMetadataStore, MetadataStore};
pub use triage_engine::{CommandReport, PlatformEventReport, TriageEngine, TriageEngineConfig};

#[derive(Debug, Clone)]
/// Runtime configuration for the triage polling bridge.
pub struct TriageBridgeRuntimeConfig {
    pub validation_repo: String,
    pub findings_repo: String,
    pub api_base: String,
    pub token: String,
    pub bot_login: Option<String>,
    pub command_prefix: String,
    pub active_topic: String,
    /// Forces the active designation instead of reading repository topics.
    pub active_override: Option<bool>,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub poll_once: bool,
    pub required_issue_numbers: Vec<u64>,
    pub processed_event_cap: usize,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub transition_timeout_ms: u64,
}

impl TriageBridgeRuntimeConfig {
    /// Parses both repository slugs and checks the settings the bridge cannot
    /// run without.
    pub fn validate(&self) -> Result<(RepoRef, RepoRef)> {
        let validation = RepoRef::parse(&self.validation_repo)
            .context("invalid validation repository")?;
        let findings =
            RepoRef::parse(&self.findings_repo).context("invalid findings repository")?;
        if validation.as_slug().eq_ignore_ascii_case(&findings.as_slug()) {
            bail!(
                "validation and findings repositories must differ (both are {})",
                validation.as_slug()
            );
        }
        if self.command_prefix.trim().is_empty() {
            bail!("command prefix cannot be empty");
        }
        if self.token.trim().is_empty() {
            bail!("github token cannot be empty");
        }
        Ok((validation, findings))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (owner, name) = trimmed
            .split_once('/')
            .ok_or_else(|| anyhow!("invalid repository '{raw}', expected owner/repo"))?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("invalid repository '{raw}', expected owner/repo");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PollCycleReport {
    pub repo_active: bool,
    pub discovered_events: usize,
    pub processed_events: usize,
    pub skipped_duplicate_events: usize,
    pub failed_events: usize,
}

/// Runs the triage bridge until Ctrl-C, or for one cycle with `poll_once`.
pub async fn run_triage_bridge(config: TriageBridgeRuntimeConfig) -> Result<()> {
    let mut runtime = TriageBridgeRuntime::new(config).await?;
    runtime.run().await
}

#[derive(Debug, Clone)]
struct EventContext {
    bot_login: String,
    command_prefix: String,
    repo_active: bool,
}

#[derive(Debug, Clone)]
/// What happened to one collected event.
struct EventOutcome {
    event_key: String,
    issue_number: u64,
    event_kind: &'static str,
    actor: String,
    command: String,
    status: &'static str,
    reason_code: String,
    outcome: IssueEventOutcome,
    reply_posted: bool,
    detail: Value,
}

struct TriageBridgeRuntime {
    config: TriageBridgeRuntimeConfig,
    validation_repo: RepoRef,
    findings_repo: RepoRef,
    github_client: GithubApiClient,
    engine: Arc<TriageEngine>,
    required_issue_numbers: HashSet<u64>,
    state_store: TriageBridgeStateStore,
    inbound_log: JsonlEventLog,
    outbound_log: JsonlEventLog,
    bot_login: String,
}

impl TriageBridgeRuntime {
    async fn new(config: TriageBridgeRuntimeConfig) -> Result<Self> {
        let (validation_repo, findings_repo) = config.validate()?;
        let github_client = GithubApiClient::new(
            &config.api_base,
            &config.token,
            validation_repo.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;
        let findings_client = GithubApiClient::new(
            &config.api_base,
            &config.token,
            findings_repo.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;
        let bot_login = match config.bot_login.as_deref().map(str::trim) {
            Some(login) if !login.is_empty() => login.to_string(),
            _ => github_client.resolve_bot_login().await?,
        };

        let repository_state_dir = repository_pair_state_dir(
            &config.state_dir,
            &validation_repo.as_slug(),
            &findings_repo.as_slug(),
        );
        std::fs::create_dir_all(&repository_state_dir)
            .with_context(|| format!("failed to create {}", repository_state_dir.display()))?;
        let state_store = TriageBridgeStateStore::load(
            repository_state_dir.join("state.json"),
            config.processed_event_cap,
        )?;
        let inbound_log = JsonlEventLog::open(repository_state_dir.join("inbound-events.jsonl"))?;
        let outbound_log =
            JsonlEventLog::open(repository_state_dir.join("outbound-events.jsonl"))?;
        let ledger = DecisionLedger::load(repository_state_dir.join("decisions.json"))?;
        let metadata = FileMetadataStore::new(repository_state_dir.join("metadata"));

        let engine = TriageEngine::new(
            Arc::new(GithubTracker::new(github_client.clone(), findings_client)),
            Arc::new(metadata),
            Arc::new(ledger),
            TriageEngineConfig {
                effect_timeout: Duration::from_millis(config.transition_timeout_ms.max(1)),
            },
        );
        let required_issue_numbers = config
            .required_issue_numbers
            .iter()
            .copied()
            .filter(|issue_number| *issue_number > 0)
            .collect::<HashSet<_>>();
        info!(
            validation = %validation_repo.as_slug(),
            findings = %findings_repo.as_slug(),
            bot = %bot_login,
            state_dir = %repository_state_dir.display(),
            "triage bridge initialized"
        );
        Ok(Self {
            config,
            validation_repo,
            findings_repo,
            github_client,
            engine: Arc::new(engine),
            required_issue_numbers,
            state_store,
            inbound_log,
            outbound_log,
            bot_login,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let mut failure_streak = self.state_store.health().failure_streak;
        loop {
            let cycle_started = Instant::now();
            match self.poll_once().await {
                Ok(report) => {
                    failure_streak = 0;
                    info!(
                        repo = %self.validation_repo.as_slug(),
                        active = report.repo_active,
                        discovered = report.discovered_events,
                        processed = report.processed_events,
                        duplicate_skips = report.skipped_duplicate_events,
                        failed = report.failed_events,
                        "triage bridge poll"
                    );
                    if self.config.poll_once {
                        info!(repo = %self.validation_repo.as_slug(), "triage bridge one-shot complete");
                        return Ok(());
                    }
                }
                Err(poll_error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    let snapshot = self.build_health_snapshot(
                        &PollCycleReport::default(),
                        cycle_started.elapsed().as_millis() as u64,
                        failure_streak,
                    );
                    if self.state_store.update_health(snapshot) {
                        self.state_store.save()?;
                    }
                    error!(
                        repo = %self.validation_repo.as_slug(),
                        failure_streak,
                        error = %format!("{poll_error:#}"),
                        "triage bridge poll error"
                    );
                    if self.config.poll_once {
                        return Err(poll_error);
                    }
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("triage bridge shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn resolve_repo_active(&self) -> Result<bool> {
        if let Some(active) = self.config.active_override {
            return Ok(active);
        }
        let topics = self.github_client.list_repository_topics().await?;
        let wanted = self.config.active_topic.trim();
        Ok(topics
            .iter()
            .any(|topic| topic.trim().eq_ignore_ascii_case(wanted)))
    }

    async fn poll_once(&mut self) -> Result<PollCycleReport> {
        let cycle_started = Instant::now();
        let mut report = PollCycleReport {
            repo_active: self.resolve_repo_active().await?,
            ..PollCycleReport::default()
        };
        let mut state_dirty = false;
        let context = EventContext {
            bot_login: self.bot_login.clone(),
            command_prefix: self.config.command_prefix.clone(),
            repo_active: report.repo_active,
        };

        let issues = self
            .github_client
            .list_updated_issues(self.state_store.last_issue_scan_at())
            .await?;
        let mut latest_issue_scan = self.state_store.last_issue_scan_at().map(str::to_string);
        let mut batches = Vec::new();

        for issue in issues {
            latest_issue_scan = match latest_issue_scan {
                Some(existing) if existing >= issue.updated_at => Some(existing),
                _ => Some(issue.updated_at.clone()),
            };
            if !issue_matches_required_numbers(issue.number, &self.required_issue_numbers) {
                continue;
            }

            let comments = self.github_client.list_issue_comments(issue.number).await?;
            let timeline = self.github_client.list_issue_events(issue.number).await?;
            let known_event_keys = comments
                .iter()
                .filter(|comment| same_login(&comment.user.login, &self.bot_login))
                .flat_map(|comment| {
                    comment
                        .body
                        .as_deref()
                        .map(extract_footer_event_keys)
                        .unwrap_or_default()
                })
                .collect::<HashSet<_>>();
            for key in &known_event_keys {
                if self.state_store.mark_processed(key) {
                    state_dirty = true;
                }
            }

            let events = collect_triage_events(
                &issue,
                &comments,
                &timeline,
                &self.bot_login,
                &self.config.command_prefix,
            );
            report.discovered_events = report.discovered_events.saturating_add(events.len());

            let mut pending = Vec::new();
            for event in events {
                if self.state_store.contains(event.key()) || known_event_keys.contains(event.key())
                {
                    report.skipped_duplicate_events =
                        report.skipped_duplicate_events.saturating_add(1);
                    self.state_store.record_issue_duplicate_event(
                        event.issue_number(),
                        event.key(),
                        event.kind_name(),
                        event.actor(),
                    );
                    state_dirty = true;
                    continue;
                }
                self.inbound_log.append(&json!({
                    "timestamp_unix_ms": current_unix_timestamp_ms(),
                    "repo": self.validation_repo.as_slug(),
                    "event_key": event.key(),
                    "kind": event.kind_name(),
                    "issue_number": event.issue_number(),
                    "action": describe_event_action(&event, &self.config.command_prefix),
                    "repo_active": report.repo_active,
                    "event": &event,
                }))?;
                pending.push(event);
            }
            if !pending.is_empty() {
                batches.push(pending);
            }
        }

        let mut tasks = JoinSet::new();
        for batch in batches {
            let engine = Arc::clone(&self.engine);
            let context = context.clone();
            tasks.spawn(async move { process_issue_events(engine, batch, context).await });
        }
        while let Some(joined) = tasks.join_next().await {
            let outcomes = match joined {
                Ok(outcomes) => outcomes,
                Err(join_error) => {
                    report.failed_events = report.failed_events.saturating_add(1);
                    error!(error = %join_error, "issue event task aborted");
                    continue;
                }
            };
            for outcome in outcomes {
                self.record_outcome(&outcome, &mut report)?;
                state_dirty = true;
            }
        }

        if self
            .state_store
            .update_last_issue_scan_at(latest_issue_scan)
        {
            state_dirty = true;
        }
        let snapshot =
            self.build_health_snapshot(&report, cycle_started.elapsed().as_millis() as u64, 0);
        if self.state_store.update_health(snapshot) {
            state_dirty = true;
        }
        if state_dirty {
            self.state_store.save()?;
        }
        Ok(report)
    }

    fn record_outcome(&mut self, outcome: &EventOutcome, report: &mut PollCycleReport) -> Result<()> {
        self.outbound_log.append(&json!({
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "repo": self.validation_repo.as_slug(),
            "findings_repo": self.findings_repo.as_slug(),
            "event_key": &outcome.event_key,
            "issue_number": outcome.issue_number,
            "kind": outcome.event_kind,
            "actor": &outcome.actor,
            "command": &outcome.command,
            "status": outcome.status,
            "reason_code": &outcome.reason_code,
            "reply_posted": outcome.reply_posted,
            "detail": &outcome.detail,
        }))?;
        self.state_store.mark_processed(&outcome.event_key);
        self.state_store.record_issue_event_outcome(
            outcome.issue_number,
            &outcome.event_key,
            outcome.event_kind,
            &outcome.actor,
            outcome.outcome,
            &outcome.reason_code,
        );
        report.processed_events = report.processed_events.saturating_add(1);
        if outcome.outcome == IssueEventOutcome::Failed {
            report.failed_events = report.failed_events.saturating_add(1);
        }
        Ok(())
    }

    fn build_health_snapshot(
        &self,
        report: &PollCycleReport,
        cycle_duration_ms: u64,
        failure_streak: usize,
    ) -> BridgeHealthSnapshot {
        BridgeHealthSnapshot {
            updated_unix_ms: current_unix_timestamp_ms(),
            cycle_duration_ms,
            failure_streak,
            repo_active: report.repo_active,
            last_cycle_discovered: report.discovered_events,
            last_cycle_processed: report.processed_events,
            last_cycle_failed: report.failed_events,
            last_cycle_duplicates: report.skipped_duplicate_events,
        }
    }
}

fn describe_event_action(event: &TriageEvent, command_prefix: &str) -> String {
    match event {
        TriageEvent::Command(command) => match parse_triage_command(&command.body, command_prefix)
        {
            Some(ParsedTriageCommand::Request(request)) => request.name().to_string(),
            Some(ParsedTriageCommand::Invalid { .. }) => "invalid".to_string(),
            None => "none".to_string(),
        },
        TriageEvent::Platform(platform) => platform.kind.as_str().to_string(),
    }
}

fn command_status_for_error(error: &TriageError) -> (IssueCommandStatus, IssueEventOutcome) {
    match error {
        TriageError::RemoteEffectFailed { .. } | TriageError::InconsistentMirror { .. } => {
            (IssueCommandStatus::Failed, IssueEventOutcome::Failed)
        }
        _ => (IssueCommandStatus::Rejected, IssueEventOutcome::Denied),
    }
}

async fn process_issue_events(
    engine: Arc<TriageEngine>,
    events: Vec<TriageEvent>,
    context: EventContext,
) -> Vec<EventOutcome> {
    let mut outcomes = Vec::with_capacity(events.len());
    for event in events {
        let mut outcome = match &event {
            TriageEvent::Command(command) => {
                handle_command_event(
                    &engine,
                    command.issue_number,
                    &command.author_login,
                    &command.body,
                    &context,
                )
                .await
            }
            TriageEvent::Platform(platform) => {
                handle_platform_event(&engine, platform, &context).await
            }
        };
        if let Some(reply) = outcome.reply.take() {
            let body = render_issue_command_comment(
                event.key(),
                &outcome.command,
                outcome.status,
                &outcome.reason_code,
                &reply,
            );
            match engine
                .tracker()
                .post_comment(IssueRef::validation(event.issue_number()), &body)
                .await
            {
                Ok(()) => outcome.reply_posted = true,
                Err(post_error) => warn!(
                    issue = event.issue_number(),
                    event_key = %event.key(),
                    error = %format!("{post_error:#}"),
                    "failed to post triage reply"
                ),
            }
        }
        outcomes.push(EventOutcome {
            event_key: event.key().to_string(),
            issue_number: event.issue_number(),
            event_kind: event.kind_name(),
            actor: event.actor().to_string(),
            command: outcome.command,
            status: outcome.status.as_str(),
            reason_code: outcome.reason_code,
            outcome: outcome.outcome,
            reply_posted: outcome.reply_posted,
            detail: outcome.detail,
        });
    }
    outcomes
}

struct HandledEvent {
    command: String,
    status: IssueCommandStatus,
    outcome: IssueEventOutcome,
    reason_code: String,
    reply: Option<String>,
    reply_posted: bool,
    detail: Value,
}

async fn handle_command_event(
    engine: &TriageEngine,
    issue_number: u64,
    actor: &str,
    body: &str,
    context: &EventContext,
) -> HandledEvent {
    let request = match parse_triage_command(body, &context.command_prefix) {
        Some(ParsedTriageCommand::Request(request)) => request,
        Some(ParsedTriageCommand::Invalid { message }) => {
            return HandledEvent {
                command: "usage".to_string(),
                status: IssueCommandStatus::Rejected,
                outcome: IssueEventOutcome::Denied,
                reason_code: issue_command_reason_code("usage", IssueCommandStatus::Rejected),
                reply: Some(message),
                reply_posted: false,
                detail: Value::Null,
            }
        }
        None => {
            return HandledEvent {
                command: "none".to_string(),
                status: IssueCommandStatus::Completed,
                outcome: IssueEventOutcome::Processed,
                reason_code: "not_a_command".to_string(),
                reply: None,
                reply_posted: false,
                detail: Value::Null,
            }
        }
    };

    let command = request.name().to_string();
    let status_on_success = if matches!(request, TransitionRequest::Undo { .. }) {
        IssueCommandStatus::Reverted
    } else {
        IssueCommandStatus::Completed
    };
    match engine.handle_command(issue_number, actor, request).await {
        Ok(report) => HandledEvent {
            reason_code: issue_command_reason_code(&command, status_on_success),
            status: status_on_success,
            outcome: IssueEventOutcome::Processed,
            reply: Some(report.summary()),
            reply_posted: false,
            detail: serde_json::to_value(&report).unwrap_or(Value::Null),
            command,
        },
        Err(triage_error) => {
            let (status, outcome) = command_status_for_error(&triage_error);
            info!(
                issue = issue_number,
                actor = %actor,
                command = %command,
                reason_code = triage_error.reason_code(),
                error = %triage_error,
                "triage command not applied"
            );
            HandledEvent {
                reply: Some(format!(
                    "`{command}` was not applied: {triage_error}"
                )),
                reason_code: triage_error.reason_code().to_string(),
                status,
                outcome,
                reply_posted: false,
                detail: json!({ "error": triage_error.to_string() }),
                command,
            }
        }
    }
}

async fn handle_platform_event(
    engine: &TriageEngine,
    event: &PlatformEvent,
    context: &EventContext,
) -> HandledEvent {
    let command = event.kind.as_str().to_string();
    match engine
        .handle_platform_event(event, context.repo_active, &context.bot_login)
        .await
    {
        Ok(PlatformEventReport::Transitioned(report)) => HandledEvent {
            reason_code: issue_command_reason_code(&command, IssueCommandStatus::Completed),
            status: IssueCommandStatus::Completed,
            outcome: IssueEventOutcome::Processed,
            reply: Some(format!(
                "Treated @{}'s `{}` as `{}`.\n\n{}",
                event.actor,
                command,
                report.command,
                report.summary()
            )),
            reply_posted: false,
            detail: serde_json::to_value(&report).unwrap_or(Value::Null),
            command,
        },
        Ok(PlatformEventReport::Compensated {
            effects, notice, ..
        }) => HandledEvent {
            reason_code: issue_command_reason_code(&command, IssueCommandStatus::Reverted),
            status: IssueCommandStatus::Reverted,
            outcome: IssueEventOutcome::Processed,
            reply: Some(notice),
            reply_posted: false,
            detail: json!({ "effects": effects }),
            command,
        },
        Ok(PlatformEventReport::Ignored { reason, .. }) => HandledEvent {
            reason_code: "platform_event_ignored".to_string(),
            status: IssueCommandStatus::Completed,
            outcome: IssueEventOutcome::Processed,
            reply: None,
            reply_posted: false,
            detail: json!({ "reason": reason }),
            command,
        },
        Err(triage_error) => {
            let (status, outcome) = command_status_for_error(&triage_error);
            let reply = if triage_error.notifies_actor() {
                Some(format!(
                    "Could not reconcile @{}'s `{command}`: {triage_error}",
                    event.actor
                ))
            } else {
                debug!(
                    event_key = %event.key,
                    error = %triage_error,
                    "ambiguous platform event dropped"
                );
                None
            };
            HandledEvent {
                reason_code: triage_error.reason_code().to_string(),
                status,
                outcome,
                reply,
                reply_posted: false,
                detail: json!({ "error": triage_error.to_string() }),
                command,
            }
        }
    }
}
