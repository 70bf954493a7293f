//! Executes transition plans.
//!
//! Every transition runs under the issue lock and then the actor lock, reads
//! the issue and the actor's assignments fresh from the tracker, plans, and
//! applies effects in order under a per-effect timeout. The first failing
//! effect aborts the transition. Queue refill runs last, once every effect
//! has committed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use triage_github_issues::assignment_queue::{plan_refill, PlannedAssignment};
use triage_github_issues::issue_labels::has_decision_label;
use triage_github_issues::issue_state::{IssueRef, IssueSnapshot, Pool, RepoRole};
use triage_github_issues::issue_transition::{
    plan_transition, ActorHoldings, IssueEffect, LedgerChange, RefillRequest, TransitionContext,
    TransitionPlan, TransitionRequest,
};
use triage_github_issues::passive_event::{
    normalize_platform_event, NormalizationContext, NormalizedEvent, PlatformEvent,
};
use triage_github_issues::{TriageError, TriageResult};

use super::cross_repo_mirror::{CrossRepoMirror, MirrorOutcome};
use super::decision_ledger::DecisionLedger;
use super::issue_tracker::IssueTracker;
use super::keyed_locks::KeyedLocks;
use super::metadata_store::MetadataStore;

/// Runs `future` under `timeout`, folding failures into `RemoteEffectFailed`.
pub(crate) async fn bounded_remote_call<T, F>(
    timeout: Duration,
    operation: &str,
    future: F,
) -> TriageResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TriageError::remote(operation, format!("{error:#}"))),
        Err(_) => Err(TriageError::remote(
            operation,
            format!("timed out after {} ms", timeout.as_millis()),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct TriageEngineConfig {
    pub effect_timeout: Duration,
}

impl Default for TriageEngineConfig {
    fn default() -> Self {
        Self {
            effect_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Committed transition, as reported back to the actor.
pub struct CommandReport {
    pub issue_number: u64,
    pub actor: String,
    pub command: String,
    pub from_state: String,
    pub to_state: String,
    pub effects: Vec<String>,
    pub mirror: Option<MirrorOutcome>,
    pub retracted_findings_issue: Option<u64>,
    pub refill_attempted: bool,
    pub assignments: Vec<PlannedAssignment>,
    pub refill_error: Option<String>,
    pub ledger_error: Option<String>,
}

impl CommandReport {
    fn new(issue: &IssueSnapshot, actor: &str, plan: &TransitionPlan) -> Self {
        Self {
            issue_number: issue.issue.number,
            actor: actor.to_string(),
            command: plan.request.name().to_string(),
            from_state: plan.from.name().to_string(),
            to_state: plan.to.name().to_string(),
            effects: Vec::new(),
            mirror: None,
            retracted_findings_issue: None,
            refill_attempted: false,
            assignments: Vec::new(),
            refill_error: None,
            ledger_error: None,
        }
    }

    /// Markdown summary posted as the command acknowledgement.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "`{}` applied to #{} by @{}: `{}` -> `{}`.",
            self.command, self.issue_number, self.actor, self.from_state, self.to_state
        )];
        if let Some(mirror) = &self.mirror {
            let verb = if mirror.reused {
                "Already mirrored to"
            } else {
                "Mirrored to"
            };
            lines.push(format!("{verb} [{}]({}).", mirror.findings_id, mirror.findings_url));
        }
        if let Some(number) = self.retracted_findings_issue {
            lines.push(format!("Closed and unlinked findings issue #{number}."));
        }
        if !self.assignments.is_empty() {
            let granted = self
                .assignments
                .iter()
                .map(|assignment| {
                    let mut entry = format!("#{}", assignment.number);
                    if assignment.pool == Pool::Unknown {
                        entry.push_str(" (`unknown`)");
                    }
                    if assignment.bonus {
                        entry.push_str(" (bonus)");
                    }
                    entry
                })
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Newly assigned to @{}: {granted}.", self.actor));
        } else if self.refill_attempted && self.refill_error.is_none() {
            lines.push("No eligible issues were available to assign.".to_string());
        }
        if let Some(error) = &self.refill_error {
            lines.push(format!("Queue refill failed: {error}"));
        }
        if let Some(error) = &self.ledger_error {
            lines.push(format!("Decision ledger update failed: {error}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlatformEventReport {
    Transitioned(CommandReport),
    Compensated {
        issue_number: u64,
        effects: Vec<String>,
        notice: String,
    },
    Ignored {
        issue_number: u64,
        reason: String,
    },
}

impl PlatformEventReport {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Transitioned(_) => "transitioned",
            Self::Compensated { .. } => "compensated",
            Self::Ignored { .. } => "ignored",
        }
    }
}

enum AppliedEffect {
    Plain,
    Mirrored(MirrorOutcome),
    Retracted(Option<u64>),
}

pub struct TriageEngine {
    tracker: Arc<dyn IssueTracker>,
    ledger: Arc<DecisionLedger>,
    locks: KeyedLocks,
    mirror: CrossRepoMirror,
    effect_timeout: Duration,
}

impl TriageEngine {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        metadata: Arc<dyn MetadataStore>,
        ledger: Arc<DecisionLedger>,
        config: TriageEngineConfig,
    ) -> Self {
        let effect_timeout = config.effect_timeout.max(Duration::from_millis(1));
        Self {
            mirror: CrossRepoMirror::new(Arc::clone(&tracker), metadata, effect_timeout),
            tracker,
            ledger,
            locks: KeyedLocks::new(),
            effect_timeout,
        }
    }

    pub fn tracker(&self) -> &Arc<dyn IssueTracker> {
        &self.tracker
    }

    pub fn ledger(&self) -> &DecisionLedger {
        &self.ledger
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Runs a comment command issued by `actor` on validation issue `issue_number`.
    pub async fn handle_command(
        &self,
        issue_number: u64,
        actor: &str,
        request: TransitionRequest,
    ) -> TriageResult<CommandReport> {
        let _issue_guard = self.locks.lock(&KeyedLocks::issue_key(issue_number)).await;
        let _actor_guard = self.locks.lock(&KeyedLocks::actor_key(actor)).await;

        let issue = self.fetch(IssueRef::validation(issue_number)).await?;
        let open_issues = self.list_open_validation_issues().await?;
        let holdings = ActorHoldings::from_issues(actor, &open_issues);
        self.execute_transition(&issue, actor, request, &holdings)
            .await
    }

    /// Normalizes and runs a passive platform event on a validation issue.
    pub async fn handle_platform_event(
        &self,
        event: &PlatformEvent,
        repo_active: bool,
        bot_login: &str,
    ) -> TriageResult<PlatformEventReport> {
        let _issue_guard = self
            .locks
            .lock(&KeyedLocks::issue_key(event.issue_number))
            .await;
        let subject = event.subject_login().to_string();
        let _actor_guard = self.locks.lock(&KeyedLocks::actor_key(&subject)).await;

        let current = self.fetch(IssueRef::validation(event.issue_number)).await?;
        let open_issues = self.list_open_validation_issues().await?;
        let holdings = ActorHoldings::from_issues(&subject, &open_issues);
        let normalized = normalize_platform_event(
            event,
            &current,
            &NormalizationContext {
                repo_active,
                bot_login,
                holdings: &holdings,
            },
        )?;

        match normalized {
            NormalizedEvent::Transition {
                actor,
                request,
                replay_from,
            } => {
                info!(
                    event_key = %event.key,
                    issue = event.issue_number,
                    actor = %actor,
                    command = request.name(),
                    "platform event normalized to transition"
                );
                let report = self
                    .execute_transition(&replay_from, &actor, request, &holdings)
                    .await?;
                Ok(PlatformEventReport::Transitioned(report))
            }
            NormalizedEvent::Compensate { effects, notice } => {
                let mut applied = Vec::new();
                for effect in &effects {
                    self.apply_effect(&current, effect).await?;
                    applied.push(effect.describe());
                }
                info!(
                    event_key = %event.key,
                    issue = event.issue_number,
                    effects = ?applied,
                    "platform event reversed"
                );
                Ok(PlatformEventReport::Compensated {
                    issue_number: event.issue_number,
                    effects: applied,
                    notice,
                })
            }
            NormalizedEvent::Ignored { reason } => {
                debug!(event_key = %event.key, reason = %reason, "platform event ignored");
                Ok(PlatformEventReport::Ignored {
                    issue_number: event.issue_number,
                    reason,
                })
            }
        }
    }

    async fn execute_transition(
        &self,
        issue: &IssueSnapshot,
        actor: &str,
        request: TransitionRequest,
        holdings: &ActorHoldings,
    ) -> TriageResult<CommandReport> {
        let prior_pool = match &request {
            TransitionRequest::Undo { decision } => {
                self.ledger.prior_pool(issue.issue.number, *decision)
            }
            _ => None,
        };
        let plan = plan_transition(
            issue,
            &request,
            &TransitionContext {
                actor,
                holdings,
                prior_pool,
            },
        )?;

        let mut report = CommandReport::new(issue, actor, &plan);
        // The prior pool must be durable before the decision becomes visible.
        if let Some(LedgerChange::Record {
            decision,
            prior_pool,
        }) = plan.ledger.as_ref()
        {
            self.ledger
                .record(issue.issue.number, *decision, *prior_pool, actor)
                .await
                .map_err(|error| {
                    TriageError::remote("record decision ledger", format!("{error:#}"))
                })?;
        }
        for effect in &plan.effects {
            match self.apply_effect(issue, effect).await {
                Ok(AppliedEffect::Plain) => {}
                Ok(AppliedEffect::Mirrored(outcome)) => report.mirror = Some(outcome),
                Ok(AppliedEffect::Retracted(number)) => report.retracted_findings_issue = number,
                Err(error) => {
                    warn!(
                        issue = issue.issue.number,
                        actor = %actor,
                        command = plan.request.name(),
                        applied = ?report.effects,
                        reason_code = error.reason_code(),
                        error = %error,
                        "transition aborted"
                    );
                    if matches!(plan.ledger, Some(LedgerChange::Record { .. })) {
                        if let Err(ledger_error) = self.ledger.clear(issue.issue.number).await {
                            warn!(
                                issue = issue.issue.number,
                                error = %format!("{ledger_error:#}"),
                                "failed to drop decision ledger entry of aborted transition"
                            );
                        }
                    }
                    return Err(error);
                }
            }
            report.effects.push(effect.describe());
        }
        info!(
            issue = issue.issue.number,
            actor = %actor,
            command = plan.request.name(),
            from = plan.from.name(),
            to = plan.to.name(),
            "transition committed"
        );

        if let Some(LedgerChange::Clear { .. }) = plan.ledger.as_ref() {
            if let Err(error) = self.ledger.clear(issue.issue.number).await {
                warn!(
                    issue = issue.issue.number,
                    error = %format!("{error:#}"),
                    "failed to clear decision ledger entry"
                );
                report.ledger_error = Some(format!("{error:#}"));
            }
        }
        if let Some(refill) = plan.refill.as_ref() {
            report.refill_attempted = true;
            self.refill(refill, &mut report).await;
        }
        Ok(report)
    }

    async fn apply_effect(
        &self,
        issue: &IssueSnapshot,
        effect: &IssueEffect,
    ) -> TriageResult<AppliedEffect> {
        let operation = effect.describe();
        let target = issue.issue;
        let timeout = self.effect_timeout;
        match effect {
            IssueEffect::AddLabel(label) => {
                bounded_remote_call(timeout, &operation, self.tracker.add_label(target, label))
                    .await?
            }
            IssueEffect::RemoveLabel(label) => {
                bounded_remote_call(timeout, &operation, self.tracker.remove_label(target, label))
                    .await?
            }
            IssueEffect::Assign(login) => {
                bounded_remote_call(timeout, &operation, self.tracker.assign(target, login))
                    .await?
            }
            IssueEffect::Unassign(login) => {
                bounded_remote_call(timeout, &operation, self.tracker.unassign(target, login))
                    .await?
            }
            IssueEffect::ReplaceBody(body) => {
                bounded_remote_call(timeout, &operation, self.tracker.replace_body(target, body))
                    .await?
            }
            IssueEffect::Comment(body) => {
                bounded_remote_call(timeout, &operation, self.tracker.post_comment(target, body))
                    .await?
            }
            IssueEffect::Close => {
                bounded_remote_call(timeout, &operation, self.tracker.set_open(target, false))
                    .await?
            }
            IssueEffect::Reopen => {
                bounded_remote_call(timeout, &operation, self.tracker.set_open(target, true))
                    .await?
            }
            IssueEffect::MirrorAccept { comment } => {
                let outcome = self.mirror.accept(issue, comment.as_deref()).await?;
                return Ok(AppliedEffect::Mirrored(outcome));
            }
            IssueEffect::MirrorRevert => {
                let retracted = self.mirror.revert(target.number).await?;
                return Ok(AppliedEffect::Retracted(retracted));
            }
        }
        Ok(AppliedEffect::Plain)
    }

    /// Assigns queue candidates to the refill actor. Candidates whose issue
    /// lock is held elsewhere, or that stopped being eligible since the
    /// listing, are skipped.
    async fn refill(&self, request: &RefillRequest, report: &mut CommandReport) {
        let open_issues = match self.list_open_validation_issues().await {
            Ok(issues) => issues,
            Err(error) => {
                report.refill_error = Some(error.to_string());
                return;
            }
        };
        let holdings = ActorHoldings::from_issues(&request.actor, &open_issues);
        let planned = plan_refill(request, &holdings, &open_issues);

        for candidate in planned {
            let Some(_candidate_guard) = self
                .locks
                .try_lock(&KeyedLocks::issue_key(candidate.number))
            else {
                debug!(issue = candidate.number, "refill candidate busy; skipping");
                continue;
            };
            let target = IssueRef::validation(candidate.number);
            let fresh = match self.fetch(target).await {
                Ok(issue) => issue,
                Err(error) => {
                    report.refill_error = Some(error.to_string());
                    return;
                }
            };
            let still_eligible = fresh.open
                && fresh.assignees.is_empty()
                && !has_decision_label(&fresh.labels)
                && fresh.pool() == candidate.pool;
            if !still_eligible {
                debug!(issue = candidate.number, "refill candidate no longer eligible");
                continue;
            }
            let operation = format!("assign #{} to @{}", candidate.number, request.actor);
            if let Err(error) = bounded_remote_call(
                self.effect_timeout,
                &operation,
                self.tracker.assign(target, &request.actor),
            )
            .await
            {
                report.refill_error = Some(error.to_string());
                return;
            }
            info!(
                issue = candidate.number,
                actor = %request.actor,
                pool = candidate.pool.as_str(),
                bonus = candidate.bonus,
                "queue assignment granted"
            );
            report.assignments.push(candidate);
        }
    }

    async fn fetch(&self, issue: IssueRef) -> TriageResult<IssueSnapshot> {
        bounded_remote_call(
            self.effect_timeout,
            &format!("fetch {issue}"),
            self.tracker.fetch_issue(issue),
        )
        .await
    }

    async fn list_open_validation_issues(&self) -> TriageResult<Vec<IssueSnapshot>> {
        bounded_remote_call(
            self.effect_timeout,
            "list open validation issues",
            self.tracker.list_open_issues(RepoRole::Validation),
        )
        .await
    }
}
