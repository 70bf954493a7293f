//! Passive event normalization.
//!
//! Close, assign, and unassign actions performed directly on the platform are
//! mapped onto the same transition vocabulary as comment commands. Actions
//! the triage workflow does not allow are reversed with compensating effects.
//! The normalizer reconstructs the snapshot as it was just before the event
//! (`replay_from`) so the regular planner validates preconditions; the plan's
//! effects are idempotent against the platform's already-applied change.

use serde::{Deserialize, Serialize};

use crate::issue_labels::UNKNOWN_LABEL;
use crate::issue_state::{same_login, IssueSnapshot, IssueState, Pool};
use crate::issue_transition::{ActorHoldings, IssueEffect, TransitionRequest};
use crate::triage_error::{TriageError, TriageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformEventKind {
    Closed,
    Assigned { assignee: String },
    Unassigned { assignee: String },
}

impl PlatformEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Assigned { .. } => "assigned",
            Self::Unassigned { .. } => "unassigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub key: String,
    pub issue_number: u64,
    pub actor: String,
    #[serde(flatten)]
    pub kind: PlatformEventKind,
    pub occurred_at: String,
}

impl PlatformEvent {
    /// Login whose assignment state the event is about.
    pub fn subject_login(&self) -> &str {
        match &self.kind {
            PlatformEventKind::Closed => &self.actor,
            PlatformEventKind::Assigned { assignee } | PlatformEventKind::Unassigned { assignee } => {
                assignee
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizationContext<'a> {
    pub repo_active: bool,
    pub bot_login: &'a str,
    /// Holdings of [`PlatformEvent::subject_login`].
    pub holdings: &'a ActorHoldings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    /// Run `request` as `actor`, planning from the pre-event snapshot.
    Transition {
        actor: String,
        request: TransitionRequest,
        replay_from: IssueSnapshot,
    },
    /// Reverse a disallowed platform action.
    Compensate {
        effects: Vec<IssueEffect>,
        notice: String,
    },
    /// Nothing to do; the event is stale or outside the triage scope.
    Ignored { reason: String },
}

/// Maps `event` onto a transition or a compensation given the issue's
/// current snapshot. Events that match no rule yield `AmbiguousEvent`.
pub fn normalize_platform_event(
    event: &PlatformEvent,
    current: &IssueSnapshot,
    context: &NormalizationContext<'_>,
) -> TriageResult<NormalizedEvent> {
    if !context.repo_active {
        return Ok(ignored("repository is not designated active"));
    }
    if same_login(&event.actor, context.bot_login) {
        return Ok(ignored("event was performed by the triage bot"));
    }
    match &event.kind {
        PlatformEventKind::Closed => normalize_close(event, current),
        PlatformEventKind::Unassigned { assignee } => {
            normalize_unassign(event, assignee, current)
        }
        PlatformEventKind::Assigned { assignee } => {
            normalize_assign(event, assignee, current, context)
        }
    }
}

fn normalize_close(event: &PlatformEvent, current: &IssueSnapshot) -> TriageResult<NormalizedEvent> {
    if current.open {
        return Ok(ignored("issue was reopened after the close event"));
    }
    if let Ok(state) = current.state() {
        if state.is_terminal() {
            return Ok(ignored("issue already carries a triage decision"));
        }
    }
    let replay_from = current.clone().with_open(true);
    match replay_from.state()? {
        IssueState::Assigned { assignee, .. } if same_login(&assignee, &event.actor) => {
            Ok(NormalizedEvent::Transition {
                actor: assignee,
                request: TransitionRequest::Reject { comment: None },
                replay_from,
            })
        }
        _ => Err(TriageError::ambiguous(
            &event.key,
            format!("@{} closed an issue they are not assigned to", event.actor),
        )),
    }
}

fn normalize_unassign(
    event: &PlatformEvent,
    previous_assignee: &str,
    current: &IssueSnapshot,
) -> TriageResult<NormalizedEvent> {
    if !current.open {
        return Err(TriageError::ambiguous(
            &event.key,
            "unassignment on a closed issue",
        ));
    }
    if current.is_assigned_to(previous_assignee) {
        return Ok(ignored("assignee was restored after the unassign event"));
    }

    if !same_login(&event.actor, previous_assignee) {
        return Ok(NormalizedEvent::Compensate {
            effects: vec![IssueEffect::Assign(previous_assignee.to_string())],
            notice: format!(
                "@{} removed @{previous_assignee} from this issue; only the assignee can give it up (use `skip`). The assignment was restored.",
                event.actor
            ),
        });
    }

    if !current.assignees.is_empty() {
        return Err(TriageError::ambiguous(
            &event.key,
            "issue was reassigned after the assignee stepped down",
        ));
    }
    let replay_from = current
        .clone()
        .with_assignees(vec![previous_assignee.to_string()]);
    Ok(NormalizedEvent::Transition {
        actor: previous_assignee.to_string(),
        request: TransitionRequest::Skip,
        replay_from,
    })
}

fn normalize_assign(
    event: &PlatformEvent,
    assignee: &str,
    current: &IssueSnapshot,
    context: &NormalizationContext<'_>,
) -> TriageResult<NormalizedEvent> {
    if !same_login(&event.actor, assignee) {
        return Err(TriageError::ambiguous(
            &event.key,
            format!("@{} assigned @{assignee}", event.actor),
        ));
    }
    if !current.is_assigned_to(assignee) {
        return Ok(ignored("assignment was already removed"));
    }

    let replay_from = current.clone().with_assignees(
        current
            .assignees
            .iter()
            .filter(|login| !same_login(login, assignee))
            .cloned()
            .collect(),
    );
    let claimable = matches!(
        replay_from.state(),
        Ok(IssueState::Unassigned {
            pool: Pool::Unknown
        })
    ) && context
        .holdings
        .other_in_pool(Pool::Unknown, current.issue.number)
        .is_none();

    if claimable {
        return Ok(NormalizedEvent::Transition {
            actor: assignee.to_string(),
            request: TransitionRequest::Claim,
            replay_from,
        });
    }
    Ok(NormalizedEvent::Compensate {
        effects: vec![IssueEffect::Unassign(assignee.to_string())],
        notice: format!(
            "@{assignee} self-assigned this issue, but only open, unassigned `{UNKNOWN_LABEL}` issues can be claimed and only one at a time. The assignment was removed."
        ),
    })
}

fn ignored(reason: &str) -> NormalizedEvent {
    NormalizedEvent::Ignored {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_platform_event, NormalizationContext, NormalizedEvent, PlatformEvent,
        PlatformEventKind,
    };
    use crate::issue_labels::{INSUFFICIENT_QUALITY_LABEL, UNKNOWN_LABEL};
    use crate::issue_state::test_support::snapshot;
    use crate::issue_state::IssueSnapshot;
    use crate::issue_transition::{ActorHoldings, IssueEffect, TransitionRequest};
    use crate::triage_error::TriageError;

    fn event(actor: &str, kind: PlatformEventKind) -> PlatformEvent {
        PlatformEvent {
            key: "issue-event:1".to_string(),
            issue_number: 42,
            actor: actor.to_string(),
            kind,
            occurred_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn normalize(
        event: &PlatformEvent,
        current: &IssueSnapshot,
        holdings: &ActorHoldings,
    ) -> Result<NormalizedEvent, TriageError> {
        normalize_platform_event(
            event,
            current,
            &NormalizationContext {
                repo_active: true,
                bot_login: "triage-bot",
                holdings,
            },
        )
    }

    #[test]
    fn unit_inactive_repository_ignores_every_event() {
        let current = snapshot(42, false, &[], Some("alice"));
        let normalized = normalize_platform_event(
            &event("alice", PlatformEventKind::Closed),
            &current,
            &NormalizationContext {
                repo_active: false,
                bot_login: "triage-bot",
                holdings: &ActorHoldings::default(),
            },
        )
        .expect("normalized");
        assert!(matches!(normalized, NormalizedEvent::Ignored { .. }));
    }

    #[test]
    fn functional_close_by_assignee_becomes_reject_without_comment() {
        let current = snapshot(42, false, &[UNKNOWN_LABEL], Some("alice"));
        let normalized = normalize(
            &event("alice", PlatformEventKind::Closed),
            &current,
            &ActorHoldings::default(),
        )
        .expect("normalized");
        match normalized {
            NormalizedEvent::Transition {
                actor,
                request,
                replay_from,
            } => {
                assert_eq!(actor, "alice");
                assert_eq!(request, TransitionRequest::Reject { comment: None });
                assert!(replay_from.open);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn regression_close_by_non_assignee_is_ambiguous() {
        let current = snapshot(42, false, &[], Some("alice"));
        let error = normalize(
            &event("mallory", PlatformEventKind::Closed),
            &current,
            &ActorHoldings::default(),
        )
        .expect_err("ambiguous");
        assert_eq!(error.reason_code(), "ambiguous_event");

        let decided = snapshot(42, false, &[INSUFFICIENT_QUALITY_LABEL], Some("alice"));
        assert!(matches!(
            normalize(
                &event("alice", PlatformEventKind::Closed),
                &decided,
                &ActorHoldings::default()
            ),
            Ok(NormalizedEvent::Ignored { .. })
        ));
    }

    #[test]
    fn functional_self_unassign_becomes_skip() {
        let current = snapshot(42, true, &[], None);
        let normalized = normalize(
            &event(
                "alice",
                PlatformEventKind::Unassigned {
                    assignee: "alice".to_string(),
                },
            ),
            &current,
            &ActorHoldings::default(),
        )
        .expect("normalized");
        match normalized {
            NormalizedEvent::Transition {
                request,
                replay_from,
                ..
            } => {
                assert_eq!(request, TransitionRequest::Skip);
                assert_eq!(replay_from.assignee(), Some("alice"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integration_unassign_by_other_actor_restores_previous_assignee() {
        let current = snapshot(42, true, &[], None);
        let normalized = normalize(
            &event(
                "mallory",
                PlatformEventKind::Unassigned {
                    assignee: "alice".to_string(),
                },
            ),
            &current,
            &ActorHoldings::default(),
        )
        .expect("normalized");
        match normalized {
            NormalizedEvent::Compensate { effects, notice } => {
                assert_eq!(effects, vec![IssueEffect::Assign("alice".to_string())]);
                assert!(notice.contains("@mallory removed @alice"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn functional_self_assign_of_unknown_issue_becomes_claim() {
        let current = snapshot(42, true, &[UNKNOWN_LABEL], Some("alice"));
        let holdings = ActorHoldings {
            standard: vec![3],
            unknown: vec![42],
        };
        let normalized = normalize(
            &event(
                "alice",
                PlatformEventKind::Assigned {
                    assignee: "alice".to_string(),
                },
            ),
            &current,
            &holdings,
        )
        .expect("normalized");
        match normalized {
            NormalizedEvent::Transition {
                request,
                replay_from,
                ..
            } => {
                assert_eq!(request, TransitionRequest::Claim);
                assert!(replay_from.assignees.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn regression_self_assign_without_unknown_history_is_reversed() {
        let current = snapshot(42, true, &[], Some("alice"));
        let normalized = normalize(
            &event(
                "alice",
                PlatformEventKind::Assigned {
                    assignee: "alice".to_string(),
                },
            ),
            &current,
            &ActorHoldings::default(),
        )
        .expect("normalized");
        assert!(matches!(
            normalized,
            NormalizedEvent::Compensate { ref effects, .. }
                if effects == &vec![IssueEffect::Unassign("alice".to_string())]
        ));
    }

    #[test]
    fn regression_self_assign_while_holding_unknown_issue_is_reversed() {
        let current = snapshot(42, true, &[UNKNOWN_LABEL], Some("alice"));
        let holdings = ActorHoldings {
            standard: Vec::new(),
            unknown: vec![7, 42],
        };
        let normalized = normalize(
            &event(
                "alice",
                PlatformEventKind::Assigned {
                    assignee: "alice".to_string(),
                },
            ),
            &current,
            &holdings,
        )
        .expect("normalized");
        assert!(matches!(normalized, NormalizedEvent::Compensate { .. }));
    }

    #[test]
    fn regression_assignment_of_someone_else_is_ambiguous() {
        let current = snapshot(42, true, &[UNKNOWN_LABEL], Some("bob"));
        let error = normalize(
            &event(
                "alice",
                PlatformEventKind::Assigned {
                    assignee: "bob".to_string(),
                },
            ),
            &current,
            &ActorHoldings::default(),
        )
        .expect_err("ambiguous");
        assert!(matches!(error, TriageError::AmbiguousEvent { .. }));
    }

    #[test]
    fn unit_subject_login_follows_event_kind() {
        let close = event("alice", PlatformEventKind::Closed);
        assert_eq!(close.subject_login(), "alice");
        let unassign = event(
            "mallory",
            PlatformEventKind::Unassigned {
                assignee: "bob".to_string(),
            },
        );
        assert_eq!(unassign.subject_login(), "bob");
    }
}
