//! Issue state machine: maps `(state, request)` onto the ordered effects that
//! move an issue to its next state.
//!
//! Planning is pure. Effects are ordered so that cross-repository artifacts are
//! created before the source issue changes visibly, and the destructive step
//! (close / reopen) comes last. Completion requests carry a refill request that
//! the runtime executes only after every effect has committed.

use serde::{Deserialize, Serialize};

use crate::issue_labels::{IMPROVED_LABEL, UNKNOWN_LABEL};
use crate::issue_state::{
    same_login, Decision, IssueSnapshot, IssueState, Pool, RepoRole,
};
use crate::triage_error::{TriageError, TriageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Transition vocabulary shared by comment commands and normalized platform events.
pub enum TransitionRequest {
    Claim,
    Accept { comment: Option<String> },
    Reject { comment: Option<String> },
    Skip,
    Undo { decision: Decision },
    Edit { body: String },
}

impl TransitionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::Skip => "skip",
            Self::Undo {
                decision: Decision::Accept,
            } => "undo-accept",
            Self::Undo {
                decision: Decision::Reject,
            } => "undo-reject",
            Self::Edit { .. } => "edit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One remote side effect on the issue being transitioned.
pub enum IssueEffect {
    AddLabel(&'static str),
    RemoveLabel(&'static str),
    Assign(String),
    Unassign(String),
    ReplaceBody(String),
    Comment(String),
    Close,
    Reopen,
    /// Create (or reuse) the findings issue and write both metadata links.
    MirrorAccept { comment: Option<String> },
    /// Close the findings issue and retract both metadata links.
    MirrorRevert,
}

impl IssueEffect {
    /// Short operation label used in logs and failure messages.
    pub fn describe(&self) -> String {
        match self {
            Self::AddLabel(label) => format!("add label `{label}`"),
            Self::RemoveLabel(label) => format!("remove label `{label}`"),
            Self::Assign(login) => format!("assign @{login}"),
            Self::Unassign(login) => format!("unassign @{login}"),
            Self::ReplaceBody(_) => "replace issue body".to_string(),
            Self::Comment(_) => "post comment".to_string(),
            Self::Close => "close issue".to_string(),
            Self::Reopen => "reopen issue".to_string(),
            Self::MirrorAccept { .. } => "mirror into findings repository".to_string(),
            Self::MirrorRevert => "retract findings mirror".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Open validation issues currently assigned to one actor, split by pool.
pub struct ActorHoldings {
    pub standard: Vec<u64>,
    pub unknown: Vec<u64>,
}

impl ActorHoldings {
    pub fn from_issues<'a>(
        actor: &str,
        issues: impl IntoIterator<Item = &'a IssueSnapshot>,
    ) -> Self {
        let mut holdings = Self::default();
        for issue in issues {
            if issue.issue.repo != RepoRole::Validation || !issue.open {
                continue;
            }
            if !issue.is_assigned_to(actor) {
                continue;
            }
            match issue.state() {
                Ok(IssueState::Assigned { pool, .. }) | Ok(IssueState::Unassigned { pool }) => {
                    match pool {
                        Pool::Standard => holdings.standard.push(issue.issue.number),
                        Pool::Unknown => holdings.unknown.push(issue.issue.number),
                    }
                }
                _ => {}
            }
        }
        holdings.standard.sort_unstable();
        holdings.unknown.sort_unstable();
        holdings
    }

    /// First issue of `pool` held by the actor other than `issue_number`.
    pub fn other_in_pool(&self, pool: Pool, issue_number: u64) -> Option<u64> {
        let numbers = match pool {
            Pool::Standard => &self.standard,
            Pool::Unknown => &self.unknown,
        };
        numbers
            .iter()
            .copied()
            .find(|number| *number != issue_number)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub actor: &'a str,
    pub holdings: &'a ActorHoldings,
    /// Pool recorded when the decision being undone was made.
    pub prior_pool: Option<Pool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Queue refill owed to the actor once a completion commits.
pub struct RefillRequest {
    pub actor: String,
    pub completed_issue: u64,
    pub completed_pool: Pool,
    pub terminal: bool,
}

impl RefillRequest {
    pub fn bonus_eligible(&self) -> bool {
        self.terminal && self.completed_pool == Pool::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decision-ledger update that makes `undo` a strict inverse.
pub enum LedgerChange {
    Record { decision: Decision, prior_pool: Pool },
    Clear { decision: Decision },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub request: TransitionRequest,
    pub from: IssueState,
    pub to: IssueState,
    pub effects: Vec<IssueEffect>,
    pub refill: Option<RefillRequest>,
    pub ledger: Option<LedgerChange>,
}

/// Validates preconditions and computes the ordered effects of a transition.
pub fn plan_transition(
    issue: &IssueSnapshot,
    request: &TransitionRequest,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    if issue.issue.repo != RepoRole::Validation {
        return Err(TriageError::precondition(
            "triage commands only apply to issues in the validation repository",
        ));
    }
    let from = issue.state()?;
    match request {
        TransitionRequest::Claim => plan_claim(issue, from, context),
        TransitionRequest::Accept { comment } => {
            plan_decision(issue, from, Decision::Accept, comment.clone(), context)
        }
        TransitionRequest::Reject { comment } => {
            plan_decision(issue, from, Decision::Reject, comment.clone(), context)
        }
        TransitionRequest::Skip => plan_skip(issue, from, context),
        TransitionRequest::Undo { decision } => plan_undo(from, *decision, context),
        TransitionRequest::Edit { body } => plan_edit(issue, from, body, context),
    }
}

fn plan_claim(
    issue: &IssueSnapshot,
    from: IssueState,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    match &from {
        IssueState::Unassigned {
            pool: Pool::Unknown,
        } => {}
        IssueState::Unassigned {
            pool: Pool::Standard,
        } => {
            return Err(TriageError::precondition(format!(
                "only issues labeled `{UNKNOWN_LABEL}` can be claimed"
            )))
        }
        IssueState::Assigned { assignee, .. } => {
            return Err(TriageError::precondition(format!(
                "issue #{} is already assigned to @{assignee}",
                issue.issue.number
            )))
        }
        IssueState::Accepted { .. } | IssueState::Rejected { .. } => {
            return Err(TriageError::precondition(format!(
                "issue #{} is closed",
                issue.issue.number
            )))
        }
    }
    if let Some(other) = context
        .holdings
        .other_in_pool(Pool::Unknown, issue.issue.number)
    {
        return Err(TriageError::precondition(format!(
            "@{} already holds `{UNKNOWN_LABEL}` issue #{other}",
            context.actor
        )));
    }

    Ok(TransitionPlan {
        request: TransitionRequest::Claim,
        from,
        to: IssueState::Assigned {
            pool: Pool::Unknown,
            assignee: context.actor.to_string(),
        },
        effects: vec![IssueEffect::Assign(context.actor.to_string())],
        refill: None,
        ledger: None,
    })
}

fn plan_decision(
    issue: &IssueSnapshot,
    from: IssueState,
    decision: Decision,
    comment: Option<String>,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    let (pool, assignee) = require_assignee(&from, context.actor, decision.as_str())?;

    let mut effects = Vec::new();
    let request = match decision {
        Decision::Accept => {
            effects.push(IssueEffect::MirrorAccept {
                comment: comment.clone(),
            });
            TransitionRequest::Accept { comment: comment.clone() }
        }
        Decision::Reject => TransitionRequest::Reject { comment: comment.clone() },
    };
    if pool == Pool::Unknown {
        effects.push(IssueEffect::RemoveLabel(UNKNOWN_LABEL));
    }
    effects.push(IssueEffect::AddLabel(decision.label()));
    if decision == Decision::Reject {
        if let Some(comment) = comment {
            effects.push(IssueEffect::Comment(comment));
        }
    }
    effects.push(IssueEffect::Close);

    let to = match decision {
        Decision::Accept => IssueState::Accepted {
            assignee: Some(assignee.clone()),
        },
        Decision::Reject => IssueState::Rejected {
            assignee: Some(assignee.clone()),
        },
    };
    Ok(TransitionPlan {
        request,
        from,
        to,
        effects,
        refill: Some(RefillRequest {
            actor: assignee,
            completed_issue: issue.issue.number,
            completed_pool: pool,
            terminal: true,
        }),
        ledger: Some(LedgerChange::Record {
            decision,
            prior_pool: pool,
        }),
    })
}

fn plan_skip(
    issue: &IssueSnapshot,
    from: IssueState,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    let (pool, assignee) = require_assignee(&from, context.actor, "skip")?;
    let mut effects = Vec::new();
    if pool == Pool::Standard {
        effects.push(IssueEffect::AddLabel(UNKNOWN_LABEL));
    }
    effects.push(IssueEffect::Unassign(assignee.clone()));
    Ok(TransitionPlan {
        request: TransitionRequest::Skip,
        from,
        to: IssueState::Unassigned {
            pool: Pool::Unknown,
        },
        effects,
        refill: Some(RefillRequest {
            actor: assignee,
            completed_issue: issue.issue.number,
            completed_pool: pool,
            terminal: false,
        }),
        ledger: None,
    })
}

fn plan_undo(
    from: IssueState,
    decision: Decision,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    let assignee = match (&from, decision) {
        (IssueState::Accepted { assignee }, Decision::Accept)
        | (IssueState::Rejected { assignee }, Decision::Reject) => assignee.clone(),
        _ => {
            return Err(TriageError::precondition(format!(
                "`undo {}` requires a closed issue labeled `{}` (current state: {from})",
                decision.as_str(),
                decision.label()
            )))
        }
    };
    let pool = context.prior_pool.unwrap_or(Pool::Standard);

    let mut effects = Vec::new();
    if decision == Decision::Accept {
        effects.push(IssueEffect::MirrorRevert);
    }
    effects.push(IssueEffect::RemoveLabel(decision.label()));
    if pool == Pool::Unknown {
        effects.push(IssueEffect::AddLabel(UNKNOWN_LABEL));
    }
    effects.push(IssueEffect::Reopen);

    let to = match assignee {
        Some(assignee) => IssueState::Assigned { pool, assignee },
        None => IssueState::Unassigned { pool },
    };
    Ok(TransitionPlan {
        request: TransitionRequest::Undo { decision },
        from,
        to,
        effects,
        refill: None,
        ledger: Some(LedgerChange::Clear { decision }),
    })
}

fn plan_edit(
    issue: &IssueSnapshot,
    from: IssueState,
    body: &str,
    context: &TransitionContext<'_>,
) -> TriageResult<TransitionPlan> {
    require_assignee(&from, context.actor, "edit")?;
    if body.trim().is_empty() {
        return Err(TriageError::precondition("`edit` requires a non-empty body"));
    }
    let mut effects = vec![IssueEffect::ReplaceBody(body.to_string())];
    if !issue.has_label(IMPROVED_LABEL) {
        effects.push(IssueEffect::AddLabel(IMPROVED_LABEL));
    }
    Ok(TransitionPlan {
        request: TransitionRequest::Edit {
            body: body.to_string(),
        },
        to: from.clone(),
        from,
        effects,
        refill: None,
        ledger: None,
    })
}

fn require_assignee(
    from: &IssueState,
    actor: &str,
    command: &str,
) -> TriageResult<(Pool, String)> {
    match from {
        IssueState::Assigned { pool, assignee } if same_login(assignee, actor) => {
            Ok((*pool, assignee.clone()))
        }
        IssueState::Assigned { assignee, .. } => Err(TriageError::precondition(format!(
            "only the assignee @{assignee} can {command} this issue"
        ))),
        IssueState::Unassigned { .. } => Err(TriageError::precondition(format!(
            "`{command}` requires the issue to be assigned to you"
        ))),
        IssueState::Accepted { .. } | IssueState::Rejected { .. } => Err(
            TriageError::precondition(format!("issue is already {from}; `{command}` is not allowed")),
        ),
    }
}
