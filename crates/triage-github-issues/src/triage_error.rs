use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Failure taxonomy shared by the transition planner and the runtime executor.
pub enum TriageError {
    /// The command or event is not allowed in the issue's current state.
    #[error("{reason}")]
    PreconditionFailed { reason: String },

    /// A tracker or metadata-store call failed after bounded retries.
    #[error("{operation} failed: {message}")]
    RemoteEffectFailed { operation: String, message: String },

    /// The mirrored issue exists but its metadata links could not be written.
    #[error(
        "mirror of {source_issue} into {mirrored_issue} is inconsistent and needs manual reconciliation: {message}"
    )]
    InconsistentMirror {
        source_issue: String,
        mirrored_issue: String,
        message: String,
    },

    /// A platform event that maps onto no normalization rule.
    #[error("event {event_key} does not map to a triage transition: {reason}")]
    AmbiguousEvent { event_key: String, reason: String },

    /// The label/open combination does not project onto any triage state.
    #[error("issue {issue} has no recognizable triage state: {reason}")]
    UnrecognizedState { issue: String, reason: String },
}

pub type TriageResult<T> = std::result::Result<T, TriageError>;

impl TriageError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            reason: reason.into(),
        }
    }

    pub fn remote(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::RemoteEffectFailed {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn ambiguous(event_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousEvent {
            event_key: event_key.into(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case code used in comments, logs, and persisted state.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::RemoteEffectFailed { .. } => "remote_effect_failed",
            Self::InconsistentMirror { .. } => "inconsistent_mirror",
            Self::AmbiguousEvent { .. } => "ambiguous_event",
            Self::UnrecognizedState { .. } => "unrecognized_state",
        }
    }

    /// Ambiguous events are dropped quietly; everything else reaches the actor.
    pub fn notifies_actor(&self) -> bool {
        !matches!(self, Self::AmbiguousEvent { .. })
    }
}
