//! Shared domain logic for the audit-finding triage bot.
//!
//! This crate holds everything that can be decided without talking to
//! GitHub: the explicit issue state projected from labels, the comment
//! command grammar, the transition planner, the assignment-queue selection
//! policy, passive platform-event normalization, and the metadata record
//! shapes used to link mirrored issues. Runtime crates execute the plans.

pub mod assignment_queue;
pub mod github_transport_helpers;
pub mod issue_command_envelope;
pub mod issue_command_parser;
pub mod issue_comment;
pub mod issue_event_collection;
pub mod issue_labels;
pub mod issue_runtime_helpers;
pub mod issue_state;
pub mod issue_transition;
pub mod mirror_record;
pub mod passive_event;
pub mod triage_error;

pub use triage_error::{TriageError, TriageResult};
