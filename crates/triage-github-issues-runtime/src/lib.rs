//! Runtime crate for the audit-finding triage bot.
//!
//! Executes transition plans from `triage-github-issues` against a remote
//! issue tracker and metadata store, and drives the GitHub polling bridge.

mod triage_runtime;

pub use triage_runtime::{
    run_triage_bridge, CommandReport, CrossRepoMirror, DecisionLedger, DecisionLedgerEntry,
    FileMetadataStore, GithubTracker, InMemoryIssueTracker, InMemoryMetadataStore, IssueTracker,
    KeyedLocks, MetadataStore, MirrorOutcome, PlatformEventReport, RepoRef,
    TriageBridgeRuntimeConfig, TriageEngine, TriageEngineConfig,
};
