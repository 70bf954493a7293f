use std::sync::Arc;

use tempfile::tempdir;
use triage_github_issues::issue_labels::{INSUFFICIENT_QUALITY_LABEL, UNKNOWN_LABEL};
use triage_github_issues::issue_state::{Decision, IssueRef, Pool};
use triage_github_issues::issue_transition::TransitionRequest;
use triage_github_issues::passive_event::{PlatformEvent, PlatformEventKind};
use triage_github_issues::TriageError;
use triage_github_issues_runtime::{
    DecisionLedger, FileMetadataStore, InMemoryIssueTracker, MetadataStore, PlatformEventReport,
    TriageEngine, TriageEngineConfig,
};

fn engine_over(
    tracker: &Arc<InMemoryIssueTracker>,
    metadata: &Arc<FileMetadataStore>,
    ledger: DecisionLedger,
) -> TriageEngine {
    TriageEngine::new(
        tracker.clone(),
        metadata.clone(),
        Arc::new(ledger),
        TriageEngineConfig::default(),
    )
}

#[tokio::test]
async fn integration_review_session_survives_engine_restart() {
    let temp = tempdir().expect("tempdir");
    let ledger_path = temp.path().join("decisions.json");
    let tracker = Arc::new(InMemoryIssueTracker::new("org/validation", "org/findings"));
    let metadata = Arc::new(FileMetadataStore::new(temp.path().join("metadata")));

    tracker.seed_validation_issue(1, &[UNKNOWN_LABEL], None);
    for number in 2..=6 {
        tracker.seed_validation_issue(number, &[], None);
    }
    tracker.seed_validation_issue(10, &[], Some("alice"));

    let engine = engine_over(
        &tracker,
        &metadata,
        DecisionLedger::load(ledger_path.clone()).expect("ledger"),
    );

    let claimed = engine
        .handle_command(1, "alice", TransitionRequest::Claim)
        .await
        .expect("claim");
    assert_eq!(claimed.to_state, "unknown/assigned");
    assert!(!claimed.refill_attempted);

    let rejected = engine
        .handle_command(1, "alice", TransitionRequest::Reject { comment: None })
        .await
        .expect("reject");
    let granted = rejected
        .assignments
        .iter()
        .map(|assignment| (assignment.number, assignment.bonus))
        .collect::<Vec<_>>();
    assert_eq!(granted, vec![(2, true), (3, true), (4, true)]);
    assert!(tracker
        .issue(IssueRef::validation(1))
        .expect("issue 1")
        .has_label(INSUFFICIENT_QUALITY_LABEL));

    drop(engine);
    let restarted = engine_over(
        &tracker,
        &metadata,
        DecisionLedger::load(ledger_path.clone()).expect("reloaded ledger"),
    );
    assert_eq!(
        restarted.ledger().prior_pool(1, Decision::Reject),
        Some(Pool::Unknown)
    );

    let undone = restarted
        .handle_command(
            1,
            "bob",
            TransitionRequest::Undo {
                decision: Decision::Reject,
            },
        )
        .await
        .expect("undo reject");
    assert_eq!(undone.to_state, "unknown/assigned");
    let reopened = tracker.issue(IssueRef::validation(1)).expect("issue 1");
    assert!(reopened.open);
    assert!(reopened.has_label(UNKNOWN_LABEL));
    assert!(!reopened.has_label(INSUFFICIENT_QUALITY_LABEL));
    assert!(restarted.ledger().entry(1).is_none());

    let accepted = restarted
        .handle_command(10, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("accept");
    assert!(accepted.assignments.is_empty());
    assert!(accepted
        .summary()
        .contains("No eligible issues were available to assign."));
    let mirror = accepted.mirror.expect("mirror");
    assert_eq!(mirror.findings_id, "org/findings#1");
    assert!(metadata
        .get("org/validation#10")
        .await
        .expect("read record")
        .is_some());
}

#[tokio::test]
async fn integration_passive_close_and_bad_command_share_one_engine() {
    let temp = tempdir().expect("tempdir");
    let tracker = Arc::new(InMemoryIssueTracker::new("org/validation", "org/findings"));
    let metadata = Arc::new(FileMetadataStore::new(temp.path().join("metadata")));
    let engine = engine_over(&tracker, &metadata, DecisionLedger::in_memory());

    let mut closed = tracker.seed_validation_issue(20, &[], Some("carol"));
    closed.open = false;
    tracker.insert_issue(closed);
    tracker.seed_validation_issue(21, &[], None);

    let report = engine
        .handle_platform_event(
            &PlatformEvent {
                key: "issue-event:2001".to_string(),
                issue_number: 20,
                actor: "carol".to_string(),
                kind: PlatformEventKind::Closed,
                occurred_at: "2026-01-03T00:00:00Z".to_string(),
            },
            true,
            "triage-bot",
        )
        .await
        .expect("close event");
    let PlatformEventReport::Transitioned(report) = report else {
        panic!("expected the close to become a reject");
    };
    assert_eq!(report.command, "reject");
    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].number, 21);

    let error = engine
        .handle_command(21, "dave", TransitionRequest::Skip)
        .await
        .expect_err("not the assignee");
    assert!(matches!(error, TriageError::PreconditionFailed { .. }));
    assert_eq!(error.reason_code(), "precondition_failed");
}
