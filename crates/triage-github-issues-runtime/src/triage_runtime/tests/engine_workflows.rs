use super::*;

#[tokio::test]
async fn functional_accept_mirrors_closes_and_refills_one_standard_issue() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.tracker.seed_validation_issue(43, &[], None);
    harness.tracker.seed_validation_issue(44, &[], None);

    let report = harness
        .engine
        .handle_command(
            42,
            "alice",
            TransitionRequest::Accept {
                comment: Some("great finding".to_string()),
            },
        )
        .await
        .expect("accept");

    let accepted = harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42");
    assert!(!accepted.open);
    assert!(accepted.has_label(SUFFICIENT_QUALITY_LABEL));
    assert_eq!(report.from_state, "open/assigned");
    assert_eq!(report.to_state, "accepted");

    let mirror = report.mirror.clone().expect("mirror outcome");
    assert!(!mirror.reused);
    assert_eq!(mirror.findings_id, "org/findings#1");
    let findings = harness
        .tracker
        .issue(IssueRef::findings(1))
        .expect("findings issue");
    assert!(findings.open);
    assert_eq!(findings.title, "Finding 42");
    assert_eq!(findings.body, "Report body for finding 42");
    assert_eq!(
        harness.tracker.comments(IssueRef::findings(1)),
        vec!["great finding".to_string()]
    );

    assert_eq!(
        harness.metadata.record("org/validation#42"),
        Some(validation_link_record(
            "org/findings#1",
            "https://github.test/org/findings/issues/1"
        ))
    );
    assert_eq!(
        harness.metadata.record("org/findings#1"),
        Some(findings_link_record(
            "org/validation#42",
            "https://github.test/org/validation/issues/42"
        ))
    );

    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].number, 43);
    assert_eq!(report.assignments[0].pool, Pool::Standard);
    assert!(!report.assignments[0].bonus);
    assert!(harness
        .tracker
        .issue(IssueRef::validation(43))
        .expect("issue 43")
        .is_assigned_to("alice"));
    assert!(harness
        .tracker
        .issue(IssueRef::validation(44))
        .expect("issue 44")
        .assignees
        .is_empty());
    assert!(report.summary().contains("Newly assigned to @alice: #43."));
}

#[tokio::test]
async fn functional_accept_creates_findings_issue_before_closing_source() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));

    harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("accept");

    let calls = harness.tracker.calls();
    let create = calls
        .iter()
        .position(|call| call == "create_issue findings")
        .expect("create call");
    let label = calls
        .iter()
        .position(|call| call == "add_label validation#42 sufficient quality report")
        .expect("label call");
    let close = calls
        .iter()
        .position(|call| call == "close validation#42")
        .expect("close call");
    assert!(create < label && label < close);
    assert!(harness.tracker.comments(IssueRef::findings(1)).is_empty());
}

#[tokio::test]
async fn functional_unknown_pool_accept_grants_base_and_three_bonus_assignments() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(10, &[UNKNOWN_LABEL], Some("alice"));
    for number in [20, 21, 22, 23] {
        harness.tracker.seed_validation_issue(number, &[], None);
    }
    harness
        .tracker
        .seed_validation_issue(30, &[UNKNOWN_LABEL], None);

    let report = harness
        .engine
        .handle_command(10, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("accept");

    let granted = report
        .assignments
        .iter()
        .map(|assignment| (assignment.number, assignment.bonus))
        .collect::<Vec<_>>();
    assert_eq!(
        granted,
        vec![(20, false), (21, true), (22, true), (23, true)]
    );
    let closed = harness
        .tracker
        .issue(IssueRef::validation(10))
        .expect("issue 10");
    assert!(!closed.has_label(UNKNOWN_LABEL));
    assert!(harness
        .tracker
        .issue(IssueRef::validation(30))
        .expect("issue 30")
        .assignees
        .is_empty());
}

#[tokio::test]
async fn functional_unknown_pool_reject_grants_fewer_when_pool_is_short() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(10, &[UNKNOWN_LABEL], Some("alice"));
    harness.tracker.seed_validation_issue(20, &[], None);
    harness
        .tracker
        .seed_validation_issue(30, &[UNKNOWN_LABEL], None);
    harness
        .tracker
        .seed_validation_issue(31, &[UNKNOWN_LABEL], None);

    let report = harness
        .engine
        .handle_command(10, "alice", TransitionRequest::Reject { comment: None })
        .await
        .expect("reject");

    let granted = report
        .assignments
        .iter()
        .map(|assignment| (assignment.number, assignment.pool))
        .collect::<Vec<_>>();
    assert_eq!(granted, vec![(20, Pool::Standard), (30, Pool::Unknown)]);
    assert!(harness
        .tracker
        .issue(IssueRef::validation(31))
        .expect("issue 31")
        .assignees
        .is_empty());
    assert!(harness
        .tracker
        .issue(IssueRef::validation(10))
        .expect("issue 10")
        .has_label(INSUFFICIENT_QUALITY_LABEL));
}

#[tokio::test]
async fn regression_claim_rejected_while_actor_holds_another_unknown_issue() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(5, &[UNKNOWN_LABEL], None);
    harness
        .tracker
        .seed_validation_issue(6, &[UNKNOWN_LABEL], None);

    harness
        .engine
        .handle_command(5, "alice", TransitionRequest::Claim)
        .await
        .expect("first claim");
    let error = harness
        .engine
        .handle_command(6, "alice", TransitionRequest::Claim)
        .await
        .expect_err("second claim");

    assert!(matches!(error, TriageError::PreconditionFailed { .. }));
    assert!(harness
        .tracker
        .issue(IssueRef::validation(5))
        .expect("issue 5")
        .is_assigned_to("alice"));
    assert!(harness
        .tracker
        .issue(IssueRef::validation(6))
        .expect("issue 6")
        .assignees
        .is_empty());
}

#[tokio::test]
async fn functional_skip_relabels_unknown_and_grants_one_standard_issue() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(7, &[], Some("alice"));
    harness.tracker.seed_validation_issue(8, &[], None);
    harness.tracker.seed_validation_issue(9, &[], None);

    let report = harness
        .engine
        .handle_command(7, "alice", TransitionRequest::Skip)
        .await
        .expect("skip");

    let skipped = harness
        .tracker
        .issue(IssueRef::validation(7))
        .expect("issue 7");
    assert!(skipped.open);
    assert!(skipped.has_label(UNKNOWN_LABEL));
    assert!(skipped.assignees.is_empty());
    assert_eq!(report.to_state, "unknown/unassigned");
    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].number, 8);
    assert!(!report.assignments[0].bonus);
}

#[tokio::test]
async fn integration_undo_accept_retracts_mirror_and_reaccept_creates_fresh_pair() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));

    harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("accept");
    let undo = harness
        .engine
        .handle_command(
            42,
            "bob",
            TransitionRequest::Undo {
                decision: Decision::Accept,
            },
        )
        .await
        .expect("undo");

    assert_eq!(undo.retracted_findings_issue, Some(1));
    let retracted = harness
        .tracker
        .issue(IssueRef::findings(1))
        .expect("findings 1");
    assert!(!retracted.open);
    assert!(harness.tracker.comments(IssueRef::findings(1))[0].starts_with("Retracted:"));
    assert!(harness.metadata.keys().is_empty());
    let reopened = harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42");
    assert!(reopened.open);
    assert!(!reopened.has_label(SUFFICIENT_QUALITY_LABEL));
    assert!(reopened.is_assigned_to("alice"));
    assert!(harness.engine.ledger().entry(42).is_none());

    let again = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("re-accept");
    let mirror = again.mirror.expect("mirror");
    assert_eq!(mirror.findings_id, "org/findings#2");
    assert_eq!(
        harness.metadata.record("org/validation#42"),
        Some(validation_link_record(
            "org/findings#2",
            "https://github.test/org/findings/issues/2"
        ))
    );
    assert_eq!(
        harness.metadata.record("org/findings#2"),
        Some(findings_link_record(
            "org/validation#42",
            "https://github.test/org/validation/issues/42"
        ))
    );
    assert!(harness.metadata.record("org/findings#1").is_none());
}

#[tokio::test]
async fn functional_undo_reject_restores_unknown_pool_from_ledger() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(11, &[UNKNOWN_LABEL], Some("alice"));

    harness
        .engine
        .handle_command(11, "alice", TransitionRequest::Reject { comment: None })
        .await
        .expect("reject");
    assert_eq!(
        harness
            .engine
            .ledger()
            .prior_pool(11, Decision::Reject),
        Some(Pool::Unknown)
    );

    let undo = harness
        .engine
        .handle_command(
            11,
            "alice",
            TransitionRequest::Undo {
                decision: Decision::Reject,
            },
        )
        .await
        .expect("undo");

    let restored = harness
        .tracker
        .issue(IssueRef::validation(11))
        .expect("issue 11");
    assert!(restored.open);
    assert!(restored.has_label(UNKNOWN_LABEL));
    assert!(!restored.has_label(INSUFFICIENT_QUALITY_LABEL));
    assert!(restored.is_assigned_to("alice"));
    assert_eq!(undo.to_state, "unknown/assigned");
    assert!(!undo.refill_attempted);
}

#[tokio::test]
async fn regression_undo_on_open_issue_is_a_precondition_failure() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(12, &[], Some("alice"));

    let error = harness
        .engine
        .handle_command(
            12,
            "alice",
            TransitionRequest::Undo {
                decision: Decision::Accept,
            },
        )
        .await
        .expect_err("undo");
    assert_eq!(error.reason_code(), "precondition_failed");
    assert!(harness.tracker.calls().is_empty());
}

#[tokio::test]
async fn functional_edit_replaces_body_and_marks_improved() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(14, &[], Some("alice"));

    let report = harness
        .engine
        .handle_command(
            14,
            "alice",
            TransitionRequest::Edit {
                body: "## Impact\nfunds at risk".to_string(),
            },
        )
        .await
        .expect("edit");

    let edited = harness
        .tracker
        .issue(IssueRef::validation(14))
        .expect("issue 14");
    assert_eq!(edited.body, "## Impact\nfunds at risk");
    assert!(edited.has_label("improved"));
    assert!(edited.is_assigned_to("alice"));
    assert_eq!(report.from_state, report.to_state);
}

#[tokio::test]
async fn regression_remote_failure_leaves_source_issue_untouched() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.tracker.fail_next("create_issue", 1);

    let error = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect_err("accept");

    assert_eq!(error.reason_code(), "remote_effect_failed");
    let source = harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42");
    assert!(source.open);
    assert!(!source.has_label(SUFFICIENT_QUALITY_LABEL));
    assert!(harness
        .tracker
        .calls()
        .iter()
        .all(|call| !call.starts_with("close")));
    assert!(harness.engine.ledger().entry(42).is_none());
}

#[tokio::test]
async fn regression_metadata_write_failure_reports_inconsistent_mirror() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.metadata.fail_puts_for("org/findings#1", 1);

    let error = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect_err("accept");

    match &error {
        TriageError::InconsistentMirror {
            source_issue,
            mirrored_issue,
            ..
        } => {
            assert_eq!(source_issue, "org/validation#42");
            assert_eq!(mirrored_issue, "org/findings#1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        !harness
            .tracker
            .issue(IssueRef::findings(1))
            .expect("findings issue")
            .open,
        "an unlinked findings issue is closed"
    );
    assert!(harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42")
        .open);
    assert!(harness.metadata.keys().is_empty());

    harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("retried accept");
    let open_findings = harness
        .tracker
        .issues(RepoRole::Findings)
        .into_iter()
        .filter(|issue| issue.open)
        .map(|issue| issue.issue.number)
        .collect::<Vec<_>>();
    assert_eq!(open_findings, vec![2]);
}

#[tokio::test]
async fn regression_accept_retry_completes_half_written_mirror_instead_of_duplicating() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.metadata.fail_puts_for("org/validation#42", 1);

    let error = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect_err("first accept");
    assert_eq!(error.reason_code(), "inconsistent_mirror");
    assert_eq!(harness.metadata.keys(), vec!["org/findings#1".to_string()]);

    let report = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("retried accept");

    let mirror = report.mirror.expect("mirror");
    assert!(mirror.reused);
    assert_eq!(mirror.findings_id, "org/findings#1");
    assert_eq!(harness.tracker.issues(RepoRole::Findings).len(), 1);
    assert_eq!(
        harness.metadata.keys(),
        vec!["org/findings#1".to_string(), "org/validation#42".to_string()]
    );
    let forward = harness
        .metadata
        .record("org/validation#42")
        .expect("validation record");
    assert_eq!(
        forward.get("validatedIssueId").map(String::as_str),
        Some("org/findings#1")
    );
    assert!(!harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42")
        .open);
}

#[tokio::test]
async fn regression_accept_retry_posts_comment_lost_by_failed_first_attempt() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.tracker.fail_next("post_comment", 1);
    let accept = || TransitionRequest::Accept {
        comment: Some("great finding".to_string()),
    };

    let error = harness
        .engine
        .handle_command(42, "alice", accept())
        .await
        .expect_err("first accept");
    assert_eq!(error.reason_code(), "remote_effect_failed");
    assert!(harness.tracker.comments(IssueRef::findings(1)).is_empty());

    let report = harness
        .engine
        .handle_command(42, "alice", accept())
        .await
        .expect("retried accept");

    assert!(report.mirror.expect("mirror").reused);
    assert_eq!(
        harness.tracker.comments(IssueRef::findings(1)),
        vec!["great finding".to_string()]
    );
    assert_eq!(harness.tracker.issues(RepoRole::Findings).len(), 1);
}

#[tokio::test]
async fn regression_accept_restores_missing_findings_back_record() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    let findings = harness
        .tracker
        .create_issue(RepoRole::Findings, "Finding 42", "Report body for finding 42")
        .await
        .expect("create findings issue");
    harness
        .metadata
        .put(
            "org/validation#42",
            &validation_link_record("org/findings#1", &findings.html_url),
        )
        .await
        .expect("put validation record");

    let report = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect("accept");

    assert!(report.mirror.expect("mirror").reused);
    assert_eq!(harness.tracker.issues(RepoRole::Findings).len(), 1);
    let back = harness
        .metadata
        .record("org/findings#1")
        .expect("restored back record");
    assert_eq!(
        back.get("originalIssueId").map(String::as_str),
        Some("org/validation#42")
    );
}

#[tokio::test]
async fn regression_accept_rejects_findings_record_linked_to_other_issue() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness
        .tracker
        .create_issue(RepoRole::Findings, "Finding 7", "body")
        .await
        .expect("create findings issue");
    harness
        .metadata
        .put(
            "org/validation#42",
            &validation_link_record("org/findings#1", "https://github.test/f/1"),
        )
        .await
        .expect("put validation record");
    harness
        .metadata
        .put(
            "org/findings#1",
            &findings_link_record("org/validation#7", "https://github.test/v/7"),
        )
        .await
        .expect("put findings record");

    let error = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Accept { comment: None })
        .await
        .expect_err("cross-linked mirror");

    assert_eq!(error.reason_code(), "inconsistent_mirror");
    assert_eq!(harness.tracker.issues(RepoRole::Findings).len(), 1);
    assert!(harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42")
        .open);
}

#[tokio::test]
async fn regression_stalled_effect_times_out_and_aborts_transition() {
    let harness = engine_harness_with_timeout(Duration::from_millis(50));
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    harness.tracker.stall_next("add_label");

    let error = harness
        .engine
        .handle_command(42, "alice", TransitionRequest::Reject { comment: None })
        .await
        .expect_err("reject");

    assert!(error.to_string().contains("timed out after 50 ms"));
    assert!(harness
        .tracker
        .issue(IssueRef::validation(42))
        .expect("issue 42")
        .open);
}

#[tokio::test]
async fn functional_accept_reuses_linked_open_findings_issue() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(42, &[], Some("alice"));
    let findings = harness
        .tracker
        .create_issue(RepoRole::Findings, "Finding 42", "Report body for finding 42")
        .await
        .expect("create findings issue");
    harness
        .metadata
        .put(
            "org/validation#42",
            &validation_link_record("org/findings#1", &findings.html_url),
        )
        .await
        .expect("put validation record");
    harness
        .metadata
        .put(
            "org/findings#1",
            &findings_link_record("org/validation#42", "https://github.test/org/validation/issues/42"),
        )
        .await
        .expect("put findings record");
    let calls_before = harness.tracker.calls().len();

    let report = harness
        .engine
        .handle_command(
            42,
            "alice",
            TransitionRequest::Accept {
                comment: Some("again".to_string()),
            },
        )
        .await
        .expect("accept");

    let mirror = report.mirror.expect("mirror");
    assert!(mirror.reused);
    assert_eq!(mirror.findings_issue, 1);
    let new_calls = &harness.tracker.calls()[calls_before..];
    assert!(new_calls.iter().all(|call| !call.starts_with("create_issue")));
    assert_eq!(
        harness.tracker.comments(IssueRef::findings(1)),
        vec!["again".to_string()]
    );
}

#[tokio::test]
async fn integration_concurrent_completions_never_double_assign_a_candidate() {
    let harness = engine_harness();
    harness
        .tracker
        .seed_validation_issue(1, &[], Some("alice"));
    harness.tracker.seed_validation_issue(2, &[], Some("bob"));
    harness.tracker.seed_validation_issue(3, &[], None);

    let first = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move {
            engine
                .handle_command(1, "alice", TransitionRequest::Reject { comment: None })
                .await
        })
    };
    let second = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move {
            engine
                .handle_command(2, "bob", TransitionRequest::Reject { comment: None })
                .await
        })
    };
    let first = first.await.expect("join").expect("alice reject");
    let second = second.await.expect("join").expect("bob reject");

    let granted = first.assignments.len() + second.assignments.len();
    assert_eq!(granted, 1);
    let candidate = harness
        .tracker
        .issue(IssueRef::validation(3))
        .expect("issue 3");
    assert_eq!(candidate.assignees.len(), 1);
}

#[tokio::test]
async fn regression_unwritable_decision_ledger_aborts_before_closing_issue() {
    let temp = tempdir().expect("tempdir");
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, "file").expect("write blocker");
    let tracker = Arc::new(InMemoryIssueTracker::new(VALIDATION_SLUG, FINDINGS_SLUG));
    let engine = TriageEngine::new(
        tracker.clone(),
        Arc::new(InMemoryMetadataStore::new()),
        Arc::new(DecisionLedger::load(blocker.join("decisions.json")).expect("ledger")),
        TriageEngineConfig {
            effect_timeout: Duration::from_secs(5),
        },
    );
    tracker.seed_validation_issue(42, &[UNKNOWN_LABEL], Some("alice"));

    let error = engine
        .handle_command(42, "alice", TransitionRequest::Reject { comment: None })
        .await
        .expect_err("reject without a durable ledger");

    assert_eq!(error.reason_code(), "remote_effect_failed");
    assert!(error.to_string().contains("record decision ledger"));
    assert!(tracker.calls().is_empty());
    let untouched = tracker.issue(IssueRef::validation(42)).expect("issue 42");
    assert!(untouched.open);
    assert!(untouched.has_label(UNKNOWN_LABEL));
}
