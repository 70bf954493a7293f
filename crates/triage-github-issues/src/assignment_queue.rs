//! Assignment-queue selection. The queue is not stored anywhere: it is the
//! ordered view of open, unassigned, undecided validation issues, split into
//! the standard and `unknown` pools.

use serde::Serialize;

use crate::issue_labels::has_decision_label;
use crate::issue_runtime_helpers::parse_rfc3339_to_unix_ms;
use crate::issue_state::{IssueSnapshot, Pool, RepoRole};
use crate::issue_transition::{ActorHoldings, RefillRequest};

/// Extra assignments granted after a terminal decision on an `unknown` issue.
pub const BONUS_ASSIGNMENT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedAssignment {
    pub number: u64,
    pub pool: Pool,
    pub bonus: bool,
}

/// Eligible issues of `pool`, oldest first; ties broken by issue number.
pub fn eligible_candidates(
    issues: &[IssueSnapshot],
    pool: Pool,
    exclude_issue: Option<u64>,
) -> Vec<&IssueSnapshot> {
    let mut candidates = issues
        .iter()
        .filter(|issue| issue.issue.repo == RepoRole::Validation)
        .filter(|issue| issue.open && issue.assignees.is_empty())
        .filter(|issue| !has_decision_label(&issue.labels))
        .filter(|issue| issue.pool() == pool)
        .filter(|issue| Some(issue.issue.number) != exclude_issue)
        .collect::<Vec<_>>();
    candidates.sort_by_key(|issue| {
        (
            parse_rfc3339_to_unix_ms(&issue.created_at).unwrap_or(u64::MAX),
            issue.issue.number,
        )
    });
    candidates
}

/// Selects the issues to assign after a completion.
///
/// One standard-pool issue is granted when the actor holds no other standard
/// assignment. A terminal decision on an `unknown` issue adds up to
/// [`BONUS_ASSIGNMENT_COUNT`] more: standard candidates first, then at most one
/// `unknown` candidate when the actor holds none.
pub fn plan_refill(
    request: &RefillRequest,
    holdings: &ActorHoldings,
    issues: &[IssueSnapshot],
) -> Vec<PlannedAssignment> {
    let exclude = Some(request.completed_issue);
    let mut standard = eligible_candidates(issues, Pool::Standard, exclude).into_iter();
    let mut planned = Vec::new();

    if holdings.standard.is_empty() {
        if let Some(issue) = standard.next() {
            planned.push(PlannedAssignment {
                number: issue.issue.number,
                pool: Pool::Standard,
                bonus: false,
            });
        }
    }

    if !request.bonus_eligible() {
        return planned;
    }

    let mut remaining = BONUS_ASSIGNMENT_COUNT;
    while remaining > 0 {
        let Some(issue) = standard.next() else {
            break;
        };
        planned.push(PlannedAssignment {
            number: issue.issue.number,
            pool: Pool::Standard,
            bonus: true,
        });
        remaining -= 1;
    }
    if remaining > 0 && holdings.unknown.is_empty() {
        if let Some(issue) = eligible_candidates(issues, Pool::Unknown, exclude)
            .into_iter()
            .next()
        {
            planned.push(PlannedAssignment {
                number: issue.issue.number,
                pool: Pool::Unknown,
                bonus: true,
            });
        }
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::{eligible_candidates, plan_refill, PlannedAssignment, BONUS_ASSIGNMENT_COUNT};
    use crate::issue_labels::{INSUFFICIENT_QUALITY_LABEL, UNKNOWN_LABEL};
    use crate::issue_state::test_support::snapshot;
    use crate::issue_state::{IssueSnapshot, Pool};
    use crate::issue_transition::{ActorHoldings, RefillRequest};

    fn refill(completed_pool: Pool, terminal: bool) -> RefillRequest {
        RefillRequest {
            actor: "alice".to_string(),
            completed_issue: 1,
            completed_pool,
            terminal,
        }
    }

    fn numbers(planned: &[PlannedAssignment]) -> Vec<u64> {
        planned.iter().map(|assignment| assignment.number).collect()
    }

    fn backlog(standard: &[u64], unknown: &[u64]) -> Vec<IssueSnapshot> {
        let mut issues = standard
            .iter()
            .map(|number| snapshot(*number, true, &[], None))
            .collect::<Vec<_>>();
        issues.extend(
            unknown
                .iter()
                .map(|number| snapshot(*number, true, &[UNKNOWN_LABEL], None)),
        );
        issues
    }

    #[test]
    fn unit_eligible_candidates_filters_and_orders_oldest_first() {
        let mut older = snapshot(9, true, &[], None);
        older.created_at = "2025-12-31T23:59:59Z".to_string();
        let issues = vec![
            snapshot(3, true, &[], None),
            snapshot(2, true, &[], Some("bob")),
            snapshot(4, false, &[INSUFFICIENT_QUALITY_LABEL], None),
            snapshot(5, true, &[UNKNOWN_LABEL], None),
            older,
        ];
        let standard = eligible_candidates(&issues, Pool::Standard, None)
            .into_iter()
            .map(|issue| issue.issue.number)
            .collect::<Vec<_>>();
        assert_eq!(standard, vec![9, 3]);
        let unknown = eligible_candidates(&issues, Pool::Unknown, None)
            .into_iter()
            .map(|issue| issue.issue.number)
            .collect::<Vec<_>>();
        assert_eq!(unknown, vec![5]);
    }

    #[test]
    fn functional_standard_completion_grants_single_standard_issue() {
        let issues = backlog(&[2, 3, 4], &[5]);
        let planned = plan_refill(
            &refill(Pool::Standard, true),
            &ActorHoldings::default(),
            &issues,
        );
        assert_eq!(
            planned,
            vec![PlannedAssignment {
                number: 2,
                pool: Pool::Standard,
                bonus: false
            }]
        );
    }

    #[test]
    fn functional_skip_never_grants_bonus() {
        let issues = backlog(&[2, 3, 4, 5, 6], &[7]);
        let planned = plan_refill(
            &refill(Pool::Unknown, false),
            &ActorHoldings::default(),
            &issues,
        );
        assert_eq!(numbers(&planned), vec![2]);
    }

    #[test]
    fn integration_unknown_decision_grants_one_plus_bonus() {
        let issues = backlog(&[2, 3, 4, 5, 6], &[7]);
        let planned = plan_refill(
            &refill(Pool::Unknown, true),
            &ActorHoldings::default(),
            &issues,
        );
        assert_eq!(planned.len(), 1 + BONUS_ASSIGNMENT_COUNT);
        assert_eq!(numbers(&planned), vec![2, 3, 4, 5]);
        assert!(!planned[0].bonus);
        assert!(planned[1..].iter().all(|assignment| assignment.bonus));
    }

    #[test]
    fn integration_bonus_falls_back_to_single_unknown_issue() {
        let issues = backlog(&[2, 3], &[7, 8]);
        let planned = plan_refill(
            &refill(Pool::Unknown, true),
            &ActorHoldings::default(),
            &issues,
        );
        assert_eq!(numbers(&planned), vec![2, 3, 7]);
        assert_eq!(planned[2].pool, Pool::Unknown);

        let holding_unknown = ActorHoldings {
            standard: Vec::new(),
            unknown: vec![40],
        };
        let planned = plan_refill(&refill(Pool::Unknown, true), &holding_unknown, &issues);
        assert_eq!(numbers(&planned), vec![2, 3]);
    }

    #[test]
    fn regression_refill_grants_fewer_never_more_when_backlog_is_small() {
        let empty = plan_refill(
            &refill(Pool::Unknown, true),
            &ActorHoldings::default(),
            &[],
        );
        assert!(empty.is_empty());

        let issues = backlog(&[2, 3, 4, 5, 6, 7, 8], &[9, 10]);
        for (pool, terminal) in [
            (Pool::Standard, true),
            (Pool::Standard, false),
            (Pool::Unknown, true),
            (Pool::Unknown, false),
        ] {
            let planned = plan_refill(&refill(pool, terminal), &ActorHoldings::default(), &issues);
            assert!(planned.len() <= 1 + BONUS_ASSIGNMENT_COUNT);
        }
    }

    #[test]
    fn regression_actor_holding_standard_issue_gets_no_base_assignment() {
        let issues = backlog(&[2, 3], &[]);
        let holdings = ActorHoldings {
            standard: vec![11],
            unknown: Vec::new(),
        };
        assert!(plan_refill(&refill(Pool::Standard, true), &holdings, &issues).is_empty());
    }

    #[test]
    fn regression_completed_issue_is_never_reassigned() {
        let mut issues = backlog(&[2], &[]);
        issues.push(snapshot(1, true, &[UNKNOWN_LABEL], None));
        let planned = plan_refill(
            &refill(Pool::Unknown, true),
            &ActorHoldings::default(),
            &issues,
        );
        assert_eq!(numbers(&planned), vec![2]);
    }
}
