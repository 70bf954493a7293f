use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use triage_github_issues::issue_labels::{build_issue_label_set, normalize_issue_label};
use triage_github_issues::issue_state::{same_login, IssueRef, IssueSnapshot, RepoRole};

use super::issue_tracker::IssueTracker;

const STALL_DURATION: Duration = Duration::from_secs(30);

#[derive(Default)]
struct InMemoryTrackerState {
    issues: BTreeMap<IssueRef, IssueSnapshot>,
    comments: BTreeMap<IssueRef, Vec<String>>,
    failures: HashMap<String, usize>,
    stalls: HashMap<String, usize>,
    calls: Vec<String>,
}

/// Tracker held entirely in memory, with per-operation failure injection.
pub struct InMemoryIssueTracker {
    validation_slug: String,
    findings_slug: String,
    state: Mutex<InMemoryTrackerState>,
}

impl InMemoryIssueTracker {
    pub fn new(validation_slug: &str, findings_slug: &str) -> Self {
        Self {
            validation_slug: validation_slug.to_string(),
            findings_slug: findings_slug.to_string(),
            state: Mutex::new(InMemoryTrackerState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, InMemoryTrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_issue(&self, snapshot: IssueSnapshot) {
        self.lock_state().issues.insert(snapshot.issue, snapshot);
    }

    /// Seeds an open validation issue; creation time follows the issue number.
    pub fn seed_validation_issue(
        &self,
        number: u64,
        labels: &[&str],
        assignee: Option<&str>,
    ) -> IssueSnapshot {
        let snapshot = IssueSnapshot {
            issue: IssueRef::validation(number),
            title: format!("Finding {number}"),
            body: format!("Report body for finding {number}"),
            open: true,
            labels: build_issue_label_set(labels.iter().copied()),
            assignees: assignee
                .map(|login| vec![login.to_string()])
                .unwrap_or_default(),
            created_at: format!(
                "2026-01-01T{:02}:{:02}:{:02}Z",
                (number / 3600) % 24,
                (number / 60) % 60,
                number % 60
            ),
            html_url: format!(
                "https://github.test/{}/issues/{number}",
                self.validation_slug
            ),
        };
        self.insert_issue(snapshot.clone());
        snapshot
    }

    pub fn issue(&self, issue: IssueRef) -> Option<IssueSnapshot> {
        self.lock_state().issues.get(&issue).cloned()
    }

    pub fn issues(&self, repo: RepoRole) -> Vec<IssueSnapshot> {
        self.lock_state()
            .issues
            .values()
            .filter(|issue| issue.issue.repo == repo)
            .cloned()
            .collect()
    }

    pub fn comments(&self, issue: IssueRef) -> Vec<String> {
        self.lock_state()
            .comments
            .get(&issue)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutating calls in order, formatted as `operation issue`.
    pub fn calls(&self) -> Vec<String> {
        self.lock_state().calls.clone()
    }

    /// Makes the next `count` calls of `operation` fail.
    pub fn fail_next(&self, operation: &str, count: usize) {
        self.lock_state()
            .failures
            .insert(operation.to_string(), count);
    }

    /// Makes the next call of `operation` hang long enough to hit any effect timeout.
    pub fn stall_next(&self, operation: &str) {
        self.lock_state().stalls.insert(operation.to_string(), 1);
    }

    async fn enter(&self, operation: &str, target: String) -> Result<()> {
        let stall = {
            let mut state = self.lock_state();
            if let Some(remaining) = state.failures.get_mut(operation) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!("injected failure for {operation} on {target}");
                }
            }
            let stall = match state.stalls.get_mut(operation) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            if !operation.starts_with("fetch") && !operation.starts_with("list") {
                state.calls.push(format!("{operation} {target}"));
            }
            stall
        };
        if stall {
            tokio::time::sleep(STALL_DURATION).await;
        }
        Ok(())
    }

    fn with_issue<T>(
        &self,
        issue: IssueRef,
        update: impl FnOnce(&mut IssueSnapshot) -> T,
    ) -> Result<T> {
        let mut state = self.lock_state();
        let snapshot = state
            .issues
            .get_mut(&issue)
            .ok_or_else(|| anyhow!("issue {issue} not found"))?;
        Ok(update(snapshot))
    }
}

#[async_trait]
impl IssueTracker for InMemoryIssueTracker {
    fn repo_slug(&self, repo: RepoRole) -> String {
        match repo {
            RepoRole::Validation => self.validation_slug.clone(),
            RepoRole::Findings => self.findings_slug.clone(),
        }
    }

    async fn fetch_issue(&self, issue: IssueRef) -> Result<IssueSnapshot> {
        self.enter("fetch_issue", issue.to_string()).await?;
        self.issue(issue)
            .ok_or_else(|| anyhow!("issue {issue} not found"))
    }

    async fn list_open_issues(&self, repo: RepoRole) -> Result<Vec<IssueSnapshot>> {
        self.enter("list_open_issues", repo.as_str().to_string())
            .await?;
        Ok(self
            .issues(repo)
            .into_iter()
            .filter(|issue| issue.open)
            .collect())
    }

    async fn add_label(&self, issue: IssueRef, label: &str) -> Result<()> {
        self.enter("add_label", format!("{issue} {label}")).await?;
        self.with_issue(issue, |snapshot| {
            snapshot.labels.insert(normalize_issue_label(label));
        })
    }

    async fn remove_label(&self, issue: IssueRef, label: &str) -> Result<()> {
        self.enter("remove_label", format!("{issue} {label}"))
            .await?;
        self.with_issue(issue, |snapshot| {
            snapshot.labels.remove(&normalize_issue_label(label));
        })
    }

    async fn assign(&self, issue: IssueRef, login: &str) -> Result<()> {
        self.enter("assign", format!("{issue} {login}")).await?;
        self.with_issue(issue, |snapshot| {
            if !snapshot.is_assigned_to(login) {
                snapshot.assignees.push(login.to_string());
            }
        })
    }

    async fn unassign(&self, issue: IssueRef, login: &str) -> Result<()> {
        self.enter("unassign", format!("{issue} {login}")).await?;
        self.with_issue(issue, |snapshot| {
            snapshot
                .assignees
                .retain(|assignee| !same_login(assignee, login));
        })
    }

    async fn set_open(&self, issue: IssueRef, open: bool) -> Result<()> {
        let operation = if open { "reopen" } else { "close" };
        self.enter(operation, issue.to_string()).await?;
        self.with_issue(issue, |snapshot| snapshot.open = open)
    }

    async fn replace_body(&self, issue: IssueRef, body: &str) -> Result<()> {
        self.enter("replace_body", issue.to_string()).await?;
        self.with_issue(issue, |snapshot| snapshot.body = body.to_string())
    }

    async fn post_comment(&self, issue: IssueRef, body: &str) -> Result<()> {
        self.enter("post_comment", issue.to_string()).await?;
        let mut state = self.lock_state();
        if !state.issues.contains_key(&issue) {
            bail!("issue {issue} not found");
        }
        state
            .comments
            .entry(issue)
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn list_comments(&self, issue: IssueRef) -> Result<Vec<String>> {
        self.enter("list_comments", issue.to_string()).await?;
        Ok(self.comments(issue))
    }

    async fn create_issue(&self, repo: RepoRole, title: &str, body: &str) -> Result<IssueSnapshot> {
        self.enter("create_issue", repo.as_str().to_string()).await?;
        let mut state = self.lock_state();
        let number = state
            .issues
            .keys()
            .filter(|issue| issue.repo == repo)
            .map(|issue| issue.number)
            .max()
            .unwrap_or(0)
            + 1;
        let slug = match repo {
            RepoRole::Validation => &self.validation_slug,
            RepoRole::Findings => &self.findings_slug,
        };
        let snapshot = IssueSnapshot {
            issue: IssueRef { repo, number },
            title: title.to_string(),
            body: body.to_string(),
            open: true,
            labels: Default::default(),
            assignees: Vec::new(),
            created_at: "2026-01-02T00:00:00Z".to_string(),
            html_url: format!("https://github.test/{slug}/issues/{number}"),
        };
        state.issues.insert(snapshot.issue, snapshot.clone());
        Ok(snapshot)
    }
}
