//! Remote issue-tracker seam. Every call is expected to be idempotent so a
//! replayed effect converges on the same remote state.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use triage_github_issues::issue_state::{IssueRef, IssueSnapshot, RepoRole};

use super::github_api_client::GithubApiClient;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// `owner/repo` slug backing `repo`.
    fn repo_slug(&self, repo: RepoRole) -> String;

    async fn fetch_issue(&self, issue: IssueRef) -> Result<IssueSnapshot>;

    async fn list_open_issues(&self, repo: RepoRole) -> Result<Vec<IssueSnapshot>>;

    async fn add_label(&self, issue: IssueRef, label: &str) -> Result<()>;

    async fn remove_label(&self, issue: IssueRef, label: &str) -> Result<()>;

    async fn assign(&self, issue: IssueRef, login: &str) -> Result<()>;

    async fn unassign(&self, issue: IssueRef, login: &str) -> Result<()>;

    async fn set_open(&self, issue: IssueRef, open: bool) -> Result<()>;

    async fn replace_body(&self, issue: IssueRef, body: &str) -> Result<()>;

    async fn post_comment(&self, issue: IssueRef, body: &str) -> Result<()>;

    /// Comment bodies on `issue`, oldest first.
    async fn list_comments(&self, issue: IssueRef) -> Result<Vec<String>>;

    async fn create_issue(&self, repo: RepoRole, title: &str, body: &str) -> Result<IssueSnapshot>;
}

/// GitHub-backed tracker over the validation/findings repository pair.
pub struct GithubTracker {
    validation: GithubApiClient,
    findings: GithubApiClient,
}

impl GithubTracker {
    pub(crate) fn new(validation: GithubApiClient, findings: GithubApiClient) -> Self {
        Self {
            validation,
            findings,
        }
    }

    fn client(&self, repo: RepoRole) -> &GithubApiClient {
        match repo {
            RepoRole::Validation => &self.validation,
            RepoRole::Findings => &self.findings,
        }
    }
}

#[async_trait]
impl IssueTracker for GithubTracker {
    fn repo_slug(&self, repo: RepoRole) -> String {
        self.client(repo).repo().as_slug()
    }

    async fn fetch_issue(&self, issue: IssueRef) -> Result<IssueSnapshot> {
        let raw = self.client(issue.repo).fetch_issue(issue.number).await?;
        Ok(raw.to_snapshot(issue.repo))
    }

    async fn list_open_issues(&self, repo: RepoRole) -> Result<Vec<IssueSnapshot>> {
        let rows = self.client(repo).list_open_issues().await?;
        Ok(rows.iter().map(|issue| issue.to_snapshot(repo)).collect())
    }

    async fn add_label(&self, issue: IssueRef, label: &str) -> Result<()> {
        self.client(issue.repo).add_label(issue.number, label).await
    }

    async fn remove_label(&self, issue: IssueRef, label: &str) -> Result<()> {
        self.client(issue.repo)
            .remove_label(issue.number, label)
            .await
    }

    async fn assign(&self, issue: IssueRef, login: &str) -> Result<()> {
        self.client(issue.repo)
            .add_assignee(issue.number, login)
            .await
    }

    async fn unassign(&self, issue: IssueRef, login: &str) -> Result<()> {
        self.client(issue.repo)
            .remove_assignee(issue.number, login)
            .await
    }

    async fn set_open(&self, issue: IssueRef, open: bool) -> Result<()> {
        let state = if open { "open" } else { "closed" };
        self.client(issue.repo)
            .update_issue(issue.number, &json!({ "state": state }))
            .await?;
        Ok(())
    }

    async fn replace_body(&self, issue: IssueRef, body: &str) -> Result<()> {
        self.client(issue.repo)
            .update_issue(issue.number, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn post_comment(&self, issue: IssueRef, body: &str) -> Result<()> {
        let response = self
            .client(issue.repo)
            .create_issue_comment(issue.number, body)
            .await?;
        tracing::debug!(
            issue = %issue,
            comment_id = response.id,
            url = response.html_url.as_deref().unwrap_or_default(),
            "posted issue comment"
        );
        Ok(())
    }

    async fn list_comments(&self, issue: IssueRef) -> Result<Vec<String>> {
        let comments = self
            .client(issue.repo)
            .list_issue_comments(issue.number)
            .await?;
        Ok(comments
            .into_iter()
            .filter_map(|comment| comment.body)
            .collect())
    }

    async fn create_issue(&self, repo: RepoRole, title: &str, body: &str) -> Result<IssueSnapshot> {
        let created = self.client(repo).create_issue(title, body).await?;
        Ok(created.to_snapshot(repo))
    }
}
