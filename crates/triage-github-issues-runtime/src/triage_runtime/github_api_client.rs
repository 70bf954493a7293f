use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use triage_github_issues::github_transport_helpers::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use triage_github_issues::issue_event_collection::{
    GithubIssue, GithubIssueComment, GithubIssueEvent, GithubRepositoryTopics,
};

use super::RepoRef;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubCommentCreateResponse {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) html_url: Option<String>,
}

#[derive(Clone)]
/// REST client bound to one repository.
pub(crate) struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubApiClient {
    pub(crate) fn new(
        api_base: &str,
        token: &str,
        repo: RepoRef,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("triage-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    pub(crate) fn repo(&self) -> &RepoRef {
        &self.repo
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{suffix}",
            self.api_base, self.repo.owner, self.repo.name
        )
    }

    pub(crate) async fn resolve_bot_login(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Viewer {
            login: String,
        }

        let viewer: Viewer = self
            .request_json("resolve bot login", || {
                self.http.get(format!("{}/user", self.api_base))
            })
            .await?;
        Ok(viewer.login)
    }

    pub(crate) async fn list_repository_topics(&self) -> Result<Vec<String>> {
        let topics: GithubRepositoryTopics = self
            .request_json("list repository topics", || {
                self.http.get(self.repo_url("/topics"))
            })
            .await?;
        Ok(topics.names)
    }

    pub(crate) async fn fetch_issue(&self, issue_number: u64) -> Result<GithubIssue> {
        self.request_json("fetch issue", || {
            self.http
                .get(self.repo_url(&format!("/issues/{issue_number}")))
        })
        .await
    }

    pub(crate) async fn list_open_issues(&self) -> Result<Vec<GithubIssue>> {
        let rows: Vec<GithubIssue> = self
            .list_paginated("list open issues", "/issues", &[("state", "open")])
            .await?;
        Ok(rows
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }

    /// Issues of any state updated since the scan cursor, oldest update first.
    pub(crate) async fn list_updated_issues(&self, since: Option<&str>) -> Result<Vec<GithubIssue>> {
        let mut query = vec![("state", "all"), ("sort", "updated"), ("direction", "asc")];
        if let Some(since) = since {
            query.push(("since", since));
        }
        let rows: Vec<GithubIssue> = self
            .list_paginated("list updated issues", "/issues", &query)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }

    pub(crate) async fn list_issue_comments(
        &self,
        issue_number: u64,
    ) -> Result<Vec<GithubIssueComment>> {
        self.list_paginated(
            "list issue comments",
            &format!("/issues/{issue_number}/comments"),
            &[("sort", "created"), ("direction", "asc")],
        )
        .await
    }

    pub(crate) async fn list_issue_events(&self, issue_number: u64) -> Result<Vec<GithubIssueEvent>> {
        self.list_paginated(
            "list issue events",
            &format!("/issues/{issue_number}/events"),
            &[],
        )
        .await
    }

    pub(crate) async fn add_label(&self, issue_number: u64, label: &str) -> Result<()> {
        let payload = json!({ "labels": [label] });
        let _: Value = self
            .request_json("add issue label", || {
                self.http
                    .post(self.repo_url(&format!("/issues/{issue_number}/labels")))
                    .json(&payload)
            })
            .await?;
        Ok(())
    }

    /// Removing a label that is not present is not an error.
    pub(crate) async fn remove_label(&self, issue_number: u64, label: &str) -> Result<()> {
        let mut url = reqwest::Url::parse(&self.repo_url(&format!("/issues/{issue_number}/labels")))
            .context("invalid github label url")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("github api base cannot carry path segments"))?
            .push(label);
        let _ = self
            .send_with_retry("remove issue label", true, || self.http.delete(url.clone()))
            .await?;
        Ok(())
    }

    pub(crate) async fn add_assignee(&self, issue_number: u64, login: &str) -> Result<()> {
        let payload = json!({ "assignees": [login] });
        let _: Value = self
            .request_json("add issue assignee", || {
                self.http
                    .post(self.repo_url(&format!("/issues/{issue_number}/assignees")))
                    .json(&payload)
            })
            .await?;
        Ok(())
    }

    pub(crate) async fn remove_assignee(&self, issue_number: u64, login: &str) -> Result<()> {
        let payload = json!({ "assignees": [login] });
        let _: Value = self
            .request_json("remove issue assignee", || {
                self.http
                    .delete(self.repo_url(&format!("/issues/{issue_number}/assignees")))
                    .json(&payload)
            })
            .await?;
        Ok(())
    }

    pub(crate) async fn update_issue(&self, issue_number: u64, payload: &Value) -> Result<GithubIssue> {
        self.request_json("update issue", || {
            self.http
                .patch(self.repo_url(&format!("/issues/{issue_number}")))
                .json(payload)
        })
        .await
    }

    pub(crate) async fn create_issue(&self, title: &str, body: &str) -> Result<GithubIssue> {
        let payload = json!({ "title": title, "body": body });
        self.request_json("create issue", || {
            self.http.post(self.repo_url("/issues")).json(&payload)
        })
        .await
    }

    pub(crate) async fn create_issue_comment(
        &self,
        issue_number: u64,
        body: &str,
    ) -> Result<GithubCommentCreateResponse> {
        let payload = json!({ "body": body });
        self.request_json("create issue comment", || {
            self.http
                .post(self.repo_url(&format!("/issues/{issue_number}/comments")))
                .json(&payload)
        })
        .await
    }

    async fn list_paginated<T>(
        &self,
        operation: &str,
        suffix: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.repo_url(suffix);
        let per_page = PAGE_SIZE.to_string();
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<T> = self
                .request_json(operation, || {
                    self.http.get(&url).query(query).query(&[
                        ("per_page", per_page.as_str()),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self
            .send_with_retry(operation, false, request_builder)
            .await?
            .ok_or_else(|| anyhow!("github api {operation} returned no response"))?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return serde_json::from_value(Value::Null)
                .with_context(|| format!("failed to decode github {operation}"));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode github {operation}"))
    }

    /// Sends with bounded retries on transport errors, 429, and 5xx.
    /// Returns `None` for a 404 when `allow_not_found` is set.
    async fn send_with_retry<F>(
        &self,
        operation: &str,
        allow_not_found: bool,
        mut request_builder: F,
    ) -> Result<Option<reqwest::Response>>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header("x-triage-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if allow_not_found && status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_github_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "github api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("github api {operation} request failed"));
                }
            }
        }
    }
}
