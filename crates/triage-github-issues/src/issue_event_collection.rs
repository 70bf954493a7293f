use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::issue_command_envelope::parse_issue_command_envelope;
use crate::issue_labels::build_issue_label_set;
use crate::issue_state::{same_login, IssueRef, IssueSnapshot, RepoRole};
use crate::passive_event::{PlatformEvent, PlatformEventKind};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubIssueLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubIssue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default = "default_issue_state")]
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub html_url: String,
    pub user: GithubUser,
    #[serde(default)]
    pub labels: Vec<GithubIssueLabel>,
    #[serde(default)]
    pub assignees: Vec<GithubUser>,
    #[serde(default)]
    pub pull_request: Option<Value>,
}

fn default_issue_state() -> String {
    "open".to_string()
}

impl GithubIssue {
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case("open")
    }

    /// Point-in-time triage view of the issue in `repo`.
    pub fn to_snapshot(&self, repo: RepoRole) -> IssueSnapshot {
        IssueSnapshot {
            issue: IssueRef {
                repo,
                number: self.number,
            },
            title: self.title.clone(),
            body: self.body.clone().unwrap_or_default(),
            open: self.is_open(),
            labels: build_issue_label_set(self.labels.iter().map(|label| label.name.as_str())),
            assignees: self
                .assignees
                .iter()
                .map(|user| user.login.clone())
                .collect(),
            created_at: self.created_at.clone(),
            html_url: self.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubIssueComment {
    pub id: u64,
    pub body: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub user: GithubUser,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Entry of `GET /repos/{owner}/{repo}/issues/{number}/events`.
pub struct GithubIssueEvent {
    pub id: u64,
    pub event: String,
    #[serde(default)]
    pub actor: Option<GithubUser>,
    #[serde(default)]
    pub assignee: Option<GithubUser>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubRepositoryTopics {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Trigger-prefixed comment left by a reviewer.
pub struct CommandEvent {
    pub key: String,
    pub issue_number: u64,
    pub author_login: String,
    pub occurred_at: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TriageEvent {
    Command(CommandEvent),
    Platform(PlatformEvent),
}

impl TriageEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Command(event) => &event.key,
            Self::Platform(event) => &event.key,
        }
    }

    pub fn issue_number(&self) -> u64 {
        match self {
            Self::Command(event) => event.issue_number,
            Self::Platform(event) => event.issue_number,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            Self::Command(event) => &event.author_login,
            Self::Platform(event) => &event.actor,
        }
    }

    pub fn occurred_at(&self) -> &str {
        match self {
            Self::Command(event) => &event.occurred_at,
            Self::Platform(event) => &event.occurred_at,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Platform(event) => event.kind.as_str(),
        }
    }
}

/// Collects command comments and passive timeline events for one issue.
///
/// Anything authored by `bot_login` is skipped so the bot never reacts to
/// its own comments, labels, or assignments. Events are returned oldest first.
pub fn collect_triage_events(
    issue: &GithubIssue,
    comments: &[GithubIssueComment],
    timeline: &[GithubIssueEvent],
    bot_login: &str,
    command_prefix: &str,
) -> Vec<TriageEvent> {
    let mut events = Vec::new();

    for comment in comments {
        if same_login(&comment.user.login, bot_login) {
            continue;
        }
        let body = comment.body.as_deref().unwrap_or_default().trim();
        if body.is_empty() || parse_issue_command_envelope(body, command_prefix, "").is_none() {
            continue;
        }
        events.push(TriageEvent::Command(CommandEvent {
            key: format!("issue-comment-created:{}", comment.id),
            issue_number: issue.number,
            author_login: comment.user.login.clone(),
            occurred_at: comment.created_at.clone(),
            body: body.to_string(),
        }));
    }

    for entry in timeline {
        let Some(actor) = entry.actor.as_ref() else {
            continue;
        };
        if same_login(&actor.login, bot_login) {
            continue;
        }
        let assignee = entry.assignee.as_ref().map(|user| user.login.clone());
        let kind = match (entry.event.as_str(), assignee) {
            ("closed", _) => PlatformEventKind::Closed,
            ("assigned", Some(assignee)) => PlatformEventKind::Assigned { assignee },
            ("unassigned", Some(assignee)) => PlatformEventKind::Unassigned { assignee },
            _ => continue,
        };
        events.push(TriageEvent::Platform(PlatformEvent {
            key: format!("issue-event:{}", entry.id),
            issue_number: issue.number,
            actor: actor.login.clone(),
            kind,
            occurred_at: entry.created_at.clone(),
        }));
    }

    events.sort_by(|left, right| {
        left.occurred_at()
            .cmp(right.occurred_at())
            .then(left.key().cmp(right.key()))
    });
    events
}
