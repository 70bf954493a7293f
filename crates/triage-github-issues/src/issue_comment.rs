//! Bot comment rendering. Every comment the bot posts in response to an event
//! carries a hidden event-key marker so replays can be detected from the
//! issue thread alone.

pub const EVENT_KEY_MARKER_PREFIX: &str = "<!-- triage-event-key:";
pub const EVENT_KEY_MARKER_SUFFIX: &str = " -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCommandStatus {
    Completed,
    Rejected,
    Failed,
    Reverted,
}

impl IssueCommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
        }
    }
}

fn sanitize_reason_token(raw: &str) -> String {
    let mut normalized = String::new();
    let mut last_was_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            normalized.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = normalized.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn issue_command_reason_code(command: &str, status: IssueCommandStatus) -> String {
    format!(
        "triage_{}_{}",
        sanitize_reason_token(command),
        sanitize_reason_token(status.as_str())
    )
}

pub fn render_issue_command_comment(
    event_key: &str,
    command: &str,
    status: IssueCommandStatus,
    reason_code: &str,
    message: &str,
) -> String {
    let content = if message.trim().is_empty() {
        "Triage command processed.".to_string()
    } else {
        message.trim().to_string()
    };
    let command = if command.trim().is_empty() {
        "unknown"
    } else {
        command.trim()
    };
    let reason_code = if reason_code.trim().is_empty() {
        "triage_unknown_completed"
    } else {
        reason_code.trim()
    };
    format!(
        "{content}\n\n---\n{EVENT_KEY_MARKER_PREFIX}{event_key}{EVENT_KEY_MARKER_SUFFIX}\n_triage `{command}` | status `{}` | reason_code `{reason_code}`_",
        status.as_str()
    )
}

pub fn extract_footer_event_keys(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut cursor = text;
    while let Some(start) = cursor.find(EVENT_KEY_MARKER_PREFIX) {
        let after_start = &cursor[start + EVENT_KEY_MARKER_PREFIX.len()..];
        let Some(end) = after_start.find(EVENT_KEY_MARKER_SUFFIX) else {
            break;
        };
        let key = after_start[..end].trim();
        if !key.is_empty() {
            keys.push(key.to_string());
        }
        cursor = &after_start[end + EVENT_KEY_MARKER_SUFFIX.len()..];
    }
    keys
}
