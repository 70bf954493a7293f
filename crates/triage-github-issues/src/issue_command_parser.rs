use crate::issue_command_envelope::parse_issue_command_envelope;
use crate::issue_state::Decision;
use crate::issue_transition::TransitionRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of interpreting a trigger-prefixed comment.
pub enum ParsedTriageCommand {
    Request(TransitionRequest),
    Invalid { message: String },
}

pub fn triage_command_usage(command_prefix: &str) -> String {
    [
        "Supported triage commands:".to_string(),
        format!("- `{command_prefix} accept [comment]`: accept the finding and mirror it"),
        format!("- `{command_prefix} reject [comment]`: reject the finding"),
        format!("- `{command_prefix} claim`: take an unassigned `unknown` issue"),
        format!("- `{command_prefix} skip`: hand the issue back as `unknown`"),
        format!("- `{command_prefix} undo accept|reject`: revert a decision"),
        format!("- `{command_prefix} edit` followed by the new body on the next lines"),
    ]
    .join("\n")
}

/// Parses a single comment body into a triage command.
pub fn parse_triage_command(body: &str, command_prefix: &str) -> Option<ParsedTriageCommand> {
    let usage = triage_command_usage(command_prefix);
    let envelope = match parse_issue_command_envelope(body, command_prefix, &usage)? {
        Ok(envelope) => envelope,
        Err(message) => return Some(ParsedTriageCommand::Invalid { message }),
    };

    let command = envelope.command.to_ascii_lowercase();
    let remainder = envelope.remainder;
    let parsed = match command.as_str() {
        "accept" => Ok(TransitionRequest::Accept {
            comment: optional_comment(remainder),
        }),
        "reject" => Ok(TransitionRequest::Reject {
            comment: optional_comment(remainder),
        }),
        "claim" => no_arguments(command_prefix, "claim", remainder, TransitionRequest::Claim),
        "skip" => no_arguments(command_prefix, "skip", remainder, TransitionRequest::Skip),
        "undo" => parse_undo(command_prefix, remainder),
        "edit" => {
            if remainder.is_empty() {
                Err(format!(
                    "Usage: `{command_prefix} edit` followed by the new issue body on the next lines."
                ))
            } else {
                Ok(TransitionRequest::Edit {
                    body: remainder.to_string(),
                })
            }
        }
        _ => Err(format!(
            "Unknown command `{}`.\n\n{}",
            envelope.command, usage
        )),
    };

    Some(match parsed {
        Ok(request) => ParsedTriageCommand::Request(request),
        Err(message) => ParsedTriageCommand::Invalid { message },
    })
}

fn optional_comment(remainder: &str) -> Option<String> {
    let trimmed = remainder.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn no_arguments(
    command_prefix: &str,
    command: &str,
    remainder: &str,
    request: TransitionRequest,
) -> Result<TransitionRequest, String> {
    if remainder.trim().is_empty() {
        Ok(request)
    } else {
        Err(format!(
            "Usage: `{command_prefix} {command}` takes no arguments."
        ))
    }
}

fn parse_undo(command_prefix: &str, remainder: &str) -> Result<TransitionRequest, String> {
    let mut tokens = remainder.split_whitespace();
    let target = tokens.next().map(str::to_ascii_lowercase);
    let decision = match (target.as_deref(), tokens.next()) {
        (Some("accept"), None) => Decision::Accept,
        (Some("reject"), None) => Decision::Reject,
        _ => {
            return Err(format!(
                "Usage: `{command_prefix} undo accept` or `{command_prefix} undo reject`."
            ))
        }
    };
    Ok(TransitionRequest::Undo { decision })
}
