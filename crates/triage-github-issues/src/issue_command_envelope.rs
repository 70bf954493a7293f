#[derive(Debug, Clone, PartialEq, Eq)]
/// Trigger-prefixed comment split into its command word and the raw remainder.
pub struct IssueCommandEnvelope<'a> {
    pub command: &'a str,
    pub remainder: &'a str,
}

/// Returns `None` when the comment is not addressed to the bot, `Some(Err(usage))`
/// when it carries the prefix alone.
pub fn parse_issue_command_envelope<'a>(
    body: &'a str,
    command_prefix: &str,
    usage: &str,
) -> Option<std::result::Result<IssueCommandEnvelope<'a>, String>> {
    let trimmed = body.trim();
    let prefix = trimmed.split_whitespace().next()?;
    if !prefix.eq_ignore_ascii_case(command_prefix.trim()) {
        return None;
    }

    let args = trimmed[prefix.len()..].trim();
    if args.is_empty() {
        return Some(Err(usage.to_string()));
    }

    let mut parts = args.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let remainder = parts.next().unwrap_or_default().trim();
    Some(Ok(IssueCommandEnvelope { command, remainder }))
}
