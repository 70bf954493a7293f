use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use triage_github_issues_runtime::TriageBridgeRuntimeConfig;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "triage-bot",
    about = "Triage bot for audit-finding issues across a validation and a findings repository",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "validation-repo",
        env = "TRIAGE_VALIDATION_REPO",
        help = "Repository in owner/repo format holding incoming validation issues"
    )]
    pub validation_repo: String,

    #[arg(
        long = "findings-repo",
        env = "TRIAGE_FINDINGS_REPO",
        help = "Repository in owner/repo format receiving accepted findings"
    )]
    pub findings_repo: String,

    #[arg(
        long = "github-token",
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token used for API access on both repositories"
    )]
    pub github_token: Option<String>,

    #[arg(
        long = "github-api-base",
        env = "TRIAGE_GITHUB_API_BASE",
        default_value = "https://api.github.com",
        help = "GitHub API base URL"
    )]
    pub github_api_base: String,

    #[arg(
        long = "bot-login",
        env = "TRIAGE_BOT_LOGIN",
        help = "Bot account login; resolved from the token when omitted"
    )]
    pub bot_login: Option<String>,

    #[arg(
        long = "command-prefix",
        env = "TRIAGE_COMMAND_PREFIX",
        default_value = "@triage",
        help = "Trigger prefix that marks a comment as a triage command"
    )]
    pub command_prefix: String,

    #[arg(
        long = "active-topic",
        env = "TRIAGE_ACTIVE_TOPIC",
        default_value = "active",
        help = "Repository topic that enables passive event handling"
    )]
    pub active_topic: String,

    #[arg(
        long = "active-override",
        env = "TRIAGE_ACTIVE_OVERRIDE",
        action = ArgAction::Set,
        help = "Force the active designation instead of reading repository topics"
    )]
    pub active_override: Option<bool>,

    #[arg(
        long = "state-dir",
        env = "TRIAGE_STATE_DIR",
        default_value = ".triage/github-issues",
        help = "Directory for bridge state, decision ledger, metadata records and event logs"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "poll-interval-seconds",
        env = "TRIAGE_POLL_INTERVAL_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Polling interval in seconds"
    )]
    pub poll_interval_seconds: u64,

    #[arg(
        long = "poll-once",
        env = "TRIAGE_POLL_ONCE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Run one poll cycle and exit"
    )]
    pub poll_once: bool,

    #[arg(
        long = "issue-number",
        env = "TRIAGE_ISSUE_NUMBER",
        value_delimiter = ',',
        value_parser = parse_positive_u64,
        help = "Only process these validation issue numbers (repeatable)"
    )]
    pub issue_number: Vec<u64>,

    #[arg(
        long = "processed-event-cap",
        env = "TRIAGE_PROCESSED_EVENT_CAP",
        default_value_t = 10_000,
        value_parser = parse_positive_usize,
        help = "Maximum processed-event keys to retain for duplicate delivery protection"
    )]
    pub processed_event_cap: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "TRIAGE_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout in milliseconds for a single GitHub API request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "TRIAGE_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable GitHub API failures (429/5xx/transport)"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "TRIAGE_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        help = "Base backoff delay in milliseconds for GitHub API retries"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "transition-timeout-ms",
        env = "TRIAGE_TRANSITION_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout in milliseconds for each remote effect of a transition"
    )]
    pub transition_timeout_ms: u64,
}

impl Cli {
    /// Builds and validates the bridge configuration.
    pub(crate) fn into_bridge_config(self) -> Result<TriageBridgeRuntimeConfig> {
        let token = match self.github_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => bail!("missing GitHub token: pass --github-token or set GITHUB_TOKEN"),
        };
        let config = TriageBridgeRuntimeConfig {
            validation_repo: self.validation_repo.trim().to_string(),
            findings_repo: self.findings_repo.trim().to_string(),
            api_base: self.github_api_base,
            token,
            bot_login: self
                .bot_login
                .map(|login| login.trim().to_string())
                .filter(|login| !login.is_empty()),
            command_prefix: self.command_prefix.trim().to_string(),
            active_topic: self.active_topic.trim().to_string(),
            active_override: self.active_override,
            state_dir: self.state_dir,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            poll_once: self.poll_once,
            required_issue_numbers: self.issue_number,
            processed_event_cap: self.processed_event_cap,
            request_timeout_ms: self.request_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            transition_timeout_ms: self.transition_timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }
}
