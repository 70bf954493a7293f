#![no_main]

use libfuzzer_sys::fuzz_target;
use triage_github_issues::issue_command_parser::{parse_triage_command, ParsedTriageCommand};
use triage_github_issues::issue_transition::TransitionRequest;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let body = format!("@triage {raw}");

    match parse_triage_command(&body, "@triage") {
        Some(ParsedTriageCommand::Request(request)) => {
            assert!(!request.name().is_empty());
            if let TransitionRequest::Edit { body } = &request {
                assert!(!body.trim().is_empty());
            }
        }
        Some(ParsedTriageCommand::Invalid { message }) => {
            assert!(!message.trim().is_empty());
        }
        None => panic!("prefixed comment must be recognised"),
    }

    let _ = parse_triage_command(&raw, "@triage");
});
