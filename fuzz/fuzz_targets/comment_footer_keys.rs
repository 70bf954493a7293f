#![no_main]

use libfuzzer_sys::fuzz_target;
use triage_github_issues::issue_comment::{
    extract_footer_event_keys, render_issue_command_comment, IssueCommandStatus,
    EVENT_KEY_MARKER_PREFIX,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let _ = extract_footer_event_keys(&raw);
    if raw.contains(EVENT_KEY_MARKER_PREFIX) {
        return;
    }

    let key = raw.replace('\n', " ");
    let key = key.trim();
    if key.is_empty() || key.contains("-->") {
        return;
    }
    let rendered =
        render_issue_command_comment(key, "accept", IssueCommandStatus::Completed, "", &raw);
    assert!(extract_footer_event_keys(&rendered)
        .iter()
        .any(|found| found == key));
});
