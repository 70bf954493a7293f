use std::collections::{BTreeSet, HashSet};

pub const UNKNOWN_LABEL: &str = "unknown";
pub const SUFFICIENT_QUALITY_LABEL: &str = "sufficient quality report";
pub const INSUFFICIENT_QUALITY_LABEL: &str = "insufficient quality report";
pub const IMPROVED_LABEL: &str = "improved";

/// Normalize issue labels for case-insensitive matching.
pub fn normalize_issue_label(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Build the normalized, de-duplicated label set of an issue.
pub fn build_issue_label_set<'a>(labels: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    labels
        .into_iter()
        .map(normalize_issue_label)
        .filter(|label| !label.is_empty())
        .collect::<BTreeSet<_>>()
}

pub fn label_set_contains(labels: &BTreeSet<String>, label: &str) -> bool {
    labels.contains(&normalize_issue_label(label))
}

/// True when the set carries either quality decision label.
pub fn has_decision_label(labels: &BTreeSet<String>) -> bool {
    label_set_contains(labels, SUFFICIENT_QUALITY_LABEL)
        || label_set_contains(labels, INSUFFICIENT_QUALITY_LABEL)
}

/// Return true when required issue-number filters are empty or contain the issue.
pub fn issue_matches_required_numbers(issue_number: u64, required: &HashSet<u64>) -> bool {
    required.is_empty() || required.contains(&issue_number)
}
