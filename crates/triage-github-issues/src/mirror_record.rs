//! Metadata record shapes linking a validation issue to its mirrored findings
//! issue. Records are flat string maps keyed by an opaque issue identifier
//! (`owner/repo#number`).

use std::collections::BTreeMap;

pub const VALIDATED_ISSUE_ID_KEY: &str = "validatedIssueId";
pub const VALIDATED_ISSUE_URL_KEY: &str = "validatedIssueUrl";
pub const ORIGINAL_ISSUE_ID_KEY: &str = "originalIssueId";
pub const ORIGINAL_ISSUE_URL_KEY: &str = "originalIssueUrl";

pub type MetadataRecord = BTreeMap<String, String>;

pub fn issue_identifier(repo_slug: &str, number: u64) -> String {
    format!("{}#{number}", repo_slug.trim())
}

/// Splits an identifier produced by [`issue_identifier`] into slug and number.
pub fn parse_issue_identifier(raw: &str) -> Option<(String, u64)> {
    let (slug, number) = raw.trim().rsplit_once('#')?;
    if slug.is_empty() || !slug.contains('/') {
        return None;
    }
    let number = number.parse::<u64>().ok().filter(|number| *number > 0)?;
    Some((slug.to_string(), number))
}

/// Record stored under the validation issue once it has been mirrored.
pub fn validation_link_record(mirrored_id: &str, mirrored_url: &str) -> MetadataRecord {
    MetadataRecord::from([
        (VALIDATED_ISSUE_ID_KEY.to_string(), mirrored_id.to_string()),
        (VALIDATED_ISSUE_URL_KEY.to_string(), mirrored_url.to_string()),
    ])
}

/// Record stored under the mirrored findings issue, pointing back.
pub fn findings_link_record(source_id: &str, source_url: &str) -> MetadataRecord {
    MetadataRecord::from([
        (ORIGINAL_ISSUE_ID_KEY.to_string(), source_id.to_string()),
        (ORIGINAL_ISSUE_URL_KEY.to_string(), source_url.to_string()),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Forward link read from a validation-side record.
pub struct MirrorLink {
    pub mirrored_id: String,
    pub mirrored_url: String,
}

pub fn mirror_link_from_record(record: &MetadataRecord) -> Option<MirrorLink> {
    let mirrored_id = record
        .get(VALIDATED_ISSUE_ID_KEY)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())?;
    Some(MirrorLink {
        mirrored_id: mirrored_id.to_string(),
        mirrored_url: record
            .get(VALIDATED_ISSUE_URL_KEY)
            .cloned()
            .unwrap_or_default(),
    })
}

/// True when the findings-side record points back at `source_id`.
pub fn record_points_back_to(record: &MetadataRecord, source_id: &str) -> bool {
    record
        .get(ORIGINAL_ISSUE_ID_KEY)
        .is_some_and(|value| value.trim() == source_id)
}
