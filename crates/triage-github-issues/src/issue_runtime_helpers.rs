use std::path::{Path, PathBuf};

pub fn parse_rfc3339_to_unix_ms(raw: &str) -> Option<u64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

pub fn sanitize_for_path(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// State directory for one validation/findings repository pair.
pub fn repository_pair_state_dir(state_root: &Path, validation_slug: &str, findings_slug: &str) -> PathBuf {
    state_root.join(sanitize_for_path(&format!(
        "{}__{}",
        validation_slug.replace('/', "__"),
        findings_slug.replace('/', "__")
    )))
}
