//! Cross-repository mirror for accepted findings.
//!
//! Accepting a validation issue creates a findings issue with the same title
//! and body and links the pair through two metadata records. The findings
//! issue exists before either record is written; a record write failure after
//! that point is reported as an inconsistent mirror, and the next accept
//! finishes the half-written pair instead of creating another issue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use triage_github_issues::issue_state::{IssueRef, IssueSnapshot, RepoRole};
use triage_github_issues::mirror_record::{
    findings_link_record, issue_identifier, mirror_link_from_record, parse_issue_identifier,
    record_points_back_to, validation_link_record, ORIGINAL_ISSUE_ID_KEY,
};
use triage_github_issues::{TriageError, TriageResult};

use super::issue_tracker::IssueTracker;
use super::metadata_store::MetadataStore;
use super::triage_engine::bounded_remote_call;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorOutcome {
    pub findings_issue: u64,
    pub findings_id: String,
    pub findings_url: String,
    /// True when an existing, still-linked findings issue was reused.
    pub reused: bool,
}

pub struct CrossRepoMirror {
    tracker: Arc<dyn IssueTracker>,
    metadata: Arc<dyn MetadataStore>,
    effect_timeout: Duration,
}

impl CrossRepoMirror {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        metadata: Arc<dyn MetadataStore>,
        effect_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            metadata,
            effect_timeout,
        }
    }

    fn source_id(&self, issue_number: u64) -> String {
        issue_identifier(&self.tracker.repo_slug(RepoRole::Validation), issue_number)
    }

    /// Mirrors `source` into the findings repository. A live link, or a
    /// findings issue left half-linked by an earlier failed accept, is
    /// completed and reused instead of creating a second copy.
    pub async fn accept(
        &self,
        source: &IssueSnapshot,
        comment: Option<&str>,
    ) -> TriageResult<MirrorOutcome> {
        let source_id = self.source_id(source.issue.number);
        let findings_slug = self.tracker.repo_slug(RepoRole::Findings);
        let comment = comment.map(str::trim).filter(|value| !value.is_empty());

        let existing = match self.forward_link(source, &source_id, &findings_slug).await? {
            Some(existing) => Some(existing),
            None => self.orphaned_back_link(&source_id, &findings_slug).await?,
        };
        if let Some(existing) = existing {
            if let Some(comment) = comment {
                self.post_comment_once(IssueRef::findings(existing.findings_issue), comment)
                    .await?;
            }
            info!(
                source = %source_id,
                mirrored = %existing.findings_id,
                "reusing existing findings mirror"
            );
            return Ok(existing);
        }

        let created = bounded_remote_call(
            self.effect_timeout,
            "create findings issue",
            self.tracker
                .create_issue(RepoRole::Findings, &source.title, &source.body),
        )
        .await?;
        let mirrored_id = issue_identifier(&findings_slug, created.issue.number);
        let inconsistent = |error: TriageError| TriageError::InconsistentMirror {
            source_issue: source_id.clone(),
            mirrored_issue: mirrored_id.clone(),
            message: error.to_string(),
        };

        if let Err(error) = bounded_remote_call(
            self.effect_timeout,
            "write findings metadata",
            self.metadata.put(
                &mirrored_id,
                &findings_link_record(&source_id, &source.html_url),
            ),
        )
        .await
        {
            // An unlinked findings issue must not stay open.
            if let Err(close_error) = bounded_remote_call(
                self.effect_timeout,
                "close unlinked findings issue",
                self.tracker.set_open(created.issue, false),
            )
            .await
            {
                warn!(
                    mirrored = %mirrored_id,
                    error = %close_error,
                    "failed to close unlinked findings issue"
                );
            }
            return Err(inconsistent(error));
        }
        bounded_remote_call(
            self.effect_timeout,
            "write validation metadata",
            self.metadata.put(
                &source_id,
                &validation_link_record(&mirrored_id, &created.html_url),
            ),
        )
        .await
        .map_err(inconsistent)?;

        if let Some(comment) = comment {
            bounded_remote_call(
                self.effect_timeout,
                "comment on findings issue",
                self.tracker.post_comment(created.issue, comment),
            )
            .await?;
        }

        info!(source = %source_id, mirrored = %mirrored_id, "created findings mirror");
        Ok(MirrorOutcome {
            findings_issue: created.issue.number,
            findings_id: mirrored_id,
            findings_url: created.html_url,
            reused: false,
        })
    }

    /// Follows the validation-side record. A missing back record is rewritten
    /// when the findings issue is still open; a back record naming another
    /// source is an inconsistent mirror.
    async fn forward_link(
        &self,
        source: &IssueSnapshot,
        source_id: &str,
        findings_slug: &str,
    ) -> TriageResult<Option<MirrorOutcome>> {
        let Some(record) = bounded_remote_call(
            self.effect_timeout,
            "read validation metadata",
            self.metadata.get(source_id),
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(link) = mirror_link_from_record(&record) else {
            return Ok(None);
        };
        let Some((slug, number)) = parse_issue_identifier(&link.mirrored_id) else {
            return Ok(None);
        };
        if slug != findings_slug {
            return Ok(None);
        }

        let back = bounded_remote_call(
            self.effect_timeout,
            "read findings metadata",
            self.metadata.get(&link.mirrored_id),
        )
        .await?;
        if let Some(back) = back.as_ref() {
            if !record_points_back_to(back, source_id) {
                return Err(TriageError::InconsistentMirror {
                    source_issue: source_id.to_string(),
                    mirrored_issue: link.mirrored_id.clone(),
                    message: "findings record points at a different validation issue"
                        .to_string(),
                });
            }
        }

        let findings = bounded_remote_call(
            self.effect_timeout,
            "fetch findings issue",
            self.tracker.fetch_issue(IssueRef::findings(number)),
        )
        .await?;
        if !findings.open {
            if back.is_some() {
                self.delete_stale_back_record(&link.mirrored_id).await?;
            }
            return Ok(None);
        }
        if back.is_none() {
            warn!(
                source = %source_id,
                mirrored = %link.mirrored_id,
                "findings record missing; restoring the back link"
            );
            bounded_remote_call(
                self.effect_timeout,
                "write findings metadata",
                self.metadata.put(
                    &link.mirrored_id,
                    &findings_link_record(source_id, &source.html_url),
                ),
            )
            .await
            .map_err(|error| TriageError::InconsistentMirror {
                source_issue: source_id.to_string(),
                mirrored_issue: link.mirrored_id.clone(),
                message: error.to_string(),
            })?;
        }

        Ok(Some(MirrorOutcome {
            findings_issue: number,
            findings_id: link.mirrored_id,
            findings_url: if link.mirrored_url.is_empty() {
                findings.html_url
            } else {
                link.mirrored_url
            },
            reused: true,
        }))
    }

    /// Finds a findings record pointing at `source_id` with no forward record,
    /// and completes the pair when its issue is still open. Back records of
    /// closed findings issues are dropped.
    async fn orphaned_back_link(
        &self,
        source_id: &str,
        findings_slug: &str,
    ) -> TriageResult<Option<MirrorOutcome>> {
        let candidates = bounded_remote_call(
            self.effect_timeout,
            "scan findings metadata",
            self.metadata.find_by_field(ORIGINAL_ISSUE_ID_KEY, source_id),
        )
        .await?;

        for (mirrored_id, _) in candidates {
            let Some((slug, number)) = parse_issue_identifier(&mirrored_id) else {
                continue;
            };
            if slug != findings_slug {
                continue;
            }
            let findings = bounded_remote_call(
                self.effect_timeout,
                "fetch findings issue",
                self.tracker.fetch_issue(IssueRef::findings(number)),
            )
            .await?;
            if !findings.open {
                self.delete_stale_back_record(&mirrored_id).await?;
                continue;
            }

            warn!(
                source = %source_id,
                mirrored = %mirrored_id,
                "validation record missing; completing the mirror link"
            );
            bounded_remote_call(
                self.effect_timeout,
                "write validation metadata",
                self.metadata.put(
                    source_id,
                    &validation_link_record(&mirrored_id, &findings.html_url),
                ),
            )
            .await
            .map_err(|error| TriageError::InconsistentMirror {
                source_issue: source_id.to_string(),
                mirrored_issue: mirrored_id.clone(),
                message: error.to_string(),
            })?;
            return Ok(Some(MirrorOutcome {
                findings_issue: number,
                findings_id: mirrored_id,
                findings_url: findings.html_url,
                reused: true,
            }));
        }
        Ok(None)
    }

    async fn delete_stale_back_record(&self, mirrored_id: &str) -> TriageResult<()> {
        info!(mirrored = %mirrored_id, "dropping link record of closed findings issue");
        bounded_remote_call(
            self.effect_timeout,
            "delete findings metadata",
            self.metadata.delete(mirrored_id),
        )
        .await
    }

    /// Posts `comment` unless the issue already carries an identical comment.
    async fn post_comment_once(&self, issue: IssueRef, comment: &str) -> TriageResult<()> {
        let existing = bounded_remote_call(
            self.effect_timeout,
            "list findings comments",
            self.tracker.list_comments(issue),
        )
        .await?;
        if existing.iter().any(|body| body.trim() == comment) {
            return Ok(());
        }
        bounded_remote_call(
            self.effect_timeout,
            "comment on findings issue",
            self.tracker.post_comment(issue, comment),
        )
        .await
    }

    /// Retracts the mirror of `source_number`: posts a note on the findings
    /// issue, closes it, and deletes both records. Returns the retracted
    /// findings issue number, or `None` when nothing was linked.
    pub async fn revert(&self, source_number: u64) -> TriageResult<Option<u64>> {
        let source_id = self.source_id(source_number);
        let findings_slug = self.tracker.repo_slug(RepoRole::Findings);
        let Some(record) = bounded_remote_call(
            self.effect_timeout,
            "read validation metadata",
            self.metadata.get(&source_id),
        )
        .await?
        else {
            return Ok(None);
        };

        let link = mirror_link_from_record(&record);
        let mut retracted = None;
        if let Some(link) = link.as_ref() {
            if let Some((slug, number)) = parse_issue_identifier(&link.mirrored_id) {
                if slug == findings_slug {
                    let findings = IssueRef::findings(number);
                    bounded_remote_call(
                        self.effect_timeout,
                        "post retraction note",
                        self.tracker.post_comment(
                            findings,
                            &format!(
                                "Retracted: the acceptance of {source_id} was undone, so this finding is no longer validated."
                            ),
                        ),
                    )
                    .await?;
                    bounded_remote_call(
                        self.effect_timeout,
                        "close findings issue",
                        self.tracker.set_open(findings, false),
                    )
                    .await?;
                    retracted = Some(number);
                }
            }
            bounded_remote_call(
                self.effect_timeout,
                "delete findings metadata",
                self.metadata.delete(&link.mirrored_id),
            )
            .await?;
        }
        bounded_remote_call(
            self.effect_timeout,
            "delete validation metadata",
            self.metadata.delete(&source_id),
        )
        .await?;
        info!(source = %source_id, retracted = ?retracted, "retracted findings mirror");
        Ok(retracted)
    }
}
