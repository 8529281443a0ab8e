//! Tracking of media file renames and cross-reference links.
//!
//! Media files pass through three naming stages: the name in the source
//! document, the intermediate working name assigned during extraction,
//! and the final name inside the package. The tracker records each
//! transition so any packaged file can be traced back to its origin, and
//! keeps a ledger of cross-reference links for post-package validation.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::validate::{ErrorCategory, ValidationError};

/// Naming history of one media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub original: String,
    pub intermediate: String,
    /// Set exactly once, when the packager writes the file.
    pub final_name: Option<String>,
    /// Resource kind, e.g. `image` or `video`.
    pub kind: String,
    /// Entities of the fragments that reference this resource.
    pub referenced_by: Vec<String>,
    /// Whether the file was present in the source material. Registration
    /// implies it was; extraction clears it when the bytes never turn up.
    #[serde(default = "default_true")]
    pub exists_in_source: bool,
    /// Whether the file landed in the output package, set when the
    /// tracker is checked against the written package.
    #[serde(default)]
    pub exists_in_output: bool,
}

fn default_true() -> bool {
    true
}

/// One cross-reference link seen in a fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Entity of the fragment the link appears in.
    pub source_entity: String,
    /// The id or file the link points at.
    pub target: String,
    pub resolved: bool,
}

/// Aggregate counts for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub media_total: usize,
    pub media_finalized: usize,
    pub links_total: usize,
    pub links_resolved: usize,
}

/// Records original, intermediate, and final names of media files plus
/// the link ledger. Records keep insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceTracker {
    media: Vec<MediaRecord>,
    links: Vec<LinkRecord>,
    #[serde(skip)]
    by_intermediate: HashMap<String, usize>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a media file entering the working set. The fragment it was
    /// first seen in becomes its first reference.
    ///
    /// The intermediate name must be unique; the same original name may
    /// legitimately appear more than once across source documents.
    pub fn register_media(
        &mut self,
        original: impl Into<String>,
        intermediate: impl Into<String>,
        kind: impl Into<String>,
        first_seen_in: impl Into<String>,
    ) -> Result<()> {
        let original = original.into();
        let intermediate = intermediate.into();
        if self.by_intermediate.contains_key(&intermediate) {
            return Err(Error::InvalidPackage(format!(
                "media name '{}' registered twice",
                intermediate
            )));
        }
        debug!("media {} -> {}", original, intermediate);
        self.by_intermediate
            .insert(intermediate.clone(), self.media.len());
        self.media.push(MediaRecord {
            original,
            intermediate,
            final_name: None,
            kind: kind.into(),
            referenced_by: vec![first_seen_in.into()],
            exists_in_source: true,
            exists_in_output: false,
        });
        Ok(())
    }

    /// Record that another fragment references an already-registered
    /// resource, identified by its original name.
    pub fn add_reference(&mut self, original: &str, fragment: impl Into<String>) -> Result<()> {
        let fragment = fragment.into();
        let record = self
            .media
            .iter_mut()
            .find(|m| m.original == original)
            .ok_or_else(|| {
                Error::InvalidPackage(format!("unknown media resource '{}'", original))
            })?;
        if !record.referenced_by.contains(&fragment) {
            record.referenced_by.push(fragment);
        }
        Ok(())
    }

    /// Record the packaged name of a media file. A final name is written
    /// once; assigning a different one afterwards is an error, so a stale
    /// tracker can never silently repoint a packaged file.
    pub fn set_final_name(
        &mut self,
        intermediate: &str,
        final_name: impl Into<String>,
    ) -> Result<()> {
        let final_name = final_name.into();
        let index = *self.by_intermediate.get(intermediate).ok_or_else(|| {
            Error::InvalidPackage(format!("unknown media name '{}'", intermediate))
        })?;
        let record = &mut self.media[index];
        match &record.final_name {
            Some(existing) if *existing != final_name => Err(Error::InvalidPackage(format!(
                "media '{}' already finalized as '{}', refusing '{}'",
                intermediate, existing, final_name
            ))),
            _ => {
                record.final_name = Some(final_name);
                Ok(())
            }
        }
    }

    pub fn final_name(&self, intermediate: &str) -> Option<&str> {
        self.by_intermediate
            .get(intermediate)
            .and_then(|&i| self.media[i].final_name.as_deref())
    }

    /// The original source name behind an intermediate name.
    pub fn original_for(&self, intermediate: &str) -> Option<&str> {
        self.by_intermediate
            .get(intermediate)
            .map(|&i| self.media[i].original.as_str())
    }

    pub fn media_records(&self) -> &[MediaRecord] {
        &self.media
    }

    /// Record a cross-reference link, initially unresolved.
    pub fn record_link(
        &mut self,
        source_entity: impl Into<String>,
        target: impl Into<String>,
    ) {
        self.links.push(LinkRecord {
            source_entity: source_entity.into(),
            target: target.into(),
            resolved: false,
        });
    }

    /// Mark every link to `target` resolved; returns how many matched.
    pub fn mark_link_resolved(&mut self, target: &str) -> usize {
        let mut count = 0;
        for link in &mut self.links {
            if link.target == target && !link.resolved {
                link.resolved = true;
                count += 1;
            }
        }
        count
    }

    pub fn unresolved_links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.iter().filter(|l| !l.resolved)
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            media_total: self.media.len(),
            media_finalized: self
                .media
                .iter()
                .filter(|m| m.final_name.is_some())
                .count(),
            links_total: self.links.len(),
            links_resolved: self.links.iter().filter(|l| l.resolved).count(),
        }
    }

    /// Check the tracker against what actually landed on disk, recording
    /// on each record whether its file made it into the output. A
    /// referenced file that never got packaged is an error; a packaged
    /// file nothing references is only a warning. Unresolved links are
    /// errors: they would be broken in the delivered book.
    pub fn validate(&mut self, output_root: &Path, media_dir: &str) -> Vec<ValidationError> {
        let mut findings = Vec::new();
        for record in &mut self.media {
            match &record.final_name {
                Some(final_name) => {
                    let path = output_root.join(media_dir).join(final_name);
                    record.exists_in_output = path.is_file();
                    if !record.exists_in_output {
                        findings.push(ValidationError::new(
                            ErrorCategory::MissingFile,
                            format!(
                                "Missing media file '{}' (originally '{}')",
                                final_name, record.original
                            ),
                        ));
                    }
                }
                None => {
                    record.exists_in_output = false;
                    findings.push(ValidationError::new(
                        ErrorCategory::MissingFile,
                        format!(
                            "Media file '{}' was never packaged",
                            record.intermediate
                        ),
                    ));
                }
            }
            // Legal but suspicious: the resource exists, nothing uses it.
            if record.referenced_by.is_empty() {
                findings.push(ValidationError::warning(
                    ErrorCategory::Validation,
                    format!("Media file '{}' is referenced by no fragment", record.intermediate),
                ));
            }
        }
        for link in self.links.iter().filter(|l| !l.resolved) {
            findings.push(
                ValidationError::new(
                    ErrorCategory::Validation,
                    format!("Unresolved link to '{}'", link.target),
                )
                .with_entity(&link.source_entity),
            );
        }
        findings
    }

    /// Serialize the tracker to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidPackage(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut tracker: ReferenceTracker = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidPackage(format!("{}: {}", path.display(), e)))?;
        tracker.rebuild_index();
        Ok(tracker)
    }

    fn rebuild_index(&mut self) {
        self.by_intermediate = self
            .media
            .iter()
            .enumerate()
            .map(|(i, m)| (m.intermediate.clone(), i))
            .collect();
    }
}
