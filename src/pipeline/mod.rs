//! The compliance pipeline: a bounded validate-fix loop over a package.
//!
//! One run reads a package, validates every fragment, repairs what the
//! rule set can repair, and revalidates, up to a configured number of
//! passes. A run always produces an output package; the termination
//! state says whether it is fully compliant (`Success`) or still has
//! findings after the final pass (`PartialSuccess`).

use std::path::Path;

use log::{debug, info};

use crate::archive::Archive;
use crate::archive::reader::read_archive;
use crate::archive::writer::{MediaFetcher, PackageSummary, Packager};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fix::{FixReport, Fixer};
use crate::track::ReferenceTracker;
use crate::validate::{ValidationError, ValidationReport, Validator};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Validating,
    Fixing,
    Terminated(Termination),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The final validation pass found no errors.
    Success,
    /// Passes ran out (or fixing stalled) with findings remaining.
    PartialSuccess,
}

/// Counters for one validate(-fix) pass.
#[derive(Debug, Clone, Copy)]
pub struct PassStats {
    /// 1-based pass number.
    pub pass: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Fixes applied after this pass's validation (0 on the final pass).
    pub fixes: usize,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct ComplianceOutcome {
    pub termination: Termination,
    pub passes: Vec<PassStats>,
    /// The final validation report.
    pub report: ValidationReport,
    /// Every fix applied across all passes.
    pub fixes: FixReport,
    pub package: PackageSummary,
    /// Findings that remain in the written package. Present only on
    /// partial success.
    pub residual: Option<ValidationReport>,
}

impl ComplianceOutcome {
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Success
    }
}

/// Drives extract, validate, fix, and package for one run at a time.
pub struct CompliancePipeline {
    config: Config,
    validator: Validator,
    fixer: Fixer,
    fetcher: Option<MediaFetcher>,
    pool: Option<rayon::ThreadPool>,
    state: PipelineState,
}

impl CompliancePipeline {
    /// Build a pipeline, loading the grammar named by the configuration.
    pub fn new(config: Config) -> Result<Self> {
        let validator = Validator::from_path(&config.grammar.dtd_path)?;
        Self::with_validator(config, validator)
    }

    /// Build a pipeline around an already-loaded validator. The fixer
    /// gets the validator's grammar, so grammar-driven repairs (missing
    /// required attributes) are in play.
    pub fn with_validator(config: Config, validator: Validator) -> Result<Self> {
        let pool = match config.pipeline.concurrency {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| Error::Config(e.to_string()))?,
            ),
        };
        let fixer = Fixer::with_grammar(validator.dtd().clone());
        Ok(Self {
            config,
            validator,
            fixer,
            fetcher: None,
            pool,
            state: PipelineState::Idle,
        })
    }

    /// Supply a media fetcher for the packaging step.
    pub fn with_fetcher(mut self, fetcher: MediaFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full pipeline: read `input`, bring it into compliance,
    /// write `output`.
    pub fn run(
        &mut self,
        input: &Path,
        output: &Path,
        tracker: Option<&mut ReferenceTracker>,
    ) -> Result<ComplianceOutcome> {
        self.enter(PipelineState::Extracting);
        let (archive, findings) = read_archive(input, &self.config.packaging)?;
        info!(
            "extracted {}: {} fragment(s), {} media file(s), {} finding(s)",
            input.display(),
            archive.fragments.len(),
            archive.media.len(),
            findings.len()
        );
        self.run_archive(archive, findings, output, tracker)
    }

    /// Run the loop over an already-decoded archive. `unpack_findings`
    /// (missing files, stray entries) are carried into every pass's
    /// report; the loop cannot fix them, but they must not be lost.
    pub fn run_archive(
        &mut self,
        mut archive: Archive,
        unpack_findings: Vec<ValidationError>,
        output: &Path,
        tracker: Option<&mut ReferenceTracker>,
    ) -> Result<ComplianceOutcome> {
        let max_iterations = self.config.pipeline.max_iterations.max(1);
        let mut passes: Vec<PassStats> = Vec::new();
        let mut all_fixes = FixReport::default();
        let mut termination = Termination::PartialSuccess;
        let mut final_report = ValidationReport::new();

        for pass in 1..=max_iterations {
            self.enter(PipelineState::Validating);
            let mut report = ValidationReport::new();
            report.extend(unpack_findings.iter().cloned());
            let validated = match &self.pool {
                Some(pool) => pool.install(|| self.validator.validate_archive(&archive)),
                None => self.validator.validate_archive(&archive),
            };
            report.extend(validated.errors);
            let mut stats = PassStats {
                pass,
                errors: report.error_count(),
                warnings: report.warning_count(),
                fixes: 0,
            };
            info!(
                "pass {}/{}: {} error(s), {} warning(s)",
                pass, max_iterations, stats.errors, stats.warnings
            );

            if report.is_valid() {
                termination = Termination::Success;
                final_report = report;
                passes.push(stats);
                break;
            }
            if pass == max_iterations {
                final_report = report;
                passes.push(stats);
                break;
            }

            self.enter(PipelineState::Fixing);
            let fixes = self.fixer.fix_archive(&mut archive);
            stats.fixes = fixes.count();
            passes.push(stats);
            if fixes.is_empty() {
                // Nothing changed; further passes would only repeat the
                // same report.
                info!("no applicable fixes remain after pass {}", pass);
                final_report = report;
                break;
            }
            all_fixes.records.extend(fixes.records);
        }

        self.enter(PipelineState::Terminated(termination));

        archive.sync_sources();
        let mut packager = Packager::new(&self.config.packaging);
        if let Some(fetcher) = self.fetcher.take() {
            packager = packager.with_fetcher(fetcher);
        }
        let package = packager.write(&mut archive, output, tracker)?;
        info!(
            "wrote {}: {} fragment(s), {} media file(s)",
            output.display(),
            package.fragments,
            package.media
        );

        let residual = match termination {
            Termination::Success => None,
            Termination::PartialSuccess => Some(final_report.clone()),
        };
        Ok(ComplianceOutcome {
            termination,
            passes,
            report: final_report,
            fixes: all_fixes,
            package,
            residual,
        })
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Fragment, Manifest};
    use crate::grammar::Dtd;

    const DTD: &str = r#"
<!ELEMENT chapter (title, para+)>
<!ELEMENT title (#PCDATA)>
<!ELEMENT para (#PCDATA)>
<!ATTLIST chapter id ID #IMPLIED>
"#;

    fn pipeline(max_iterations: usize) -> CompliancePipeline {
        let mut config = Config::default();
        config.pipeline.max_iterations = max_iterations;
        CompliancePipeline::with_validator(
            config,
            Validator::new(Dtd::parse(DTD).unwrap()),
        )
        .unwrap()
    }

    fn archive_of(sources: &[&str]) -> Archive {
        let mut archive = Archive::new(Manifest {
            title: "Test".into(),
            ..Manifest::default()
        });
        for (i, source) in sources.iter().enumerate() {
            archive.fragments.push(Fragment::from_source(
                format!("ch{:04}", i + 1),
                format!("ch{:04}.xml", i + 1),
                i,
                *source,
            ));
        }
        archive
    }

    #[test]
    fn test_clean_package_succeeds_first_pass() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.zip");
        let archive = archive_of(&["<chapter><title>T</title><para>P</para></chapter>"]);
        let mut pipeline = pipeline(3);
        let outcome = pipeline
            .run_archive(archive, Vec::new(), &out, None)
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.passes.len(), 1);
        assert_eq!(
            pipeline.state(),
            PipelineState::Terminated(Termination::Success)
        );
        assert!(outcome.residual.is_none());
        assert!(out.is_file());
    }

    #[test]
    fn test_fixable_package_succeeds_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.zip");
        // The middle fragment is missing its required title.
        let archive = archive_of(&[
            "<chapter><title>One</title><para>A</para></chapter>",
            "<chapter><para>B</para></chapter>",
            "<chapter><title>Three</title><para>C</para></chapter>",
        ]);
        let mut pipeline = pipeline(3);
        let outcome = pipeline
            .run_archive(archive, Vec::new(), &out, None)
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.passes.len(), 2);
        assert!(outcome.passes[0].errors > 0);
        assert!(outcome.passes[0].fixes > 0);
        assert_eq!(outcome.passes[1].errors, 0);
        assert_eq!(outcome.fixes.verification_count(), 1);
    }

    #[test]
    fn test_unfixable_package_is_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.zip");
        // No rule repairs an undeclared element.
        let archive = archive_of(&[
            "<chapter><title>T</title><para>P</para><sidebar>x</sidebar></chapter>",
        ]);
        let mut pipeline = pipeline(3);
        let outcome = pipeline
            .run_archive(archive, Vec::new(), &out, None)
            .unwrap();
        assert_eq!(outcome.termination, Termination::PartialSuccess);
        let residual = outcome.residual.expect("expected residual report");
        assert!(residual.error_count() > 0);
        // The package is written even when findings remain.
        assert!(out.is_file());
    }

    #[test]
    fn test_unpack_findings_survive_every_pass() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.zip");
        let archive = archive_of(&["<chapter><title>T</title><para>P</para></chapter>"]);
        let missing = ValidationError::new(
            crate::validate::ErrorCategory::MissingFile,
            "Missing file 'ch0002.xml' declared by entity 'ch0002'",
        );
        let mut pipeline = pipeline(2);
        let outcome = pipeline
            .run_archive(archive, vec![missing], &out, None)
            .unwrap();
        assert_eq!(outcome.termination, Termination::PartialSuccess);
        assert!(
            outcome
                .report
                .errors
                .iter()
                .any(|e| e.category == crate::validate::ErrorCategory::MissingFile)
        );
    }
}
