//! Grammar compliance tooling for structured book packages.
//!
//! A package is a ZIP archive holding a `Book.XML` manifest, one XML
//! fragment per chapter-level unit, and a media directory. This crate
//! reads such packages, validates every fragment against a DTD, applies
//! rule-based repairs, and writes the result back out, keeping a ledger
//! of media renames and cross-reference links along the way.
//!
//! The usual entry point is [`CompliancePipeline`], which drives the
//! whole validate-fix loop:
//!
//! ```no_run
//! use bookpack::{CompliancePipeline, Config};
//! use std::path::Path;
//!
//! # fn main() -> bookpack::Result<()> {
//! let mut pipeline = CompliancePipeline::new(Config::default())?;
//! let outcome = pipeline.run(
//!     Path::new("input.zip"),
//!     Path::new("output.zip"),
//!     None,
//! )?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```
//!
//! The pieces are also usable on their own: [`archive`] for package
//! I/O and splitting, [`grammar`] and [`validate`] for DTD checking,
//! [`fix`] for the repair rules, and [`track`] for the reference ledger.

pub mod archive;
pub mod config;
pub mod dom;
pub mod error;
pub mod fix;
pub mod grammar;
pub mod pipeline;
pub mod track;
pub mod util;
pub mod validate;

pub use archive::{Archive, Fragment, FragmentKind, Manifest};
pub use config::Config;
pub use error::{Error, Result};
pub use fix::{FixReport, Fixer};
pub use grammar::Dtd;
pub use pipeline::{CompliancePipeline, ComplianceOutcome, PipelineState, Termination};
pub use track::ReferenceTracker;
pub use validate::{ErrorCategory, Severity, ValidationError, ValidationReport, Validator};
