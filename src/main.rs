//! bookpack - DTD compliance tooling for book packages

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use bookpack::archive::reader::read_archive;
use bookpack::archive::split::split_document;
use bookpack::archive::writer::{Packager, dir_fetcher, write_archive};
use bookpack::{
    CompliancePipeline, Config, Fixer, ReferenceTracker, Termination, ValidationReport,
    Validator,
};

#[derive(Parser)]
#[command(name = "bookpack")]
#[command(version, about = "Validate, repair, and package structured book archives", long_about = None)]
#[command(after_help = "EXAMPLES:
    bookpack validate input.zip --dtd book.dtd      Report grammar findings
    bookpack fix input.zip output.zip               Apply the repair rules once
    bookpack package book.xml output.zip            Split a monolithic book
    bookpack run input.zip output.zip               Full compliance pipeline")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a package and print every finding
    Validate {
        input: PathBuf,
        /// Grammar file, overriding the configuration
        #[arg(short, long)]
        dtd: Option<PathBuf>,
    },
    /// Apply the repair rules once and write the result
    Fix {
        input: PathBuf,
        output: PathBuf,
    },
    /// Split a monolithic book document into a package
    Package {
        input: PathBuf,
        output: PathBuf,
        /// Directory to pull referenced media files from
        #[arg(short, long)]
        media: Option<PathBuf>,
    },
    /// Run the full validate-fix pipeline
    Run {
        input: PathBuf,
        output: PathBuf,
        /// Grammar file, overriding the configuration
        #[arg(short, long)]
        dtd: Option<PathBuf>,
        /// Write the reference tracker ledger to this JSON file
        #[arg(long, value_name = "FILE")]
        tracker: Option<PathBuf>,
        /// Maximum validate-fix passes
        #[arg(long)]
        max_iterations: Option<usize>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Validate { input, dtd } => validate(&input, dtd.as_deref(), config),
        Command::Fix { input, output } => fix(&input, &output, config),
        Command::Package {
            input,
            output,
            media,
        } => package(&input, &output, media.as_deref(), config),
        Command::Run {
            input,
            output,
            dtd,
            tracker,
            max_iterations,
        } => run(
            &input,
            &output,
            dtd.as_deref(),
            tracker.as_deref(),
            max_iterations,
            config,
        ),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> bookpack::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn validate(
    input: &Path,
    dtd: Option<&Path>,
    mut config: Config,
) -> bookpack::Result<ExitCode> {
    if let Some(dtd) = dtd {
        config.grammar.dtd_path = dtd.to_path_buf();
    }
    let validator = Validator::from_path(&config.grammar.dtd_path)?;
    let (archive, findings) = read_archive(input, &config.packaging)?;

    let mut report = ValidationReport::new();
    report.extend(findings);
    report.extend(validator.validate_archive(&archive).errors);
    print!("{report}");

    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn fix(input: &Path, output: &Path, config: Config) -> bookpack::Result<ExitCode> {
    let (mut archive, findings) = read_archive(input, &config.packaging)?;
    for finding in &findings {
        eprintln!("{finding}");
    }
    let report = Fixer::new().fix_archive(&mut archive);
    print!("{report}");
    let summary = write_archive(&mut archive, output, &config.packaging)?;
    println!(
        "wrote {}: {} fragment(s), {} media file(s)",
        output.display(),
        summary.fragments,
        summary.media
    );
    Ok(ExitCode::SUCCESS)
}

fn package(
    input: &Path,
    output: &Path,
    media: Option<&Path>,
    config: Config,
) -> bookpack::Result<ExitCode> {
    let source = std::fs::read_to_string(input)?;
    let (mut archive, warnings) = split_document(&source, &config.packaging)?;
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }

    let mut packager = Packager::new(&config.packaging);
    if let Some(media) = media {
        packager = packager.with_fetcher(dir_fetcher(media.to_path_buf()));
    }
    let summary = packager.write(&mut archive, output, None)?;
    for missing in &summary.missing_media {
        eprintln!("warning: referenced media not found: {missing}");
    }
    println!(
        "wrote {}: {} fragment(s), {} media file(s)",
        output.display(),
        summary.fragments,
        summary.media
    );
    Ok(ExitCode::SUCCESS)
}

fn run(
    input: &Path,
    output: &Path,
    dtd: Option<&Path>,
    tracker_path: Option<&Path>,
    max_iterations: Option<usize>,
    mut config: Config,
) -> bookpack::Result<ExitCode> {
    if let Some(dtd) = dtd {
        config.grammar.dtd_path = dtd.to_path_buf();
    }
    if let Some(max) = max_iterations {
        config.pipeline.max_iterations = max;
    }

    let mut tracker = ReferenceTracker::new();
    let mut pipeline = CompliancePipeline::new(config)?;
    let outcome = pipeline.run(input, output, Some(&mut tracker))?;

    for stats in &outcome.passes {
        println!(
            "pass {}: {} error(s), {} warning(s), {} fix(es)",
            stats.pass, stats.errors, stats.warnings, stats.fixes
        );
    }
    if outcome.fixes.verification_count() > 0 {
        println!(
            "{} fix(es) need human verification:",
            outcome.fixes.verification_count()
        );
        for record in outcome
            .fixes
            .records
            .iter()
            .filter(|r| r.needs_verification)
        {
            println!("  {} {}: {}", record.entity, record.element, record.description);
            if let Some(reason) = &record.reason {
                println!("    reason: {}", reason);
            }
            if let Some(suggestion) = &record.suggestion {
                println!("    suggestion: {}", suggestion);
            }
        }
    }
    if let Some(path) = tracker_path {
        tracker.save(path)?;
        println!("tracker ledger written to {}", path.display());
    }

    match outcome.termination {
        Termination::Success => {
            println!("compliant: {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Termination::PartialSuccess => {
            if let Some(residual) = &outcome.residual {
                print!("{residual}");
            }
            println!("partial success: findings remain in {}", output.display());
            Ok(ExitCode::FAILURE)
        }
    }
}
