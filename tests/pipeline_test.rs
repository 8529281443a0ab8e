//! End-to-end pipeline runs over real files on disk.

use std::io::Write;
use std::path::Path;

use bookpack::archive::reader::read_archive;
use bookpack::{CompliancePipeline, Config, ReferenceTracker, Termination, Validator};

const DTD: &str = r#"
<!ELEMENT book (bookinfo?, chapter+)>
<!ELEMENT bookinfo (title, isbn?, publisher?)>
<!ELEMENT chapter (title, para+)>
<!ELEMENT title (#PCDATA)>
<!ELEMENT para (#PCDATA)>
<!ELEMENT isbn (#PCDATA)>
<!ELEMENT publisher (#PCDATA)>
<!ATTLIST chapter id ID #IMPLIED>
"#;

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE book PUBLIC "-//OASIS//DTD DocBook XML V4.5//EN" "book.dtd" [
<!ENTITY ch0001 SYSTEM "ch0001.xml">
<!ENTITY ch0002 SYSTEM "ch0002.xml">
<!ENTITY ch0003 SYSTEM "ch0003.xml">
]>
<book id="bk-1">
<bookinfo>
<title>Pipeline Book</title>
</bookinfo>
&ch0001;
&ch0002;
&ch0003;
</book>
"#;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn setup(dir: &Path, fragments: &[&str]) -> (std::path::PathBuf, Config) {
    let dtd_path = dir.join("book.dtd");
    std::fs::write(&dtd_path, DTD).unwrap();

    let mut entries: Vec<(String, Vec<u8>)> =
        vec![("Book.XML".to_string(), MANIFEST.as_bytes().to_vec())];
    for (i, source) in fragments.iter().enumerate() {
        entries.push((format!("ch{:04}.xml", i + 1), source.as_bytes().to_vec()));
    }
    let input = dir.join("input.zip");
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    write_zip(&input, &borrowed);

    let mut config = Config::default();
    config.grammar.dtd_path = dtd_path;
    (input, config)
}

#[test]
fn test_fixable_package_reaches_compliance() {
    let dir = tempfile::tempdir().unwrap();
    let (input, config) = setup(
        dir.path(),
        &[
            "<chapter id=\"c1\"><title>One</title><para>A</para></chapter>",
            // Missing its required title; the repair rules can supply one.
            "<chapter id=\"c2\"><para>B</para></chapter>",
            "<chapter id=\"c3\"><title>Three</title><para>C</para></chapter>",
        ],
    );
    let output = dir.path().join("output.zip");

    let mut tracker = ReferenceTracker::new();
    let mut pipeline = CompliancePipeline::new(config.clone()).unwrap();
    let outcome = pipeline
        .run(&input, &output, Some(&mut tracker))
        .unwrap();

    assert_eq!(outcome.termination, Termination::Success);
    assert_eq!(outcome.passes.len(), 2);
    assert!(outcome.passes[0].errors > 0);
    assert_eq!(outcome.passes[1].errors, 0);
    assert_eq!(outcome.fixes.verification_count(), 1);
    assert!(outcome.residual.is_none());

    // The written package revalidates clean.
    let validator = Validator::from_path(&config.grammar.dtd_path).unwrap();
    let (reread, findings) = read_archive(&output, &config.packaging).unwrap();
    assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
    assert_eq!(reread.fragments.len(), 3);
    assert!(validator.validate_archive(&reread).is_valid());
    // The supplied title is empty rather than visible placeholder text.
    assert!(reread.fragments[1].source.contains("<title/>"));
    let flagged = outcome
        .fixes
        .records
        .iter()
        .find(|r| r.needs_verification)
        .unwrap();
    assert!(flagged.reason.is_some());
    assert!(flagged.suggestion.is_some());
}

#[test]
fn test_missing_required_attribute_gets_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    // Same grammar, but chapter ids are mandatory.
    let dtd_path = dir.path().join("book.dtd");
    std::fs::write(
        &dtd_path,
        DTD.replace("id ID #IMPLIED", "id ID #REQUIRED"),
    )
    .unwrap();

    let input = dir.path().join("input.zip");
    write_zip(
        &input,
        &[
            ("Book.XML", MANIFEST.as_bytes()),
            (
                "ch0001.xml",
                b"<chapter id=\"c1\"><title>One</title><para>A</para></chapter>",
            ),
            // No id attribute.
            (
                "ch0002.xml",
                b"<chapter><title>Two</title><para>B</para></chapter>",
            ),
            (
                "ch0003.xml",
                b"<chapter id=\"c3\"><title>Three</title><para>C</para></chapter>",
            ),
        ],
    );
    let output = dir.path().join("output.zip");

    let mut config = Config::default();
    config.grammar.dtd_path = dtd_path;
    let mut pipeline = CompliancePipeline::new(config.clone()).unwrap();
    let outcome = pipeline.run(&input, &output, None).unwrap();

    assert_eq!(outcome.termination, Termination::Success);
    assert_eq!(outcome.passes.len(), 2);
    assert_eq!(outcome.passes[0].errors, 1);
    assert_eq!(outcome.passes[1].errors, 0);
    assert_eq!(outcome.fixes.verification_count(), 1);
    let record = &outcome.fixes.records[0];
    assert_eq!(record.entity, "ch0002");
    assert_eq!(record.line, Some(1));
    assert!(record.description.contains("id"));

    let (reread, _) = read_archive(&output, &config.packaging).unwrap();
    assert!(reread.fragments[1].source.contains("id=\"placeholder\""));
    // The other chapters keep their real ids.
    assert!(reread.fragments[0].source.contains("id=\"c1\""));
}

#[test]
fn test_unfixable_package_terminates_partial() {
    let dir = tempfile::tempdir().unwrap();
    let (input, config) = setup(
        dir.path(),
        &[
            "<chapter id=\"c1\"><title>One</title><para>A</para></chapter>",
            // An element no rule knows how to repair.
            "<chapter id=\"c2\"><title>Two</title><para>B</para><sidebar>x</sidebar></chapter>",
            "<chapter id=\"c3\"><title>Three</title><para>C</para></chapter>",
        ],
    );
    let output = dir.path().join("output.zip");

    let mut pipeline = CompliancePipeline::new(config.clone()).unwrap();
    let outcome = pipeline.run(&input, &output, None).unwrap();

    assert_eq!(outcome.termination, Termination::PartialSuccess);
    let residual = outcome.residual.expect("expected residual report");
    assert!(residual.error_count() > 0);
    assert!(
        residual
            .errors
            .iter()
            .any(|e| e.entity.as_deref() == Some("ch0002"))
    );
    // The package is still written.
    assert!(output.is_file());
    let (reread, _) = read_archive(&output, &config.packaging).unwrap();
    assert_eq!(reread.fragments.len(), 3);
}

#[test]
fn test_missing_fragment_is_reported_and_package_still_written() {
    let dir = tempfile::tempdir().unwrap();
    let dtd_path = dir.path().join("book.dtd");
    std::fs::write(&dtd_path, DTD).unwrap();

    // Manifest declares three chapters but only two exist.
    let input = dir.path().join("input.zip");
    write_zip(
        &input,
        &[
            ("Book.XML", MANIFEST.as_bytes()),
            (
                "ch0001.xml",
                b"<chapter id=\"c1\"><title>One</title><para>A</para></chapter>",
            ),
            (
                "ch0003.xml",
                b"<chapter id=\"c3\"><title>Three</title><para>C</para></chapter>",
            ),
        ],
    );
    let output = dir.path().join("output.zip");

    let mut config = Config::default();
    config.grammar.dtd_path = dtd_path;
    let mut pipeline = CompliancePipeline::new(config).unwrap();
    let outcome = pipeline.run(&input, &output, None).unwrap();

    assert_eq!(outcome.termination, Termination::PartialSuccess);
    assert!(
        outcome
            .report
            .errors
            .iter()
            .any(|e| e.category == bookpack::ErrorCategory::MissingFile
                && e.entity.as_deref() == Some("ch0002"))
    );
    assert!(output.is_file());
}

#[test]
fn test_bounded_concurrency_gives_same_report() {
    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<String> = (1..=6)
        .map(|i| {
            format!(
                "<chapter id=\"c{i}\"><title>T{i}</title><para>P</para><sidebar/></chapter>"
            )
        })
        .collect();
    let borrowed: Vec<&str> = sources.iter().map(String::as_str).collect();
    let (input, mut config) = setup_many(dir.path(), &borrowed);

    let run_with = |concurrency: usize, config: &mut Config, out: &Path| {
        config.pipeline.concurrency = concurrency;
        let mut pipeline = CompliancePipeline::new(config.clone()).unwrap();
        pipeline.run(&input, out, None).unwrap()
    };
    let serial = run_with(1, &mut config, &dir.path().join("a.zip"));
    let parallel = run_with(4, &mut config, &dir.path().join("b.zip"));

    let entities = |outcome: &bookpack::ComplianceOutcome| {
        outcome
            .report
            .errors
            .iter()
            .map(|e| e.entity.clone())
            .collect::<Vec<_>>()
    };
    // Findings come back in entity order regardless of thread count.
    assert_eq!(entities(&serial), entities(&parallel));
    assert_eq!(serial.report.error_count(), parallel.report.error_count());
}

fn setup_many(dir: &Path, fragments: &[&str]) -> (std::path::PathBuf, Config) {
    let dtd_path = dir.join("book.dtd");
    std::fs::write(&dtd_path, DTD).unwrap();

    let mut manifest = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE book PUBLIC \"-//OASIS//DTD DocBook XML V4.5//EN\" \"book.dtd\" [\n",
    );
    for i in 1..=fragments.len() {
        manifest.push_str(&format!("<!ENTITY ch{i:04} SYSTEM \"ch{i:04}.xml\">\n"));
    }
    manifest.push_str("]>\n<book><bookinfo><title>Many</title></bookinfo>\n");
    for i in 1..=fragments.len() {
        manifest.push_str(&format!("&ch{i:04};\n"));
    }
    manifest.push_str("</book>\n");

    let mut entries: Vec<(String, Vec<u8>)> =
        vec![("Book.XML".to_string(), manifest.into_bytes())];
    for (i, source) in fragments.iter().enumerate() {
        entries.push((format!("ch{:04}.xml", i + 1), source.as_bytes().to_vec()));
    }
    let input = dir.join("input.zip");
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    write_zip(&input, &borrowed);

    let mut config = Config::default();
    config.grammar.dtd_path = dtd_path;
    (input, config)
}
