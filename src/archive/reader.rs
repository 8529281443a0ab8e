//! Tolerant ZIP package reading.
//!
//! Reading never gives up on the whole package because one entry is bad:
//! unreadable entries, missing declared fragments, and stray files all
//! become findings alongside whatever could be decoded, so one corrupt
//! chapter still leaves the rest of the book repairable.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{debug, warn};
use regex::Regex;
use zip::ZipArchive;

use crate::archive::{Archive, EntityDecl, Fragment, Manifest};
use crate::config::PackagingConfig;
use crate::dom::parser::parse_document;
use crate::error::Result;
use crate::util::{decode_text, strip_bom, xml_encoding_hint};
use crate::validate::{ErrorCategory, ValidationError};

/// Read a package from a ZIP file on disk.
pub fn read_archive(
    path: &Path,
    packaging: &PackagingConfig,
) -> Result<(Archive, Vec<ValidationError>)> {
    let file = File::open(path)?;
    read_archive_from(BufReader::new(file), packaging)
}

/// Read a package from any seekable ZIP source.
pub fn read_archive_from<R: Read + Seek>(
    reader: R,
    packaging: &PackagingConfig,
) -> Result<(Archive, Vec<ValidationError>)> {
    let mut zip = ZipArchive::new(reader)?;
    let mut findings = Vec::new();

    // Pull every entry out first; per-entry failures become findings
    // rather than aborting the read.
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(entry) => entry,
            Err(err) => {
                findings.push(ValidationError::new(
                    ErrorCategory::CorruptedFile,
                    format!("Could not open archive entry {}: {}", i, err),
                ));
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            findings.push(ValidationError::warning(
                ErrorCategory::Extraction,
                format!("Skipping entry with unsafe path: {}", entry.name()),
            ));
            continue;
        };
        let name = name.to_string_lossy().into_owned();
        let mut data = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.read_to_end(&mut data) {
            findings.push(
                ValidationError::new(
                    ErrorCategory::CorruptedFile,
                    format!("Could not read archive entry: {}", err),
                )
                .with_entity(name.clone()),
            );
            continue;
        }
        order.push(name.clone());
        entries.insert(name, data);
    }

    // Locate the manifest, possibly nested under one top-level directory.
    let manifest_path = order.iter().find(|name| {
        Path::new(name)
            .file_name()
            .is_some_and(|f| f.eq_ignore_ascii_case(packaging.manifest_name.as_str()))
    });
    let Some(manifest_path) = manifest_path.cloned() else {
        findings.push(ValidationError::new(
            ErrorCategory::MissingFile,
            format!("Package has no {} manifest", packaging.manifest_name),
        ));
        let archive = Archive {
            extras: entries,
            ..Archive::default()
        };
        return Ok((archive, findings));
    };
    let root = manifest_path
        .rfind('/')
        .map(|i| &manifest_path[..=i])
        .unwrap_or("")
        .to_string();
    debug!("manifest at {:?}, package root {:?}", manifest_path, root);

    let manifest_bytes = entries.remove(&manifest_path).unwrap_or_default();
    let manifest_text = decode_entry(&manifest_bytes);
    let (manifest, manifest_findings) = parse_manifest(&manifest_text, packaging);
    findings.extend(manifest_findings);

    let mut archive = Archive::new(manifest);

    // Declared fragments, in entity order.
    let declared = archive.manifest.entities.clone();
    for (index, entity) in declared.iter().enumerate() {
        let exact = format!("{}{}", root, entity.system_id);
        let found = if entries.contains_key(&exact) {
            Some(exact)
        } else {
            // Fall back to a basename match anywhere in the archive.
            entries
                .keys()
                .find(|name| {
                    Path::new(name)
                        .file_name()
                        .is_some_and(|f| f.eq_ignore_ascii_case(entity.system_id.as_str()))
                })
                .cloned()
        };
        match found {
            Some(path) => {
                let bytes = entries.remove(&path).unwrap_or_default();
                let text = decode_entry(&bytes);
                let fragment =
                    Fragment::from_source(&entity.name, &entity.system_id, index, text);
                archive.fragments.push(fragment);
            }
            None => {
                findings.push(
                    ValidationError::new(
                        ErrorCategory::MissingFile,
                        format!(
                            "Missing file '{}' declared by entity '{}'",
                            entity.system_id, entity.name
                        ),
                    )
                    .with_entity(&entity.name),
                );
            }
        }
    }

    // Media files under the media directory.
    let media_prefix = format!("{}{}/", root, packaging.media_dir);
    let media_paths: Vec<String> = entries
        .keys()
        .filter(|name| name.starts_with(&media_prefix))
        .cloned()
        .collect();
    for path in media_paths {
        if let Some(bytes) = entries.remove(&path) {
            let key = path[media_prefix.len()..].to_string();
            archive.media.insert(key, bytes);
        }
    }

    // Whatever is left was not declared anywhere.
    for (name, bytes) in entries {
        if name.to_lowercase().ends_with(".xml") {
            warn!("undeclared XML file in package: {}", name);
            findings.push(
                ValidationError::warning(
                    ErrorCategory::Validation,
                    format!("File '{}' is not declared in the manifest", name),
                )
                .with_entity(name.clone()),
            );
        }
        archive.extras.insert(name, bytes);
    }

    Ok((archive, findings))
}

fn decode_entry(bytes: &[u8]) -> String {
    let stripped = strip_bom(bytes);
    let hint = xml_encoding_hint(stripped);
    decode_text(stripped, hint).into_owned()
}

/// Parse the manifest text: entity declarations from the DOCTYPE internal
/// subset, book metadata from the body.
fn parse_manifest(
    text: &str,
    packaging: &PackagingConfig,
) -> (Manifest, Vec<ValidationError>) {
    let mut manifest = Manifest::default();
    let mut findings = Vec::new();

    // serialize_manifest writes these with double quotes; accept single
    // quotes from foreign producers too.
    let entity_re =
        Regex::new(r#"<!ENTITY\s+([A-Za-z0-9._:-]+)\s+SYSTEM\s+(?:"([^"]+)"|'([^']+)')"#)
            .expect("static regex");
    for cap in entity_re.captures_iter(text) {
        let system_id = cap
            .get(2)
            .or_else(|| cap.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        manifest.entities.push(EntityDecl {
            name: cap[1].to_string(),
            system_id,
        });
    }

    match parse_document(&strip_doctype(text)) {
        Ok(tree) => {
            if let Some(root) = tree.root_element() {
                manifest.book_id = tree.get_attr(root, "id").map(String::from);
                let info = tree.children(root).find(|&c| {
                    matches!(tree.element_name(c), Some("bookinfo") | Some("info"))
                });
                let scope = info.unwrap_or(root);
                let field = |tag: &str| {
                    tree.children(scope)
                        .find(|&c| tree.element_name(c) == Some(tag))
                        .map(|c| tree.inner_text(c))
                        .filter(|t| !t.trim().is_empty())
                };
                manifest.title = field("title").unwrap_or_default();
                manifest.subtitle = field("subtitle");
                manifest.author = field("author")
                    .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "));
                manifest.isbn = field("isbn");
                manifest.publisher = field("publisher").or_else(|| field("publishername"));
                manifest.copyright = tree
                    .children(scope)
                    .find(|&c| tree.element_name(c) == Some("copyright"))
                    .and_then(|c| {
                        tree.children(c)
                            .find(|&y| tree.element_name(y) == Some("year"))
                    })
                    .map(|y| tree.inner_text(y))
                    .filter(|t| !t.trim().is_empty());
                manifest.edition = field("edition");
                manifest.pubdate = field("pubdate");
            }
        }
        Err(err) => {
            let mut finding = ValidationError::new(
                ErrorCategory::XmlSyntax,
                format!("Malformed manifest: {}", err.message),
            )
            .with_entity(&packaging.manifest_name);
            if let (Some(line), Some(column)) = (err.line, err.column) {
                finding = finding.with_position(line, column);
            }
            findings.push(finding);
        }
    }

    if manifest.entities.is_empty() {
        findings.push(ValidationError::warning(
            ErrorCategory::Validation,
            "Manifest declares no fragment entities".to_string(),
        ));
    }

    (manifest, findings)
}

/// Remove the DOCTYPE declaration, including any internal subset, so the
/// body can be parsed on its own.
fn strip_doctype(text: &str) -> String {
    let Some(start) = text.find("<!DOCTYPE") else {
        return text.to_string();
    };
    let rest = &text[start..];
    let end = match rest.find('[') {
        // With an internal subset the declaration runs to the `]>`.
        Some(bracket) if rest[..bracket].find('>').is_none() => {
            rest.find("]>").map(|i| i + 2)
        }
        _ => rest.find('>').map(|i| i + 1),
    };
    match end {
        Some(end) => format!("{}{}", &text[..start], &rest[end..]),
        None => text[..start].to_string(),
    }
}
