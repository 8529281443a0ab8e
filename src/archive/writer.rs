//! ZIP package writing.
//!
//! The packager regenerates `Book.XML` from the archive's current
//! fragment list, writes each fragment's source text, and assembles the
//! media directory from the archive's own media map plus an optional
//! fetcher that pulls referenced files from an external source tree.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use percent_encoding::percent_decode_str;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::archive::Archive;
use crate::archive::split::build_toc;
use crate::config::PackagingConfig;
use crate::dom::parser::serialize_subtree;
use crate::error::Result;
use crate::track::ReferenceTracker;
use crate::util::escape_xml;

/// Elements whose `fileref` attribute names a media file.
const MEDIA_REF_ELEMENTS: &[&str] = &["imagedata", "graphic", "inlinegraphic", "videodata"];

/// Resolves a media reference to file bytes. Returns `None` when the
/// source has no such file.
pub type MediaFetcher = Box<dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync>;

/// Fetch media from a directory tree: exact relative path first, then a
/// basename match.
pub fn dir_fetcher(root: PathBuf) -> MediaFetcher {
    Box::new(move |name: &str| {
        let exact = root.join(name);
        if exact.is_file() {
            return std::fs::read(&exact).ok();
        }
        let basename = Path::new(name).file_name()?;
        let candidate = root.join(basename);
        if candidate.is_file() {
            return std::fs::read(&candidate).ok();
        }
        None
    })
}

/// Fetch media from a ZIP file. Entries are read up front so lookups are
/// cheap; matching tries the exact name, its percent-decoded form, then
/// the basename.
pub fn zip_fetcher(path: &Path) -> Result<MediaFetcher> {
    let file = File::open(path)?;
    let mut zip = zip::ZipArchive::new(std::io::BufReader::new(file))?;
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        entries.insert(name, data);
    }
    Ok(Box::new(move |name: &str| {
        if let Some(data) = entries.get(name) {
            return Some(data.clone());
        }
        let decoded = percent_decode_str(name).decode_utf8_lossy();
        if let Some(data) = entries.get(decoded.as_ref()) {
            return Some(data.clone());
        }
        let basename = Path::new(decoded.as_ref()).file_name()?.to_string_lossy();
        entries
            .iter()
            .find(|(key, _)| {
                Path::new(key)
                    .file_name()
                    .is_some_and(|f| f.to_string_lossy() == basename)
            })
            .map(|(_, data)| data.clone())
    }))
}

/// What one packaging run produced.
#[derive(Debug, Clone, Default)]
pub struct PackageSummary {
    pub fragments: usize,
    pub media: usize,
    /// Referenced media that neither the archive nor the fetcher could
    /// supply.
    pub missing_media: Vec<String>,
}

/// Writes an [`Archive`] out as a ZIP package.
pub struct Packager<'a> {
    packaging: &'a PackagingConfig,
    fetcher: Option<MediaFetcher>,
}

impl<'a> Packager<'a> {
    pub fn new(packaging: &'a PackagingConfig) -> Self {
        Self {
            packaging,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: MediaFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Write the package to `path`. When a tracker is supplied, each
    /// packaged media file gets its final name recorded.
    pub fn write(
        &self,
        archive: &mut Archive,
        path: &Path,
        mut tracker: Option<&mut ReferenceTracker>,
    ) -> Result<PackageSummary> {
        let file = File::create(path)?;
        self.write_to(archive, BufWriter::new(file), tracker.as_deref_mut())
    }

    /// Write the package to any seekable sink.
    ///
    /// The archive is mutable because media references are rewritten in
    /// place: every `fileref` the package can supply ends up naming the
    /// file's actual entry under the media directory. References the
    /// package cannot supply are left as they were.
    pub fn write_to<W: Write + Seek>(
        &self,
        archive: &mut Archive,
        sink: W,
        mut tracker: Option<&mut ReferenceTracker>,
    ) -> Result<PackageSummary> {
        let mut summary = PackageSummary::default();

        // Media carried in the archive keeps its name; files the fetcher
        // supplies get canonical img_NNNN names.
        let mut media: BTreeMap<String, Vec<u8>> = archive.media.clone();
        self.resolve_media_refs(archive, &mut media, tracker.as_deref_mut(), &mut summary)?;

        let mut zip = ZipWriter::new(sink);
        let options = SimpleFileOptions::default();

        zip.start_file(&self.packaging.manifest_name, options)?;
        zip.write_all(serialize_manifest(archive, self.packaging).as_bytes())?;

        for fragment in &archive.fragments {
            zip.start_file(&fragment.filename, options)?;
            zip.write_all(fragment.source.as_bytes())?;
            summary.fragments += 1;
        }

        for (name, bytes) in &media {
            let entry = format!("{}/{}", self.packaging.media_dir, name);
            zip.start_file(&entry, options)?;
            zip.write_all(bytes)?;
            summary.media += 1;
            if let Some(tracker) = tracker.as_deref_mut()
                && tracker.original_for(name).is_some()
            {
                tracker.set_final_name(name, name.clone())?;
            }
        }

        for (name, bytes) in &archive.extras {
            zip.start_file(name, options)?;
            zip.write_all(bytes)?;
        }

        zip.finish()?;
        Ok(summary)
    }

    /// Walk every media reference in fragment order and make it name a
    /// real package entry: references the archive already carries keep
    /// that file's name, references the fetcher can supply are written
    /// under a canonical `img_NNNN` name, and either way the `fileref`
    /// is rewritten to the media-directory-relative entry. `imagedata`
    /// additionally gets `width="100%" scalefit="1"`. Unresolvable
    /// references are left untouched and recorded in the summary.
    fn resolve_media_refs(
        &self,
        archive: &mut Archive,
        media: &mut BTreeMap<String, Vec<u8>>,
        mut tracker: Option<&mut ReferenceTracker>,
        summary: &mut PackageSummary,
    ) -> Result<()> {
        // Same source file referenced twice gets one packaged copy.
        let mut fetched: HashMap<String, String> = HashMap::new();
        let mut count = 0usize;

        for fragment in &mut archive.fragments {
            let entity = fragment.entity.clone();
            let Some(tree) = fragment.tree.as_mut() else {
                continue;
            };
            let mut changed = false;
            for id in tree.descendants(tree.document()) {
                let Some(element) = tree.element_name(id) else {
                    continue;
                };
                if !MEDIA_REF_ELEMENTS.contains(&element) {
                    continue;
                }
                let is_imagedata = element == "imagedata";
                let kind = if element == "videodata" { "video" } else { "image" };
                let Some(fileref) = tree.get_attr(id, "fileref").map(String::from) else {
                    continue;
                };
                if fileref.trim().is_empty() {
                    continue;
                }

                let key = if let Some(key) = carried_key(&fileref, media) {
                    Some(key)
                } else if let Some(canonical) = fetched.get(&fileref) {
                    Some(canonical.clone())
                } else {
                    match self.fetcher.as_ref().and_then(|f| f(&fileref)) {
                        Some(bytes) => {
                            count += 1;
                            let canonical = canonical_media_name(&fileref, count);
                            debug!("fetched media {} as {}", fileref, canonical);
                            media.insert(canonical.clone(), bytes);
                            fetched.insert(fileref.clone(), canonical.clone());
                            if let Some(tracker) = tracker.as_deref_mut() {
                                record_final_name(tracker, &fileref, &canonical, kind, &entity)?;
                            }
                            Some(canonical)
                        }
                        None => {
                            warn!("referenced media not found: {}", fileref);
                            if !summary.missing_media.contains(&fileref) {
                                summary.missing_media.push(fileref.clone());
                            }
                            None
                        }
                    }
                };

                let Some(key) = key else { continue };
                let reference = format!("{}/{}", self.packaging.media_dir, key);
                if tree.get_attr(id, "fileref") != Some(reference.as_str()) {
                    tree.set_attr(id, "fileref", reference);
                    changed = true;
                }
                if is_imagedata {
                    if tree.get_attr(id, "width") != Some("100%") {
                        tree.set_attr(id, "width", "100%");
                        changed = true;
                    }
                    if tree.get_attr(id, "scalefit") != Some("1") {
                        tree.set_attr(id, "scalefit", "1");
                        changed = true;
                    }
                }
            }
            if changed {
                fragment.sync_source();
            }
        }
        Ok(())
    }
}

/// Record a fetched file's final name, registering the resource first
/// when nothing upstream has.
fn record_final_name(
    tracker: &mut ReferenceTracker,
    fileref: &str,
    canonical: &str,
    kind: &str,
    entity: &str,
) -> Result<()> {
    let intermediate = tracker
        .media_records()
        .iter()
        .find(|m| m.original == fileref)
        .map(|m| m.intermediate.clone());
    match intermediate {
        Some(intermediate) => tracker.set_final_name(&intermediate, canonical),
        None => {
            tracker.register_media(fileref, canonical, kind, entity)?;
            tracker.set_final_name(canonical, canonical)
        }
    }
}

/// Convenience wrapper without a fetcher.
pub fn write_archive(
    archive: &mut Archive,
    path: &Path,
    packaging: &PackagingConfig,
) -> Result<PackageSummary> {
    Packager::new(packaging).write(archive, path, None)
}

/// The media-map key a reference already resolves to, if any: the
/// reference text itself, or its basename.
fn carried_key(fileref: &str, media: &BTreeMap<String, Vec<u8>>) -> Option<String> {
    if media.contains_key(fileref) {
        return Some(fileref.to_string());
    }
    let basename = Path::new(fileref).file_name()?.to_string_lossy().into_owned();
    media.contains_key(&basename).then_some(basename)
}

/// Canonical packaged name for the `count`-th fetched media file,
/// keeping the source extension.
fn canonical_media_name(fileref: &str, count: usize) -> String {
    let ext = Path::new(fileref)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    format!("img_{:04}.{}", count, ext)
}

/// Build `Book.XML`: metadata body plus one entity declaration and one
/// reference per fragment, in archive order.
pub fn serialize_manifest(archive: &Archive, packaging: &PackagingConfig) -> String {
    let manifest = &archive.manifest;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<!DOCTYPE book PUBLIC \"{}\" \"{}\" [\n",
        packaging.doctype_public_id, packaging.doctype_system_id
    ));
    for fragment in &archive.fragments {
        out.push_str(&format!(
            "<!ENTITY {} SYSTEM \"{}\">\n",
            fragment.entity, fragment.filename
        ));
    }
    out.push_str("]>\n");

    match &manifest.book_id {
        Some(id) => out.push_str(&format!("<book id=\"{}\">\n", escape_xml(id))),
        None => out.push_str("<book>\n"),
    }
    out.push_str("<bookinfo>\n");
    out.push_str(&format!("<title>{}</title>\n", escape_xml(&manifest.title)));
    if let Some(subtitle) = &manifest.subtitle {
        out.push_str(&format!("<subtitle>{}</subtitle>\n", escape_xml(subtitle)));
    }
    if let Some(author) = &manifest.author {
        out.push_str(&format!("<author>{}</author>\n", escape_xml(author)));
    }
    if let Some(isbn) = &manifest.isbn {
        out.push_str(&format!("<isbn>{}</isbn>\n", escape_xml(isbn)));
    }
    if let Some(publisher) = &manifest.publisher {
        out.push_str(&format!(
            "<publisher>{}</publisher>\n",
            escape_xml(publisher)
        ));
    }
    if let Some(year) = &manifest.copyright {
        out.push_str(&format!(
            "<copyright><year>{}</year></copyright>\n",
            escape_xml(year)
        ));
    }
    if let Some(edition) = &manifest.edition {
        out.push_str(&format!("<edition>{}</edition>\n", escape_xml(edition)));
    }
    if let Some(pubdate) = &manifest.pubdate {
        out.push_str(&format!("<pubdate>{}</pubdate>\n", escape_xml(pubdate)));
    }
    out.push_str("</bookinfo>\n");
    if packaging.include_toc && !archive.fragments.is_empty() {
        let toc = build_toc(archive);
        if let Some(root) = toc.root_element() {
            out.push_str(&serialize_subtree(&toc, root));
            out.push('\n');
        }
    }
    for fragment in &archive.fragments {
        out.push_str(&format!("&{};\n", fragment.entity));
    }
    out.push_str("</book>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::reader::read_archive_from;
    use crate::archive::{Fragment, Manifest};

    fn sample_archive() -> Archive {
        let mut archive = Archive::new(Manifest {
            title: "Sample & Co".to_string(),
            subtitle: Some("Second Series".to_string()),
            isbn: Some("978-1".to_string()),
            publisher: Some("Press".to_string()),
            copyright: Some("2020".to_string()),
            book_id: Some("bk-1".to_string()),
            ..Manifest::default()
        });
        archive.fragments.push(Fragment::from_source(
            "ch0001",
            "ch0001.xml",
            0,
            r#"<chapter id="c1"><title>One</title><para><imagedata fileref="figs/pic.png"/></para></chapter>"#,
        ));
        archive.fragments.push(Fragment::from_source(
            "ch0002",
            "ch0002.xml",
            1,
            r#"<chapter id="c2"><title>Two</title><para>B</para></chapter>"#,
        ));
        archive
    }

    #[test]
    fn test_manifest_serialization() {
        let archive = sample_archive();
        let manifest = serialize_manifest(&archive, &PackagingConfig::default());
        assert!(manifest.contains("<!ENTITY ch0001 SYSTEM \"ch0001.xml\">"));
        assert!(manifest.contains("<!ENTITY ch0002 SYSTEM \"ch0002.xml\">"));
        assert!(manifest.contains("&ch0001;\n&ch0002;"));
        assert!(manifest.contains("<title>Sample &amp; Co</title>"));
        assert!(manifest.contains("<subtitle>Second Series</subtitle>"));
        assert!(manifest.contains("<copyright><year>2020</year></copyright>"));
        assert!(manifest.contains("-//OASIS//DTD DocBook XML V4.5//EN"));
    }

    #[test]
    fn test_manifest_carries_toc() {
        let archive = sample_archive();
        let manifest = serialize_manifest(&archive, &PackagingConfig::default());
        assert!(manifest.contains("<title>Table of Contents</title>"));
        assert!(manifest.contains("<tocentry linkend=\"ch0001\">One</tocentry>"));
        assert!(manifest.contains("<tocentry linkend=\"ch0002\">Two</tocentry>"));

        let mut packaging = PackagingConfig::default();
        packaging.include_toc = false;
        let manifest = serialize_manifest(&archive, &packaging);
        assert!(!manifest.contains("<toc>"));
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut archive = sample_archive();
        archive.media.insert("pic.png".to_string(), vec![1, 2, 3]);
        archive
            .extras
            .insert("notes.txt".to_string(), b"keep me".to_vec());

        let packaging = PackagingConfig::default();
        let mut buffer = std::io::Cursor::new(Vec::new());
        let summary = Packager::new(&packaging)
            .write_to(&mut archive, &mut buffer, None)
            .unwrap();
        assert_eq!(summary.fragments, 2);
        assert_eq!(summary.media, 1);
        assert!(summary.missing_media.is_empty());
        // Carried media keeps its name; the reference now points at its
        // entry under the media directory.
        assert!(
            archive.fragments[0]
                .source
                .contains("fileref=\"multimedia/pic.png\"")
        );

        buffer.set_position(0);
        let (reread, findings) = read_archive_from(buffer, &packaging).unwrap();
        assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
        assert_eq!(reread.manifest.title, "Sample & Co");
        assert_eq!(reread.fragments.len(), 2);
        assert_eq!(reread.fragments[0].entity, "ch0001");
        assert_eq!(reread.media.get("pic.png"), Some(&vec![1, 2, 3]));
        assert_eq!(
            reread.extras.get("notes.txt"),
            Some(&b"keep me".to_vec())
        );
    }

    #[test]
    fn test_fetcher_supplies_missing_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pic.png"), b"png-bytes").unwrap();

        let mut archive = sample_archive();
        let packaging = PackagingConfig::default();
        let mut tracker = ReferenceTracker::new();
        tracker
            .register_media("figs/pic.png", "pic.png", "image", "ch0001")
            .unwrap();

        let mut buffer = std::io::Cursor::new(Vec::new());
        let summary = Packager::new(&packaging)
            .with_fetcher(dir_fetcher(dir.path().to_path_buf()))
            .write_to(&mut archive, &mut buffer, Some(&mut tracker))
            .unwrap();
        assert_eq!(summary.media, 1);
        assert_eq!(tracker.final_name("pic.png"), Some("img_0001.png"));
        // The reference names the canonical packaged entry, scaled to fit.
        let source = &archive.fragments[0].source;
        assert!(source.contains("fileref=\"multimedia/img_0001.png\""));
        assert!(source.contains("width=\"100%\""));
        assert!(source.contains("scalefit=\"1\""));

        buffer.set_position(0);
        let (reread, _) = read_archive_from(buffer, &packaging).unwrap();
        assert!(reread.media.contains_key("img_0001.png"));
    }

    #[test]
    fn test_rewritten_refs_name_real_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pic.png"), b"png-bytes").unwrap();

        let mut archive = sample_archive();
        archive.media.insert("carried.png".to_string(), vec![9]);
        archive.fragments[1] = Fragment::from_source(
            "ch0002",
            "ch0002.xml",
            1,
            r#"<chapter id="c2"><title>Two</title><para><imagedata fileref="art/carried.png"/></para></chapter>"#,
        );

        let packaging = PackagingConfig::default();
        let mut buffer = std::io::Cursor::new(Vec::new());
        Packager::new(&packaging)
            .with_fetcher(dir_fetcher(dir.path().to_path_buf()))
            .write_to(&mut archive, &mut buffer, None)
            .unwrap();

        buffer.set_position(0);
        let (reread, _) = read_archive_from(buffer, &packaging).unwrap();
        for fragment in &reread.fragments {
            let tree = fragment.tree.as_ref().unwrap();
            for id in tree.descendants(tree.document()) {
                let Some(name) = tree.element_name(id) else { continue };
                if !MEDIA_REF_ELEMENTS.contains(&name) {
                    continue;
                }
                let fileref = tree.get_attr(id, "fileref").unwrap();
                let entry = fileref
                    .strip_prefix(&format!("{}/", packaging.media_dir))
                    .unwrap_or_else(|| panic!("not media-dir relative: {}", fileref));
                assert!(
                    reread.media.contains_key(entry),
                    "no package entry for {}",
                    fileref
                );
            }
        }
    }

    #[test]
    fn test_missing_media_is_reported() {
        let mut archive = sample_archive();
        let packaging = PackagingConfig::default();
        let mut buffer = std::io::Cursor::new(Vec::new());
        let summary = Packager::new(&packaging)
            .write_to(&mut archive, &mut buffer, None)
            .unwrap();
        assert_eq!(summary.missing_media, vec!["figs/pic.png"]);
        // An unsupplied reference keeps its original text.
        assert!(archive.fragments[0].source.contains("fileref=\"figs/pic.png\""));
    }

    #[test]
    fn test_zip_fetcher_matches_basename() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("source.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut writer = ZipWriter::new(file);
            writer
                .start_file("assets/deep/pic.png", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"deep-bytes").unwrap();
            writer.finish().unwrap();
        }
        let fetch = zip_fetcher(&zip_path).unwrap();
        assert_eq!(fetch("pic.png"), Some(b"deep-bytes".to_vec()));
        assert_eq!(fetch("assets/deep/pic.png"), Some(b"deep-bytes".to_vec()));
        assert_eq!(fetch("nope.png"), None);
    }
}
