//! Splitting a monolithic book document into a packaged archive.
//!
//! Conversion upstream often produces one large `<book>` file. Splitting
//! cuts each chapter-level child into its own fragment, assigns entity
//! names, and carries the book metadata into the manifest.

use crate::archive::{Archive, Fragment, Manifest};
use crate::config::PackagingConfig;
use crate::dom::XmlTree;
use crate::dom::parser::parse_document;
use crate::error::{Error, Result};

/// Root element names that become their own fragment.
const SPLITTABLE: &[&str] = &[
    "chapter",
    "appendix",
    "preface",
    "glossary",
    "bibliography",
    "index",
];

/// Book children that feed the manifest rather than a fragment.
const METADATA: &[&str] = &["bookinfo", "info", "title", "subtitle"];

/// A non-fatal oddity found while splitting.
#[derive(Debug, Clone)]
pub struct SplitWarning {
    pub message: String,
    pub line: Option<u32>,
}

impl std::fmt::Display for SplitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {})", self.message, line),
            None => f.write_str(&self.message),
        }
    }
}

/// Split one monolithic document into an archive of fragments.
pub fn split_document(
    source: &str,
    packaging: &PackagingConfig,
) -> Result<(Archive, Vec<SplitWarning>)> {
    let tree = parse_document(source)
        .map_err(|e| Error::InvalidPackage(format!("cannot split document: {}", e)))?;
    let root = tree
        .root_element()
        .ok_or_else(|| Error::InvalidPackage("document has no root element".to_string()))?;

    let mut warnings = Vec::new();
    if tree.element_name(root) != Some("book") {
        warnings.push(SplitWarning {
            message: format!(
                "root element is <{}>, expected <book>",
                tree.element_name(root).unwrap_or("?")
            ),
            line: tree.position(root).map(|(l, _)| l),
        });
    }

    let mut manifest = Manifest {
        book_id: tree.get_attr(root, "id").map(String::from),
        ..Manifest::default()
    };
    // Metadata lives in <bookinfo> (or DocBook 5's <info>), with the
    // title sometimes directly under <book> instead.
    let info = tree.children(root).find(|&c| {
        matches!(tree.element_name(c), Some("bookinfo") | Some("info"))
    });
    let scope = info.unwrap_or(root);
    let field = |tag: &str| {
        tree.children(scope)
            .find(|&c| tree.element_name(c) == Some(tag))
            .or_else(|| {
                tree.children(root)
                    .find(|&c| tree.element_name(c) == Some(tag))
            })
            .map(|c| tree.inner_text(c))
            .filter(|t| !t.trim().is_empty())
    };
    manifest.title = field("title").unwrap_or_default();
    manifest.subtitle = field("subtitle");
    manifest.author = field("author").map(|t| {
        t.split_whitespace().collect::<Vec<_>>().join(" ")
    });
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
    if manifest.title.is_empty() {
        warnings.push(SplitWarning {
            message: "book has no title".to_string(),
            line: None,
        });
    }

    let mut archive = Archive::new(manifest);
    for child in tree.children(root) {
        let Some(name) = tree.element_name(child) else {
            continue;
        };
        if METADATA.contains(&name) {
            continue;
        }
        if SPLITTABLE.contains(&name) {
            let number = archive.fragments.len() + 1;
            let entity = packaging.entity_name(number);
            let filename = packaging.fragment_filename(number);
            let subtree = tree.extract_subtree(child);
            archive.fragments.push(Fragment::from_tree(
                entity,
                filename,
                number - 1,
                subtree,
            ));
        } else {
            warnings.push(SplitWarning {
                message: format!("skipped <{}> directly under <book>", name),
                line: tree.position(child).map(|(l, _)| l),
            });
        }
    }

    if archive.fragments.is_empty() {
        warnings.push(SplitWarning {
            message: "book contains no chapter-level content".to_string(),
            line: None,
        });
    }
    Ok((archive, warnings))
}

/// Build a table-of-contents tree over an archive: one `<tocentry>` per
/// fragment, in reading order, linked by entity name.
pub fn build_toc(archive: &Archive) -> XmlTree {
    let mut toc = XmlTree::new();
    let root = toc.create_element("toc", Vec::new());
    let document = toc.document();
    toc.append(document, root);
    let heading = toc.create_element("title", Vec::new());
    let heading_text = toc.create_text("Table of Contents");
    toc.append(heading, heading_text);
    toc.append(root, heading);
    for fragment in &archive.fragments {
        let entry = toc.create_element(
            "tocentry",
            vec![crate::dom::Attr {
                name: "linkend".to_string(),
                value: fragment.entity.clone(),
            }],
        );
        let text = toc.create_text(
            fragment
                .title
                .clone()
                .unwrap_or_else(|| fragment.entity.clone()),
        );
        toc.append(entry, text);
        toc.append(root, entry);
    }
    toc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FragmentKind;
    use crate::dom::parser::serialize_document;

    const BOOK: &str = r#"<book id="bk-9">
<bookinfo>
<title>Split Me</title>
<subtitle>A Worked Example</subtitle>
<author><firstname>Ada</firstname> <surname>Byron</surname></author>
<isbn>978-2</isbn>
<publishername>Press</publishername>
<copyright><year>2019</year><holder>Press</holder></copyright>
<pubdate>2019-05-01</pubdate>
</bookinfo>
<chapter id="c1"><title>One</title><para>A</para></chapter>
<chapter id="c2"><title>Two</title><para>B</para></chapter>
<appendix id="a1"><title>Extras</title><para>C</para></appendix>
</book>"#;

    #[test]
    fn test_split_book() {
        let (archive, warnings) = split_document(BOOK, &PackagingConfig::default()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert_eq!(archive.manifest.title, "Split Me");
        assert_eq!(
            archive.manifest.subtitle.as_deref(),
            Some("A Worked Example")
        );
        assert_eq!(archive.manifest.author.as_deref(), Some("Ada Byron"));
        assert_eq!(archive.manifest.publisher.as_deref(), Some("Press"));
        assert_eq!(archive.manifest.copyright.as_deref(), Some("2019"));
        assert_eq!(archive.manifest.pubdate.as_deref(), Some("2019-05-01"));
        assert_eq!(archive.manifest.book_id.as_deref(), Some("bk-9"));
        assert_eq!(archive.fragments.len(), 3);
        assert_eq!(archive.fragments[0].entity, "ch0001");
        assert_eq!(archive.fragments[0].kind, FragmentKind::Chapter);
        assert_eq!(archive.fragments[2].entity, "ch0003");
        assert_eq!(archive.fragments[2].kind, FragmentKind::Appendix);
        assert!(archive.fragments[1].source.contains("<para>B</para>"));
    }

    #[test]
    fn test_split_reads_info_container() {
        let source = r#"<book>
<info><title>Modern</title><subtitle>Fifth</subtitle></info>
<chapter><title>C</title><para>x</para></chapter>
</book>"#;
        let (archive, warnings) =
            split_document(source, &PackagingConfig::default()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert_eq!(archive.manifest.title, "Modern");
        assert_eq!(archive.manifest.subtitle.as_deref(), Some("Fifth"));
    }

    #[test]
    fn test_split_keeps_book_level_subtitle() {
        let source = r#"<book>
<title>T</title>
<subtitle>Kept</subtitle>
<titleabbrev>T.</titleabbrev>
<chapter><title>C</title><para>x</para></chapter>
</book>"#;
        let (archive, warnings) =
            split_document(source, &PackagingConfig::default()).unwrap();
        assert_eq!(archive.manifest.subtitle.as_deref(), Some("Kept"));
        // A child neither split nor carried is called out, not dropped
        // silently.
        assert!(
            warnings
                .iter()
                .any(|w| w.message.contains("<titleabbrev>"))
        );
    }

    #[test]
    fn test_split_warns_on_unknown_children() {
        let source = "<book><title>T</title><chapter><title>C</title></chapter><para>stray</para></book>";
        let (archive, warnings) =
            split_document(source, &PackagingConfig::default()).unwrap();
        assert_eq!(archive.fragments.len(), 1);
        assert!(warnings.iter().any(|w| w.message.contains("<para>")));
    }

    #[test]
    fn test_split_rejects_malformed_input() {
        assert!(split_document("<book><chapter>", &PackagingConfig::default()).is_err());
    }

    #[test]
    fn test_split_empty_book_warns() {
        let (archive, warnings) =
            split_document("<book><title>T</title></book>", &PackagingConfig::default())
                .unwrap();
        assert!(archive.fragments.is_empty());
        assert!(
            warnings
                .iter()
                .any(|w| w.message.contains("no chapter-level content"))
        );
    }

    #[test]
    fn test_build_toc() {
        let (archive, _) = split_document(BOOK, &PackagingConfig::default()).unwrap();
        let toc = build_toc(&archive);
        let out = serialize_document(&toc);
        assert!(out.contains("<title>Table of Contents</title>"));
        assert!(out.contains("<tocentry linkend=\"ch0001\">One</tocentry>"));
        assert!(out.contains("<tocentry linkend=\"ch0003\">Extras</tocentry>"));
    }
}
