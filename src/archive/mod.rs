//! In-memory model of a book package.
//!
//! A package is a `Book.XML` manifest, one XML fragment per chapter-level
//! unit, and a media directory, all carried in a ZIP archive. [`Archive`]
//! holds the decoded form; [`reader`] and [`writer`] move it in and out of
//! ZIP files, and [`split`] cuts a monolithic document into fragments.

pub mod reader;
pub mod split;
pub mod writer;

use std::collections::BTreeMap;

use crate::dom::XmlTree;
use crate::dom::parser::{XmlParseError, parse_document, serialize_document};

/// One `<!ENTITY name SYSTEM "file">` declaration from the manifest's
/// internal subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: String,
    pub system_id: String,
}

/// Book-level metadata from the manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub title: String,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    /// Copyright year.
    pub copyright: Option<String>,
    pub edition: Option<String>,
    pub pubdate: Option<String>,
    pub book_id: Option<String>,
    /// Fragment entities in declaration order. This order is the canonical
    /// reading order of the book.
    pub entities: Vec<EntityDecl>,
}

/// Structural role of a fragment, taken from its root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Chapter,
    Appendix,
    Preface,
    Glossary,
    Bibliography,
    Index,
    Other,
}

impl FragmentKind {
    pub fn from_root(name: &str) -> FragmentKind {
        match name {
            "chapter" => FragmentKind::Chapter,
            "appendix" => FragmentKind::Appendix,
            "preface" => FragmentKind::Preface,
            "glossary" => FragmentKind::Glossary,
            "bibliography" => FragmentKind::Bibliography,
            "index" => FragmentKind::Index,
            _ => FragmentKind::Other,
        }
    }
}

/// One chapter-level XML file of the package.
///
/// The raw `source` is authoritative for unparsable fragments: when
/// `tree` is `None` the packager writes `source` back unchanged, so a
/// syntax error never silently drops content.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Entity name, e.g. `ch0001`.
    pub entity: String,
    /// File name inside the archive, e.g. `ch0001.xml`.
    pub filename: String,
    pub kind: FragmentKind,
    pub title: Option<String>,
    /// Position in manifest entity order, starting at 0.
    pub order: usize,
    pub source: String,
    pub tree: Option<XmlTree>,
    pub parse_error: Option<XmlParseError>,
}

impl Fragment {
    /// Build a fragment from raw XML text, parsing it and deriving its
    /// kind and title from the tree.
    pub fn from_source(
        entity: impl Into<String>,
        filename: impl Into<String>,
        order: usize,
        source: impl Into<String>,
    ) -> Fragment {
        let source = source.into();
        let mut fragment = Fragment {
            entity: entity.into(),
            filename: filename.into(),
            kind: FragmentKind::Other,
            title: None,
            order,
            source,
            tree: None,
            parse_error: None,
        };
        match parse_document(&fragment.source) {
            Ok(tree) => {
                fragment.adopt_tree(tree);
            }
            Err(err) => fragment.parse_error = Some(err),
        }
        fragment
    }

    /// Build a fragment directly from an already-constructed tree.
    pub fn from_tree(
        entity: impl Into<String>,
        filename: impl Into<String>,
        order: usize,
        tree: XmlTree,
    ) -> Fragment {
        let mut fragment = Fragment {
            entity: entity.into(),
            filename: filename.into(),
            kind: FragmentKind::Other,
            title: None,
            order,
            source: String::new(),
            tree: None,
            parse_error: None,
        };
        fragment.adopt_tree(tree);
        fragment.sync_source();
        fragment
    }

    fn adopt_tree(&mut self, tree: XmlTree) {
        if let Some(root) = tree.root_element() {
            if let Some(name) = tree.element_name(root) {
                self.kind = FragmentKind::from_root(name);
            }
            self.title = tree
                .children(root)
                .find(|&c| tree.element_name(c) == Some("title"))
                .map(|c| tree.inner_text(c))
                .filter(|t| !t.trim().is_empty());
        }
        self.tree = Some(tree);
    }

    /// Refresh `source` from the tree after mutation. No-op for
    /// unparsable fragments, whose raw source stays authoritative.
    pub fn sync_source(&mut self) {
        if let Some(tree) = &self.tree {
            self.source = serialize_document(tree);
            if let Some(root) = tree.root_element() {
                self.title = tree
                    .children(root)
                    .find(|&c| tree.element_name(c) == Some("title"))
                    .map(|c| tree.inner_text(c))
                    .filter(|t| !t.trim().is_empty());
            }
        }
    }

    pub fn is_parsable(&self) -> bool {
        self.tree.is_some()
    }
}

/// A complete decoded package.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub manifest: Manifest,
    /// Fragments in manifest entity order.
    pub fragments: Vec<Fragment>,
    /// Media files keyed by their path under the media directory.
    pub media: BTreeMap<String, Vec<u8>>,
    /// Archive entries that are neither the manifest, a declared
    /// fragment, nor media. Preserved byte-for-byte on repack.
    pub extras: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    pub fn new(manifest: Manifest) -> Archive {
        Archive {
            manifest,
            ..Archive::default()
        }
    }

    pub fn fragment(&self, entity: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.entity == entity)
    }

    pub fn fragment_mut(&mut self, entity: &str) -> Option<&mut Fragment> {
        self.fragments.iter_mut().find(|f| f.entity == entity)
    }

    /// Re-serialize every parsable fragment from its tree.
    pub fn sync_sources(&mut self) {
        for fragment in &mut self.fragments {
            fragment.sync_source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_from_source() {
        let fragment = Fragment::from_source(
            "ch0001",
            "ch0001.xml",
            0,
            r#"<chapter id="c1"><title>Getting Started</title><para>Hi</para></chapter>"#,
        );
        assert!(fragment.is_parsable());
        assert_eq!(fragment.kind, FragmentKind::Chapter);
        assert_eq!(fragment.title.as_deref(), Some("Getting Started"));
    }

    #[test]
    fn test_unparsable_fragment_keeps_source() {
        let raw = "<chapter><para>broken";
        let fragment = Fragment::from_source("ch0002", "ch0002.xml", 1, raw);
        assert!(!fragment.is_parsable());
        assert!(fragment.parse_error.is_some());
        assert_eq!(fragment.source, raw);
        let mut fragment = fragment;
        fragment.sync_source();
        assert_eq!(fragment.source, raw);
    }

    #[test]
    fn test_sync_source_after_mutation() {
        let mut fragment = Fragment::from_source(
            "ap0001",
            "ap0001.xml",
            0,
            "<appendix><title>Old</title></appendix>",
        );
        assert_eq!(fragment.kind, FragmentKind::Appendix);
        let tree = fragment.tree.as_mut().unwrap();
        let root = tree.root_element().unwrap();
        let title = tree
            .children(root)
            .find(|&c| tree.element_name(c) == Some("title"))
            .unwrap();
        let text = tree.get(title).unwrap().first_child;
        if let Some(node) = tree.get_mut(text)
            && let crate::dom::NodeData::Text(t) = &mut node.data
        {
            *t = "New".to_string();
        }
        fragment.sync_source();
        assert!(fragment.source.contains("<title>New</title>"));
        assert_eq!(fragment.title.as_deref(), Some("New"));
    }

    #[test]
    fn test_archive_lookup() {
        let mut archive = Archive::new(Manifest {
            title: "Book".into(),
            ..Manifest::default()
        });
        archive.fragments.push(Fragment::from_source(
            "ch0001",
            "ch0001.xml",
            0,
            "<chapter><title>A</title></chapter>",
        ));
        assert!(archive.fragment("ch0001").is_some());
        assert!(archive.fragment("ch0002").is_none());
    }
}
