//! The standard repair rules, in their standard order.

use crate::dom::{NodeData, NodeId, XmlTree};
use crate::grammar::{AttrDefault, Dtd};

use super::{FixRecord, RepairRule};

/// The full rule set. Order matters: structural removals come first so
/// later rules never operate on elements that are about to disappear,
/// and markup stripping runs last over whatever remains.
pub fn default_rules() -> Vec<Box<dyn RepairRule>> {
    vec![
        Box::new(RemoveEmptyMedia),
        Box::new(DemoteFigure),
        Box::new(RemoveEmptyRow),
        Box::new(FlattenNestedPara),
        Box::new(InsertMissingTitle),
        Box::new(WrapChapterIntro),
        Box::new(SetTgroupCols),
        Box::new(StripForeignMarkup),
    ]
}

/// The standard rules plus the grammar-driven ones. Required-attribute
/// insertion slots in after the column counter so a `tgroup` gets its
/// computed `cols` rather than a placeholder.
pub fn grammar_rules(dtd: Dtd) -> Vec<Box<dyn RepairRule>> {
    vec![
        Box::new(RemoveEmptyMedia),
        Box::new(DemoteFigure),
        Box::new(RemoveEmptyRow),
        Box::new(FlattenNestedPara),
        Box::new(InsertMissingTitle),
        Box::new(WrapChapterIntro),
        Box::new(SetTgroupCols),
        Box::new(InsertRequiredAttr { dtd }),
        Box::new(StripForeignMarkup),
    ]
}

fn line_of(tree: &XmlTree, id: NodeId) -> Option<u32> {
    tree.position(id).map(|(line, _)| line)
}

fn make_record(
    rule: &'static str,
    entity: &str,
    element: &str,
    line: Option<u32>,
    description: String,
) -> FixRecord {
    FixRecord {
        rule,
        entity: entity.to_string(),
        element: element.to_string(),
        line,
        description,
        needs_verification: false,
        reason: None,
        suggestion: None,
    }
}

/// A record for a content-changing fix, carrying why it needs human
/// verification and what to do about it.
fn make_flagged(
    rule: &'static str,
    entity: &str,
    element: &str,
    line: Option<u32>,
    description: String,
    reason: &str,
    suggestion: &str,
) -> FixRecord {
    FixRecord {
        rule,
        entity: entity.to_string(),
        element: element.to_string(),
        line,
        description,
        needs_verification: true,
        reason: Some(reason.to_string()),
        suggestion: Some(suggestion.to_string()),
    }
}

fn child_ids(tree: &XmlTree, parent: NodeId) -> Vec<NodeId> {
    tree.children(parent).collect()
}

/// Hoist an element's children into its place, then drop the element.
fn unwrap_element(tree: &mut XmlTree, id: NodeId) {
    for child in child_ids(tree, id) {
        tree.detach(child);
        tree.insert_before(id, child);
    }
    tree.detach(id);
}

fn insert_first(tree: &mut XmlTree, parent: NodeId, node: NodeId) {
    let first = tree.get(parent).map(|n| n.first_child);
    match first {
        Some(first) if first.is_some() => tree.insert_before(first, node),
        _ => tree.append(parent, node),
    }
}

fn has_descendant_named(tree: &XmlTree, id: NodeId, names: &[&str]) -> bool {
    tree.descendants(id)
        .into_iter()
        .any(|d| tree.element_name(d).is_some_and(|n| names.contains(&n)))
}

/// Rule 1: a `mediaobject` whose image data carries no usable `fileref`
/// is a placeholder with nothing to render; remove it.
struct RemoveEmptyMedia;

const MEDIA_DATA: &[&str] = &["imagedata", "videodata", "audiodata"];

impl RepairRule for RemoveEmptyMedia {
    fn name(&self) -> &'static str {
        "remove-empty-mediaobject"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for name in ["mediaobject", "inlinemediaobject"] {
            for id in tree.elements_named(name) {
                let has_source = tree.descendants(id).into_iter().any(|d| {
                    tree.element_name(d).is_some_and(|n| MEDIA_DATA.contains(&n))
                        && tree
                            .get_attr(d, "fileref")
                            .is_some_and(|v| !v.trim().is_empty())
                });
                if !has_source {
                    records.push(make_flagged(
                        self.name(),
                        entity,
                        name,
                        line_of(tree, id),
                        format!("Removed {} with no media source", name),
                        "The element referenced no media file and rendered as nothing",
                        "Restore the media reference if an image was meant to appear here",
                    ));
                    tree.detach(id);
                }
            }
        }
        records
    }
}

/// Rule 2: a `figure` that contains no media is not a figure. A figure
/// whose title marks it as a table stand-in becomes a `para` carrying
/// its content. Otherwise remaining content is hoisted into its place,
/// and a figure with nothing left is dropped entirely.
struct DemoteFigure;

impl RepairRule for DemoteFigure {
    fn name(&self) -> &'static str {
        "demote-empty-figure"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for id in tree.elements_named("figure") {
            if has_descendant_named(
                tree,
                id,
                &["mediaobject", "inlinemediaobject", "graphic", "imagedata"],
            ) {
                continue;
            }
            let line = line_of(tree, id);
            let title = tree
                .children(id)
                .find(|&c| tree.element_name(c) == Some("title"));
            let title_text = title.map(|t| tree.inner_text(t)).unwrap_or_default();
            let content: Vec<NodeId> = child_ids(tree, id)
                .into_iter()
                .filter(|&c| {
                    if tree.element_name(c) == Some("title") {
                        return false;
                    }
                    match tree.get(c).map(|n| &n.data) {
                        Some(NodeData::Text(text)) => !text.trim().is_empty(),
                        Some(_) => true,
                        None => false,
                    }
                })
                .collect();
            if title_text.to_lowercase().contains("table") {
                // Conversion upstream wraps tabular matter in a figure
                // captioned "Table N"; turn it into a paragraph.
                let attrs: Vec<crate::dom::Attr> = tree
                    .get(id)
                    .map(|n| match &n.data {
                        NodeData::Element { attrs, .. } => attrs.clone(),
                        _ => Vec::new(),
                    })
                    .unwrap_or_default();
                let para = tree.create_element("para", attrs);
                if let Some(title) = title {
                    for c in child_ids(tree, title) {
                        tree.detach(c);
                        tree.append(para, c);
                    }
                }
                for c in content {
                    tree.detach(c);
                    tree.append(para, c);
                }
                tree.insert_before(id, para);
                tree.detach(id);
                records.push(make_flagged(
                    self.name(),
                    entity,
                    "figure",
                    line,
                    format!("Converted figure titled '{}' to para", title_text.trim()),
                    "A figure without media but titled as a table is a conversion leftover",
                    "Rebuild this as a real table if the tabular data still exists",
                ));
            } else if content.is_empty() {
                records.push(make_flagged(
                    self.name(),
                    entity,
                    "figure",
                    line,
                    "Removed empty figure".to_string(),
                    "The figure held no media and no other content",
                    "Restore the figure with its image if one was meant to appear here",
                ));
                tree.detach(id);
            } else {
                for c in content {
                    tree.detach(c);
                    tree.insert_before(id, c);
                }
                tree.detach(id);
                records.push(make_flagged(
                    self.name(),
                    entity,
                    "figure",
                    line,
                    "Unwrapped figure without media content".to_string(),
                    "A figure with no media cannot pass validation",
                    "Check that the hoisted content still reads correctly in place",
                ));
            }
        }
        records
    }
}

/// Rule 3: table rows with no entries violate the table grammar and
/// render as nothing; remove them.
struct RemoveEmptyRow;

impl RepairRule for RemoveEmptyRow {
    fn name(&self) -> &'static str {
        "remove-empty-row"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for id in tree.elements_named("row") {
            if tree.child_element_names(id).is_empty() {
                records.push(make_flagged(
                    self.name(),
                    entity,
                    "row",
                    line_of(tree, id),
                    "Removed row with no entries".to_string(),
                    "A row with no entries violates the table grammar",
                    "Re-add the row with its entries if data was lost upstream",
                ));
                tree.detach(id);
            }
        }
        records
    }
}

/// Rule 4: a `para` nested inside another `para` is flattened into its
/// parent, preserving its content in place.
struct FlattenNestedPara;

impl RepairRule for FlattenNestedPara {
    fn name(&self) -> &'static str {
        "flatten-nested-para"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        loop {
            let nested = tree.elements_named("para").into_iter().find(|&id| {
                tree.get(id)
                    .map(|n| n.parent)
                    .is_some_and(|p| tree.element_name(p) == Some("para"))
            });
            let Some(id) = nested else { break };
            records.push(make_flagged(
                self.name(),
                entity,
                "para",
                line_of(tree, id),
                "Flattened para nested inside para".to_string(),
                "Paragraphs cannot nest; the inner one was merged into its parent",
                "Split the text into sibling paragraphs if a break was intended",
            ));
            unwrap_element(tree, id);
        }
        records
    }
}

/// Rule 5: structural elements that require a title get an empty one,
/// flagged for a human to fill in. An empty `<title/>` satisfies the
/// grammar without injecting visible placeholder text into the book.
struct InsertMissingTitle;

const TITLED: &[&str] = &[
    "chapter", "appendix", "preface", "sect1", "sect2", "sect3", "sect4", "sect5", "figure",
    "table", "example",
];

impl RepairRule for InsertMissingTitle {
    fn name(&self) -> &'static str {
        "insert-missing-title"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for name in TITLED {
            for id in tree.elements_named(name) {
                let has_title = tree
                    .children(id)
                    .any(|c| tree.element_name(c) == Some("title"));
                if has_title {
                    continue;
                }
                records.push(make_flagged(
                    self.name(),
                    entity,
                    name,
                    line_of(tree, id),
                    format!("Inserted empty title into {}", name),
                    "The element requires a title and had none",
                    "Write a descriptive title if one is appropriate",
                ));
                let title = tree.create_element("title", Vec::new());
                insert_first(tree, id, title);
            }
        }
        records
    }
}

/// Rule 6: in a sectioned chapter, loose content sitting directly under
/// the `chapter` (paragraphs, lists, and the like) is gathered into an
/// introduction `sect1`. Chapters with no sections are left alone; their
/// direct content may be legal under the grammar.
struct WrapChapterIntro;

const CHAPTER_DIRECT: &[&str] = &[
    "title",
    "subtitle",
    "titleabbrev",
    "chapterinfo",
    "toc",
    "lot",
    "index",
    "glossary",
    "bibliography",
    "sect1",
];

const MAX_ID_LEN: usize = 24;

impl RepairRule for WrapChapterIntro {
    fn name(&self) -> &'static str {
        "wrap-chapter-intro"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for chapter in tree.elements_named("chapter") {
            let sectioned = tree
                .children(chapter)
                .any(|c| tree.element_name(c) == Some("sect1"));
            if !sectioned {
                continue;
            }
            let loose: Vec<NodeId> = child_ids(tree, chapter)
                .into_iter()
                .filter(|&c| {
                    tree.element_name(c)
                        .is_some_and(|n| !CHAPTER_DIRECT.contains(&n))
                })
                .collect();
            let Some(&first) = loose.first() else { continue };

            let base = tree
                .get_attr(chapter, "id")
                .map(String::from)
                .unwrap_or_else(|| entity.to_string());
            let mut intro_id = format!("{}-intro", base);
            intro_id.truncate(MAX_ID_LEN);

            records.push(make_flagged(
                self.name(),
                entity,
                "chapter",
                line_of(tree, first),
                format!(
                    "Wrapped {} loose element(s) into sect1 '{}'",
                    loose.len(),
                    intro_id
                ),
                "A sectioned chapter cannot also hold loose content directly",
                "Move the wrapped content into the right section if one exists",
            ));

            let sect = tree.create_element(
                "sect1",
                vec![crate::dom::Attr {
                    name: "id".to_string(),
                    value: intro_id,
                }],
            );
            tree.insert_before(first, sect);
            let title = tree.create_element("title", Vec::new());
            let text = tree.create_text("Introduction");
            tree.append(title, text);
            tree.append(sect, title);
            for c in loose {
                tree.detach(c);
                tree.append(sect, c);
            }
        }
        records
    }
}

/// Rule 7: `tgroup` must declare how many columns its rows have. Count
/// the entries of the first row and set `cols` accordingly.
struct SetTgroupCols;

impl RepairRule for SetTgroupCols {
    fn name(&self) -> &'static str {
        "set-tgroup-cols"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for id in tree.elements_named("tgroup") {
            let first_row = tree
                .descendants(id)
                .into_iter()
                .find(|&d| tree.element_name(d) == Some("row"));
            let cols = first_row
                .map(|row| {
                    tree.child_element_names(row)
                        .iter()
                        .filter(|n| *n == "entry" || *n == "entrytbl")
                        .count()
                })
                .filter(|&n| n > 0)
                .unwrap_or(1);
            let value = cols.to_string();
            if tree.get_attr(id, "cols") == Some(value.as_str()) {
                continue;
            }
            records.push(make_record(
                self.name(),
                entity,
                "tgroup",
                line_of(tree, id),
                format!("Set cols=\"{}\" on tgroup", value),
            ));
            tree.set_attr(id, "cols", value);
        }
        records
    }
}

/// Grammar-driven rule: an element missing an attribute its declaration
/// marks `#REQUIRED` gets a placeholder value so the document can pass
/// validation, flagged for a human to supply the real one. The first
/// enumerated value is used when the declaration enumerates; otherwise
/// the literal `placeholder`.
struct InsertRequiredAttr {
    dtd: Dtd,
}

impl RepairRule for InsertRequiredAttr {
    fn name(&self) -> &'static str {
        "insert-required-attribute"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        for id in tree.descendants(tree.document()) {
            let Some(name) = tree.element_name(id).map(String::from) else {
                continue;
            };
            for decl in self.dtd.attributes(&name) {
                if decl.default != AttrDefault::Required || tree.get_attr(id, &decl.name).is_some()
                {
                    continue;
                }
                let value = decl
                    .values
                    .as_ref()
                    .and_then(|v| v.first().cloned())
                    .unwrap_or_else(|| "placeholder".to_string());
                records.push(make_flagged(
                    self.name(),
                    entity,
                    &name,
                    line_of(tree, id),
                    format!(
                        "Inserted required attribute {}=\"{}\" on {}",
                        decl.name, value, name
                    ),
                    "The declaration marks this attribute #REQUIRED and it was missing",
                    "Replace the placeholder with the real value",
                ));
                tree.set_attr(id, &decl.name, value);
            }
        }
        records
    }
}

/// Rule 8: leftover HTML markup from upstream conversion. Container tags
/// are unwrapped, presentational tags are dropped, and `p` becomes
/// `para`.
struct StripForeignMarkup;

const FOREIGN_UNWRAP: &[&str] = &["html", "body", "div", "span"];
const FOREIGN_DROP: &[&str] = &["br", "hr", "style", "script"];

impl RepairRule for StripForeignMarkup {
    fn name(&self) -> &'static str {
        "strip-html-markup"
    }

    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord> {
        let mut records = Vec::new();
        // Unwrapping can expose further foreign markup, so sweep until
        // the tree stops changing.
        loop {
            let target = tree.descendants(tree.document()).into_iter().find(|&d| {
                tree.element_name(d)
                    .is_some_and(|n| FOREIGN_UNWRAP.contains(&n) || FOREIGN_DROP.contains(&n) || n == "p")
            });
            let Some(id) = target else { break };
            let name = tree.element_name(id).unwrap_or_default().to_string();
            let line = line_of(tree, id);
            if FOREIGN_DROP.contains(&name.as_str()) {
                records.push(make_flagged(
                    self.name(),
                    entity,
                    &name,
                    line,
                    format!("Removed <{}> element", name),
                    "HTML markup left over from conversion has no place in the book grammar",
                    "Check that no meaningful content was carried by the removed element",
                ));
                tree.detach(id);
            } else if name == "p" {
                records.push(make_flagged(
                    self.name(),
                    entity,
                    "p",
                    line,
                    "Renamed <p> to <para>".to_string(),
                    "HTML paragraphs survive conversion as <p>",
                    "Confirm the renamed paragraph is valid where it sits",
                ));
                tree.rename_element(id, "para");
            } else {
                records.push(make_flagged(
                    self.name(),
                    entity,
                    &name,
                    line,
                    format!("Unwrapped <{}> container", name),
                    "HTML containers left over from conversion have no place in the book grammar",
                    "Check that the unwrapped content still reads correctly in place",
                ));
                unwrap_element(tree, id);
            }
        }
        records
    }
}
