//! quick-xml event-loop parser feeding the arena tree, and the inverse
//! serializer.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::dom::{Attr, NodeData, NodeId, XmlTree};
use crate::util::{LineIndex, escape_xml};

/// A syntax error with the position it occurred at.
///
/// Kept separate from [`crate::Error`] so an unparsable fragment can be
/// carried through the pipeline (the validator turns this into a single
/// XML Syntax Error; the packager writes the raw source back unchanged).
#[derive(Debug, Clone)]
pub struct XmlParseError {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl std::fmt::Display for XmlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {})", self.message, line),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Parse an XML document into an arena tree, recording per-node source
/// positions.
pub fn parse_document(source: &str) -> Result<XmlTree, XmlParseError> {
    let index = LineIndex::new(source);
    let mut reader = Reader::from_str(source);

    let mut tree = XmlTree::new();
    let mut stack = vec![tree.document()];

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let elem = create_element_node(&mut tree, e.name().as_ref(), e.attributes());
                let (line, column) = index.locate(pos.min(source.len()));
                tree.set_position(elem, line, column);
                let parent = *stack.last().expect("stack never empty");
                tree.append(parent, elem);
                stack.push(elem);
            }
            Ok(Event::Empty(e)) => {
                let elem = create_element_node(&mut tree, e.name().as_ref(), e.attributes());
                let (line, column) = index.locate(pos.min(source.len()));
                tree.set_position(elem, line, column);
                let parent = *stack.last().expect("stack never empty");
                tree.append(parent, elem);
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                let parent = *stack.last().expect("stack never empty");
                append_text(&mut tree, parent, &text, &index, pos.min(source.len()));
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                let parent = *stack.last().expect("stack never empty");
                append_text(&mut tree, parent, &text, &index, pos.min(source.len()));
            }
            Ok(Event::GeneralRef(e)) => {
                // Resolve the predefined entities; unknown general entities
                // (e.g. &ch0001; in a manifest body) carry no content here.
                let entity = String::from_utf8_lossy(e.as_ref());
                let resolved = match entity.as_ref() {
                    "apos" => "'",
                    "quot" => "\"",
                    "lt" => "<",
                    "gt" => ">",
                    "amp" => "&",
                    _ => "",
                };
                if !resolved.is_empty() {
                    let parent = *stack.last().expect("stack never empty");
                    append_text(&mut tree, parent, resolved, &index, pos.min(source.len()));
                }
            }
            Ok(Event::Comment(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                let comment = tree.create_comment(text);
                let (line, column) = index.locate(pos.min(source.len()));
                tree.set_position(comment, line, column);
                let parent = *stack.last().expect("stack never empty");
                tree.append(parent, comment);
            }
            Ok(Event::Eof) => break,
            // XML declaration, processing instructions, and DOCTYPE carry no
            // tree content.
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) => {}
            Err(e) => {
                let err_pos = reader.error_position() as usize;
                let (line, column) = index.locate(err_pos.min(source.len()));
                return Err(XmlParseError {
                    message: e.to_string(),
                    line: Some(line),
                    column: Some(column),
                });
            }
        }
    }

    if stack.len() > 1 {
        let open = tree
            .element_name(*stack.last().expect("stack never empty"))
            .unwrap_or("?")
            .to_string();
        return Err(XmlParseError {
            message: format!("unexpected end of document, element <{}> not closed", open),
            line: None,
            column: None,
        });
    }

    if tree.root_element().is_none() {
        return Err(XmlParseError {
            message: "document has no root element".to_string(),
            line: None,
            column: None,
        });
    }

    Ok(tree)
}

fn create_element_node(
    tree: &mut XmlTree,
    name: &[u8],
    attributes: quick_xml::events::attributes::Attributes<'_>,
) -> NodeId {
    let name = String::from_utf8_lossy(local_name(name)).into_owned();
    let mut attrs = Vec::new();
    for attr in attributes.flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attrs.push(Attr { name: key, value });
    }
    tree.create_element(name, attrs)
}

fn append_text(tree: &mut XmlTree, parent: NodeId, text: &str, index: &LineIndex, pos: usize) {
    // Merge adjacent text (entity references split runs into pieces)
    let last = tree.get(parent).map(|n| n.last_child).unwrap_or(NodeId::NONE);
    if let Some(node) = tree.get_mut(last)
        && let NodeData::Text(existing) = &mut node.data
    {
        existing.push_str(text);
        return;
    }
    let node = tree.create_text(text);
    let (line, column) = index.locate(pos);
    tree.set_position(node, line, column);
    tree.append(parent, node);
}

/// Extract local name from a potentially namespaced XML name.
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Serialize a tree back to XML text with an XML declaration.
pub fn serialize_document(tree: &XmlTree) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    for child in tree.children(tree.document()) {
        serialize_node(tree, child, &mut out);
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Serialize a single node and its descendants, with no XML declaration.
pub fn serialize_subtree(tree: &XmlTree, id: NodeId) -> String {
    let mut out = String::new();
    serialize_node(tree, id, &mut out);
    out
}

fn serialize_node(tree: &XmlTree, id: NodeId, out: &mut String) {
    let Some(node) = tree.get(id) else { return };
    match &node.data {
        NodeData::Document => {
            for child in tree.children(id) {
                serialize_node(tree, child, out);
            }
        }
        NodeData::Element { name, attrs } => {
            out.push('<');
            out.push_str(name);
            for attr in attrs {
                out.push(' ');
                out.push_str(&attr.name);
                out.push_str("=\"");
                out.push_str(&escape_xml(&attr.value));
                out.push('"');
            }
            if node.first_child.is_none() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in tree.children(id) {
                    serialize_node(tree, child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
        NodeData::Text(text) => {
            out.push_str(
                &text
                    .replace('&', "&amp;")
                    .replace('<', "&lt;")
                    .replace('>', "&gt;"),
            );
        }
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_document() {
        let tree = parse_document("<chapter id=\"c1\"><title>Hi</title><para>Body</para></chapter>")
            .expect("parse failed");
        let root = tree.root_element().unwrap();
        assert_eq!(tree.element_name(root), Some("chapter"));
        assert_eq!(tree.get_attr(root, "id"), Some("c1"));
        assert_eq!(tree.child_element_names(root), vec!["title", "para"]);
    }

    #[test]
    fn test_parse_positions() {
        let source = "<chapter>\n  <title>T</title>\n  <para>P</para>\n</chapter>";
        let tree = parse_document(source).unwrap();
        let title = tree.find_by_tag("title").unwrap();
        let para = tree.find_by_tag("para").unwrap();
        assert_eq!(tree.position(title).unwrap().0, 2);
        assert_eq!(tree.position(para).unwrap().0, 3);
    }

    #[test]
    fn test_parse_entities() {
        let tree = parse_document("<para>Don&apos;t &amp; won&apos;t</para>").unwrap();
        let root = tree.root_element().unwrap();
        assert_eq!(tree.inner_text(root), "Don't & won't");
    }

    #[test]
    fn test_parse_error_has_line() {
        let err = parse_document("<chapter>\n<para>text</wrong>\n</chapter>").unwrap_err();
        assert!(err.line.is_some());
    }

    #[test]
    fn test_parse_unclosed() {
        assert!(parse_document("<chapter><para>text</para>").is_err());
    }

    #[test]
    fn test_serialize_roundtrip_structure() {
        let source = "<chapter id=\"c1\"><title>A &amp; B</title><para/></chapter>";
        let tree = parse_document(source).unwrap();
        let serialized = serialize_document(&tree);
        let reparsed = parse_document(&serialized).unwrap();
        let root = reparsed.root_element().unwrap();
        assert_eq!(reparsed.element_name(root), Some("chapter"));
        assert_eq!(reparsed.child_element_names(root), vec!["title", "para"]);
        assert_eq!(reparsed.inner_text(root), "A & B");
    }

    #[test]
    fn test_serialize_escapes_attrs() {
        let mut tree = XmlTree::new();
        let elem = tree.create_element(
            "ulink",
            vec![Attr {
                name: "url".into(),
                value: "a&b<c".into(),
            }],
        );
        tree.append(tree.document(), elem);
        let out = serialize_document(&tree);
        assert!(out.contains("url=\"a&amp;b&lt;c\""));
    }

    #[test]
    fn test_doctype_is_skipped() {
        let source = "<?xml version=\"1.0\"?>\n<!DOCTYPE chapter SYSTEM \"book.dtd\">\n<chapter><title/></chapter>";
        let tree = parse_document(source).unwrap();
        assert_eq!(
            tree.element_name(tree.root_element().unwrap()),
            Some("chapter")
        );
    }
}
