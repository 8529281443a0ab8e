//! Arena-based XML tree for fragment documents.
//!
//! All nodes are stored in a contiguous vector; parent/child/sibling links
//! use indices into this vector. Each node records the source line/column it
//! was parsed from so validation errors point at the fragment's own file.
//! Detached nodes stay in the arena (ids remain stable) but are unreachable
//! from the document root.

pub mod parser;

pub use parser::{XmlParseError, parse_document, serialize_document};

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value for no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_some(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }
}

/// An XML attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// Document root.
    Document,
    /// Element with local name and attributes.
    Element { name: String, attrs: Vec<Attr> },
    /// Text content.
    Text(String),
    /// Comment, preserved through serialization.
    Comment(String),
}

/// A node in the arena tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: NodeId,
    pub first_child: NodeId,
    pub last_child: NodeId,
    pub prev_sibling: NodeId,
    pub next_sibling: NodeId,
    /// 1-based source line, 0 when synthesized by a repair rule.
    pub line: u32,
    /// 1-based source column, 0 when synthesized.
    pub column: u32,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
            line: 0,
            column: 0,
        }
    }
}

/// Arena-allocated XML document tree.
#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
    document: NodeId,
}

impl XmlTree {
    /// Create a new empty tree with a document root.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            document: NodeId::NONE,
        };
        tree.document = tree.alloc(Node::new(NodeData::Document));
        tree
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Get the document root ID.
    pub fn document(&self) -> NodeId {
        self.document
    }

    /// Get the first element child of the document root.
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.document).find(|&id| self.is_element(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get_mut(id.0 as usize)
    }

    /// Create a new element node.
    pub fn create_element(&mut self, name: impl Into<String>, attrs: Vec<Attr>) -> NodeId {
        self.alloc(Node::new(NodeData::Element {
            name: name.into(),
            attrs,
        }))
    }

    /// Create a new text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(Node::new(NodeData::Text(text.into())))
    }

    /// Create a new comment node.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(Node::new(NodeData::Comment(text.into())))
    }

    /// Record the source position of a node.
    pub fn set_position(&mut self, id: NodeId, line: u32, column: u32) {
        if let Some(node) = self.get_mut(id) {
            node.line = line;
            node.column = column;
        }
    }

    /// Source position of a node, if known.
    pub fn position(&self, id: NodeId) -> Option<(u32, u32)> {
        self.get(id)
            .filter(|n| n.line > 0)
            .map(|n| (n.line, n.column))
    }

    /// Append a child to a parent node.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(NodeId::NONE);

        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = parent;
            child_node.prev_sibling = last_child;
            child_node.next_sibling = NodeId::NONE;
        }

        if last_child.is_some()
            && let Some(last_node) = self.get_mut(last_child)
        {
            last_node.next_sibling = child;
        }

        if let Some(parent_node) = self.get_mut(parent) {
            if parent_node.first_child.is_none() {
                parent_node.first_child = child;
            }
            parent_node.last_child = child;
        }
    }

    /// Insert a node before a sibling.
    pub fn insert_before(&mut self, sibling: NodeId, new_node: NodeId) {
        let parent = self.get(sibling).map(|n| n.parent).unwrap_or(NodeId::NONE);
        let prev = self
            .get(sibling)
            .map(|n| n.prev_sibling)
            .unwrap_or(NodeId::NONE);

        if let Some(new) = self.get_mut(new_node) {
            new.parent = parent;
            new.prev_sibling = prev;
            new.next_sibling = sibling;
        }

        if let Some(sib) = self.get_mut(sibling) {
            sib.prev_sibling = new_node;
        }

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = new_node;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.first_child = new_node;
        }
    }

    /// Insert a node after a sibling.
    pub fn insert_after(&mut self, sibling: NodeId, new_node: NodeId) {
        let next = self
            .get(sibling)
            .map(|n| n.next_sibling)
            .unwrap_or(NodeId::NONE);
        if next.is_some() {
            self.insert_before(next, new_node);
        } else {
            let parent = self.get(sibling).map(|n| n.parent).unwrap_or(NodeId::NONE);
            self.append(parent, new_node);
        }
    }

    /// Unlink a node from its parent. The node stays in the arena but is no
    /// longer reachable from the document.
    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = match self.get(id) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return,
        };

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = next;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.first_child = next;
        }

        if next.is_some() {
            if let Some(n) = self.get_mut(next) {
                n.prev_sibling = prev;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.last_child = prev;
        }

        if let Some(node) = self.get_mut(id) {
            node.parent = NodeId::NONE;
            node.prev_sibling = NodeId::NONE;
            node.next_sibling = NodeId::NONE;
        }
    }

    /// Iterate over children of a node.
    pub fn children(&self, parent: NodeId) -> ChildrenIter<'_> {
        let first = self
            .get(parent)
            .map(|n| n.first_child)
            .unwrap_or(NodeId::NONE);
        ChildrenIter {
            tree: self,
            current: first,
        }
    }

    /// Depth-first iterator over every node reachable from the document root,
    /// in document order.
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            result.push(id);
            let mut children: Vec<_> = self.children(id).collect();
            children.reverse();
            stack.extend(children);
        }
        result
    }

    /// Collect all reachable elements with the given local name, in document
    /// order. Repair rules snapshot ids first and mutate afterwards; arena
    /// ids stay valid across detach.
    pub fn elements_named(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.document)
            .into_iter()
            .filter(|&id| self.element_name(id) == Some(tag))
            .collect()
    }

    /// Find the first element matching a predicate (DFS).
    pub fn find<F>(&self, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Node) -> bool,
    {
        self.descendants(self.document)
            .into_iter()
            .find(|&id| self.get(id).is_some_and(&predicate))
    }

    /// Find element by tag name (first match).
    pub fn find_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.find(|node| {
            matches!(&node.data, NodeData::Element { name, .. } if name == tag)
        })
    }

    /// Get element's local name (tag).
    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Rename an element in place.
    pub fn rename_element(&mut self, id: NodeId, new_name: impl Into<String>) {
        if let Some(node) = self.get_mut(id)
            && let NodeData::Element { name, .. } = &mut node.data
        {
            *name = new_name.into();
        }
    }

    /// Get an attribute value.
    pub fn get_attr(&self, id: NodeId, attr_name: &str) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|a| a.name == attr_name)
                .map(|a| a.value.as_str()),
            _ => None,
        })
    }

    /// Set (or replace) an attribute value.
    pub fn set_attr(&mut self, id: NodeId, attr_name: &str, value: impl Into<String>) {
        if let Some(node) = self.get_mut(id)
            && let NodeData::Element { attrs, .. } = &mut node.data
        {
            let value = value.into();
            if let Some(attr) = attrs.iter_mut().find(|a| a.name == attr_name) {
                attr.value = value;
            } else {
                attrs.push(Attr {
                    name: attr_name.to_string(),
                    value,
                });
            }
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Element { .. }))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Text(_)))
    }

    /// Get text content of a text node.
    pub fn text_content(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Concatenated text of all descendant text nodes.
    pub fn inner_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for desc in self.descendants(id) {
            if let Some(text) = self.text_content(desc) {
                out.push_str(text);
            }
        }
        out
    }

    /// Whether an element has any element child or non-whitespace text child.
    pub fn has_content(&self, id: NodeId) -> bool {
        self.children(id).any(|c| {
            self.is_element(c)
                || self
                    .text_content(c)
                    .is_some_and(|t| !t.trim().is_empty())
        })
    }

    /// Names of direct element children, in order.
    pub fn child_element_names(&self, id: NodeId) -> Vec<String> {
        self.children(id)
            .filter_map(|c| self.element_name(c).map(String::from))
            .collect()
    }

    /// Deep-copy the subtree rooted at `id` into a fresh tree whose document
    /// root has the copy as its only child.
    pub fn extract_subtree(&self, id: NodeId) -> XmlTree {
        let mut out = XmlTree::new();
        let root = out.document();
        self.copy_into(id, &mut out, root);
        out
    }

    fn copy_into(&self, id: NodeId, out: &mut XmlTree, out_parent: NodeId) {
        let Some(node) = self.get(id) else { return };
        let copy = match &node.data {
            NodeData::Document => {
                for child in self.children(id).collect::<Vec<_>>() {
                    self.copy_into(child, out, out_parent);
                }
                return;
            }
            NodeData::Element { name, attrs } => out.create_element(name.clone(), attrs.clone()),
            NodeData::Text(t) => out.create_text(t.clone()),
            NodeData::Comment(t) => out.create_comment(t.clone()),
        };
        let (line, column) = (node.line, node.column);
        out.set_position(copy, line, column);
        out.append(out_parent, copy);
        for child in self.children(id).collect::<Vec<_>>() {
            self.copy_into(child, out, copy);
        }
    }
}

impl Default for XmlTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over children of a node.
pub struct ChildrenIter<'a> {
    tree: &'a XmlTree,
    current: NodeId,
}

impl<'a> Iterator for ChildrenIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_none() {
            return None;
        }
        let id = self.current;
        self.current = self
            .tree
            .get(id)
            .map(|n| n.next_sibling)
            .unwrap_or(NodeId::NONE);
        Some(id)
    }
}
