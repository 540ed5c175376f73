//! Parsed document representation.
//!
//! A [`ContentTree`] is the transient output of parsing: a root node plus
//! nested sections mirroring the source's heading structure. Trees are
//! consumed once by the store's chunking write path and then dropped —
//! the store, not the tree, is the durable artifact.

/// A node in a parsed document tree. Sections carry their body text
/// (the paragraphs between their heading and the next heading); interior
/// nodes may have empty text and only children.
#[derive(Debug, Clone)]
pub struct ContentNode {
    /// Source-relative identity, unique within the document
    /// (e.g. `"intro/getting-started"`).
    pub id: String,
    pub title: String,
    /// Body text owned by this node, if any.
    pub text: Option<String>,
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Document-order traversal of this node and everything below it.
    /// Lazy and restartable: each call returns a fresh iterator over the
    /// same finite tree.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

/// Depth-first, document-order iterator over a subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a ContentNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a ContentNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push children in reverse so they pop in document order.
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// A fully parsed document: the root node plus its source URI.
#[derive(Debug, Clone)]
pub struct ContentTree {
    pub source_uri: String,
    pub root: ContentNode,
}

impl ContentTree {
    pub fn title(&self) -> &str {
        &self.root.title
    }

    /// Total number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.root.descendants().count()
    }

    /// Number of section nodes below the root.
    pub fn section_count(&self) -> usize {
        self.node_count().saturating_sub(1)
    }
}
