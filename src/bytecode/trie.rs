//! Handler name trie
//!
//! Prefix trie over the registered handler names. Nodes are stored in an
//! arena and reference their parent by index, so the graph carries no
//! ownership cycles. Edges keep insertion order, which fixes the order in
//! which sibling subtrees are emitted.
//!
//! A node may be terminal and still have children: with `On` and `OnMy`
//! registered, the `n` node ends `On` and continues into `M`.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use super::compiler::{CompileError, CompileResult};

/// Index of a node in the trie arena
pub type NodeId = usize;

/// A single trie node
#[derive(Debug, Clone)]
pub struct TrieNode {
    /// Character on the edge into this node (`None` for the root)
    ch: Option<char>,
    /// Full handler name if a name ends exactly here
    name: Option<Arc<str>>,
    /// Outgoing edges in insertion order
    edges: SmallVec<[(char, NodeId); 4]>,
    /// Parent back-reference
    parent: Option<NodeId>,
    depth: usize,
}

impl TrieNode {
    fn new(ch: Option<char>, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            ch,
            name: None,
            edges: SmallVec::new(),
            parent,
            depth,
        }
    }

    #[inline]
    pub fn ch(&self) -> Option<char> {
        self.ch
    }

    /// Name terminating at this node
    #[inline]
    pub fn terminal(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.name.is_some()
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Outgoing edges in insertion order
    pub fn edges(&self) -> &[(char, NodeId)] {
        &self.edges
    }

    fn child(&self, ch: char) -> Option<NodeId> {
        self.edges.iter().find(|(c, _)| *c == ch).map(|&(_, id)| id)
    }
}

/// Prefix trie over handler names
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<TrieNode>,
}

impl Trie {
    /// Id of the root node
    pub const ROOT: NodeId = 0;

    /// Build a trie from a sequence of names
    pub fn build<I, S>(names: I) -> CompileResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut builder = TrieBuilder::new();
        for name in names {
            builder.insert(name)?;
        }
        Ok(builder.finish())
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &TrieNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn root(&self) -> &TrieNode {
        &self.nodes[Self::ROOT]
    }

    /// Number of nodes, including the root
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no name has been inserted
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Number of siblings of a node (including itself)
    pub fn sibling_count(&self, id: NodeId) -> usize {
        match self.nodes[id].parent {
            Some(parent) => self.nodes[parent].edges.len(),
            None => 1,
        }
    }

    /// Look up the node reached by walking `name` from the root
    pub fn find(&self, name: &str) -> Option<NodeId> {
        name.chars()
            .try_fold(Self::ROOT, |id, ch| self.nodes[id].child(ch))
    }

    /// Check if `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|id| self.nodes[id].is_terminal())
    }

    /// Registered names in preorder
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names = Vec::new();
        self.visit_preorder(Self::ROOT, &mut |node| {
            if let Some(name) = node.terminal() {
                names.push(name.clone());
            }
        });
        names
    }

    /// Number of nodes in each node's subtree (the node itself included)
    ///
    /// Children are always allocated after their parent, so a single reverse
    /// sweep accumulates every subtree.
    pub fn subtree_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![1usize; self.nodes.len()];
        for id in (1..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[id].parent {
                sizes[parent] += sizes[id];
            }
        }
        sizes
    }

    fn visit_preorder(&self, id: NodeId, f: &mut impl FnMut(&TrieNode)) {
        let node = &self.nodes[id];
        f(node);
        for &(_, child) in node.edges.iter() {
            self.visit_preorder(child, f);
        }
    }
}

/// Incremental trie construction
#[derive(Debug)]
pub struct TrieBuilder {
    nodes: Vec<TrieNode>,
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::new(None, None, 0)],
        }
    }

    /// Insert a handler name, extending the trie as needed
    pub fn insert(&mut self, name: impl Into<Arc<str>>) -> CompileResult<NodeId> {
        let name: Arc<str> = name.into();
        if name.is_empty() {
            return Err(CompileError::EmptyHandlerName);
        }

        let mut current = Trie::ROOT;
        for ch in name.chars() {
            current = match self.nodes[current].child(ch) {
                Some(next) => next,
                None => {
                    let id = self.nodes.len();
                    let depth = self.nodes[current].depth + 1;
                    self.nodes.push(TrieNode::new(Some(ch), Some(current), depth));
                    self.nodes[current].edges.push((ch, id));
                    id
                }
            };
        }

        let node = &mut self.nodes[current];
        if node.name.is_some() {
            return Err(CompileError::DuplicateHandlerName(name.to_string()));
        }
        node.name = Some(name);
        Ok(current)
    }

    pub fn finish(self) -> Trie {
        debug!(
            target: "hookdispatch::trie",
            nodes = self.nodes.len(),
            "trie built"
        );
        Trie { nodes: self.nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_prefix_nodes() {
        let trie = Trie::build(["OnMy", "OnYour"]).unwrap();
        // root + O n M y + Y o u r
        assert_eq!(trie.len(), 9);
        let n = trie.find("On").unwrap();
        assert_eq!(trie.node(n).edges().len(), 2);
        assert!(!trie.node(n).is_terminal());
        assert!(trie.contains("OnMy"));
        assert!(trie.contains("OnYour"));
        assert!(!trie.contains("OnM"));
    }

    #[test]
    fn test_prefix_name_is_terminal_with_children() {
        let trie = Trie::build(["On", "OnMy"]).unwrap();
        let n = trie.find("On").unwrap();
        assert!(trie.node(n).is_terminal());
        assert_eq!(trie.node(n).edges().len(), 1);
        assert!(trie.contains("On"));
        assert!(trie.contains("OnMy"));
    }

    #[test]
    fn test_longer_name_first_still_marks_prefix() {
        let trie = Trie::build(["OnMy", "On"]).unwrap();
        assert!(trie.contains("On"));
        assert_eq!(trie.node(trie.find("On").unwrap()).terminal().map(|s| &**s), Some("On"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = Trie::build(["OnMy", "OnYour", "OnMy"]).unwrap_err();
        assert_eq!(err, CompileError::DuplicateHandlerName("OnMy".to_string()));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Trie::build([""]).unwrap_err();
        assert_eq!(err, CompileError::EmptyHandlerName);
    }

    #[test]
    fn test_edges_keep_insertion_order() {
        let trie = Trie::build(["b", "a", "c"]).unwrap();
        let chars: Vec<char> = trie.root().edges().iter().map(|&(c, _)| c).collect();
        assert_eq!(chars, vec!['b', 'a', 'c']);
        assert_eq!(trie.names().iter().map(|s| &**s).collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_subtree_sizes_and_siblings() {
        let trie = Trie::build(["ab", "ac", "d"]).unwrap();
        let sizes = trie.subtree_sizes();
        assert_eq!(sizes[Trie::ROOT], trie.len());
        let a = trie.find("a").unwrap();
        assert_eq!(sizes[a], 3);
        assert_eq!(trie.sibling_count(a), 2);
        assert_eq!(trie.sibling_count(trie.find("ab").unwrap()), 2);
        assert_eq!(trie.node(trie.find("ab").unwrap()).depth(), 2);
    }

    #[test]
    fn test_non_ascii_names() {
        let trie = Trie::build(["Grüße", "Grün"]).unwrap();
        assert!(trie.contains("Grüße"));
        assert!(trie.contains("Grün"));
        assert!(!trie.contains("Grü"));
    }
}
