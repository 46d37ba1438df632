//! Section tree: the hierarchical outline a document is generated from.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. A parent owns the
//! ordered list of its children's ids; the `parent` field is only a lookup
//! index used for path reconstruction and upward traversal. The shape is
//! fixed once generation starts; passes only mutate `content`, `status` and
//! the bookkeeping fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle to a node within one [`SectionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Generating,
    Generated,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Failed => "failed",
        }
    }

    /// `Generated` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Generated | Self::Failed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionNode {
    pub title: String,
    /// Outline level, 1 for roots.
    pub level: usize,
    /// Position among siblings, in document order.
    pub order: usize,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub content: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Generation attempts spent on this node in its last pass.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub differentiated: bool,
}

impl SectionNode {
    fn new(title: String, level: usize, order: usize, parent: Option<NodeId>) -> Self {
        Self {
            title,
            level,
            order,
            children: Vec::new(),
            parent,
            content: String::new(),
            status: NodeStatus::Pending,
            error: None,
            attempts: 0,
            differentiated: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Per-status node counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub generating: usize,
    pub generated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionTree {
    nodes: Vec<SectionNode>,
    roots: Vec<NodeId>,
}

impl SectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, title: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let order = self.roots.len();
        self.nodes.push(SectionNode::new(title.into(), 1, order, None));
        self.roots.push(id);
        id
    }

    /// Append a child under `parent`. Its level is always `parent.level + 1`.
    pub fn add_child(&mut self, parent: NodeId, title: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent_node = &self.nodes[parent.0];
        let level = parent_node.level + 1;
        let order = parent_node.children.len();
        self.nodes
            .push(SectionNode::new(title.into(), level, order, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Panics if `id` did not come from this tree.
    pub fn node(&self, id: NodeId) -> &SectionNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SectionNode {
        &mut self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id.0].is_leaf()
    }

    /// Depth from the top of the tree; roots are depth 1.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 1;
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            depth += 1;
            cur = self.parent(p);
        }
        depth
    }

    /// Titles from the root down to `id`, inclusive.
    pub fn path(&self, id: NodeId) -> Vec<String> {
        let mut path = vec![self.nodes[id.0].title.clone()];
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            path.push(self.nodes[p.0].title.clone());
            cur = self.parent(p);
        }
        path.reverse();
        path
    }

    /// All ids in document (pre-)order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        out
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.is_leaf(*id))
            .collect()
    }

    /// Internal nodes grouped by depth, each group in document order.
    pub fn internal_by_depth(&self) -> BTreeMap<usize, Vec<NodeId>> {
        let mut levels: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for id in self.preorder() {
            if !self.is_leaf(id) {
                levels.entry(self.depth(id)).or_default().push(id);
            }
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn internal_count(&self) -> usize {
        self.nodes.len() - self.leaf_count()
    }

    pub fn max_depth(&self) -> usize {
        self.preorder()
            .into_iter()
            .map(|id| self.depth(id))
            .max()
            .unwrap_or(0)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for node in &self.nodes {
            match node.status {
                NodeStatus::Pending => counts.pending += 1,
                NodeStatus::Generating => counts.generating += 1,
                NodeStatus::Generated => counts.generated += 1,
                NodeStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Put nodes left mid-flight by an interrupted run back to `Pending`.
    /// Returns how many were reset.
    pub fn reset_interrupted(&mut self) -> usize {
        let mut reset = 0;
        for node in &mut self.nodes {
            if node.status == NodeStatus::Generating {
                node.status = NodeStatus::Pending;
                reset += 1;
            }
        }
        reset
    }

    /// Hierarchical section numbers ("1", "1.2", "1.2.1") indexed like the arena.
    pub fn section_numbers(&self) -> Vec<String> {
        let mut numbers = vec![String::new(); self.nodes.len()];
        for id in self.preorder() {
            let node = &self.nodes[id.0];
            let own = (node.order + 1).to_string();
            numbers[id.0] = match node.parent {
                Some(p) => format!("{}.{}", numbers[p.0], own),
                None => own,
            };
        }
        numbers
    }

    /// Indented, numbered rendering of the outline.
    pub fn render_outline(&self) -> String {
        let numbers = self.section_numbers();
        let mut out = String::new();
        for id in self.preorder() {
            let node = &self.nodes[id.0];
            out.push_str(&"  ".repeat(node.level.saturating_sub(1)));
            out.push_str(&numbers[id.0]);
            out.push(' ');
            out.push_str(&node.title);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 A
    ///   1.1 A1
    ///     1.1.1 A1a
    ///   1.2 A2
    /// 2 B
    fn sample() -> (SectionTree, [NodeId; 5]) {
        let mut tree = SectionTree::new();
        let a = tree.add_root("A");
        let a1 = tree.add_child(a, "A1");
        let a1a = tree.add_child(a1, "A1a");
        let a2 = tree.add_child(a, "A2");
        let b = tree.add_root("B");
        (tree, [a, a1, a1a, a2, b])
    }

    #[test]
    fn test_shape_and_counts() {
        let (tree, [a, a1, a1a, a2, b]) = sample();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.roots(), &[a, b]);
        assert_eq!(tree.children(a), &[a1, a2]);
        assert_eq!(tree.parent(a1a), Some(a1));
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.internal_count(), 2);
        assert_eq!(tree.leaf_count() + tree.internal_count(), tree.len());
        assert!(tree.is_leaf(b));
        assert!(!tree.is_leaf(a1));
        assert_eq!(tree.node(a2).order, 1);
        assert_eq!(tree.node(a1a).level, 3);
    }

    #[test]
    fn test_traversals_follow_document_order() {
        let (tree, [a, a1, a1a, a2, b]) = sample();
        assert_eq!(tree.preorder(), vec![a, a1, a1a, a2, b]);
        assert_eq!(tree.leaves(), vec![a1a, a2, b]);
        let levels = tree.internal_by_depth();
        assert_eq!(levels.get(&1), Some(&vec![a]));
        assert_eq!(levels.get(&2), Some(&vec![a1]));
        assert_eq!(levels.get(&3), None);
        assert_eq!(tree.max_depth(), 3);
    }

    #[test]
    fn test_depth_path_and_numbers() {
        let (tree, [a, _a1, a1a, a2, b]) = sample();
        assert_eq!(tree.depth(a), 1);
        assert_eq!(tree.depth(a1a), 3);
        assert_eq!(tree.path(a1a), vec!["A", "A1", "A1a"]);
        let numbers = tree.section_numbers();
        assert_eq!(numbers[a1a.index()], "1.1.1");
        assert_eq!(numbers[a2.index()], "1.2");
        assert_eq!(numbers[b.index()], "2");
    }

    #[test]
    fn test_reset_interrupted() {
        let (mut tree, [a, a1, _a1a, a2, _b]) = sample();
        tree.node_mut(a1).status = NodeStatus::Generating;
        tree.node_mut(a2).status = NodeStatus::Generated;
        tree.node_mut(a).status = NodeStatus::Generating;
        assert_eq!(tree.reset_interrupted(), 2);
        let counts = tree.status_counts();
        assert_eq!(counts.generating, 0);
        assert_eq!(counts.generated, 1);
        assert_eq!(counts.pending, 4);
    }

    #[test]
    fn test_snapshot_round_trip_keeps_links() {
        let (mut tree, [_a, a1, a1a, ..]) = sample();
        tree.node_mut(a1a).content = "body".to_string();
        let json = serde_json::to_string(&tree).unwrap();
        let restored: SectionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, tree);
        assert_eq!(restored.parent(a1a), Some(a1));
    }

    #[test]
    fn test_render_outline() {
        let (tree, _) = sample();
        assert_eq!(
            tree.render_outline(),
            "1 A\n  1.1 A1\n    1.1.1 A1a\n  1.2 A2\n2 B\n"
        );
    }
}
