//! Rooted tree model backed by an arena.
//!
//! # Overview
//! A [`Tree`] owns every one of its nodes in a single `Vec<Node>`; nodes refer
//! to each other through [`NodeId`] indices. Children are owned through the
//! parent's ordered child list, and the parent link is a plain index used only
//! for upward navigation.
//!
//! ```text
//!            root (0)
//!           /        \
//!        n1 (1)      D (4)
//!        /    \
//!     A (2)   B (3)
//! ```
//!
//! Dropping a [`Tree`] frees the whole arena at once, so arbitrarily deep
//! (caterpillar) trees never recurse on destruction.
//!
//! # Detached nodes
//! [`Tree::remove_child`] only unlinks a node. The node and its subtree stay in
//! the arena as a separate component rooted at the detached node, and can be
//! re-attached with [`Tree::add_subtree`]. Nodes of different components are
//! "in different trees" as far as [`Tree::get_lca_with`] is concerned.

use std::collections::HashSet;
use std::iter::FusedIterator;
use std::ops::{Index, IndexMut};

use thiserror::Error;

/// Index of a node inside its [`Tree`] arena.
pub type NodeId = usize;

/// Structural errors raised by tree mutation and navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0} does not exist in this tree")]
    UnknownNode(NodeId),

    #[error("cannot insert at index {index}: node {parent} has {len} children")]
    IndexOutOfRange { parent: NodeId, index: usize, len: usize },

    #[error("node {child} is not a child of node {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0} already has a parent")]
    AlreadyAttached(NodeId),

    #[error("attaching node {child} below node {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    /// The two nodes do not share a root, so they have no common ancestor.
    #[error("nodes {0} and {1} belong to different trees")]
    DifferentTrees(NodeId, NodeId),
}

/// A tree node: label, length of the edge to its parent, and its links.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub label: String,
    pub branch_length: f64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new() -> Self {
        Node {
            label: String::new(),
            branch_length: 0.0,
            parent: None,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in their significant (serialization) order.
    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// True iff the node has no parent.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True iff the node has no children.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree. The tree is identified with its root node; every other
/// node reachable from the root is owned through its parent's child list.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates a tree made of a single unlabeled root.
    pub fn new() -> Self {
        Tree {
            nodes: vec![Node::new()],
            root: 0,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Number of arena slots, detached components included.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes reachable from the root.
    pub fn num_nodes(&self) -> usize {
        self.postorder(self.root).count()
    }

    /// Number of leaves in the subtree rooted at `from`.
    pub fn num_leaves(&self, from: NodeId) -> usize {
        self.leaves(from).count()
    }

    /// Leaves of the subtree rooted at `from`, in post-order.
    pub fn leaves(&self, from: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.postorder(from).filter(|&id| self.nodes[id].is_leaf())
    }

    fn check(&self, id: NodeId) -> Result<(), TreeError> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(TreeError::UnknownNode(id))
        }
    }

    fn alloc(&mut self) -> NodeId {
        self.nodes.push(Node::new());
        self.nodes.len() - 1
    }

    /// Appends a new node as last child of `parent` and returns it.
    ///
    /// # Panics
    /// If `parent` is not a node of this tree, like slice indexing. Use
    /// [`Tree::insert_child`] to get a [`TreeError`] instead.
    pub fn add_child(&mut self, parent: NodeId) -> NodeId {
        assert!(parent < self.nodes.len(), "node {parent} does not exist in this tree");
        let id = self.alloc();
        self.nodes[id].parent = Some(parent);
        self.nodes[parent].children.push(id);
        id
    }

    /// Inserts a new node as child of `parent` at position `index`
    /// (`index == num_children` appends).
    pub fn insert_child(&mut self, parent: NodeId, index: usize) -> Result<NodeId, TreeError> {
        self.check(parent)?;
        let len = self.nodes[parent].children.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange { parent, index, len });
        }
        let id = self.alloc();
        self.nodes[id].parent = Some(parent);
        self.nodes[parent].children.insert(index, id);
        Ok(id)
    }

    /// Attaches the detached subtree rooted at `child` as last child of `parent`.
    pub fn add_subtree(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.check(parent)?;
        self.check(child)?;
        if self.nodes[child].parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }
        if self.has_ancestor(parent, child) {
            return Err(TreeError::Cycle { parent, child });
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        if child == self.root {
            self.root = self.component_root(parent);
        }
        Ok(())
    }

    /// Detaches `child` from `parent` without dropping it; the child becomes
    /// the root of its own component.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.check(parent)?;
        let pos = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;
        self.nodes[parent].children.remove(pos);
        self.nodes[child].parent = None;
        Ok(())
    }

    /// Detaches every child of `node` and returns them in their former order.
    pub fn remove_all_children(&mut self, node: NodeId) -> Result<Vec<NodeId>, TreeError> {
        self.check(node)?;
        let children = std::mem::take(&mut self.nodes[node].children);
        for &c in &children {
            self.nodes[c].parent = None;
        }
        Ok(children)
    }

    /// Sibling of `id` when its parent has exactly two children, `None` otherwise.
    pub fn get_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(id)?.parent?;
        match self.nodes[parent].children.as_slice() {
            &[a, b] if a == id => Some(b),
            &[a, b] if b == id => Some(a),
            _ => None,
        }
    }

    /// Next child of `id`'s parent, `None` for the root and for a last child.
    pub fn get_right_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(id)?.parent?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Root of the component containing `id`.
    pub fn component_root(&self, mut id: NodeId) -> NodeId {
        while let Some(p) = self.nodes[id].parent {
            id = p;
        }
        id
    }

    /// True iff `ancestor` lies on the path from `node` to its root, both ends included.
    pub fn has_ancestor(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Lowest common ancestor of `a` and `b`.
    ///
    /// Walks both ancestor chains, O(depth). Nodes in different components
    /// (e.g. one of them was detached with [`Tree::remove_child`]) have no
    /// common ancestor and yield [`TreeError::DifferentTrees`].
    ///
    /// Both ids must come from this `Tree`. A [`NodeId`] is an index into the
    /// arena and carries no tree identity: an id taken from another `Tree` is
    /// reported as [`TreeError::UnknownNode`] when it is out of range, and
    /// otherwise names whatever node of this tree has that index, so the
    /// result is meaningless.
    pub fn get_lca_with(&self, a: NodeId, b: NodeId) -> Result<NodeId, TreeError> {
        self.check(a)?;
        self.check(b)?;

        let mut visited = HashSet::new();
        let mut cur = Some(a);
        while let Some(id) = cur {
            visited.insert(id);
            cur = self.nodes[id].parent;
        }

        let mut cur = Some(b);
        while let Some(id) = cur {
            if visited.contains(&id) {
                return Ok(id);
            }
            cur = self.nodes[id].parent;
        }
        Err(TreeError::DifferentTrees(a, b))
    }

    /// Lazy post-order traversal of the subtree rooted at `from`.
    ///
    /// Each call starts a fresh traversal. Mutating the tree between two
    /// traversals is fine; the borrow checker rules out mutation during one.
    pub fn postorder(&self, from: NodeId) -> PostOrder<'_> {
        let stack = if from < self.nodes.len() {
            vec![(from, 0)]
        } else {
            Vec::new()
        };
        PostOrder { tree: self, stack }
    }

    /// The post-order sequence of `from`'s subtree, materialized so the
    /// caller can mutate the tree while walking it.
    pub fn postordered_nodes(&self, from: NodeId) -> Vec<NodeId> {
        self.postorder(from).collect()
    }

    /// Inserts a degree-2 node between `v` and its parent, at `v`'s position,
    /// and returns it. Does nothing and returns `None` for a root.
    pub fn subdivide_parent_edge(&mut self, v: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(v)?.parent?;
        let pos = self.nodes[parent].children.iter().position(|&c| c == v)?;

        let w = self.alloc();
        self.nodes[parent].children[pos] = w;
        self.nodes[w].parent = Some(parent);
        self.nodes[w].children.push(v);
        self.nodes[v].parent = Some(w);
        Some(w)
    }

    /// Replaces `v` by its children in its parent's child list and detaches
    /// `v`. Does nothing for a root.
    pub fn contract_parent_edge(&mut self, v: NodeId) {
        let Some(parent) = self.nodes.get(v).and_then(|n| n.parent) else {
            return;
        };
        let Some(pos) = self.nodes[parent].children.iter().position(|&c| c == v) else {
            return;
        };

        let children = std::mem::take(&mut self.nodes[v].children);
        for &c in &children {
            self.nodes[c].parent = Some(parent);
        }
        self.nodes[parent].children.splice(pos..=pos, children);
        self.nodes[v].parent = None;
    }

    /// Makes `v` the root by reversing every parent link between `v` and the
    /// current root. Each former ancestor becomes the last child of the node
    /// below it on the path, and every reversed edge keeps its length.
    pub fn reroot_on_node(&mut self, v: NodeId) {
        if v >= self.nodes.len() {
            return;
        }
        let mut path = vec![v];
        let mut cur = v;
        while let Some(p) = self.nodes[cur].parent {
            path.push(p);
            cur = p;
        }
        if cur != self.root {
            return;
        }

        for i in (1..path.len()).rev() {
            let (upper, lower) = (path[i], path[i - 1]);
            self.nodes[upper].children.retain(|&c| c != lower);
            self.nodes[lower].parent = None;
            self.nodes[lower].children.push(upper);
            self.nodes[upper].parent = Some(lower);
            self.nodes[upper].branch_length = self.nodes[lower].branch_length;
        }
        self.nodes[v].branch_length = 0.0;
        self.root = v;
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

/// Post-order iterator returned by [`Tree::postorder`].
///
/// Holds the path from the traversal root to the current node together with
/// the index of the next child to descend into.
#[derive(Debug, Clone)]
pub struct PostOrder<'a> {
    tree: &'a Tree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for PostOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let (id, next_child) = *self.stack.last()?;
            match self.tree.nodes[id].children.get(next_child) {
                Some(&child) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.1 += 1;
                    }
                    self.stack.push((child, 0));
                }
                None => {
                    self.stack.pop();
                    return Some(id);
                }
            }
        }
    }
}

impl FusedIterator for PostOrder<'_> {}
