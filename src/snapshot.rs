//! Clade bitmaps for a pair of trees over the same leaf labels.
//!
//! # Overview
//! A [`PairSnapshot`] gives both trees one shared leaf index space and records,
//! for every node, the clade (leaves below it) and its complement as
//! [`Bitset`]s. The snapshot is immutable once built, so the pairwise
//! analysis can read it from many threads.
//!
//! # Leaf indices
//! Leaves of the first (reference) tree are numbered `1..=N` in post-order;
//! leaves of the second tree take the index of the tree-1 leaf with the same
//! label.
//!
//! ```text
//!   tree 1:      root             tree 2:      root
//!               /    \                        /    \
//!             n1      n2                    m1      m2
//!            /  \    /  \                  /  \    /  \
//!           A    B  C    D                A    C  B    D
//!           1    2  3    4                1    3  2    4
//! ```
//!
//! | Node | Clade     | Complement |
//! |------|-----------|------------|
//! | n1   | `{1-2}`   | `{3-4}`    |
//! | n2   | `{3-4}`   | `{1-2}`    |
//! | m1   | `{1,3}`   | `{2,4}`    |
//! | m2   | `{2,4}`   | `{1,3}`    |
//!
//! # Why labels, not node ids
//! Node ids are arena positions and differ between trees. Labels are the only
//! thing the two trees share, so each leaf label must occur exactly once in
//! each tree, and both trees must carry the same label set.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::bitset::Bitset;
use crate::tree::{NodeId, Tree};

/// Which tree of the pair a node or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    First,
    Second,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::First => write!(f, "tree 1"),
            Side::Second => write!(f, "tree 2"),
        }
    }
}

/// The two trees cannot be compared because their leaf labels disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("leaf label '{label}' occurs more than once in {side}")]
    DuplicateLabel { label: String, side: Side },

    #[error("leaf label '{0}' of tree 2 does not occur in tree 1")]
    UnknownLabel(String),

    #[error("leaf label '{0}' of tree 1 does not occur in tree 2")]
    MissingLabel(String),
}

/// Clade information of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeClade {
    /// The node in its own tree's arena.
    pub node: NodeId,
    /// Identifier assigned during preprocessing: the leaf index for leaves
    /// (equal across both trees), `N + k` for the k-th internal node visited.
    pub id: usize,
    pub clade: Bitset,
    pub clade_comp: Bitset,
}

/// Clades of every node of one tree, stored in post-order.
#[derive(Debug, Clone)]
pub struct TreeClades {
    nodes: Vec<NodeClade>,
    position: HashMap<NodeId, usize>,
}

impl TreeClades {
    /// All nodes in post-order (children before parents).
    pub fn postorder(&self) -> &[NodeClade] {
        &self.nodes
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeClade> {
        self.position.get(&node).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Shared leaf indexing plus per-node clade bitmaps of two trees.
#[derive(Debug, Clone)]
pub struct PairSnapshot {
    /// Leaf label → index in `[1, N]`.
    pub leaf_index: HashMap<String, usize>,
    /// The full universe `{1, ..., N}`, computed once per pair.
    pub universe: Bitset,
    pub first: TreeClades,
    pub second: TreeClades,
    labels: Vec<String>,
}

impl PairSnapshot {
    /// Builds the shared leaf index and the clade bitmaps of both trees.
    ///
    /// # Algorithm
    /// 1. Walk tree 1 in post-order, numbering its leaves `1..=N`.
    /// 2. Walk each tree in post-order; a leaf's clade is its own bit, an
    ///    internal node's clade is the union of its children's clades.
    /// 3. Every complement is `universe \ clade`.
    ///
    /// # Errors
    /// [`SnapshotError`] if a leaf label is repeated within a tree, or if the
    /// two trees do not have the same label set.
    pub fn from_trees(first: &Tree, second: &Tree) -> Result<Self, SnapshotError> {
        let mut leaf_index = HashMap::new();
        let mut labels = Vec::new();
        for leaf in first.leaves(first.root()) {
            let label = &first[leaf].label;
            if leaf_index.insert(label.clone(), labels.len() + 1).is_some() {
                return Err(SnapshotError::DuplicateLabel {
                    label: label.clone(),
                    side: Side::First,
                });
            }
            labels.push(label.clone());
        }

        let num_leaves = labels.len();
        let universe = Bitset::full(num_leaves);
        let mut internal = 0;

        let first_clades = compute_clades(first, &universe, num_leaves, &mut internal, |label| {
            Ok(leaf_index[label])
        })?;

        let mut seen = HashSet::with_capacity(num_leaves);
        let second_clades = compute_clades(second, &universe, num_leaves, &mut internal, |label| {
            let idx = *leaf_index
                .get(label)
                .ok_or_else(|| SnapshotError::UnknownLabel(label.to_string()))?;
            if !seen.insert(idx) {
                return Err(SnapshotError::DuplicateLabel {
                    label: label.to_string(),
                    side: Side::Second,
                });
            }
            Ok(idx)
        })?;

        if seen.len() < num_leaves {
            let missing = (1..=num_leaves).find(|idx| !seen.contains(idx)).unwrap_or(1);
            return Err(SnapshotError::MissingLabel(labels[missing - 1].clone()));
        }

        debug!(
            num_leaves,
            first_nodes = first_clades.len(),
            second_nodes = second_clades.len(),
            "built clade bitmaps"
        );

        Ok(PairSnapshot {
            leaf_index,
            universe,
            first: first_clades,
            second: second_clades,
            labels,
        })
    }

    /// N, the number of leaves shared by both trees.
    pub fn num_leaves(&self) -> usize {
        self.labels.len()
    }

    /// Label of the leaf with index `idx` (1-based).
    pub fn leaf_label(&self, idx: usize) -> Option<&str> {
        idx.checked_sub(1)
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    pub fn clades(&self, side: Side) -> &TreeClades {
        match side {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }
}

/// Post-order pass computing every clade bottom-up; each clade is built once
/// from the already finished clades of the node's children.
fn compute_clades<F>(
    tree: &Tree,
    universe: &Bitset,
    num_leaves: usize,
    internal: &mut usize,
    mut leaf_index: F,
) -> Result<TreeClades, SnapshotError>
where
    F: FnMut(&str) -> Result<usize, SnapshotError>,
{
    let mut nodes: Vec<NodeClade> = Vec::new();
    let mut position: HashMap<NodeId, usize> = HashMap::new();

    for node in tree.postorder(tree.root()) {
        let (id, clade) = if tree[node].is_leaf() {
            let idx = leaf_index(&tree[node].label)?;
            (idx, std::iter::once(idx).collect::<Bitset>())
        } else {
            let mut clade = Bitset::new();
            for child in tree[node].children() {
                clade.or_assign(&nodes[position[child]].clade);
            }
            *internal += 1;
            (num_leaves + *internal, clade)
        };

        let clade_comp = universe.and_not(&clade);
        position.insert(node, nodes.len());
        nodes.push(NodeClade {
            node,
            id,
            clade,
            clade_comp,
        });
    }

    Ok(TreeClades { nodes, position })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_newick;
    use itertools::Itertools;

    const TREEDIST_TREES: [&str; 6] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "((C,D,E),(A,(B,F),(G,(H,I,J))));",
    ];

    fn snapshot(a: &str, b: &str) -> (Tree, Tree, PairSnapshot) {
        let t1 = parse_newick(a).unwrap();
        let t2 = parse_newick(b).unwrap();
        let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();
        (t1, t2, snap)
    }

    fn bits(bs: &Bitset) -> Vec<usize> {
        bs.iter().collect()
    }

    /// ```text
    ///   tree 1: ((A,B),(C,D))        tree 2: ((A,C),(B,D))
    /// ```
    ///
    /// Leaves are numbered by tree 1: A=1, B=2, C=3, D=4.
    #[test]
    fn test_leaf_indices_follow_tree1_postorder() {
        let (_, t2, snap) = snapshot("((A,B),(C,D));", "((A,C),(B,D));");
        assert_eq!(snap.num_leaves(), 4);
        assert_eq!(snap.leaf_index["A"], 1);
        assert_eq!(snap.leaf_index["D"], 4);
        assert_eq!(snap.leaf_label(3), Some("C"));
        assert_eq!(snap.leaf_label(0), None);

        let m1 = t2[t2.root()].children()[0];
        let m1 = snap.second.get(m1).unwrap();
        assert_eq!(bits(&m1.clade), vec![1, 3]);
        assert_eq!(bits(&m1.clade_comp), vec![2, 4]);
    }

    #[test]
    fn test_root_is_full_universe() {
        let (t1, t2, snap) = snapshot("((A,B),(C,D));", "((A,C),(B,D));");
        for (tree, side) in [(&t1, Side::First), (&t2, Side::Second)] {
            let root = snap.clades(side).get(tree.root()).unwrap();
            assert_eq!(root.clade, snap.universe);
            assert!(root.clade_comp.is_empty());
            // the root comes last in post-order
            assert_eq!(snap.clades(side).postorder().last().unwrap().node, tree.root());
        }
    }

    #[test]
    fn test_ids() {
        let (t1, t2, snap) = snapshot("((A,B),(C,D));", "((A,C),(B,D));");
        let id_of = |tree: &Tree, side: Side, label: &str| {
            let leaf = tree.leaves(tree.root()).find(|&l| tree[l].label == label).unwrap();
            snap.clades(side).get(leaf).unwrap().id
        };
        for label in ["A", "B", "C", "D"] {
            assert_eq!(id_of(&t1, Side::First, label), id_of(&t2, Side::Second, label));
        }

        let internal: Vec<usize> = snap
            .first
            .postorder()
            .iter()
            .chain(snap.second.postorder())
            .filter(|c| c.id > 4)
            .map(|c| c.id)
            .collect();
        assert_eq!(internal, vec![5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_invariants_on_treedist_pairs() {
        for pair in TREEDIST_TREES.iter().combinations(2) {
            let (t1, t2, snap) = snapshot(pair[0], pair[1]);
            let n = snap.num_leaves();
            assert_eq!(n, 10);

            for (tree, side) in [(&t1, Side::First), (&t2, Side::Second)] {
                let clades = snap.clades(side);
                assert_eq!(clades.len(), tree.num_nodes());

                // leaf count: one distinct bit per leaf, N in total
                let mut leaf_bits = Bitset::new();
                for leaf in tree.leaves(tree.root()) {
                    let c = clades.get(leaf).unwrap();
                    assert_eq!(c.clade.count_ones(), 1);
                    leaf_bits.or_assign(&c.clade);
                }
                assert_eq!(leaf_bits, snap.universe);

                for c in clades.postorder() {
                    // clade union
                    let node = &tree[c.node];
                    if !node.is_leaf() {
                        let mut union = Bitset::new();
                        for &child in node.children() {
                            union.or_assign(&clades.get(child).unwrap().clade);
                        }
                        assert_eq!(union, c.clade);
                    }
                    // complement
                    assert!(!c.clade.intersects(&c.clade_comp));
                    let mut all = c.clade.clone();
                    all.or_assign(&c.clade_comp);
                    assert_eq!(all, snap.universe);
                }
            }

            // post-order numbering makes every tree-1 clade a single run
            assert!(snap.first.postorder().iter().all(|c| c.clade.run_count() == 1));
        }
    }

    #[test]
    fn test_single_leaf_trees() {
        let (_, _, snap) = snapshot("A;", "A;");
        assert_eq!(snap.num_leaves(), 1);
        assert_eq!(snap.first.len(), 1);
        assert!(snap.first.postorder()[0].clade_comp.is_empty());
    }

    #[test]
    fn test_label_errors() {
        let err = |a: &str, b: &str| {
            let (t1, t2) = (parse_newick(a).unwrap(), parse_newick(b).unwrap());
            PairSnapshot::from_trees(&t1, &t2).unwrap_err()
        };
        assert_eq!(
            err("((A,B),A);", "((A,B),C);"),
            SnapshotError::DuplicateLabel { label: "A".into(), side: Side::First }
        );
        assert_eq!(
            err("((A,B),C);", "((A,B),B);"),
            SnapshotError::DuplicateLabel { label: "B".into(), side: Side::Second }
        );
        assert_eq!(err("((A,B),C);", "((A,B),X);"), SnapshotError::UnknownLabel("X".into()));
        assert_eq!(err("((A,B),C);", "(A,B);"), SnapshotError::MissingLabel("C".into()));
        assert_eq!(
            err("((A,B),C);", "((A,B),X);").to_string(),
            "leaf label 'X' of tree 2 does not occur in tree 1"
        );
    }
}
