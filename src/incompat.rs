//! Pairwise clade incompatibility between two trees.
//!
//! Every node `v` splits the leaf set into its clade and the complement. For
//! a node `v1` of tree 1 and a node `v2` of tree 2, with
//!
//! ```text
//! A = clade(v1)   B = clade_comp(v1)   C = clade(v2)   D = clade_comp(v2)
//! ```
//!
//! we count how many of `A∩C`, `A∩D`, `B∩C`, `B∩D` are non-empty. The pair is
//! compatible iff the count is 2 or 3. When one side is the whole leaf set
//! (a root), its complement is empty and the bipartition is trivial; such a
//! pair is compatible regardless of the count.
//!
//! # Example
//! ```text
//! Tree 1:  ((1,2),(3,4))      Tree 2:  ((1,3),(2,4))
//!
//! {1,2}|{3,4} vs {1,3}|{2,4}:
//!   A∩C = {1}   A∩D = {2}   B∩C = {3}   B∩D = {4}   → 4, incompatible
//! ```
//!
//! The result is an [`IncompatibilityRelation`]: for each tree-1 node, the
//! tree-2 nodes it conflicts with, ready to be read as a bipartite conflict
//! graph.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::snapshot::{NodeClade, PairSnapshot, SnapshotError, TreeClades};
use crate::tree::{NodeId, Tree};

/// Number of non-empty intersections among `{A,B} × {C,D}`, in `0..=4`.
#[inline]
pub fn intersection_count(v1: &NodeClade, v2: &NodeClade) -> u8 {
    let (a, b) = (&v1.clade, &v1.clade_comp);
    let (c, d) = (&v2.clade, &v2.clade_comp);
    [a.intersects(c), a.intersects(d), b.intersects(c), b.intersects(d)]
        .into_iter()
        .filter(|&hit| hit)
        .count() as u8
}

/// True iff the bipartitions of `v1` and `v2` can coexist in one tree.
#[inline]
pub fn is_compatible(v1: &NodeClade, v2: &NodeClade) -> bool {
    if v1.clade_comp.is_empty() || v2.clade_comp.is_empty() {
        return true;
    }
    matches!(intersection_count(v1, v2), 2 | 3)
}

/// Tree-2 nodes incompatible with `v1`, in tree-2 post-order.
fn incompatible_row(v1: &NodeClade, second: &TreeClades) -> Vec<NodeId> {
    second
        .postorder()
        .iter()
        .filter(|v2| !is_compatible(v1, v2))
        .map(|v2| v2.node)
        .collect()
}

/// Incompatibility relation between the nodes of two trees.
///
/// Rows are keyed by tree-1 nodes in tree-1 post-order; only nodes with at
/// least one incompatible partner get a row. Each row lists tree-2 nodes in
/// tree-2 post-order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncompatibilityRelation {
    rows: Vec<(NodeId, Vec<NodeId>)>,
    index: HashMap<NodeId, usize>,
}

impl IncompatibilityRelation {
    fn from_rows(rows: Vec<(NodeId, Vec<NodeId>)>) -> Self {
        let index = rows.iter().enumerate().map(|(i, (v1, _))| (*v1, i)).collect();
        IncompatibilityRelation { rows, index }
    }

    /// Tree-2 nodes incompatible with `v1`; empty if there are none.
    pub fn get(&self, v1: NodeId) -> &[NodeId] {
        self.index
            .get(&v1)
            .map(|&i| self.rows[i].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_incompatible(&self, v1: NodeId, v2: NodeId) -> bool {
        self.get(v1).contains(&v2)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[NodeId])> + '_ {
        self.rows.iter().map(|(v1, row)| (*v1, row.as_slice()))
    }

    /// Every incompatible `(v1, v2)` pair, row by row.
    pub fn pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.rows
            .iter()
            .flat_map(|(v1, row)| row.iter().map(move |&v2| (*v1, v2)))
    }

    /// Number of tree-1 nodes with at least one incompatible partner.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of incompatible pairs.
    pub fn pair_count(&self) -> usize {
        self.rows.iter().map(|(_, row)| row.len()).sum()
    }
}

/// Compute the incompatibility relation from a pre-computed snapshot.
///
/// O(n1 · n2) intersection tests, each linear in the number of runs of the
/// bitsets involved.
pub fn incompatibilities(snap: &PairSnapshot) -> IncompatibilityRelation {
    let mut rows = Vec::new();
    for (done, v1) in snap.first.postorder().iter().enumerate() {
        if done > 0 && done % 100 == 0 {
            trace!(done, total = snap.first.len(), "comparing tree-1 nodes");
        }
        let row = incompatible_row(v1, &snap.second);
        if !row.is_empty() {
            rows.push((v1.node, row));
        }
    }

    let relation = IncompatibilityRelation::from_rows(rows);
    debug!(
        rows = relation.len(),
        pairs = relation.pair_count(),
        "incompatibility relation built"
    );
    relation
}

/// Parallel version of [`incompatibilities`].
///
/// Work is split by tree-1 node; each task only reads the shared snapshot
/// and produces its own row, and rows are collected in tree-1 post-order, so
/// the result equals the sequential one.
pub fn incompatibilities_parallel(snap: &PairSnapshot) -> IncompatibilityRelation {
    let rows: Vec<(NodeId, Vec<NodeId>)> = snap
        .first
        .postorder()
        .par_iter()
        .map(|v1| (v1.node, incompatible_row(v1, &snap.second)))
        .filter(|(_, row)| !row.is_empty())
        .collect();

    let relation = IncompatibilityRelation::from_rows(rows);
    debug!(
        rows = relation.len(),
        pairs = relation.pair_count(),
        "incompatibility relation built"
    );
    relation
}

/// Compute the incompatibility relation between two trees.
///
/// # Errors
/// Returns [`SnapshotError`] if the trees do not share the same leaf labels.
pub fn incompatibilities_from_trees(
    first: &Tree,
    second: &Tree,
) -> Result<IncompatibilityRelation, SnapshotError> {
    let snap = PairSnapshot::from_trees(first, second)?;
    Ok(incompatibilities_parallel(&snap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_newick;
    use itertools::Itertools;
    use std::collections::BTreeSet;

    // Trees from https://evolution.genetics.washington.edu/phylip/doc/treedist.html
    const TREES: [&str; 8] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "((C,D,E),(A,(B,F),(G,(H,I,J))));",
    ];

    fn parse(s: &str) -> Tree {
        parse_newick(s).unwrap()
    }

    fn find(tree: &Tree, label: &str) -> NodeId {
        tree.postorder(tree.root()).find(|&id| tree[id].label == label).unwrap()
    }

    fn leaf_set(tree: &Tree, node: NodeId) -> BTreeSet<String> {
        tree.leaves(node).map(|l| tree[l].label.clone()).collect()
    }

    /// Compatibility from plain label sets: two splits of a common leaf set
    /// are compatible iff one of the four cross intersections is empty.
    fn compatible_by_sets(t1: &Tree, v1: NodeId, t2: &Tree, v2: NodeId) -> bool {
        let all = leaf_set(t1, t1.root());
        let a = leaf_set(t1, v1);
        let c = leaf_set(t2, v2);
        if a == all || c == all {
            return true;
        }
        let b: BTreeSet<_> = all.difference(&a).cloned().collect();
        let d: BTreeSet<_> = all.difference(&c).cloned().collect();
        a.is_disjoint(&c) || a.is_disjoint(&d) || b.is_disjoint(&c) || b.is_disjoint(&d)
    }

    /// ```text
    ///   tree 1:  ((1,2)x,(3,4)y)      tree 2:  ((1,3)p,(2,4)q)
    /// ```
    #[test]
    fn test_crossed_quartets_are_incompatible() {
        let t1 = parse("((1,2)x,(3,4)y);");
        let t2 = parse("((1,3)p,(2,4)q);");
        let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();

        let (x, y) = (find(&t1, "x"), find(&t1, "y"));
        let (p, q) = (find(&t2, "p"), find(&t2, "q"));
        assert_eq!(intersection_count(snap.first.get(x).unwrap(), snap.second.get(p).unwrap()), 4);

        let rel = incompatibilities(&snap);
        assert!(rel.is_incompatible(x, p));
        assert_eq!(rel.get(x), &[p, q]);
        assert_eq!(rel.get(y), &[p, q]);
        assert_eq!(rel.len(), 2);
        assert_eq!(rel.pair_count(), 4);
        assert!(rel.get(t1.root()).is_empty());
        assert_eq!(rel.iter().map(|(v1, _)| v1).collect::<Vec<_>>(), vec![x, y]);
    }

    #[test]
    fn test_identical_trees_have_no_incompatibilities() {
        let t1 = parse("((1,2),(3,4));");
        let t2 = parse("((1,2),(3,4));");
        let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();
        assert!(incompatibilities(&snap).is_empty());

        // matching clades meet in exactly two quadrants
        for (v1, v2) in snap.first.postorder().iter().zip(snap.second.postorder()) {
            if !v1.clade_comp.is_empty() {
                assert_eq!(intersection_count(v1, v2), 2);
            }
        }
    }

    #[test]
    fn test_roots_are_compatible() {
        for (a, b) in [("((1,2),(3,4));", "((1,3),(2,4));"), ("A;", "A;"), ("(A,B);", "(B,A);")] {
            let snap = PairSnapshot::from_trees(&parse(a), &parse(b)).unwrap();
            let r1 = snap.first.postorder().last().unwrap();
            let r2 = snap.second.postorder().last().unwrap();
            // both clades are the full set: only A∩C is non-empty
            assert_eq!(intersection_count(r1, r2), 1);
            assert!(is_compatible(r1, r2));
        }
    }

    #[test]
    fn test_contained_clades_are_compatible() {
        let t1 = parse("(((A,B)ab,C)abc,(D,E));");
        let t2 = parse("((A,B)ab2,((C,D)cd,E));");
        let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();

        let abc = snap.first.get(find(&t1, "abc")).unwrap();
        let ab2 = snap.second.get(find(&t2, "ab2")).unwrap();
        let cd = snap.second.get(find(&t2, "cd")).unwrap();
        assert!(is_compatible(abc, ab2));
        assert!(is_compatible(abc, snap.second.get(find(&t2, "A")).unwrap()));
        // {A,B,C} vs {C,D} overlap without nesting
        assert!(!is_compatible(abc, cd));
    }

    #[test]
    fn test_matches_set_based_definition() {
        for pair in TREES.iter().combinations(2) {
            let (t1, t2) = (parse(pair[0]), parse(pair[1]));
            let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();
            let rel = incompatibilities(&snap);

            for v1 in t1.postorder(t1.root()) {
                for v2 in t2.postorder(t2.root()) {
                    assert_eq!(
                        !rel.is_incompatible(v1, v2),
                        compatible_by_sets(&t1, v1, &t2, v2),
                        "{} / {}",
                        pair[0],
                        pair[1]
                    );
                }
            }
        }
    }

    #[test]
    fn test_parallel_equals_sequential() {
        for pair in TREES.iter().combinations(2) {
            let (t1, t2) = (parse(pair[0]), parse(pair[1]));
            let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();
            assert_eq!(incompatibilities(&snap), incompatibilities_parallel(&snap));
            assert_eq!(incompatibilities_from_trees(&t1, &t2).unwrap(), incompatibilities(&snap));
        }
    }

    #[test]
    fn test_shared_clades_conflict_with_nothing() {
        for pair in TREES.iter().permutations(2) {
            let (t1, t2) = (parse(pair[0]), parse(pair[1]));
            let snap = PairSnapshot::from_trees(&t1, &t2).unwrap();
            let rel = incompatibilities(&snap);
            for v1 in snap.first.postorder() {
                let shared = snap.second.postorder().iter().any(|v2| v2.clade == v1.clade);
                if shared {
                    assert!(rel.get(v1.node).is_empty());
                }
                for v2 in snap.second.postorder() {
                    let (a, b) = (is_compatible(v1, v2), is_compatible(v2, v1));
                    assert_eq!(a, b);
                    // non-trivial pairs always hit at least two quadrants
                    if !v1.clade_comp.is_empty() && !v2.clade_comp.is_empty() {
                        assert!(intersection_count(v1, v2) >= 2);
                    }
                }
            }
        }
    }

    #[test]
    fn test_label_mismatch_is_reported() {
        let err = incompatibilities_from_trees(&parse("(A,B);"), &parse("(A,C);")).unwrap_err();
        assert_eq!(err, SnapshotError::UnknownLabel("C".into()));
    }
}
