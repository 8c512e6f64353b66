//! Conversion from `phylotree` trees.
//!
//! Trees loaded with the `phylotree` crate can be analysed by converting them
//! into the arena [`Tree`] used here. Names, branch lengths and child order
//! are preserved; missing names become empty labels and missing lengths
//! become `0.0`.

use phylotree::tree::{Tree as PhyloTree, TreeError as PhyloTreeError};

use crate::tree::{NodeId, Tree};

impl Tree {
    /// Copy a `phylotree` tree, starting at its root.
    pub fn from_phylotree(source: &PhyloTree) -> Result<Tree, PhyloTreeError> {
        let source_root = source.get_root()?;
        let mut tree = Tree::new();
        let root = tree.root();
        copy_node(source, source_root, &mut tree, root)?;

        // (source node, destination parent)
        let mut stack: Vec<(usize, NodeId)> = Vec::new();
        push_children(source, source_root, root, &mut stack)?;

        while let Some((src, parent)) = stack.pop() {
            let dst = tree.add_child(parent);
            copy_node(source, src, &mut tree, dst)?;
            push_children(source, src, dst, &mut stack)?;
        }

        Ok(tree)
    }
}

fn copy_node(
    source: &PhyloTree,
    src: usize,
    tree: &mut Tree,
    dst: NodeId,
) -> Result<(), PhyloTreeError> {
    let node = source.get(&src)?;
    tree[dst].label = node.name.clone().unwrap_or_default();
    tree[dst].branch_length = node.parent_edge.unwrap_or(0.0);
    Ok(())
}

// Reversed so that popping visits children left to right.
fn push_children(
    source: &PhyloTree,
    src: usize,
    dst: NodeId,
    stack: &mut Vec<(usize, NodeId)>,
) -> Result<(), PhyloTreeError> {
    let node = source.get(&src)?;
    stack.extend(node.children.iter().rev().map(|&child| (child, dst)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::{parse_newick, to_newick, WriteOptions};

    #[test]
    fn test_matches_native_parser() {
        for newick in [
            "(A,B);",
            "((A,B),(C,D));",
            "((A:0.1,B:0.2)AB:0.5,(C:1,D:2.5)CD:0.25)root;",
            "(A,(B,(C,(D,E))));",
            "((C,D,E),(A,(B,F),(G,(H,I,J))));",
        ] {
            let phylo = PhyloTree::from_newick(newick).unwrap();
            let converted = Tree::from_phylotree(&phylo).unwrap();
            let native = parse_newick(newick).unwrap();
            assert_eq!(
                to_newick(&converted, WriteOptions::full()),
                to_newick(&native, WriteOptions::full()),
                "{newick}"
            );
            assert_eq!(converted.num_nodes(), native.num_nodes());
        }
    }

    #[test]
    fn test_child_order_and_lengths_preserved() {
        let phylo = PhyloTree::from_newick("((A:1,B:2)x:3,C:4);").unwrap();
        let tree = Tree::from_phylotree(&phylo).unwrap();

        let root = tree.root();
        let x = tree[root].children()[0];
        assert_eq!(tree[x].label, "x");
        assert_eq!(tree[x].branch_length, 3.0);
        let kids: Vec<&str> = tree[x].children().iter().map(|&c| tree[c].label.as_str()).collect();
        assert_eq!(kids, vec!["A", "B"]);
        assert_eq!(tree[tree[root].children()[1]].branch_length, 4.0);
    }

    #[test]
    fn test_empty_phylotree_is_an_error() {
        assert!(Tree::from_phylotree(&PhyloTree::new()).is_err());
    }
}
