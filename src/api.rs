//! Python binding layer for the incompatibility analysis.
//!
//! Trees are passed as Newick strings; results come back as plain Python
//! lists and integers.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::incompat::incompatibilities_parallel;
use crate::newick::{parse_newick, to_newick, WriteOptions};
use crate::snapshot::PairSnapshot;
use crate::tree::Tree;

/// Compute the incompatible node pairs of two trees.
///
/// Args:
///     newick_a: First tree in Newick format
///     newick_b: Second tree in Newick format, over the same leaf labels
///
/// Returns:
///     A list of (id_a, id_b) tuples. Leaves are numbered 1..N in the
///     post-order of the first tree; internal nodes get ids above N.
///
/// Raises:
///     ValueError: If a tree cannot be parsed or the leaf labels differ
#[pyfunction]
#[pyo3(signature = (newick_a, newick_b))]
fn incompatible_pairs(newick_a: &str, newick_b: &str) -> PyResult<Vec<(usize, usize)>> {
    let (first, second) = parse_pair(newick_a, newick_b)?;
    let snap = build_snapshot(&first, &second)?;
    let relation = incompatibilities_parallel(&snap);

    relation
        .pairs()
        .map(|(v1, v2)| match (snap.first.get(v1), snap.second.get(v2)) {
            (Some(c1), Some(c2)) => Ok((c1.id, c2.id)),
            _ => Err(PyValueError::new_err(format!(
                "node pair ({v1}, {v2}) has no preprocessing id"
            ))),
        })
        .collect()
}

/// Count the incompatible node pairs of two trees.
///
/// Raises:
///     ValueError: If a tree cannot be parsed or the leaf labels differ
#[pyfunction]
#[pyo3(signature = (newick_a, newick_b))]
fn count_incompatible(newick_a: &str, newick_b: &str) -> PyResult<usize> {
    let (first, second) = parse_pair(newick_a, newick_b)?;
    let snap = build_snapshot(&first, &second)?;
    Ok(incompatibilities_parallel(&snap).pair_count())
}

/// Parse a Newick string and write it back in normalized form.
///
/// Args:
///     newick: Tree in Newick format
///     branch_lengths: Write `:length` after every non-root node (default: False)
///     internal_labels: Write labels of internal nodes (default: True)
#[pyfunction]
#[pyo3(signature = (newick, branch_lengths=false, internal_labels=true))]
fn normalize_newick(newick: &str, branch_lengths: bool, internal_labels: bool) -> PyResult<String> {
    let tree = parse_one(newick)?;
    Ok(to_newick(&tree, WriteOptions { branch_lengths, internal_labels }))
}

fn parse_one(newick: &str) -> PyResult<Tree> {
    parse_newick(newick).map_err(|e| PyValueError::new_err(format!("Failed to parse tree: {}", e)))
}

fn parse_pair(newick_a: &str, newick_b: &str) -> PyResult<(Tree, Tree)> {
    Ok((parse_one(newick_a)?, parse_one(newick_b)?))
}

fn build_snapshot(first: &Tree, second: &Tree) -> PyResult<PairSnapshot> {
    PairSnapshot::from_trees(first, second)
        .map_err(|e| PyValueError::new_err(format!("Failed to create tree snapshot: {}", e)))
}

/// Python module definition
#[pymodule]
fn tree_incompat(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(incompatible_pairs, m)?)?;
    m.add_function(wrap_pyfunction!(count_incompatible, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_newick, m)?)?;
    Ok(())
}
