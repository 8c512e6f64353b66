//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: arena-backed rooted tree with post-order traversal and editing.
//! - `newick`: Newick reader and writer.
//! - `bitset`: run-compressed leaf sets used as clade bitmaps.
//! - `snapshot`: clade bitmaps and preprocessing ids for a pair of trees.
//! - `incompat`: pairwise clade incompatibility between two trees.
//! - `phylo`: conversion from `phylotree` trees.
//! - `io`: reading Newick/NEXUS files, writing TSV and Newick output.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod tree;
pub mod newick;
pub mod bitset;
pub mod snapshot;
pub mod incompat;
pub mod phylo;
pub mod io;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use incompat::{
    incompatibilities, incompatibilities_from_trees, incompatibilities_parallel,
    IncompatibilityRelation,
};
pub use io::{read_trees, write_newick_lines, write_relation_tsv, ReadError};
pub use newick::{all_reroots, parse_newick, to_newick, NewickError, WriteOptions};
pub use snapshot::{PairSnapshot, SnapshotError};
pub use tree::{Node, NodeId, Tree, TreeError};
