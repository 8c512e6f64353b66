use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use crate::incompat::IncompatibilityRelation;
use crate::newick::{parse_newick, parse_newick_many, NewickError};
use crate::snapshot::PairSnapshot;
use crate::tree::Tree;

/// Errors raised while loading trees from disk.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: {source}", .path.display())]
    Newick { path: PathBuf, source: NewickError },
    #[error("no trees found in {}", .0.display())]
    NoTrees(PathBuf),
}

fn read_file(path: &Path) -> Result<String, ReadError> {
    fs::read_to_string(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read every `;`-terminated Newick tree of a plain text file.
pub fn read_newick_trees<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>, ReadError> {
    let path = path.as_ref();
    newick_trees(path, &read_file(path)?)
}

/// Read the `tree NAME = ...;` statements of a NEXUS file, as written by BEAST.
///
/// `[&...]` annotations are stripped and leaf labels are mapped through the
/// `TRANSLATE` table when the file has one.
pub fn read_nexus_trees<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>, ReadError> {
    let path = path.as_ref();
    nexus_trees(path, &read_file(path)?)
}

/// Read trees from NEXUS files (first line `#NEXUS`) or plain Newick files.
pub fn read_trees<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>, ReadError> {
    let path = path.as_ref();
    let content = read_file(path)?;
    let is_nexus = content
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS"));
    if is_nexus {
        nexus_trees(path, &content)
    } else {
        newick_trees(path, &content)
    }
}

fn newick_trees(path: &Path, content: &str) -> Result<Vec<Tree>, ReadError> {
    match parse_newick_many(content) {
        Ok(trees) => {
            debug!(path = %path.display(), trees = trees.len(), "read newick file");
            Ok(trees)
        }
        Err(NewickError::Empty) => Err(ReadError::NoTrees(path.to_path_buf())),
        Err(source) => Err(ReadError::Newick {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn nexus_trees(path: &Path, content: &str) -> Result<Vec<Tree>, ReadError> {
    let translate = parse_translate_block(content);

    let mut trees = Vec::new();
    for block in collect_tree_blocks(content) {
        let newick = strip_beast_annotations(block.body);
        let mut tree = parse_newick(&newick).map_err(|source| ReadError::Newick {
            path: path.to_path_buf(),
            source,
        })?;
        if !translate.is_empty() {
            rename_leaves(&mut tree, &translate);
        }
        debug!(name = block.name, leaves = tree.num_leaves(tree.root()), "read nexus tree");
        trees.push(tree);
    }

    if trees.is_empty() {
        return Err(ReadError::NoTrees(path.to_path_buf()));
    }
    Ok(trees)
}

/// Strip BEAST annotations such as `:[&rate=0.123]2.45` down to `:2.45`.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

struct TreeBlock<'a> {
    name: &'a str,
    body: &'a str,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.get(..5).is_some_and(|head| head.eq_ignore_ascii_case("tree ")))
        .filter_map(|line| {
            let (header, body) = line.split_once(" = ")?;
            let name = header[5..].split_whitespace().next().unwrap_or_default();
            Some(TreeBlock { name, body: body.trim() })
        })
        .collect()
}

fn parse_translate_block(content: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    let lines = content
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1);

    // STRUCTURE:
    // 1 '1959.M.CD.59.ZR59',
    // 2 '1960.DRC60A'
    // ;
    for line in lines {
        let entry = line.trim_end_matches([',', ';']);
        let mut parts = entry.split_whitespace();
        if let (Some(id), Some(label)) = (parts.next(), parts.next()) {
            table.insert(id.to_string(), label.trim_matches('\'').to_string());
        }
        if line.ends_with(';') {
            break;
        }
    }
    table
}

fn rename_leaves(tree: &mut Tree, translate: &HashMap<String, String>) {
    let leaves: Vec<_> = tree.leaves(tree.root()).collect();
    for leaf in leaves {
        if let Some(label) = translate.get(&tree[leaf].label) {
            tree[leaf].label = label.clone();
        }
    }
}

/// Run `body` against the output at `path`: `-` is stdout, a `.gz` suffix
/// gzips the output. The gzip stream is finished before returning, so a
/// failure to write its trailer is reported.
fn with_output<F>(path: &Path, body: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    if path.as_os_str() == "-" {
        let mut out = BufWriter::new(io::stdout().lock());
        body(&mut out)?;
        return out.flush();
    }

    let file = File::create(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        let mut out = BufWriter::new(GzEncoder::new(file, Compression::default()));
        body(&mut out)?;
        let encoder = out.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?;
        Ok(())
    } else {
        let mut out = BufWriter::new(file);
        body(&mut out)?;
        out.flush()
    }
}

/// Write the incompatible pairs as TSV, one pair per row.
///
/// Columns are the preprocessing ids and labels of both nodes. Unlabelled
/// internal nodes get an empty label column.
pub fn write_relation_tsv<P: AsRef<Path>>(
    path: P,
    trees: (&Tree, &Tree),
    snap: &PairSnapshot,
    relation: &IncompatibilityRelation,
) -> io::Result<()> {
    let (first, second) = trees;
    with_output(path.as_ref(), |out| {
        writeln!(out, "tree1_id\ttree1_label\ttree2_id\ttree2_label")?;
        for (v1, v2) in relation.pairs() {
            let (Some(c1), Some(c2)) = (snap.first.get(v1), snap.second.get(v2)) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("pair ({v1}, {v2}) is not part of the snapshot"),
                ));
            };
            writeln!(out, "{}\t{}\t{}\t{}", c1.id, first[v1].label, c2.id, second[v2].label)?;
        }
        Ok(())
    })
}

/// Write one Newick string per line.
pub fn write_newick_lines<P: AsRef<Path>>(path: P, lines: &[String]) -> io::Result<()> {
    with_output(path.as_ref(), |out| {
        for line in lines {
            writeln!(out, "{line}")?;
        }
        Ok(())
    })
}
