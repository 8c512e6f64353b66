//! Newick reading and writing for the arena [`Tree`].
//!
//! # Grammar
//! ```text
//! tree     := subtree ';'
//! subtree  := '(' item (',' item)* ')' label? | label?
//! item     := subtree
//! label    := name? (':' length)?      with optional [annotations] anywhere
//! ```
//!
//! The input is first cut into tokens (`(`, `)`, `,`, `;` and text), then
//! read by a forward recursive-descent parser. Text inside `[...]` and inside
//! single quotes is opaque, so annotations such as `[&rate=0.5,height=1]`
//! may contain delimiters.
//!
//! # Sole plain items
//! A parenthesized list whose only item is a plain label, as in `(A)` or `()`,
//! creates no child: `(A)B;` reads as the single leaf `B`. A sole *group*
//! item does create a child, so `((A,B))` is a root with one internal child.
//! The writer never emits a lone leaf in parentheses for trees read this way,
//! so reading and writing stay inverse to each other.
//!
//! # Labels
//! Bracketed annotations are cut out of the label text first, the rest is
//! split at the first `:` into name and branch length, and the annotations
//! are appended back to the name: `A:0.5[&x=1]` gives label `A[&x=1]` and
//! branch length `0.5`.

use thiserror::Error;
use tracing::{debug, trace};

use crate::tree::{Node, NodeId, Tree};

/// Errors reported while reading a Newick string. Offsets are byte offsets.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NewickError {
    #[error("empty Newick string")]
    Empty,

    #[error("missing terminating ';'")]
    MissingSemicolon,

    #[error("unbalanced parentheses: '(' at offset {0} is never closed")]
    UnclosedGroup(usize),

    #[error("unbalanced parentheses: ')' at offset {0} has no matching '('")]
    UnmatchedClose(usize),

    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: &'static str, offset: usize },

    #[error("invalid branch length '{value}' at offset {offset}")]
    InvalidBranchLength { value: String, offset: usize },

    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("unexpected content after ';' at offset {0}")]
    TrailingContent(usize),
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Open,
    Close,
    Comma,
    Semicolon,
    Text(String),
}

impl TokenKind {
    fn describe(&self) -> &'static str {
        match self {
            TokenKind::Open => "'('",
            TokenKind::Close => "')'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Text(_) => "label",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn flush_text(tokens: &mut Vec<Token>, text: &mut String, offset: usize) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        tokens.push(Token {
            kind: TokenKind::Text(trimmed.to_string()),
            offset,
        });
    }
    text.clear();
}

fn tokenize(input: &str) -> Result<Vec<Token>, NewickError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut text_start = 0;
    let mut chars = input.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        let kind = match ch {
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            _ => {
                if text.is_empty() {
                    text_start = i;
                }
                text.push(ch);
                match ch {
                    '[' => loop {
                        match chars.next() {
                            Some((_, ']')) => {
                                text.push(']');
                                break;
                            }
                            Some((_, c)) => text.push(c),
                            None => {
                                return Err(NewickError::Unterminated {
                                    what: "annotation",
                                    offset: i,
                                })
                            }
                        }
                    },
                    '\'' => loop {
                        match chars.next() {
                            Some((_, '\'')) => {
                                text.push('\'');
                                // '' is an escaped quote inside a quoted label
                                if chars.peek().is_some_and(|&(_, c)| c == '\'') {
                                    chars.next();
                                    text.push('\'');
                                } else {
                                    break;
                                }
                            }
                            Some((_, c)) => text.push(c),
                            None => {
                                return Err(NewickError::Unterminated {
                                    what: "quoted label",
                                    offset: i,
                                })
                            }
                        }
                    },
                    _ => {}
                }
                continue;
            }
        };
        flush_text(&mut tokens, &mut text, text_start);
        tokens.push(Token { kind, offset: i });
    }
    flush_text(&mut tokens, &mut text, text_start);

    Ok(tokens)
}

// ============================================================================
// Labels
// ============================================================================

/// Separates bracketed annotations from the rest of a label token.
fn split_annotations(raw: &str) -> (String, String) {
    let mut body = String::with_capacity(raw.len());
    let mut annotations = String::new();
    let mut in_quote = false;
    let mut in_annotation = false;

    for ch in raw.chars() {
        if in_annotation {
            annotations.push(ch);
            if ch == ']' {
                in_annotation = false;
            }
        } else if ch == '[' && !in_quote {
            in_annotation = true;
            annotations.push(ch);
        } else {
            if ch == '\'' {
                in_quote = !in_quote;
            }
            body.push(ch);
        }
    }
    (body, annotations)
}

/// Position of the first `:` outside single quotes.
fn length_separator(body: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            ':' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

fn apply_label(node: &mut Node, raw: &str, offset: usize) -> Result<(), NewickError> {
    let (body, annotations) = split_annotations(raw);

    let name = match length_separator(&body) {
        Some(sep) => {
            let value = body[sep + 1..].trim();
            node.branch_length = value
                .parse::<f64>()
                .ok()
                .filter(|len| len.is_finite())
                .ok_or_else(|| NewickError::InvalidBranchLength {
                    value: value.to_string(),
                    offset,
                })?;
            &body[..sep]
        }
        None => body.as_str(),
    };

    node.label = format!("{}{}", name.trim(), annotations);
    Ok(())
}

// ============================================================================
// Parser
// ============================================================================

/// A plain-label item becomes a child unless it is the only item of its
/// parenthesized list. Shared by the first item after `(` and the items after
/// each `,`, so both sides of the rule read the same lookahead.
fn creates_leaf(preceding_items: usize, next: Option<&TokenKind>) -> bool {
    preceding_items > 0 || matches!(next, Some(TokenKind::Comma))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn take_text(&mut self) -> Option<(String, usize)> {
        match self.tokens.get(self.pos) {
            Some(Token { kind: TokenKind::Text(text), offset }) => {
                let out = (text.clone(), *offset);
                self.pos += 1;
                Some(out)
            }
            _ => None,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Reads one `;`-terminated tree.
    fn parse_tree(&mut self) -> Result<Tree, NewickError> {
        let mut tree = Tree::new();
        let root = tree.root();
        self.parse_subtree(&mut tree, root)?;

        match self.bump() {
            Some(Token { kind: TokenKind::Semicolon, .. }) => Ok(tree),
            Some(Token { kind: TokenKind::Close, offset }) => {
                Err(NewickError::UnmatchedClose(offset))
            }
            Some(Token { kind, offset }) => Err(NewickError::UnexpectedToken {
                found: kind.describe(),
                offset,
            }),
            None => Err(NewickError::MissingSemicolon),
        }
    }

    fn parse_subtree(&mut self, tree: &mut Tree, node: NodeId) -> Result<(), NewickError> {
        if let Some(TokenKind::Open) = self.peek() {
            let open = self.pos;
            self.pos += 1;
            self.parse_children(tree, node, self.tokens[open].offset)?;
        }
        if let Some((text, offset)) = self.take_text() {
            apply_label(&mut tree[node], &text, offset)?;
        }
        Ok(())
    }

    fn parse_children(
        &mut self,
        tree: &mut Tree,
        parent: NodeId,
        open_offset: usize,
    ) -> Result<(), NewickError> {
        let mut items = 0;
        loop {
            if let Some(TokenKind::Open) = self.peek() {
                let child = tree.add_child(parent);
                self.parse_subtree(tree, child)?;
            } else {
                let text = self.take_text();
                if creates_leaf(items, self.peek()) {
                    let child = tree.add_child(parent);
                    if let Some((text, offset)) = text {
                        apply_label(&mut tree[child], &text, offset)?;
                    }
                } else {
                    trace!(?text, open_offset, "sole plain item in parentheses creates no child");
                }
            }
            items += 1;

            match self.bump() {
                Some(Token { kind: TokenKind::Comma, .. }) => continue,
                Some(Token { kind: TokenKind::Close, .. }) => return Ok(()),
                Some(Token { kind: TokenKind::Semicolon, .. }) | None => {
                    return Err(NewickError::UnclosedGroup(open_offset));
                }
                Some(Token { kind, offset }) => {
                    return Err(NewickError::UnexpectedToken {
                        found: kind.describe(),
                        offset,
                    });
                }
            }
        }
    }
}

/// Parses a single Newick tree. The string must end with `;`; only
/// whitespace may follow it.
///
/// # Example
/// ```
/// use tree_incompat::newick::parse_newick;
///
/// let tree = parse_newick("((A:1,B:2)x:0.5,C:3);").unwrap();
/// let root = tree.root();
/// assert_eq!(tree.num_leaves(root), 3);
/// let x = tree[root].children()[0];
/// assert_eq!(tree[x].label, "x");
/// assert_eq!(tree[x].branch_length, 0.5);
/// ```
pub fn parse_newick(input: &str) -> Result<Tree, NewickError> {
    if input.trim().is_empty() {
        return Err(NewickError::Empty);
    }
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let tree = parser.parse_tree()?;
    match parser.bump() {
        Some(token) => Err(NewickError::TrailingContent(token.offset)),
        None => Ok(tree),
    }
}

/// Parses every `;`-terminated tree of `input`, in order.
pub fn parse_newick_many(input: &str) -> Result<Vec<Tree>, NewickError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let mut trees = Vec::new();
    while !parser.at_end() {
        trees.push(parser.parse_tree()?);
    }
    if trees.is_empty() {
        return Err(NewickError::Empty);
    }
    Ok(trees)
}

// ============================================================================
// Writer
// ============================================================================

/// What to include besides topology and leaf labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Append `:length` to every non-root node.
    pub branch_lengths: bool,
    /// Write the labels of internal nodes.
    pub internal_labels: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            branch_lengths: false,
            internal_labels: true,
        }
    }
}

impl WriteOptions {
    pub fn full() -> Self {
        WriteOptions {
            branch_lengths: true,
            internal_labels: true,
        }
    }
}

/// Serializes the whole tree, terminated by `;`.
///
/// Children are separated by `", "`; the root never gets a branch length.
pub fn to_newick(tree: &Tree, options: WriteOptions) -> String {
    subtree_to_newick(tree, tree.root(), options)
}

/// Serializes the subtree rooted at `node`, terminated by `;`.
pub fn subtree_to_newick(tree: &Tree, node: NodeId, options: WriteOptions) -> String {
    let mut out = String::new();
    write_node(tree, node, node, options, &mut out);
    out.push(';');
    out
}

fn write_node(tree: &Tree, id: NodeId, top: NodeId, options: WriteOptions, out: &mut String) {
    let node = &tree[id];

    if !node.is_leaf() {
        out.push('(');
        for (i, &child) in node.children().iter().enumerate() {
            if i != 0 {
                out.push_str(", ");
            }
            write_node(tree, child, top, options, out);
        }
        out.push(')');
    }

    let (name, annotations) = if node.is_leaf() || options.internal_labels {
        split_annotations(&node.label)
    } else {
        (String::new(), String::new())
    };
    out.push_str(&name);
    if options.branch_lengths && id != top && !node.is_root() {
        out.push(':');
        out.push_str(&node.branch_length.to_string());
    }
    out.push_str(&annotations);
}

/// One Newick line per non-root node `v`, in post-order: the tree rooted on a
/// new node inserted on the edge above `v`, written with branch lengths and
/// internal labels.
///
/// When the old root had two children, rerooting leaves it with a single
/// child, written as e.g. `(C:4)r:3`. [`parse_newick`] reads a lone leaf in
/// parentheses as no child at all, so such lines do not read back into the
/// same tree: `r` becomes a leaf and `C` is lost.
///
/// ```
/// use tree_incompat::newick::{all_reroots, parse_newick};
///
/// let tree = parse_newick("((A:1,B:2)x:3,C:4)r;").unwrap();
/// let lines = all_reroots(&tree);
/// assert_eq!(lines.len(), 4);
/// assert_eq!(lines[0], "(A:1, (B:2, (C:4)r:3)x:0);");
/// ```
pub fn all_reroots(tree: &Tree) -> Vec<String> {
    let order = tree.postordered_nodes(tree.root());
    let mut lines = Vec::with_capacity(order.len().saturating_sub(1));
    for v in order {
        // each reroot starts from the original rooting
        let mut rerooted = tree.clone();
        let Some(w) = rerooted.subdivide_parent_edge(v) else {
            continue;
        };
        rerooted.reroot_on_node(w);
        lines.push(to_newick(&rerooted, WriteOptions::full()));
    }
    debug!(count = lines.len(), "rerooted trees written");
    lines
}
