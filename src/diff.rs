//! Text diffing for "expected vs actual" mismatches.
//!
//! The core is Myers' O(ND) algorithm run as a divide-and-conquer bisection: a forward
//! and a reverse frontier advance until they overlap on a middle snake, and the two
//! halves are diffed recursively. Before bisecting, common affixes are trimmed, cheap
//! special cases are handled (one text empty, one containing the other, a single
//! character), and a half-match heuristic looks for a long shared substring to split on.
//! Large inputs are first diffed line by line, then changed blocks are rediffed by
//! character.
//!
//! A wall-clock deadline bounds the work; a subproblem that runs out of time degrades
//! to "delete all, insert all" for that span, which is still a correct edit script.
//!
//! The raw script is then post-processed by [`cleanup_semantic`],
//! [`cleanup_efficiency`] and [`cleanup_merge`], in that order.

use std::time::{Duration, Instant};

use serde::Serialize;

mod bisect;
mod cleanup;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Kind of an edit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Delete,
    Insert,
    Equal,
}

/// One run of the edit script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub op: Operation,
    pub text: String,
}

impl Diff {
    pub fn new(op: Operation, text: impl Into<String>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self::new(Operation::Delete, text)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::new(Operation::Insert, text)
    }

    pub fn equal(text: impl Into<String>) -> Self {
        Self::new(Operation::Equal, text)
    }
}

/// Working representation: runs over `char`s so slicing never splits a code point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub op: Operation,
    pub text: Vec<char>,
}

impl Chunk {
    pub(crate) fn new(op: Operation, text: impl Into<Vec<char>>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }
}

fn to_chunks(diffs: &[Diff]) -> Vec<Chunk> {
    diffs
        .iter()
        .map(|d| Chunk::new(d.op, d.text.chars().collect::<Vec<_>>()))
        .collect()
}

fn to_diffs(chunks: Vec<Chunk>) -> Vec<Diff> {
    chunks
        .into_iter()
        .map(|c| Diff::new(c.op, c.text.into_iter().collect::<String>()))
        .collect()
}

// ============================================================================
// DIFFER
// ============================================================================

/// Diff settings.
#[derive(Debug, Clone)]
pub struct Differ {
    /// Wall-clock budget for one top-level diff; `None` means unbounded.
    pub timeout: Option<Duration>,
    /// Cost of an empty edit in characters, used by [`cleanup_efficiency`].
    pub edit_cost: usize,
    /// Pre-diff by lines when both texts are longer than 100 characters.
    pub check_lines: bool,
}

impl Default for Differ {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(1)),
            edit_cost: 4,
            check_lines: true,
        }
    }
}

impl Differ {
    /// Raw diff followed by merge cleanup.
    pub fn diff_main(&self, text1: &str, text2: &str) -> Vec<Diff> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let a: Vec<char> = text1.chars().collect();
        let b: Vec<char> = text2.chars().collect();
        to_diffs(bisect::diff_chars(&a, &b, self.check_lines, deadline))
    }

    /// Full pipeline: raw diff, then semantic, efficiency and merge cleanup.
    pub fn diff(&self, text1: &str, text2: &str) -> Vec<Diff> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let a: Vec<char> = text1.chars().collect();
        let b: Vec<char> = text2.chars().collect();
        let mut chunks = bisect::diff_chars(&a, &b, self.check_lines, deadline);
        cleanup::semantic(&mut chunks);
        cleanup::efficiency(&mut chunks, self.edit_cost);
        cleanup::merge(&mut chunks);
        to_diffs(chunks)
    }
}

/// Diffs two texts with default settings.
///
/// # Examples
///
/// ```rust
/// use proctor::diff::{diff, text1, text2};
/// let script = diff("the cat sat", "the hat sat");
/// assert_eq!(text1(&script), "the cat sat");
/// assert_eq!(text2(&script), "the hat sat");
/// ```
pub fn diff(text1: &str, text2: &str) -> Vec<Diff> {
    Differ::default().diff(text1, text2)
}

/// Removes equalities that are smaller than the edits around them, and splits
/// overlapping delete/insert pairs around their shared part.
pub fn cleanup_semantic(diffs: &mut Vec<Diff>) {
    let mut chunks = to_chunks(diffs);
    cleanup::semantic(&mut chunks);
    *diffs = to_diffs(chunks);
}

/// Removes short equalities sandwiched between edits when keeping them costs more
/// than `edit_cost` characters of fragmentation.
pub fn cleanup_efficiency(diffs: &mut Vec<Diff>, edit_cost: usize) {
    let mut chunks = to_chunks(diffs);
    cleanup::efficiency(&mut chunks, edit_cost);
    *diffs = to_diffs(chunks);
}

/// Merges adjacent runs of the same kind, factors common affixes out of
/// delete/insert pairs, and slides single edits to absorb neighbouring equalities.
pub fn cleanup_merge(diffs: &mut Vec<Diff>) {
    let mut chunks = to_chunks(diffs);
    cleanup::merge(&mut chunks);
    *diffs = to_diffs(chunks);
}

/// Reconstructs the first text (equalities and deletions).
pub fn text1(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Operation::Insert)
        .map(|d| d.text.as_str())
        .collect()
}

/// Reconstructs the second text (equalities and insertions).
pub fn text2(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Operation::Delete)
        .map(|d| d.text.as_str())
        .collect()
}

/// Number of characters inserted or deleted.
pub fn levenshtein(diffs: &[Diff]) -> usize {
    let mut total = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for d in diffs {
        let len = d.text.chars().count();
        match d.op {
            Operation::Insert => insertions += len,
            Operation::Delete => deletions += len,
            Operation::Equal => {
                total += insertions.max(deletions);
                insertions = 0;
                deletions = 0;
            }
        }
    }
    total + insertions.max(deletions)
}
