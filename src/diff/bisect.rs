//! Raw diff computation: affix trimming, special cases, half-match, line mode and
//! the Myers middle-snake bisection.

use std::collections::HashMap;
use std::time::Instant;

use super::cleanup;
use super::{Chunk, Operation};

/// Texts longer than this on both sides are pre-diffed by line.
const LINE_MODE_THRESHOLD: usize = 100;

/// Diffs two char sequences, returning a merged edit script.
pub(crate) fn diff_chars(
    a: &[char],
    b: &[char],
    check_lines: bool,
    deadline: Option<Instant>,
) -> Vec<Chunk> {
    if a == b {
        return if a.is_empty() {
            Vec::new()
        } else {
            vec![Chunk::new(Operation::Equal, a)]
        };
    }

    let prefix = common_prefix(a, b);
    let (a_rest, b_rest) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a_rest, b_rest);
    let a_mid = &a_rest[..a_rest.len() - suffix];
    let b_mid = &b_rest[..b_rest.len() - suffix];

    let mut diffs = Vec::new();
    if prefix > 0 {
        diffs.push(Chunk::new(Operation::Equal, &a[..prefix]));
    }
    diffs.extend(compute(a_mid, b_mid, check_lines, deadline));
    if suffix > 0 {
        diffs.push(Chunk::new(Operation::Equal, &a_rest[a_rest.len() - suffix..]));
    }
    cleanup::merge(&mut diffs);
    diffs
}

fn compute(a: &[char], b: &[char], check_lines: bool, deadline: Option<Instant>) -> Vec<Chunk> {
    if a.is_empty() {
        return vec![Chunk::new(Operation::Insert, b)];
    }
    if b.is_empty() {
        return vec![Chunk::new(Operation::Delete, a)];
    }

    let a_longer = a.len() > b.len();
    let (long, short) = if a_longer { (a, b) } else { (b, a) };
    if let Some(at) = find(long, short, 0) {
        // The shorter text sits inside the longer one.
        let op = if a_longer {
            Operation::Delete
        } else {
            Operation::Insert
        };
        return vec![
            Chunk::new(op, &long[..at]),
            Chunk::new(Operation::Equal, short),
            Chunk::new(op, &long[at + short.len()..]),
        ];
    }
    if short.len() == 1 {
        // Single character that is not contained: nothing in common.
        return vec![Chunk::new(Operation::Delete, a), Chunk::new(Operation::Insert, b)];
    }

    if let Some(split) = half_match(a, b, deadline) {
        let mut diffs = diff_chars(&split.a_prefix, &split.b_prefix, check_lines, deadline);
        diffs.push(Chunk::new(Operation::Equal, split.common));
        diffs.extend(diff_chars(&split.a_suffix, &split.b_suffix, check_lines, deadline));
        return diffs;
    }

    if check_lines && a.len() > LINE_MODE_THRESHOLD && b.len() > LINE_MODE_THRESHOLD {
        return line_mode(a, b, deadline);
    }

    bisect(a, b, deadline)
}

pub(crate) fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

pub(crate) fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Length of the longest suffix of `a` that is a prefix of `b`.
pub(crate) fn common_overlap(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let len = a.len().min(b.len());
    let a = &a[a.len() - len..];
    let b = &b[..len];
    if a == b {
        return len;
    }

    // Grow a candidate suffix of `a`, jumping ahead to wherever it next occurs in `b`.
    let mut best = 0;
    let mut length = 1;
    loop {
        if length > len {
            return best;
        }
        let pattern = &a[len - length..];
        let Some(found) = find(b, pattern, 0) else {
            return best;
        };
        length += found;
        if length > len {
            return best;
        }
        if found == 0 || a[len - length..] == b[..length] {
            best = length;
            length += 1;
        }
    }
}

fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

// ============================================================================
// HALF MATCH
// ============================================================================

struct HalfMatch {
    a_prefix: Vec<char>,
    a_suffix: Vec<char>,
    b_prefix: Vec<char>,
    b_suffix: Vec<char>,
    common: Vec<char>,
}

/// Looks for a substring shared by both texts that is at least half the length of
/// the longer one. The result can be non-minimal, so it is only tried when a
/// deadline is in force.
fn half_match(a: &[char], b: &[char], deadline: Option<Instant>) -> Option<HalfMatch> {
    deadline?;
    let a_longer = a.len() > b.len();
    let (long, short) = if a_longer { (a, b) } else { (b, a) };
    if long.len() < 4 || short.len() * 2 < long.len() {
        return None;
    }

    // Seed from the second and the third quarter of the longer text.
    let first = half_match_at(long, short, long.len().div_ceil(4));
    let second = half_match_at(long, short, long.len().div_ceil(2));
    let best = match (first, second) {
        (None, None) => return None,
        (Some(m), None) | (None, Some(m)) => m,
        (Some(x), Some(y)) => {
            if x.common.len() > y.common.len() {
                x
            } else {
                y
            }
        }
    };

    // `best` is expressed as (long, short); map it back onto (a, b).
    Some(if a_longer {
        best
    } else {
        HalfMatch {
            a_prefix: best.b_prefix,
            a_suffix: best.b_suffix,
            b_prefix: best.a_prefix,
            b_suffix: best.a_suffix,
            common: best.common,
        }
    })
}

/// Tries the quarter-length seed of `long` starting at `i`. In the returned match
/// the `a_*` fields belong to `long` and the `b_*` fields to `short`.
fn half_match_at(long: &[char], short: &[char], i: usize) -> Option<HalfMatch> {
    let seed = &long[i..i + long.len() / 4];
    let mut best: Option<HalfMatch> = None;
    let mut best_len = 0;
    let mut from = 0;
    while let Some(j) = find(short, seed, from) {
        let prefix = common_prefix(&long[i..], &short[j..]);
        let suffix = common_suffix(&long[..i], &short[..j]);
        if best_len < prefix + suffix {
            best_len = prefix + suffix;
            let mut common = short[j - suffix..j].to_vec();
            common.extend_from_slice(&short[j..j + prefix]);
            best = Some(HalfMatch {
                a_prefix: long[..i - suffix].to_vec(),
                a_suffix: long[i + prefix..].to_vec(),
                b_prefix: short[..j - suffix].to_vec(),
                b_suffix: short[j + prefix..].to_vec(),
                common,
            });
        }
        from = j + 1;
    }
    best.filter(|m| m.common.len() * 2 >= long.len())
}

// ============================================================================
// LINE MODE
// ============================================================================

/// Highest line index that still maps onto a scalar value once the surrogate
/// range is skipped.
const MAX_LINES: usize = 0x10FFFF - 0x800;

fn line_token(index: usize) -> char {
    let code = if index < 0xD800 { index } else { index + 0x800 };
    char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn token_index(token: char) -> usize {
    let code = token as usize;
    if code < 0xD800 {
        code
    } else {
        code - 0x800
    }
}

struct LineTable {
    lines: Vec<Vec<char>>,
    index: HashMap<Vec<char>, usize>,
}

impl LineTable {
    fn new() -> Self {
        // Index 0 is never handed out.
        Self {
            lines: vec![Vec::new()],
            index: HashMap::new(),
        }
    }

    fn tokenize(&mut self, text: &[char]) -> Vec<char> {
        let mut tokens = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let end = if self.lines.len() >= MAX_LINES {
                // Out of tokens: the rest of the text becomes one line.
                text.len()
            } else {
                text[start..]
                    .iter()
                    .position(|c| *c == '\n')
                    .map_or(text.len(), |i| start + i + 1)
            };
            let line = &text[start..end];
            let index = match self.index.get(line) {
                Some(index) => *index,
                None => {
                    self.lines.push(line.to_vec());
                    self.index.insert(line.to_vec(), self.lines.len() - 1);
                    self.lines.len() - 1
                }
            };
            tokens.push(line_token(index));
            start = end;
        }
        tokens
    }

    fn expand(&self, diffs: &mut [Chunk]) {
        for chunk in diffs {
            let text: Vec<char> = chunk
                .text
                .iter()
                .flat_map(|token| self.lines[token_index(*token)].iter().copied())
                .collect();
            chunk.text = text;
        }
    }
}

/// Diffs by whole lines first, then rediffs each replaced block by character.
fn line_mode(a: &[char], b: &[char], deadline: Option<Instant>) -> Vec<Chunk> {
    let mut table = LineTable::new();
    let a_tokens = table.tokenize(a);
    let b_tokens = table.tokenize(b);

    let mut diffs = diff_chars(&a_tokens, &b_tokens, false, deadline);
    table.expand(&mut diffs);
    // Drop coincidental matches such as blank lines.
    cleanup::semantic(&mut diffs);

    let mut out = Vec::with_capacity(diffs.len());
    let mut deleted: Vec<char> = Vec::new();
    let mut inserted: Vec<char> = Vec::new();
    let mut pending: Vec<Chunk> = Vec::new();
    for chunk in diffs {
        match chunk.op {
            Operation::Delete => {
                deleted.extend_from_slice(&chunk.text);
                pending.push(chunk);
            }
            Operation::Insert => {
                inserted.extend_from_slice(&chunk.text);
                pending.push(chunk);
            }
            Operation::Equal => {
                flush_block(&mut out, &mut pending, &mut deleted, &mut inserted, deadline);
                out.push(chunk);
            }
        }
    }
    flush_block(&mut out, &mut pending, &mut deleted, &mut inserted, deadline);
    out
}

fn flush_block(
    out: &mut Vec<Chunk>,
    pending: &mut Vec<Chunk>,
    deleted: &mut Vec<char>,
    inserted: &mut Vec<char>,
    deadline: Option<Instant>,
) {
    if !deleted.is_empty() && !inserted.is_empty() {
        out.extend(diff_chars(deleted, inserted, false, deadline));
        pending.clear();
    } else {
        out.append(pending);
    }
    deleted.clear();
    inserted.clear();
}

// ============================================================================
// BISECTION
// ============================================================================

/// Finds the middle snake of an optimal edit path and splits the problem there.
/// Falls back to "delete all, insert all" when the deadline passes or the texts
/// have nothing in common.
fn bisect(a: &[char], b: &[char], deadline: Option<Instant>) -> Vec<Chunk> {
    let a_len = a.len() as isize;
    let b_len = b.len() as isize;
    let max_d = (a_len + b_len + 1) / 2;
    let v_offset = max_d;
    let v_len = 2 * max_d + 2;
    let mut v1 = vec![-1isize; v_len as usize];
    let mut v2 = vec![-1isize; v_len as usize];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;
    let delta = a_len - b_len;
    // With an odd total length the forward path is the one that collides.
    let front = delta % 2 != 0;

    // Trim the k range so the frontiers stay inside the edit graph.
    let mut k1_start = 0;
    let mut k1_end = 0;
    let mut k2_start = 0;
    let mut k2_end = 0;

    for d in 0..max_d {
        if deadline.is_some_and(|at| Instant::now() > at) {
            break;
        }

        let mut k1 = -d + k1_start;
        while k1 <= d - k1_end {
            let k1_offset = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                v1[k1_offset + 1]
            } else {
                v1[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < a_len && y1 < b_len && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_offset] = x1;
            if x1 > a_len {
                k1_end += 2;
            } else if y1 > b_len {
                k1_start += 2;
            } else if front {
                let k2_offset = v_offset + delta - k1;
                if k2_offset >= 0 && k2_offset < v_len && v2[k2_offset as usize] != -1 {
                    // Mirror the reverse frontier onto forward coordinates.
                    let x2 = a_len - v2[k2_offset as usize];
                    if x1 >= x2 {
                        return split(a, b, x1 as usize, y1 as usize, deadline);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2_start;
        while k2 <= d - k2_end {
            let k2_offset = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                v2[k2_offset + 1]
            } else {
                v2[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < a_len
                && y2 < b_len
                && a[(a_len - x2 - 1) as usize] == b[(b_len - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_offset] = x2;
            if x2 > a_len {
                k2_end += 2;
            } else if y2 > b_len {
                k2_start += 2;
            } else if !front {
                let k1_offset = v_offset + delta - k2;
                if k1_offset >= 0 && k1_offset < v_len && v1[k1_offset as usize] != -1 {
                    let x1 = v1[k1_offset as usize];
                    let y1 = v_offset + x1 - k1_offset;
                    if x1 >= a_len - x2 {
                        return split(a, b, x1 as usize, y1 as usize, deadline);
                    }
                }
            }
            k2 += 2;
        }
    }

    vec![Chunk::new(Operation::Delete, a), Chunk::new(Operation::Insert, b)]
}

fn split(a: &[char], b: &[char], x: usize, y: usize, deadline: Option<Instant>) -> Vec<Chunk> {
    let mut diffs = diff_chars(&a[..x], &b[..y], false, deadline);
    diffs.extend(diff_chars(&a[x..], &b[y..], false, deadline));
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    fn render(diffs: &[Chunk]) -> Vec<(Operation, String)> {
        diffs
            .iter()
            .map(|c| (c.op, c.text.iter().collect()))
            .collect()
    }

    #[test]
    fn test_common_affixes() {
        assert_eq!(common_prefix(&chars("abc"), &chars("xyz")), 0);
        assert_eq!(common_prefix(&chars("1234abcdef"), &chars("1234xyz")), 4);
        assert_eq!(common_prefix(&chars("1234"), &chars("1234xyz")), 4);
        assert_eq!(common_suffix(&chars("abcdef1234"), &chars("xyz1234")), 4);
        assert_eq!(common_suffix(&chars("1234"), &chars("xyz1234")), 4);
    }

    #[test]
    fn test_common_overlap() {
        assert_eq!(common_overlap(&chars(""), &chars("abcd")), 0);
        assert_eq!(common_overlap(&chars("abc"), &chars("abcd")), 3);
        assert_eq!(common_overlap(&chars("123456"), &chars("abcd")), 0);
        assert_eq!(common_overlap(&chars("123456xxx"), &chars("xxxabcd")), 3);
        assert_eq!(common_overlap(&chars("fi"), &chars("\u{fb01}i")), 0);
    }

    #[test]
    fn test_half_match() {
        let deadline = Some(Instant::now() + std::time::Duration::from_secs(60));
        assert!(half_match(&chars("1234567890"), &chars("abcdef"), deadline).is_none());
        assert!(half_match(&chars("12345"), &chars("23"), deadline).is_none());

        let m = half_match(&chars("1234567890"), &chars("a345678z"), deadline).unwrap();
        assert_eq!(m.a_prefix, chars("12"));
        assert_eq!(m.a_suffix, chars("90"));
        assert_eq!(m.b_prefix, chars("a"));
        assert_eq!(m.b_suffix, chars("z"));
        assert_eq!(m.common, chars("345678"));

        let m = half_match(&chars("a345678z"), &chars("1234567890"), deadline).unwrap();
        assert_eq!(m.a_prefix, chars("a"));
        assert_eq!(m.b_prefix, chars("12"));
        assert_eq!(m.common, chars("345678"));

        let m = half_match(&chars("qHilloHelloHew"), &chars("xHelloHeHulloy"), deadline).unwrap();
        assert_eq!(m.a_prefix, chars("qHillo"));
        assert_eq!(m.a_suffix, chars("w"));
        assert_eq!(m.b_prefix, chars("x"));
        assert_eq!(m.b_suffix, chars("Hulloy"));
        assert_eq!(m.common, chars("HelloHe"));

        assert!(half_match(&chars("qHilloHelloHew"), &chars("xHelloHeHulloy"), None).is_none());
    }

    #[test]
    fn test_line_tokens_skip_surrogates() {
        assert_eq!(token_index(line_token(1)), 1);
        assert_eq!(token_index(line_token(0xD800)), 0xD800);
        assert_ne!(line_token(0xD7FF), line_token(0xD800));
    }

    #[test]
    fn test_tokenize_shares_lines() {
        let mut table = LineTable::new();
        let a = table.tokenize(&chars("alpha\nbeta\nalpha\n"));
        let b = table.tokenize(&chars("beta\nalpha\nbeta\n"));
        assert_eq!(a, vec![line_token(1), line_token(2), line_token(1)]);
        assert_eq!(b, vec![line_token(2), line_token(1), line_token(2)]);

        let tail = table.tokenize(&chars("no newline"));
        assert_eq!(tail, vec![line_token(3)]);
    }

    #[test]
    fn test_bisect() {
        let deadline = Some(Instant::now() + std::time::Duration::from_secs(60));
        assert_eq!(
            render(&bisect(&chars("cat"), &chars("map"), deadline)),
            vec![
                (Operation::Delete, "c".to_string()),
                (Operation::Insert, "m".to_string()),
                (Operation::Equal, "a".to_string()),
                (Operation::Delete, "t".to_string()),
                (Operation::Insert, "p".to_string()),
            ]
        );
    }

    #[test]
    fn test_bisect_past_deadline() {
        let deadline = Some(Instant::now() - std::time::Duration::from_secs(1));
        assert_eq!(
            render(&bisect(&chars("cat"), &chars("map"), deadline)),
            vec![
                (Operation::Delete, "cat".to_string()),
                (Operation::Insert, "map".to_string()),
            ]
        );
    }

    #[test]
    fn test_containment() {
        assert_eq!(
            render(&diff_chars(&chars("xabcy"), &chars("abc"), false, None)),
            vec![
                (Operation::Delete, "x".to_string()),
                (Operation::Equal, "abc".to_string()),
                (Operation::Delete, "y".to_string()),
            ]
        );
    }
}
