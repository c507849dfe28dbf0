//! Post-processing passes over a raw edit script.

use super::bisect::{common_overlap, common_prefix, common_suffix};
use super::{Chunk, Operation};

/// Eliminates equalities no longer than the edits on both sides of them, then
/// extracts overlaps between adjacent deletions and insertions.
pub(crate) fn semantic(diffs: &mut Vec<Chunk>) {
    let mut changes = false;
    // Indices of candidate equalities, innermost last.
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<Vec<char>> = None;
    // Edit lengths before and after the last equality.
    let (mut inserted_before, mut deleted_before) = (0usize, 0usize);
    let (mut inserted_after, mut deleted_after) = (0usize, 0usize);

    let mut pointer = 0;
    while pointer < diffs.len() {
        if diffs[pointer].op == Operation::Equal {
            equalities.push(pointer);
            inserted_before = inserted_after;
            deleted_before = deleted_after;
            inserted_after = 0;
            deleted_after = 0;
            last_equality = Some(diffs[pointer].text.clone());
            pointer += 1;
            continue;
        }

        if diffs[pointer].op == Operation::Insert {
            inserted_after += diffs[pointer].text.len();
        } else {
            deleted_after += diffs[pointer].text.len();
        }
        let eliminate = last_equality.as_ref().is_some_and(|eq| {
            !eq.is_empty()
                && eq.len() <= inserted_before.max(deleted_before)
                && eq.len() <= inserted_after.max(deleted_after)
        });
        if eliminate {
            if let (Some(at), Some(text)) = (equalities.pop(), last_equality.take()) {
                // Split the equality into a deletion followed by an insertion.
                diffs.insert(at, Chunk::new(Operation::Delete, text));
                diffs[at + 1].op = Operation::Insert;
                // The previous equality needs re-evaluating too.
                equalities.pop();
                inserted_before = 0;
                deleted_before = 0;
                inserted_after = 0;
                deleted_after = 0;
                changes = true;
                pointer = equalities.last().map_or(0, |prev| prev + 1);
                continue;
            }
        }
        pointer += 1;
    }

    if changes {
        merge(diffs);
    }
    extract_overlaps(diffs);
}

/// `<del>abcxxx</del><ins>xxxdef</ins>` becomes `<del>abc</del>xxx<ins>def</ins>`, and
/// `<del>xxxabc</del><ins>defxxx</ins>` becomes `<ins>def</ins>xxx<del>abc</del>`,
/// provided the overlap is at least half of either edit.
fn extract_overlaps(diffs: &mut Vec<Chunk>) {
    let mut pointer = 1;
    while pointer < diffs.len() {
        if diffs[pointer - 1].op == Operation::Delete && diffs[pointer].op == Operation::Insert {
            let deletion = diffs[pointer - 1].text.clone();
            let insertion = diffs[pointer].text.clone();
            let forward = common_overlap(&deletion, &insertion);
            let backward = common_overlap(&insertion, &deletion);
            let half = |n: usize| n * 2 >= deletion.len() || n * 2 >= insertion.len();
            if forward >= backward {
                if forward > 0 && half(forward) {
                    diffs.insert(
                        pointer,
                        Chunk::new(Operation::Equal, &insertion[..forward]),
                    );
                    diffs[pointer - 1].text = deletion[..deletion.len() - forward].to_vec();
                    diffs[pointer + 1].text = insertion[forward..].to_vec();
                    pointer += 1;
                }
            } else if half(backward) {
                diffs.insert(
                    pointer,
                    Chunk::new(Operation::Equal, &deletion[..backward]),
                );
                diffs[pointer - 1] = Chunk::new(
                    Operation::Insert,
                    &insertion[..insertion.len() - backward],
                );
                diffs[pointer + 1] = Chunk::new(Operation::Delete, &deletion[backward..]);
                pointer += 1;
            }
            pointer += 1;
        }
        pointer += 1;
    }
    diffs.retain(|c| !c.text.is_empty());
}

/// Turns short equalities surrounded by edits into edits when that reduces the
/// number of runs by more than `edit_cost` characters' worth.
pub(crate) fn efficiency(diffs: &mut Vec<Chunk>, edit_cost: usize) {
    let mut changes = false;
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<Vec<char>> = None;
    // Whether there is an insertion/deletion before and after the last equality.
    let (mut pre_ins, mut pre_del) = (false, false);
    let (mut post_ins, mut post_del) = (false, false);

    let mut pointer = 0;
    while pointer < diffs.len() {
        if diffs[pointer].op == Operation::Equal {
            if diffs[pointer].text.len() < edit_cost && (post_ins || post_del) {
                equalities.push(pointer);
                pre_ins = post_ins;
                pre_del = post_del;
                last_equality = Some(diffs[pointer].text.clone());
            } else {
                // Not a candidate, and can never become one.
                equalities.clear();
                last_equality = None;
            }
            post_ins = false;
            post_del = false;
            pointer += 1;
            continue;
        }

        if diffs[pointer].op == Operation::Delete {
            post_del = true;
        } else {
            post_ins = true;
        }

        // Split on:
        //   <ins>A</ins><del>B</del>XY<ins>C</ins><del>D</del>
        //   <ins>A</ins>X<ins>C</ins><del>D</del>
        //   <ins>A</ins><del>B</del>X<ins>C</ins>
        //   <ins>A</del>X<ins>C</ins><del>D</del>
        //   <ins>A</ins><del>B</del>X<del>C</del>
        let sides = [pre_ins, pre_del, post_ins, post_del]
            .iter()
            .filter(|b| **b)
            .count();
        let split = last_equality.as_ref().is_some_and(|eq| {
            !eq.is_empty() && (sides == 4 || (eq.len() * 2 < edit_cost && sides == 3))
        });
        if split {
            if let (Some(at), Some(text)) = (equalities.pop(), last_equality.take()) {
                diffs.insert(at, Chunk::new(Operation::Delete, text));
                diffs[at + 1].op = Operation::Insert;
                changes = true;
                if pre_ins && pre_del {
                    // Nothing before this point can be affected.
                    post_ins = true;
                    post_del = true;
                    equalities.clear();
                } else {
                    equalities.pop();
                    post_ins = false;
                    post_del = false;
                    pointer = equalities.last().map_or(0, |prev| prev + 1);
                    continue;
                }
            }
        }
        pointer += 1;
    }

    if changes {
        merge(diffs);
    }
}

/// Merges runs of the same kind, factors common prefixes and suffixes out of
/// delete/insert groups into the neighbouring equalities, and shifts single edits
/// sideways to eliminate an equality (`A<ins>BA</ins>C` becomes `<ins>AB</ins>AC`).
pub(crate) fn merge(diffs: &mut Vec<Chunk>) {
    loop {
        coalesce(diffs);
        if !shift_single_edits(diffs) {
            return;
        }
    }
}

fn coalesce(diffs: &mut Vec<Chunk>) {
    let mut out: Vec<Chunk> = Vec::with_capacity(diffs.len());
    let mut deleted: Vec<char> = Vec::new();
    let mut inserted: Vec<char> = Vec::new();

    for chunk in diffs.drain(..) {
        match chunk.op {
            Operation::Delete => deleted.extend(chunk.text),
            Operation::Insert => inserted.extend(chunk.text),
            Operation::Equal => {
                let mut trailing = chunk.text;
                flush_edits(&mut out, &mut deleted, &mut inserted, &mut trailing);
                push_equal(&mut out, trailing);
            }
        }
    }
    let mut trailing = Vec::new();
    flush_edits(&mut out, &mut deleted, &mut inserted, &mut trailing);
    push_equal(&mut out, trailing);
    *diffs = out;
}

/// Emits the pending deletion and insertion, moving any shared prefix onto the
/// preceding equality and any shared suffix onto `trailing`.
fn flush_edits(
    out: &mut Vec<Chunk>,
    deleted: &mut Vec<char>,
    inserted: &mut Vec<char>,
    trailing: &mut Vec<char>,
) {
    if !deleted.is_empty() && !inserted.is_empty() {
        let prefix = common_prefix(inserted, deleted);
        if prefix > 0 {
            push_equal(out, inserted[..prefix].to_vec());
            inserted.drain(..prefix);
            deleted.drain(..prefix);
        }
        let suffix = common_suffix(inserted, deleted);
        if suffix > 0 {
            let mut shared = inserted[inserted.len() - suffix..].to_vec();
            shared.append(trailing);
            *trailing = shared;
            inserted.truncate(inserted.len() - suffix);
            deleted.truncate(deleted.len() - suffix);
        }
    }
    if !deleted.is_empty() {
        out.push(Chunk::new(Operation::Delete, std::mem::take(deleted)));
    }
    if !inserted.is_empty() {
        out.push(Chunk::new(Operation::Insert, std::mem::take(inserted)));
    }
}

fn push_equal(out: &mut Vec<Chunk>, text: Vec<char>) {
    if text.is_empty() {
        return;
    }
    match out.last_mut() {
        Some(last) if last.op == Operation::Equal => last.text.extend(text),
        _ => out.push(Chunk::new(Operation::Equal, text)),
    }
}

/// One sweep of sideways shifts; returns whether anything moved.
fn shift_single_edits(diffs: &mut Vec<Chunk>) -> bool {
    let mut changes = false;
    let mut pointer = 1;
    while pointer + 1 < diffs.len() {
        if diffs[pointer - 1].op == Operation::Equal && diffs[pointer + 1].op == Operation::Equal {
            let prev = diffs[pointer - 1].text.clone();
            let next = diffs[pointer + 1].text.clone();
            let edit = diffs[pointer].text.clone();
            if edit.ends_with(&prev) {
                // Shift the edit over the previous equality.
                let mut shifted = prev.clone();
                shifted.extend_from_slice(&edit[..edit.len() - prev.len()]);
                diffs[pointer].text = shifted;
                let mut grown = prev;
                grown.extend_from_slice(&next);
                diffs[pointer + 1].text = grown;
                diffs.remove(pointer - 1);
                changes = true;
            } else if edit.starts_with(&next) {
                // Shift the edit over the next equality.
                diffs[pointer - 1].text.extend_from_slice(&next);
                let mut shifted = edit[next.len()..].to_vec();
                shifted.extend_from_slice(&next);
                diffs[pointer].text = shifted;
                diffs.remove(pointer + 1);
                changes = true;
            }
        }
        pointer += 1;
    }
    changes
}
