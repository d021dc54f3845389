//! Merging range changes against list edits.

use super::{end_of, Change, Merged, Move, Range, Splice};
use crate::error::{Error, Result};

/// Returns `(splice', range')`.
///
/// Items the splice removes carry the range change into its `before`. Items
/// the splice inserts are left alone, so the range is split around them.
pub(super) fn merge_range_splice(r: &Range, s: &Splice) -> Result<Merged> {
    let (start, end) = (r.offset, end_of(r.offset, r.count)?);
    let (so, se) = (s.offset, end_of(s.offset, s.before.len())?);

    let overlap_start = start.max(so);
    let overlap_end = end.min(se);
    let mut before = s.before.clone();
    if overlap_start < overlap_end {
        let inner = Change::range(
            overlap_start - so,
            overlap_end - overlap_start,
            (*r.change).clone(),
        );
        before = before.apply(&inner).map_err(Error::into_merge_error)?;
    }
    let splice = Change::splice(s.offset, before, s.after.clone());

    let mut pieces = Vec::with_capacity(2);
    let head_end = end.min(so);
    if start < head_end {
        pieces.push(Change::range(start, head_end - start, (*r.change).clone()));
    }
    let tail_start = start.max(se);
    if tail_start < end {
        pieces.push(Change::range(
            end_of(tail_start - s.before.len(), s.after.len())?,
            end - tail_start,
            (*r.change).clone(),
        ));
    }
    Ok((Some(splice), Change::chain(pieces)))
}

/// Returns `(move', range')`. The move is unaffected; the range follows the
/// items it covered.
pub(super) fn merge_range_move(r: &Range, m: &Move) -> Result<Merged> {
    let end = end_of(r.offset, r.count)?;
    let (start, block_end, moved_end) = m
        .span()
        .ok_or_else(|| Error::invalid_operation("move bounds overflow"))?;

    // Each stretch between the move's bounds travels as one piece.
    let mut cuts = vec![r.offset, end, start, m.offset, block_end, moved_end];
    cuts.retain(|cut| (r.offset..=end).contains(cut));
    cuts.sort_unstable();
    cuts.dedup();
    let mut stretches: Vec<(usize, usize)> = cuts
        .windows(2)
        .map(|w| (m.map_index(w[0]), w[1] - w[0]))
        .collect();
    stretches.sort_unstable();

    let mut pieces = Vec::new();
    let mut run: Option<(usize, usize)> = None;
    for (index, width) in stretches {
        run = match run {
            Some((first, count)) if first + count == index => Some((first, count + width)),
            Some((first, count)) => {
                pieces.push(Change::range(first, count, (*r.change).clone()));
                Some((index, width))
            }
            None => Some((index, width)),
        };
    }
    if let Some((first, count)) = run {
        pieces.push(Change::range(first, count, (*r.change).clone()));
    }
    Ok((Some(Change::Move(*m)), Change::chain(pieces)))
}

pub(super) fn merge_ranges(l: &Range, r: &Range) -> Result<Merged> {
    let (ls, le) = (l.offset, end_of(l.offset, l.count)?);
    let (rs, re) = (r.offset, end_of(r.offset, r.count)?);
    let (os, oe) = (ls.max(rs), le.min(re));
    if os >= oe {
        return Ok((Some(Change::Range(r.clone())), Some(Change::Range(l.clone()))));
    }

    let (right_inner, left_inner) = l.change.merge(&r.change)?;
    let split = |start: usize, end: usize, outer: &Change, inner: Option<Change>| {
        let mut pieces = Vec::with_capacity(3);
        if start < os {
            pieces.push(Change::range(start, os - start, outer.clone()));
        }
        if let Some(inner) = inner {
            pieces.push(Change::range(os, oe - os, inner));
        }
        if oe < end {
            pieces.push(Change::range(oe, end - oe, outer.clone()));
        }
        Change::chain(pieces)
    };
    Ok((
        split(rs, re, &r.change, right_inner),
        split(ls, le, &l.change, left_inner),
    ))
}
