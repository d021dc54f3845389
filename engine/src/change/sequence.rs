//! Merging splices and moves on sequences.
//!
//! Moves are merged by tracking item identities: both sides are rewritten as
//! permutations of tokens, a shared final order is chosen, and each side's
//! transformed change is whatever takes its own result to that order. A
//! token stands for a whole segment between the bounds of the two changes,
//! so the permutations stay small however far into the sequence they reach.

use super::{end_of, Change, Merged, Move, Splice};
use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::HashSet;

pub(super) fn merge_splices(l: &Splice, r: &Splice) -> Result<Merged> {
    if matches!(
        (&l.before, &r.before),
        (Value::Counter(_), Value::Counter(_))
    ) {
        return Ok((Some(Change::Splice(r.clone())), Some(Change::Splice(l.clone()))));
    }

    let (lb, la) = (l.before.len(), l.after.len());
    let (rb, ra) = (r.before.len(), r.after.len());
    let (lo, le) = (l.offset, end_of(l.offset, lb)?);
    let (ro, re) = (r.offset, end_of(r.offset, rb)?);

    if le <= ro {
        let shifted = Change::splice(end_of(ro - lb, la)?, r.before.clone(), r.after.clone());
        return Ok((Some(shifted), Some(Change::Splice(l.clone()))));
    }
    if re <= lo {
        let shifted = Change::splice(end_of(lo - rb, ra)?, l.before.clone(), l.after.clone());
        return Ok((Some(Change::Splice(r.clone())), Some(shifted)));
    }
    if lo <= ro && re <= le {
        let inner = Change::splice(ro - lo, r.before.clone(), r.after.clone());
        let before = l.before.apply(&inner).map_err(Error::into_merge_error)?;
        return Ok((None, Some(Change::splice(lo, before, l.after.clone()))));
    }
    if ro <= lo && le <= re {
        let inner = Change::splice(lo - ro, l.before.clone(), l.after.clone());
        let before = r.before.apply(&inner).map_err(Error::into_merge_error)?;
        return Ok((Some(Change::splice(ro, before, r.after.clone())), None));
    }

    if lo < ro {
        let right = Change::splice(end_of(lo, la)?, r.before.slice(le - ro, rb)?, r.after.clone());
        let left = Change::splice(lo, l.before.slice(0, ro - lo)?, l.after.clone());
        Ok((Some(right), Some(left)))
    } else {
        let right = Change::splice(ro, r.before.slice(0, lo - ro)?, r.after.clone());
        let left = Change::splice(end_of(ro, ra)?, l.before.slice(re - lo, lb)?, l.after.clone());
        Ok((Some(right), Some(left)))
    }
}

/// An item in a token permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Token {
    /// The segment originally at this index.
    Orig(usize),
    /// The content inserted by a concurrent splice.
    Ins,
}

/// Cut points splitting the front of a sequence into segments that every
/// change in a merge keeps whole.
struct Segments(Vec<usize>);

impl Segments {
    fn new(points: impl IntoIterator<Item = usize>) -> Self {
        let mut cuts: Vec<usize> = points.into_iter().chain([0]).collect();
        cuts.sort_unstable();
        cuts.dedup();
        Segments(cuts)
    }

    fn tokens(&self) -> Vec<Token> {
        (0..self.0.len() - 1).map(Token::Orig).collect()
    }

    fn width(&self, segment: usize) -> usize {
        self.0[segment + 1] - self.0[segment]
    }

    /// Index of the segment starting at cut `at`.
    fn at(&self, at: usize) -> usize {
        self.0.partition_point(|cut| *cut < at)
    }

    /// `m` counted in segments. Every bound of `m` must be a cut.
    fn scale(&self, m: &Move, (start, block_end, end): (usize, usize, usize)) -> Move {
        let offset = self.at(m.offset);
        let count = self.at(block_end) - offset;
        let distance = if m.distance > 0 {
            (self.at(end) - self.at(block_end)) as isize
        } else {
            -((offset - self.at(start)) as isize)
        };
        Move {
            offset,
            count,
            distance,
        }
    }
}

fn span_of(m: &Move) -> Result<(usize, usize, usize)> {
    m.span().ok_or_else(|| {
        Error::invalid_operation(format!("move {}+{} by {} overflows", m.offset, m.count, m.distance))
    })
}

/// Moves taking `src` to `dst`, two orderings of the same tokens.
fn moves_from(src: &[Token], dst: &[Token], width: impl Fn(Token) -> usize) -> Option<Change> {
    let total = |tokens: &[Token]| tokens.iter().map(|t| width(*t)).sum::<usize>();
    let mut cur = src.to_vec();
    let mut moves = Vec::new();
    let mut i = 0;
    while i < dst.len() {
        if cur[i] == dst[i] {
            i += 1;
            continue;
        }
        let Some(j) = cur[i..].iter().position(|t| *t == dst[i]).map(|p| p + i) else {
            break;
        };
        let mut run = 1;
        while i + run < dst.len() && j + run < cur.len() && cur[j + run] == dst[i + run] {
            run += 1;
        }
        let count = total(&cur[j..j + run]);
        if count > 0 {
            moves.push(Change::moving(
                total(&cur[..j]),
                count,
                -(total(&cur[i..j]) as isize),
            ));
        }
        cur[i..j + run].rotate_left(j - i);
        i += run;
    }
    Change::chain(moves)
}

pub(super) fn merge_moves(l: &Move, r: &Move) -> Result<Merged> {
    match (l.is_noop(), r.is_noop()) {
        (true, true) => return Ok((None, None)),
        (true, false) => return Ok((Some(Change::Move(*r)), None)),
        (false, true) => return Ok((None, Some(Change::Move(*l)))),
        (false, false) => {}
    }

    let (l_span, r_span) = (span_of(l)?, span_of(r)?);
    let segments = Segments::new([
        l_span.0, l.offset, l_span.1, l_span.2, r_span.0, r.offset, r_span.1, r_span.2,
    ]);
    let (lm, rm) = (segments.scale(l, l_span), segments.scale(r, r_span));
    let ids = segments.tokens();
    let after_left = lm.permute(&ids);
    let after_right = rm.permute(&ids);

    // Left's block keeps the order right gave it and lands next to left's
    // anchor.
    let block = lm.offset..lm.offset + lm.count;
    let in_block = |t: &Token| matches!(t, Token::Orig(i) if block.contains(i));
    let block: Vec<Token> = after_right.iter().copied().filter(|t| in_block(t)).collect();
    let mut fin: Vec<Token> = after_right.iter().copied().filter(|t| !in_block(t)).collect();
    let (anchor, after_anchor) = if l.distance > 0 {
        (Token::Orig(segments.at(l_span.2) - 1), true)
    } else {
        (Token::Orig(segments.at(l_span.0)), false)
    };
    let at = fin
        .iter()
        .position(|t| *t == anchor)
        .map(|p| if after_anchor { p + 1 } else { p })
        .ok_or_else(|| Error::invalid_operation("move anchor lost"))?;
    fin.splice(at..at, block);

    let width = |t: Token| match t {
        Token::Orig(k) => segments.width(k),
        Token::Ins => 0,
    };
    Ok((
        moves_from(&after_left, &fin, width),
        moves_from(&after_right, &fin, width),
    ))
}

/// Returns `(splice', move')`.
pub(super) fn merge_move_splice(m: &Move, s: &Splice) -> Result<Merged> {
    if !s.before.is_sequence() || !s.after.is_sequence() {
        return Err(Error::invalid_operation(format!(
            "cannot merge move with {} splice",
            s.before.kind()
        )));
    }
    if m.is_noop() {
        return Ok((Some(Change::Splice(s.clone())), None));
    }

    let m_span = span_of(m)?;
    let (start, end) = (s.offset, end_of(s.offset, s.before.len())?);
    let inserted = s.after.len();
    let segments = Segments::new([m_span.0, m.offset, m_span.1, m_span.2, start, end]);
    let width = |t: Token| match t {
        Token::Orig(k) => segments.width(k),
        Token::Ins => inserted,
    };

    let tokens = segments.tokens();
    let mut after_splice = tokens[..segments.at(start)].to_vec();
    if inserted > 0 {
        after_splice.push(Token::Ins);
    }
    after_splice.extend_from_slice(&tokens[segments.at(end)..]);
    let after_move = segments.scale(m, m_span).permute(&tokens);

    let ins_in_block = m.offset < start && end < m_span.1;
    let block = segments.at(m.offset)..segments.at(m_span.1);
    let in_block = |t: &Token| match t {
        Token::Orig(k) => block.contains(k),
        Token::Ins => ins_in_block,
    };
    let gap = if m.distance > 0 { m_span.2 } else { m_span.0 };
    let gap_segment = segments.at(gap);
    let block: Vec<Token> = after_splice.iter().copied().filter(|t| in_block(t)).collect();
    let mut fin: Vec<Token> = after_splice.iter().copied().filter(|t| !in_block(t)).collect();
    let at = fin
        .iter()
        .filter(|t| match t {
            Token::Orig(k) => *k < gap_segment,
            Token::Ins => gap > start,
        })
        .count();
    fin.splice(at..at, block);

    let moved = moves_from(&after_splice, &fin, width);
    let spliced = edits_from(&after_move, &fin, s, &segments)?;
    Ok((spliced, moved))
}

/// Splices taking `src` (the moved originals) to `dst` (the final order):
/// segments the splice deleted are removed and its insertion is added.
fn edits_from(
    src: &[Token],
    dst: &[Token],
    s: &Splice,
    segments: &Segments,
) -> Result<Option<Change>> {
    let kept: HashSet<Token> = dst.iter().copied().collect();
    let value_of = |t: Token| match t {
        Token::Orig(k) => s
            .before
            .slice(segments.0[k] - s.offset, segments.0[k + 1] - s.offset),
        Token::Ins => Ok(s.after.clone()),
    };

    let mut edits = Vec::new();
    let (mut i, mut j, mut pos) = (0, 0, 0);
    while i < src.len() || j < dst.len() {
        if i < src.len() && j < dst.len() && src[i] == dst[j] {
            if let Token::Orig(k) = src[i] {
                pos += segments.width(k);
            }
            i += 1;
            j += 1;
            continue;
        }
        let mut before = s.before.empty_like()?;
        while i < src.len() && !kept.contains(&src[i]) {
            before = before.concat(&value_of(src[i])?)?;
            i += 1;
        }
        let mut after = s.after.empty_like()?;
        while j < dst.len() && dst[j] == Token::Ins {
            after = after.concat(&value_of(dst[j])?)?;
            j += 1;
        }
        if before.is_empty() && after.is_empty() {
            return Err(Error::invalid_operation("move and splice orders disagree"));
        }
        let width = after.len();
        edits.push(Change::splice(pos, before, after));
        pos += width;
    }
    Ok(Change::chain(edits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::text(s)
    }

    fn apply_all(v: &Value, change: &Option<Change>) -> Value {
        match change {
            Some(c) => v.apply(c).unwrap(),
            None => v.clone(),
        }
    }

    fn originals(n: usize) -> Vec<Token> {
        (0..n).map(Token::Orig).collect()
    }

    fn counters(n: i64) -> Value {
        Value::list((0..n).map(Value::Counter))
    }

    #[test]
    fn moves_from_rotates_runs() {
        let src = originals(5);
        let dst = vec![
            Token::Orig(3),
            Token::Orig(4),
            Token::Orig(0),
            Token::Orig(1),
            Token::Orig(2),
        ];
        let change = moves_from(&src, &dst, |_| 1);
        assert_eq!(change, Some(Change::moving(3, 2, -3)));
    }

    #[test]
    fn moves_from_identity() {
        let src = originals(4);
        assert_eq!(moves_from(&src, &src, |_| 1), None);
    }

    #[test]
    fn same_move_twice() {
        let v = text("abcdef");
        let m = Move {
            offset: 0,
            count: 2,
            distance: 2,
        };
        let (r, l) = merge_moves(&m, &m).unwrap();
        let once = v.apply(&Change::Move(m)).unwrap();
        assert_eq!(apply_all(&once, &r), once);
        assert_eq!(apply_all(&once, &l), once);
    }

    #[test]
    fn move_into_deleted_region() {
        // Move "bc" past "de" while "de" is deleted.
        let v = text("abcdefg");
        let m = Move {
            offset: 1,
            count: 2,
            distance: 2,
        };
        let s = Splice {
            offset: 3,
            before: text("de"),
            after: text(""),
        };
        let (s2, m2) = merge_move_splice(&m, &s).unwrap();
        let a = apply_all(&v.apply(&Change::Move(m)).unwrap(), &s2);
        let b = apply_all(&v.apply(&Change::Splice(s)).unwrap(), &m2);
        assert_eq!(a, b);
        assert_eq!(a, text("abcfg"));
    }

    #[test]
    fn insert_inside_moved_block_travels() {
        let v = text("abcdefg");
        let m = Move {
            offset: 1,
            count: 3,
            distance: 2,
        };
        let s = Splice {
            offset: 2,
            before: text(""),
            after: text("XY"),
        };
        let (s2, m2) = merge_move_splice(&m, &s).unwrap();
        let a = apply_all(&v.apply(&Change::Move(m)).unwrap(), &s2);
        let b = apply_all(&v.apply(&Change::Splice(s)).unwrap(), &m2);
        assert_eq!(a, b);
        assert_eq!(a, text("aefbXYcdg"));
    }

    #[test]
    fn noop_move_drops_out_against_shrinking_splice() {
        let v = counters(6);
        let m = Move {
            offset: 2,
            count: 4,
            distance: 0,
        };
        let s = Splice {
            offset: 0,
            before: counters(1),
            after: Value::list([]),
        };
        let (s2, m2) = merge_move_splice(&m, &s).unwrap();
        assert_eq!(m2, None);
        let a = apply_all(&v.apply(&Change::Move(m)).unwrap(), &s2);
        let b = v.apply(&Change::Splice(s)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_move_drops_out_against_move() {
        let v = counters(6);
        let empty = Move {
            offset: 0,
            count: 0,
            distance: 5,
        };
        let real = Move {
            offset: 0,
            count: 2,
            distance: 4,
        };
        let (r2, l2) = merge_moves(&empty, &real).unwrap();
        assert_eq!(l2, None);
        assert_eq!(r2, Some(Change::Move(real)));
        let (r2, l2) = merge_moves(&real, &empty).unwrap();
        assert_eq!((r2, l2), (None, Some(Change::Move(real))));
        let a = v.apply(&Change::Move(real)).unwrap();
        assert_eq!(a, Value::list([2, 3, 4, 5, 0, 1].map(Value::Counter)));
    }

    #[test]
    fn far_moves_merge_on_segments() {
        let len = 1 << 40;
        let l = Move {
            offset: len - 10,
            count: 2,
            distance: 3,
        };
        let r = Move {
            offset: 5,
            count: 1,
            distance: -2,
        };
        let (r2, l2) = merge_moves(&l, &r).unwrap();
        assert_eq!(r2, Some(Change::Move(r)));
        // The same rotation, expressed from the other side.
        assert_eq!(l2, Some(Change::moving(len - 8, 3, -2)));
    }

    #[test]
    fn overflowing_offsets_fail_merge() {
        let huge = Splice {
            offset: usize::MAX,
            before: text("x"),
            after: text(""),
        };
        let small = Splice {
            offset: 0,
            before: text(""),
            after: text("y"),
        };
        assert!(matches!(
            merge_splices(&huge, &small),
            Err(Error::InvalidOperation(_))
        ));
        let m = Move {
            offset: usize::MAX,
            count: 1,
            distance: 1,
        };
        assert!(matches!(
            merge_moves(&m, &Move { offset: 0, count: 1, distance: 1 }),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            merge_move_splice(&m, &small),
            Err(Error::InvalidOperation(_))
        ));
    }
}
