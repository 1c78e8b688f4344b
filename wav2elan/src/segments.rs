//! Merge/split algebra over speaker turns.
//!
//! Pure functions: no I/O, no allocation beyond the returned vectors.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::Turn;

/// Sub-turns shorter than this are floating-point residue, not audio.
const SLIVER_SECS: f64 = 1e-9;

/// Upper bound on the pieces a single turn may be split into.
const MAX_PIECES: f64 = 1_000_000.0;

fn by_start_then_end(a: &Turn, b: &Turn) -> Ordering {
    a.start
        .total_cmp(&b.start)
        .then_with(|| a.end.total_cmp(&b.end))
}

/// Merge adjacent same-speaker turns separated by at most `max_gap_seconds`.
///
/// Input is sorted by `(start, end)` first. A turn only merges into the turn
/// immediately before it in that order, so another speaker in between always
/// breaks the run. Output is monotonic by start.
pub fn merge_adjacent(turns: &[Turn], max_gap_seconds: f64) -> Vec<Turn> {
    let mut sorted = turns.to_vec();
    sorted.sort_by(by_start_then_end);

    let mut merged: Vec<Turn> = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for candidate in iter {
        if candidate.speaker == current.speaker
            && candidate.start - current.end <= max_gap_seconds
        {
            current.end = current.end.max(candidate.end);
        } else {
            merged.push(std::mem::replace(&mut current, candidate));
        }
    }
    merged.push(current);
    merged
}

/// Split a turn into consecutive sub-turns no longer than `max_duration_seconds`.
///
/// The last piece is clipped to the turn's end; zero-length residue is dropped.
/// A step too small to split the turn into at most a million pieces, or too
/// small to advance past the turn's timestamps, is an `InvalidArgument`.
pub fn split_by_max_duration(turn: &Turn, max_duration_seconds: f64) -> Result<Vec<Turn>> {
    // written this way round so NaN is rejected too
    if !(max_duration_seconds > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "max duration must be positive (got {max_duration_seconds})"
        )));
    }

    if turn.duration() <= max_duration_seconds {
        return Ok(vec![turn.clone()]);
    }

    let estimate = (turn.duration() / max_duration_seconds).ceil();
    if !(estimate <= MAX_PIECES) {
        return Err(Error::InvalidArgument(format!(
            "max duration {max_duration_seconds} would split a {:.3}s turn into {estimate} pieces",
            turn.duration()
        )));
    }

    let mut pieces = Vec::with_capacity(estimate as usize);
    let mut cursor = turn.start;
    while cursor < turn.end {
        let end = (cursor + max_duration_seconds).min(turn.end);
        if end <= cursor {
            return Err(Error::InvalidArgument(format!(
                "max duration {max_duration_seconds} is below timestamp resolution at {cursor}"
            )));
        }
        if end - cursor > SLIVER_SECS {
            pieces.push(Turn::new(cursor, end, turn.speaker.clone()));
        }
        cursor = end;
    }
    Ok(pieces)
}

/// [`split_by_max_duration`] applied to every turn, preserving order.
pub fn split_all(turns: &[Turn], max_duration_seconds: f64) -> Result<Vec<Turn>> {
    let mut out = Vec::with_capacity(turns.len());
    for turn in turns {
        out.extend(split_by_max_duration(turn, max_duration_seconds)?);
    }
    Ok(out)
}
