//! Statistical disclosure control for count series.
//!
//! The threshold boundary differs between the two policies, deliberately. Policy A
//! suppresses counts `<= threshold`. Policy B redacts counts `< threshold`: rounding can
//! produce the threshold itself (7 rounds to 5 with a threshold of 5), and an inclusive
//! boundary would then redact on a second pass what it kept on the first. The exclusive
//! boundary keeps the policy idempotent; a deployment wanting "5 or fewer is hidden"
//! under Policy B should use a threshold of 6.
//!
//! Each policy is applied to one column of periodised counts at a time and returns a
//! fresh series; nothing is mutated in place.

use crate::counts::WeeklyCountMatrix;
use std::{cmp::Reverse, collections::BinaryHeap};

/// Policy A: iterative small-number suppression.
///
/// Every count `<= threshold` is zeroed. If anything was zeroed, further counts are
/// absorbed (smallest remaining first, lowest period index first among equals) until the
/// zeroed total itself exceeds the threshold, so the suppressed mass cannot be recovered
/// by subtracting the visible counts from a published total. A column whose whole total
/// is `<= threshold` comes back all zero; that is a correct output, not an error.
pub fn suppress_small_counts(counts: &[u32], threshold: u32) -> Vec<u32> {
    let mut out = counts.to_vec();
    let mut remaining = BinaryHeap::new();
    let mut suppressed = 0u64;
    for (idx, &value) in counts.iter().enumerate() {
        if value == 0 {
            continue;
        }
        if value <= threshold {
            suppressed += u64::from(value);
            out[idx] = 0;
        } else {
            remaining.push(Reverse((value, idx)));
        }
    }
    if suppressed == 0 {
        return out;
    }
    while suppressed <= u64::from(threshold) {
        match remaining.pop() {
            Some(Reverse((value, idx))) => {
                suppressed += u64::from(value);
                out[idx] = 0;
            }
            // everything is zeroed and the total was itself below threshold
            None => break,
        }
    }
    out
}

/// Apply [`suppress_small_counts`] to every column of a weekly matrix, producing the
/// publishable copy.
pub fn suppress_matrix(matrix: &WeeklyCountMatrix, threshold: u32) -> WeeklyCountMatrix {
    WeeklyCountMatrix {
        period_ends: matrix.period_ends.clone(),
        columns: matrix
            .columns
            .iter()
            .map(|(category, counts)| {
                (category.clone(), suppress_small_counts(counts, threshold))
            })
            .collect(),
    }
}

/// Policy B: redact and round.
///
/// Counts below the threshold become `None` (explicitly missing, not zero — a zero count
/// is also emitted as missing, deliberately hiding which it was). Surviving counts are
/// rounded to the nearest multiple of the threshold, ties going to the even multiple.
/// Applying the policy twice gives the same answer as applying it once; see the module
/// docs for why the boundary is exclusive here.
pub fn redact_and_round(counts: &[u64], threshold: u32) -> Vec<Option<u64>> {
    counts
        .iter()
        .map(|&value| {
            if value < u64::from(threshold) {
                None
            } else {
                Some(round_to_multiple(value, u64::from(threshold)))
            }
        })
        .collect()
}

/// Round `value` to the nearest multiple of `unit`, half-to-even on the quotient.
fn round_to_multiple(value: u64, unit: u64) -> u64 {
    let quotient = value / unit;
    let remainder = value % unit;
    let quotient = match (2 * remainder).cmp(&unit) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    };
    quotient * unit
}
