//! Cell-count generation for the named distribution shapes.
//!
//! Every shape is expressed as an integer weight per column and then
//! apportioned with the largest-remainder method, so the counts always sum to
//! the requested total and the result is reproducible on any platform.
//!
//! Leftover units after flooring are handed out per *mirror slot* (the center
//! column on its own, or a pair of columns equidistant from the center). A
//! slot is only served when every member can receive a unit, which keeps
//! odd-width grids symmetric. Anything left after that goes to the center.
//!
//! Parity can push a unit onto an odd-width center that the weights rank
//! below its neighbours. For such shapes a settling pass moves cells off the
//! center onto the smallest pair until the center no longer stands out.

use std::cmp::Ordering;

use super::Distribution;
use crate::error::{GridError, GridResult};

/// Generate the cell counts for `column_count` columns holding `total_cells`.
///
/// # Errors
///
/// Returns [`GridError::NoColumns`] for an empty grid and
/// [`GridError::TooFewCells`] when `total_cells < column_count`.
pub fn generate(shape: Distribution, column_count: usize, total_cells: u32) -> GridResult<Vec<u32>> {
    if column_count == 0 {
        return Err(GridError::NoColumns);
    }
    if (total_cells as usize) < column_count {
        return Err(GridError::TooFewCells {
            total_cells,
            column_count,
        });
    }
    if column_count == 1 {
        return Ok(vec![total_cells]);
    }

    let weights: Vec<u64> = (0..column_count)
        .map(|i| weight(shape, i, column_count))
        .collect();

    Ok(apportion(&weights, total_cells))
}

/// Distance of column `i` from the grid center, in half-column units.
fn center_distance(i: usize, n: usize) -> u64 {
    (2 * i as i64 - (n as i64 - 1)).unsigned_abs()
}

fn weight(shape: Distribution, i: usize, n: usize) -> u64 {
    let d = center_distance(i, n);
    match shape {
        Distribution::Flat => 1,
        Distribution::Bell => ((n as u64 - 1) - d) / 2 + 1,
        Distribution::Forced => d / 2 + 1,
    }
}

fn apportion(weights: &[u64], total: u32) -> Vec<u32> {
    let n = weights.len();
    let total = u64::from(total);
    let weight_sum: u64 = weights.iter().sum();

    let mut counts: Vec<u64> = weights.iter().map(|w| total * w / weight_sum).collect();
    let remainders: Vec<u64> = weights.iter().map(|w| total * w % weight_sum).collect();
    let mut leftover = total - counts.iter().sum::<u64>();

    let mut slots: Vec<Vec<usize>> = (0..n / 2).map(|i| vec![i, n - 1 - i]).collect();
    if n % 2 == 1 {
        slots.push(vec![n / 2]);
    }
    slots.sort_by(|a, b| match remainders[b[0]].cmp(&remainders[a[0]]) {
        Ordering::Equal => center_distance(a[0], n).cmp(&center_distance(b[0], n)),
        other => other,
    });

    for slot in &slots {
        if leftover == 0 || remainders[slot[0]] == 0 {
            break;
        }
        let size = slot.len() as u64;
        if size <= leftover {
            for &i in slot {
                counts[i] += 1;
            }
            leftover -= size;
        }
    }
    counts[n / 2] += leftover;
    settle_center(weights, &mut counts);

    counts.into_iter().map(|c| c as u32).collect()
}

/// Keep an odd-width center at or below every pair when its weight is lower
/// than the innermost pair's. Each move keeps the sum and the symmetry.
fn settle_center(weights: &[u64], counts: &mut [u64]) {
    let n = counts.len();
    let mid = n / 2;
    if n % 2 == 0 || n < 3 || weights[mid] >= weights[mid - 1] {
        return;
    }

    // Smallest pair, innermost on ties
    let smallest = |counts: &[u64]| {
        (0..mid)
            .rev()
            .min_by_key(|&i| counts[i])
            .unwrap_or(mid - 1)
    };

    loop {
        let low = smallest(counts);
        if counts[mid] <= counts[low] {
            break;
        }
        if counts[mid] >= 2 {
            counts[mid] -= 2;
        } else {
            // A lone center unit has to stay, so the largest pair gives instead
            let high = (0..mid).rev().max_by_key(|&i| counts[i]).unwrap_or(0);
            counts[high] -= 1;
            counts[n - 1 - high] -= 1;
        }
        let low = smallest(counts);
        counts[low] += 1;
        counts[n - 1 - low] += 1;
    }

    let mut half = counts[..mid].to_vec();
    half.sort_unstable_by(|a, b| b.cmp(a));
    for (i, c) in half.into_iter().enumerate() {
        counts[i] = c;
        counts[n - 1 - i] = c;
    }
}
