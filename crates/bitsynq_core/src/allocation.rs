//! Contribution ratios to integer token amounts.
//!
//! Allocation runs in two phases. [`compute_raw`] floors every user's share,
//! which can leave a few tokens unassigned; [`settle_remainder`] hands those
//! out one at a time, largest percentage first, so the amounts always add up
//! to the requested budget. Preview and distribution both go through
//! [`allocate`], so a preview shows exactly what a distribution persists.

use crate::error::{Error, Result};
use crate::schema::{ContributionShare, ContributorBalance, Distribution};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const PERCENTAGE_DECIMALS: i32 = 4;

/// Phase 1: per-user totals, percentages and floored token amounts.
///
/// Ratios that are negative or not finite carry no information and are
/// skipped. An empty input is an empty distribution, not an error. Token
/// amounts are floored in integer arithmetic, so their sum never exceeds
/// `total_tokens` and falls short of it by less than one token per user.
pub fn compute_raw(contributions: &[ContributionShare], total_tokens: u64) -> Distribution {
    let mut user_totals: BTreeMap<&str, f64> = BTreeMap::new();
    for share in contributions {
        if !share.ratio.is_finite() || share.ratio < 0.0 {
            warn!(user_id = %share.user_id, ratio = share.ratio, "skipping unusable ratio");
            continue;
        }
        *user_totals.entry(share.user_id.as_str()).or_insert(0.0) += share.ratio;
    }

    let grand_total: f64 = user_totals.values().sum();
    let weights = integer_weights(&user_totals.values().copied().collect::<Vec<_>>());
    let weight_sum: u128 = weights.iter().map(|&w| u128::from(w)).sum();

    user_totals
        .into_iter()
        .zip(weights)
        .map(|((user_id, total_ratio), weight)| {
            let share = if grand_total > 0.0 {
                total_ratio / grand_total
            } else {
                0.0
            };
            // weight <= weight_sum, so the quotient fits in the budget
            let token_amount = if weight_sum > 0 {
                (u128::from(weight) * u128::from(total_tokens) / weight_sum) as u64
            } else {
                0
            };
            let balance = ContributorBalance {
                user_id: user_id.to_string(),
                total_ratio,
                percentage: round_to(share * 100.0, PERCENTAGE_DECIMALS),
                token_amount,
            };
            (user_id.to_string(), balance)
        })
        .collect()
}

/// Ratios as integers on one binary scale, the largest just under 2^60.
/// Scaling by a power of two is exact, so only bits far below the largest
/// ratio are lost.
fn integer_weights(ratios: &[f64]) -> Vec<u64> {
    let max = ratios.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return vec![0; ratios.len()];
    }
    let exponent = ((max.to_bits() >> 52) & 0x7ff) as i32 - 1023;
    let shift = 59 - exponent;
    // two steps keep each factor inside the f64 exponent range
    let (low, high) = (2f64.powi(shift / 2), 2f64.powi(shift - shift / 2));
    ratios
        .iter()
        .map(|ratio| (ratio * low * high).floor() as u64)
        .collect()
}

/// Phase 2: give the rounding deficit back, one token per entry.
///
/// Entries are ordered by descending percentage; equal percentages fall back
/// to ascending user id. The hand-out wraps around the list. While any entry
/// carries a positive ratio it may award at most two tokens per entry;
/// anything beyond that means phase 1 went wrong. When every ratio is zero
/// the whole budget is dealt out round-robin.
pub fn settle_remainder(raw: Distribution, total_tokens: u64) -> Result<Distribution> {
    let allocated: u128 = raw.values().map(|entry| u128::from(entry.token_amount)).sum();
    if allocated > u128::from(total_tokens) {
        return Err(Error::Inconsistent(format!(
            "raw allocation of {allocated} tokens exceeds the budget of {total_tokens}"
        )));
    }
    let remainder = total_tokens - allocated as u64;
    if remainder == 0 {
        return Ok(raw);
    }

    let mut entries: Vec<ContributorBalance> = raw.into_values().collect();
    if entries.is_empty() {
        return Err(Error::Inconsistent(format!(
            "{remainder} tokens left over with no recipients"
        )));
    }
    let count = entries.len() as u64;
    let weighted = entries.iter().any(|entry| entry.total_ratio > 0.0);
    let limit = 2 * count;
    if weighted && remainder > limit {
        return Err(Error::Inconsistent(format!(
            "remainder of {remainder} tokens exceeds {limit} for {count} recipients"
        )));
    }

    entries.sort_by(|a, b| {
        b.percentage
            .total_cmp(&a.percentage)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    debug!(remainder, recipients = count, weighted, "settling rounding remainder");

    // same result as stepping through the list `remainder` times
    let (rounds, extra) = (remainder / count, remainder % count);
    for (position, entry) in entries.iter_mut().enumerate() {
        entry.token_amount += rounds + u64::from((position as u64) < extra);
    }

    Ok(entries
        .into_iter()
        .map(|entry| (entry.user_id.clone(), entry))
        .collect())
}

/// Both phases; the sum of token amounts equals `total_tokens` for any
/// budget whenever there is at least one recipient.
pub fn allocate(contributions: &[ContributionShare], total_tokens: u64) -> Result<Distribution> {
    settle_remainder(compute_raw(contributions, total_tokens), total_tokens)
}

pub fn serialize_distribution(distribution: &Distribution) -> Result<String> {
    Ok(serde_json::to_string(distribution)?)
}

pub fn deserialize_distribution(json: &str) -> Result<Distribution> {
    Ok(serde_json::from_str(json)?)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
