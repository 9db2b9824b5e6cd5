//! Pivot Clustering
//!
//! Groups near-equal pivot price levels into representative entries.
//!
//! # Algorithm
//!
//! 1. Count occurrences of each distinct price.
//! 2. Every price seen more than once is emitted immediately as a duplicate
//!    entry (`difference = "0.00"`) and marked processed.
//! 3. Every distinct price not yet processed, in ascending order, is merged
//!    with all *other* distinct prices within `threshold` (inclusive). The
//!    neighbor search does not skip processed prices, so a duplicate entry's
//!    price can also appear as a member of a later cluster. A price without
//!    neighbors is emitted alone with `difference = "-"`.
//! 4. Entries are sorted by value, highest first.
//!
//! A cluster's value is the unweighted mean of its members, its count the
//! sum of the members' occurrence counts, and its difference the member
//! range divided by `count - 1`. Arithmetic is checked: prices near the
//! `Decimal` limits yield [`PivotOverflow`] instead of a panic.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// One entry of the clustered pivot list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotCluster {
    /// Display text: the price, or `"mean (member, member, ...)"`.
    pub value: String,
    /// Total occurrences covered by this entry.
    pub count: u32,
    /// `"0.00"` for duplicates, `"-"` for singletons, the 4-decimal spread
    /// for merged clusters.
    pub difference: String,
}

/// Cluster arithmetic left the `Decimal` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pivot arithmetic overflow")]
pub struct PivotOverflow;

struct Entry {
    value: Decimal,
    cluster: PivotCluster,
}

/// Cluster pivot prices.
///
/// Returns an empty list for empty input.
///
/// # Errors
///
/// Returns `PivotOverflow` when a distance, sum or spread of the prices
/// does not fit a `Decimal`.
pub fn cluster(prices: &[Decimal], threshold: Decimal) -> Result<Vec<PivotCluster>, PivotOverflow> {
    let mut counts: BTreeMap<Decimal, u32> = BTreeMap::new();
    for price in prices {
        *counts.entry(*price).or_insert(0) += 1;
    }

    let mut entries = Vec::new();
    let mut processed: BTreeSet<Decimal> = BTreeSet::new();

    for (&value, &count) in &counts {
        if count > 1 {
            entries.push(Entry {
                value,
                cluster: PivotCluster {
                    value: format_dp(value, 2),
                    count,
                    difference: "0.00".to_string(),
                },
            });
            processed.insert(value);
        }
    }

    let distinct: Vec<Decimal> = counts.keys().copied().collect();

    for &value in &distinct {
        if processed.contains(&value) {
            continue;
        }

        let mut neighbors = Vec::new();
        for &other in &distinct {
            let distance = other.checked_sub(value).ok_or(PivotOverflow)?.abs();
            if distance > Decimal::ZERO && distance <= threshold {
                neighbors.push(other);
            }
        }

        if neighbors.is_empty() {
            entries.push(Entry {
                value,
                cluster: PivotCluster {
                    value: format_dp(value, 2),
                    count: counts[&value],
                    difference: "-".to_string(),
                },
            });
            processed.insert(value);
            continue;
        }

        let mut members = neighbors;
        members.push(value);
        members.sort();

        let total: u32 = members.iter().map(|m| counts[m]).sum();
        let sum = members
            .iter()
            .try_fold(Decimal::ZERO, |acc, m| acc.checked_add(*m))
            .ok_or(PivotOverflow)?;
        let mean = sum
            .checked_div(Decimal::from(members.len()))
            .ok_or(PivotOverflow)?;
        let spread = members[members.len() - 1]
            .checked_sub(members[0])
            .ok_or(PivotOverflow)?;
        let difference = spread
            .checked_div(Decimal::from(total - 1))
            .ok_or(PivotOverflow)?;

        let listed = members
            .iter()
            .map(|m| format_dp(*m, 2))
            .collect::<Vec<_>>()
            .join(", ");

        entries.push(Entry {
            value: mean,
            cluster: PivotCluster {
                value: format!("{} ({listed})", format_dp(mean, 2)),
                count: total,
                difference: format_dp(difference, 4),
            },
        });
        processed.extend(members);
    }

    entries.sort_by(|a, b| b.value.cmp(&a.value));
    Ok(entries.into_iter().map(|e| e.cluster).collect())
}

/// Format with exactly `dp` decimals, rounding half away from zero.
#[must_use]
pub fn format_dp(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.prec$}", prec = dp as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn entry(value: &str, count: u32, difference: &str) -> PivotCluster {
        PivotCluster {
            value: value.to_string(),
            count,
            difference: difference.to_string(),
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(cluster(&[], d(3)).unwrap().is_empty());
    }

    #[test]
    fn duplicate_is_reused_as_cluster_member() {
        let out = cluster(&[d(10), d(10), d(12), d(50)], d(3)).unwrap();
        assert_eq!(
            out,
            vec![
                entry("50.00", 1, "-"),
                entry("11.00 (10.00, 12.00)", 3, "1.0000"),
                entry("10.00", 2, "0.00"),
            ]
        );
    }

    #[test]
    fn boundary_distance_merges() {
        let out = cluster(&[d(100), d(103)], d(3)).unwrap();
        assert_eq!(out, vec![entry("101.50 (100.00, 103.00)", 2, "3.0000")]);
    }

    #[test]
    fn just_outside_threshold_stays_apart() {
        let out = cluster(&[d(100), Decimal::new(10301, 2)], d(3)).unwrap();
        assert_eq!(
            out,
            vec![entry("103.01", 1, "-"), entry("100.00", 1, "-")]
        );
    }

    #[test]
    fn processed_values_still_count_as_neighbors() {
        // 1 absorbs 2 and 3. 4 is still unprocessed and picks up 2 and 3 again.
        let out = cluster(&[d(1), d(2), d(3), d(4)], d(2)).unwrap();
        assert_eq!(
            out,
            vec![
                entry("3.00 (2.00, 3.00, 4.00)", 3, "1.0000"),
                entry("2.00 (1.00, 2.00, 3.00)", 3, "1.0000"),
            ]
        );
    }

    #[test]
    fn mean_is_unweighted() {
        let out = cluster(&[d(10), d(10), d(10), d(11)], d(1)).unwrap();
        // members {10, 11}: mean 10.5 regardless of 10 occurring three times
        assert_eq!(out[0], entry("10.50 (10.00, 11.00)", 4, "0.3333"));
        assert_eq!(out[1], entry("10.00", 3, "0.00"));
    }

    #[test]
    fn zero_threshold_never_merges() {
        let out = cluster(&[d(5), d(6)], Decimal::ZERO).unwrap();
        assert_eq!(out, vec![entry("6.00", 1, "-"), entry("5.00", 1, "-")]);
    }

    #[test]
    fn equal_decimals_with_different_scale_are_one_value() {
        let out = cluster(&[Decimal::new(100, 1), d(10)], d(1)).unwrap();
        assert_eq!(out, vec![entry("10.00", 2, "0.00")]);
    }

    #[test]
    fn format_rounds_half_away_from_zero() {
        assert_eq!(format_dp(Decimal::new(1005, 3), 2), "1.01");
        assert_eq!(format_dp(d(7), 2), "7.00");
        assert_eq!(format_dp(Decimal::new(1, 0) / Decimal::new(3, 0), 4), "0.3333");
    }

    #[test]
    fn overflowing_prices_are_an_error() {
        let out = cluster(&[Decimal::MAX, Decimal::MAX - d(1)], d(3));
        assert_eq!(out, Err(PivotOverflow));

        let out = cluster(&[Decimal::MIN, Decimal::MAX], Decimal::MAX);
        assert_eq!(out, Err(PivotOverflow));
    }
}
