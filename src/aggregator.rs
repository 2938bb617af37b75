//! Named streaming reducers.
//!
//! Every aggregator consumes a single-pass sequence of either integers or doubles, never both in
//! one call. All but the percentile family run in constant memory.

use crate::error::QueryError;
use std::fmt;
use std::str::FromStr;

/// Percentiles registered under their own name. Any other `pctN` with `1 <= N <= 100`
/// is accepted as well.
pub const PRESET_PERCENTILES: [u8; 5] = [50, 80, 85, 90, 95];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Sum,
    Min,
    Max,
    Avg,
    /// Standard deviation (Welford's online update).
    Dev,
    /// Nearest-rank percentile, `1..=100`.
    Percentile(u8),
}

impl Aggregator {
    /// Resolves an aggregator by name.
    pub fn get(name: &str) -> Result<Self, QueryError> {
        name.parse()
    }

    /// Names of the pre-registered aggregators.
    pub fn names() -> Vec<String> {
        let mut names: Vec<String> = ["sum", "min", "max", "avg", "dev"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.extend(PRESET_PERCENTILES.iter().map(|p| format!("pct{}", p)));
        names
    }

    /// Reduces a sequence of integers. An empty sequence yields 0.
    pub fn run_long<I: IntoIterator<Item = i64>>(&self, values: I) -> i64 {
        let mut values = values.into_iter();
        let first = match values.next() {
            Some(v) => v,
            None => return 0,
        };
        match *self {
            Aggregator::Sum => values.fold(first, |acc, v| acc.wrapping_add(v)),
            Aggregator::Min => values.fold(first, i64::min),
            Aggregator::Max => values.fold(first, i64::max),
            Aggregator::Avg => {
                let (sum, n) = values.fold((first as i128, 1i128), |(s, n), v| (s + v as i128, n + 1));
                (sum / n) as i64
            }
            Aggregator::Dev => {
                let doubles = std::iter::once(first as f64).chain(values.map(|v| v as f64));
                std_dev(doubles) as i64
            }
            Aggregator::Percentile(p) => {
                let mut all: Vec<i64> = std::iter::once(first).chain(values).collect();
                all.sort_unstable();
                all[nearest_rank(p, all.len())]
            }
        }
    }

    /// Reduces a sequence of doubles. An empty sequence yields 0.
    pub fn run_double<I: IntoIterator<Item = f64>>(&self, values: I) -> f64 {
        let mut values = values.into_iter();
        let first = match values.next() {
            Some(v) => v,
            None => return 0.0,
        };
        match *self {
            Aggregator::Sum => values.fold(first, |acc, v| acc + v),
            Aggregator::Min => values.fold(first, |m, v| if v < m { v } else { m }),
            Aggregator::Max => values.fold(first, |m, v| if v > m { v } else { m }),
            Aggregator::Avg => {
                let (sum, n) = values.fold((first, 1u64), |(s, n), v| (s + v, n + 1));
                sum / n as f64
            }
            Aggregator::Dev => std_dev(std::iter::once(first).chain(values)),
            Aggregator::Percentile(p) => {
                // Nearest rank needs every value; this is the one buffering reducer.
                let mut all: Vec<f64> = std::iter::once(first).chain(values).collect();
                all.sort_by(|a, b| a.total_cmp(b));
                all[nearest_rank(p, all.len())]
            }
        }
    }
}

/// Zero-based index `ceil(p * n / 100) - 1`, clamped into `0..n`.
fn nearest_rank(p: u8, n: usize) -> usize {
    let rank = (p as usize * n).div_ceil(100);
    rank.saturating_sub(1).min(n - 1)
}

/// Welford's running mean/variance. Divides the accumulated squared distance by the number of
/// points; a single point yields 0.
fn std_dev<I: Iterator<Item = f64>>(mut values: I) -> f64 {
    let mut mean = match values.next() {
        Some(v) => v,
        None => return 0.0,
    };
    let mut n = 1u64;
    let mut m2 = 0.0;
    for x in values {
        n += 1;
        let old_mean = mean;
        mean = old_mean + (x - old_mean) / n as f64;
        m2 += (x - old_mean) * (x - mean);
    }
    if n == 1 {
        return 0.0;
    }
    (m2 / n as f64).sqrt()
}

/// Parses the `N` of `pctN`: plain decimal digits, no leading zero, `1..=100`.
fn percentile_rank(digits: &str) -> Option<u8> {
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u8>().ok().filter(|p| (1..=100).contains(p))
}

impl FromStr for Aggregator {
    type Err = QueryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let agg = match name {
            "sum" => Aggregator::Sum,
            "min" => Aggregator::Min,
            "max" => Aggregator::Max,
            "avg" => Aggregator::Avg,
            "dev" => Aggregator::Dev,
            _ => match name.strip_prefix("pct").and_then(percentile_rank) {
                Some(p) => Aggregator::Percentile(p),
                None => return Err(QueryError::UnknownAggregator(name.to_string())),
            },
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Sum => f.write_str("sum"),
            Aggregator::Min => f.write_str("min"),
            Aggregator::Max => f.write_str("max"),
            Aggregator::Avg => f.write_str("avg"),
            Aggregator::Dev => f.write_str("dev"),
            Aggregator::Percentile(p) => write!(f, "pct{}", p),
        }
    }
}
