//! Fixed-capacity history of per-lap scalars with outlier-aware statistics.
//!
//! The newest value sits at the front. `min/max/mean/std` are computed over
//! the values that survive the window's [`OutlierPolicy`]; the quartiles are
//! always computed over every non-NaN value.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Distance of the outlier fences from the quartiles, in IQRs.
const FENCE_IQR_MULTIPLIER: f64 = 3.0;

/// Extra absolute margin added on both sides by [`OutlierPolicy::WidePlus1`].
const WIDE_MARGIN: f64 = 1.0;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    #[default]
    None,
    Lower,
    Upper,
    Both,
    WidePlus1,
}

impl OutlierPolicy {
    fn fences(self, q1: f64, q3: f64) -> (f64, f64) {
        let iqr = q3 - q1;
        let lower = q1 - FENCE_IQR_MULTIPLIER * iqr;
        let upper = q3 + FENCE_IQR_MULTIPLIER * iqr;
        match self {
            OutlierPolicy::None => (f64::NEG_INFINITY, f64::INFINITY),
            OutlierPolicy::Lower => (lower, f64::INFINITY),
            OutlierPolicy::Upper => (f64::NEG_INFINITY, upper),
            OutlierPolicy::Both => (lower, upper),
            OutlierPolicy::WidePlus1 => (lower - WIDE_MARGIN, upper + WIDE_MARGIN),
        }
    }
}

/// Minimum, lower hinge, median, upper hinge and maximum.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct FiveNumberSummary {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl FiveNumberSummary {
    /// Tukey's summary of `values`, which must be sorted ascending and NaN
    /// free. `None` unless there are at least two distinct values.
    pub fn of_sorted(values: &[f64]) -> Option<Self> {
        let (first, last) = (*values.first()?, *values.last()?);
        if values.len() < 2 || first == last {
            return None;
        }
        let n = values.len();
        let half = n / 2;
        let lower = &values[..half];
        let upper = if n % 2 == 0 {
            &values[half..]
        } else {
            &values[half + 1..]
        };
        Some(Self {
            min: first,
            q1: median_of_sorted(lower),
            median: median_of_sorted(values),
            q3: median_of_sorted(upper),
            max: last,
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Statistics derived from the window's current content.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct WindowStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Number of values that passed the outlier filter.
    pub count: usize,
}

impl WindowStats {
    const EMPTY: WindowStats = WindowStats {
        min: f64::NAN,
        max: f64::NAN,
        mean: f64::NAN,
        std: f64::NAN,
        q1: f64::NAN,
        median: f64::NAN,
        q3: f64::NAN,
        lower_bound: f64::NEG_INFINITY,
        upper_bound: f64::INFINITY,
        count: 0,
    };
}

impl Default for WindowStats {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Clone, Debug)]
pub struct BoundedStatsWindow {
    values: VecDeque<f64>,
    capacity: usize,
    policy: OutlierPolicy,
    stats: WindowStats,
}

impl BoundedStatsWindow {
    /// A window seeded with `capacity` NaNs so consumers see "unknown".
    pub fn new(capacity: usize, policy: OutlierPolicy) -> Self {
        let mut w = Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            stats: WindowStats::EMPTY,
        };
        w.fill(f64::NAN);
        w
    }

    pub fn push_front(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_back();
        }
        self.values.push_front(value);
        self.recompute();
    }

    /// Replaces the content with `capacity` copies of `value`.
    pub fn fill(&mut self, value: f64) {
        self.values.clear();
        self.values.resize(self.capacity, value);
        self.recompute();
    }

    pub fn reset(&mut self) {
        self.fill(f64::NAN);
    }

    pub fn stats(&self) -> &WindowStats {
        &self.stats
    }

    pub fn policy(&self) -> OutlierPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Newest first.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn newest(&self) -> Option<f64> {
        self.values.front().copied()
    }

    /// Number of non-NaN values held.
    pub fn known_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    fn recompute(&mut self) {
        let mut sorted: Vec<f64> = self.values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            self.stats = WindowStats::EMPTY;
            return;
        }
        sorted.sort_by(f64::total_cmp);

        let summary = FiveNumberSummary::of_sorted(&sorted);
        let (lower_bound, upper_bound) = match summary {
            Some(s) => self.policy.fences(s.q1, s.q3),
            None => (f64::NEG_INFINITY, f64::INFINITY),
        };

        let kept: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v >= lower_bound && *v <= upper_bound)
            .collect();
        let (mean, std) = mean_std(&kept);

        self.stats = WindowStats {
            min: kept.first().copied().unwrap_or(f64::NAN),
            max: kept.last().copied().unwrap_or(f64::NAN),
            mean,
            std,
            q1: summary.map_or(f64::NAN, |s| s.q1),
            median: median_of_sorted(&sorted),
            q3: summary.map_or(f64::NAN, |s| s.q3),
            lower_bound,
            upper_bound,
            count: kept.len(),
        };
    }
}

/// Mean and sample standard deviation (0 for a single value).
fn mean_std(v: &[f64]) -> (f64, f64) {
    if v.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    if v.len() == 1 {
        return (mean, 0.0);
    }
    let var = v
        .iter()
        .map(|x| {
            let d = *x - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    (mean, var.sqrt())
}
