use serde::{Deserialize, Serialize};

use crate::types::DataPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Running min/max/count-weighted mean over raw samples and trend intervals.
///
/// Raw samples weigh 1, trend intervals weigh their recorded sample count,
/// so `avg = Σ(avg_i · count_i) / Σcount_i` across any mix of both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    min: f64,
    max: f64,
    weighted_sum: f64,
    count: u64,
}

impl Default for Reduction {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            weighted_sum: 0.0,
            count: 0,
        }
    }
}

impl Reduction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push_raw(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.weighted_sum += value;
        self.count += 1;
    }

    pub fn push_interval(&mut self, min: f64, max: f64, avg: f64, count: u64) {
        if count == 0 || !(min.is_finite() && max.is_finite() && avg.is_finite()) {
            return;
        }
        self.min = self.min.min(min);
        self.max = self.max.max(max);
        self.weighted_sum += avg * count as f64;
        self.count += count;
    }

    pub fn push(&mut self, point: &DataPoint) {
        match *point {
            DataPoint::Raw { value, .. } => self.push_raw(value),
            DataPoint::Trend {
                min,
                max,
                avg,
                count,
                ..
            } => self.push_interval(min, max, avg, count),
        }
    }

    pub fn merge(&mut self, other: &Reduction) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.weighted_sum += other.weighted_sum;
        self.count += other.count;
    }

    /// Final statistics; `None` when nothing was consumed.
    pub fn finish(&self) -> (Option<Stats>, u64) {
        if self.count == 0 {
            return (None, 0);
        }
        // Rounding in the weighted sum can land a hair outside [min, max].
        let avg = (self.weighted_sum / self.count as f64).clamp(self.min, self.max);
        (
            Some(Stats {
                min: self.min,
                max: self.max,
                avg,
            }),
            self.count,
        )
    }
}

impl<'a> Extend<&'a DataPoint> for Reduction {
    fn extend<I: IntoIterator<Item = &'a DataPoint>>(&mut self, points: I) {
        for point in points {
            self.push(point);
        }
    }
}
