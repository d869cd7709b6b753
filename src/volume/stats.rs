//! Summary statistics of a scalar grid.

use serde::{Deserialize, Serialize};

/// Value statistics of a field.
///
/// `rms` is the root mean square of the raw values, not of their deviation
/// from the mean; sigma contours are `mean + k * rms`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldStats {
    /// Smallest value.
    pub min: f32,
    /// Largest value.
    pub max: f32,
    /// Arithmetic mean.
    pub mean: f32,
    /// Sum of all values.
    pub sum: f32,
    /// Root mean square.
    pub rms: f32,
}

impl FieldStats {
    /// Statistics of `data` in one pass; all zero for an empty slice.
    #[must_use]
    pub fn compute(data: &[f32]) -> Self {
        if data.is_empty() {
            return Self::default();
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for &v in data {
            min = min.min(v);
            max = max.max(v);
            sum += f64::from(v);
            sum_sq += f64::from(v) * f64::from(v);
        }
        let n = data.len() as f64;
        Self {
            min,
            max,
            mean: (sum / n) as f32,
            sum: sum as f32,
            rms: (sum_sq / n).sqrt() as f32,
        }
    }
}

/// Sigma arithmetic shared by full volumes and filtered views of them.
pub trait GridStats {
    /// Statistics the sigma scale is measured against.
    fn stats(&self) -> FieldStats;

    /// Field value at `sigma` rms above the mean.
    fn value_for_sigma(&self, sigma: f32) -> f32 {
        let stats = self.stats();
        stats.mean + sigma * stats.rms
    }

    /// How many rms `value` lies above the mean.
    fn sigma_for_value(&self, value: f32) -> f32 {
        let stats = self.stats();
        (value - stats.mean) / stats.rms
    }
}

impl GridStats for FieldStats {
    fn stats(&self) -> FieldStats {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pass_statistics() {
        let stats = FieldStats::compute(&[1.0, -1.0, 3.0, 1.0]);
        assert_eq!(stats.min, -1.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.sum, 4.0);
        assert_eq!(stats.mean, 1.0);
        assert!((stats.rms - 3.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn empty_data_has_zero_stats() {
        assert_eq!(FieldStats::compute(&[]), FieldStats::default());
    }

    #[test]
    fn sigma_conversions_invert_each_other() {
        let stats = FieldStats {
            mean: 0.5,
            rms: 2.0,
            ..FieldStats::default()
        };
        assert_eq!(stats.value_for_sigma(2.0), 4.5);
        assert_eq!(stats.sigma_for_value(4.5), 2.0);
        assert_eq!(stats.sigma_for_value(stats.value_for_sigma(-1.5)), -1.5);
    }
}
