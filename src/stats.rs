/// Robust dispersion estimates used by the cascade
use ordered_float::OrderedFloat;

/// Median of `values`; mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1].0 + sorted[mid].0) / 2.0)
    } else {
        Some(sorted[mid].0)
    }
}

/// Mean absolute difference between each value and `center`
pub fn mean_abs_deviation(values: &[f64], center: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let total: f64 = values.iter().map(|v| (v - center).abs()).sum();
    Some(total / values.len() as f64)
}

/// Median, MAD and the outlier distance for one set of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub median: f64,
    pub mad: f64,
    /// MAD scaled by the configured multiplier
    pub dev_ref: f64,
}

impl Deviation {
    pub fn compute(values: &[f64], multiplier: f64) -> Option<Self> {
        let median = median(values)?;
        let mad = mean_abs_deviation(values, median)?;
        Some(Deviation {
            median,
            mad,
            dev_ref: mad * multiplier,
        })
    }

    pub fn lower(&self) -> f64 {
        self.median - self.dev_ref
    }

    pub fn upper(&self) -> f64 {
        self.median + self.dev_ref
    }

    /// Two-sided outlier test: strictly further than `dev_ref` from the median
    pub fn is_outlier(&self, value: f64) -> bool {
        (value - self.median).abs() > self.dev_ref
    }
}
