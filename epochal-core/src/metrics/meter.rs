//! Running weighted-average meter.

use serde::{Deserialize, Serialize};

/// Weighted running average of one metric since its last reset.
///
/// The weight is typically the batch size. Callers validate that it is
/// strictly positive before folding a value in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    sum: f64,
    weight: f64,
    count: u64,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
        self.count += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current average, or `None` if nothing was observed since the last reset.
    pub fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.weight)
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.weight
    }

    /// Number of updates folded in since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }
}
