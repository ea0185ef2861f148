//! Exponentially weighted moving average helper for smoothing per-node
//! performance numbers.

use std::fmt;

/// Exponentially weighted moving average of a stream of samples.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Ewma {
    /// Smoothing factor in (0, 1]; weight given to each new sample.
    alpha: f64,

    /// Current average.
    average: f64,
}

impl fmt::Display for Ewma {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.1}@{:.2}", self.average, self.alpha)
    }
}

impl Ewma {
    /// Creates a new average seeded with an initial value.
    #[inline]
    pub fn new(alpha: f64, initial: f64) -> Self {
        debug_assert!(alpha > 0.0 && alpha <= 1.0);
        Ewma {
            alpha,
            average: initial,
        }
    }

    /// Folds a new sample into the average.
    #[inline]
    pub fn add_value(&mut self, value: f64) {
        self.average = self.alpha * value + (1.0 - self.alpha) * self.average;
    }

    /// Overwrites the average, discarding history.
    #[inline]
    pub fn reset(&mut self, value: f64) {
        self.average = value;
    }

    /// Returns the current average.
    #[inline]
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Returns the smoothing factor.
    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
