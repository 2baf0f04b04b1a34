//! Polynomial learning-rate decay.
//!
//! `lr(step) = base_lr * (1 - step / max_step) ^ power`, recomputed before every
//! forward/backward pass.

use serde::{Deserialize, Serialize};

/// Decayed learning rate for `step`.
///
/// Progress is clamped to `[0, 1]`, so any `step >= max_step` (including
/// `max_step == 0`) yields `0.0` rather than a NaN from a fractional power of a
/// negative base.
pub fn lr_poly(base_lr: f64, step: usize, max_step: usize, power: f64) -> f64 {
    if step >= max_step {
        return 0.0;
    }
    let progress = step as f64 / max_step as f64;
    base_lr * (1.0 - progress).powf(power)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolyLr {
    pub base_lr: f64,
    pub max_step: usize,
    pub power: f64,
}

impl PolyLr {
    pub fn new(base_lr: f64, max_step: usize, power: f64) -> Self {
        Self {
            base_lr,
            max_step,
            power,
        }
    }

    pub fn lr(&self, step: usize) -> f64 {
        lr_poly(self.base_lr, step, self.max_step, self.power)
    }

    pub fn description(&self) -> String {
        format!(
            "Poly: base={:.6}, max_step={}, power={}",
            self.base_lr, self.max_step, self.power
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_base_lr() {
        let schedule = PolyLr::new(1e-2, 10_000, 0.9);
        assert_eq!(schedule.lr(0), 1e-2);
    }

    #[test]
    fn follows_polynomial_curve() {
        let schedule = PolyLr::new(0.1, 100, 0.9);
        for step in [1, 25, 50, 99] {
            let expected = 0.1 * (1.0 - step as f64 / 100.0).powf(0.9);
            assert!((schedule.lr(step) - expected).abs() < 1e-12);
        }

        // Decays monotonically.
        let lrs: Vec<f64> = (0..100).map(|s| schedule.lr(s)).collect();
        assert!(lrs.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn power_zero_is_constant() {
        let schedule = PolyLr::new(0.25, 10, 0.0);
        assert!((0..10).all(|s| schedule.lr(s) == 0.25));
    }

    #[test]
    fn clamps_past_the_end() {
        let schedule = PolyLr::new(0.1, 100, 0.9);
        assert_eq!(schedule.lr(100), 0.0);
        assert_eq!(schedule.lr(250), 0.0);
        assert!(!schedule.lr(250).is_nan());
        assert_eq!(lr_poly(0.1, 0, 0, 0.9), 0.0);
    }
}
