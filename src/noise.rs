//! Gaussian noise injection for Monte Carlo realizations.

use crate::errors::{validate_finite, DetectionPowerError, DetectionPowerResult};
use crate::rng::SeededRng;
use crate::series::ConcentrationSeries;

/// Adds i.i.d. zero-mean Gaussian noise to a true series.
///
/// Realization `i` always draws from the stream derived from `(seed, i)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseInjector {
    noise_std: f64,
    seed: u64,
}

impl NoiseInjector {
    /// Injector with standard deviation `noise_std` (must be finite and >= 0).
    pub fn new(noise_std: f64, seed: u64) -> DetectionPowerResult<Self> {
        validate_finite(noise_std, "error")?;
        if noise_std < 0.0 {
            return Err(DetectionPowerError::configuration(
                "error",
                format!("noise standard deviation {} is negative", noise_std),
            ));
        }
        Ok(Self { noise_std, seed })
    }

    /// Noise standard deviation.
    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    /// True when every realization equals the true series.
    pub fn is_noise_free(&self) -> bool {
        self.noise_std == 0.0
    }

    /// Noisy realization number `index`.
    pub fn realization(&self, truth: &ConcentrationSeries, index: usize) -> ConcentrationSeries {
        if self.is_noise_free() {
            return truth.clone();
        }
        let mut noise = vec![0.0; truth.len()];
        SeededRng::for_stream(self.seed, index as u64).fill_normal(&mut noise, self.noise_std);
        let values = truth
            .values()
            .iter()
            .zip(&noise)
            .map(|(v, e)| v + e)
            .collect();
        truth.with_values(values)
    }

    /// The first `k` noisy realizations.
    pub fn draw_noisy(&self, truth: &ConcentrationSeries, k: usize) -> Vec<ConcentrationSeries> {
        (0..k).map(|i| self.realization(truth, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth() -> ConcentrationSeries {
        ConcentrationSeries::from_values((0..30).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_zero_noise_returns_copies() {
        let injector = NoiseInjector::new(0.0, 1).unwrap();
        let draws = injector.draw_noisy(&truth(), 3);
        assert_eq!(draws.len(), 3);
        assert!(draws.iter().all(|d| *d == truth()));
    }

    #[test]
    fn test_realization_independent_of_batch_size() {
        let injector = NoiseInjector::new(0.5, 558).unwrap();
        let few = injector.draw_noisy(&truth(), 2);
        let many = injector.draw_noisy(&truth(), 10);
        assert_eq!(few[..], many[..2]);
        assert_eq!(injector.realization(&truth(), 7), many[7]);
        assert_ne!(many[0], many[1]);
        assert_eq!(many[0].times(), truth().times());
    }

    #[test]
    fn test_negative_noise_rejected() {
        assert!(matches!(
            NoiseInjector::new(-1.0, 0),
            Err(DetectionPowerError::Configuration { .. })
        ));
        assert!(NoiseInjector::new(f64::NAN, 0).is_err());
    }
}
