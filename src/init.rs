//! Parameter initialization
//!
//! Weights are drawn from a zero-mean Gaussian with standard deviation
//! `sqrt(2 / fan_in)` generated by the Box–Muller transform; biases start at a
//! small positive constant so ReLU units begin active.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::{Normal, Open01, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Initial value of every bias
pub const BIAS_INIT: f32 = 0.01;

/// Random source for parameter initialization, one per network
pub type ParamRng = StdRng;

/// Seeded generators make initialization reproducible; `None` draws from entropy.
pub fn param_rng(seed: Option<u64>) -> ParamRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Gaussian samples from two uniform draws on the open interval (0, 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxMuller {
    mean: f32,
    std: f32,
}

impl BoxMuller {
    pub fn new(mean: f32, std: f32) -> Self {
        BoxMuller { mean, std }
    }
}

impl Distribution<f32> for BoxMuller {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let u1: f64 = rng.sample(Open01);
        let u2: f64 = rng.sample(Open01);
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).sin();
        self.mean + self.std * z as f32
    }
}

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightInit {
    /// Box–Muller Gaussian with std `sqrt(2 / fan_in)`
    #[default]
    He,

    /// Gaussian with custom mean and std
    Normal { mean: f32, std: f32 },

    /// Uniform distribution with custom range
    Uniform { min: f32, max: f32 },

    /// All zeros
    Zeros,
}

impl WeightInit {
    /// Initialize a `[rows][fan_in]` weight matrix
    pub fn initialize_weights(&self, shape: (usize, usize), rng: &mut ParamRng) -> Result<Array2<f32>> {
        let fan_in = shape.1.max(1);

        match *self {
            WeightInit::He => {
                let std = (2.0 / fan_in as f32).sqrt();
                Ok(Array2::random_using(shape, BoxMuller::new(0.0, std), rng))
            }

            WeightInit::Normal { mean, std } => {
                let dist = Normal::new(mean, std).map_err(|e| NetError::Config(format!("normal init: {}", e)))?;
                Ok(Array2::random_using(shape, dist, rng))
            }

            WeightInit::Uniform { min, max } => {
                if !(min < max) {
                    return Err(NetError::Config(format!("uniform init needs min < max, got [{}, {}]", min, max)));
                }
                Ok(Array2::random_using(shape, Uniform::new(min, max), rng))
            }

            WeightInit::Zeros => Ok(Array2::zeros(shape)),
        }
    }

    /// Initialize a bias vector
    pub fn initialize_biases(&self, size: usize) -> Array1<f32> {
        match self {
            WeightInit::Zeros => Array1::zeros(size),
            _ => Array1::from_elem(size, BIAS_INIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_muller_moments() {
        let mut rng = param_rng(Some(7));
        let dist = BoxMuller::new(0.0, 0.5);
        let samples: Vec<f32> = (0..20_000).map(|_| dist.sample(&mut rng)).collect();

        let n = samples.len() as f32;
        let mean = samples.iter().sum::<f32>() / n;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 0.02, "mean {}", mean);
        assert!((var.sqrt() - 0.5).abs() < 0.02, "std {}", var.sqrt());
    }

    #[test]
    fn test_he_init_is_reproducible_with_seed() {
        let a = WeightInit::He.initialize_weights((4, 8), &mut param_rng(Some(42))).unwrap();
        let b = WeightInit::He.initialize_weights((4, 8), &mut param_rng(Some(42))).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn test_biases_start_small_and_positive() {
        let biases = WeightInit::He.initialize_biases(3);
        assert!(biases.iter().all(|&b| b == BIAS_INIT));
        assert!(WeightInit::Zeros.initialize_biases(3).iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_invalid_uniform_range() {
        let init = WeightInit::Uniform { min: 1.0, max: 1.0 };
        assert!(init.initialize_weights((2, 2), &mut param_rng(Some(1))).is_err());
    }
}
