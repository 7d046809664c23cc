//! Synthetic datasets with known ground truth.
//!
//! Each simulator takes a plain configuration struct (whose `Default` is the classic
//! walkthrough setting) and a caller-supplied random number generator, so a fixed seed
//! always reproduces the same dataset.

use rand::Rng;
use rand_distr::{Binomial, Distribution, StandardNormal};
use thiserror::Error;

use crate::distributions::inv_logit;

/// Errors raised while simulating data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid simulation setting {field}: {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },
}

/// One observation of the two-covariate linear model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x1: f64,
    pub x2: f64,
    pub y: f64,
}

/// `n` evenly spaced points from `start` to `end`, both included exactly.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Ground truth for `y = alpha + beta[0] * x1 + beta[1] * x2 + sigma * eps`, with
/// `x1 ~ N(0, 1)` and `x2 ~ N(0, x2_scale²)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSimulation {
    pub size: usize,
    pub alpha: f64,
    pub beta: [f64; 2],
    pub sigma: f64,
    pub x2_scale: f64,
}

impl Default for LinearSimulation {
    fn default() -> Self {
        Self {
            size: 100,
            alpha: 1.0,
            beta: [1.0, 2.5],
            sigma: 1.0,
            x2_scale: 0.2,
        }
    }
}

impl LinearSimulation {
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Vec<Observation>, SimulationError> {
        if !(self.sigma >= 0.0) || !(self.x2_scale >= 0.0) {
            return Err(SimulationError::InvalidSetting {
                field: "sigma/x2_scale",
                message: "scales must be non-negative".into(),
            });
        }
        let x1: Vec<f64> = (0..self.size).map(|_| StandardNormal.sample(rng)).collect();
        let x2: Vec<f64> = (0..self.size)
            .map(|_| {
                let z: f64 = StandardNormal.sample(rng);
                z * self.x2_scale
            })
            .collect();
        let observations = x1
            .into_iter()
            .zip(x2)
            .map(|(x1, x2)| {
                let eps: f64 = StandardNormal.sample(rng);
                Observation {
                    x1,
                    x2,
                    y: self.alpha + self.beta[0] * x1 + self.beta[1] * x2 + eps * self.sigma,
                }
            })
            .collect();
        Ok(observations)
    }
}

/// A noisy straight line with a few appended outliers.
#[derive(Debug, Clone, PartialEq)]
pub struct LineData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// The noiseless line evaluated at the regular (non-outlier) points.
    pub true_line: Vec<f64>,
}

/// `y = intercept + slope * x + N(0, noise²)` on `size` evenly spaced `x` in `[0, 1]`,
/// followed by the `outliers` points.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierSimulation {
    pub size: usize,
    pub intercept: f64,
    pub slope: f64,
    pub noise: f64,
    pub outliers: Vec<(f64, f64)>,
}

impl Default for OutlierSimulation {
    fn default() -> Self {
        Self {
            size: 100,
            intercept: 1.0,
            slope: 2.0,
            noise: 0.5,
            outliers: vec![(0.1, 8.0), (0.15, 6.0), (0.2, 9.0)],
        }
    }
}

impl OutlierSimulation {
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<LineData, SimulationError> {
        if !(self.noise >= 0.0) {
            return Err(SimulationError::InvalidSetting {
                field: "noise",
                message: format!("expected a non-negative scale, got {}", self.noise),
            });
        }
        let x_regular = linspace(0.0, 1.0, self.size);
        let true_line: Vec<f64> = x_regular
            .iter()
            .map(|&x| self.intercept + self.slope * x)
            .collect();
        let mut y: Vec<f64> = true_line
            .iter()
            .map(|&mu| {
                let z: f64 = StandardNormal.sample(rng);
                mu + z * self.noise
            })
            .collect();

        let mut x = x_regular;
        for &(xo, yo) in &self.outliers {
            x.push(xo);
            y.push(yo);
        }
        Ok(LineData { x, y, true_line })
    }
}

/// Success counts out of `n_trials` at each `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinomialData {
    pub x: Vec<f64>,
    pub y: Vec<u64>,
    pub n_trials: u64,
    /// Success probability used to generate each count.
    pub p_true: Vec<f64>,
}

/// `y ~ Binomial(n_trials, inv_logit(beta0 + beta1 * x))` on `sample_size` evenly spaced
/// `x` in `x_range`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinomialSimulation {
    pub beta0: f64,
    pub beta1: f64,
    pub n_trials: u64,
    pub sample_size: usize,
    pub x_range: (f64, f64),
}

impl Default for BinomialSimulation {
    fn default() -> Self {
        Self {
            beta0: 0.7,
            beta1: 0.4,
            n_trials: 20,
            sample_size: 30,
            x_range: (-10.0, 20.0),
        }
    }
}

impl BinomialSimulation {
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<BinomialData, SimulationError> {
        let x = linspace(self.x_range.0, self.x_range.1, self.sample_size);
        let p_true: Vec<f64> = x
            .iter()
            .map(|&xi| inv_logit(self.beta0 + self.beta1 * xi))
            .collect();
        let y = p_true
            .iter()
            .map(|&p| {
                Binomial::new(self.n_trials, p)
                    .map(|b| b.sample(rng))
                    .map_err(|e| SimulationError::InvalidSetting {
                        field: "p",
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<u64>, _>>()?;
        Ok(BinomialData {
            x,
            y,
            n_trials: self.n_trials,
            p_true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_linspace() {
        let grid = linspace(-1.0, 2.0, 4);
        assert_eq!(grid, vec![-1.0, 0.0, 1.0, 2.0]);
        assert_eq!(linspace(0.3, 0.7, 7)[6], 0.7);
        assert_eq!(linspace(1.0, 5.0, 1), vec![1.0]);
        assert!(linspace(1.0, 5.0, 0).is_empty());
    }

    #[test]
    fn test_linear_simulation_recovers_truth() {
        let mut rng = SmallRng::seed_from_u64(8927);
        let sim = LinearSimulation {
            size: 20_000,
            ..Default::default()
        };
        let obs = sim.simulate(&mut rng).unwrap();
        assert_eq!(obs.len(), 20_000);

        let n = obs.len() as f64;
        let sd_x2 = (obs.iter().map(|o| o.x2 * o.x2).sum::<f64>() / n).sqrt();
        assert_abs_diff_eq!(sd_x2, 0.2, epsilon = 0.01);

        let residual_mean = obs
            .iter()
            .map(|o| o.y - (1.0 + o.x1 + 2.5 * o.x2))
            .sum::<f64>()
            / n;
        assert_abs_diff_eq!(residual_mean, 0.0, epsilon = 0.05);
    }

    #[test]
    fn test_linear_simulation_is_reproducible() {
        let sim = LinearSimulation::default();
        let a = sim.simulate(&mut SmallRng::seed_from_u64(1)).unwrap();
        let b = sim.simulate(&mut SmallRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_outliers_are_appended() {
        let data = OutlierSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(8927))
            .unwrap();
        assert_eq!(data.x.len(), 103);
        assert_eq!(data.y.len(), 103);
        assert_eq!(data.true_line.len(), 100);
        assert_eq!(&data.x[100..], &[0.1, 0.15, 0.2]);
        assert_eq!(&data.y[100..], &[8.0, 6.0, 9.0]);
        assert_eq!(data.true_line[99], 3.0);
    }

    #[test]
    fn test_binomial_simulation() {
        let data = BinomialSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(1234))
            .unwrap();
        assert_eq!(data.x.len(), 30);
        assert_eq!(data.x[0], -10.0);
        assert_eq!(data.x[29], 20.0);
        assert!(data.y.iter().all(|&k| k <= 20));
        // At x = 20 the success probability is inv_logit(8.7) > 0.999.
        assert!(data.y[29] >= 18);
        assert!(data.p_true.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_negative_noise_is_rejected() {
        let sim = OutlierSimulation {
            noise: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            sim.simulate(&mut SmallRng::seed_from_u64(0)),
            Err(SimulationError::InvalidSetting { field: "noise", .. })
        ));
    }
}
