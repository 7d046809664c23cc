/*!
Target and proposal distributions for Metropolis–Hastings, plus the log-densities used to
declare regression models.

This module is generic over the floating-point precision (e.g., `f32` or `f64`) using
the [`num_traits::Float`] trait where a sampler touches it. The model-side densities
([`Prior`], [`normal_lpdf`], [`binomial_logit_lpmf`]) work in `f64`.

# Examples

```rust
use mini_bayesreg::distributions::{IsotropicGaussian, Prior, Proposal};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let prior = Prior::HalfNormal { sigma: 1.0 };
assert!(prior.log_prob(-0.1).is_infinite());

let proposal: IsotropicGaussian<f64> = IsotropicGaussian::new(0.5);
let mut rng = SmallRng::seed_from_u64(42);
let candidate = proposal.sample(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
```
*/

use num_traits::Float;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;
use std::fmt;

/// A continuous target distribution, known up to a normalizing constant.
pub trait Target<T: Float> {
    /// Returns the log of the unnormalized density at `theta`.
    fn unnorm_log_prob(&self, theta: &[T]) -> T;
}

/// A proposal distribution `q(x' | x)` for Metropolis–Hastings.
///
/// Proposals draw from the caller's random number generator, so chains that share a
/// proposal configuration still produce independent streams.
pub trait Proposal<T: Float> {
    /// Samples a candidate `x'` from `q(x' | current)`.
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T>;

    /// Evaluates `log q(to | from)`.
    fn log_prob(&self, from: &[T], to: &[T]) -> T;

    /// Multiplies the proposal's scale by `factor`. Used while tuning.
    fn rescale(&mut self, _factor: T) {}

    /// Installs per-coordinate step sizes estimated during tuning. Proposals with a single
    /// shared scale ignore it.
    fn set_std(&mut self, _std: &[T]) {}
}

/// Isotropic Gaussian random-walk proposal: adds independent `N(0, std²)` noise to every
/// coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian<T: Float> {
    pub std: T,
}

impl<T: Float> IsotropicGaussian<T> {
    pub fn new(std: T) -> Self {
        Self { std }
    }
}

impl<T: Float> Proposal<T> for IsotropicGaussian<T>
where
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .map(|&x| {
                let z: T = StandardNormal.sample(rng);
                x + self.std * z
            })
            .collect()
    }

    fn log_prob(&self, from: &[T], to: &[T]) -> T {
        let two = T::one() + T::one();
        let var = self.std * self.std;
        let d = T::from(from.len()).unwrap_or_else(T::zero);
        let two_pi = T::from(2.0 * PI).unwrap_or_else(T::one);
        let sq = from
            .iter()
            .zip(to.iter())
            .fold(T::zero(), |acc, (&f, &t)| acc + (t - f) * (t - f));
        -sq / (two * var) - d / two * (two_pi * var).ln()
    }

    fn rescale(&mut self, factor: T) {
        self.std = self.std * factor;
    }
}

/// Gaussian random-walk proposal with its own standard deviation per coordinate.
///
/// Coordinate `j` moves by `scale * std[j] * z`. Tuning multiplies `scale` by the
/// acceptance-based factor and replaces `std` with estimates of the posterior spread.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalGaussian<T: Float> {
    pub scale: T,
    pub std: Vec<T>,
}

impl<T: Float> DiagonalGaussian<T> {
    /// A proposal with step `std` on each of `dim` coordinates.
    pub fn new(std: T, dim: usize) -> Self {
        Self {
            scale: T::one(),
            std: vec![std; dim],
        }
    }

    fn step(&self, j: usize) -> T {
        self.scale * self.std.get(j).copied().unwrap_or_else(T::one)
    }
}

impl<T: Float> Proposal<T> for DiagonalGaussian<T>
where
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .enumerate()
            .map(|(j, &x)| {
                let z: T = StandardNormal.sample(rng);
                x + self.step(j) * z
            })
            .collect()
    }

    fn log_prob(&self, from: &[T], to: &[T]) -> T {
        let half = T::from(0.5).unwrap_or_else(T::one);
        let ln_sqrt_2pi = T::from(LN_SQRT_2PI).unwrap_or_else(T::zero);
        from.iter()
            .zip(to.iter())
            .enumerate()
            .fold(T::zero(), |acc, (j, (&f, &t))| {
                let s = self.step(j);
                let z = (t - f) / s;
                acc - half * z * z - s.ln() - ln_sqrt_2pi
            })
    }

    fn rescale(&mut self, factor: T) {
        self.scale = self.scale * factor;
    }

    fn set_std(&mut self, std: &[T]) {
        self.std = std.to_vec();
    }
}

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Log density of `N(mu, sigma²)` at `x`.
pub fn normal_lpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = (x - mu) / sigma;
    -LN_SQRT_2PI - sigma.ln() - 0.5 * z * z
}

/// Numerically stable `ln(1 + exp(x))`.
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// The logistic function, `1 / (1 + exp(-x))`.
pub fn inv_logit(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln C(n, k)`, summed term by term.
pub fn ln_choose(n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    let k = k.min(n - k);
    (1..=k)
        .map(|i| ((n - k + i) as f64 / i as f64).ln())
        .sum()
}

/// Log mass of `Binomial(n, inv_logit(eta))` at `k`, evaluated on the logit scale so that
/// large `|eta|` does not round `p` to 0 or 1.
pub fn binomial_logit_lpmf(k: u64, n: u64, eta: f64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    // ln p = -softplus(-eta), ln(1 - p) = -softplus(eta)
    ln_choose(n, k) - k as f64 * softplus(-eta) - (n - k) as f64 * softplus(eta)
}

/// Prior distributions available to model declarations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Normal { mu: f64, sigma: f64 },
    HalfNormal { sigma: f64 },
    HalfCauchy { beta: f64 },
}

impl Prior {
    /// Normalized log density at `x`. Half-distributions are `-inf` below zero.
    pub fn log_prob(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mu, sigma } => normal_lpdf(x, mu, sigma),
            Prior::HalfNormal { sigma } => {
                if x < 0.0 {
                    f64::NEG_INFINITY
                } else {
                    std::f64::consts::LN_2 + normal_lpdf(x, 0.0, sigma)
                }
            }
            Prior::HalfCauchy { beta } => {
                if x < 0.0 || beta <= 0.0 {
                    f64::NEG_INFINITY
                } else {
                    let z = x / beta;
                    (2.0 / PI).ln() - beta.ln() - z.mul_add(z, 1.0).ln()
                }
            }
        }
    }

    /// Whether the support is restricted to the non-negative reals.
    pub fn is_positive(&self) -> bool {
        !matches!(self, Prior::Normal { .. })
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Normal { mu, sigma } => write!(f, "Normal(mu={mu}, sigma={sigma})"),
            Prior::HalfNormal { sigma } => write!(f, "HalfNormal(sigma={sigma})"),
            Prior::HalfCauchy { beta } => write!(f, "HalfCauchy(beta={beta})"),
        }
    }
}
