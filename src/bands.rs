/*!
Stratified posterior bands for the two-covariate linear model.

The observations are split into bins along the secondary covariate `x2`. For every bin the
regression is evaluated at the bin's representative `x2` over a shared grid of the primary
covariate `x1`, giving

- a credible band: the HDI and mean of the conditional mean `mu` across posterior draws;
- a predictive band: the HDI and mean of one `Normal(mu, sigma)` draw per posterior draw.

```rust
use mini_bayesreg::bands::{stratified_bands, BandConfig, LinearDraws};
use mini_bayesreg::data::Observation;
use ndarray::{Array2, Array3};

let observations: Vec<Observation> = (0..10)
    .map(|i| Observation { x1: i as f64, x2: 0.05 * i as f64 - 0.25, y: i as f64 })
    .collect();
let draws = LinearDraws::new(
    Array2::from_elem((2, 50), 1.0),
    Array3::from_shape_fn((2, 50, 2), |(_, _, k)| if k == 0 { 1.0 } else { 2.5 }),
    Array2::from_elem((2, 50), 0.5),
);
let config = BandConfig::default().with_grid_size(20).with_random_seed(1);
let bands = stratified_bands(&observations, &draws, &config).unwrap();
assert_eq!(bands.len(), 4);
assert_eq!(bands[0].grid.len(), 20);
```
*/

use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use std::fmt;
use thiserror::Error;

use crate::data::{linspace, Observation};
use crate::posterior::{Posterior, PosteriorError};
use crate::stats::hdi;

/// Errors raised by [`stratified_bands`]. Configuration is checked first, then the
/// observations, then the posterior draws; nothing is computed until all checks pass.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BandError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error(transparent)]
    Posterior(#[from] PosteriorError),
}

/// One end of a [`Bin`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Unbounded,
    Finite(f64),
}

/// A half-open interval `[lower, upper)` over `x2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub lower: Bound,
    pub upper: Bound,
    /// The `x2` value the regression is evaluated at for this bin.
    pub representative: f64,
}

impl Bin {
    pub fn contains(&self, x2: f64) -> bool {
        let above = match self.lower {
            Bound::Unbounded => true,
            Bound::Finite(lo) => x2 >= lo,
        };
        let below = match self.upper {
            Bound::Unbounded => true,
            Bound::Finite(hi) => x2 < hi,
        };
        above && below
    }

    /// Short description such as `-0.20 ≤ x2 < 0.00`, with `decimals` digits.
    pub fn label(&self, decimals: usize) -> String {
        match (self.lower, self.upper) {
            (Bound::Unbounded, Bound::Unbounded) => "all x2".to_string(),
            (Bound::Unbounded, Bound::Finite(hi)) => format!("x2 < {hi:.decimals$}"),
            (Bound::Finite(lo), Bound::Unbounded) => format!("x2 ≥ {lo:.decimals$}"),
            (Bound::Finite(lo), Bound::Finite(hi)) => {
                format!("{lo:.decimals$} ≤ x2 < {hi:.decimals$}")
            }
        }
    }
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label(2))
    }
}

/// Settings for [`stratified_bands`].
#[derive(Debug, Clone, PartialEq)]
pub struct BandConfig {
    pub num_bins: usize,
    /// Width of every interior bin.
    pub bin_width: f64,
    /// The bins are laid out symmetrically around this value.
    pub bin_center: f64,
    /// Probability mass of both bands, in `(0, 1)`.
    pub coverage: f64,
    /// Number of `x1` grid points.
    pub grid_size: usize,
    /// Seed for the predictive noise. `None` draws fresh noise on every call.
    pub random_seed: Option<u64>,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            num_bins: 4,
            bin_width: 0.2,
            bin_center: 0.0,
            coverage: 0.95,
            grid_size: 100,
            random_seed: None,
        }
    }
}

impl BandConfig {
    pub fn with_num_bins(mut self, num_bins: usize) -> Self {
        self.num_bins = num_bins;
        self
    }

    pub fn with_bin_width(mut self, bin_width: f64) -> Self {
        self.bin_width = bin_width;
        self
    }

    pub fn with_bin_center(mut self, bin_center: f64) -> Self {
        self.bin_center = bin_center;
        self
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), BandError> {
        let invalid = |msg: String| Err(BandError::InvalidConfiguration(msg));
        if !(self.coverage > 0.0 && self.coverage < 1.0) {
            return invalid(format!("coverage must lie in (0, 1), got {}", self.coverage));
        }
        if self.num_bins < 2 {
            return invalid(format!("num_bins must be at least 2, got {}", self.num_bins));
        }
        if !(self.bin_width > 0.0 && self.bin_width.is_finite()) {
            return invalid(format!(
                "bin_width must be positive and finite, got {}",
                self.bin_width
            ));
        }
        if !self.bin_center.is_finite() {
            return invalid(format!("bin_center must be finite, got {}", self.bin_center));
        }
        if self.grid_size < 2 {
            return invalid(format!("grid_size must be at least 2, got {}", self.grid_size));
        }
        Ok(())
    }
}

/// Posterior draws of the linear model's intercept, two slopes and noise scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearDraws {
    /// `[n_chains, n_draws]`
    pub intercept: Array2<f64>,
    /// `[n_chains, n_draws, 2]`; slope 0 multiplies `x1`, slope 1 multiplies `x2`.
    pub slope: Array3<f64>,
    /// `[n_chains, n_draws]`
    pub sigma: Array2<f64>,
}

impl LinearDraws {
    pub fn new(intercept: Array2<f64>, slope: Array3<f64>, sigma: Array2<f64>) -> Self {
        Self {
            intercept,
            slope,
            sigma,
        }
    }

    /// Extracts the three parameters from a posterior by name, e.g.
    /// `("alpha", "beta", "sigma")` for [`LinearModel`](crate::model::LinearModel).
    pub fn from_posterior(
        posterior: &Posterior,
        intercept: &str,
        slope: &str,
        sigma: &str,
    ) -> Result<Self, BandError> {
        Ok(Self {
            intercept: posterior.scalar(intercept)?,
            slope: posterior.get(slope)?.to_owned(),
            sigma: posterior.scalar(sigma)?,
        })
    }

    /// Checks that all arrays agree on `[n_chains, n_draws]`, returning that shape.
    pub fn shape(&self) -> Result<(usize, usize), BandError> {
        let shape = self.intercept.dim();
        let (c, d, k) = self.slope.dim();
        if (c, d) != shape || self.sigma.dim() != shape {
            return Err(BandError::ShapeMismatch(format!(
                "intercept {:?}, slope {:?} and sigma {:?} disagree on chains x draws",
                self.intercept.shape(),
                self.slope.shape(),
                self.sigma.shape()
            )));
        }
        if k != 2 {
            return Err(BandError::ShapeMismatch(format!(
                "expected 2 slopes per draw, got {k}"
            )));
        }
        if shape.0 * shape.1 == 0 {
            return Err(BandError::ShapeMismatch("no posterior draws".into()));
        }
        Ok(shape)
    }

    fn check_values(&self) -> Result<(), BandError> {
        let finite = self
            .intercept
            .iter()
            .chain(self.slope.iter())
            .chain(self.sigma.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(BandError::DegenerateInput(
                "posterior draws contain non-finite values".into(),
            ));
        }
        if self.sigma.iter().any(|&s| s < 0.0) {
            return Err(BandError::DegenerateInput(
                "noise scale draws must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Lower and upper HDI bounds and the mean at every grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
    pub mean: Array1<f64>,
}

impl Band {
    fn with_len(n: usize) -> Self {
        Self {
            lower: Array1::zeros(n),
            upper: Array1::zeros(n),
            mean: Array1::zeros(n),
        }
    }

    fn set(&mut self, g: usize, sample: &[f64], coverage: f64) -> Result<(), BandError> {
        let (lo, hi) = hdi(sample, coverage)
            .ok_or_else(|| BandError::DegenerateInput("no HDI for a non-finite sample".into()))?;
        self.lower[g] = lo;
        self.upper[g] = hi;
        self.mean[g] = sample.iter().sum::<f64>() / sample.len() as f64;
        Ok(())
    }

    pub fn width(&self) -> Array1<f64> {
        &self.upper - &self.lower
    }
}

/// Everything computed for one bin.
#[derive(Debug, Clone, PartialEq)]
pub struct BinBands {
    pub bin: Bin,
    /// The `x1` grid, shared by all bins.
    pub grid: Array1<f64>,
    pub credible: Band,
    pub predictive: Band,
    /// `(x1, y)` of the observations whose `x2` falls in the bin.
    pub scatter: Vec<(f64, f64)>,
}

/// The `num_bins - 1` interior boundaries, `center - width * (num_bins / 2 - 1) + width * i`.
pub fn bin_boundaries(num_bins: usize, width: f64, center: f64) -> Vec<f64> {
    let start = center - width * (num_bins as f64 / 2.0 - 1.0);
    (0..num_bins.saturating_sub(1))
        .map(|i| start + width * i as f64)
        .collect()
}

/// Bins covering the real line: an unbounded first and last bin around `num_bins - 2`
/// interior bins of width `bin_width`.
pub fn make_bins(config: &BandConfig) -> Result<Vec<Bin>, BandError> {
    config.validate()?;
    let b = bin_boundaries(config.num_bins, config.bin_width, config.bin_center);
    let half = config.bin_width / 2.0;
    let k = config.num_bins;

    let bins = (0..k)
        .map(|i| {
            let lower = if i == 0 {
                Bound::Unbounded
            } else {
                Bound::Finite(b[i - 1])
            };
            let upper = if i == k - 1 {
                Bound::Unbounded
            } else {
                Bound::Finite(b[i])
            };
            let representative = if i == 0 { b[0] - half } else { b[i - 1] + half };
            Bin {
                lower,
                upper,
                representative,
            }
        })
        .collect();
    Ok(bins)
}

fn check_observations(observations: &[Observation]) -> Result<(f64, f64), BandError> {
    if observations.is_empty() {
        return Err(BandError::DegenerateInput("no observations".into()));
    }
    if observations.iter().any(|o| !o.x1.is_finite()) {
        return Err(BandError::DegenerateInput("x1 contains non-finite values".into()));
    }
    let (min, max) = observations
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), o| {
            (lo.min(o.x1), hi.max(o.x1))
        });
    if min == max {
        return Err(BandError::DegenerateInput(format!(
            "all x1 values equal {min}, the grid would be empty"
        )));
    }
    Ok((min, max))
}

/// Computes credible and predictive bands for every bin of `config`.
///
/// The predictive noise is drawn bin by bin, grid point by grid point, posterior draw by
/// posterior draw (chains outer, draws inner), so a fixed `random_seed` reproduces the
/// output exactly.
pub fn stratified_bands(
    observations: &[Observation],
    draws: &LinearDraws,
    config: &BandConfig,
) -> Result<Vec<BinBands>, BandError> {
    config.validate()?;
    let (x1_min, x1_max) = check_observations(observations)?;
    let (n_chains, n_draws) = draws.shape()?;
    draws.check_values()?;

    let bins = make_bins(config)?;
    for bin in &bins {
        log::debug!("bin {} with x2_rep = {:.3}", bin, bin.representative);
    }

    let grid = Array1::from(linspace(x1_min, x1_max, config.grid_size));
    let intercept: Vec<f64> = draws.intercept.iter().copied().collect();
    let slope_x1: Vec<f64> = draws.slope.index_axis(Axis(2), 0).iter().copied().collect();
    let slope_x2: Vec<f64> = draws.slope.index_axis(Axis(2), 1).iter().copied().collect();
    let sigma: Vec<f64> = draws.sigma.iter().copied().collect();
    let m = n_chains * n_draws;

    let mut rng = match config.random_seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };

    let mut mu = vec![0.0; m];
    let mut predicted = vec![0.0; m];
    let mut out = Vec::with_capacity(bins.len());
    for bin in bins {
        let x2 = bin.representative;
        let mut credible = Band::with_len(grid.len());
        let mut predictive = Band::with_len(grid.len());

        for (g, &x1) in grid.iter().enumerate() {
            for j in 0..m {
                mu[j] = intercept[j] + slope_x1[j] * x1 + slope_x2[j] * x2;
                let z: f64 = StandardNormal.sample(&mut rng);
                predicted[j] = mu[j] + sigma[j] * z;
            }
            credible.set(g, &mu, config.coverage)?;
            predictive.set(g, &predicted, config.coverage)?;
        }

        let scatter = observations
            .iter()
            .filter(|o| bin.contains(o.x2))
            .map(|o| (o.x1, o.y))
            .collect();
        out.push(BinBands {
            bin,
            grid: grid.clone(),
            credible,
            predictive,
            scatter,
        });
    }
    Ok(out)
}
