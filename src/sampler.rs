//! Posterior sampling for any [`Model`].
//!
//! [`sample`] wires a model into the random-walk Metropolis–Hastings engine: chains start
//! at the model's initial point jittered by Uniform(-1, 1), tune a per-coordinate proposal
//! scale during burn-in, and their unconstrained draws are mapped back into a [`Posterior`].
//!
//! ```rust
//! use mini_bayesreg::data::LinearSimulation;
//! use mini_bayesreg::model::LinearModel;
//! use mini_bayesreg::sampler::{sample, SampleConfig};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let obs = LinearSimulation::default()
//!     .simulate(&mut SmallRng::seed_from_u64(1))
//!     .unwrap();
//! let config = SampleConfig::default()
//!     .with_chains(2)
//!     .with_draws(200)
//!     .with_tune(300)
//!     .set_seed(42);
//! let posterior = sample(&LinearModel::new(&obs), &config).unwrap();
//! assert_eq!(posterior.get("beta").unwrap().shape(), &[2, 200, 2]);
//! ```

use ndarray::ArrayView3;
use rand::{thread_rng, Rng};
use std::error::Error;

use crate::core::{jittered_inits, ChainRunner};
use crate::distributions::DiagonalGaussian;
use crate::metropolis_hastings::MetropolisHastings;
use crate::model::{Model, ModelTarget};
use crate::posterior::Posterior;
use crate::stats::{acceptance_rate, split_rhat_mean_ess};

/// R-hat above which `sample` warns about convergence.
pub const RHAT_WARN: f64 = 1.01;

/// Settings for [`sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub n_chains: usize,
    /// Kept draws per chain.
    pub draws: usize,
    /// Burn-in steps per chain, used for tuning and then discarded.
    pub tune: usize,
    /// Initial standard deviation of the random-walk proposal, on every coordinate.
    pub proposal_std: f64,
    pub seed: Option<u64>,
    /// Show a progress bar while sampling.
    pub progress: bool,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            n_chains: 4,
            draws: 1000,
            tune: 1000,
            proposal_std: 0.1,
            seed: None,
            progress: false,
        }
    }
}

impl SampleConfig {
    pub fn with_chains(mut self, n_chains: usize) -> Self {
        self.n_chains = n_chains;
        self
    }

    pub fn with_draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    pub fn with_tune(mut self, tune: usize) -> Self {
        self.tune = tune;
        self
    }

    pub fn with_proposal_std(mut self, proposal_std: f64) -> Self {
        self.proposal_std = proposal_std;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Components of `draws` (`[chain, draw, component]`, named by `names`) whose split R-hat
/// is above [`RHAT_WARN`] or not finite, with that R-hat.
pub fn unconverged(
    names: &[String],
    draws: ArrayView3<f64>,
) -> Result<Vec<(String, f64)>, Box<dyn Error>> {
    let (rhat, _) = split_rhat_mean_ess(draws)?;
    Ok(names
        .iter()
        .zip(rhat.iter())
        .filter(|(_, r)| !(**r <= RHAT_WARN))
        .map(|(name, &r)| (name.clone(), r))
        .collect())
}

/// Draws from the posterior of `model`.
///
/// Chain `i` is seeded with `seed + i`; the initial jitter uses the seed that follows the
/// last chain's. Without a seed, one is taken from the thread RNG.
pub fn sample<M>(model: &M, config: &SampleConfig) -> Result<Posterior, Box<dyn Error>>
where
    M: Model + Clone + Send,
{
    if config.n_chains == 0 || config.draws == 0 {
        return Err(format!(
            "Expected at least one chain and one draw, got {} chains and {} draws.",
            config.n_chains, config.draws
        )
        .into());
    }
    if !(config.proposal_std > 0.0 && config.proposal_std.is_finite()) {
        return Err(format!(
            "Expected a positive proposal_std, got {}.",
            config.proposal_std
        )
        .into());
    }

    let seed = config.seed.unwrap_or_else(|| thread_rng().gen());
    let params = model.params();
    let inits = jittered_inits(
        &model.initial_point(),
        config.n_chains,
        seed.wrapping_add(config.n_chains as u64),
    );
    let mut mh = MetropolisHastings::new(
        ModelTarget::new(model.clone()),
        DiagonalGaussian::new(config.proposal_std, model.dim()),
        inits,
    )
    .set_seed(seed);

    log::info!(
        "Sampling {} chains: {} tune and {} draw iterations (seed {seed}).",
        config.n_chains,
        config.tune,
        config.draws
    );
    let draws = if config.progress {
        mh.run_progress(config.draws, config.tune)?
    } else {
        mh.run(config.draws, config.tune)?
    };

    log::info!(
        "Mean acceptance rate: {:.3}.",
        acceptance_rate(draws.view())
    );
    let names: Vec<String> = params.iter().flat_map(|p| p.component_names()).collect();
    if let Ok(flagged) = unconverged(&names, draws.view()) {
        for (name, r) in flagged {
            log::warn!("R-hat of {name} is {r:.3}; the chains may not have converged.");
        }
    }

    Ok(Posterior::from_unconstrained(params, draws.view())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BinomialSimulation, LinearSimulation};
    use crate::model::{BinomialModel, LinearModel};
    use crate::stats::summary;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn quick() -> SampleConfig {
        SampleConfig::default()
            .with_chains(2)
            .with_draws(300)
            .with_tune(500)
            .set_seed(7)
    }

    #[test]
    fn test_defaults() {
        let config = SampleConfig::default();
        assert_eq!(config.n_chains, 4);
        assert_eq!(config.draws, 1000);
        assert_eq!(config.tune, 1000);
        assert_eq!(config.seed, None);
        assert!(!config.progress);
    }

    #[test]
    fn test_seed_reproduces_draws() {
        let obs = LinearSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(3))
            .unwrap();
        let model = LinearModel::new(&obs);
        let a = sample(&model, &quick()).unwrap();
        let b = sample(&model, &quick()).unwrap();
        assert_eq!(a, b);
        assert!(a.scalar("sigma").unwrap().iter().all(|&s| s > 0.0));
    }

    #[test]
    fn test_invalid_config() {
        let obs = LinearSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(3))
            .unwrap();
        let model = LinearModel::new(&obs);
        assert!(sample(&model, &quick().with_chains(0)).is_err());
        assert!(sample(&model, &quick().with_proposal_std(0.0)).is_err());
    }

    #[test]
    fn test_wide_and_narrow_coefficients_both_mix() {
        // beta[1] has a posterior sd about five times that of the other components.
        let obs = LinearSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(8927))
            .unwrap();
        let posterior = sample(&LinearModel::new(&obs), &SampleConfig::default().set_seed(8927))
            .unwrap();
        let summary = summary(&posterior, 0.94).unwrap();
        for row in &summary.rows {
            assert!(row.r_hat < 1.1, "{} has r_hat {}", row.name, row.r_hat);
            assert!(row.ess > 50.0, "{} has ess {}", row.name, row.ess);
        }
        let wide = summary.row("beta[1]").unwrap();
        let narrow = summary.row("beta[0]").unwrap();
        assert!(wide.sd > 2.0 * narrow.sd);
    }

    #[test]
    fn test_unconverged_flags_stuck_chains() {
        let names = vec!["a".to_string(), "b".to_string()];
        // Component a: two chains at different levels; b: both chains alike.
        let draws = ndarray::Array3::from_shape_fn((2, 50, 2), |(c, t, p)| {
            let wiggle = (t as f64 * 0.7).sin();
            if p == 0 {
                10.0 * c as f64 + wiggle
            } else {
                wiggle
            }
        });
        let flagged = unconverged(&names, draws.view()).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].0, "a");
        assert!(flagged[0].1 > 2.0);
    }

    #[test]
    fn test_binomial_recovers_coefficients() {
        let data = BinomialSimulation::default()
            .simulate(&mut SmallRng::seed_from_u64(1234))
            .unwrap();
        let posterior = sample(
            &BinomialModel::new(&data),
            &quick().with_chains(4).with_draws(1000).with_tune(1000),
        )
        .unwrap();
        let summary = summary(&posterior, 0.94).unwrap();
        assert_abs_diff_eq!(summary.row("beta0").unwrap().mean, 0.7, epsilon = 0.5);
        assert_abs_diff_eq!(summary.row("beta1").unwrap().mean, 0.4, epsilon = 0.15);
    }
}
