/*!
# Metropolis–Hastings Sampler

A generic random-walk Metropolis–Hastings sampler over any target `D` implementing
[`Target`] and proposal `Q` implementing [`Proposal`]. The sampler owns one
[`MHMarkovChain`] per initial state; chains run in parallel through
[`ChainRunner`](crate::core::ChainRunner). A global seed makes runs reproducible: chain `i`
is seeded with `seed + i`.

During burn-in every chain rescales its proposal from the acceptance rate of the last
[`TUNE_INTERVAL`](crate::core::TUNE_INTERVAL) steps, see [`tune_factor`]. From the second
tuning window on it also hands the proposal per-coordinate step sizes
`2.38 / sqrt(d) * sd_j`, where `sd_j` is the spread of coordinate `j` over the burn-in
states seen after the first window (see [`Proposal::set_std`]).

## Example Usage

```rust
use mini_bayesreg::core::ChainRunner;
use mini_bayesreg::distributions::{IsotropicGaussian, Target};
use mini_bayesreg::metropolis_hastings::MetropolisHastings;

#[derive(Clone)]
struct StandardNormal;

impl Target<f64> for StandardNormal {
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        -0.5 * theta.iter().map(|x| x * x).sum::<f64>()
    }
}

let initial_states = vec![vec![0.0, 0.0]; 2];
let mut mh = MetropolisHastings::new(StandardNormal, IsotropicGaussian::new(1.0), initial_states)
    .set_seed(42);
let sample = mh.run(500, 100).unwrap();
assert_eq!(sample.shape(), &[2, 500, 2]);
```
*/

use num_traits::Float;
use rand::prelude::*;
use rand_distr::Standard;
use std::marker::Send;

use crate::core::{HasChains, MarkovChain, TUNE_INTERVAL};
use crate::distributions::{Proposal, Target};
use crate::stats::RunningVariance;

/// Optimal random-walk scaling for a Gaussian target is `2.38 / sqrt(d)` posterior sds.
const OPTIMAL_SCALE: f64 = 2.38;

/// Multiplier applied to the proposal scale after a tuning window with acceptance rate
/// `accept_rate`.
///
/// | acceptance   | factor |
/// |--------------|--------|
/// | < 0.001      | 0.1    |
/// | < 0.05       | 0.5    |
/// | < 0.2        | 0.9    |
/// | > 0.95       | 10     |
/// | > 0.75       | 2      |
/// | > 0.5        | 1.1    |
/// | otherwise    | 1      |
pub fn tune_factor(accept_rate: f64) -> f64 {
    if accept_rate < 0.001 {
        0.1
    } else if accept_rate < 0.05 {
        0.5
    } else if accept_rate < 0.2 {
        0.9
    } else if accept_rate > 0.95 {
        10.0
    } else if accept_rate > 0.75 {
        2.0
    } else if accept_rate > 0.5 {
        1.1
    } else {
        1.0
    }
}

/**
The Metropolis–Hastings sampler.

# Type Parameters
- `T`: The floating-point type (e.g. `f32` or `f64`).
- `D`: The target distribution type. Must implement [`Target`].
- `Q`: The proposal distribution type. Must implement [`Proposal`].
*/
#[derive(Debug, Clone)]
pub struct MetropolisHastings<T: Float, D: Clone, Q: Clone> {
    /// The target distribution we want to sample from.
    pub target: D,
    /// The proposal distribution chains start from.
    pub proposal: Q,
    /// The independent Markov chains.
    pub chains: Vec<MHMarkovChain<T, D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal distributions,
/// its current state and its log density, and a chain-specific random number generator.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<T, D, Q> {
    /// The target distribution to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The current state of the chain.
    pub current_state: Vec<T>,
    /// Unnormalized log density of `current_state`.
    pub current_log_prob: T,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
    /// Spread of the burn-in states recorded so far; `None` once burn-in has finished.
    pub burn_in_spread: Option<RunningVariance>,
    /// Tuning windows completed.
    pub n_adapt: usize,
}

impl<T, D, Q> MetropolisHastings<T, D, Q>
where
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
    T: Float + Send,
    Standard: Distribution<T>,
{
    /// Creates a sampler with one chain per entry of `initial_states`.
    pub fn new(target: D, proposal: Q, initial_states: Vec<Vec<T>>) -> Self {
        let chains = initial_states
            .iter()
            .map(|state| MHMarkovChain::new(target.clone(), proposal.clone(), state))
            .collect();
        let seed = thread_rng().gen::<u64>();

        Self {
            target,
            proposal,
            chains,
            seed,
        }
    }

    /// Sets a new global seed; chain `i` gets `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            let chain_seed = seed.wrapping_add(i as u64);
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed)
        }
        self
    }
}

impl<T, D, Q> HasChains<T> for MetropolisHastings<T, D, Q>
where
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
    T: Float + Send,
    Standard: Distribution<T>,
{
    type Chain = MHMarkovChain<T, D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<T, D, Q> MHMarkovChain<T, D, Q>
where
    D: Target<T> + Clone,
    Q: Proposal<T> + Clone,
    T: Float,
    Standard: Distribution<T>,
{
    /// Creates a new chain starting at `initial_state`, seeded from the thread RNG.
    pub fn new(target: D, proposal: Q, initial_state: &[T]) -> Self {
        let seed = thread_rng().gen::<u64>();
        let current_log_prob = target.unnorm_log_prob(initial_state);
        Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            current_log_prob,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            burn_in_spread: Some(RunningVariance::new(initial_state.len())),
            n_adapt: 0,
        }
    }

    /// Per-coordinate proposal std from the recorded burn-in spread, once a full window
    /// has been recorded and every coordinate has moved.
    fn spread_std(&self) -> Option<Vec<T>> {
        let spread = self.burn_in_spread.as_ref()?;
        if spread.count() < TUNE_INTERVAL {
            return None;
        }
        let var = spread.variance()?;
        if var.iter().any(|v| !(*v > 0.0 && v.is_finite())) {
            return None;
        }
        let factor = OPTIMAL_SCALE / (var.len() as f64).sqrt();
        var.iter().map(|v| T::from(factor * v.sqrt())).collect()
    }
}

impl<T, D, Q> MarkovChain<T> for MHMarkovChain<T, D, Q>
where
    D: Target<T> + Clone,
    Q: Proposal<T> + Clone,
    T: Float,
    Standard: Distribution<T>,
{
    /// One Metropolis–Hastings update. The candidate is accepted when
    /// `log u < [log p(x') + log q(x | x')] - [log p(x) + log q(x' | x)]`
    /// with `u ~ Uniform(0, 1)`.
    fn step(&mut self) -> &Vec<T> {
        let proposed = self.proposal.sample(&self.current_state, &mut self.rng);
        let proposed_lp = self.target.unnorm_log_prob(&proposed);
        let log_q_forward = self.proposal.log_prob(&self.current_state, &proposed);
        let log_q_backward = self.proposal.log_prob(&proposed, &self.current_state);
        let log_accept_ratio =
            (proposed_lp + log_q_backward) - (self.current_log_prob + log_q_forward);
        let u: T = self.rng.gen();
        if log_accept_ratio > u.ln() {
            self.current_state = proposed;
            self.current_log_prob = proposed_lp;
        }
        // The first window is the transient away from the initial point.
        if self.n_adapt > 0 {
            if let Some(spread) = self.burn_in_spread.as_mut() {
                spread.push(self.current_state.as_slice());
            }
        }
        &self.current_state
    }

    fn current_state(&self) -> &Vec<T> {
        &self.current_state
    }

    fn adapt(&mut self, accept_rate: f64) {
        self.n_adapt += 1;
        let factor = T::from(tune_factor(accept_rate)).unwrap_or_else(T::one);
        self.proposal.rescale(factor);
        if let Some(std) = self.spread_std() {
            self.proposal.set_std(&std);
        }
    }

    fn finish_tuning(&mut self) {
        self.burn_in_spread = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainRunner;
    use crate::distributions::{DiagonalGaussian, IsotropicGaussian};
    use crate::stats::split_rhat_mean_ess;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array1, Array2, Axis};
    use ndarray_stats::CorrelationExt;

    /// Correlated 2D Gaussian with a fixed covariance.
    #[derive(Clone)]
    struct Gaussian2D {
        mean: Array1<f64>,
        cov: Array2<f64>,
    }

    impl Target<f64> for Gaussian2D {
        fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
            let (a, b, c, d) = (
                self.cov[[0, 0]],
                self.cov[[0, 1]],
                self.cov[[1, 0]],
                self.cov[[1, 1]],
            );
            let det = a * d - b * c;
            let (x, y) = (theta[0] - self.mean[0], theta[1] - self.mean[1]);
            -0.5 * (d * x * x - (b + c) * x * y + a * y * y) / det
        }
    }

    fn run_gaussian_2d_test(sample_size: usize, n_chains: usize, use_progress: bool) {
        const BURNIN: usize = 2_000;
        const SEED: u64 = 42;

        let target = Gaussian2D {
            mean: arr1(&[0.0, 1.0]),
            cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        };

        let proposal = IsotropicGaussian::new(1.0);
        let mut mh = MetropolisHastings::new(
            target.clone(),
            proposal,
            vec![vec![0.0, 0.0]; n_chains],
        )
        .set_seed(SEED);

        let samples = if use_progress {
            mh.run_progress(sample_size / n_chains, BURNIN).unwrap()
        } else {
            mh.run(sample_size / n_chains, BURNIN).unwrap()
        };

        let stacked = samples
            .into_shape_with_order((sample_size, 2))
            .expect("Failed to reshape samples");

        let mean = stacked.mean_axis(Axis(0)).unwrap();
        let cov = stacked.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, target.mean, epsilon = 0.3);
        assert_abs_diff_eq!(cov, target.cov, epsilon = 0.5);
    }

    #[test]
    fn test_single_chain() {
        run_gaussian_2d_test(10_000, 1, false);
    }

    #[test]
    fn test_4_chains() {
        run_gaussian_2d_test(40_000, 4, false);
    }

    #[test]
    fn test_progress_4_chains() {
        run_gaussian_2d_test(40_000, 4, true);
    }

    #[test]
    fn test_seeds_per_chain() {
        let target = Gaussian2D {
            mean: arr1(&[0.0, 0.0]),
            cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
        };
        let mh = MetropolisHastings::new(target, IsotropicGaussian::new(1.0), vec![vec![0.0, 0.0]; 2])
            .set_seed(42);
        assert_eq!(mh.chains[0].seed, 42);
        assert_eq!(mh.chains[1].seed, 43);
    }

    #[test]
    fn test_same_seed_same_draws() {
        let target = Gaussian2D {
            mean: arr1(&[0.0, 0.0]),
            cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
        };
        let make = || {
            MetropolisHastings::new(
                target.clone(),
                IsotropicGaussian::new(1.0),
                vec![vec![0.0, 0.0]; 3],
            )
            .set_seed(7)
        };
        let a = make().run(200, 200).unwrap();
        let b = make().run(200, 200).unwrap();
        assert_eq!(a, b);
        // Chains seeded differently wander differently.
        assert_ne!(a.index_axis(Axis(0), 0), a.index_axis(Axis(0), 1));
    }

    #[test]
    fn test_tuning_rescues_a_bad_scale() {
        let target = Gaussian2D {
            mean: arr1(&[0.0, 0.0]),
            cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
        };
        let mut mh = MetropolisHastings::new(
            target,
            IsotropicGaussian::new(100.0),
            vec![vec![0.0, 0.0]; 2],
        )
        .set_seed(1);
        let sample = mh.run(2_000, 2_000).unwrap();
        for chain in &mh.chains {
            assert!(chain.proposal.std < 10.0, "std stayed at {}", chain.proposal.std);
        }
        let rate = crate::stats::acceptance_rate(sample.view());
        assert!((0.1..0.9).contains(&rate), "acceptance rate {rate}");
    }

    /// Independent Gaussian coordinates with very different spreads.
    #[derive(Clone)]
    struct Stretched {
        sd: [f64; 2],
    }

    impl Target<f64> for Stretched {
        fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
            theta
                .iter()
                .zip(self.sd.iter())
                .map(|(x, s)| -0.5 * (x / s).powi(2))
                .sum()
        }
    }

    #[test]
    fn test_per_coordinate_steps_follow_the_spread() {
        let target = Stretched { sd: [0.1, 5.0] };
        let mut mh = MetropolisHastings::new(
            target,
            DiagonalGaussian::new(0.1, 2),
            vec![vec![0.0, 0.0]; 4],
        )
        .set_seed(11);
        let sample = mh.run(2_000, 2_000).unwrap();

        for chain in &mh.chains {
            assert!(chain.burn_in_spread.is_none());
            let ratio = chain.proposal.std[1] / chain.proposal.std[0];
            assert!((20.0..120.0).contains(&ratio), "std ratio {ratio}");
        }
        let (rhat, ess) = split_rhat_mean_ess(sample.view()).unwrap();
        for p in 0..2 {
            assert!(rhat[p] < 1.05, "rhat[{p}] = {}", rhat[p]);
            assert!(ess[p] > 400.0, "ess[{p}] = {}", ess[p]);
        }
        let flat = sample.into_shape_with_order((8_000, 2)).unwrap();
        let sd = flat.std_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(sd[0], 0.1, epsilon = 0.015);
        assert_abs_diff_eq!(sd[1], 5.0, epsilon = 0.75);
    }

    #[test]
    fn test_tune_factor() {
        assert_eq!(tune_factor(0.0), 0.1);
        assert_eq!(tune_factor(0.01), 0.5);
        assert_eq!(tune_factor(0.1), 0.9);
        assert_eq!(tune_factor(0.3), 1.0);
        assert_eq!(tune_factor(0.6), 1.1);
        assert_eq!(tune_factor(0.8), 2.0);
        assert_eq!(tune_factor(0.99), 10.0);
    }
}
