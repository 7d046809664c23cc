//! Core traits for running Markov chains, sequentially or several in parallel.
//!
//! A sampler exposes its chains through [`HasChains`] and gets [`ChainRunner`] for free.
//! Running discards `n_discard` burn-in steps per chain (during which the chain may adapt
//! its kernel, see [`MarkovChain::adapt`]) and then collects `n_collect` states into an
//! array of shape `[n_chains, n_collect, dim]`.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Array3, Axis};
use num_traits::Float;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::error::Error;
use std::time::{Duration, Instant};

use crate::stats::RhatMulti;

/// Number of burn-in steps between two calls to [`MarkovChain::adapt`].
pub const TUNE_INTERVAL: usize = 100;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const ACCEPT_WINDOW: usize = 100;

pub trait MarkovChain<T> {
    /// Does one iteration of the chain, returning the new current state.
    fn step(&mut self) -> &Vec<T>;

    /// Returns the current state without stepping.
    fn current_state(&self) -> &Vec<T>;

    /// Called during burn-in with the fraction of moves accepted over the last
    /// [`TUNE_INTERVAL`] steps. Chains without tunable parameters ignore it.
    fn adapt(&mut self, _accept_rate: f64) {}

    /// Called once when burn-in ends, before the first collected step.
    fn finish_tuning(&mut self) {}
}

/// Runs burn-in followed by `n_collect` collected steps, returning a `[n_collect, dim]` array.
pub fn run_chain<T, M>(chain: &mut M, n_collect: usize, n_discard: usize) -> Array2<T>
where
    M: MarkovChain<T>,
    T: Float,
{
    burn_in(chain, n_discard);

    let dim = chain.current_state().len();
    let mut out = Array2::<T>::zeros((n_collect, dim));
    for mut row in out.axis_iter_mut(Axis(0)) {
        let state = chain.step();
        row.iter_mut().zip(state.iter()).for_each(|(o, &s)| *o = s);
    }
    out
}

fn burn_in<T, M>(chain: &mut M, n_discard: usize)
where
    M: MarkovChain<T>,
    T: Float,
{
    let mut accepted = 0_usize;
    for step in 0..n_discard {
        let previous = chain.current_state().clone();
        if *chain.step() != previous {
            accepted += 1;
        }
        if (step + 1) % TUNE_INTERVAL == 0 {
            chain.adapt(accepted as f64 / TUNE_INTERVAL as f64);
            accepted = 0;
        }
    }
    chain.finish_tuning();
}

/// Starting points for `n_chains` chains: `point` plus independent Uniform(-1, 1) jitter
/// on every coordinate.
pub fn jittered_inits<T: Float>(point: &[T], n_chains: usize, seed: u64) -> Vec<Vec<T>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n_chains)
        .map(|_| {
            point
                .iter()
                .map(|&x| {
                    let jitter: f64 = rng.gen_range(-1.0..1.0);
                    x + T::from(jitter).unwrap_or_else(T::zero)
                })
                .collect()
        })
        .collect()
}

/// A trait for anything that owns multiple Markov chains.
pub trait HasChains<T> {
    type Chain: MarkovChain<T> + Send;

    /// Returns a mutable reference to the vector of chains.
    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

pub trait ChainRunner<T>: HasChains<T>
where
    T: Float + Send + Sync + 'static,
{
    /// Runs all chains in parallel. Returns draws of shape `[n_chains, n_collect, dim]`.
    fn run(&mut self, n_collect: usize, n_discard: usize) -> Result<Array3<T>, Box<dyn Error>> {
        let results: Vec<Array2<T>> = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_collect, n_discard))
            .collect();

        let views: Vec<_> = results.iter().map(|a| a.view()).collect();
        if views.is_empty() {
            return Err("Expected at least one chain to run.".into());
        }
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    /// Like [`ChainRunner::run`], but steps the chains in lockstep and shows a progress bar
    /// with the recent acceptance rate and, once collecting, the running maximum R-hat.
    fn run_progress(
        &mut self,
        n_collect: usize,
        n_discard: usize,
    ) -> Result<Array3<T>, Box<dyn Error>> {
        let chains = self.chains_mut();
        let n_chains = chains.len();
        if n_chains == 0 {
            return Err("Expected at least one chain to run.".into());
        }
        let dim = chains[0].current_state().len();
        let total = n_discard + n_collect;

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("##-"),
        );
        pb.set_prefix("Tuning");

        let mut out = Array3::<T>::zeros((n_chains, n_collect, dim));
        let mut rhat = RhatMulti::new(n_chains, dim);
        let mut window_accepts = vec![0_usize; n_chains];
        let mut accept_queue: VecDeque<f64> = VecDeque::with_capacity(ACCEPT_WINDOW + 1);
        let mut last_update = Instant::now();

        if n_discard == 0 {
            chains.iter_mut().for_each(|chain| chain.finish_tuning());
        }
        for step in 0..total {
            let moved: Vec<bool> = chains
                .par_iter_mut()
                .map(|chain| {
                    let previous = chain.current_state().clone();
                    *chain.step() != previous
                })
                .collect();

            let n_moved = moved.iter().filter(|&&m| m).count();
            accept_queue.push_back(n_moved as f64 / n_chains as f64);
            if accept_queue.len() > ACCEPT_WINDOW {
                accept_queue.pop_front();
            }

            if step < n_discard {
                window_accepts
                    .iter_mut()
                    .zip(moved.iter())
                    .for_each(|(acc, &m)| *acc += m as usize);
                if (step + 1) % TUNE_INTERVAL == 0 {
                    chains
                        .par_iter_mut()
                        .zip(window_accepts.par_iter_mut())
                        .for_each(|(chain, acc)| {
                            chain.adapt(*acc as f64 / TUNE_INTERVAL as f64);
                            *acc = 0;
                        });
                }
                if step + 1 == n_discard {
                    chains.par_iter_mut().for_each(|chain| chain.finish_tuning());
                    pb.set_prefix("Sampling");
                }
            } else {
                let draw = step - n_discard;
                let mut flat = Vec::with_capacity(n_chains * dim);
                for (c, chain) in chains.iter().enumerate() {
                    for (d, &v) in chain.current_state().iter().enumerate() {
                        out[[c, draw, d]] = v;
                        flat.push(v);
                    }
                }
                rhat.step(&flat)?;
            }

            pb.inc(1);
            if last_update.elapsed() >= UPDATE_INTERVAL || step + 1 == total {
                let p_accept = accept_queue.iter().sum::<f64>() / accept_queue.len() as f64;
                let msg = match rhat.max() {
                    Ok(r) if step >= n_discard => {
                        format!("p(accept)≈{p_accept:.2} max(rhat)≈{r:.3}")
                    }
                    _ => format!("p(accept)≈{p_accept:.2}"),
                };
                pb.set_message(msg);
                last_update = Instant::now();
            }
        }
        pb.finish_with_message("Done!");

        Ok(out)
    }
}

impl<T, R> ChainRunner<T> for R
where
    T: Float + Send + Sync + 'static,
    R: HasChains<T>,
{
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic chain that counts up, used to check bookkeeping.
    #[derive(Clone)]
    struct Counter {
        state: Vec<f64>,
        adapt_calls: Vec<f64>,
        /// Step count at which tuning finished.
        tuned_at: Option<f64>,
    }

    impl MarkovChain<f64> for Counter {
        fn step(&mut self) -> &Vec<f64> {
            self.state.iter_mut().for_each(|x| *x += 1.0);
            &self.state
        }

        fn current_state(&self) -> &Vec<f64> {
            &self.state
        }

        fn adapt(&mut self, accept_rate: f64) {
            self.adapt_calls.push(accept_rate);
        }

        fn finish_tuning(&mut self) {
            self.tuned_at = Some(self.state[1]);
        }
    }

    struct Counters {
        chains: Vec<Counter>,
    }

    impl HasChains<f64> for Counters {
        type Chain = Counter;

        fn chains_mut(&mut self) -> &mut Vec<Counter> {
            &mut self.chains
        }
    }

    fn counters(n: usize) -> Counters {
        Counters {
            chains: (0..n)
                .map(|i| Counter {
                    state: vec![i as f64 * 1000.0, 0.0],
                    adapt_calls: vec![],
                    tuned_at: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_run_chain_discards_burn_in() {
        let mut chain = counters(1).chains.remove(0);
        let out = run_chain(&mut chain, 5, 250);
        assert_eq!(out.shape(), &[5, 2]);
        assert_eq!(out[[0, 1]], 251.0);
        assert_eq!(out[[4, 1]], 255.0);
        // Two full tuning windows fit into 250 burn-in steps.
        assert_eq!(chain.adapt_calls, vec![1.0, 1.0]);
        assert_eq!(chain.tuned_at, Some(250.0));
    }

    #[test]
    fn test_run_shape() {
        let mut runner = counters(3);
        let out = runner.run(10, 20).unwrap();
        assert_eq!(out.shape(), &[3, 10, 2]);
        assert_eq!(out[[2, 0, 0]], 2021.0);
    }

    #[test]
    fn test_run_progress_matches_run() {
        let mut a = counters(2);
        let mut b = counters(2);
        let plain = a.run(30, 200).unwrap();
        let progress = b.run_progress(30, 200).unwrap();
        assert_eq!(plain, progress);
        assert_eq!(b.chains[0].adapt_calls.len(), 2);
        assert_eq!(b.chains[1].tuned_at, Some(200.0));
        assert_eq!(a.chains[1].tuned_at, Some(200.0));

        let mut c = counters(1);
        c.run_progress(5, 0).unwrap();
        assert_eq!(c.chains[0].tuned_at, Some(0.0));
    }

    #[test]
    fn test_run_without_chains_fails() {
        let mut runner = counters(0);
        assert!(runner.run(10, 0).is_err());
        assert!(runner.run_progress(10, 0).is_err());
    }

    #[test]
    fn test_jittered_inits() {
        let inits = jittered_inits(&[0.0, 5.0], 4, 42);
        assert_eq!(inits.len(), 4);
        for init in &inits {
            assert!((-1.0..1.0).contains(&init[0]));
            assert!((4.0..6.0).contains(&init[1]));
        }
        assert_ne!(inits[0], inits[1]);
        assert_eq!(inits, jittered_inits(&[0.0, 5.0], 4, 42));
    }
}
