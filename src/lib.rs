//! Bayesian regression workflows: simulate data with known ground truth, declare a model,
//! sample its posterior with multi-chain Metropolis–Hastings, summarize and diagnose the
//! draws, and compute stratified credible and predictive bands.
//!
//! ```rust
//! use mini_bayesreg::bands::{stratified_bands, BandConfig, LinearDraws};
//! use mini_bayesreg::data::LinearSimulation;
//! use mini_bayesreg::model::LinearModel;
//! use mini_bayesreg::sampler::{sample, SampleConfig};
//! use mini_bayesreg::stats::summary;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let obs = LinearSimulation::default()
//!     .simulate(&mut SmallRng::seed_from_u64(8927))
//!     .unwrap();
//! let config = SampleConfig::default().with_draws(300).with_tune(500).set_seed(1);
//! let posterior = sample(&LinearModel::new(&obs), &config).unwrap();
//! println!("{}", summary(&posterior, 0.94).unwrap());
//!
//! let draws = LinearDraws::from_posterior(&posterior, "alpha", "beta", "sigma").unwrap();
//! let bands = stratified_bands(&obs, &draws, &BandConfig::default()).unwrap();
//! assert_eq!(bands.len(), 4);
//! ```

pub mod bands;
pub mod core;
pub mod data;
pub mod distributions;
pub mod io;
pub mod metropolis_hastings;
pub mod model;
pub mod posterior;
pub mod sampler;
pub mod stats;
