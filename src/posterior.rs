//! Posterior draws, indexed by chain, draw and parameter component.
//!
//! Draws are stored on the constrained scale in an array of shape
//! `[n_chains, n_draws, dim]`, where the last axis follows the model's [`ParamSpec`] layout.

use ndarray::{s, Array2, Array3, ArrayView3, Axis};
use std::ops::Range;
use thiserror::Error;

use crate::model::{ParamSpec, Transform};

/// Errors raised when looking up or building posterior draws.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PosteriorError {
    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),
    #[error("parameter {name:?} has {size} components, expected a scalar")]
    NotScalar { name: String, size: usize },
    #[error("draws have {actual} components per state, parameters need {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("draw range {start}..{end} is out of bounds for {n_draws} draws")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        n_draws: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    params: Vec<ParamSpec>,
    draws: Array3<f64>,
}

impl Posterior {
    /// Wraps constrained draws of shape `[n_chains, n_draws, dim]`.
    pub fn new(params: Vec<ParamSpec>, draws: Array3<f64>) -> Result<Self, PosteriorError> {
        let expected: usize = params.iter().map(|p| p.size).sum();
        let actual = draws.shape()[2];
        if expected != actual {
            return Err(PosteriorError::ShapeMismatch { expected, actual });
        }
        Ok(Self { params, draws })
    }

    /// Maps draws taken on the unconstrained scale back through each parameter's transform.
    pub fn from_unconstrained(
        params: Vec<ParamSpec>,
        draws: ArrayView3<f64>,
    ) -> Result<Self, PosteriorError> {
        let transforms: Vec<Transform> = params
            .iter()
            .flat_map(|p| std::iter::repeat(p.transform).take(p.size))
            .collect();
        if transforms.len() != draws.shape()[2] {
            return Err(PosteriorError::ShapeMismatch {
                expected: transforms.len(),
                actual: draws.shape()[2],
            });
        }
        let mut constrained = draws.to_owned();
        for (d, mut lane) in constrained.axis_iter_mut(Axis(2)).enumerate() {
            let t = transforms[d];
            lane.mapv_inplace(|u| t.constrain(u));
        }
        Self::new(params, constrained)
    }

    pub fn n_chains(&self) -> usize {
        self.draws.shape()[0]
    }

    pub fn n_draws(&self) -> usize {
        self.draws.shape()[1]
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn draws(&self) -> ArrayView3<'_, f64> {
        self.draws.view()
    }

    /// Column names of every component, e.g. `["alpha", "beta[0]", "beta[1]", "sigma"]`.
    pub fn component_names(&self) -> Vec<String> {
        self.params
            .iter()
            .flat_map(ParamSpec::component_names)
            .collect()
    }

    fn offset(&self, name: &str) -> Result<(usize, &ParamSpec), PosteriorError> {
        let mut offset = 0;
        for p in &self.params {
            if p.name == name {
                return Ok((offset, p));
            }
            offset += p.size;
        }
        Err(PosteriorError::UnknownParameter(name.to_string()))
    }

    /// Draws of the parameter `name`, shape `[n_chains, n_draws, size]`.
    pub fn get(&self, name: &str) -> Result<ArrayView3<'_, f64>, PosteriorError> {
        let (offset, p) = self.offset(name)?;
        Ok(self.draws.slice(s![.., .., offset..offset + p.size]))
    }

    /// Draws of the scalar parameter `name`, shape `[n_chains, n_draws]`.
    pub fn scalar(&self, name: &str) -> Result<Array2<f64>, PosteriorError> {
        let (offset, p) = self.offset(name)?;
        if p.size != 1 {
            return Err(PosteriorError::NotScalar {
                name: name.to_string(),
                size: p.size,
            });
        }
        Ok(self.draws.index_axis(Axis(2), offset).to_owned())
    }

    /// Keeps only the draws in `range` for every chain.
    pub fn select_draws(&self, range: Range<usize>) -> Result<Self, PosteriorError> {
        if range.start > range.end || range.end > self.n_draws() {
            return Err(PosteriorError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                n_draws: self.n_draws(),
            });
        }
        Ok(Self {
            params: self.params.clone(),
            draws: self.draws.slice(s![.., range, ..]).to_owned(),
        })
    }
}
