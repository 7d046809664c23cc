/*!
Declarative regression models.

A [`Model`] names its parameters ([`ParamSpec`]), evaluates the joint log density of
priors and likelihood at constrained parameter values, and describes itself as a
[`ModelGraph`]. [`ModelTarget`] adapts a model to the sampler: it works on the
unconstrained scale (positive parameters are sampled as their logarithm) and adds the
log-Jacobian of the transform.

# Examples

```rust
use mini_bayesreg::data::LinearSimulation;
use mini_bayesreg::model::{LinearModel, Model};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let obs = LinearSimulation::default()
    .simulate(&mut SmallRng::seed_from_u64(8927))
    .unwrap();
let model = LinearModel::new(&obs);
assert_eq!(model.dim(), 4);
assert!(model.graph().to_dot().contains("alpha -> y"));
```
*/

use std::fmt;

use crate::data::{BinomialData, LineData, Observation};
use crate::distributions::{binomial_logit_lpmf, normal_lpdf, Prior, Target};

/// Map between a parameter's constrained value and the scale the sampler moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Positive parameter sampled as its logarithm.
    Log,
}

impl Transform {
    pub fn constrain(self, u: f64) -> f64 {
        match self {
            Transform::Identity => u,
            Transform::Log => u.exp(),
        }
    }

    pub fn unconstrain(self, x: f64) -> f64 {
        match self {
            Transform::Identity => x,
            Transform::Log => x.ln(),
        }
    }

    /// `log |d constrain(u) / du|`.
    pub fn log_jacobian(self, u: f64) -> f64 {
        match self {
            Transform::Identity => 0.0,
            Transform::Log => u,
        }
    }
}

/// A named block of `size` consecutive components in a parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub size: usize,
    pub transform: Transform,
}

impl ParamSpec {
    pub fn scalar(name: &'static str) -> Self {
        Self {
            name,
            size: 1,
            transform: Transform::Identity,
        }
    }

    pub fn vector(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size,
            transform: Transform::Identity,
        }
    }

    pub fn positive(name: &'static str) -> Self {
        Self {
            name,
            size: 1,
            transform: Transform::Log,
        }
    }

    /// A block whose transform follows the support of `prior`.
    pub fn from_prior(name: &'static str, size: usize, prior: &Prior) -> Self {
        let transform = if prior.is_positive() {
            Transform::Log
        } else {
            Transform::Identity
        };
        Self {
            name,
            size,
            transform,
        }
    }

    /// Column names of this block: `name` for scalars, `name[i]` otherwise.
    pub fn component_names(&self) -> Vec<String> {
        if self.size == 1 {
            vec![self.name.to_string()]
        } else {
            (0..self.size).map(|i| format!("{}[{i}]", self.name)).collect()
        }
    }
}

/// A node of a model's dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: &'static str,
    /// Human-readable distribution, e.g. `Normal(mu=0, sigma=10)`, or `Deterministic`.
    pub distribution: String,
    pub size: usize,
    pub parents: Vec<&'static str>,
    pub observed: bool,
}

/// The dependency structure of a model: free parameters, deterministic quantities and
/// observed variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelGraph {
    pub nodes: Vec<Node>,
}

impl ModelGraph {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Renders the graph in Graphviz DOT format. Observed nodes are filled grey,
    /// deterministic nodes are boxes.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph model {\n");
        for node in &self.nodes {
            let shape = if node.distribution == "Deterministic" {
                "box"
            } else {
                "ellipse"
            };
            let size = if node.size > 1 {
                format!(" ({})", node.size)
            } else {
                String::new()
            };
            let fill = if node.observed {
                ", style=filled, fillcolor=gray"
            } else {
                ""
            };
            out.push_str(&format!(
                "    {} [label=\"{}{}\\n~\\n{}\", shape={}{}];\n",
                node.name, node.name, size, node.distribution, shape, fill
            ));
        }
        for node in &self.nodes {
            for parent in &node.parents {
                out.push_str(&format!("    {} -> {};\n", parent, node.name));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for ModelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dot())
    }
}

fn prior_node(name: &'static str, prior: &Prior, size: usize) -> Node {
    Node {
        name,
        distribution: prior.to_string(),
        size,
        parents: vec![],
        observed: false,
    }
}

fn deterministic_node(name: &'static str, size: usize, parents: Vec<&'static str>) -> Node {
    Node {
        name,
        distribution: "Deterministic".to_string(),
        size,
        parents,
        observed: false,
    }
}

pub trait Model {
    /// Parameter blocks, in the order they appear in a parameter vector.
    fn params(&self) -> Vec<ParamSpec>;

    /// Joint log density of priors and likelihood at constrained parameter values.
    fn log_density(&self, theta: &[f64]) -> f64;

    fn graph(&self) -> ModelGraph;

    /// Total number of scalar components.
    fn dim(&self) -> usize {
        self.params().iter().map(|p| p.size).sum()
    }

    /// Starting point on the unconstrained scale.
    fn initial_point(&self) -> Vec<f64> {
        vec![0.0; self.dim()]
    }
}

/// A [`Model`] seen by the sampler: unconstrained state, log-Jacobian included.
#[derive(Debug, Clone)]
pub struct ModelTarget<M> {
    pub model: M,
    transforms: Vec<Transform>,
}

impl<M: Model> ModelTarget<M> {
    pub fn new(model: M) -> Self {
        let transforms = model
            .params()
            .iter()
            .flat_map(|p| std::iter::repeat(p.transform).take(p.size))
            .collect();
        Self { model, transforms }
    }

    /// Maps an unconstrained state to constrained parameter values.
    pub fn constrain(&self, u: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(u)
            .map(|(t, &x)| t.constrain(x))
            .collect()
    }
}

impl<M: Model> Target<f64> for ModelTarget<M> {
    fn unnorm_log_prob(&self, u: &[f64]) -> f64 {
        let theta = self.constrain(u);
        let log_jac: f64 = self
            .transforms
            .iter()
            .zip(u)
            .map(|(t, &x)| t.log_jacobian(x))
            .sum();
        let lp = self.model.log_density(&theta) + log_jac;
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}

/// `y ~ Normal(alpha + beta[0] * x1 + beta[1] * x2, sigma)`.
///
/// Parameter layout: `[alpha, beta[0], beta[1], sigma]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub observations: Vec<Observation>,
    pub alpha_prior: Prior,
    pub beta_prior: Prior,
    pub sigma_prior: Prior,
}

impl LinearModel {
    /// The model with priors `alpha ~ N(0, 10)`, `beta ~ N(0, 10)`, `sigma ~ HalfNormal(1)`.
    pub fn new(observations: &[Observation]) -> Self {
        Self {
            observations: observations.to_vec(),
            alpha_prior: Prior::Normal {
                mu: 0.0,
                sigma: 10.0,
            },
            beta_prior: Prior::Normal {
                mu: 0.0,
                sigma: 10.0,
            },
            sigma_prior: Prior::HalfNormal { sigma: 1.0 },
        }
    }
}

impl Model for LinearModel {
    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::from_prior("alpha", 1, &self.alpha_prior),
            ParamSpec::from_prior("beta", 2, &self.beta_prior),
            ParamSpec::from_prior("sigma", 1, &self.sigma_prior),
        ]
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        let (alpha, beta, sigma) = (theta[0], [theta[1], theta[2]], theta[3]);
        let prior = self.alpha_prior.log_prob(alpha)
            + self.beta_prior.log_prob(beta[0])
            + self.beta_prior.log_prob(beta[1])
            + self.sigma_prior.log_prob(sigma);
        if !prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let likelihood: f64 = self
            .observations
            .iter()
            .map(|o| normal_lpdf(o.y, alpha + beta[0] * o.x1 + beta[1] * o.x2, sigma))
            .sum();
        prior + likelihood
    }

    fn graph(&self) -> ModelGraph {
        ModelGraph {
            nodes: vec![
                prior_node("alpha", &self.alpha_prior, 1),
                prior_node("beta", &self.beta_prior, 2),
                prior_node("sigma", &self.sigma_prior, 1),
                Node {
                    name: "y",
                    distribution: "Normal".to_string(),
                    size: self.observations.len(),
                    parents: vec!["alpha", "beta", "sigma"],
                    observed: true,
                },
            ],
        }
    }
}

/// `y ~ Normal(intercept + slope * x, sigma)` with a heavy-tailed prior on `sigma`.
///
/// Parameter layout: `[intercept, slope, sigma]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineModel {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub intercept_prior: Prior,
    pub slope_prior: Prior,
    pub sigma_prior: Prior,
}

impl LineModel {
    /// The model with priors `intercept ~ N(0, 1)`, `slope ~ N(0, 1)`,
    /// `sigma ~ HalfCauchy(10)`.
    pub fn new(data: &LineData) -> Self {
        Self {
            x: data.x.clone(),
            y: data.y.clone(),
            intercept_prior: Prior::Normal {
                mu: 0.0,
                sigma: 1.0,
            },
            slope_prior: Prior::Normal {
                mu: 0.0,
                sigma: 1.0,
            },
            sigma_prior: Prior::HalfCauchy { beta: 10.0 },
        }
    }

    /// The deterministic `mu = intercept + slope * x` at every observation.
    pub fn mu(&self, intercept: f64, slope: f64) -> Vec<f64> {
        self.x.iter().map(|&x| intercept + slope * x).collect()
    }
}

impl Model for LineModel {
    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::from_prior("intercept", 1, &self.intercept_prior),
            ParamSpec::from_prior("slope", 1, &self.slope_prior),
            ParamSpec::from_prior("sigma", 1, &self.sigma_prior),
        ]
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        let (intercept, slope, sigma) = (theta[0], theta[1], theta[2]);
        let prior = self.intercept_prior.log_prob(intercept)
            + self.slope_prior.log_prob(slope)
            + self.sigma_prior.log_prob(sigma);
        if !prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let likelihood: f64 = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(&x, &y)| normal_lpdf(y, intercept + slope * x, sigma))
            .sum();
        prior + likelihood
    }

    fn graph(&self) -> ModelGraph {
        let n = self.x.len();
        ModelGraph {
            nodes: vec![
                prior_node("intercept", &self.intercept_prior, 1),
                prior_node("slope", &self.slope_prior, 1),
                prior_node("sigma", &self.sigma_prior, 1),
                deterministic_node("mu", n, vec!["intercept", "slope"]),
                Node {
                    name: "y",
                    distribution: "Normal".to_string(),
                    size: n,
                    parents: vec!["mu", "sigma"],
                    observed: true,
                },
            ],
        }
    }
}

/// `y ~ Binomial(n_trials, inv_logit(beta0 + beta1 * x))`.
///
/// Parameter layout: `[beta0, beta1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinomialModel {
    pub x: Vec<f64>,
    pub y: Vec<u64>,
    pub n_trials: u64,
    pub beta0_prior: Prior,
    pub beta1_prior: Prior,
}

impl BinomialModel {
    /// The model with priors `beta0 ~ N(0, 1)`, `beta1 ~ N(0, 1)`.
    pub fn new(data: &BinomialData) -> Self {
        Self {
            x: data.x.clone(),
            y: data.y.clone(),
            n_trials: data.n_trials,
            beta0_prior: Prior::Normal {
                mu: 0.0,
                sigma: 1.0,
            },
            beta1_prior: Prior::Normal {
                mu: 0.0,
                sigma: 1.0,
            },
        }
    }
}

impl Model for BinomialModel {
    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::from_prior("beta0", 1, &self.beta0_prior),
            ParamSpec::from_prior("beta1", 1, &self.beta1_prior),
        ]
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        let (beta0, beta1) = (theta[0], theta[1]);
        let prior = self.beta0_prior.log_prob(beta0) + self.beta1_prior.log_prob(beta1);
        let likelihood: f64 = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(&x, &k)| binomial_logit_lpmf(k, self.n_trials, beta0 + beta1 * x))
            .sum();
        prior + likelihood
    }

    fn graph(&self) -> ModelGraph {
        let n = self.x.len();
        ModelGraph {
            nodes: vec![
                prior_node("beta0", &self.beta0_prior, 1),
                prior_node("beta1", &self.beta1_prior, 1),
                deterministic_node("p", n, vec!["beta0", "beta1"]),
                Node {
                    name: "y",
                    distribution: format!("Binomial(n={})", self.n_trials),
                    size: n,
                    parents: vec!["p"],
                    observed: true,
                },
            ],
        }
    }
}
