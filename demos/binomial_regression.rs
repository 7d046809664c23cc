//! Logistic regression on binomial counts: recover the coefficients and compare the
//! posterior success probability with the one the data came from.

use mini_bayesreg::data::BinomialSimulation;
use mini_bayesreg::distributions::inv_logit;
use mini_bayesreg::model::{BinomialModel, Model};
use mini_bayesreg::sampler::{sample, unconverged, SampleConfig};
use mini_bayesreg::stats::{acceptance_rate, hdi, summary};

use plotly::common::{color::Rgba, Fill, Line, Marker, Mode};
use plotly::{Layout, Plot, Scatter};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;

const SEED: u64 = 1234;

fn main() -> Result<(), Box<dyn Error>> {
    let sim = BinomialSimulation::default();
    let data = sim.simulate(&mut SmallRng::seed_from_u64(SEED))?;
    let model = BinomialModel::new(&data);
    println!("Model graph (Graphviz DOT):\n{}", model.graph());

    let posterior = sample(&model, &SampleConfig::default().set_seed(SEED).with_progress(true))?;
    let table = summary(&posterior, 0.94)?;
    println!("\n{}", table.to_table(3));
    println!("Acceptance rate: {:.3}", acceptance_rate(posterior.draws()));
    for (name, r_hat) in unconverged(&posterior.component_names(), posterior.draws())? {
        println!("Warning: R-hat of {name} is {r_hat:.3}; the chains may not have converged.");
    }
    println!(
        "True coefficients: beta0 = {}, beta1 = {}",
        sim.beta0, sim.beta1
    );

    let beta0: Vec<f64> = posterior.scalar("beta0")?.iter().copied().collect();
    let beta1: Vec<f64> = posterior.scalar("beta1")?.iter().copied().collect();

    let mut lower = Vec::with_capacity(data.x.len());
    let mut upper = Vec::with_capacity(data.x.len());
    let mut mean = Vec::with_capacity(data.x.len());
    for &x in &data.x {
        let p: Vec<f64> = beta0
            .iter()
            .zip(&beta1)
            .map(|(b0, b1)| inv_logit(b0 + b1 * x))
            .collect();
        let (lo, hi) = hdi(&p, 0.94).ok_or("Expected finite posterior draws.")?;
        lower.push(lo);
        upper.push(hi);
        mean.push(p.iter().sum::<f64>() / p.len() as f64);
    }

    let observed: Vec<f64> = data
        .y
        .iter()
        .map(|&k| k as f64 / data.n_trials as f64)
        .collect();

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(data.x.clone(), upper)
            .mode(Mode::Lines)
            .line(Line::new().width(0.0))
            .show_legend(false),
    );
    plot.add_trace(
        Scatter::new(data.x.clone(), lower)
            .mode(Mode::Lines)
            .line(Line::new().width(0.0))
            .fill(Fill::ToNextY)
            .fill_color(Rgba::new(242, 142, 43, 0.4))
            .name("94% HDI of p"),
    );
    plot.add_trace(
        Scatter::new(data.x.clone(), mean)
            .mode(Mode::Lines)
            .line(Line::new().color(Rgba::new(225, 87, 89, 1.0)))
            .name("Posterior mean p"),
    );
    plot.add_trace(
        Scatter::new(data.x.clone(), data.p_true.clone())
            .mode(Mode::Lines)
            .line(Line::new().color(Rgba::new(89, 161, 79, 1.0)).width(2.0))
            .name("True p"),
    );
    plot.add_trace(
        Scatter::new(data.x.clone(), observed)
            .mode(Mode::Markers)
            .marker(Marker::new().color(Rgba::new(78, 121, 167, 0.8)).size(6))
            .name("Observed fraction"),
    );
    plot.set_layout(
        Layout::new()
            .width(1000)
            .height(700)
            .title("Binomial regression"),
    );
    plot.write_html("binomial_regression.html");
    println!("Saved plot to binomial_regression.html");

    Ok(())
}
