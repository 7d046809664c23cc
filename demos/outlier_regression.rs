//! Straight-line regression on data with a few gross outliers. The heavy-tailed prior on the
//! noise scale lets the model absorb them with a wide `sigma` instead of bending the line.

use mini_bayesreg::data::{linspace, OutlierSimulation};
use mini_bayesreg::model::{LineModel, Model};
use mini_bayesreg::sampler::{sample, unconverged, SampleConfig};
use mini_bayesreg::stats::{acceptance_rate, hdi, summary};

use plotly::common::{color::Rgba, Fill, Line, Marker, Mode};
use plotly::{Layout, Plot, Scatter};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;

const SEED: u64 = 8927;

fn main() -> Result<(), Box<dyn Error>> {
    let data = OutlierSimulation::default().simulate(&mut SmallRng::seed_from_u64(SEED))?;
    let model = LineModel::new(&data);
    println!("Model graph (Graphviz DOT):\n{}", model.graph());

    let posterior = sample(&model, &SampleConfig::default().set_seed(SEED).with_progress(true))?;
    println!("\n{}", summary(&posterior, 0.94)?.to_table(2));
    println!("Acceptance rate: {:.3}", acceptance_rate(posterior.draws()));
    for (name, r_hat) in unconverged(&posterior.component_names(), posterior.draws())? {
        println!("Warning: R-hat of {name} is {r_hat:.3}; the chains may not have converged.");
    }

    let intercept: Vec<f64> = posterior.scalar("intercept")?.iter().copied().collect();
    let slope: Vec<f64> = posterior.scalar("slope")?.iter().copied().collect();

    let x_grid = linspace(0.0, 1.0, 50);
    let mut lower = Vec::with_capacity(x_grid.len());
    let mut upper = Vec::with_capacity(x_grid.len());
    let mut mean = Vec::with_capacity(x_grid.len());
    for &x in &x_grid {
        let mu: Vec<f64> = intercept.iter().zip(&slope).map(|(a, b)| a + b * x).collect();
        let (lo, hi) = hdi(&mu, 0.94).ok_or("Expected finite posterior draws.")?;
        lower.push(lo);
        upper.push(hi);
        mean.push(mu.iter().sum::<f64>() / mu.len() as f64);
    }

    let n_regular = data.true_line.len();
    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(x_grid.clone(), upper)
            .mode(Mode::Lines)
            .line(Line::new().width(0.0))
            .show_legend(false),
    );
    plot.add_trace(
        Scatter::new(x_grid.clone(), lower)
            .mode(Mode::Lines)
            .line(Line::new().width(0.0))
            .fill(Fill::ToNextY)
            .fill_color(Rgba::new(242, 142, 43, 0.4))
            .name("94% HDI of mu"),
    );
    plot.add_trace(
        Scatter::new(x_grid, mean)
            .mode(Mode::Lines)
            .line(Line::new().color(Rgba::new(225, 87, 89, 1.0)))
            .name("Posterior mean line"),
    );
    plot.add_trace(
        Scatter::new(data.x[..n_regular].to_vec(), data.true_line.clone())
            .mode(Mode::Lines)
            .line(Line::new().color(Rgba::new(89, 161, 79, 1.0)).width(2.0))
            .name("True line"),
    );
    plot.add_trace(
        Scatter::new(data.x.clone(), data.y.clone())
            .mode(Mode::Markers)
            .marker(Marker::new().color(Rgba::new(78, 121, 167, 0.7)).size(5))
            .name("Observed"),
    );
    plot.set_layout(
        Layout::new()
            .width(1000)
            .height(700)
            .title("Line fit with outliers"),
    );
    plot.write_html("outlier_regression.html");
    println!("Saved plot to outlier_regression.html");

    Ok(())
}
