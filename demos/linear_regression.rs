//! Two-covariate linear regression: simulate data, sample the posterior, summarize it, and
//! plot credible and predictive bands of `y` against `x1` for four slices of `x2`.

use mini_bayesreg::bands::{stratified_bands, BandConfig, BinBands, LinearDraws};
use mini_bayesreg::data::LinearSimulation;
use mini_bayesreg::model::{LinearModel, Model};
use mini_bayesreg::posterior::Posterior;
use mini_bayesreg::sampler::{sample, unconverged, SampleConfig};
use mini_bayesreg::stats::{acceptance_rate, summary};

use plotly::common::{color::Rgba, Fill, Line, Marker, Mode};
use plotly::layout::{GridPattern, LayoutGrid};
use plotly::{Layout, Plot, Scatter};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;
use std::time::Instant;

#[cfg(feature = "csv")]
use mini_bayesreg::io::csv::{save_bands_csv, save_posterior_csv};

const SEED: u64 = 8927;

/// One trace per chain for every posterior component, stacked vertically.
fn plot_traces(posterior: &Posterior, filename: &str) -> Result<(), Box<dyn Error>> {
    let names = posterior.component_names();
    let draws = posterior.draws();
    let mut plot = Plot::new();
    for (p, name) in names.iter().enumerate() {
        for c in 0..posterior.n_chains() {
            let ys: Vec<f64> = (0..posterior.n_draws()).map(|t| draws[[c, t, p]]).collect();
            let trace = Scatter::new((0..ys.len()).collect::<Vec<_>>(), ys)
                .mode(Mode::Lines)
                .line(Line::new().width(1.0))
                .name(format!("{name}, chain {c}"))
                .x_axis(&format!("x{}", p + 1))
                .y_axis(&format!("y{}", p + 1));
            plot.add_trace(trace);
        }
    }
    let layout = Layout::new()
        .width(1000)
        .height(250 * names.len())
        .title("Posterior traces")
        .grid(
            LayoutGrid::new()
                .rows(names.len())
                .columns(1)
                .pattern(GridPattern::Independent),
        );
    plot.set_layout(layout);
    plot.write_html(filename);
    println!("Saved trace plot to {filename}");
    Ok(())
}

/// A 2x2 grid with one panel per bin: observed points, credible band and predictive band.
fn plot_bands(bands: &[BinBands], filename: &str) -> Result<(), Box<dyn Error>> {
    let mut plot = Plot::new();
    for (b, band) in bands.iter().enumerate() {
        let (xa, ya) = (format!("x{}", b + 1), format!("y{}", b + 1));
        let grid = band.grid.to_vec();
        let label = band.bin.label(2);

        let shaded = [
            ("predictive", &band.predictive, Rgba::new(78, 121, 167, 0.2)),
            ("credible", &band.credible, Rgba::new(242, 142, 43, 0.4)),
        ];
        for (kind, interval, color) in shaded {
            plot.add_trace(
                Scatter::new(grid.clone(), interval.upper.to_vec())
                    .mode(Mode::Lines)
                    .line(Line::new().width(0.0))
                    .show_legend(false)
                    .x_axis(&xa)
                    .y_axis(&ya),
            );
            plot.add_trace(
                Scatter::new(grid.clone(), interval.lower.to_vec())
                    .mode(Mode::Lines)
                    .line(Line::new().width(0.0))
                    .fill(Fill::ToNextY)
                    .fill_color(color)
                    .name(format!("{kind} ({label})"))
                    .x_axis(&xa)
                    .y_axis(&ya),
            );
        }
        plot.add_trace(
            Scatter::new(grid.clone(), band.credible.mean.to_vec())
                .mode(Mode::Lines)
                .line(Line::new().color(Rgba::new(225, 87, 89, 1.0)))
                .name(format!("mean ({label})"))
                .x_axis(&xa)
                .y_axis(&ya),
        );
        let (xs, ys): (Vec<f64>, Vec<f64>) = band.scatter.iter().copied().unzip();
        plot.add_trace(
            Scatter::new(xs, ys)
                .mode(Mode::Markers)
                .marker(Marker::new().color(Rgba::new(0, 0, 0, 0.7)).size(5))
                .name(format!("observed ({label})"))
                .x_axis(&xa)
                .y_axis(&ya),
        );
    }
    let layout = Layout::new()
        .width(1200)
        .height(900)
        .title("y against x1 at fixed x2")
        .grid(
            LayoutGrid::new()
                .rows(2)
                .columns(bands.len().div_ceil(2))
                .pattern(GridPattern::Independent),
        );
    plot.set_layout(layout);
    plot.write_html(filename);
    println!("Saved band plot to {filename}");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let observations = LinearSimulation::default().simulate(&mut rng)?;
    println!("First observations (x1, x2, y):");
    for o in observations.iter().take(5) {
        println!("  ({:.3}, {:.3}, {:.3})", o.x1, o.x2, o.y);
    }

    let model = LinearModel::new(&observations);
    println!("\nModel graph (Graphviz DOT):\n{}", model.graph());

    let config = SampleConfig::default().set_seed(SEED).with_progress(true);
    let start = Instant::now();
    let posterior = sample(&model, &config)?;
    println!(
        "Sampling {} chains x {} draws took {:?}",
        posterior.n_chains(),
        posterior.n_draws(),
        start.elapsed()
    );

    println!("\n{}", summary(&posterior, 0.94)?.to_table(2));
    println!("Acceptance rate: {:.3}", acceptance_rate(posterior.draws()));
    for (name, r_hat) in unconverged(&posterior.component_names(), posterior.draws())? {
        println!("Warning: R-hat of {name} is {r_hat:.3}; the chains may not have converged.");
    }
    println!(
        "First five draws of chain 0:\n{:.3}",
        posterior.select_draws(0..5)?.draws().index_axis(ndarray::Axis(0), 0)
    );
    plot_traces(&posterior, "linear_traces.html")?;

    let draws = LinearDraws::from_posterior(&posterior, "alpha", "beta", "sigma")?;
    let bands = stratified_bands(
        &observations,
        &draws,
        &BandConfig::default().with_random_seed(SEED),
    )?;
    for band in &bands {
        println!(
            "{:>18}: {:>3} observations, x2_rep = {:+.2}",
            band.bin.to_string(),
            band.scatter.len(),
            band.bin.representative
        );
    }
    plot_bands(&bands, "linear_bands.html")?;

    #[cfg(feature = "csv")]
    {
        save_posterior_csv(&posterior, "linear_posterior.csv")?;
        save_bands_csv(&bands, "linear_bands.csv")?;
        println!("Saved draws and bands to linear_posterior.csv and linear_bands.csv");
    }

    Ok(())
}
