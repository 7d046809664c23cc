//! Posterior statistics and MCMC diagnostics.
//!
//! - [`hdi`]: highest-density interval of an empirical sample.
//! - [`split_rhat_mean_ess`]: split R-hat and multi-chain effective sample size.
//! - [`summary`]: a per-component table of mean, sd, HDI, ESS and R-hat.
//! - [`RhatMulti`]: an online R-hat used while sampling.
//! - [`RunningVariance`]: per-coordinate spread of burn-in states, used to size proposals.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use num_traits::ToPrimitive;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::error::Error;
use std::fmt;

use crate::posterior::Posterior;

/// Number of order statistics an interval of mass `prob` must span in a sample of size `m`,
/// i.e. `ceil(prob * m)`, never less than one.
pub fn mass_count(prob: f64, m: usize) -> usize {
    let exact = prob * m as f64;
    // Guards against 0.95 * 1000 landing a hair above 950.
    let k = (exact - exact.abs() * f64::EPSILON * 4.0).ceil();
    (k.max(1.0) as usize).min(m)
}

/// Highest-density interval: the narrowest interval spanning `ceil(prob * m)` contiguous
/// order statistics of `sample`. Among equally narrow windows the one with the smallest
/// lower bound wins.
///
/// Returns `None` if the sample is empty, contains NaN, or `prob` is not in `(0, 1]`.
///
/// # Examples
///
/// ```rust
/// use mini_bayesreg::stats::hdi;
///
/// let sample = [0.0, 1.0, 1.1, 1.2, 10.0];
/// assert_eq!(hdi(&sample, 0.6), Some((1.0, 1.2)));
/// ```
pub fn hdi(sample: &[f64], prob: f64) -> Option<(f64, f64)> {
    if sample.is_empty() || !(prob > 0.0 && prob <= 1.0) || sample.iter().any(|x| x.is_nan()) {
        return None;
    }
    let mut sorted = sample.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let m = sorted.len();
    let k = mass_count(prob, m);
    let mut best = 0;
    let mut best_width = f64::INFINITY;
    for start in 0..=(m - k) {
        let width = sorted[start + k - 1] - sorted[start];
        if width < best_width {
            best_width = width;
            best = start;
        }
    }
    Some((sorted[best], sorted[best + k - 1]))
}

/// Mean and standard deviation (ddof 1) of a sample. The deviation is zero for one point.
pub fn mean_sd(sample: ArrayView1<f64>) -> Option<(f64, f64)> {
    let mean = sample.mean()?;
    let sd = if sample.len() > 1 { sample.std(1.0) } else { 0.0 };
    Some((mean, sd))
}

/// Fraction of consecutive draws that differ, pooled over chains.
/// Expects `draws` of shape `[n_chains, n_draws, n_params]`.
pub fn acceptance_rate(draws: ArrayView3<f64>) -> f64 {
    let mut moved = 0_usize;
    let mut transitions = 0_usize;
    for chain in draws.axis_iter(Axis(0)) {
        for (prev, next) in chain
            .axis_iter(Axis(0))
            .zip(chain.axis_iter(Axis(0)).skip(1))
        {
            transitions += 1;
            if prev != next {
                moved += 1;
            }
        }
    }
    if transitions == 0 {
        return 0.0;
    }
    moved as f64 / transitions as f64
}

/// Biased autocovariance of `x` for lags `0..n`, computed through a zero-padded FFT.
pub fn autocovariance(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mean = x.sum() / n as f64;
    let n_fft = (2 * n).next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n_fft)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n_fft).process(&mut buffer);
    buffer.iter_mut().for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    planner.plan_fft_inverse(n_fft).process(&mut buffer);

    let scale = (n_fft * n) as f64;
    buffer.iter().take(n).map(|c| c.re / scale).collect()
}

/// Split R-hat and effective sample size for every parameter.
///
/// `draws` has shape `[n_chains, n_draws, n_params]`. Each chain is split in half, so at
/// least four draws per chain are required. R-hat is the classic potential scale reduction
/// factor on the split chains; ESS uses Geyer's initial monotone sequence on
/// FFT autocovariances.
pub fn split_rhat_mean_ess(
    draws: ArrayView3<f64>,
) -> Result<(Array1<f64>, Array1<f64>), Box<dyn Error>> {
    let (n_chains, n_draws, n_params) = draws.dim();
    if n_chains == 0 || n_draws < 4 {
        return Err(format!(
            "Expected at least one chain with four draws, got {n_chains} chains and {n_draws} draws."
        )
        .into());
    }
    let half = n_draws / 2;

    let mut rhat = Array1::<f64>::zeros(n_params);
    let mut ess = Array1::<f64>::zeros(n_params);
    for p in 0..n_params {
        let param = draws.index_axis(Axis(2), p);
        let mut split = Array2::<f64>::zeros((2 * n_chains, half));
        for (c, chain) in param.axis_iter(Axis(0)).enumerate() {
            split
                .row_mut(2 * c)
                .assign(&chain.slice(s![..half]));
            split
                .row_mut(2 * c + 1)
                .assign(&chain.slice(s![n_draws - half..]));
        }
        rhat[p] = potential_scale_reduction(split.view());
        ess[p] = effective_sample_size(split.view());
    }
    Ok((rhat, ess))
}

fn chain_moments(chains: ArrayView2<f64>) -> (f64, f64) {
    let n = chains.ncols() as f64;
    let means = chains.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(0));
    let within = chains
        .axis_iter(Axis(0))
        .zip(means.iter())
        .map(|(c, &m)| c.mapv(|x| (x - m).powi(2)).sum() / (n - 1.0))
        .sum::<f64>()
        / chains.nrows() as f64;
    let between_over_n = if chains.nrows() > 1 { means.var(1.0) } else { 0.0 };
    (within, between_over_n)
}

fn potential_scale_reduction(chains: ArrayView2<f64>) -> f64 {
    let n = chains.ncols() as f64;
    let (within, between_over_n) = chain_moments(chains);
    let var_plus = within * (n - 1.0) / n + between_over_n;
    (var_plus / within).sqrt()
}

fn effective_sample_size(chains: ArrayView2<f64>) -> f64 {
    let (m, n) = chains.dim();
    let acov: Vec<Array1<f64>> = chains.axis_iter(Axis(0)).map(autocovariance).collect();
    let mean_acov = |t: usize| acov.iter().map(|a| a[t]).sum::<f64>() / m as f64;

    let nf = n as f64;
    let chain_means = chains.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(0));
    let mean_var = mean_acov(0) * nf / (nf - 1.0);
    let mut var_plus = mean_var * (nf - 1.0) / nf;
    if m > 1 {
        var_plus += chain_means.var(1.0);
    }
    if var_plus <= 0.0 || !var_plus.is_finite() {
        return f64::NAN;
    }

    let rho = |t: usize| 1.0 - (mean_var - mean_acov(t)) / var_plus;
    let mut rho_hat = vec![0.0; n];
    rho_hat[0] = 1.0;
    let mut rho_even = 1.0;
    let mut rho_odd = rho(1);
    rho_hat[1] = rho_odd;

    let mut t = 1;
    while t + 3 < n && rho_even + rho_odd > 0.0 {
        rho_even = rho(t + 1);
        rho_odd = rho(t + 2);
        if rho_even + rho_odd >= 0.0 {
            rho_hat[t + 1] = rho_even;
            rho_hat[t + 2] = rho_odd;
        }
        t += 2;
    }
    let max_t = if t >= 3 { t - 2 } else { 0 };
    if rho_even > 0.0 {
        rho_hat[max_t + 1] = rho_even;
    }

    // Geyer's initial monotone sequence.
    let mut t = 1;
    while t + 2 <= max_t {
        if rho_hat[t + 1] + rho_hat[t + 2] > rho_hat[t - 1] + rho_hat[t] {
            rho_hat[t + 1] = (rho_hat[t - 1] + rho_hat[t]) / 2.0;
            rho_hat[t + 2] = rho_hat[t + 1];
        }
        t += 2;
    }

    let total = (m * n) as f64;
    let tau = -1.0 + 2.0 * rho_hat[..=max_t].iter().sum::<f64>() + rho_hat[max_t + 1];
    total / tau.max(1.0 / total.log10())
}

/// One row of a posterior [`Summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_lower: f64,
    pub hdi_upper: f64,
    pub ess: f64,
    pub r_hat: f64,
}

/// Per-component posterior summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub hdi_prob: f64,
    pub rows: Vec<SummaryRow>,
}

impl Summary {
    pub fn row(&self, name: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    /// Renders the summary as a fixed-width text table with `round_to` decimals.
    pub fn to_table(&self, round_to: usize) -> String {
        let tail = (1.0 - self.hdi_prob) / 2.0 * 100.0;
        let lower = format!("hdi_{}%", format_pct(tail));
        let upper = format!("hdi_{}%", format_pct(100.0 - tail));
        let name_width = self
            .rows
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut out = format!(
            "{:<name_width$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
            "", "mean", "sd", lower, upper, "ess", "r_hat"
        );
        for r in &self.rows {
            out.push_str(&format!(
                "{:<name_width$} {:>10.p$} {:>10.p$} {:>10.p$} {:>10.p$} {:>10.0} {:>10.p$}\n",
                r.name,
                r.mean,
                r.sd,
                r.hdi_lower,
                r.hdi_upper,
                r.ess,
                r.r_hat,
                p = round_to
            ));
        }
        out
    }
}

fn format_pct(x: f64) -> String {
    let rounded = (x * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_table(2))
    }
}

/// Summarizes every component of `posterior` with an HDI of mass `hdi_prob`.
pub fn summary(posterior: &Posterior, hdi_prob: f64) -> Result<Summary, Box<dyn Error>> {
    if !(hdi_prob > 0.0 && hdi_prob < 1.0) {
        return Err(format!("Expected hdi_prob in (0, 1), got {hdi_prob}.").into());
    }
    let draws = posterior.draws();
    let (rhat, ess) = split_rhat_mean_ess(draws)?;

    let rows = posterior
        .component_names()
        .into_iter()
        .enumerate()
        .map(|(p, name)| -> Result<SummaryRow, Box<dyn Error>> {
            let flat: Vec<f64> = draws.index_axis(Axis(2), p).iter().copied().collect();
            let (mean, sd) = mean_sd(ArrayView1::from(&flat)).ok_or("Empty posterior.")?;
            let (hdi_lower, hdi_upper) =
                hdi(&flat, hdi_prob).ok_or_else(|| format!("No HDI for {name}."))?;
            Ok(SummaryRow {
                name,
                mean,
                sd,
                hdi_lower,
                hdi_upper,
                ess: ess[p],
                r_hat: rhat[p],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Summary { hdi_prob, rows })
}

/// Online potential scale reduction factor, updated one multi-chain draw at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_chains x n_params
    mean_sq: Array2<f64>, // n_chains x n_params
    n_chains: usize,
    n_params: usize,
}

impl RhatMulti {
    pub fn new(n_chains: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::<f64>::zeros((n_chains, n_params)),
            mean_sq: Array2::<f64>::zeros((n_chains, n_params)),
            n_chains,
            n_params,
        }
    }

    /// Adds one draw per chain; `x` is laid out chain-major, `n_chains * n_params` long.
    pub fn step<T>(&mut self, x: &[T]) -> Result<(), Box<dyn Error>>
    where
        T: ToPrimitive + Copy,
    {
        self.n += 1;

        let n = self.n as f64;
        let x_arr = ArrayView2::<T>::from_shape((self.n_chains, self.n_params), x)?
            .mapv(|x| x.to_f64().unwrap_or(f64::NAN));

        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        if self.n == 1 {
            self.mean_sq = x_arr.pow2();
        } else {
            self.mean_sq = (&self.mean_sq * (n - 1.0) + x_arr.pow2()) / n;
        };
        Ok(())
    }

    pub fn all(&self) -> Result<Array1<f64>, Box<dyn Error>> {
        let mean_chain = self
            .mean
            .mean_axis(Axis(0))
            .ok_or("Mean reduction across chains for mean failed.")?;
        let n_chains = self.mean.shape()[0] as f64;
        let n = self.n as f64;
        let fac = n / (n_chains - 1.0);
        let between = (&self.mean - &mean_chain.insert_axis(Axis(0)))
            .pow2()
            .sum_axis(Axis(0))
            * fac;
        let sm2 = (&self.mean_sq - &self.mean.pow2()) * n / (n - 1.0);
        let within = sm2
            .mean_axis(Axis(0))
            .ok_or("Mean reduction across chains for mean of squares failed.")?;
        let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
        Ok((var / within).sqrt())
    }

    pub fn max(&self) -> Result<f64, Box<dyn Error>> {
        let all = self.all()?;
        Ok(*all.max()?)
    }
}

/// Per-coordinate running mean and variance, updated one state at a time (Welford).
#[derive(Debug, Clone, PartialEq)]
pub struct RunningVariance {
    n: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningVariance {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
        }
    }

    /// Number of states pushed so far.
    pub fn count(&self) -> usize {
        self.n
    }

    pub fn push<T>(&mut self, x: &[T])
    where
        T: ToPrimitive + Copy,
    {
        self.n += 1;
        let n = self.n as f64;
        for ((mean, m2), v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let v = v.to_f64().unwrap_or(f64::NAN);
            let delta = v - *mean;
            *mean += delta / n;
            *m2 += delta * (v - *mean);
        }
    }

    /// Sample variance of every coordinate, or `None` before two states were pushed.
    pub fn variance(&self) -> Option<Array1<f64>> {
        if self.n < 2 {
            return None;
        }
        Some(&self.m2 / (self.n - 1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn run_rhat_test(data0: Array2<f64>, data1: Array2<f64>, expected: Array1<f64>, tol: f64) {
        let mut psr = RhatMulti::new(3, 4);
        psr.step(data0.as_slice().unwrap()).unwrap();
        psr.step(data1.as_slice().unwrap()).unwrap();
        let rhat = psr.all().unwrap();
        let diff = *(&rhat - &expected).abs().max().unwrap();
        assert!(
            diff < tol,
            "Mismatch in Rhat. Got {rhat:?}, expected {expected:?}, diff = {diff:?}"
        );
    }

    #[test]
    fn test_rhat_online() {
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // chain 0
            [1.0, 2.0, 0.0, 2.0], // chain 1
            [0.0, 0.0, 0.0, 2.0], // chain 2
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0], // chain 0
            [1.0, 1.0, 1.0, 1.0], // chain 1
            [0.0, 1.0, 0.0, 0.0], // chain 2
        ]);
        let expected = array![std::f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_rhat_online_data() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![std::f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_running_variance() {
        let mut rv = RunningVariance::new(2);
        assert_eq!(rv.variance(), None);
        for x in [[1.0, 10.0], [2.0, 10.0], [3.0, 10.0], [6.0, 10.0]] {
            rv.push(&x[..]);
        }
        assert_eq!(rv.count(), 4);
        // [1, 2, 3, 6] has mean 3 and sum of squared deviations 14.
        let var = rv.variance().unwrap();
        assert_abs_diff_eq!(var[0], 14.0 / 3.0, epsilon = 1e-12);
        assert_eq!(var[1], 0.0);
    }

    #[test]
    fn test_mass_count() {
        assert_eq!(mass_count(0.95, 1000), 950);
        assert_eq!(mass_count(0.95, 100), 95);
        assert_eq!(mass_count(0.5, 3), 2);
        assert_eq!(mass_count(0.01, 10), 1);
        assert_eq!(mass_count(1.0, 7), 7);
    }

    #[test]
    fn test_hdi_skewed() {
        // A long right tail: the HDI hugs the dense left part.
        let sample = [1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.6, 1.7, 5.0, 9.0];
        assert_eq!(hdi(&sample, 0.8), Some((1.0, 1.7)));
    }

    #[test]
    fn test_hdi_tie_takes_lowest_window() {
        let sample = [3.0, 0.0, 1.0, 2.0];
        assert_eq!(hdi(&sample, 0.5), Some((0.0, 1.0)));
    }

    #[test]
    fn test_hdi_invalid() {
        assert_eq!(hdi(&[], 0.9), None);
        assert_eq!(hdi(&[1.0, f64::NAN], 0.9), None);
        assert_eq!(hdi(&[1.0, 2.0], 0.0), None);
        assert_eq!(hdi(&[1.0, 2.0], 1.5), None);
    }

    #[test]
    fn test_hdi_is_narrowest_window() {
        let mut rng = SmallRng::seed_from_u64(7);
        let sample: Vec<f64> = (0..1000)
            .map(|_| rng.sample::<f64, _>(StandardNormal).exp())
            .collect();
        let (lo, hi) = hdi(&sample, 0.95).unwrap();
        let inside = sample.iter().filter(|&&x| lo <= x && x <= hi).count();
        assert!(inside >= 950, "HDI holds only {inside} draws");

        let mut sorted = sample.clone();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));
        let narrowest = (0..=50)
            .map(|i| sorted[i + 949] - sorted[i])
            .fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(hi - lo, narrowest, epsilon = 1e-12);
    }

    #[test]
    fn test_autocovariance_lag_zero_is_variance() {
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let acov = autocovariance(x.view());
        assert_abs_diff_eq!(acov[0], 2.0, epsilon = 1e-12);
        // Lag one: ((-2)(-1) + (-1)(0) + 0(1) + 1(2)) / 5.
        assert_abs_diff_eq!(acov[1], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_iid_diagnostics() {
        let mut rng = SmallRng::seed_from_u64(42);
        let draws = Array3::from_shape_fn((4, 1000, 2), |_| rng.sample::<f64, _>(StandardNormal));
        let (rhat, ess) = split_rhat_mean_ess(draws.view()).unwrap();
        for p in 0..2 {
            assert_abs_diff_eq!(rhat[p], 1.0, epsilon = 0.02);
            assert!(ess[p] > 2500.0, "ESS {} too small for iid draws", ess[p]);
        }
    }

    #[test]
    fn test_stuck_chains_have_large_rhat() {
        let mut rng = SmallRng::seed_from_u64(3);
        let draws = Array3::from_shape_fn((2, 500, 1), |(c, _, _)| {
            c as f64 * 10.0 + rng.sample::<f64, _>(StandardNormal)
        });
        let (rhat, _) = split_rhat_mean_ess(draws.view()).unwrap();
        assert!(rhat[0] > 2.0);
    }

    #[test]
    fn test_autocorrelated_draws_have_small_ess() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut draws = Array3::<f64>::zeros((2, 2000, 1));
        for c in 0..2 {
            let mut x = 0.0;
            for d in 0..2000 {
                x = 0.95 * x + rng.sample::<f64, _>(StandardNormal);
                draws[[c, d, 0]] = x;
            }
        }
        let (_, ess) = split_rhat_mean_ess(draws.view()).unwrap();
        assert!(ess[0] < 800.0, "ESS {} too large for AR(1) draws", ess[0]);
    }

    #[test]
    fn test_too_few_draws() {
        let draws = Array3::<f64>::zeros((2, 3, 1));
        assert!(split_rhat_mean_ess(draws.view()).is_err());
    }

    #[test]
    fn test_acceptance_rate() {
        let draws = array![[[0.0], [0.0], [1.0], [2.0], [2.0]]];
        assert_abs_diff_eq!(acceptance_rate(draws.view()), 0.5);
    }

    #[test]
    fn test_summary_table() {
        use crate::model::ParamSpec;

        let mut rng = SmallRng::seed_from_u64(8);
        let draws = Array3::from_shape_fn((4, 500, 3), |(_, _, p)| {
            p as f64 + rng.sample::<f64, _>(StandardNormal)
        });
        let params = vec![ParamSpec::scalar("alpha"), ParamSpec::vector("beta", 2)];
        let posterior = Posterior::new(params, draws).unwrap();

        let table_rows = summary(&posterior, 0.94).unwrap();
        assert_eq!(table_rows.rows.len(), 3);
        let beta1 = table_rows.row("beta[1]").unwrap();
        assert_abs_diff_eq!(beta1.mean, 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(beta1.sd, 1.0, epsilon = 0.1);
        assert!(beta1.hdi_lower < 2.0 && beta1.hdi_upper > 2.0);

        let table = table_rows.to_table(2);
        let header = table.lines().next().unwrap();
        for column in ["mean", "sd", "hdi_3%", "hdi_97%", "ess", "r_hat"] {
            assert!(header.contains(column), "missing {column} in {header}");
        }
        assert!(table.lines().nth(1).unwrap().starts_with("alpha"));
        assert!(summary(&posterior, 1.5).is_err());
    }

    #[test]
    fn test_format_pct() {
        assert_eq!(format_pct(3.0000000000000027), "3");
        assert_eq!(format_pct(2.5), "2.5");
    }
}
