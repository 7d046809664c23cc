/*!
# Saving Posterior Draws and Bands to CSV

Writers for raw `[chain, draw, dim]` arrays, named posterior draws, and the per-bin
output of [`stratified_bands`](crate::bands::stratified_bands). Enable via the `csv`
feature.
*/

use ndarray::{ArrayView3, Axis};
use std::error::Error;
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::bands::BinBands;
use crate::posterior::Posterior;

fn write_draws<T: Display>(
    data: ArrayView3<T>,
    columns: Vec<String>,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let n_dims = data.shape()[2];
    if columns.len() != n_dims {
        return Err(format!(
            "Expected {n_dims} column names, got {}.",
            columns.len()
        )
        .into());
    }
    let mut wtr = Writer::from_writer(File::create(path)?);

    let mut header = vec!["chain".to_string(), "draw".to_string()];
    header.extend(columns);
    wtr.write_record(&header)?;

    for (chain_idx, chain) in data.axis_iter(Axis(0)).enumerate() {
        for (draw_idx, draw) in chain.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![chain_idx.to_string(), draw_idx.to_string()];
            row.extend(draw.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/**
Saves a `[chain, draw, dim]` array as CSV with header `chain,draw,dim_0,dim_1,...`.

# Examples

```rust
use mini_bayesreg::io::csv::save_csv;
use ndarray::arr3;

let data = arr3(&[[[1, 2, 3, 4], [5, 6, 7, 8]]]);
let file = std::env::temp_dir().join("mini_bayesreg_doc.csv");
save_csv(data.view(), &file)?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv<T: Display, P: AsRef<Path>>(
    data: ArrayView3<T>,
    path: P,
) -> Result<(), Box<dyn Error>> {
    let columns = (0..data.shape()[2]).map(|i| format!("dim_{i}")).collect();
    write_draws(data, columns, path.as_ref())
}

/// Saves posterior draws with header `chain,draw,<component names>`, e.g.
/// `chain,draw,alpha,beta[0],beta[1],sigma`.
pub fn save_posterior_csv<P: AsRef<Path>>(
    posterior: &Posterior,
    path: P,
) -> Result<(), Box<dyn Error>> {
    write_draws(
        posterior.draws(),
        posterior.component_names(),
        path.as_ref(),
    )
}

/// Saves bands as one row per bin and grid point.
pub fn save_bands_csv<P: AsRef<Path>>(bands: &[BinBands], path: P) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(path.as_ref())?);
    wtr.write_record([
        "bin",
        "x1",
        "credible_lower",
        "credible_upper",
        "credible_mean",
        "predictive_lower",
        "predictive_upper",
        "predictive_mean",
    ])?;

    for (b, band) in bands.iter().enumerate() {
        for (g, x1) in band.grid.iter().enumerate() {
            wtr.write_record(&[
                b.to_string(),
                x1.to_string(),
                band.credible.lower[g].to_string(),
                band.credible.upper[g].to_string(),
                band.credible.mean[g].to_string(),
                band.predictive.lower[g].to_string(),
                band.predictive.upper[g].to_string(),
                band.predictive.mean[g].to_string(),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{stratified_bands, BandConfig, LinearDraws};
    use crate::data::Observation;
    use crate::model::ParamSpec;
    use ndarray::{arr3, Array2, Array3};
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_csv() -> Result<(), Box<dyn Error>> {
        let data = arr3(&[[[1.0, 2.0], [3.0, 4.0]], [[10.0, 20.0], [30.0, 40.0]]]);
        let file = NamedTempFile::new()?;
        save_csv(data.view(), file.path())?;

        let contents = fs::read_to_string(file.path())?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "chain,draw,dim_0,dim_1");
        assert_eq!(lines[1], "0,0,1,2");
        assert_eq!(lines[4], "1,1,30,40");
        assert_eq!(lines.len(), 5);
        Ok(())
    }

    #[test]
    fn test_save_posterior_csv_uses_component_names() -> Result<(), Box<dyn Error>> {
        let params = vec![ParamSpec::vector("beta", 2), ParamSpec::positive("sigma")];
        let draws = Array3::from_shape_fn((1, 2, 3), |(_, t, p)| (t * 10 + p) as f64);
        let posterior = Posterior::new(params, draws)?;

        let file = NamedTempFile::new()?;
        save_posterior_csv(&posterior, file.path())?;

        let contents = fs::read_to_string(file.path())?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "chain,draw,beta[0],beta[1],sigma");
        assert_eq!(lines[2], "0,1,10,11,12");
        Ok(())
    }

    #[test]
    fn test_save_bands_csv() -> Result<(), Box<dyn Error>> {
        let observations: Vec<Observation> = (0..5)
            .map(|i| Observation {
                x1: i as f64,
                x2: 0.0,
                y: 0.0,
            })
            .collect();
        let draws = LinearDraws::new(
            Array2::zeros((1, 3)),
            Array3::zeros((1, 3, 2)),
            Array2::zeros((1, 3)),
        );
        let config = BandConfig::default().with_grid_size(3).with_random_seed(0);
        let bands = stratified_bands(&observations, &draws, &config)?;

        let file = NamedTempFile::new()?;
        save_bands_csv(&bands, file.path())?;

        let mut reader = csv::Reader::from_path(file.path())?;
        assert_eq!(
            reader.headers()?.iter().collect::<Vec<_>>(),
            vec![
                "bin",
                "x1",
                "credible_lower",
                "credible_upper",
                "credible_mean",
                "predictive_lower",
                "predictive_upper",
                "predictive_mean"
            ]
        );
        let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 4 * 3);
        assert_eq!(&rows[3][0], "1");
        assert_eq!(&rows[5][1], "4");
        Ok(())
    }

    #[test]
    fn test_wrong_column_count() {
        let data = Array3::<f64>::zeros((1, 1, 2));
        let file = NamedTempFile::new().unwrap();
        assert!(write_draws(data.view(), vec!["a".into()], file.path()).is_err());
    }
}
