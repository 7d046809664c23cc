//! Export of posterior draws and bands. Enable via the `csv` feature.

#[cfg(feature = "csv")]
pub mod csv;
