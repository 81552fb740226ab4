//! Median stacking of stored 1-D spectra.
//!
//! Combines several rest-frame merged spectra of the same target onto the
//! wavelength grid of the first one. Inputs that do not cover part of that
//! grid contribute zero flux there.

use std::io;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::interp::{Fill, Interp1d, linspace, median};
use crate::io::store::SpectrumProduct;
use crate::spectrum::MergedSpectrum;

/// Errors from loading, combining or writing stacked spectra.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("no spectra to stack")]
    NoInputs,
    #[error("first spectrum is empty, there is no grid to combine onto")]
    EmptyGrid,
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Median-combine spectra onto the wavelength grid of the first one.
///
/// The grid is a linear resampling of the first spectrum's span with the
/// same number of points. Every input is interpolated onto that grid with
/// zero fill outside its own coverage, and the stacked flux at each grid
/// point is the per-point median. Target, instrument and coordinates are
/// carried over from the first input; the error and snr planes of the
/// stack are zeroed.
pub fn median_combine(products: &[SpectrumProduct]) -> Result<SpectrumProduct, StackError> {
    let first = products.first().ok_or(StackError::NoInputs)?;
    let wave = &first.spectrum.wave;
    if wave.is_empty() {
        return Err(StackError::EmptyGrid);
    }
    let grid = linspace(wave[0], wave[wave.len() - 1], wave.len());

    let resampled: Vec<Vec<f64>> = products
        .iter()
        .map(|p| {
            Interp1d::new(&p.spectrum.wave, &p.spectrum.flux, Fill::Value(0.0)).eval_many(&grid)
        })
        .collect();

    let mut flux = Vec::with_capacity(grid.len());
    let mut column = vec![0.0; resampled.len()];
    for k in 0..grid.len() {
        for (row, values) in resampled.iter().enumerate() {
            column[row] = values[k];
        }
        flux.push(median(&column));
    }

    let n = grid.len();
    Ok(SpectrumProduct {
        target: first.target.clone(),
        instrument: first.instrument.clone(),
        ra: first.ra,
        dec: first.dec,
        spectrum: MergedSpectrum {
            wave: grid,
            flux,
            error: vec![0.0; n],
            snr: vec![0.0; n],
        },
    })
}

/// File name of the stacked product for a target.
pub fn stacked_name(target: &str) -> String {
    format!("{target}_1d_stacked.spc")
}

/// Load the given products, median-combine them and write the stack into
/// `out_dir`. Returns the path of the written file.
pub fn stack_files(paths: &[PathBuf], out_dir: &Path) -> Result<PathBuf, StackError> {
    let mut products = Vec::with_capacity(paths.len());
    for path in paths {
        let product = SpectrumProduct::load(path).map_err(|source| StackError::Read {
            path: path.clone(),
            source,
        })?;
        products.push(product);
    }
    let stacked = median_combine(&products)?;
    let out = out_dir.join(stacked_name(&stacked.target));
    stacked.save(&out).map_err(|source| StackError::Write {
        path: out.clone(),
        source,
    })?;
    info!(
        "stacked {} spectra of {} into {}",
        products.len(),
        stacked.target,
        out.display()
    );
    Ok(out)
}
