//! Rest-frame correction from a cross-correlation velocity fit.
//!
//! Every order except the reddest is cross-correlated against a binary
//! line mask on a shared velocity grid. The per-order functions are
//! combined by an element-wise median, which suppresses orders whose
//! lines are weak or contaminated, and a Gaussian fit to the combined
//! dip gives the radial velocity. Dividing all wavelengths by the
//! Doppler factor `1 + v/c` then puts the spectrum at rest.

use log::warn;
use thiserror::Error;

use crate::crosscorr::{Ccf, CcfParams, FitError, ccf, fit_gaussian};
use crate::interp::median;
use crate::masks::LineMask;
use crate::spectrum::EchelleSpectrum;

/// Speed of light in m/s, for the Doppler factor.
const C_M_S: f64 = 299_792_458.0;

#[derive(Debug, Error)]
pub enum RestFrameError {
    /// Every order produced a flat cross-correlation function.
    #[error("no order yielded a usable cross-correlation function")]
    EmptyCcfStack,
    #[error(transparent)]
    Fit(#[from] FitError),
}

/// Measure the radial velocity and shift the spectrum to rest.
///
/// Returns the corrected spectrum and the fitted velocity in km/s.
pub fn to_rest_frame(
    spec: &EchelleSpectrum,
    mask: &LineMask,
    params: &CcfParams,
) -> Result<(EchelleSpectrum, f64), RestFrameError> {
    let rv = measure_rv(spec, mask, params)?;
    Ok((apply_shift(spec, rv), rv))
}

/// Fit the stacked cross-correlation dip and return its center in km/s.
///
/// The reddest order stays out of the stack. Orders whose correlation
/// comes back flat (no mask lines in range) are dropped with a warning;
/// if none survive the fit cannot run.
pub fn measure_rv(
    spec: &EchelleSpectrum,
    mask: &LineMask,
    params: &CcfParams,
) -> Result<f64, RestFrameError> {
    let mut stack: Vec<Ccf> = Vec::new();
    for o in (1..spec.orders()).rev() {
        let cc = ccf(spec.order_wave(o), spec.order_flux(o), mask, params);
        if cc.is_degenerate() {
            warn!("order {o}: flat cross-correlation, dropping it from the velocity fit");
            continue;
        }
        stack.push(cc);
    }
    if stack.is_empty() {
        return Err(RestFrameError::EmptyCcfStack);
    }

    let grid = &stack[0].rv;
    let mut combined = Vec::with_capacity(grid.len());
    let mut column = vec![0.0; stack.len()];
    for k in 0..grid.len() {
        for (i, cc) in stack.iter().enumerate() {
            column[i] = cc.power[k];
        }
        combined.push(median(&column));
    }

    let fit = fit_gaussian(grid, &combined)?;
    Ok(fit.center)
}

/// Divide every wavelength by the Doppler factor for `rv_kms`.
pub fn apply_shift(spec: &EchelleSpectrum, rv_kms: f64) -> EchelleSpectrum {
    let gamma = 1.0 + rv_kms * 1000.0 / C_M_S;
    let mut out = spec.clone();
    out.wave.mapv_inplace(|w| w / gamma);
    out
}
