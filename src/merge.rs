//! Echelle order merging at signal-to-noise crossover points.
//!
//! Adjacent echelle orders overlap in wavelength, and within an overlap
//! each order measures the same region with a different signal-to-noise.
//! The merge walks the orders from blue to red, finds the wavelength in
//! each overlap where the two signal-to-noise curves cross, and hands
//! coverage from one order to the next there. Every output pixel keeps
//! its native wavelength; only the choice of source order changes.

use thiserror::Error;

use crate::interp::{Fill, Interp1d, argmin, linspace, nearest_index};
use crate::spectrum::{EchelleSpectrum, MergedSpectrum};

/// Tolerance when matching the crossover wavelength back to a native pixel.
const CROSSOVER_TOL: f64 = 0.1;

/// Sample count of the grid the signal-to-noise curves are compared on.
const OVERLAP_SAMPLES: usize = 1000;

/// Errors from order merging.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot merge a spectrum with no orders")]
    Empty,
}

/// Merge all orders into a single one-dimensional spectrum.
///
/// Orders are consumed blue to red. Each order contributes the pixels
/// between its crossover with the previous order and its crossover with
/// the next; the bluest and reddest orders contribute their free ends.
/// Non-overlapping neighbors are concatenated whole. The result is
/// strictly increasing in wavelength.
pub fn merge_orders(spec: &EchelleSpectrum) -> Result<MergedSpectrum, MergeError> {
    let nord = spec.orders();
    if nord == 0 {
        return Err(MergeError::Empty);
    }
    let mut out = MergedSpectrum::default();
    let mut next_start = 0usize;
    // Orders are stored red first, so walking indices downward goes blue
    // to red and the output builds up in ascending wavelength.
    for i in (1..nord).rev() {
        let wave_cur = spec.order_wave(i);
        let wave_next = spec.order_wave(i - 1);
        let (cur_end, start) = match crossover(
            wave_cur,
            spec.order_snr(i),
            wave_next,
            spec.order_snr(i - 1),
        ) {
            Some(w) => (pixel_near(wave_cur, w), pixel_near(wave_next, w)),
            // No overlap: keep the current order whole and the next one
            // from its first pixel.
            None => (wave_cur.len(), 0),
        };
        append_range(&mut out, spec, i, next_start, cur_end);
        next_start = start;
    }
    append_range(&mut out, spec, 0, next_start, spec.pixels());
    Ok(strictly_increasing(out))
}

/// Wavelength where the two orders' signal-to-noise curves are closest,
/// or `None` when they do not overlap.
fn crossover(
    wave_cur: &[f64],
    snr_cur: &[f64],
    wave_next: &[f64],
    snr_next: &[f64],
) -> Option<f64> {
    let (&cur_last, &next_first) = (wave_cur.last()?, wave_next.first()?);
    if next_first > cur_last {
        return None;
    }
    let grid = linspace(next_first, cur_last, OVERLAP_SAMPLES);
    let cur = Interp1d::new(wave_cur, snr_cur, Fill::Clamp);
    let next = Interp1d::new(wave_next, snr_next, Fill::Clamp);
    let gap: Vec<f64> = grid
        .iter()
        .map(|&w| (cur.eval(w) - next.eval(w)).abs())
        .collect();
    argmin(&gap).map(|k| grid[k])
}

/// First pixel within [`CROSSOVER_TOL`] of `w`, falling back to the
/// nearest pixel when no native sample lands that close.
fn pixel_near(wave: &[f64], w: f64) -> usize {
    let lo = wave.partition_point(|&x| x < w - CROSSOVER_TOL);
    if lo < wave.len() && (wave[lo] - w).abs() < CROSSOVER_TOL {
        return lo;
    }
    nearest_index(wave, w)
}

fn append_range(
    out: &mut MergedSpectrum,
    spec: &EchelleSpectrum,
    order: usize,
    start: usize,
    end: usize,
) {
    let end = end.min(spec.pixels());
    if start >= end {
        return;
    }
    out.wave.extend_from_slice(&spec.order_wave(order)[start..end]);
    out.flux.extend_from_slice(&spec.order_flux(order)[start..end]);
    out.error
        .extend_from_slice(&spec.order_error(order)[start..end]);
    out.snr.extend_from_slice(&spec.order_snr(order)[start..end]);
}

/// Drop any sample that does not advance the wavelength grid. Handoffs
/// between orders can land the next order's first kept pixel at or just
/// below the previous order's last one.
fn strictly_increasing(m: MergedSpectrum) -> MergedSpectrum {
    let mut out = MergedSpectrum::default();
    let mut last = f64::NEG_INFINITY;
    for i in 0..m.len() {
        if m.wave[i] > last {
            last = m.wave[i];
            out.wave.push(m.wave[i]);
            out.flux.push(m.flux[i]);
            out.error.push(m.error[i]);
            out.snr.push(m.snr[i]);
        }
    }
    out
}
