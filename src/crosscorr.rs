//! Cross-correlation of a spectrum against a binary line mask, and the
//! Gaussian fit used to read a radial velocity off the CCF.
//!
//! The template is the mask painted onto the observed wavelength grid,
//! padded by 200 A on each side at the edge pixel spacing so every Doppler
//! shift stays inside the template domain. For each trial velocity the
//! template is shifted by `(1 + v/c)` and summed against the flux.

use thiserror::Error;

use crate::interp::{Fill, Interp1d, arange, argmin, median};
use crate::masks::LineMask;

/// Speed of light in km/s, the unit of the velocity grid.
pub const C_KMS: f64 = 299_792.458;

/// Wavelength padding added on both template ends, in Angstroms.
const TEMPLATE_PAD: f64 = 200.0;

const MAX_FIT_ITERS: usize = 100;
const LAMBDA_MAX: f64 = 1e12;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("fit did not converge after {0} iterations")]
    NoConvergence(usize),
    #[error("normal equations are singular")]
    SingularMatrix,
    #[error("fit needs at least {needed} samples, got {got}")]
    TooFewSamples { needed: usize, got: usize },
}

/// Velocity grid of a cross-correlation.
#[derive(Debug, Clone)]
pub struct CcfParams {
    /// Smallest trial velocity in km/s.
    pub rv_min: f64,
    /// Upper velocity bound in km/s, excluded from the grid.
    pub rv_max: f64,
    /// Grid step in km/s.
    pub rv_step: f64,
}

impl Default for CcfParams {
    fn default() -> Self {
        Self {
            rv_min: -300.0,
            rv_max: 300.0,
            rv_step: 0.1,
        }
    }
}

/// A cross-correlation function sampled on its velocity grid.
#[derive(Debug, Clone)]
pub struct Ccf {
    /// Trial velocities in km/s.
    pub rv: Vec<f64>,
    /// Median-normalized correlation power per trial velocity.
    pub power: Vec<f64>,
}

impl Ccf {
    /// True when no mask feature contributed and the power is all zero.
    pub fn is_degenerate(&self) -> bool {
        self.power.iter().all(|&p| p == 0.0)
    }
}

/// Cross-correlate one order against a line mask.
///
/// Mask features must lie strictly inside the order's wavelength span to
/// contribute. The returned power is normalized by its median; if the
/// median is zero (no features in range) the power is left as computed,
/// which callers detect with [`Ccf::is_degenerate`].
pub fn ccf(wave: &[f64], flux: &[f64], mask: &LineMask, params: &CcfParams) -> Ccf {
    let rv = arange(params.rv_min, params.rv_max, params.rv_step);
    let n = wave.len().min(flux.len());
    if n < 2 {
        let power = vec![0.0; rv.len()];
        return Ccf { rv, power };
    }

    let pad_blue = arange(wave[0] - TEMPLATE_PAD, wave[0], wave[1] - wave[0]);
    let pad_red = arange(
        wave[n - 1],
        wave[n - 1] + TEMPLATE_PAD,
        wave[n - 1] - wave[n - 2],
    );
    let mut wtem = Vec::with_capacity(pad_blue.len() + n + pad_red.len());
    wtem.extend_from_slice(&pad_blue);
    wtem.extend_from_slice(&wave[..n]);
    wtem.extend_from_slice(&pad_red);

    let mut ftem = vec![0.0; wtem.len()];
    for line in mask.lines_within(wave[0], wave[n - 1]) {
        let lo = wtem.partition_point(|&w| w < line.start);
        let hi = wtem.partition_point(|&w| w <= line.end);
        for v in &mut ftem[lo..hi] {
            *v = line.weight;
        }
    }

    // Shifting the template grid by (1 + v/c) and interpolating at w is the
    // same as sampling the unshifted template at w / (1 + v/c).
    let template = Interp1d::new(&wtem, &ftem, Fill::Value(0.0));
    let mut power = Vec::with_capacity(rv.len());
    for &v in &rv {
        let scale = 1.0 + v / C_KMS;
        let mut acc = 0.0;
        for i in 0..n {
            acc += flux[i] * template.eval(wave[i] / scale);
        }
        power.push(acc);
    }

    let med = median(&power);
    if med != 0.0 {
        for p in &mut power {
            *p /= med;
        }
    }

    Ccf { rv, power }
}

/// `off + a * N(x; mu, sigma)` with `N` the normal density.
pub fn gaussian(x: f64, a: f64, mu: f64, sigma: f64, off: f64) -> f64 {
    let z = (x - mu) / sigma;
    off + a * (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

/// Converged parameters of the CCF Gaussian fit.
#[derive(Debug, Clone, Copy)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub center: f64,
    pub sigma: f64,
    pub offset: f64,
}

fn residual_cost(xs: &[f64], ys: &[f64], p: &[f64; 4]) -> f64 {
    let mut cost = 0.0;
    for i in 0..xs.len() {
        let r = gaussian(xs[i], p[0], p[1], p[2], p[3]) - ys[i];
        cost += r * r;
    }
    cost
}

/// Solve a 4x4 system by Gaussian elimination with partial pivoting.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let mut pivot = col;
        for row in col + 1..4 {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..4 {
            let f = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }

    let mut x = [0.0; 4];
    for col in (0..4).rev() {
        let mut acc = b[col];
        for k in col + 1..4 {
            acc -= a[col][k] * x[k];
        }
        x[col] = acc / a[col][col];
    }
    Some(x)
}

/// Fit `off + a * N(x; mu, sigma)` to samples by damped least squares.
///
/// Starts from the sample minimum (the CCF dip) with unit sigma and
/// offset, and iterates Levenberg-Marquardt steps on the normal equations
/// until the step or the cost improvement vanishes.
pub fn fit_gaussian(xs: &[f64], ys: &[f64]) -> Result<GaussianFit, FitError> {
    let n = xs.len().min(ys.len());
    if n < 4 {
        return Err(FitError::TooFewSamples { needed: 4, got: n });
    }

    let est = argmin(&ys[..n]).unwrap_or(0);
    let mut p = [ys[est], xs[est], 1.0, 1.0];
    let mut cost = residual_cost(&xs[..n], &ys[..n], &p);
    let mut lambda = 1e-3;

    for iter in 0..MAX_FIT_ITERS {
        // Normal equations J^T J and J^T r at the current parameters.
        let mut jtj = [[0.0; 4]; 4];
        let mut jtr = [0.0; 4];
        for i in 0..n {
            let sig = p[2];
            let z = (xs[i] - p[1]) / sig;
            let pdf = (-0.5 * z * z).exp() / (sig * (2.0 * std::f64::consts::PI).sqrt());
            let r = p[3] + p[0] * pdf - ys[i];

            let j = [pdf, p[0] * pdf * z / sig, p[0] * pdf * (z * z - 1.0) / sig, 1.0];
            for a in 0..4 {
                for b in 0..4 {
                    jtj[a][b] += j[a] * j[b];
                }
                jtr[a] += j[a] * r;
            }
        }

        loop {
            let mut damped = jtj;
            for d in 0..4 {
                damped[d][d] += lambda * jtj[d][d].max(1e-12);
            }
            let rhs = [-jtr[0], -jtr[1], -jtr[2], -jtr[3]];

            let Some(delta) = solve4(damped, rhs) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Err(FitError::SingularMatrix);
                }
                continue;
            };

            let step: f64 = delta.iter().map(|d| d.abs()).fold(0.0, f64::max);
            let scale: f64 = p.iter().map(|v| v.abs()).fold(1.0, f64::max);
            if step < 1e-10 * scale {
                return Ok(GaussianFit {
                    amplitude: p[0],
                    center: p[1],
                    sigma: p[2],
                    offset: p[3],
                });
            }

            let trial = [p[0] + delta[0], p[1] + delta[1], p[2] + delta[2], p[3] + delta[3]];
            let trial_cost = residual_cost(&xs[..n], &ys[..n], &trial);
            if trial_cost.is_finite() && trial_cost < cost {
                let improvement = cost - trial_cost;
                p = trial;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(1e-12);
                if improvement <= 1e-12 * cost.max(1e-300) {
                    return Ok(GaussianFit {
                        amplitude: p[0],
                        center: p[1],
                        sigma: p[2],
                        offset: p[3],
                    });
                }
                break;
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return Err(FitError::NoConvergence(iter));
            }
        }
    }

    Err(FitError::NoConvergence(MAX_FIT_ITERS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::MaskLine;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() < tol,
            "expected {a} ~= {b} (diff = {})",
            (a - b).abs()
        );
    }

    fn line_mask(lines: &[(f64, f64, f64)]) -> LineMask {
        LineMask {
            lines: lines
                .iter()
                .map(|&(start, end, weight)| MaskLine { start, end, weight })
                .collect(),
        }
    }

    /// Flux 1 with Gaussian absorption dips at `centers`, Doppler shifted
    /// by `rv_kms`.
    fn make_spectrum(centers: &[f64], rv_kms: f64) -> (Vec<f64>, Vec<f64>) {
        let wave: Vec<f64> = (0..2500).map(|i| 5000.0 + 0.02 * i as f64).collect();
        let scale = 1.0 + rv_kms / C_KMS;
        let flux: Vec<f64> = wave
            .iter()
            .map(|&w| {
                let mut f = 1.0;
                for &c in centers {
                    let shifted = c * scale;
                    let d = (w - shifted) / 0.06;
                    f -= 0.7 * (-0.5 * d * d).exp();
                }
                f
            })
            .collect();
        (wave, flux)
    }

    #[test]
    fn gaussian_fit_recovers_parameters() {
        let xs = arange(-30.0, 30.0, 0.1);
        let ys: Vec<f64> = xs.iter().map(|&x| gaussian(x, -25.0, 4.2, 2.5, 1.0)).collect();
        let fit = fit_gaussian(&xs, &ys).unwrap();
        assert_close(fit.amplitude, -25.0, 1e-6);
        assert_close(fit.center, 4.2, 1e-7);
        assert_close(fit.sigma, 2.5, 1e-6);
        assert_close(fit.offset, 1.0, 1e-7);
    }

    #[test]
    fn gaussian_fit_with_noise() {
        let xs = arange(-20.0, 20.0, 0.05);
        let mut state: u64 = 314159265;
        let mut rng = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        };
        let ys: Vec<f64> = xs
            .iter()
            .map(|&x| gaussian(x, -8.0, -2.4, 3.0, 1.0) + 0.01 * (rng() - 0.5))
            .collect();
        let fit = fit_gaussian(&xs, &ys).unwrap();
        assert_close(fit.center, -2.4, 0.05);
        assert_close(fit.offset, 1.0, 0.05);
    }

    #[test]
    fn fit_rejects_short_input() {
        let err = fit_gaussian(&[0.0, 1.0, 2.0], &[1.0, 0.5, 1.0]).unwrap_err();
        assert!(matches!(err, FitError::TooFewSamples { got: 3, .. }));
    }

    #[test]
    fn ccf_dip_tracks_injected_velocity() {
        let rv_true = 3.7;
        let centers = [5012.0, 5025.0, 5038.0];
        let (wave, flux) = make_spectrum(&centers, rv_true);
        let mask = line_mask(&[
            (5011.95, 5012.05, 1.0),
            (5024.95, 5025.05, 0.9),
            (5037.95, 5038.05, 1.0),
        ]);
        let params = CcfParams {
            rv_min: -20.0,
            rv_max: 20.0,
            rv_step: 0.1,
        };
        let out = ccf(&wave, &flux, &mask, &params);
        assert!(!out.is_degenerate());

        let fit = fit_gaussian(&out.rv, &out.power).unwrap();
        assert_close(fit.center, rv_true, params.rv_step);
        assert!(fit.amplitude < 0.0, "CCF dip should fit negative amplitude");
    }

    #[test]
    fn ccf_is_median_normalized() {
        let (wave, flux) = make_spectrum(&[5020.0], 0.0);
        let mask = line_mask(&[(5019.9, 5020.1, 1.0)]);
        let params = CcfParams {
            rv_min: -10.0,
            rv_max: 10.0,
            rv_step: 0.5,
        };
        let out = ccf(&wave, &flux, &mask, &params);
        assert_close(median(&out.power), 1.0, 1e-12);
    }

    #[test]
    fn ccf_without_mask_lines_is_degenerate() {
        let (wave, flux) = make_spectrum(&[5020.0], 0.0);
        // All features outside the observed span.
        let mask = line_mask(&[(4000.0, 4000.3, 1.0), (7000.0, 7000.3, 1.0)]);
        let out = ccf(&wave, &flux, &mask, &CcfParams::default());
        assert!(out.is_degenerate());
    }

    #[test]
    fn velocity_grid_excludes_upper_bound() {
        let (wave, flux) = make_spectrum(&[5020.0], 0.0);
        let mask = line_mask(&[(5019.9, 5020.1, 1.0)]);
        let params = CcfParams {
            rv_min: -5.0,
            rv_max: 5.0,
            rv_step: 1.0,
        };
        let out = ccf(&wave, &flux, &mask, &params);
        assert_eq!(out.rv.len(), 10);
        assert_close(out.rv[0], -5.0, 1e-12);
        assert_close(out.rv[9], 4.0, 1e-12);
    }
}
