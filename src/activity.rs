//! Chromospheric activity indices from a merged spectrum.
//!
//! Each index is a ratio of summed band fluxes: one or two line cores in
//! the numerator against pseudo-continuum reference bands in the
//! denominator. Band errors combine in quadrature and propagate to the
//! index through the fractional errors of both sums.

use crate::bands::{Band, BandFilter, band_flux};
use crate::spectrum::MergedSpectrum;

pub const CA_K: Band = Band {
    center: 3933.664,
    width: 1.09,
    filter: BandFilter::Triangle,
};
pub const CA_H: Band = Band {
    center: 3968.47,
    width: 1.09,
    filter: BandFilter::Triangle,
};
pub const CA_V: Band = Band {
    center: 3901.0,
    width: 20.0,
    filter: BandFilter::Square,
};
pub const CA_R: Band = Band {
    center: 4001.0,
    width: 20.0,
    filter: BandFilter::Square,
};

pub const H_ALPHA: Band = Band {
    center: 6562.808,
    width: 0.678,
    filter: BandFilter::Square,
};
pub const H_ALPHA_CONT_BLUE: Band = Band {
    center: 6550.87,
    width: 10.75,
    filter: BandFilter::Square,
};
pub const H_ALPHA_CONT_RED: Band = Band {
    center: 6580.309,
    width: 8.75,
    filter: BandFilter::Square,
};

pub const HE_I: Band = Band {
    center: 5875.62,
    width: 0.2,
    filter: BandFilter::Square,
};
pub const HE_I_CONT_BLUE: Band = Band {
    center: 5874.5,
    width: 0.5,
    filter: BandFilter::Square,
};
pub const HE_I_CONT_RED: Band = Band {
    center: 5879.0,
    width: 0.5,
    filter: BandFilter::Square,
};

pub const NA_D1: Band = Band {
    center: 5895.92,
    width: 1.0,
    filter: BandFilter::Square,
};
pub const NA_D2: Band = Band {
    center: 5889.95,
    width: 1.0,
    filter: BandFilter::Square,
};
pub const NA_CONT_BLUE: Band = Band {
    center: 5805.0,
    width: 10.0,
    filter: BandFilter::Square,
};
pub const NA_CONT_RED: Band = Band {
    center: 6090.0,
    width: 20.0,
    filter: BandFilter::Square,
};

/// An activity index as numerator and denominator band sets.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
    pub name: &'static str,
    pub numerator: &'static [Band],
    pub denominator: &'static [Band],
    /// Factor applied to the denominator sum. The propagated error always
    /// works with the unscaled sum.
    pub den_scale: f64,
}

/// Mount Wilson style S-index: Ca II H and K cores over the flanking
/// continua.
pub const S_INDEX: IndexDef = IndexDef {
    name: "s_index",
    numerator: &[CA_H, CA_K],
    denominator: &[CA_R, CA_V],
    den_scale: 1.0,
};

pub const H_ALPHA_INDEX: IndexDef = IndexDef {
    name: "halpha",
    numerator: &[H_ALPHA],
    denominator: &[H_ALPHA_CONT_BLUE, H_ALPHA_CONT_RED],
    den_scale: 0.5,
};

pub const HE_I_INDEX: IndexDef = IndexDef {
    name: "hei",
    numerator: &[HE_I],
    denominator: &[HE_I_CONT_BLUE, HE_I_CONT_RED],
    den_scale: 0.5,
};

pub const NA_I_INDEX: IndexDef = IndexDef {
    name: "nai",
    numerator: &[NA_D1, NA_D2],
    denominator: &[NA_CONT_RED, NA_CONT_BLUE],
    den_scale: 1.0,
};

/// One activity index with its propagated error.
#[derive(Debug, Clone, Copy)]
pub struct IndexValue {
    pub value: f64,
    pub sigma: f64,
}

/// Evaluate one index definition on a merged spectrum.
///
/// A band that cannot be integrated comes back as NaN from
/// [`band_flux`] and poisons the index, which keeps partial wavelength
/// coverage visible instead of silently biasing the ratio.
pub fn compute_index(spec: &MergedSpectrum, def: &IndexDef) -> IndexValue {
    let band_sum = |bands: &[Band]| -> (f64, f64) {
        let mut total = 0.0;
        let mut var = 0.0;
        for band in bands {
            let bf = band_flux(&spec.wave, &spec.flux, &spec.error, band);
            total += bf.value;
            var += bf.sigma * bf.sigma;
        }
        (total, var.sqrt())
    };
    let (num, num_err) = band_sum(def.numerator);
    let (den, den_err) = band_sum(def.denominator);
    let value = num / (def.den_scale * den);
    let sigma = value * ((num_err / num).powi(2) + (den_err / den).powi(2)).sqrt();
    IndexValue { value, sigma }
}
