//! Spectrum data model.
//!
//! Instrument pipelines deliver a 3-D cube of per-order data planes. The
//! cube is unpacked exactly once, here, into typed wavelength/flux/error/
//! signal-to-noise planes; nothing downstream ever sees a raw channel index.

use ndarray::Array2;
use ndarray::Array3;
use thiserror::Error;

/// Minimum pixels per order for interpolation and band lookups to work.
pub const MIN_ORDER_PIXELS: usize = 4;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("data cube has {channels} channels but the layout needs index {needed}")]
    MissingChannel { channels: usize, needed: usize },
    #[error("order {order}: wavelength not strictly increasing at pixel {pixel}")]
    NonMonotonicOrder { order: usize, pixel: usize },
    #[error("order {order} has {pixels} pixels, need at least {MIN_ORDER_PIXELS}")]
    OrderTooShort { order: usize, pixels: usize },
    #[error("data cube contains no orders")]
    Empty,
}

/// Which cube channel holds which physical plane.
///
/// The default matches CERES-reduced FEROS products: wavelength in 0,
/// continuum-normalized flux in 5, its error in 6, signal-to-noise in 8.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLayout {
    pub wavelength: usize,
    pub flux: usize,
    pub error: usize,
    pub snr: usize,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            wavelength: 0,
            flux: 5,
            error: 6,
            snr: 8,
        }
    }
}

impl ChannelLayout {
    fn max_index(&self) -> usize {
        self.wavelength.max(self.flux).max(self.error).max(self.snr)
    }
}

/// A multi-order echelle spectrum as four `(orders x pixels)` planes.
///
/// Invariants, enforced by [`EchelleSpectrum::from_cube`]:
/// wavelength is strictly increasing within each order, and order index 0
/// is the reddest order (ascending index runs red to blue).
#[derive(Debug, Clone)]
pub struct EchelleSpectrum {
    pub wave: Array2<f64>,
    pub flux: Array2<f64>,
    pub error: Array2<f64>,
    pub snr: Array2<f64>,
}

impl EchelleSpectrum {
    /// Unpack a `(channels x orders x pixels)` cube using `layout`.
    ///
    /// A cube stored blue-to-red has its order axis reversed so the result
    /// always satisfies the red-first convention.
    pub fn from_cube(cube: &Array3<f64>, layout: &ChannelLayout) -> Result<Self, SpectrumError> {
        let (channels, orders, pixels) = cube.dim();
        if layout.max_index() >= channels {
            return Err(SpectrumError::MissingChannel {
                channels,
                needed: layout.max_index(),
            });
        }
        if orders == 0 {
            return Err(SpectrumError::Empty);
        }
        if pixels < MIN_ORDER_PIXELS {
            return Err(SpectrumError::OrderTooShort { order: 0, pixels });
        }

        let plane = |c: usize| cube.index_axis(ndarray::Axis(0), c).to_owned();
        let mut wave = plane(layout.wavelength);
        let mut flux = plane(layout.flux);
        let mut error = plane(layout.error);
        let mut snr = plane(layout.snr);

        // Red-first normalization: the first order must start redder than
        // the last one.
        if orders > 1 && wave[[0, 0]] < wave[[orders - 1, 0]] {
            let flip = |a: &Array2<f64>| a.slice(ndarray::s![..;-1, ..]).to_owned();
            wave = flip(&wave);
            flux = flip(&flux);
            error = flip(&error);
            snr = flip(&snr);
        }

        for o in 0..orders {
            for i in 1..pixels {
                if wave[[o, i]] <= wave[[o, i - 1]] {
                    return Err(SpectrumError::NonMonotonicOrder { order: o, pixel: i });
                }
            }
        }

        Ok(Self {
            wave,
            flux,
            error,
            snr,
        })
    }

    pub fn orders(&self) -> usize {
        self.wave.nrows()
    }

    pub fn pixels(&self) -> usize {
        self.wave.ncols()
    }

    pub fn order_wave(&self, o: usize) -> &[f64] {
        self.wave.row(o).to_slice().unwrap_or(&[])
    }

    pub fn order_flux(&self, o: usize) -> &[f64] {
        self.flux.row(o).to_slice().unwrap_or(&[])
    }

    pub fn order_error(&self, o: usize) -> &[f64] {
        self.error.row(o).to_slice().unwrap_or(&[])
    }

    pub fn order_snr(&self, o: usize) -> &[f64] {
        self.snr.row(o).to_slice().unwrap_or(&[])
    }
}

/// A single merged spectrum with strictly increasing wavelength.
#[derive(Debug, Clone, Default)]
pub struct MergedSpectrum {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub error: Vec<f64>,
    pub snr: Vec<f64>,
}

impl MergedSpectrum {
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }
}
