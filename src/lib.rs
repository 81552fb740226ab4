//! Chromospheric activity measurement library.
//!
//! Plage measures stellar activity indices (S, H-alpha, HeI, NaI D1 D2)
//! from reduced echelle spectra: it shifts each spectrum to the stellar
//! rest frame with a cross-correlation velocity fit, merges the orders at
//! their signal-to-noise crossover, and integrates the line and continuum
//! bands of each index.

pub mod activity;
pub mod bands;
pub mod crosscorr;
pub mod interp;
pub mod io;
pub mod masks;
pub mod merge;
pub mod processor;
pub mod restframe;
pub mod spectrum;
pub mod stack;
pub mod steplog;
