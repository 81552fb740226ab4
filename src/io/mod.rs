//! File input and output.
//!
//! `fits` reads instrument data cubes and their header metadata; `store`
//! persists merged rest-frame spectra as compact binary products.

pub mod fits;
pub mod store;
