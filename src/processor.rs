//! The per-file pipeline and its batch driver.
//!
//! One [`SpectrumProcessor`] runs every stage in order: load the data
//! cube, shift it to the stellar rest frame, merge the orders, then
//! integrate the activity indices. A failed stage turns into an
//! error-carrying [`ActivityResult`] instead of aborting the batch.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::activity::{self, H_ALPHA_INDEX, HE_I_INDEX, IndexDef, IndexValue, NA_I_INDEX, S_INDEX};
use crate::crosscorr::CcfParams;
use crate::io::fits::{self, FitsError, MISSING};
use crate::io::store::{self, SpectrumProduct};
use crate::masks::{MaskError, MaskKind, MaskStore};
use crate::merge::{MergeError, merge_orders};
use crate::restframe::{RestFrameError, to_rest_frame};
use crate::spectrum::{ChannelLayout, EchelleSpectrum, MergedSpectrum, SpectrumError};
use crate::steplog::{StepSink, StepStatus};

/// Errors that abort processing of a single file.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fits(#[from] FitsError),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
    #[error(transparent)]
    Mask(#[from] MaskError),
    #[error(transparent)]
    RestFrame(#[from] RestFrameError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("failed to save {}: {source}", path.display())]
    SaveProduct {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings shared by every file in a batch.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Stellar template mask used for the velocity fit.
    pub mask: MaskKind,
    /// Channel indices of the instrument data cube.
    pub layout: ChannelLayout,
    /// Velocity grid of the cross-correlation scan.
    pub ccf: CcfParams,
    /// Instruments whose coverage misses the Ca H and K lines; their
    /// S index stays at the sentinel. Matched against the lowercased
    /// `INST` card.
    pub s_index_exceptions: Vec<String>,
    /// Persist the merged 1-D spectrum next to the activity results.
    pub save_1d: bool,
    /// Where merged spectra and batch tables are written.
    pub output_dir: PathBuf,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            mask: MaskKind::G2,
            layout: ChannelLayout::default(),
            ccf: CcfParams {
                rv_step: 0.05,
                ..CcfParams::default()
            },
            s_index_exceptions: vec!["fideos".to_string()],
            save_1d: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Per-file record of everything the pipeline measured.
///
/// Index fields hold the −999 sentinel until the corresponding step
/// completes, so a partially processed file is still a valid row.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityResult {
    pub filename: String,
    pub target: String,
    pub instrument: String,
    pub bjd: f64,
    /// Fitted radial velocity of the star, km/s.
    pub rv: f64,
    pub bis: f64,
    pub bis_error: f64,
    pub fwhm: Option<f64>,
    pub fwhm_error: Option<f64>,
    pub contrast: f64,
    pub s_index: f64,
    pub s_index_error: f64,
    pub halpha: f64,
    pub halpha_error: f64,
    pub hei: f64,
    pub hei_error: f64,
    pub nai_d1d2: f64,
    pub nai_d1d2_error: f64,
    /// Where the merged spectrum was written, when saving was requested.
    pub spectrum_1d_path: Option<String>,
    /// Wall-clock seconds per pipeline step.
    pub processing_time: BTreeMap<String, f64>,
    /// Set when the pipeline failed; earlier fields keep what was measured.
    pub error: Option<String>,
}

impl ActivityResult {
    fn empty(filename: String) -> Self {
        Self {
            filename,
            target: String::new(),
            instrument: String::new(),
            bjd: 0.0,
            rv: 0.0,
            bis: 0.0,
            bis_error: 0.0,
            fwhm: None,
            fwhm_error: None,
            contrast: 0.0,
            s_index: MISSING,
            s_index_error: MISSING,
            halpha: MISSING,
            halpha_error: MISSING,
            hei: MISSING,
            hei_error: MISSING,
            nai_d1d2: MISSING,
            nai_d1d2_error: MISSING,
            spectrum_1d_path: None,
            processing_time: BTreeMap::new(),
            error: None,
        }
    }
}

/// Drives the full pipeline, one file at a time.
pub struct SpectrumProcessor {
    config: ProcessorConfig,
    masks: MaskStore,
    sink: Box<dyn StepSink>,
}

impl SpectrumProcessor {
    pub fn new(config: ProcessorConfig, masks: MaskStore, sink: Box<dyn StepSink>) -> Self {
        Self {
            config,
            masks,
            sink,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run the pipeline on one spectrum.
    ///
    /// Never fails: any error is recorded in the result's `error` field
    /// and the unmeasured index fields keep their sentinels.
    pub fn process_file(&mut self, path: &Path) -> ActivityResult {
        let mut result = ActivityResult::empty(path.display().to_string());
        if let Err(e) = self.run(path, &mut result) {
            warn!("{}: {e}", path.display());
            self.sink.on_step(
                "pipeline",
                StepStatus::Failed,
                &json!({ "filename": result.filename, "error": e.to_string() }),
            );
            result.error = Some(e.to_string());
        }
        result
    }

    /// Process files in order, converting failures into error-carrying
    /// results. Returns one result per input.
    pub fn process_batch(&mut self, files: &[PathBuf]) -> Vec<ActivityResult> {
        let mut results = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, files.len(), file.display());
            results.push(self.process_file(file));
        }
        results
    }

    fn run(&mut self, path: &Path, result: &mut ActivityResult) -> Result<(), ProcessError> {
        let filename = result.filename.clone();

        self.step_started("load_fits", &filename);
        let t = Instant::now();
        let loaded = fits::load_spectrum(path)?;
        let spec = EchelleSpectrum::from_cube(&loaded.cube, &self.config.layout)?;
        let meta = loaded.meta;
        result.target = meta.target.clone();
        result.instrument = meta.instrument.clone();
        result.bjd = meta.bjd;
        result.bis = meta.bis;
        result.bis_error = meta.bis_error;
        result.fwhm = meta.fwhm;
        result.fwhm_error = meta.fwhm_error;
        result.contrast = meta.contrast;
        self.step_completed(
            "load_fits",
            &filename,
            t,
            &mut result.processing_time,
            json!({ "orders": spec.orders(), "pixels": spec.pixels() }),
        );

        self.step_started("rest_frame", &filename);
        let t = Instant::now();
        let mask = self.masks.get(self.config.mask)?;
        let (rest, rv) = to_rest_frame(&spec, &mask, &self.config.ccf)?;
        result.rv = rv;
        self.step_completed(
            "rest_frame",
            &filename,
            t,
            &mut result.processing_time,
            json!({ "rv_kms": rv }),
        );

        self.step_started("merge_echelle", &filename);
        let t = Instant::now();
        let merged = merge_orders(&rest)?;
        if self.config.save_1d {
            let product = SpectrumProduct {
                target: meta.target.clone(),
                instrument: meta.instrument.clone(),
                ra: meta.ra,
                dec: meta.dec,
                spectrum: merged.clone(),
            };
            let out = self.config.output_dir.join(store::product_name(&meta));
            product
                .save(&out)
                .map_err(|source| ProcessError::SaveProduct {
                    path: out.clone(),
                    source,
                })?;
            result.spectrum_1d_path = Some(out.display().to_string());
        }
        self.step_completed(
            "merge_echelle",
            &filename,
            t,
            &mut result.processing_time,
            json!({ "samples": merged.len() }),
        );

        let inst = meta.instrument.to_lowercase();
        if self.config.s_index_exceptions.iter().any(|e| e == &inst) {
            self.step_started("s_index", &filename);
            let t = Instant::now();
            info!("{filename}: {inst} does not cover the Ca H and K lines");
            self.step_completed(
                "s_index",
                &filename,
                t,
                &mut result.processing_time,
                json!({ "value": MISSING }),
            );
        } else {
            let s = self.index_step(&S_INDEX, &merged, &filename, &mut result.processing_time);
            result.s_index = s.value;
            result.s_index_error = s.sigma;
        }

        let ha = self.index_step(&H_ALPHA_INDEX, &merged, &filename, &mut result.processing_time);
        result.halpha = ha.value;
        result.halpha_error = ha.sigma;

        let he = self.index_step(&HE_I_INDEX, &merged, &filename, &mut result.processing_time);
        result.hei = he.value;
        result.hei_error = he.sigma;

        let na = self.index_step(&NA_I_INDEX, &merged, &filename, &mut result.processing_time);
        result.nai_d1d2 = na.value;
        result.nai_d1d2_error = na.sigma;

        info!(
            "{}: rv {:.3} km/s, S {:.4}, Halpha {:.4} in {:.2}s",
            filename,
            result.rv,
            result.s_index,
            result.halpha,
            result.processing_time.values().sum::<f64>()
        );
        Ok(())
    }

    fn index_step(
        &mut self,
        def: &IndexDef,
        merged: &MergedSpectrum,
        filename: &str,
        timing: &mut BTreeMap<String, f64>,
    ) -> IndexValue {
        self.step_started(def.name, filename);
        let t = Instant::now();
        let v = activity::compute_index(merged, def);
        self.step_completed(def.name, filename, t, timing, json!({ "value": v.value }));
        v
    }

    fn step_started(&mut self, step: &str, filename: &str) {
        self.sink
            .on_step(step, StepStatus::Started, &json!({ "filename": filename }));
    }

    fn step_completed(
        &mut self,
        step: &str,
        filename: &str,
        started: Instant,
        timing: &mut BTreeMap<String, f64>,
        mut detail: Value,
    ) {
        let seconds = started.elapsed().as_secs_f64();
        timing.insert(step.to_string(), seconds);
        if let Value::Object(map) = &mut detail {
            map.insert("filename".into(), json!(filename));
            map.insert("seconds".into(), json!(seconds));
        }
        self.sink.on_step(step, StepStatus::Completed, &detail);
    }
}

/// Target name for batch-level outputs: the first result that knows one.
pub fn batch_target(results: &[ActivityResult]) -> &str {
    results
        .iter()
        .map(|r| r.target.as_str())
        .find(|t| !t.is_empty())
        .unwrap_or("unknown")
}

/// File name of the activities table for a target.
pub fn activities_table_name(target: &str) -> String {
    format!("{target}_activities.dat")
}

/// Write the whitespace-separated activities table for a batch.
///
/// One row per result, in batch order. Unmeasured FWHM columns fall back
/// to the −999 sentinel so every row has the same column set.
pub fn write_activities_table(results: &[ActivityResult], path: &Path) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(
        w,
        "# bjd S e_S Halpha e_Halpha HeI e_HeI NaID1D2 e_NaID1D2 BIS e_BIS FWHM e_FWHM CONTRAST"
    )?;
    for r in results {
        writeln!(
            w,
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            r.bjd,
            r.s_index,
            r.s_index_error,
            r.halpha,
            r.halpha_error,
            r.hei,
            r.hei_error,
            r.nai_d1d2,
            r.nai_d1d2_error,
            r.bis,
            r.bis_error,
            r.fwhm.unwrap_or(MISSING),
            r.fwhm_error.unwrap_or(MISSING),
            r.contrast,
        )?;
    }
    w.flush()
}

/// Write the full batch results as a JSON array.
pub fn write_results_json(results: &[ActivityResult], path: &Path) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, results).map_err(io::Error::from)?;
    writeln!(w)?;
    w.flush()
}
