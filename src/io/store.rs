//! Binary spectrum products.
//!
//! A merged rest-frame spectrum is stored with the header metadata that
//! later stacking needs. Fixed-width little-endian fields, magic and
//! version up front.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::io::fits::HeaderMeta;
use crate::spectrum::MergedSpectrum;

const MAGIC: &[u8; 4] = b"PLGE";
const VERSION: u32 = 1;

/// A merged rest-frame spectrum plus the metadata needed to stack it.
#[derive(Debug, Clone)]
pub struct SpectrumProduct {
    pub target: String,
    pub instrument: String,
    pub ra: f64,
    pub dec: f64,
    pub spectrum: MergedSpectrum,
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> io::Result<String> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_array(r: &mut impl Read, n: usize) -> io::Result<Vec<f64>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_f64(r)?);
    }
    Ok(out)
}

impl SpectrumProduct {
    /// Save to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(MAGIC)?;
        write_u32(&mut w, VERSION)?;
        write_str(&mut w, &self.target)?;
        write_str(&mut w, &self.instrument)?;
        write_f64(&mut w, self.ra)?;
        write_f64(&mut w, self.dec)?;
        write_u64(&mut w, self.spectrum.len() as u64)?;
        for arr in [
            &self.spectrum.wave,
            &self.spectrum.flux,
            &self.spectrum.error,
            &self.spectrum.snr,
        ] {
            for &v in arr {
                write_f64(&mut w, v)?;
            }
        }
        w.flush()
    }

    pub fn load(path: &Path) -> io::Result<SpectrumProduct> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid magic bytes",
            ));
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported version: {version}"),
            ));
        }

        let target = read_str(&mut r)?;
        let instrument = read_str(&mut r)?;
        let ra = read_f64(&mut r)?;
        let dec = read_f64(&mut r)?;
        let n = read_u64(&mut r)? as usize;
        let wave = read_array(&mut r, n)?;
        let flux = read_array(&mut r, n)?;
        let error = read_array(&mut r, n)?;
        let snr = read_array(&mut r, n)?;

        Ok(SpectrumProduct {
            target,
            instrument,
            ra,
            dec,
            spectrum: MergedSpectrum {
                wave,
                flux,
                error,
                snr,
            },
        })
    }
}

/// Product file name for a spectrum: the target plus the compacted
/// shutter date and time when the header carries them.
pub fn product_name(meta: &HeaderMeta) -> String {
    if meta.date.is_empty() || meta.ut.is_empty() {
        format!("{}_1d_rest_frame.spc", meta.target)
    } else {
        let date: String = meta.date.split('-').collect();
        let ut: String = meta.ut.split(':').collect();
        format!("{}_{}_UT{}_1d_rest_frame.spc", meta.target, date, ut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_product(n: usize) -> SpectrumProduct {
        SpectrumProduct {
            target: "HD 10700".to_string(),
            instrument: "FEROS".to_string(),
            ra: 26.017,
            dec: -15.937,
            spectrum: MergedSpectrum {
                wave: (0..n).map(|i| 5000.0 + 0.02 * i as f64).collect(),
                flux: (0..n).map(|i| 1.0 + (i as f64 * 0.1).sin()).collect(),
                error: vec![0.01; n],
                snr: vec![80.0; n],
            },
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("spc_test_{name}_{}.spc", std::process::id()))
    }

    #[test]
    fn round_trip() {
        let product = make_product(64);
        let path = temp_path("round_trip");
        product.save(&path).unwrap();
        let loaded = SpectrumProduct::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.target, product.target);
        assert_eq!(loaded.instrument, product.instrument);
        assert_eq!(loaded.ra, product.ra);
        assert_eq!(loaded.dec, product.dec);
        assert_eq!(loaded.spectrum.wave, product.spectrum.wave);
        assert_eq!(loaded.spectrum.flux, product.spectrum.flux);
        assert_eq!(loaded.spectrum.error, product.spectrum.error);
        assert_eq!(loaded.spectrum.snr, product.spectrum.snr);
    }

    #[test]
    fn save_replaces_existing_file() {
        let path = temp_path("replace");
        make_product(64).save(&path).unwrap();
        make_product(8).save(&path).unwrap();
        let loaded = SpectrumProduct::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.spectrum.len(), 8);
    }

    #[test]
    fn magic_validation() {
        let path = temp_path("bad_magic");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"BAAD").unwrap();
            f.write_all(&1u32.to_le_bytes()).unwrap();
        }
        let err = SpectrumProduct::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn version_validation() {
        let path = temp_path("bad_version");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(MAGIC).unwrap();
            f.write_all(&99u32.to_le_bytes()).unwrap();
        }
        let err = SpectrumProduct::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn product_name_uses_shutter_times() {
        let mut meta = HeaderMeta {
            target: "HD 10700".to_string(),
            instrument: "FEROS".to_string(),
            bjd: 0.0,
            ra: 0.0,
            dec: 0.0,
            date: "2021-07-21".to_string(),
            ut: "03:47:12.3".to_string(),
            bis: -999.0,
            bis_error: -999.0,
            contrast: 0.0,
            fwhm: None,
            fwhm_error: None,
        };
        assert_eq!(
            product_name(&meta),
            "HD 10700_20210721_UT034712.3_1d_rest_frame.spc"
        );
        meta.date.clear();
        assert_eq!(product_name(&meta), "HD 10700_1d_rest_frame.spc");
    }
}
