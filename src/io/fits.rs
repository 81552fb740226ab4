//! FITS input: spectrum cubes and header metadata.
//!
//! Reduced echelle products arrive as a primary HDU holding a
//! `(channels x orders x pixels)` cube. The cube is read through the
//! regular card grammar; the long `HIERARCH` keywords the reduction
//! writes (target name, coordinates, shutter times) do not fit the
//! 8-character keyword field, so the primary header blocks are scanned
//! directly for those.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use fitsrs::Fits;
use fitsrs::card::Value;
use fitsrs::hdu::HDU;
use fitsrs::hdu::data::image::Pixels;
use log::debug;
use ndarray::Array3;
use thiserror::Error;

const BLOCK_LEN: usize = 2880;
const CARD_LEN: usize = 80;

/// Sentinel for header quantities with no measured value.
pub const MISSING: f64 = -999.0;

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{}: no 3-D image HDU", path.display())]
    NoCube { path: PathBuf },
}

/// Header fields carried through processing.
///
/// Every field has a documented fallback, so a sparse header degrades
/// the result instead of failing the file.
#[derive(Debug, Clone)]
pub struct HeaderMeta {
    /// `HIERARCH TARGET NAME`, `"unknown"` when absent.
    pub target: String,
    /// `INST`, `"unknown"` when absent.
    pub instrument: String,
    /// `BJD_OUT`, 0.0 when absent.
    pub bjd: f64,
    /// `HIERARCH RA` / `HIERARCH DEC` in degrees, 0.0 when absent.
    pub ra: f64,
    pub dec: f64,
    /// `HIERARCH SHUTTER START DATE` / `UT`, empty when absent.
    pub date: String,
    pub ut: String,
    /// Bisector span and error, [`MISSING`] when unavailable anywhere.
    pub bis: f64,
    pub bis_error: f64,
    /// `XC_MIN`, 0.0 when absent.
    pub contrast: f64,
    /// `FWHM` and `DISP / SNR`, present only when all three cards are.
    pub fwhm: Option<f64>,
    pub fwhm_error: Option<f64>,
}

/// A loaded spectrum file: the raw data cube and its metadata.
#[derive(Debug)]
pub struct FitsSpectrum {
    pub cube: Array3<f64>,
    pub meta: HeaderMeta,
}

/// Read the first 3-D image HDU of `path` and the primary header.
pub fn load_spectrum(path: &Path) -> Result<FitsSpectrum, FitsError> {
    let io_err = |source| FitsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let long_cards = scan_hierarch(&mut file).map_err(io_err)?;
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;

    let mut hdu_list = Fits::from_reader(BufReader::new(file));
    let hdu = loop {
        match hdu_list.next() {
            Some(Ok(HDU::Primary(hdu))) | Some(Ok(HDU::XImage(hdu))) => {
                if hdu.get_header().get_xtension().get_naxis() == 3 {
                    break hdu;
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(FitsError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
            None => {
                return Err(FitsError::NoCube {
                    path: path.to_path_buf(),
                });
            }
        }
    };

    let header = hdu.get_header();
    let num = |key: &str| match header.get(key) {
        Some(Value::Float { value, .. }) => Some(*value),
        Some(Value::Integer { value, .. }) => Some(*value as f64),
        _ => None,
    };
    let text = |key: &str| match header.get(key) {
        Some(Value::String { value, .. }) => Some(value.trim().to_string()),
        _ => None,
    };

    let bzero = num("BZERO").unwrap_or(0.0);
    let bscale = num("BSCALE").unwrap_or(1.0);

    let naxisn = |i| *header.get_xtension().get_naxisn(i).unwrap() as usize;
    let (pixels_n, orders_n, channels_n) = (naxisn(1), naxisn(2), naxisn(3));

    let instrument = text("INST").unwrap_or_else(|| "unknown".to_string());
    let bjd = num("BJD_OUT").unwrap_or(0.0);
    let contrast = num("XC_MIN").unwrap_or(0.0);
    let (fwhm, fwhm_error) = match (num("FWHM"), num("DISP"), num("SNR")) {
        (Some(f), Some(disp), Some(snr)) => (Some(f), Some(disp / snr)),
        _ => (None, None),
    };
    let (bis, bis_error) = bisector_with_fallback(path, num("BS"), num("BS_E"));

    let hier_text = |name: &str| match long_cards.get(name) {
        Some(CardValue::Text(s)) => Some(s.clone()),
        _ => None,
    };
    let hier_num = |name: &str| match long_cards.get(name) {
        Some(CardValue::Number(v)) => Some(*v),
        _ => None,
    };
    let meta = HeaderMeta {
        target: hier_text("TARGET NAME").unwrap_or_else(|| "unknown".to_string()),
        instrument,
        bjd,
        ra: hier_num("RA").unwrap_or(0.0),
        dec: hier_num("DEC").unwrap_or(0.0),
        date: hier_text("SHUTTER START DATE").unwrap_or_default(),
        ut: hier_text("SHUTTER START UT").unwrap_or_default(),
        bis,
        bis_error,
        contrast,
        fwhm,
        fwhm_error,
    };

    let raw: Vec<f64> = match hdu_list.get_data(&hdu).pixels() {
        Pixels::U8(it) => it.map(|v| v as f64 * bscale + bzero).collect(),
        Pixels::I16(it) => it.map(|v| v as f64 * bscale + bzero).collect(),
        Pixels::I32(it) => it.map(|v| v as f64 * bscale + bzero).collect(),
        Pixels::I64(it) => it.map(|v| v as f64 * bscale + bzero).collect(),
        Pixels::F32(it) => it.map(|v| v as f64 * bscale + bzero).collect(),
        Pixels::F64(it) => it.map(|v| v * bscale + bzero).collect(),
    };
    let cube = Array3::from_shape_vec((channels_n, orders_n, pixels_n), raw).map_err(|e| {
        FitsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    debug!(
        "{}: {channels_n}x{orders_n}x{pixels_n} cube, target {}",
        path.display(),
        meta.target
    );
    Ok(FitsSpectrum { cube, meta })
}

#[derive(Debug, Clone)]
enum CardValue {
    Text(String),
    Number(f64),
}

/// Scan the primary header blocks for `HIERARCH <name> = <value>` cards.
fn scan_hierarch(file: &mut File) -> io::Result<HashMap<String, CardValue>> {
    let mut cards = HashMap::new();
    let mut block = [0u8; BLOCK_LEN];
    'blocks: loop {
        file.read_exact(&mut block)?;
        for card in block.chunks(CARD_LEN) {
            if card.starts_with(b"END") && card[3..].iter().all(|&b| b == b' ') {
                break 'blocks;
            }
            if let Some(rest) = card.strip_prefix(b"HIERARCH ") {
                let text = String::from_utf8_lossy(rest);
                if let Some(eq) = text.find('=') {
                    let name = text[..eq].trim().to_string();
                    cards.insert(name, parse_card_value(&text[eq + 1..]));
                }
            }
        }
    }
    Ok(cards)
}

fn parse_card_value(raw: &str) -> CardValue {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('\'') {
        // Quoted string; a doubled quote escapes one.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        CardValue::Text(out.trim_end().to_string())
    } else {
        let body = match raw.find('/') {
            Some(i) => &raw[..i],
            None => raw,
        }
        .trim();
        match body.parse::<f64>() {
            Ok(v) => CardValue::Number(v),
            Err(_) => CardValue::Text(body.to_string()),
        }
    }
}

/// Bisector span with fallback: the `BS`/`BS_E` cards when measured,
/// else the `BS2` column of the reduction's `proc/results.txt`, else the
/// [`MISSING`] pair. Lookup failures along the way stay silent.
fn bisector_with_fallback(path: &Path, bs: Option<f64>, bs_e: Option<f64>) -> (f64, f64) {
    if let Some(b) = bs
        && b != MISSING
    {
        return (b, bs_e.unwrap_or(MISSING));
    }
    bisector_from_results(path).unwrap_or((MISSING, MISSING))
}

fn bisector_from_results(path: &Path) -> Option<(f64, f64)> {
    let results = path.parent()?.parent()?.join("proc").join("results.txt");
    let text = std::fs::read_to_string(results).ok()?;
    let name = path.file_name()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    for line in text.lines() {
        if !line.contains(name) && !line.contains(stem) {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 6
            && let (Ok(bis2), Ok(err)) = (parts[4].parse::<f64>(), parts[5].parse::<f64>())
            && bis2 != MISSING
        {
            return Some((bis2, err));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process;

    fn num_card(key: &str, v: &str) -> String {
        format!("{key:<8}= {v:>20}")
    }

    fn str_card(key: &str, v: &str) -> String {
        format!("{key:<8}= '{v}'")
    }

    fn write_test_fits(path: &Path, extra_cards: &[String], cube: &Array3<f64>) {
        let (c, o, p) = cube.dim();
        let mut cards: Vec<String> = vec![
            num_card("SIMPLE", "T"),
            num_card("BITPIX", "-64"),
            num_card("NAXIS", "3"),
            num_card("NAXIS1", &p.to_string()),
            num_card("NAXIS2", &o.to_string()),
            num_card("NAXIS3", &c.to_string()),
        ];
        cards.extend_from_slice(extra_cards);
        cards.push("END".to_string());

        let mut bytes = Vec::new();
        for card in &cards {
            let mut b = card.clone().into_bytes();
            assert!(b.len() <= CARD_LEN, "card too long: {card}");
            b.resize(CARD_LEN, b' ');
            bytes.extend_from_slice(&b);
        }
        while bytes.len() % BLOCK_LEN != 0 {
            bytes.push(b' ');
        }
        for v in cube.iter() {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        while bytes.len() % BLOCK_LEN != 0 {
            bytes.push(0);
        }
        fs::write(path, bytes).unwrap();
    }

    fn test_cube() -> Array3<f64> {
        let (c, o, p) = (9, 2, 8);
        let mut cube = Array3::zeros((c, o, p));
        for ch in 0..c {
            for ord in 0..o {
                for i in 0..p {
                    cube[[ch, ord, i]] = (ch * 100 + ord * 10 + i) as f64;
                }
            }
        }
        cube
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fits_test_{name}_{}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_cube_and_header() {
        let dir = temp_dir("full");
        let path = dir.join("spec.fits");
        let cube = test_cube();
        let cards = vec![
            num_card("BJD_OUT", "2459416.789"),
            str_card("INST", "FEROS   "),
            num_card("XC_MIN", "0.43"),
            num_card("BS", "0.012"),
            num_card("BS_E", "0.003"),
            num_card("FWHM", "8.5"),
            num_card("DISP", "4.2"),
            num_card("SNR", "105.0"),
            "HIERARCH TARGET NAME = 'HD 10700'".to_string(),
            "HIERARCH RA = 26.017".to_string(),
            "HIERARCH DEC = -15.937".to_string(),
            "HIERARCH SHUTTER START DATE = '2021-07-21'".to_string(),
            "HIERARCH SHUTTER START UT = '03:47:12.3'".to_string(),
        ];
        write_test_fits(&path, &cards, &cube);

        let loaded = load_spectrum(&path).unwrap();
        assert_eq!(loaded.cube.dim(), (9, 2, 8));
        assert_eq!(loaded.cube[[0, 0, 0]], 0.0);
        assert_eq!(loaded.cube[[3, 1, 5]], 315.0);
        assert_eq!(loaded.cube[[8, 0, 7]], 807.0);

        let meta = &loaded.meta;
        assert_eq!(meta.target, "HD 10700");
        assert_eq!(meta.instrument, "FEROS");
        assert!((meta.bjd - 2459416.789).abs() < 1e-9);
        assert!((meta.ra - 26.017).abs() < 1e-9);
        assert!((meta.dec - -15.937).abs() < 1e-9);
        assert_eq!(meta.date, "2021-07-21");
        assert_eq!(meta.ut, "03:47:12.3");
        assert!((meta.bis - 0.012).abs() < 1e-12);
        assert!((meta.bis_error - 0.003).abs() < 1e-12);
        assert!((meta.contrast - 0.43).abs() < 1e-12);
        assert!((meta.fwhm.unwrap() - 8.5).abs() < 1e-12);
        assert!((meta.fwhm_error.unwrap() - 4.2 / 105.0).abs() < 1e-12);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sparse_header_falls_back_to_sentinels() {
        let dir = temp_dir("sparse");
        let path = dir.join("spec.fits");
        write_test_fits(&path, &[], &test_cube());

        let meta = load_spectrum(&path).unwrap().meta;
        assert_eq!(meta.target, "unknown");
        assert_eq!(meta.instrument, "unknown");
        assert_eq!(meta.bjd, 0.0);
        assert_eq!(meta.ra, 0.0);
        assert_eq!(meta.bis, MISSING);
        assert_eq!(meta.bis_error, MISSING);
        assert_eq!(meta.contrast, 0.0);
        assert!(meta.fwhm.is_none());
        assert!(meta.fwhm_error.is_none());
        assert!(meta.date.is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bisector_comes_from_results_table_when_header_lacks_it() {
        let base = temp_dir("bisfall");
        let raw = base.join("raw");
        let proc_dir = base.join("proc");
        fs::create_dir_all(&raw).unwrap();
        fs::create_dir_all(&proc_dir).unwrap();

        let path = raw.join("obs1.fits");
        write_test_fits(&path, &[], &test_cube());
        fs::write(
            proc_dir.join("results.txt"),
            "other.fits 1 2 3 0.5 0.1\nobs1.fits 2459000.1 7.7 1.0 -12.5 0.8\n",
        )
        .unwrap();

        let meta = load_spectrum(&path).unwrap().meta;
        assert!((meta.bis - -12.5).abs() < 1e-12);
        assert!((meta.bis_error - 0.8).abs() < 1e-12);

        fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn unmeasured_results_row_keeps_the_sentinel() {
        let base = temp_dir("bismiss");
        let raw = base.join("raw");
        let proc_dir = base.join("proc");
        fs::create_dir_all(&raw).unwrap();
        fs::create_dir_all(&proc_dir).unwrap();

        let path = raw.join("obs2.fits");
        write_test_fits(&path, &[], &test_cube());
        fs::write(
            proc_dir.join("results.txt"),
            "obs2.fits 2459000.1 7.7 1.0 -999.0 -999.0\n",
        )
        .unwrap();

        let meta = load_spectrum(&path).unwrap().meta;
        assert_eq!(meta.bis, MISSING);
        assert_eq!(meta.bis_error, MISSING);

        fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let got = load_spectrum(Path::new("/nonexistent/path/spec.fits"));
        assert!(matches!(got, Err(FitsError::Io { .. })));
    }
}
