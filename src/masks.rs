//! Binary line masks used as cross-correlation templates.
//!
//! A mask file (`G2.mas`, `K0.mas`, ...) holds one line per absorption
//! feature: start wavelength, end wavelength and weight, whitespace
//! separated. Masks are loaded lazily and cached for the process lifetime.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("unknown mask '{0}' (expected G2, K0, K5 or M2)")]
    UnknownKind(String),
    #[error("failed to read mask file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: expected three numeric columns")]
    Malformed { path: PathBuf, line: usize },
}

/// Spectral type of the mask template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskKind {
    G2,
    K0,
    K5,
    M2,
}

impl MaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskKind::G2 => "G2",
            MaskKind::K0 => "K0",
            MaskKind::K5 => "K5",
            MaskKind::M2 => "M2",
        }
    }
}

impl fmt::Display for MaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskKind {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "G2" => Ok(MaskKind::G2),
            "K0" => Ok(MaskKind::K0),
            "K5" => Ok(MaskKind::K5),
            "M2" => Ok(MaskKind::M2),
            _ => Err(MaskError::UnknownKind(s.to_string())),
        }
    }
}

/// One mask feature: the wavelength window it covers and its weight.
#[derive(Debug, Clone, Copy)]
pub struct MaskLine {
    pub start: f64,
    pub end: f64,
    pub weight: f64,
}

/// All features of one mask, in file order.
#[derive(Debug, Clone)]
pub struct LineMask {
    pub lines: Vec<MaskLine>,
}

impl LineMask {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Features lying strictly inside `(wave_min, wave_max)`: the feature
    /// must start after `wave_min` and end before `wave_max`.
    pub fn lines_within(&self, wave_min: f64, wave_max: f64) -> Vec<MaskLine> {
        self.lines
            .iter()
            .filter(|l| l.start > wave_min && l.end < wave_max)
            .copied()
            .collect()
    }

    fn parse(text: &str, path: &Path) -> Result<Self, MaskError> {
        let mut lines = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut cols = trimmed.split_whitespace().map(|c| c.parse::<f64>());
            match (cols.next(), cols.next(), cols.next()) {
                (Some(Ok(start)), Some(Ok(end)), Some(Ok(weight))) => {
                    lines.push(MaskLine { start, end, weight });
                }
                _ => {
                    return Err(MaskError::Malformed {
                        path: path.to_path_buf(),
                        line: i + 1,
                    });
                }
            }
        }
        Ok(Self { lines })
    }
}

/// Lazy-loading cache of line masks under one directory.
pub struct MaskStore {
    dir: PathBuf,
    cache: HashMap<MaskKind, Arc<LineMask>>,
}

impl MaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch a mask, reading `<dir>/<kind>.mas` on first use.
    pub fn get(&mut self, kind: MaskKind) -> Result<Arc<LineMask>, MaskError> {
        if let Some(mask) = self.cache.get(&kind) {
            return Ok(Arc::clone(mask));
        }
        let path = self.dir.join(format!("{}.mas", kind.as_str()));
        let text = std::fs::read_to_string(&path).map_err(|source| MaskError::Io {
            path: path.clone(),
            source,
        })?;
        let mask = Arc::new(LineMask::parse(&text, &path)?);
        self.cache.insert(kind, Arc::clone(&mask));
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plage_masks_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_mask(dir: &Path, kind: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{kind}.mas"))).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn parse_and_query() {
        let dir = temp_dir("parse");
        write_mask(
            &dir,
            "G2",
            "5000.0 5000.2 0.8\n5500.1 5500.3 0.5\n\n# comment\n6000.0 6000.4 0.9\n",
        );

        let mut store = MaskStore::new(&dir);
        let mask = store.get(MaskKind::G2).unwrap();
        assert_eq!(mask.len(), 3);
        assert_eq!(mask.lines[1].weight, 0.5);

        // Strict window: a feature touching an endpoint is excluded.
        let inside = mask.lines_within(5000.0, 6000.4);
        assert_eq!(inside.len(), 2);
        assert_eq!(inside[0].start, 5500.1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cache_returns_shared_mask() {
        let dir = temp_dir("cache");
        write_mask(&dir, "K5", "4000.0 4000.1 1.0\n");

        let mut store = MaskStore::new(&dir);
        let a = store.get(MaskKind::K5).unwrap();
        let b = store.get(MaskKind::K5).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_line_reports_position() {
        let dir = temp_dir("malformed");
        write_mask(&dir, "M2", "4000.0 4000.1 1.0\n4100.0 oops 1.0\n");

        let mut store = MaskStore::new(&dir);
        let err = store.get(MaskKind::M2).unwrap_err();
        match err {
            MaskError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = temp_dir("missing");
        let mut store = MaskStore::new(&dir);
        assert!(matches!(store.get(MaskKind::K0), Err(MaskError::Io { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("g2".parse::<MaskKind>().unwrap(), MaskKind::G2);
        assert_eq!("M2".parse::<MaskKind>().unwrap(), MaskKind::M2);
        assert!(matches!(
            "F5".parse::<MaskKind>(),
            Err(MaskError::UnknownKind(_))
        ));
    }
}
