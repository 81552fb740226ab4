//! Structured step logging.
//!
//! Every processing step emits a started/completed/failed event. Events
//! are mirrored to the process log and, when a log path is configured,
//! appended as JSON lines so external monitors can follow a batch
//! without scraping console output.

use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use serde_json::{Value, json};

/// Lifecycle of one processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

/// Receives step events. The JSON-lines writer implements this, as can a
/// progress bar or a test recorder.
pub trait StepSink {
    fn on_step(&mut self, step: &str, status: StepStatus, detail: &Value);
}

/// Sink that drops every event.
pub struct NullSink;

impl StepSink for NullSink {
    fn on_step(&mut self, _step: &str, _status: StepStatus, _detail: &Value) {}
}

/// JSON-lines step log.
///
/// Each event becomes one object `{"timestamp", "step", "status", ...}`
/// with the detail fields flattened in. A write failure downgrades to a
/// process-log warning; the batch keeps running.
pub struct StepLog {
    file: Option<File>,
}

impl StepLog {
    /// Log to the process log only.
    pub fn new() -> Self {
        Self { file: None }
    }

    /// Log that also appends JSON lines to `path`.
    pub fn with_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Some(file) })
    }
}

impl Default for StepLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StepSink for StepLog {
    fn on_step(&mut self, step: &str, status: StepStatus, detail: &Value) {
        let mut entry = json!({
            "timestamp": unix_seconds(),
            "step": step,
            "status": status.as_str(),
        });
        if let (Value::Object(map), Value::Object(extra)) = (&mut entry, detail) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        let line = entry.to_string();
        if let Some(f) = &mut self.file
            && let Err(e) = writeln!(f, "{line}")
        {
            warn!("failed to append step log entry: {e}");
        }
        match status {
            StepStatus::Failed => error!("{line}"),
            StepStatus::Started | StepStatus::Completed => info!("{line}"),
        }
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process;

    #[test]
    fn events_append_as_json_lines() {
        let path = std::env::temp_dir().join(format!("steplog_test_{}.jsonl", process::id()));
        let _ = fs::remove_file(&path);
        {
            let mut log = StepLog::with_file(&path).unwrap();
            log.on_step(
                "load_fits",
                StepStatus::Started,
                &json!({"filename": "spec.fits"}),
            );
            log.on_step("load_fits", StepStatus::Completed, &Value::Null);
        }
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["step"], "load_fits");
        assert_eq!(first["status"], "started");
        assert_eq!(first["filename"], "spec.fits");
        assert!(first["timestamp"].as_f64().unwrap() > 0.0);

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "completed");
        assert!(second.get("filename").is_none());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let path = std::env::temp_dir().join(format!("steplog_append_{}.jsonl", process::id()));
        let _ = fs::remove_file(&path);
        {
            let mut log = StepLog::with_file(&path).unwrap();
            log.on_step("merge_echelle", StepStatus::Started, &Value::Null);
        }
        {
            let mut log = StepLog::with_file(&path).unwrap();
            log.on_step("merge_echelle", StepStatus::Completed, &Value::Null);
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn console_only_log_never_touches_disk() {
        let mut log = StepLog::new();
        // Must not panic without a file.
        log.on_step("s_index", StepStatus::Failed, &json!({"reason": "no coverage"}));
    }
}
