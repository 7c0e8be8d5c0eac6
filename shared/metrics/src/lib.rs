use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identifying metadata written once at the head of a run's telemetry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_name: String,
    pub node_type: String,
    pub competition: String,
    pub uid: Option<u32>,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub epoch: u32,
    pub loss: f64,
    pub lr: f64,
    pub timestamp_ms: i64,
}

impl StepRecord {
    pub fn new(step: u32, epoch: u32, loss: f64, lr: f64) -> Self {
        Self {
            step,
            epoch,
            loss,
            lr,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u32,
    pub avg_loss: f64,
    pub best_avg_loss: f64,
    pub n_batches: usize,
    pub timestamp_ms: i64,
}

impl EpochRecord {
    pub fn new(epoch: u32, avg_loss: f64, best_avg_loss: f64, n_batches: usize) -> Self {
        Self {
            epoch,
            avg_loss,
            best_avg_loss,
            n_batches,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Destination for run telemetry. Implementations are best effort; callers
/// log and continue when a sink errors.
pub trait TelemetrySink: Send {
    fn log_step(&mut self, record: &StepRecord) -> io::Result<()>;
    fn log_epoch(&mut self, record: &EpochRecord) -> io::Result<()>;
    /// Notes a local artifact (e.g. a checkpoint directory) produced by the run.
    fn save_artifact(&mut self, path: &Path) -> io::Result<()>;
    /// Must be called on every exit path, success or not.
    fn finish(&mut self) -> io::Result<()>;
}

/// Discards everything.
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn log_step(&mut self, _: &StepRecord) -> io::Result<()> {
        Ok(())
    }
    fn log_epoch(&mut self, _: &EpochRecord) -> io::Result<()> {
        Ok(())
    }
    fn save_artifact(&mut self, _: &Path) -> io::Result<()> {
        Ok(())
    }
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Append-only JSON-lines telemetry. One tagged object per line, easy to
/// tail and to slurp into analysis notebooks afterwards.
pub struct JsonlTelemetry {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonlTelemetry {
    pub fn start_run(path: &Path, metadata: &RunMetadata) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut telemetry = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        };
        telemetry.write_line(&serde_json::json!({ "run_start": metadata }))?;
        Ok(telemetry)
    }

    fn write_line(&mut self, value: &serde_json::Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn log_step(&mut self, record: &StepRecord) -> io::Result<()> {
        self.write_line(&serde_json::json!({ "step": record }))
    }

    fn log_epoch(&mut self, record: &EpochRecord) -> io::Result<()> {
        self.write_line(&serde_json::json!({ "epoch": record }))
    }

    fn save_artifact(&mut self, path: &Path) -> io::Result<()> {
        self.write_line(&serde_json::json!({ "artifact": path.display().to_string() }))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.write_line(&serde_json::json!({
            "run_finish": chrono::Utc::now().timestamp_millis()
        }))?;
        self.writer.flush()
    }
}

impl Drop for JsonlTelemetry {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), "failed to flush telemetry on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RunMetadata {
        RunMetadata {
            run_name: "2026-01-01_00-00-00".into(),
            node_type: "miner".into(),
            competition: "b3".into(),
            uid: Some(7),
            version: "0.1.0".into(),
        }
    }

    #[test]
    fn records_are_valid_tagged_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");

        let mut sink = JsonlTelemetry::start_run(&path, &metadata()).unwrap();
        sink.log_step(&StepRecord::new(1, 0, 3.5, 1e-5)).unwrap();
        sink.log_epoch(&EpochRecord::new(0, 3.2, 3.2, 10)).unwrap();
        sink.save_artifact(Path::new("/tmp/ckpt")).unwrap();
        sink.finish().unwrap();
        drop(sink);

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].get("run_start").is_some());
        assert_eq!(lines[1]["step"]["loss"], 3.5);
        assert_eq!(lines[2]["epoch"]["n_batches"], 10);
        assert!(lines[4].get("run_finish").is_some());
    }
}
