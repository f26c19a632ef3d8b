//! JSONL run log.
//!
//! One line per completed pipeline run. The file rotates by size; rotated
//! backups are numbered `.1` (newest) to `.keep`, and the newest backup can
//! be gzip-compressed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::pipeline::RunOutcome;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Default)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

/// Appending writer that rotates once the file reaches `max_bytes`.
pub struct RotatingWriter {
    path: PathBuf,
    file: File,
    rotation: RotationConfig,
}

impl RotatingWriter {
    pub fn open(path: impl Into<PathBuf>, rotation: RotationConfig) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            rotation,
        })
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            let size = self.file.metadata().map(|m| m.len()).unwrap_or(0);
            if size >= limit {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn backup_path(&self, idx: usize, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}{}", idx, suffix));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.rotation.keep > 0 {
            // Shift .N-1 -> .N, overwriting whatever sits at .keep.
            for idx in (1..self.rotation.keep).rev() {
                for suffix in ["", ".gz"] {
                    let from = self.backup_path(idx, suffix);
                    if from.exists() {
                        fs::rename(&from, self.backup_path(idx + 1, suffix))?;
                    }
                }
            }
            let newest = self.backup_path(1, "");
            fs::rename(&self.path, &newest)?;
            if self.rotation.compress {
                if let Err(err) = compress_in_place(&newest) {
                    tracing::warn!(path = %newest.display(), error = %err, "failed to compress rotated run log");
                }
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// Replace `path` with `path.gz`.
fn compress_in_place(path: &Path) -> io::Result<()> {
    let data = fs::read(path)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data)?;
    let compressed = encoder.finish()?;
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    fs::write(PathBuf::from(gz_name), compressed)?;
    fs::remove_file(path)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord<'a> {
    pub schema_version: u32,
    pub ts: String,
    pub channel: Option<&'a str>,
    pub outcome: &'static str,
    pub keys: Vec<&'a str>,
    pub resolved: usize,
    pub lookup_failures: usize,
    pub delivered: usize,
    pub reply_failures: usize,
    pub latency_ms: u64,
}

impl<'a> RunRecord<'a> {
    pub fn new(channel: Option<&'a str>, outcome: &'a RunOutcome, latency_ms: u64) -> Self {
        let mut record = RunRecord {
            schema_version: SCHEMA_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            channel,
            outcome: outcome.label(),
            keys: Vec::new(),
            resolved: 0,
            lookup_failures: 0,
            delivered: outcome.messages_delivered(),
            reply_failures: 0,
            latency_ms,
        };
        match outcome {
            RunOutcome::Replied(summary) => {
                record.keys = summary.keys.iter().map(|k| k.as_str()).collect();
                record.resolved = summary.resolved;
                record.lookup_failures = summary.lookup_failures;
                record.reply_failures = summary.reply_failures;
            }
            RunOutcome::SpamGuarded { delivered, .. } => {
                record.reply_failures = usize::from(!*delivered);
            }
            _ => {}
        }
        record
    }
}

/// Where run records go: an optional file and optionally the tracing
/// output.
#[derive(Clone, Default)]
pub struct RunLog {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
}

impl RunLog {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some() || self.log_stdout
    }

    /// Record one run. Returns `false` when the file write failed.
    pub fn emit(&self, record: &RunRecord<'_>) -> bool {
        if self.log_stdout {
            tracing::info!(
                target: "run_log",
                outcome = record.outcome,
                channel = ?record.channel,
                keys = ?record.keys,
                resolved = record.resolved,
                lookup_failures = record.lookup_failures,
                delivered = record.delivered,
                reply_failures = record.reply_failures,
                latency_ms = record.latency_ms,
                "pipeline run"
            );
        }
        let Some(writer) = &self.writer else {
            return true;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialise run record");
                return false;
            }
        };
        let result = match writer.lock() {
            Ok(mut guard) => guard.write_line(&line),
            Err(_) => Err(io::Error::new(io::ErrorKind::Other, "run log writer poisoned")),
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to write run log line");
                false
            }
        }
    }
}
