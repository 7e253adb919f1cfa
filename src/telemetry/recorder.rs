//! JSONL telemetry recorder with file rotation.
//!
//! Each line is one [`TelemetryRecord`]. A new file is opened after
//! `max_records_per_file` records, and only the newest `max_files_to_keep`
//! recorder files are left in the directory.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::protocol::Telemetry;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One recorded telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// RFC 3339 timestamp
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

impl TelemetryRecord {
    /// Stamps `telemetry` with the current time.
    pub fn now(telemetry: Telemetry) -> Self {
        Self {
            timestamp: Utc::now(),
            telemetry,
        }
    }
}

/// Writes telemetry records to rotating JSONL files.
#[derive(Debug)]
pub struct TelemetryRecorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    total_records: u64,
    files_opened: u64,
}

impl TelemetryRecorder {
    /// Creates a recorder writing into `dir`, creating it if needed.
    ///
    /// No file is opened until the first record.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::Io`](crate::error::GeodriveError::Io) if the
    /// directory cannot be created.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            total_records: 0,
            files_opened: 0,
        })
    }

    /// Creates a recorder from the `[telemetry]` config section.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
        )
    }

    /// Appends a sample stamped with the current time.
    ///
    /// # Errors
    ///
    /// I/O or serialization failures.
    pub fn record(&mut self, telemetry: &Telemetry) -> Result<()> {
        self.write_record(&TelemetryRecord::now(*telemetry))
    }

    /// Appends a pre-built record.
    ///
    /// # Errors
    ///
    /// I/O or serialization failures.
    pub fn write_record(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }

        self.records_in_file += 1;
        self.total_records += 1;
        Ok(())
    }

    /// Records written since creation
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// File currently being written, if any
    pub fn current_file(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Flushes and closes the current file.
    ///
    /// # Errors
    ///
    /// I/O failure while flushing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.current_path = None;
        self.records_in_file = 0;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.close()?;

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.files_opened,
            FILE_EXTENSION
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.files_opened += 1;

        info!("Telemetry recording to {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);

        self.prune_old_files()
    }

    fn prune_old_files(&self) -> Result<()> {
        let mut files = recorder_files(&self.dir)?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        // Names embed a sortable timestamp, oldest first after sort
        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to flush telemetry file: {}", e);
        }
    }
}

/// Lists recorder-owned files in `dir`.
fn recorder_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let owned = path.is_file()
            && path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(FILE_PREFIX));
        if owned {
            files.push(path);
        }
    }
    Ok(files)
}
