//! Hourly log partitions
//!
//! Every wall-clock hour gets its own CSV file,
//! `<directory>/Food_<YYYYMMDD>_<HH>.csv`, created lazily with a single
//! header row. Partitions are append-only: each row is written by opening the
//! file, appending and closing it again, so no handle outlives a tick and a
//! reader always sees whole rows.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::constants::partition;
use crate::error::{FoodlogError, Result};

/// Row terminator (RFC 4180)
const LINE_TERMINATOR: &str = "\r\n";

/// Identifier of one hourly partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(PathBuf);

impl PartitionId {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps wall-clock time to a partition and writes rows into it
#[derive(Debug, Clone)]
pub struct LogFileRotator {
    directory: PathBuf,
    prefix: String,
    extension: String,
}

impl LogFileRotator {
    /// `Food_*.csv` partitions in `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_naming(directory, partition::PREFIX, partition::EXTENSION)
    }

    pub fn with_naming(
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Partition covering the hour of `now`. Pure: minutes and seconds are ignored.
    pub fn current_partition(&self, now: NaiveDateTime) -> PartitionId {
        let name = format!(
            "{}_{}.{}",
            self.prefix,
            now.format(partition::NAME_TIME_FORMAT),
            self.extension
        );
        PartitionId(self.directory.join(name))
    }

    /// Create the partition with its header if it does not exist yet.
    ///
    /// Returns `true` when the file was created by this call. An existing
    /// file is never truncated and never gets a second header.
    pub fn ensure_open(&self, id: &PartitionId) -> Result<bool> {
        if id.path().exists() {
            return Ok(false);
        }

        fs::create_dir_all(&self.directory)
            .map_err(|e| FoodlogError::storage(&self.directory, e))?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(id.path()) {
            Ok(f) => f,
            // Raced with another writer; it owns the header
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(FoodlogError::storage(id.path(), e)),
        };

        let header = format!("{}{}", partition::HEADER.join(","), LINE_TERMINATOR);
        write_line(&mut file, &header).map_err(|e| FoodlogError::storage(id.path(), e))?;

        info!(partition = %id, "Created log partition");
        Ok(true)
    }

    /// Append one `(timestamp, value)` row to an ensured partition
    pub fn append(&self, id: &PartitionId, timestamp: &str, value_mm: f64) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(id.path())
            .map_err(|e| FoodlogError::storage(id.path(), e))?;

        write_line(&mut file, &format_row(timestamp, value_mm))
            .map_err(|e| FoodlogError::storage(id.path(), e))?;

        debug!(partition = %id.file_name(), timestamp, value_mm, "Appended row");
        Ok(())
    }

    /// Format a tick time for the timestamp column
    pub fn format_timestamp(now: NaiveDateTime) -> String {
        now.format(partition::ROW_TIME_FORMAT).to_string()
    }
}

/// One complete `timestamp,value` row including its terminator
fn format_row(timestamp: &str, value_mm: f64) -> String {
    format!("{},{}{}", timestamp, value_mm, LINE_TERMINATOR)
}

/// Hand a whole line to the writer in a single call
fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
