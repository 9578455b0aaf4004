//! Status-tagged archive for processed work-order files.
//!
//! Entries are named `{label}_{YYYYMMDD_HHMMSS}_{status}` and never
//! overwritten. Only [`Archiver::cleanup`] deletes them.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IntakeError;

/// Outcome tag written into the archive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Success,
    Failed,
    Duplicate,
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveStatus::Success => write!(f, "success"),
            ArchiveStatus::Failed => write!(f, "failed"),
            ArchiveStatus::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Identifier part of the archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLabel {
    Sr(String),
    /// The file failed validation before an SR number could be read.
    Invalid,
}

impl fmt::Display for ArchiveLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveLabel::Sr(sr) => f.write_str(sr),
            ArchiveLabel::Invalid => f.write_str("invalid"),
        }
    }
}

/// Timestamp layout used in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Builds an archive entry name.
pub fn entry_name(label: &ArchiveLabel, at: DateTime<Local>, status: ArchiveStatus) -> String {
    format!("{label}_{}_{status}", at.format(TIMESTAMP_FORMAT))
}

/// Moves processed files into the archive directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Moves `file` into the archive and returns its new path.
    pub fn archive(
        &self,
        file: &Path,
        label: &ArchiveLabel,
        status: ArchiveStatus,
    ) -> Result<PathBuf, IntakeError> {
        self.archive_at(file, label, status, Local::now())
    }

    pub fn archive_at(
        &self,
        file: &Path,
        label: &ArchiveLabel,
        status: ArchiveStatus,
        at: DateTime<Local>,
    ) -> Result<PathBuf, IntakeError> {
        let io_err = |source: io::Error| IntakeError::ArchiveIo {
            path: file.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let target = self.free_name(&entry_name(label, at, status));
        move_file(file, &target).map_err(io_err)?;

        info!(
            file = %file.display(),
            archived = %target.display(),
            %status,
            "archived"
        );
        Ok(target)
    }

    // Appends `.1`, `.2`, ... until the name is unused.
    fn free_name(&self, name: &str) -> PathBuf {
        let base = self.dir.join(name);
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.dir.join(format!("{name}.{n}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }

    /// Deletes archive entries last modified more than `retention_days` ago.
    pub fn cleanup(&self, retention_days: u64) -> Result<usize, IntakeError> {
        let max_age = Duration::from_secs(retention_days * 24 * 60 * 60);
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup_before(cutoff)
    }

    pub fn cleanup_before(&self, cutoff: SystemTime) -> Result<usize, IntakeError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if modified < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!(path = %entry.path().display(), "removed expired archive entry");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove"),
                }
            }
        }

        info!(removed, dir = %self.dir.display(), "archive cleanup finished");
        Ok(removed)
    }
}

// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) if from.is_file() => {
            debug!(error = %rename_err, "rename failed, copying instead");
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}
