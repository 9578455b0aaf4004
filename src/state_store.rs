//! Durable record of completed service requests.
//!
//! The processed log is a plain UTF-8 file with one SR number per line. Writes
//! are either a single append or a full atomic overwrite (temp file + rename);
//! there is no in-place read-modify-write.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::IntakeError;

/// Append-only set of processed SR numbers backed by a line-oriented file.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    path: PathBuf,
}

impl ProcessedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact full-line membership test. A missing log is an empty set.
    pub fn is_processed(&self, sr_number: &str) -> Result<bool, IntakeError> {
        Ok(self.read_lines()?.iter().any(|line| line == sr_number))
    }

    /// Appends `sr_number` as a new line and flushes it to disk.
    ///
    /// An unterminated last line (torn append, hand edit) is closed first so
    /// the new entry never merges into it.
    pub fn mark_processed(&self, sr_number: &str) -> Result<(), IntakeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut entry = String::new();
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                entry.push('\n');
            }
        }
        entry.push_str(sr_number);
        entry.push('\n');
        file.write_all(entry.as_bytes())?;
        file.sync_data()?;
        debug!(sr_number, path = %self.path.display(), "marked processed");
        Ok(())
    }

    /// Removes every line equal to `sr_number`, allowing it to be processed again.
    pub fn reset(&self, sr_number: &str) -> Result<(), IntakeError> {
        let lines = self.read_lines()?;
        let kept: Vec<&String> = lines.iter().filter(|line| *line != sr_number).collect();
        let removed = lines.len() - kept.len();
        if removed == 0 {
            return Err(IntakeError::NotFound(sr_number.to_string()));
        }

        let mut contents = String::new();
        for line in kept {
            contents.push_str(line);
            contents.push('\n');
        }
        self.overwrite(&contents)?;
        info!(sr_number, removed, "reset processed entry");
        Ok(())
    }

    /// Unique entries sorted numerically.
    pub fn list(&self) -> Result<Vec<String>, IntakeError> {
        let unique: BTreeSet<String> = self.read_lines()?.into_iter().collect();
        let mut entries: Vec<String> = unique.into_iter().collect();
        entries.sort_by_key(|sr| sr.parse::<u64>().unwrap_or(u64::MAX));
        Ok(entries)
    }

    fn read_lines(&self) -> Result<Vec<String>, IntakeError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(|line| line.trim_end_matches('\r').to_string())
                .filter(|line| !line.is_empty())
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    // Write a sibling temp file, then rename it over the log.
    fn overwrite(&self, contents: &str) -> io::Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "processed.log".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)
    }
}
