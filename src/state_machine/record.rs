use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{Event, FileState};
use crate::archive::ArchiveLabel;
use crate::error::IntakeError;
use crate::work_order::WorkOrder;

/// Tracks one file as it moves through the state machine.
#[derive(Debug, Clone)]
pub struct FileTracker {
    pub file_name: String,
    pub state: FileState,
    pub state_history: Vec<FileState>,
    pub work_order: Option<WorkOrder>,
    pub rejection: Option<String>,
    pub collector_attempts: u32,
    pub collector_error: Option<String>,
    /// `None` when sync never ran for this file.
    pub synced: Option<bool>,
    pub archive_path: Option<PathBuf>,
    pub archive_error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl FileTracker {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            state: FileState::Discovered,
            state_history: Vec::new(),
            work_order: None,
            rejection: None,
            collector_attempts: 0,
            collector_error: None,
            synced: None,
            archive_path: None,
            archive_error: None,
            started_at: Utc::now(),
        }
    }

    /// Applies `event`, recording the state left behind.
    pub fn apply(&mut self, event: Event) -> Result<FileState, IntakeError> {
        let next = self.state.next(event)?;
        self.state_history.push(self.state);
        self.state = next;
        Ok(next)
    }

    pub fn sr_number(&self) -> Option<&str> {
        self.work_order.as_ref().map(|o| o.sr_number.as_str())
    }

    /// Archive label: the SR number, or `invalid` when none was parsed.
    pub fn label(&self) -> ArchiveLabel {
        match self.sr_number() {
            Some(sr) => ArchiveLabel::Sr(sr.to_string()),
            None => ArchiveLabel::Invalid,
        }
    }
}

/// Audit record written to the activity log once a file is done.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub file_name: String,
    pub sr_number: Option<String>,
    pub hostname: Option<String>,
    pub final_state: FileState,
    pub state_transitions: Vec<FileState>,
    pub rejection: Option<String>,
    pub collector_attempts: u32,
    pub collector_error: Option<String>,
    pub synced: Option<bool>,
    pub archive_path: Option<PathBuf>,
    pub archive_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl FileRecord {
    pub fn from_tracker(tracker: &FileTracker) -> Self {
        let now = Utc::now();
        let mut transitions = tracker.state_history.clone();
        transitions.push(tracker.state);

        Self {
            file_name: tracker.file_name.clone(),
            sr_number: tracker.sr_number().map(str::to_string),
            hostname: tracker.work_order.as_ref().map(|o| o.hostname.clone()),
            final_state: tracker.state,
            state_transitions: transitions,
            rejection: tracker.rejection.clone(),
            collector_attempts: tracker.collector_attempts,
            collector_error: tracker.collector_error.clone(),
            synced: tracker.synced,
            archive_path: tracker.archive_path.clone(),
            archive_error: tracker.archive_error.clone(),
            started_at: tracker.started_at,
            completed_at: now,
            duration_ms: (now - tracker.started_at).num_milliseconds(),
        }
    }
}
