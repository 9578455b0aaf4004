use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveStatus;
use crate::error::IntakeError;

/// Processing state of one work-order file.
///
/// Every path ends in one of the `Archived*` states:
/// `DISCOVERED → VALIDATED → DISPATCHED → COLLECTED_OK → SYNCED → ARCHIVED_SUCCESS`,
/// with side exits for rejected, duplicate and failed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Discovered,
    Validated,
    Rejected,
    Duplicate,
    Dispatched,
    CollectedOk,
    CollectedFail,
    Synced,
    ArchivedSuccess,
    ArchivedFailed,
    ArchivedInvalid,
    ArchivedDuplicate,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Discovered => "DISCOVERED",
            FileState::Validated => "VALIDATED",
            FileState::Rejected => "REJECTED",
            FileState::Duplicate => "DUPLICATE",
            FileState::Dispatched => "DISPATCHED",
            FileState::CollectedOk => "COLLECTED_OK",
            FileState::CollectedFail => "COLLECTED_FAIL",
            FileState::Synced => "SYNCED",
            FileState::ArchivedSuccess => "ARCHIVED_SUCCESS",
            FileState::ArchivedFailed => "ARCHIVED_FAILED",
            FileState::ArchivedInvalid => "ARCHIVED_INVALID",
            FileState::ArchivedDuplicate => "ARCHIVED_DUPLICATE",
        };
        f.write_str(name)
    }
}

/// Something that happened to a file while it was being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Accepted,
    Rejected,
    AlreadyProcessed,
    Dispatched,
    CollectSucceeded,
    CollectFailed,
    /// Sync ran; its result does not change the path.
    SyncAttempted,
    Archived,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileState::ArchivedSuccess
                | FileState::ArchivedFailed
                | FileState::ArchivedInvalid
                | FileState::ArchivedDuplicate
        )
    }

    /// Archive tag a file in this state is filed under, once processing ends.
    pub fn archive_status(self) -> Option<ArchiveStatus> {
        match self {
            FileState::Synced | FileState::ArchivedSuccess => Some(ArchiveStatus::Success),
            FileState::Duplicate | FileState::ArchivedDuplicate => Some(ArchiveStatus::Duplicate),
            FileState::Rejected
            | FileState::CollectedFail
            | FileState::ArchivedInvalid
            | FileState::ArchivedFailed => Some(ArchiveStatus::Failed),
            _ => None,
        }
    }

    /// Computes the state reached from `self` on `event`.
    pub fn next(self, event: Event) -> Result<FileState, IntakeError> {
        use Event as E;
        use FileState as S;

        let next = match (self, event) {
            (S::Discovered, E::Accepted) => S::Validated,
            (S::Discovered, E::Rejected) => S::Rejected,
            (S::Validated, E::AlreadyProcessed) => S::Duplicate,
            (S::Validated, E::Dispatched) => S::Dispatched,
            (S::Dispatched, E::CollectSucceeded) => S::CollectedOk,
            (S::Dispatched, E::CollectFailed) => S::CollectedFail,
            (S::CollectedOk, E::SyncAttempted) => S::Synced,
            (S::Synced, E::Archived) => S::ArchivedSuccess,
            (S::CollectedFail, E::Archived) => S::ArchivedFailed,
            (S::Rejected, E::Archived) => S::ArchivedInvalid,
            (S::Duplicate, E::Archived) => S::ArchivedDuplicate,
            (from, event) => {
                return Err(IntakeError::InvalidTransition {
                    from: from.to_string(),
                    event: event.to_string(),
                });
            }
        };
        Ok(next)
    }
}
