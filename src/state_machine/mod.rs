mod record;
mod state;

pub use record::{FileRecord, FileTracker};
pub use state::{Event, FileState};
