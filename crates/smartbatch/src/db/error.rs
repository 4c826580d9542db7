use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored task row could not be turned back into a task.
    #[error("Invalid stored row for generation {generation_id}: {reason}")]
    InvalidRow {
        generation_id: String,
        reason: String,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
