use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runtime executable could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Waiting on or killing the child failed.
    #[error("I/O error while running scenario: {0}")]
    Io(#[from] io::Error),
    /// Writing a monitor report failed.
    #[error("failed to write report: {0}")]
    Report(#[from] serde_json::Error),
}
