//! Error taxonomy of the agent core.
//!
//! Every kind except [`Error::Transport`] is surfaced to the controller as
//! a terminal error result for the originating task; transport failures
//! are recovered locally by the relay server.

use compact_str::CompactString;
use protocol::{ResponseResult, codec::FrameError};

/// Agent core error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Job {0} doesn't exist")]
    JobNotFound(CompactString),

    #[error("{0}")]
    TransferProtocol(String),

    #[error("A transfer is already active for task {0}")]
    TransferExists(CompactString),

    #[error("Transport failure: {0}")]
    Transport(#[from] FrameError),

    #[error("Plugin {0} not loaded. Please use the load command to load the plugin!")]
    PluginNotLoaded(CompactString),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Agent core result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Render the error as the terminal result of `task_id`.
    pub fn into_response(self, task_id: impl Into<CompactString>) -> ResponseResult {
        ResponseResult::error(task_id, self.to_string())
    }
}
