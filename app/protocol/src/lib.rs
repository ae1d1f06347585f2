//! Tasker wire protocol types shared between the agent core, its egress
//! transport and linked peers.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

pub mod codec;
mod response;

pub use response::{
    DownloadResponse, MORE_CHUNKS, PieceResponse, Response, ResponseResult, Status, UploadRequest,
    UploadResponse,
};

/// A unit of work sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique task identifier.
    pub id: CompactString,
    /// Command name used to route the task.
    pub command: CompactString,
    /// Command parameters, usually a JSON document.
    #[serde(default)]
    pub parameters: String,
}

impl Task {
    /// Create a task from its parts.
    pub fn new(
        id: impl Into<CompactString>,
        command: impl Into<CompactString>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            parameters: parameters.into(),
        }
    }
}

/// Opaque, pre-serialized payload relayed between a linked peer and the
/// controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateMessage {
    /// The relayed payload.
    pub message: String,
}

impl DelegateMessage {
    /// Wrap a payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Derived execution status of an active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Dispatched and not yet complete.
    Started,
    /// Registered but not yet dispatched.
    Queued,
}

/// One entry of the `jobs` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Task id of the job.
    pub id: CompactString,
    /// Command the job runs.
    pub command: CompactString,
    /// Derived status.
    pub status: JobStatus,
}
