//! Result messages flowing back to the controller, and the transfer
//! continuation pieces it sends in return.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// `total_chunks` value tagging an incremental download chunk.
pub const MORE_CHUNKS: i64 = -1;

/// Result status as understood by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No explicit status.
    #[default]
    #[serde(rename = "")]
    Empty,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

/// Generic task result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseResult {
    /// Task this result belongs to.
    pub task_id: CompactString,
    /// Whether this is the terminal result of the task.
    #[serde(default, with = "flag")]
    pub completed: bool,
    /// Result status.
    #[serde(default)]
    pub status: Status,
    /// Human readable output.
    #[serde(default)]
    pub user_output: String,
}

impl ResponseResult {
    /// A terminal, non-error result.
    pub fn done(task_id: impl Into<CompactString>, user_output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            completed: true,
            status: Status::Empty,
            user_output: user_output.into(),
        }
    }

    /// A terminal error result.
    pub fn error(task_id: impl Into<CompactString>, user_output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            completed: true,
            status: Status::Error,
            user_output: user_output.into(),
        }
    }

    /// An incremental result; more will follow for the same task.
    pub fn partial(task_id: impl Into<CompactString>, user_output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            completed: false,
            status: Status::Empty,
            user_output: user_output.into(),
        }
    }
}

/// Chunk request metadata of an upload (controller → agent file).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Chunk number being requested, or the final count once complete.
    pub chunk_num: u64,
    /// Controller file id.
    pub file_id: CompactString,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Destination path on the agent.
    pub full_path: String,
}

/// Upload progress result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub result: ResponseResult,
    pub upload: UploadRequest,
}

/// Download progress result (agent file → controller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    #[serde(flatten)]
    pub result: ResponseResult,
    /// Controller file id, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<CompactString>,
    /// Number of the chunk carried in `chunk_data`.
    pub chunk_num: u64,
    /// Base64 encoded chunk bytes.
    pub chunk_data: String,
    /// Real chunk count, or [`MORE_CHUNKS`] on an incremental chunk.
    pub total_chunks: i64,
    /// Source path on the agent.
    pub full_path: String,
}

/// Any result produced by the agent core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Upload(UploadResponse),
    Download(DownloadResponse),
    Result(ResponseResult),
}

impl Response {
    fn base(&self) -> &ResponseResult {
        match self {
            Self::Result(r) => r,
            Self::Upload(u) => &u.result,
            Self::Download(d) => &d.result,
        }
    }

    /// Task id the result belongs to.
    pub fn task_id(&self) -> &str {
        &self.base().task_id
    }

    /// Whether this is a terminal result.
    pub fn is_completed(&self) -> bool {
        self.base().completed
    }

    /// Result status.
    pub fn status(&self) -> Status {
        self.base().status
    }

    /// Human readable output.
    pub fn user_output(&self) -> &str {
        &self.base().user_output
    }
}

impl From<ResponseResult> for Response {
    fn from(r: ResponseResult) -> Self {
        Self::Result(r)
    }
}

impl From<UploadResponse> for Response {
    fn from(r: UploadResponse) -> Self {
        Self::Upload(r)
    }
}

impl From<DownloadResponse> for Response {
    fn from(r: DownloadResponse) -> Self {
        Self::Download(r)
    }
}

/// A transfer continuation sent by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceResponse {
    pub task_id: CompactString,
    #[serde(default)]
    pub status: CompactString,
    #[serde(default)]
    pub file_id: Option<CompactString>,
    #[serde(default)]
    pub chunk_num: u64,
    #[serde(default)]
    pub chunk_data: String,
    #[serde(default)]
    pub total_chunks: Option<u64>,
}

impl PieceResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    /// The file id, treating an empty string as absent.
    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// `completed` travels as the strings `"true"`/`"false"`.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bool(b) => b,
            Repr::Text(s) => s.eq_ignore_ascii_case("true"),
        })
    }
}
