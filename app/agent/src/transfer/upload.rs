//! Controller → agent file transfer.

use super::{Shared, Transfers, display_path, path_param};
use crate::{Error, Result, cancel::CancelHandle, job::Job, utils::param};
use compact_str::CompactString;
use protocol::{ResponseResult, UploadRequest, UploadResponse};
use std::path::PathBuf;
use tokio::{fs::File, io::AsyncWriteExt};

/// Chunk state of one upload.
#[derive(Debug)]
pub struct UploadJob {
    pub task_id: CompactString,
    pub file_id: CompactString,
    pub path: PathBuf,
    pub full_path: String,
    pub chunk_size: u64,
    /// Unknown until the first piece reports it.
    pub total_chunks: Option<u64>,
    /// Number of chunks written so far.
    pub chunk_num: u64,
    pub cancel: CancelHandle,
    file: Option<File>,
}

impl UploadJob {
    /// Whether every chunk has been written.
    pub fn is_complete(&self) -> bool {
        self.total_chunks == Some(self.chunk_num)
    }

    /// Chunk metadata reporting `chunk_num`.
    pub fn request(&self, chunk_num: u64) -> UploadRequest {
        UploadRequest {
            chunk_num,
            file_id: self.file_id.clone(),
            chunk_size: self.chunk_size,
            full_path: self.full_path.clone(),
        }
    }
}

/// Owner of every in-flight upload.
pub struct UploadHandler {
    transfers: Transfers<UploadJob>,
    chunk_size: u64,
}

impl UploadHandler {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            transfers: Transfers::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn contains_job(&self, task_id: &str) -> bool {
        self.transfers.contains(task_id)
    }

    /// Number of in-flight uploads.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create the destination file and register the transfer.
    ///
    /// Returns the request for chunk 1.
    pub async fn start_upload_job(&self, job: &Job) -> Result<UploadResponse> {
        if self.contains_job(job.id()) {
            return Err(Error::TransferExists(job.task.id.clone()));
        }

        let path = path_param(&job.task.parameters, &["remote_path", "path"])?;
        let file_id = serde_json::from_str::<serde_json::Value>(&job.task.parameters)
            .ok()
            .and_then(|v| param(&v, &["file", "file_id"]).map(CompactString::from))
            .ok_or_else(|| Error::InvalidParameters("missing 'file'".into()))?;

        let file = File::create(&path).await?;
        let state = UploadJob {
            task_id: job.task.id.clone(),
            file_id,
            full_path: display_path(&path),
            path,
            chunk_size: self.chunk_size,
            total_chunks: None,
            chunk_num: 0,
            cancel: job.cancel_handle().clone(),
            file: Some(file),
        };
        let request = state.request(1);
        self.transfers.insert(job.id(), state)?;

        tracing::info!("upload {} started into {}", job.id(), request.full_path);
        Ok(UploadResponse {
            result: ResponseResult::partial(job.id(), ""),
            upload: request,
        })
    }

    pub fn get_job(&self, task_id: &str) -> Result<Shared<UploadJob>> {
        self.transfers.get(task_id)
    }

    /// Append decoded chunk bytes to the destination.
    pub async fn upload_next_chunk(&self, job: &mut UploadJob, bytes: &[u8]) -> Result<()> {
        let Some(file) = job.file.as_mut() else {
            return Err(Error::TransferProtocol(format!(
                "destination of upload {} is closed",
                job.task_id
            )));
        };
        file.write_all(bytes).await?;
        Ok(())
    }

    /// Flush and close the destination and forget the transfer.
    ///
    /// Callers must not hold the entry's lock.
    pub async fn complete_job(&self, task_id: &str) -> bool {
        let Some(entry) = self.transfers.remove(task_id) else {
            return false;
        };
        let mut job = entry.lock().await;
        if let Some(mut file) = job.file.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!("failed to flush upload {task_id}: {e}");
            }
        }
        tracing::info!("upload {task_id} closed after {} chunks", job.chunk_num);
        true
    }
}
