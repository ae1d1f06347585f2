//! Agent → controller file transfer.

use super::{Shared, Transfers, display_path, path_param};
use crate::{Error, Result, cancel::CancelHandle, job::Job};
use base64::{Engine, engine::general_purpose::STANDARD};
use compact_str::CompactString;
use protocol::{DownloadResponse, ResponseResult};
use std::{io::SeekFrom, path::PathBuf};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// Chunk state of one download.
#[derive(Debug)]
pub struct DownloadJob {
    pub task_id: CompactString,
    /// Controller file id, seeded by the first continuation.
    pub file_id: Option<CompactString>,
    pub path: PathBuf,
    pub full_path: String,
    pub chunk_size: u64,
    /// Known up front from the file size.
    pub total_chunks: u64,
    /// Number of chunks sent so far; chunk numbers are 1-based.
    pub chunk_num: u64,
    pub cancel: CancelHandle,
    file: Option<File>,
}

impl DownloadJob {
    /// Whether every chunk has been sent.
    pub fn is_complete(&self) -> bool {
        self.chunk_num == self.total_chunks
    }
}

/// Owner of every in-flight download.
pub struct DownloadHandler {
    transfers: Transfers<DownloadJob>,
    chunk_size: u64,
}

impl DownloadHandler {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            transfers: Transfers::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn contains_job(&self, task_id: &str) -> bool {
        self.transfers.contains(task_id)
    }

    /// Number of in-flight downloads.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open the source file and register the transfer.
    ///
    /// Returns the announcement carrying the real chunk count; the
    /// controller answers it with a file id.
    pub async fn start_download_job(&self, job: &Job) -> Result<DownloadResponse> {
        if self.contains_job(job.id()) {
            return Err(Error::TransferExists(job.task.id.clone()));
        }

        let path = path_param(&job.task.parameters, &["path", "file"])?;
        let file = File::open(&path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(Error::InvalidParameters(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let total_chunks = meta.len().div_ceil(self.chunk_size);
        let full_path = display_path(&path);
        self.transfers.insert(
            job.id(),
            DownloadJob {
                task_id: job.task.id.clone(),
                file_id: None,
                path,
                full_path: full_path.clone(),
                chunk_size: self.chunk_size,
                total_chunks,
                chunk_num: 0,
                cancel: job.cancel_handle().clone(),
                file: Some(file),
            },
        )?;

        tracing::info!(
            "download {} started: {full_path} in {total_chunks} chunks",
            job.id()
        );
        Ok(DownloadResponse {
            result: ResponseResult::partial(job.id(), ""),
            file_id: None,
            chunk_num: 0,
            chunk_data: String::new(),
            total_chunks: total_chunks as i64,
            full_path,
        })
    }

    pub fn get_job(&self, task_id: &str) -> Result<Shared<DownloadJob>> {
        self.transfers.get(task_id)
    }

    /// Read chunk `job.chunk_num` and return it base64 encoded.
    ///
    /// Chunk zero is the announcement and carries no data.
    pub async fn download_next_chunk(&self, job: &mut DownloadJob) -> Result<String> {
        if job.chunk_num == 0 {
            return Ok(String::new());
        }
        let file = match job.file.as_mut() {
            Some(file) => file,
            None => {
                return Err(Error::TransferProtocol(format!(
                    "source of download {} is closed",
                    job.task_id
                )));
            }
        };

        let offset = (job.chunk_num - 1) * job.chunk_size;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(job.chunk_size as usize);
        (&mut *file)
            .take(job.chunk_size)
            .read_to_end(&mut buf)
            .await?;
        Ok(STANDARD.encode(&buf))
    }

    /// Close the source and forget the transfer.
    ///
    /// Callers must not hold the entry's lock.
    pub async fn complete_job(&self, task_id: &str) -> bool {
        let Some(entry) = self.transfers.remove(task_id) else {
            return false;
        };
        let mut job = entry.lock().await;
        job.file.take();
        tracing::info!(
            "download {task_id} closed after {}/{} chunks",
            job.chunk_num,
            job.total_chunks
        );
        true
    }
}
