//! Tests for the job registry and the command dispatcher.

use base64::{Engine, engine::general_purpose::STANDARD};
use compact_str::CompactString;
use parking_lot::Mutex;
use protocol::{JobStatus, JobSummary, Response, ResponseResult, Status, Task};
use std::sync::Arc;
use tasker_agent::{
    AgentConfig, AppContext, Dispatcher, ExecutionOutput, Hook, Job, NoShell, Notification,
    Plugin, PluginFactory, PluginFuture, PluginLoader, PluginRegistry,
};
use tokio::sync::mpsc::UnboundedReceiver;

struct EchoPlugin {
    prefix: String,
}

impl Plugin for EchoPlugin {
    fn run<'a>(&'a self, job: &'a Job) -> PluginFuture<'a> {
        Box::pin(async move {
            ResponseResult::done(job.id(), format!("{}:{}", self.prefix, job.task.parameters))
        })
    }
}

struct EchoFactory;

impl PluginFactory for EchoFactory {
    fn build(&self, _command: &str, blob: &[u8]) -> anyhow::Result<Arc<dyn Plugin>> {
        Ok(Arc::new(EchoPlugin {
            prefix: String::from_utf8_lossy(blob).into_owned(),
        }))
    }
}

/// Execution subsystem that keeps one assembly running until polled.
#[derive(Default)]
struct FakeExecution {
    running: Mutex<Option<CompactString>>,
}

impl ExecutionOutput for FakeExecution {
    async fn execute(&self, job: &Job) -> ResponseResult {
        *self.running.lock() = Some(job.task.id.clone());
        ResponseResult::partial(job.id(), "started")
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    async fn get_output(&self) -> ResponseResult {
        match self.running.lock().take() {
            Some(id) => ResponseResult::done(id, "assembly output"),
            None => ResponseResult::default(),
        }
    }
}

struct TestHook;

impl Hook for TestHook {
    type Plugins = PluginRegistry<EchoFactory>;
    type Execution = FakeExecution;
    type Shell = NoShell;
}

fn dispatcher() -> (Dispatcher<TestHook>, UnboundedReceiver<Notification>) {
    let (ctx, rx) = AppContext::new(AgentConfig::default());
    let dispatcher = Dispatcher::new(
        &ctx,
        PluginRegistry::new(EchoFactory),
        FakeExecution::default(),
        NoShell,
    );
    (dispatcher, rx)
}

async fn run(d: &Dispatcher<TestHook>, id: &str, command: &str, params: &str) -> Vec<Response> {
    d.submit(Task::new(id, command, params)).await;
    d.collect_results().await
}

fn single(mut results: Vec<Response>) -> Response {
    assert_eq!(results.len(), 1, "expected one result, got {results:?}");
    results.remove(0)
}

// --- registration ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submit_creates_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("dest.bin");
    let params = serde_json::json!({ "remote_path": dest, "file": "f1" }).to_string();

    let (d, _rx) = dispatcher();
    let d = Arc::new(d);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let d = Arc::clone(&d);
        let task = Task::new("t1", "upload", params.clone());
        handles.push(tokio::spawn(async move { d.submit(task).await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(d.registry().len(), 1);
    let results = d.collect_results().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Response::Upload(_)));
    assert!(d.has_upload_job("t1"));
}

// --- jobs / jobkill ---

#[tokio::test]
async fn jobs_lists_other_active_jobs() {
    let (d, _rx) = dispatcher();
    let (t2, _) = d.registry().get_or_add(Task::new("t2", "shell", "whoami"));
    t2.mark_started();

    let result = single(run(&d, "t1", "jobs", "").await);
    assert_eq!(result.task_id(), "t1");
    assert!(result.is_completed());

    let listing: Vec<JobSummary> = serde_json::from_str(result.user_output()).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, "t2");
    assert_eq!(listing[0].status, JobStatus::Started);
    assert!(result.user_output().contains("\"Started\""));

    assert!(!d.registry().contains("t1"));
    assert!(d.registry().contains("t2"));
}

#[tokio::test]
async fn jobkill_unknown_id_reports_not_found() {
    let (d, _rx) = dispatcher();
    let result = single(run(&d, "k1", "jobkill", "nope").await);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["task_id"], "k1");
    assert_eq!(json["completed"], "true");
    assert_eq!(json["status"], "error");
    assert_eq!(json["user_output"], "Job nope doesn't exist");
    assert!(d.registry().is_empty());
}

#[tokio::test]
async fn jobkill_cancels_and_unlists() {
    let (d, _rx) = dispatcher();
    let (t2, _) = d.registry().get_or_add(Task::new("t2", "shell", ""));
    t2.mark_started();

    let result = single(run(&d, "k1", "jobkill", r#"{"id": "t2"}"#).await);
    assert_eq!(result.status(), Status::Empty);
    assert!(result.is_completed());
    assert_eq!(result.user_output(), "Cancelled job");
    assert!(t2.cancel_handle().is_cancelled());
    assert!(t2.is_complete());

    let listing = single(run(&d, "j1", "jobs", "").await);
    let listing: Vec<JobSummary> = serde_json::from_str(listing.user_output()).unwrap();
    assert!(listing.is_empty());
}

#[tokio::test]
async fn jobkill_finished_job_succeeds() {
    let (d, _rx) = dispatcher();
    run(&d, "s1", "shell", "id").await;
    assert!(!d.registry().contains("s1"));

    let result = single(run(&d, "k1", "jobkill", "s1").await);
    assert_eq!(result.status(), Status::Empty);
    assert!(d.cancel("s1").is_ok());
    assert!(d.cancel("never-seen").is_err());
}

// --- plugins ---

#[tokio::test]
async fn unknown_command_without_plugin() {
    let (d, _rx) = dispatcher();
    let result = single(run(&d, "p1", "mimic", "").await);
    assert_eq!(result.status(), Status::Error);
    assert!(result.is_completed());
    assert_eq!(
        result.user_output(),
        "Plugin mimic not loaded. Please use the load command to load the plugin!"
    );
    assert!(!d.registry().contains("p1"));
}

#[tokio::test]
async fn load_then_run_plugin() {
    let (d, _rx) = dispatcher();
    let params = serde_json::json!({ "command": "echo", "asm": STANDARD.encode("hi") });

    let loaded = single(run(&d, "l1", "load", &params.to_string()).await);
    assert_eq!(loaded.status(), Status::Empty);
    assert!(d.plugins().is_loaded("echo"));

    let result = single(run(&d, "e1", "echo", "x").await);
    assert_eq!(result.user_output(), "hi:x");

    let reset = single(run(&d, "r1", "reset-assembly-context", "").await);
    assert!(reset.is_completed());
    assert!(!d.plugins().is_loaded("echo"));

    let result = single(run(&d, "e2", "echo", "x").await);
    assert_eq!(result.status(), Status::Error);
}

#[tokio::test]
async fn load_assembly_is_all_or_nothing() {
    let (d, _rx) = dispatcher();
    let params = serde_json::json!({
        "commands": [
            { "command": "good", "asm": STANDARD.encode("a") },
            { "command": "bad", "asm": "!!! not base64" },
        ]
    });

    let result = single(run(&d, "l1", "load-assembly", &params.to_string()).await);
    assert_eq!(result.status(), Status::Error);
    assert!(!d.plugins().is_loaded("good"));
    assert!(!d.plugins().is_loaded("bad"));

    let params = serde_json::json!({
        "commands": [
            { "command": "one", "asm": STANDARD.encode("1") },
            { "command": "two", "asm": STANDARD.encode("2") },
        ]
    });
    let result = single(run(&d, "l2", "load-assembly", &params.to_string()).await);
    assert_eq!(result.status(), Status::Empty);
    assert_eq!(d.plugins().commands(), vec!["one", "two"]);
}

// --- notifications ---

#[tokio::test]
async fn lifecycle_commands_raise_notifications() {
    let (d, mut rx) = dispatcher();
    let cases = [
        ("n1", "exit", "", "exit"),
        ("n2", "link", "host", "start-forwarder"),
        ("n3", "unlink", "host", "stop-forwarder"),
        ("n4", "sleep", "10 20", "sleep"),
        ("n5", "socks", r#"{"action": "start"}"#, "start-socks"),
        ("n6", "socks", r#"{"action": "stop"}"#, "stop-socks"),
    ];

    for (id, command, params, kind) in cases {
        let results = run(&d, id, command, params).await;
        assert!(results.is_empty());

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.kind(), kind);
        assert_eq!(notification.job().id(), id);
        assert_eq!(notification.job().task.parameters, params);
        assert!(!d.registry().contains(id));
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn socks_rejects_malformed_parameters() {
    let (d, mut rx) = dispatcher();
    let result = single(run(&d, "s1", "socks", "start").await);
    assert_eq!(result.status(), Status::Error);
    assert!(rx.try_recv().is_err());
}

// --- execution output ---

#[tokio::test]
async fn execute_assembly_output_is_collected() {
    let (d, _rx) = dispatcher();
    let results = run(&d, "a1", "execute-assembly", "").await;
    assert_eq!(results.len(), 2);
    assert!(!results[0].is_completed());
    assert_eq!(results[0].user_output(), "started");
    assert!(results[1].is_completed());
    assert_eq!(results[1].task_id(), "a1");
    assert_eq!(results[1].user_output(), "assembly output");

    assert!(!d.registry().contains("a1"));
    assert!(d.collect_results().await.is_empty());
}

#[tokio::test]
async fn stop_assembly_without_running_assembly() {
    let (d, _rx) = dispatcher();
    let result = single(run(&d, "x1", "stop-assembly", "").await);
    assert_eq!(result.status(), Status::Error);
}

#[tokio::test]
async fn stop_assembly_cancels_running_assembly() {
    let (d, _rx) = dispatcher();
    d.submit(Task::new("a1", "execute-assembly", "")).await;
    let job = d.registry().get("a1").unwrap();

    d.submit(Task::new("x1", "stop-assembly", "")).await;
    assert!(job.cancel_handle().is_cancelled());
    assert!(!d.registry().contains("a1"));

    let results = d.collect_results().await;
    let stop = results.iter().find(|r| r.task_id() == "x1").unwrap();
    assert_eq!(stop.status(), Status::Empty);
    assert!(stop.is_completed());
    assert_eq!(stop.user_output(), "Cancelled 1 assembly job(s)");
}

// --- aggregation ---

#[tokio::test]
async fn add_responses_preserve_order() {
    let (d, _rx) = dispatcher();
    d.add_response(ResponseResult::partial("a", "1"));
    d.add_responses(vec![
        ResponseResult::partial("b", "2").into(),
        ResponseResult::done("c", "3").into(),
    ]);
    d.add_response(ResponseResult::error("d", "4"));

    let ids: Vec<_> = d
        .collect_results()
        .await
        .iter()
        .map(|r| r.task_id().to_owned())
        .collect();
    assert_eq!(ids, ["a", "b", "c", "d"]);
    assert!(d.collect_results().await.is_empty());
}
