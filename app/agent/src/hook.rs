//! Collaborator contracts consumed by the dispatcher.
//!
//! The mechanics behind these subsystems (loading code units, running
//! assemblies, spawning shells) are environment-specific; the dispatcher
//! only relies on the interfaces below.

use crate::job::Job;
use protocol::ResponseResult;
use std::future::Future;

/// Dynamically loaded command units.
pub trait PluginLoader: Send + Sync {
    /// Whether `command` has been loaded.
    fn is_loaded(&self, command: &str) -> bool;

    /// Run a loaded command for `job`.
    fn run(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;

    /// Load a single command unit described by the job parameters.
    fn load(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;

    /// Load several command units at once.
    fn load_bulk(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;

    /// Drop every loaded unit.
    fn reset_context(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;
}

/// Assembly execution subsystem whose output is polled asynchronously.
pub trait ExecutionOutput: Send + Sync {
    /// Start executing for `job`, returning the immediate result.
    fn execute(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;

    /// Whether an execution is in progress or has output pending.
    fn is_running(&self) -> bool;

    /// Take the output produced so far.
    fn get_output(&self) -> impl Future<Output = ResponseResult> + Send;
}

/// Long-running job subsystem (e.g. shell) whose output is polled.
pub trait ShellOutput: Send + Sync {
    /// Start a command for `job`, returning the immediate result.
    fn exec(&self, job: &Job) -> impl Future<Output = ResponseResult> + Send;

    /// Whether any job is still producing output.
    fn has_running_jobs(&self) -> bool;

    /// Take the output of every running job.
    fn get_output(&self) -> impl Future<Output = Vec<ResponseResult>> + Send;
}

/// Type-level wiring of the dispatcher's subsystems.
pub trait Hook: Send + Sync + 'static {
    /// Plugin registry.
    type Plugins: PluginLoader + 'static;
    /// Assembly execution subsystem.
    type Execution: ExecutionOutput + 'static;
    /// Shell subsystem.
    type Shell: ShellOutput + 'static;
}
