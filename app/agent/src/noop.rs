//! Subsystems for builds without execution or shell support.

use crate::{
    hook::{ExecutionOutput, Hook, ShellOutput},
    job::Job,
    plugin::{PluginRegistry, Unsupported},
};
use protocol::ResponseResult;

/// Execution subsystem that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExecution;

impl ExecutionOutput for NoExecution {
    async fn execute(&self, job: &Job) -> ResponseResult {
        ResponseResult::error(job.id(), "Assembly execution is not available")
    }

    fn is_running(&self) -> bool {
        false
    }

    async fn get_output(&self) -> ResponseResult {
        ResponseResult::default()
    }
}

/// Shell subsystem that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShell;

impl ShellOutput for NoShell {
    async fn exec(&self, job: &Job) -> ResponseResult {
        ResponseResult::error(job.id(), "Shell execution is not available")
    }

    fn has_running_jobs(&self) -> bool {
        false
    }

    async fn get_output(&self) -> Vec<ResponseResult> {
        Vec::new()
    }
}

/// Wiring for builds that only load plugins and run no assemblies or shells.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHook;

impl Hook for DefaultHook {
    type Plugins = PluginRegistry<Unsupported>;
    type Execution = NoExecution;
    type Shell = NoShell;
}
