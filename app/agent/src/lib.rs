//! Task-execution core of the tasker agent.
//!
//! The [`Dispatcher`] tracks every task the controller sends as a [`Job`],
//! routes it through the command table and aggregates the results. File
//! transfers run as chunked continuations driven by the controller, and the
//! [`RelayServer`] bridges a pipe-connected peer to the delegate queues.

pub mod cancel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hook;
pub mod job;
pub mod noop;
pub mod notify;
pub mod plugin;
pub mod relay;
pub mod transfer;
pub mod utils;

pub use cancel::CancelHandle;
pub use config::AgentConfig;
pub use context::AppContext;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use hook::{ExecutionOutput, Hook, PluginLoader, ShellOutput};
pub use job::{Job, JobRegistry};
pub use noop::{DefaultHook, NoExecution, NoShell};
pub use notify::{Notification, Notifier};
pub use plugin::{Plugin, PluginFactory, PluginFuture, PluginRegistry, Unsupported};
pub use relay::{PeerConnection, RelayServer, RelayState};
