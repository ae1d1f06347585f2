//! Capability-scoped plugin registry.
//!
//! Maps command names to executable units built from byte blobs by a
//! [`PluginFactory`]. The concrete loading mechanism lives in the factory;
//! the registry only owns the name → unit mapping and its reset.

use crate::{hook::PluginLoader, job::Job, utils::param};
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use compact_str::CompactString;
use parking_lot::RwLock;
use protocol::ResponseResult;
use serde::Deserialize;
use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

/// Boxed future returned by [`Plugin::run`].
pub type PluginFuture<'a> = Pin<Box<dyn Future<Output = ResponseResult> + Send + 'a>>;

/// A loaded command unit.
pub trait Plugin: Send + Sync {
    /// Run the command for `job`.
    fn run<'a>(&'a self, job: &'a Job) -> PluginFuture<'a>;
}

/// Builds command units from raw blobs.
pub trait PluginFactory: Send + Sync {
    fn build(&self, command: &str, blob: &[u8]) -> Result<Arc<dyn Plugin>>;
}

/// Factory for builds without a loading mechanism; rejects every blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl PluginFactory for Unsupported {
    fn build(&self, command: &str, _blob: &[u8]) -> Result<Arc<dyn Plugin>> {
        anyhow::bail!("loading '{command}' is not supported by this agent")
    }
}

#[derive(Deserialize)]
struct BulkParams {
    commands: Vec<UnitParams>,
}

#[derive(Deserialize)]
struct UnitParams {
    command: CompactString,
    asm: String,
}

/// Registry of loaded command units.
pub struct PluginRegistry<F> {
    factory: F,
    loaded: RwLock<BTreeMap<CompactString, Arc<dyn Plugin>>>,
}

impl<F: PluginFactory> PluginRegistry<F> {
    /// Create an empty registry backed by `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    /// Names of every loaded command.
    pub fn commands(&self) -> Vec<CompactString> {
        self.loaded.read().keys().cloned().collect()
    }

    /// Register an already built unit.
    pub fn insert(&self, command: impl Into<CompactString>, plugin: Arc<dyn Plugin>) {
        self.loaded.write().insert(command.into(), plugin);
    }

    fn build(&self, unit: &UnitParams) -> Result<Arc<dyn Plugin>> {
        let blob = STANDARD
            .decode(unit.asm.trim())
            .with_context(|| format!("invalid blob for '{}'", unit.command))?;
        self.factory.build(&unit.command, &blob)
    }

    fn parse_unit(params: &str) -> Result<UnitParams> {
        let value: serde_json::Value =
            serde_json::from_str(params).context("parameters are not valid JSON")?;
        let command = param(&value, &["command"]).context("missing 'command'")?;
        let asm = param(&value, &["asm"]).context("missing 'asm'")?;
        Ok(UnitParams {
            command: command.into(),
            asm: asm.to_owned(),
        })
    }
}

impl<F: PluginFactory> PluginLoader for PluginRegistry<F> {
    fn is_loaded(&self, command: &str) -> bool {
        self.loaded.read().contains_key(command)
    }

    async fn run(&self, job: &Job) -> ResponseResult {
        let plugin = self.loaded.read().get(job.task.command.as_str()).cloned();
        match plugin {
            Some(plugin) => plugin.run(job).await,
            None => crate::Error::PluginNotLoaded(job.task.command.clone()).into_response(job.id()),
        }
    }

    async fn load(&self, job: &Job) -> ResponseResult {
        let built = Self::parse_unit(&job.task.parameters)
            .and_then(|unit| self.build(&unit).map(|p| (unit.command, p)));
        match built {
            Ok((command, plugin)) => {
                tracing::info!("loaded command '{command}'");
                self.insert(command.clone(), plugin);
                ResponseResult::done(job.id(), format!("Command {command} loaded"))
            }
            Err(e) => ResponseResult::error(job.id(), format!("{e:#}")),
        }
    }

    async fn load_bulk(&self, job: &Job) -> ResponseResult {
        let params: BulkParams = match serde_json::from_str(&job.task.parameters) {
            Ok(params) => params,
            Err(e) => return ResponseResult::error(job.id(), format!("invalid parameters: {e}")),
        };

        let built = params
            .commands
            .iter()
            .map(|unit| self.build(unit).map(|p| (unit.command.clone(), p)))
            .collect::<Result<Vec<_>>>();
        match built {
            Ok(units) => {
                let names: Vec<_> = units.iter().map(|(name, _)| name.to_string()).collect();
                self.loaded.write().extend(units);
                tracing::info!("loaded {} commands", names.len());
                ResponseResult::done(job.id(), format!("Loaded: {}", names.join(", ")))
            }
            Err(e) => ResponseResult::error(job.id(), format!("{e:#}")),
        }
    }

    async fn reset_context(&self, job: &Job) -> ResponseResult {
        let dropped = std::mem::take(&mut *self.loaded.write());
        tracing::info!("reset plugin context, dropped {} commands", dropped.len());
        ResponseResult::done(job.id(), "Plugin context reset")
    }
}
