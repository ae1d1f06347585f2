//! Chunked file transfers between the agent and the controller.
//!
//! Each handler owns a map of in-flight transfers keyed by task id. Entries
//! sit behind their own async mutex so continuation calls for one task are
//! serialized while different tasks proceed in parallel. Handlers never
//! advance chunk counters themselves; the dispatcher does.

use crate::{Error, Result, utils::param};
use compact_str::CompactString;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, btree_map::Entry},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;

pub mod download;
pub mod upload;

pub use download::{DownloadHandler, DownloadJob};
pub use upload::{UploadHandler, UploadJob};

/// Shared handle to one transfer's state.
pub type Shared<T> = Arc<Mutex<T>>;

/// Task id → transfer state map.
struct Transfers<T> {
    jobs: RwLock<BTreeMap<CompactString, Shared<T>>>,
}

impl<T> Transfers<T> {
    fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
        }
    }

    fn contains(&self, task_id: &str) -> bool {
        self.jobs.read().contains_key(task_id)
    }

    fn get(&self, task_id: &str) -> Result<Shared<T>> {
        self.jobs
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(task_id.into()))
    }

    /// Insert a new transfer; at most one per task id.
    fn insert(&self, task_id: &str, state: T) -> Result<()> {
        match self.jobs.write().entry(task_id.into()) {
            Entry::Occupied(_) => Err(Error::TransferExists(task_id.into())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(state)));
                Ok(())
            }
        }
    }

    fn remove(&self, task_id: &str) -> Option<Shared<T>> {
        self.jobs.write().remove(task_id)
    }

    fn len(&self) -> usize {
        self.jobs.read().len()
    }
}

/// Resolve a path parameter given either raw or as a JSON object.
fn path_param(parameters: &str, keys: &[&str]) -> Result<PathBuf> {
    let trimmed = parameters.trim();
    let path = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => param(&value, keys)
            .map(str::to_owned)
            .ok_or_else(|| Error::InvalidParameters(format!("missing '{}'", keys[0])))?,
        Ok(serde_json::Value::String(s)) => s,
        _ => trimmed.to_owned(),
    };
    if path.is_empty() {
        return Err(Error::InvalidParameters("no path given".into()));
    }
    Ok(PathBuf::from(path))
}

/// Best-effort absolute rendering of a path for reporting.
fn display_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
