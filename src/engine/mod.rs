mod action;
mod handle;
mod runner;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

pub use crate::engine::action::{Action, Invocation, Pipeline};
pub use crate::engine::handle::{Dependencies, Frontier, TaskId};
pub use crate::engine::runner::{Diagnostics, DryRun, Executor, LocalExecutor, TaskExecution};

/// A single node of the plan.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub(crate) name: String,
    pub(crate) action: Action,
    pub(crate) memory_mb: Option<u64>,
    pub(crate) force_local: bool,
    pub(crate) reads: Vec<Utf8PathBuf>,
    pub(crate) writes: Vec<Utf8PathBuf>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Memory hint in megabytes, if one was given.
    pub fn memory_mb(&self) -> Option<u64> {
        self.memory_mb
    }

    /// Whether the task must run on the submitting host even under a cluster
    /// backend. Directory management and light bookkeeping tasks are.
    pub fn is_local(&self) -> bool {
        self.force_local
    }

    pub fn reads(&self) -> &[Utf8PathBuf] {
        &self.reads
    }

    pub fn writes(&self) -> &[Utf8PathBuf] {
        &self.writes
    }

    /// Whether the task reads or writes anything under `dir`.
    pub(crate) fn touches(&self, dir: &Utf8Path) -> bool {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .any(|path| path.starts_with(dir))
    }
}
