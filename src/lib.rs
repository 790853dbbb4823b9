#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
pub mod config;
mod engine;
mod error;
mod flow;
pub mod genome;
mod mode;
pub mod paths;
mod utils;

use std::time::Instant;

pub use crate::blueprint::{Blueprint, CleanupViolation, TaskDef};
pub use crate::config::RunConfig;
pub use crate::engine::{
    Action, Dependencies, Diagnostics, DryRun, Executor, Frontier, Invocation, LocalExecutor,
    Pipeline, Task, TaskExecution, TaskId,
};
pub use crate::error::*;
pub use crate::genome::GenomeIndex;
pub use crate::mode::{Features, RunMode};
pub use crate::paths::{RunLayout, VariantKind};
pub use crate::utils::as_overhead;
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

use crate::flow::FlowContext;

/// A fully planned run.
///
/// `Workflow` owns the task graph together with the layout and the features
/// it was planned for. Planning never touches the file system apart from
/// reading the reference index; directories are created by the executor.
///
/// # Example
///
/// ```rust,no_run
/// use svflow::{LocalExecutor, RunConfig, Workflow};
///
/// let mut config = RunConfig::new("SVWorkflow", "genome.fa");
/// config.normal_alignments.push("sample.bam".into());
///
/// let workflow = Workflow::plan(&config)?;
/// workflow.run(&LocalExecutor::new(8))?;
/// # Ok::<(), svflow::SvflowError>(())
/// ```
#[derive(Debug)]
pub struct Workflow {
    blueprint: Blueprint,
    layout: RunLayout,
    features: Features,
    frontier: Frontier,
}

impl Workflow {
    /// Validates the configuration, reads the reference index and plans the run.
    pub fn plan(config: &RunConfig) -> Result<Self, SvflowError> {
        config.validate()?;
        let genome = GenomeIndex::load(config.reference())?;
        Ok(Self::plan_with_genome(config, &genome)?)
    }

    /// Plans the run against an already loaded genome index.
    pub fn plan_with_genome(config: &RunConfig, genome: &GenomeIndex) -> Result<Self, PlanError> {
        let s = Instant::now();
        config.validate()?;

        let layout = RunLayout::new(config);
        let features = Features::resolve(config);
        let mut blueprint = Blueprint::new();

        let ctx = FlowContext {
            config,
            genome,
            layout: &layout,
            features,
        };

        let frontier = flow::build(&ctx, &mut blueprint)?;

        tracing::info!(
            mode = %features.mode,
            tasks = blueprint.len(),
            "Planned workflow {}",
            as_overhead(s)
        );

        Ok(Self {
            blueprint,
            layout,
            features,
            frontier,
        })
    }

    /// Hands the planned graph to an executor.
    pub fn run(&self, executor: &impl Executor) -> Result<Diagnostics, SvflowError> {
        Ok(executor.execute(self)?)
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn features(&self) -> Features {
        self.features
    }

    /// The tasks whose completion marks the end of the run.
    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }
}
