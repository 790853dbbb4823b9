//! Stage builders. Each stage emits its tasks into the shared [`Blueprint`]
//! and hands back the frontier the next stage has to wait for.

mod collate;
mod depth;
mod hygen;
mod locus;
mod staging;
mod stats;

use std::fmt::Display;

use crate::Blueprint;
use crate::config::RunConfig;
use crate::engine::Frontier;
use crate::error::PlanError;
use crate::genome::{GenomeIndex, Region, segment_groups};
use crate::mode::Features;
use crate::paths::RunLayout;

/// Everything a stage builder reads while planning.
pub(crate) struct FlowContext<'a> {
    pub config: &'a RunConfig,
    pub genome: &'a GenomeIndex,
    pub layout: &'a RunLayout,
    pub features: Features,
}

/// Plans the whole run in the fixed stage order: statistics, depth, locus
/// graph, hypothesis generation. Returns the final frontier.
pub(crate) fn build(ctx: &FlowContext, plan: &mut Blueprint) -> Result<Frontier, PlanError> {
    let regions = ctx
        .config
        .call_regions
        .iter()
        .map(|r| Region::parse(r))
        .collect::<Result<Vec<_>, _>>()?;

    // Partitioning problems are configuration errors and have to surface
    // before the first task exists.
    let groups = segment_groups(ctx.genome, &ctx.config.partition, &regions)?;

    let mut graph_dependencies = Frontier::new();
    graph_dependencies.extend(stage(plan, "alignment statistics", |plan| {
        stats::build(ctx, plan, "getAlignmentStats", &Frontier::new())
    })?);
    graph_dependencies.extend(stage(plan, "chromosome depth", |plan| {
        depth::build(ctx, plan, "getChromDepth", &Frontier::new())
    })?);

    let graph = stage(plan, "locus graph", |plan| {
        locus::build(ctx, plan, "", &groups, &graph_dependencies)
    })?;

    stage(plan, "hypothesis generation", |plan| {
        hygen::build(ctx, plan, "", &graph)
    })
}

fn stage<F>(plan: &mut Blueprint, label: &str, build: F) -> Result<Frontier, PlanError>
where
    F: FnOnce(&mut Blueprint) -> Result<Frontier, PlanError>,
{
    let before = plan.len();
    let frontier = build(plan)?;

    if plan.len() == before {
        tracing::debug!("Skipped {label} stage");
    } else {
        tracing::info!(
            tasks = plan.len() - before,
            frontier = frontier.len(),
            "Planned {label} stage"
        );
    }

    Ok(frontier)
}

/// Joins a stage prefix and a task label.
pub(crate) fn pre_join(prefix: &str, label: impl Display) -> String {
    if prefix.is_empty() {
        label.to_string()
    } else {
        format!("{prefix}_{label}")
    }
}
