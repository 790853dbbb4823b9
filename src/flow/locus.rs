use crate::Blueprint;
use crate::engine::{Frontier, Invocation};
use crate::error::PlanError;
use crate::flow::collate::InputList;
use crate::flow::staging::Staging;
use crate::flow::{FlowContext, pre_join};
use crate::genome::SegmentGroup;

/// Locus graph construction: one estimation task per segment group, merged
/// into the run's graph, which is then validated. The frontier is the
/// validation task.
pub(crate) fn build(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    groups: &[SegmentGroup],
    dependencies: &Frontier,
) -> Result<Frontier, PlanError> {
    let layout = ctx.layout;
    let config = ctx.config;
    let programs = &config.programs;
    let features = ctx.features;

    let stats = layout.align_stats();
    let depth = layout.chrom_depth();
    let graph = layout.locus_graph();

    let staging = Staging::create(
        plan,
        prefix,
        "makeGraphTmpDir",
        layout.locus_graph_staging(),
        dependencies,
    )?;

    let mut parts = Vec::with_capacity(groups.len());
    let mut tasks = Frontier::new();

    for group in groups {
        let part = layout.locus_graph_part(group);

        let mut inputs = vec![stats.clone()];
        if features.high_depth_filter {
            inputs.push(depth.clone());
        }

        let command = Invocation::new(&programs.locus_graph)
            .opt("--output-file", &part)
            .opt("--align-stats", &stats)
            .opts("--region", group.regions())
            .opt("--min-candidate-sv-size", config.thresholds.min_candidate_variant_size)
            .opt("--min-edge-observations", config.thresholds.min_edge_observations)
            .opt("--ref", config.reference())
            .opts("--align-file", &config.normal_alignments)
            .opts("--tumor-align-file", &config.tumor_alignments);

        let command = if features.high_depth_filter {
            command.opt("--chrom-depth", &depth)
        } else {
            command
        };

        let command = command
            .flag_if(features.ignore_anom_proper_pair, "--ignore-anom-proper-pair")
            .flag_if(features.rna, "--rna");

        tasks.insert(
            plan.task(pre_join(prefix, format_args!("makeLocusGraph_{}", group.id())))
                .depends_on(staging.task())
                .memory_mb(config.memory.estimate_mb)
                .reads(&inputs)
                .writes([&part])
                .run(command)?,
        );

        parts.push(part);
    }

    if parts.is_empty() {
        return Err(PlanError::EmptyGraph);
    }

    let list = layout.locus_graph_list();
    let merge = InputList {
        name: pre_join(prefix, "mergeLocusGraphInputList"),
        path: list.clone(),
        inputs: parts,
    }
    .merge(plan, &tasks, pre_join(prefix, "mergeLocusGraph"))?
    .memory_mb(config.memory.merge_mb)
    .writes([&graph])
    .run(
        Invocation::new(&programs.merge_locus_graph)
            .opt("--output-file", &graph)
            .opt("--graph-file-list", &list),
    )?;

    // a separate, explicit validation of the merged graph
    let check = plan
        .task(pre_join(prefix, "checkLocusGraph"))
        .depends_on(merge)
        .memory_mb(config.memory.merge_mb)
        .reads([&graph])
        .run(Invocation::new(&programs.check_locus_graph).opt("--graph-file", &graph))?;

    staging.schedule_cleanup(ctx, plan, "rmTmpDir", merge)?;

    let graph_stats = layout.locus_graph_stats();
    plan.task(pre_join(prefix, "locusGraphStats"))
        .depends_on(merge)
        .memory_mb(config.memory.merge_mb)
        .reads([&graph])
        .writes([&graph_stats])
        .run(
            Invocation::new(&programs.locus_graph_stats)
                .arg("--global")
                .opt("--graph-file", &graph)
                .opt("--output-file", &graph_stats),
        )?;

    Ok(Frontier::from_iter([check]))
}
