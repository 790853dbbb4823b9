use crate::Blueprint;
use crate::engine::{Frontier, Invocation};
use crate::error::PlanError;
use crate::flow::collate::InputList;
use crate::flow::staging::Staging;
use crate::flow::{FlowContext, pre_join};

/// Chromosome depth estimation for the high depth filter. Runs over the
/// normal alignments, or the tumor alignments when there are no normals; one
/// task per (alignment, chromosome) pair.
pub(crate) fn build(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    dependencies: &Frontier,
) -> Result<Frontier, PlanError> {
    if !ctx.features.run_depth {
        return Ok(Frontier::new());
    }

    let alignments = if !ctx.config.normal_alignments.is_empty() {
        &ctx.config.normal_alignments
    } else if !ctx.config.tumor_alignments.is_empty() {
        &ctx.config.tumor_alignments
    } else {
        return Ok(Frontier::new());
    };

    let layout = ctx.layout;
    let programs = &ctx.config.programs;

    let staging = Staging::create(
        plan,
        prefix,
        "makeTmpDir",
        layout.chrom_depth_staging(),
        dependencies,
    )?;

    let mut parts = Vec::new();
    let mut tasks = Frontier::new();

    for (a, alignment) in alignments.iter().enumerate() {
        for (c, chrom) in ctx.genome.chromosomes().iter().enumerate() {
            let part = layout.chrom_depth_part(a, c);

            tasks.insert(
                plan.task(pre_join(prefix, format_args!("estimateDepth_{a:03}_{c:05}")))
                    .depends_on(staging.task())
                    .reads([alignment])
                    .writes([&part])
                    .run(
                        Invocation::new(&programs.chrom_depth)
                            .opt("--align-file", alignment)
                            .opt("--chrom", &chrom.name)
                            .opt("--output-file", &part),
                    )?,
            );

            parts.push(part);
        }
    }

    let list = layout.chrom_depth_list();
    let depth = layout.chrom_depth();

    let merge = InputList {
        name: pre_join(prefix, "mergeChromDepthInputList"),
        path: list.clone(),
        inputs: parts,
    }
    .merge(plan, &tasks, pre_join(prefix, "mergeChromDepth"))?
    .force_local()
    .writes([&depth])
    .run(
        Invocation::new(&programs.merge_chrom_depth)
            .opt("--chrom-depth-file-list", &list)
            .opt("--output-file", &depth),
    )?;

    staging.schedule_cleanup(ctx, plan, "rmTmpDir", merge)?;

    Ok(Frontier::from_iter([merge]))
}
