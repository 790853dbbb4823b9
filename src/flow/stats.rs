use crate::Blueprint;
use crate::engine::{Frontier, Invocation};
use crate::error::PlanError;
use crate::flow::staging::Staging;
use crate::flow::{FlowContext, pre_join};

/// Alignment statistics: one task per alignment file, merged into the single
/// statistics file every later stage reads.
pub(crate) fn build(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    dependencies: &Frontier,
) -> Result<Frontier, PlanError> {
    if !ctx.features.run_stats {
        return Ok(Frontier::new());
    }

    let layout = ctx.layout;
    let programs = &ctx.config.programs;

    let staging = Staging::create(
        plan,
        prefix,
        "makeTmpDir",
        layout.align_stats_staging(),
        dependencies,
    )?;

    let mut parts = Vec::new();
    let mut tasks = Frontier::new();

    for (index, alignment) in ctx.config.alignments().enumerate() {
        let part = layout.align_stats_part(index);

        tasks.insert(
            plan.task(pre_join(prefix, format_args!("generateStats_{index:03}")))
                .depends_on(staging.task())
                .reads([alignment])
                .writes([&part])
                .run(
                    Invocation::new(&programs.align_stats)
                        .opt("--output-file", &part)
                        .opt("--align-file", alignment),
                )?,
        );

        parts.push(part);
    }

    let stats = layout.align_stats();
    let merge = plan
        .task(pre_join(prefix, "mergeStats"))
        .depends_on(&tasks)
        .force_local()
        .reads(&parts)
        .writes([&stats])
        .run(
            Invocation::new(&programs.merge_align_stats)
                .opt("--output-file", &stats)
                .opts("--align-stats-file", &parts),
        )?;

    staging.schedule_cleanup(ctx, plan, "rmTmpDir", merge)?;

    // human readable summary, nothing waits for it
    let summary = layout.align_stats_summary();
    plan.task(pre_join(prefix, "summarizeStats"))
        .depends_on(merge)
        .reads([&stats])
        .writes([&summary])
        .run(
            Invocation::new(&programs.summarize_align_stats)
                .opt("--align-stats", &stats)
                .opt("--output-file", &summary),
        )?;

    Ok(Frontier::from_iter([merge]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::genome::GenomeIndex;
    use crate::mode::Features;
    use crate::paths::RunLayout;

    fn plan_stats(config: &RunConfig) -> (Blueprint, Frontier) {
        let genome = GenomeIndex::from_chromosomes([("chr1", 1000)]);
        let layout = RunLayout::new(config);
        let ctx = FlowContext {
            config,
            genome: &genome,
            layout: &layout,
            features: Features::resolve(config),
        };

        let mut plan = Blueprint::new();
        let frontier = build(&ctx, &mut plan, "getAlignmentStats", &Frontier::new()).unwrap();
        (plan, frontier)
    }

    #[test]
    fn test_one_task_per_alignment() {
        let mut config = RunConfig::new("/run", "/ref.fa");
        config.normal_alignments = vec!["/n1.bam".into(), "/n2.bam".into()];
        config.tumor_alignments = vec!["/t1.bam".into()];

        let (plan, frontier) = plan_stats(&config);

        let merge = plan.find("getAlignmentStats_mergeStats").unwrap();
        assert_eq!(frontier.iter().collect::<Vec<_>>(), vec![merge]);
        assert_eq!(plan.dependencies(merge).len(), 3);

        let generate = plan.get(plan.find("getAlignmentStats_generateStats_002").unwrap());
        assert_eq!(
            generate.action().to_string(),
            "GetAlignmentStats --output-file /run/workspace/alignmentStats.xml.tmpdir/alignmentStats.xml.002.xml --align-file /t1.bam"
        );

        let merge_task = plan.get(merge);
        assert!(merge_task.is_local());
        let files: Vec<_> = merge_task.action().invocations()[0]
            .values_of("--align-stats-file")
            .map(str::to_string)
            .collect();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("alignmentStats.xml.000.xml"));
        assert!(files[2].ends_with("alignmentStats.xml.002.xml"));

        let cleanup = plan.find("getAlignmentStats_rmTmpDir").unwrap();
        assert_eq!(plan.dependencies(cleanup), vec![plan.find("getAlignmentStats_makeTmpDir").unwrap(), merge]);
        assert!(plan.find("getAlignmentStats_summarizeStats").is_some());
        assert!(plan.check_cleanup_order().is_ok());
    }

    #[test]
    fn test_existing_stats_skip_stage() {
        let mut config = RunConfig::new("/run", "/ref.fa");
        config.normal_alignments = vec!["/n1.bam".into()];
        config.existing_align_stats = Some("/stats.xml".into());

        let (plan, frontier) = plan_stats(&config);
        assert!(plan.is_empty());
        assert!(frontier.is_empty());
    }
}
