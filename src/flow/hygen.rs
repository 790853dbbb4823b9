use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::Blueprint;
use crate::config::Backend;
use crate::engine::{Frontier, Invocation, TaskId};
use crate::error::PlanError;
use crate::flow::collate::{self, Finalized, InputList};
use crate::flow::staging::Staging;
use crate::flow::{FlowContext, pre_join};
use crate::genome::{SampleBin, sample_bins};
use crate::mode::RunMode;
use crate::paths::VariantKind;

/// Output families requested from every bin in a given mode.
pub(crate) fn variant_kinds(mode: RunMode) -> Vec<VariantKind> {
    match mode {
        RunMode::Germline => vec![VariantKind::Candidate, VariantKind::Diploid],
        RunMode::TumorOnly => vec![VariantKind::Candidate, VariantKind::Tumor],
        RunMode::Somatic => vec![
            VariantKind::Candidate,
            VariantKind::Diploid,
            VariantKind::Somatic,
        ],
    }
}

/// Hypothesis generation over every sample bin, followed by finalization of
/// each variant family, the log collations and, when requested, the evidence
/// alignments of every input sample.
///
/// The frontier covers the generation tasks, all evidence tasks and every
/// index task, so a caller waiting on it sees finished deliverables.
pub(crate) fn build(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    dependencies: &Frontier,
) -> Result<Frontier, PlanError> {
    let layout = ctx.layout;
    let features = ctx.features;
    let alignments: Vec<_> = ctx.config.alignments().collect();

    let staging = Staging::create(plan, prefix, "makeHyGenDir", layout.hygen_dir(), dependencies)?;

    let memory_mb = match ctx.config.backend {
        Backend::Local => ctx.config.memory.hygen_local_mb,
        Backend::Cluster => ctx.config.memory.hygen_cluster_mb,
    };

    let kinds = variant_kinds(features.mode);
    let mut outputs: BTreeMap<VariantKind, Vec<Utf8PathBuf>> = BTreeMap::new();
    let mut runtime_logs = Vec::new();
    let mut edge_stats = Vec::new();

    let mut hygen_tasks = Frontier::new();
    // per alignment: the sort task and sorted file of every bin
    let mut evidence: BTreeMap<usize, Vec<(TaskId, Utf8PathBuf)>> = BTreeMap::new();

    for bin in sample_bins(ctx.config.partition.bin_count) {
        let mut writes = Vec::new();
        for &kind in &kinds {
            let path = layout.hygen_output(kind, bin);
            writes.push(path.clone());
            outputs.entry(kind).or_default().push(path);
        }

        runtime_logs.push(layout.edge_runtime_log(bin));
        edge_stats.push(layout.edge_stats(bin));
        writes.push(layout.edge_runtime_log(bin));
        writes.push(layout.edge_stats(bin));

        if features.evidence {
            writes.extend((0..alignments.len()).map(|i| layout.evidence_raw(i, bin)));
        }

        let mut reads = vec![layout.align_stats(), layout.locus_graph()];
        if features.high_depth_filter {
            reads.push(layout.chrom_depth());
        }

        let task = plan
            .task(pre_join(prefix, format_args!("generateCandidateSV_{bin}")))
            .depends_on(staging.task())
            .memory_mb(memory_mb)
            .reads(&reads)
            .writes(&writes)
            .run(hygen_command(ctx, bin))?;

        hygen_tasks.insert(task);

        if features.evidence {
            for (i, _) in alignments.iter().enumerate() {
                let raw = layout.evidence_raw(i, bin);
                let sorted = layout.evidence_sorted(i, bin);
                // the sorter appends the extension itself
                let sorted_prefix = sorted.with_extension("");

                let sort = plan
                    .task(pre_join(prefix, format_args!("sortEvidenceBam_{bin}_{i}")))
                    .depends_on(task)
                    .reads([&raw])
                    .writes([&sorted])
                    .run(
                        Invocation::new(&ctx.config.programs.sort_bam)
                            .arg(&ctx.config.programs.samtools)
                            .arg(&raw)
                            .arg(&sorted_prefix),
                    )?;

                evidence.entry(i).or_default().push((sort, sorted));
            }
        }
    }

    let mut finalized: BTreeMap<VariantKind, Finalized> = BTreeMap::new();
    for (kind, paths) in outputs {
        if let Some(done) =
            collate::finalize_variants(ctx, plan, prefix, kind, paths, &hygen_tasks)?
        {
            finalized.insert(kind, done);
        }
    }

    let mut frontier = hygen_tasks.clone();
    frontier.extend(finalized.values().map(|done| done.tabix));

    let candidates = finalized.get(&VariantKind::Candidate).copied();
    if let Some(candidates) = candidates
        && let Some(tabix) = collate::extract_small_indels(ctx, plan, prefix, candidates)?
    {
        frontier.insert(tabix);
    }

    for (i, sorted) in evidence {
        let tasks = merge_evidence(ctx, plan, prefix, i, sorted, candidates.map(|c| c.tabix))?;
        frontier.extend(tasks);
    }

    let programs = &ctx.config.programs;

    let runtime_log_list = layout.edge_runtime_log_list();
    let sorted_runtime_log = layout.sorted_edge_runtime_log();
    let sort_logs = InputList {
        name: pre_join(prefix, "sortEdgeRuntimeLogsInputList"),
        path: runtime_log_list.clone(),
        inputs: runtime_logs,
    }
    .merge(plan, &hygen_tasks, pre_join(prefix, "sortEdgeRuntimeLogs"))?
    .force_local()
    .writes([&sorted_runtime_log])
    .run(
        Invocation::new(&programs.sort_edge_logs)
            .opt("-f", &runtime_log_list)
            .opt("-o", &sorted_runtime_log),
    )?;

    let edge_stats_list = layout.edge_stats_list();
    let final_stats = layout.edge_stats_final();
    let final_report = layout.edge_stats_report();
    let merge_stats = InputList {
        name: pre_join(prefix, "mergeEdgeStatsInputList"),
        path: edge_stats_list.clone(),
        inputs: edge_stats,
    }
    .merge(plan, &hygen_tasks, pre_join(prefix, "mergeEdgeStats"))?
    .force_local()
    .writes([&final_stats, &final_report])
    .run(
        Invocation::new(&programs.merge_edge_stats)
            .opt("--stats-file-list", &edge_stats_list)
            .opt("--output-file", &final_stats)
            .opt("--report-file", &final_report),
    )?;

    staging.schedule_cleanup(ctx, plan, "rmHyGenDir", (&frontier, sort_logs, merge_stats))?;

    Ok(frontier)
}

fn hygen_command(ctx: &FlowContext, bin: SampleBin) -> Invocation {
    let config = ctx.config;
    let layout = ctx.layout;
    let features = ctx.features;
    let thresholds = &config.thresholds;

    let mut command = Invocation::new(&config.programs.hygen)
        .opt("--align-stats", layout.align_stats())
        .opt("--graph-file", layout.locus_graph())
        .opt("--bin-index", bin.index)
        .opt("--bin-count", bin.count)
        .opt("--min-candidate-sv-size", thresholds.min_candidate_variant_size)
        .opt("--min-candidate-spanning-count", thresholds.min_candidate_spanning_count)
        .opt("--min-scored-sv-size", thresholds.min_scored_variant_size)
        .opt("--ref", config.reference())
        .opt("--candidate-output-file", layout.hygen_output(VariantKind::Candidate, bin));

    match features.mode {
        RunMode::TumorOnly => {
            command = command.opt("--tumor-output-file", layout.hygen_output(VariantKind::Tumor, bin));
        }
        RunMode::Germline | RunMode::Somatic => {
            command = command
                .opt("--diploid-output-file", layout.hygen_output(VariantKind::Diploid, bin))
                .opt("--min-qual-score", thresholds.min_diploid_variant_score)
                .opt("--min-pass-qual-score", thresholds.min_pass_diploid_variant_score)
                .opt("--min-pass-gt-score", thresholds.min_pass_diploid_gt_score);

            if features.mode == RunMode::Somatic {
                command = command
                    .opt("--somatic-output-file", layout.hygen_output(VariantKind::Somatic, bin))
                    .opt("--min-somatic-score", thresholds.min_somatic_score)
                    .opt("--min-pass-somatic-score", thresholds.min_pass_somatic_score)
                    .arg("--skip-remote-reads");
            }
        }
    }

    if features.high_depth_filter {
        command = command.opt("--chrom-depth", layout.chrom_depth());
    }

    command = command
        .opt("--edge-runtime-log", layout.edge_runtime_log(bin))
        .opt("--edge-stats-log", layout.edge_stats(bin));

    if features.evidence {
        command = command.opt("--evidence-bam-stub", layout.evidence_stub(bin));
    }

    command
        .opts("--align-file", &config.normal_alignments)
        .opts("--tumor-align-file", &config.tumor_alignments)
        .flag_if(features.ignore_anom_proper_pair, "--ignore-anom-proper-pair")
        .flag_if(features.rna, "--rna")
        .flag_if(features.unstranded_rna, "--unstranded")
}

/// Merge, filter and index the evidence of one input sample. The merge waits
/// for every per-bin sort of that sample and for the finalized candidates,
/// which the filter reads.
fn merge_evidence(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    alignment: usize,
    sorted: Vec<(TaskId, Utf8PathBuf)>,
    candidates: Option<TaskId>,
) -> Result<Vec<TaskId>, PlanError> {
    let layout = ctx.layout;
    let programs = &ctx.config.programs;

    let Some(source) = ctx.config.alignments().nth(alignment) else {
        return Ok(Vec::new());
    };

    let (sorts, files): (Vec<TaskId>, Vec<Utf8PathBuf>) = sorted.into_iter().unzip();

    let list = layout.evidence_sorted_list(alignment);
    let merged_bam = layout.evidence_merged_bam(alignment);
    let merged_sam = layout.evidence_merged_sam(alignment);
    let filtered_sam = layout.evidence_filtered_sam(alignment);
    let final_bam = layout.evidence_final(alignment, source);
    let candidate_vcf = layout.sorted_output(VariantKind::Candidate);

    let mut tasks = sorts.clone();

    let merge = InputList {
        name: pre_join(prefix, format_args!("merge_evidenceBam_{alignment}InputList")),
        path: list.clone(),
        inputs: files,
    }
    .merge(plan, (sorts, candidates), pre_join(prefix, format_args!("merge_evidenceBam_{alignment}")))?
    .writes([&merged_bam, &merged_sam])
    .run(
        Invocation::new(&programs.merge_bam)
            .arg(&programs.samtools)
            .arg(&list)
            .arg(&merged_bam)
            .arg(&merged_sam),
    )?;
    tasks.push(merge);

    let filter = plan
        .task(pre_join(prefix, format_args!("filter_evidenceSam_{alignment}")))
        .depends_on(merge)
        .reads([&candidate_vcf, &merged_sam])
        .writes([&filtered_sam, &final_bam])
        .run(
            Invocation::new(&programs.filter_bam)
                .arg(&programs.samtools)
                .arg(&candidate_vcf)
                .arg(&merged_sam)
                .arg(&filtered_sam)
                .arg(&final_bam),
        )?;
    tasks.push(filter);

    let index = plan
        .task(pre_join(prefix, format_args!("index_evidenceBam_{alignment}")))
        .depends_on(filter)
        .reads([&final_bam])
        .writes([format!("{final_bam}.bai")])
        .run(Invocation::new(&programs.samtools).arg("index").arg(&final_bam))?;
    tasks.push(index);

    Ok(tasks)
}
