#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use svflow::{
    DryRun, GenomeIndex, LocalExecutor, RunConfig, RunError, SvflowError, TaskError, VariantKind,
    Workflow,
};
use tempfile::TempDir;

/// Creates every file named after an `--*-output-file` flag.
const FAKE_HYGEN: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
    case "$1" in
        --*-output-file) shift; : > "$1" ;;
    esac
    shift
done
"#;

struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    fn script(&self, name: &str, body: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Every external program replaced by `true`, apart from candidate
    /// generation which has to leave its outputs behind for the finalizers.
    fn config(&self) -> RunConfig {
        let mut config = RunConfig::new(self.root.join("run"), self.root.join("genome.fa"));
        config.normal_alignments = vec![self.root.join("normal.bam")];
        config.tumor_alignments = vec![self.root.join("tumor.bam")];
        config.partition.scan_size = 500;
        config.partition.group_size = 1000;
        config.partition.bin_count = 2;
        config.command_line = vec!["svflow".into(), "--config".into(), "run.json".into()];

        let programs = &mut config.programs;
        for program in [
            &mut programs.align_stats,
            &mut programs.merge_align_stats,
            &mut programs.summarize_align_stats,
            &mut programs.chrom_depth,
            &mut programs.merge_chrom_depth,
            &mut programs.locus_graph,
            &mut programs.merge_locus_graph,
            &mut programs.check_locus_graph,
            &mut programs.locus_graph_stats,
            &mut programs.merge_edge_stats,
            &mut programs.sort_edge_logs,
            &mut programs.sort_vcf,
            &mut programs.ploidy_filter,
            &mut programs.extract_small_indels,
            &mut programs.vcf_header_fix,
            &mut programs.sort_bam,
            &mut programs.merge_bam,
            &mut programs.filter_bam,
            &mut programs.samtools,
            &mut programs.bgzip,
            &mut programs.tabix,
        ] {
            *program = "true".into();
        }
        programs.hygen = self.script("hygen.sh", FAKE_HYGEN);

        config
    }
}

fn genome() -> GenomeIndex {
    GenomeIndex::from_chromosomes([("chr1", 2000), ("chr2", 700)])
}

fn exists(path: impl AsRef<Utf8Path>) -> bool {
    path.as_ref().exists()
}

#[test]
fn runs_to_completion() {
    let sandbox = Sandbox::new();
    let config = sandbox.config();
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();
    let layout = workflow.layout();

    let diagnostics = workflow.run(&LocalExecutor::new(4)).unwrap();
    assert_eq!(diagnostics.executed(), workflow.blueprint().len());

    for kind in [VariantKind::Candidate, VariantKind::Diploid, VariantKind::Somatic] {
        assert!(exists(layout.sorted_output(kind)), "missing {kind} output");
    }
    assert!(exists(layout.small_indels()));

    // staging directories are gone, logs are kept
    assert!(!exists(layout.hygen_dir()));
    assert!(!exists(layout.locus_graph_staging()));
    assert!(!exists(layout.align_stats_staging()));
    assert!(!exists(layout.chrom_depth_staging()));
    assert!(exists(layout.log_dir()));

    let mermaid = diagnostics.render_mermaid(workflow.blueprint());
    assert!(!mermaid.contains("Not run"));
}

#[test]
fn retained_staging_keeps_manifests() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config();
    config.retain_temp_files = true;
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();
    let layout = workflow.layout();

    workflow.run(&LocalExecutor::new(2).with_memory_mb(4096)).unwrap();

    let manifest = fs::read_to_string(layout.variant_list(VariantKind::Candidate)).unwrap();
    let lines: Vec<_> = manifest.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("candidateSV.0000.vcf"));
    assert!(lines[1].ends_with("candidateSV.0001.vcf"));

    assert!(exists(layout.chrom_depth_list()));
    assert!(exists(layout.locus_graph_list()));
}

#[test]
fn failure_stops_dependents_only() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config();
    config.normal_alignments.clear();
    config.programs.align_stats = "false".into();
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();
    let plan = workflow.blueprint();
    let layout = workflow.layout();

    let err = workflow.run(&LocalExecutor::new(2)).unwrap_err();
    let (task, skipped) = match err {
        SvflowError::Run(RunError::TaskFailure { task, skipped, .. }) => (task, skipped),
        other => panic!("unexpected error {other}"),
    };
    assert_eq!(task, "getAlignmentStats_generateStats_000");

    // the depth stage does not need the statistics and still runs through
    let depth_tasks = plan
        .ids()
        .filter(|&id| plan.get(id).name().starts_with("getChromDepth_"))
        .count();
    assert_eq!(skipped, plan.len() - depth_tasks - 2);
    assert!(exists(layout.task_log("getAlignmentStats_generateStats_000")));
    assert!(!exists(layout.chrom_depth_staging()));
    assert!(!exists(layout.hygen_dir()));
}

#[test]
fn ploidy_filter_removes_its_temp_file() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config();
    config.retain_temp_files = true;
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();
    let layout = workflow.layout();

    workflow.run(&LocalExecutor::new(2)).unwrap();

    // the staging area is retained, the filter's own temp file is not
    assert!(exists(layout.hygen_dir()));
    assert!(exists(layout.sorted_output(VariantKind::Diploid)));
    assert!(!exists(layout.diploid_temp()));
}

#[test]
fn failing_first_stage_fails_the_pipeline() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config();
    // `false temp | true > diploidSV.vcf.gz`: the last stage still succeeds
    config.programs.ploidy_filter = "false".into();
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();
    let layout = workflow.layout();

    let err = workflow.run(&LocalExecutor::new(2)).unwrap_err();
    let (task, source) = match err {
        SvflowError::Run(RunError::TaskFailure { task, source, .. }) => (task, source),
        other => panic!("unexpected error {other}"),
    };
    assert_eq!(task, "sort_sortDiploidSV");
    assert!(matches!(source, TaskError::Exit { ref program, .. } if program == "false"));

    // the sequence stopped before its cleanup step, other families finished
    assert!(exists(layout.diploid_temp()));
    assert!(exists(layout.sorted_output(VariantKind::Somatic)));
}

#[test]
fn dry_run_touches_nothing() {
    let sandbox = Sandbox::new();
    let config = sandbox.config();
    let workflow = Workflow::plan_with_genome(&config, &genome()).unwrap();

    let diagnostics = workflow.run(&DryRun).unwrap();
    assert_eq!(diagnostics.executed(), 0);
    assert!(!exists(workflow.layout().run_dir()));
}
