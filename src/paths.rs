//! File naming for every artifact the workflow produces.
//!
//! All names are a pure function of the [`RunConfig`] and the work unit, so a
//! fan-in stage can rebuild the exact list of files its fan-out stage writes
//! without looking at the disk. Intermediate files go under
//! `<run>/workspace`, deliverables under `<run>/results/{stats,variants,evidence}`.

use std::fmt::{Display, Formatter};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::RunConfig;
use crate::genome::{SampleBin, SegmentGroup};

/// The families of VCF output written by hypothesis generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantKind {
    Candidate,
    Diploid,
    Somatic,
    Tumor,
}

impl VariantKind {
    pub const ALL: [VariantKind; 4] = [
        VariantKind::Candidate,
        VariantKind::Diploid,
        VariantKind::Somatic,
        VariantKind::Tumor,
    ];

    fn stem(self) -> &'static str {
        match self {
            VariantKind::Candidate => "candidateSV",
            VariantKind::Diploid => "diploidSV",
            VariantKind::Somatic => "somaticSV",
            VariantKind::Tumor => "tumorSV",
        }
    }

    /// Label used in task names and manifest names.
    pub fn label(self) -> &'static str {
        match self {
            VariantKind::Candidate => "sortCandidateSV",
            VariantKind::Diploid => "sortDiploidSV",
            VariantKind::Somatic => "sortSomaticSV",
            VariantKind::Tumor => "sortTumorSV",
        }
    }
}

impl Display for VariantKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stem())
    }
}

/// Directory layout of one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: Utf8PathBuf,
    work_dir: Utf8PathBuf,
    log_dir: Utf8PathBuf,
    results_dir: Utf8PathBuf,
    stats_dir: Utf8PathBuf,
    variants_dir: Utf8PathBuf,
    evidence_dir: Utf8PathBuf,
    existing_align_stats: Option<Utf8PathBuf>,
    existing_chrom_depth: Option<Utf8PathBuf>,
}

impl RunLayout {
    pub fn new(config: &RunConfig) -> Self {
        let run_dir = config.run_dir.clone();
        let work_dir = run_dir.join("workspace");
        let results_dir = run_dir.join("results");

        Self {
            log_dir: work_dir.join("logs"),
            stats_dir: results_dir.join("stats"),
            variants_dir: results_dir.join("variants"),
            evidence_dir: results_dir.join("evidence"),
            existing_align_stats: config.existing_align_stats.clone(),
            existing_chrom_depth: config.existing_chrom_depth.clone(),
            run_dir,
            work_dir,
            results_dir,
        }
    }

    /// Creates the fixed part of the directory tree. Staging directories are
    /// created by the workflow itself.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.run_dir,
            &self.work_dir,
            &self.log_dir,
            &self.results_dir,
            &self.stats_dir,
            &self.variants_dir,
            &self.evidence_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    // alignment statistics

    pub fn align_stats(&self) -> Utf8PathBuf {
        match &self.existing_align_stats {
            Some(path) => path.clone(),
            None => self.work_dir.join("alignmentStats.xml"),
        }
    }

    pub fn align_stats_staging(&self) -> Utf8PathBuf {
        self.work_dir.join("alignmentStats.xml.tmpdir")
    }

    pub fn align_stats_part(&self, alignment: usize) -> Utf8PathBuf {
        self.align_stats_staging()
            .join(format!("alignmentStats.xml.{alignment:03}.xml"))
    }

    pub fn align_stats_summary(&self) -> Utf8PathBuf {
        self.stats_dir.join("alignmentStatsSummary.txt")
    }

    // chromosome depth

    pub fn chrom_depth(&self) -> Utf8PathBuf {
        match &self.existing_chrom_depth {
            Some(path) => path.clone(),
            None => self.work_dir.join("chromDepth.txt"),
        }
    }

    pub fn chrom_depth_staging(&self) -> Utf8PathBuf {
        self.work_dir.join("chromDepth.txt.tmpdir")
    }

    pub fn chrom_depth_part(&self, alignment: usize, chrom: usize) -> Utf8PathBuf {
        self.chrom_depth_staging()
            .join(format!("chromDepth.{alignment:03}.{chrom:05}.txt"))
    }

    pub fn chrom_depth_list(&self) -> Utf8PathBuf {
        self.chrom_depth_staging().join("list.chromDepth.txt")
    }

    // locus graph

    pub fn locus_graph(&self) -> Utf8PathBuf {
        self.work_dir.join("svLocusGraph.bin")
    }

    pub fn locus_graph_staging(&self) -> Utf8PathBuf {
        self.work_dir.join("svLocusGraph.bin.tmpdir")
    }

    pub fn locus_graph_part(&self, group: &SegmentGroup) -> Utf8PathBuf {
        self.locus_graph_staging()
            .join(format!("svLocusGraph.{}.bin", group.id()))
    }

    pub fn locus_graph_list(&self) -> Utf8PathBuf {
        self.locus_graph_staging().join("list.svLocusGraph.txt")
    }

    pub fn locus_graph_stats(&self) -> Utf8PathBuf {
        self.stats_dir.join("svLocusGraphStats.tsv")
    }

    // hypothesis generation

    pub fn hygen_dir(&self) -> Utf8PathBuf {
        self.work_dir.join("svHyGen")
    }

    pub fn hygen_output(&self, kind: VariantKind, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir().join(format!("{kind}.{bin}.vcf"))
    }

    pub fn variant_list(&self, kind: VariantKind) -> Utf8PathBuf {
        self.hygen_dir().join(format!("list.{}.txt", kind.label()))
    }

    pub fn sorted_output(&self, kind: VariantKind) -> Utf8PathBuf {
        self.variants_dir.join(format!("{kind}.vcf.gz"))
    }

    pub fn diploid_temp(&self) -> Utf8PathBuf {
        self.hygen_dir().join("diploidSV.vcf.temp")
    }

    pub fn small_indels(&self) -> Utf8PathBuf {
        self.variants_dir.join("candidateSmallIndels.vcf.gz")
    }

    pub fn edge_runtime_log(&self, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir().join(format!("edgeRuntimeLog.{bin}.txt"))
    }

    pub fn edge_runtime_log_list(&self) -> Utf8PathBuf {
        self.hygen_dir().join("list.edgeRuntimeLog.txt")
    }

    pub fn sorted_edge_runtime_log(&self) -> Utf8PathBuf {
        self.work_dir.join("edgeRuntimeLog.txt")
    }

    pub fn edge_stats(&self, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir().join(format!("edgeStats.{bin}.xml"))
    }

    pub fn edge_stats_list(&self) -> Utf8PathBuf {
        self.hygen_dir().join("list.edgeStats.txt")
    }

    pub fn edge_stats_final(&self) -> Utf8PathBuf {
        self.stats_dir.join("svCandidateGenerationStats.xml")
    }

    pub fn edge_stats_report(&self) -> Utf8PathBuf {
        self.stats_dir.join("svCandidateGenerationStats.tsv")
    }

    // evidence alignments, indexed by alignment file position (normal first)

    pub fn evidence_stub(&self, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir().join(format!("evidence_{bin}"))
    }

    pub fn evidence_raw(&self, alignment: usize, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("evidence_{bin}.bam_{alignment}.bam"))
    }

    pub fn evidence_sorted(&self, alignment: usize, bin: SampleBin) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("evidence_{bin}.bam_{alignment}.sorted.bam"))
    }

    pub fn evidence_sorted_list(&self, alignment: usize) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("list.evidence.bam_{alignment}.txt"))
    }

    pub fn evidence_merged_bam(&self, alignment: usize) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("evidence.bam_{alignment}.merged.bam"))
    }

    pub fn evidence_merged_sam(&self, alignment: usize) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("evidence.bam_{alignment}.merged.sam"))
    }

    pub fn evidence_filtered_sam(&self, alignment: usize) -> Utf8PathBuf {
        self.hygen_dir()
            .join(format!("evidence.bam_{alignment}.filtered.sam"))
    }

    /// Final evidence file of one input sample. The position is part of the
    /// name so inputs sharing a file stem never collide.
    pub fn evidence_final(&self, alignment: usize, source: &Utf8Path) -> Utf8PathBuf {
        let stem = source.file_stem().unwrap_or("sample");
        self.evidence_dir
            .join(format!("evidence_{alignment}.{stem}.bam"))
    }

    // task logs

    pub fn log_dir(&self) -> &Utf8Path {
        &self.log_dir
    }

    /// Where the standard error of a task goes.
    pub fn task_log(&self, task: &str) -> Utf8PathBuf {
        let name: String = task
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        self.log_dir.join(format!("{name}.stderr.log"))
    }
}
