//! Run configuration.
//!
//! A [`RunConfig`] is built once at startup, either from a JSON file with
//! [`RunConfig::load`] or programmatically with [`RunConfig::new`], and is
//! read-only afterwards. Every planning component receives it by reference.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::genome::Region;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Root of everything the run writes.
    #[serde(default = "default_run_dir")]
    pub run_dir: Utf8PathBuf,
    /// Reference FASTA; `<reference>.fai` must sit next to it.
    pub reference: Option<Utf8PathBuf>,
    #[serde(default)]
    pub normal_alignments: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub tumor_alignments: Vec<Utf8PathBuf>,
    /// Restricts calling to these regions (`chr` or `chr:start-end`).
    #[serde(default)]
    pub call_regions: Vec<String>,
    #[serde(default)]
    pub partition: Partition,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub memory: MemoryHints,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub exome: bool,
    #[serde(default)]
    pub rna: bool,
    #[serde(default)]
    pub unstranded_rna: bool,
    /// Write per-sample evidence alignments next to the variant calls.
    #[serde(default)]
    pub generate_evidence: bool,
    /// Skip the statistics stage and use this file instead.
    #[serde(default)]
    pub existing_align_stats: Option<Utf8PathBuf>,
    /// Skip depth estimation and use this file instead.
    #[serde(default)]
    pub existing_chrom_depth: Option<Utf8PathBuf>,
    #[serde(default)]
    pub retain_temp_files: bool,
    #[serde(default)]
    pub programs: Programs,
    /// Command line recorded in the header of every finalized VCF.
    #[serde(default)]
    pub command_line: Vec<String>,
}

fn default_run_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("SVWorkflow")
}

/// Genome partitioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Partition {
    /// Largest segment a chromosome is split into, in bases.
    pub scan_size: u64,
    /// Consecutive segments are batched into one group up to this many bases.
    pub group_size: u64,
    /// Number of hypothesis generation bins.
    pub bin_count: u32,
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            scan_size: 12_000_000,
            group_size: 1_000_000,
            bin_count: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub min_candidate_variant_size: u32,
    pub min_edge_observations: u32,
    pub min_candidate_spanning_count: u32,
    pub min_scored_variant_size: u32,
    pub min_diploid_variant_score: u32,
    pub min_pass_diploid_variant_score: u32,
    pub min_pass_diploid_gt_score: u32,
    pub min_somatic_score: u32,
    pub min_pass_somatic_score: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_candidate_variant_size: 8,
            min_edge_observations: 3,
            min_candidate_spanning_count: 3,
            min_scored_variant_size: 50,
            min_diploid_variant_score: 10,
            min_pass_diploid_variant_score: 20,
            min_pass_diploid_gt_score: 15,
            min_somatic_score: 10,
            min_pass_somatic_score: 30,
        }
    }
}

/// Approximate memory requirements, in MiB, attached to the heavy tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryHints {
    pub estimate_mb: u64,
    pub merge_mb: u64,
    pub hygen_local_mb: u64,
    pub hygen_cluster_mb: u64,
}

impl Default for MemoryHints {
    fn default() -> Self {
        Self {
            estimate_mb: 2 * 1024,
            merge_mb: 4 * 1024,
            hygen_local_mb: 2 * 1024,
            hygen_cluster_mb: 4 * 1024,
        }
    }
}

/// The kind of backend the graph is planned for. Only affects resource hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Cluster,
}

/// Locations of every external program the workflow invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Programs {
    pub align_stats: Utf8PathBuf,
    pub merge_align_stats: Utf8PathBuf,
    pub summarize_align_stats: Utf8PathBuf,
    pub chrom_depth: Utf8PathBuf,
    pub merge_chrom_depth: Utf8PathBuf,
    pub locus_graph: Utf8PathBuf,
    pub merge_locus_graph: Utf8PathBuf,
    pub check_locus_graph: Utf8PathBuf,
    pub locus_graph_stats: Utf8PathBuf,
    pub hygen: Utf8PathBuf,
    pub merge_edge_stats: Utf8PathBuf,
    pub sort_edge_logs: Utf8PathBuf,
    pub sort_vcf: Utf8PathBuf,
    pub ploidy_filter: Utf8PathBuf,
    pub extract_small_indels: Utf8PathBuf,
    pub vcf_header_fix: Utf8PathBuf,
    pub sort_bam: Utf8PathBuf,
    pub merge_bam: Utf8PathBuf,
    pub filter_bam: Utf8PathBuf,
    pub samtools: Utf8PathBuf,
    pub bgzip: Utf8PathBuf,
    pub tabix: Utf8PathBuf,
}

impl Default for Programs {
    fn default() -> Self {
        let p = Utf8PathBuf::from;
        Self {
            align_stats: p("GetAlignmentStats"),
            merge_align_stats: p("MergeAlignmentStats"),
            summarize_align_stats: p("SummarizeAlignmentStats"),
            chrom_depth: p("GetChromDepth"),
            merge_chrom_depth: p("MergeChromDepth"),
            locus_graph: p("EstimateSVLoci"),
            merge_locus_graph: p("MergeSVLoci"),
            check_locus_graph: p("CheckSVLoci"),
            locus_graph_stats: p("GetSVLocusGraphStats"),
            hygen: p("GenerateSVCandidates"),
            merge_edge_stats: p("MergeEdgeStats"),
            sort_edge_logs: p("sortEdgeLogs"),
            sort_vcf: p("sortVcf"),
            ploidy_filter: p("ploidyFilter"),
            extract_small_indels: p("extractSmallIndelCandidates"),
            vcf_header_fix: p("vcfCmdlineSwapper"),
            sort_bam: p("sortBam"),
            merge_bam: p("mergeBam"),
            filter_bam: p("filterBam"),
            samtools: p("samtools"),
            bgzip: p("bgzip"),
            tabix: p("tabix"),
        }
    }
}

impl RunConfig {
    /// A configuration with every option at its default value.
    pub fn new(run_dir: impl Into<Utf8PathBuf>, reference: impl Into<Utf8PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            reference: Some(reference.into()),
            normal_alignments: Vec::new(),
            tumor_alignments: Vec::new(),
            call_regions: Vec::new(),
            partition: Partition::default(),
            thresholds: Thresholds::default(),
            memory: MemoryHints::default(),
            backend: Backend::default(),
            exome: false,
            rna: false,
            unstranded_rna: false,
            generate_evidence: false,
            existing_align_stats: None,
            existing_chrom_depth: None,
            retain_temp_files: false,
            programs: Programs::default(),
            command_line: Vec::new(),
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = fs::read_to_string(path) //
            .map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let config: RunConfig = serde_json::from_str(&text) //
            .map_err(|e| ConfigError::Parse(path.to_owned(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the option combinations that can be judged without touching the
    /// filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference.is_none() {
            return Err(ConfigError::NoReference);
        }

        if self.normal_alignments.is_empty() && self.tumor_alignments.is_empty() {
            return Err(ConfigError::NoAlignments);
        }

        let mut seen = HashSet::new();
        for path in self.alignments() {
            if !seen.insert(path) {
                return Err(ConfigError::DuplicateAlignment(path.clone()));
            }
        }

        if self.unstranded_rna && !self.rna {
            return Err(ConfigError::UnstrandedWithoutRna);
        }

        if self.partition.bin_count == 0 {
            return Err(ConfigError::NotPositive("partition.bin_count"));
        }
        if self.partition.scan_size == 0 {
            return Err(ConfigError::NotPositive("partition.scan_size"));
        }

        for region in &self.call_regions {
            Region::parse(region)?;
        }

        Ok(())
    }

    /// Every alignment file, normal samples first.
    pub fn alignments(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.normal_alignments
            .iter()
            .chain(self.tumor_alignments.iter())
    }

    pub(crate) fn reference(&self) -> &Utf8Path {
        self.reference.as_deref().unwrap_or(Utf8Path::new(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        let mut config = RunConfig::new("run", "ref.fa");
        config.normal_alignments.push("normal.bam".into());
        config
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_requires_alignments() {
        let config = RunConfig::new("run", "ref.fa");
        assert!(matches!(config.validate(), Err(ConfigError::NoAlignments)));
    }

    #[test]
    fn test_rejects_duplicate_alignment() {
        let mut config = base();
        config.tumor_alignments.push("normal.bam".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAlignment(path)) if path == "normal.bam"
        ));
    }

    #[test]
    fn test_unstranded_needs_rna() {
        let mut config = base();
        config.unstranded_rna = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnstrandedWithoutRna)
        ));

        config.rna = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_bins() {
        let mut config = base();
        config.partition.bin_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive("partition.bin_count"))
        ));
    }

    #[test]
    fn test_bad_region() {
        let mut config = base();
        config.call_regions.push("chr1:200-100".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRegion(..))
        ));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "run_dir": "/tmp/run",
            "reference": "/ref/genome.fa",
            "tumor_alignments": ["/data/tumor.bam"],
            "partition": { "bin_count": 3 },
            "backend": "cluster",
            "programs": { "samtools": "/opt/bin/samtools" }
        }"#;

        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.partition.bin_count, 3);
        assert_eq!(config.partition.scan_size, 12_000_000);
        assert_eq!(config.backend, Backend::Cluster);
        assert_eq!(config.programs.samtools, "/opt/bin/samtools");
        assert_eq!(config.programs.bgzip, "bgzip");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let json = r#"{ "reference": "ref.fa", "tumour_alignments": [] }"#;
        assert!(serde_json::from_str::<RunConfig>(json).is_err());
    }
}
