//! Run mode and the feature flags derived from the configuration.

use std::fmt::{Display, Formatter};


use crate::config::RunConfig;

/// The sample configuration governing which outputs hypothesis generation
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Normal samples only (or no samples at all).
    Germline,
    /// Tumor samples without a matched normal.
    TumorOnly,
    /// Tumor samples with a matched normal.
    Somatic,
}

impl RunMode {
    pub fn resolve(normal_count: usize, tumor_count: usize) -> Self {
        match (normal_count > 0, tumor_count > 0) {
            (true, true) => RunMode::Somatic,
            (false, true) => RunMode::TumorOnly,
            _ => RunMode::Germline,
        }
    }

    /// Whether diploid calls are produced. Every mode except tumor-only does.
    pub fn has_diploid(self) -> bool {
        self != RunMode::TumorOnly
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunMode::Germline => "germline",
            RunMode::TumorOnly => "tumor-only",
            RunMode::Somatic => "somatic",
        })
    }
}

/// Everything the planner needs to know about which stages and options are
/// active, resolved once from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub mode: RunMode,
    pub high_depth_filter: bool,
    pub ignore_anom_proper_pair: bool,
    pub run_stats: bool,
    pub run_depth: bool,
    pub rna: bool,
    pub unstranded_rna: bool,
    pub evidence: bool,
}

impl Features {
    pub fn resolve(config: &RunConfig) -> Self {
        let mode = RunMode::resolve(
            config.normal_alignments.len(),
            config.tumor_alignments.len(),
        );

        let high_depth_filter = !(config.exome || config.rna);

        Self {
            mode,
            high_depth_filter,
            ignore_anom_proper_pair: config.rna,
            run_stats: config.existing_align_stats.is_none(),
            run_depth: high_depth_filter && config.existing_chrom_depth.is_none(),
            rna: config.rna,
            unstranded_rna: config.unstranded_rna,
            evidence: config.generate_evidence,
        }
    }
}
