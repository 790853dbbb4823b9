//! Genome partitioning.
//!
//! The reference is described by its FASTA index (`.fai`). Chromosomes are cut
//! into [`Segment`]s no longer than the scan size, and consecutive segments are
//! batched into [`SegmentGroup`]s, which are the work units of locus graph
//! construction. Hypothesis generation is parallelised over [`SampleBin`]s
//! instead, which are plain indices.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Partition;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chromosome {
    pub name: String,
    pub length: u64,
}

/// Chromosome order and sizes of the reference genome.
#[derive(Debug, Clone, Default)]
pub struct GenomeIndex {
    chromosomes: Vec<Chromosome>,
}

impl GenomeIndex {
    /// Checks that the reference and its `.fai` index exist, then reads the index.
    pub fn load(reference: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let reference = reference.as_ref();
        if !reference.is_file() {
            return Err(ConfigError::MissingReference(reference.to_owned()));
        }

        let index = Utf8PathBuf::from(format!("{reference}.fai"));
        if !index.is_file() {
            return Err(ConfigError::MissingReferenceIndex(index));
        }

        let text = fs::read_to_string(&index) //
            .map_err(|e| ConfigError::ReadReferenceIndex(index.clone(), e))?;

        Self::parse(&index, &text)
    }

    /// Parses the text of a FASTA index. Only the name and length columns are used.
    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        let malformed = |line: usize, reason: &str| ConfigError::MalformedReferenceIndex {
            path: path.to_owned(),
            line,
            reason: reason.to_string(),
        };

        let mut chromosomes = Vec::new();

        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split('\t');
            let name = fields.next().unwrap_or_default();
            if name.is_empty() {
                return Err(malformed(i + 1, "empty sequence name"));
            }

            let length = fields
                .next()
                .ok_or_else(|| malformed(i + 1, "missing sequence length"))?
                .trim()
                .parse::<u64>()
                .map_err(|_| malformed(i + 1, "sequence length is not a number"))?;

            chromosomes.push(Chromosome {
                name: name.to_string(),
                length,
            });
        }

        Ok(Self { chromosomes })
    }

    pub fn from_chromosomes<S: Into<String>>(items: impl IntoIterator<Item = (S, u64)>) -> Self {
        Self {
            chromosomes: items
                .into_iter()
                .map(|(name, length)| Chromosome {
                    name: name.into(),
                    length,
                })
                .collect(),
        }
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    pub fn total_length(&self) -> u64 {
        self.chromosomes.iter().map(|c| c.length).sum()
    }
}

/// A user supplied call region, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl Region {
    /// Parses `chr`, `chr:start` or `chr:start-end`. Thousands separators are
    /// accepted in positions. Contig names containing `:` are kept whole unless
    /// the text after the last `:` is a position range.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidRegion(text.to_string(), reason);

        let text = text.trim();
        if text.is_empty() {
            return Err(invalid("empty region"));
        }

        let (chrom, range) = match text.rsplit_once(':') {
            Some((chrom, range)) if looks_like_range(range) => (chrom, Some(range)),
            _ => (text, None),
        };

        if chrom.is_empty() {
            return Err(invalid("missing chromosome name"));
        }

        let Some(range) = range else {
            return Ok(Region {
                chrom: chrom.to_string(),
                start: None,
                end: None,
            });
        };

        let parse_pos = |s: &str| s.replace(',', "").parse::<u64>();
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (
                parse_pos(start).map_err(|_| invalid("start is not a number"))?,
                Some(parse_pos(end).map_err(|_| invalid("end is not a number"))?),
            ),
            None => (
                parse_pos(range).map_err(|_| invalid("start is not a number"))?,
                None,
            ),
        };

        if start == 0 {
            return Err(invalid("positions are 1-based"));
        }
        if let Some(end) = end
            && end < start
        {
            return Err(invalid("end precedes start"));
        }

        Ok(Region {
            chrom: chrom.to_string(),
            start: Some(start),
            end,
        })
    }
}

fn looks_like_range(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '-')
}

/// A contiguous, half-open slice of one chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position of the segment in genome order, unique within a run.
    pub index: usize,
    pub chrom: String,
    /// 0-based start.
    pub start: u64,
    /// 0-based exclusive end.
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Region string in the 1-based inclusive form the alignment readers expect.
    pub fn region(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.start + 1, self.end)
    }
}

/// Work unit of locus graph construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentGroup {
    id: String,
    segments: Vec<Segment>,
}

impl SegmentGroup {
    fn new(segments: Vec<Segment>) -> Self {
        let first = segments[0].index;
        let last = segments[segments.len() - 1].index;

        let id = if first == last {
            format!("{first:05}")
        } else {
            format!("{first:05}_to_{last:05}")
        };

        Self { id, segments }
    }

    /// Filename-safe identifier derived from the segment indices.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn regions(&self) -> impl Iterator<Item = String> + '_ {
        self.segments.iter().map(Segment::region)
    }

    pub fn len(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Work unit of hypothesis generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleBin {
    pub index: u32,
    pub count: u32,
}

impl Display for SampleBin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.index)
    }
}

pub fn sample_bins(count: u32) -> impl Iterator<Item = SampleBin> {
    (0..count).map(move |index| SampleBin { index, count })
}

/// Cuts the genome, or the call regions within it, into segments no longer
/// than `scan_size`. Each interval is split into equally sized pieces so the
/// last piece is never a sliver.
pub fn segments(index: &GenomeIndex, scan_size: u64, regions: &[Region]) -> Vec<Segment> {
    let mut segments = Vec::new();

    for (chrom, intervals) in intervals(index, regions) {
        for (start, end) in intervals {
            let len = end - start;
            let pieces = len.div_ceil(scan_size).max(1);
            let step = len.div_ceil(pieces);

            let mut pos = start;
            while pos < end {
                let next = (pos + step).min(end);
                segments.push(Segment {
                    index: segments.len(),
                    chrom: chrom.to_string(),
                    start: pos,
                    end: next,
                });
                pos = next;
            }
        }
    }

    segments
}

/// Batches consecutive segments into groups of roughly `group_size` bases.
/// A segment larger than the group size always forms its own group.
///
/// Fails when the reference itself has nothing to partition. An empty result
/// is still possible when no call region matches the reference; that case is
/// reported by the locus graph stage.
pub fn segment_groups(
    index: &GenomeIndex,
    partition: &Partition,
    regions: &[Region],
) -> Result<Vec<SegmentGroup>, ConfigError> {
    if index.total_length() == 0 {
        return Err(ConfigError::EmptyPartition);
    }

    let mut groups = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_len = 0;

    for segment in segments(index, partition.scan_size, regions) {
        if !current.is_empty() && current_len + segment.len() > partition.group_size {
            groups.push(SegmentGroup::new(std::mem::take(&mut current)));
            current_len = 0;
        }

        current_len += segment.len();
        current.push(segment);
    }

    if !current.is_empty() {
        groups.push(SegmentGroup::new(current));
    }

    Ok(groups)
}

/// Per-chromosome half-open intervals in reference order, overlaps merged.
fn intervals<'a>(index: &'a GenomeIndex, regions: &[Region]) -> Vec<(&'a str, Vec<(u64, u64)>)> {
    if regions.is_empty() {
        return index
            .chromosomes()
            .iter()
            .filter(|c| c.length > 0)
            .map(|c| (c.name.as_str(), vec![(0, c.length)]))
            .collect();
    }

    let mut by_chrom: BTreeMap<usize, Vec<(u64, u64)>> = BTreeMap::new();

    for region in regions {
        let Some(position) = index
            .chromosomes()
            .iter()
            .position(|c| c.name == region.chrom)
        else {
            tracing::warn!(chrom = %region.chrom, "call region names a sequence missing from the reference, skipping");
            continue;
        };

        let length = index.chromosomes()[position].length;
        let start = region.start.map_or(0, |s| s - 1);
        let end = region.end.map_or(length, |e| e.min(length));

        if start >= end {
            tracing::warn!(chrom = %region.chrom, start, "call region lies past the end of the sequence, skipping");
            continue;
        }

        by_chrom.entry(position).or_default().push((start, end));
    }

    by_chrom
        .into_iter()
        .map(|(position, mut list)| {
            list.sort_unstable();
            let mut merged: Vec<(u64, u64)> = Vec::with_capacity(list.len());
            for (start, end) in list {
                match merged.last_mut() {
                    Some(last) if start <= last.1 => last.1 = last.1.max(end),
                    _ => merged.push((start, end)),
                }
            }
            (index.chromosomes()[position].name.as_str(), merged)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(scan_size: u64, group_size: u64) -> Partition {
        Partition {
            scan_size,
            group_size,
            bin_count: 4,
        }
    }

    #[test]
    fn test_parse_fai() {
        let text = "chr1\t1000\t6\t60\t61\nchr2\t500\t1030\t60\t61\n\n";
        let index = GenomeIndex::parse(Utf8Path::new("ref.fa.fai"), text).unwrap();

        assert_eq!(index.chromosomes().len(), 2);
        assert_eq!(index.chromosomes()[1].length, 500);
        assert_eq!(index.total_length(), 1500);
    }

    #[test]
    fn test_parse_fai_malformed() {
        let text = "chr1\t1000\nchr2\tlots\n";
        let err = GenomeIndex::parse(Utf8Path::new("ref.fa.fai"), text).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::MalformedReferenceIndex { line: 2, .. }
        ));
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(
            Region::parse("chr1").unwrap(),
            Region {
                chrom: "chr1".into(),
                start: None,
                end: None
            }
        );
        assert_eq!(
            Region::parse("chr1:1,000-2,000").unwrap(),
            Region {
                chrom: "chr1".into(),
                start: Some(1000),
                end: Some(2000)
            }
        );
        assert_eq!(Region::parse("HLA-A*01:01:01:01").unwrap().chrom, "HLA-A*01:01:01");
        assert_eq!(Region::parse("chr1:500").unwrap().end, None);
        assert!(Region::parse("chr1:0-10").is_err());
        assert!(Region::parse(":1-10").is_err());
        assert!(Region::parse("").is_err());
    }

    #[test]
    fn test_segments_cover_genome_without_gaps() {
        let index = GenomeIndex::from_chromosomes([("chr1", 25), ("chr2", 7), ("chr3", 0)]);
        let segments = segments(&index, 10, &[]);

        // 25 bases split in three balanced pieces, 7 fits in one.
        let spans: Vec<_> = segments
            .iter()
            .map(|s| (s.chrom.as_str(), s.start, s.end))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("chr1", 0, 9),
                ("chr1", 9, 18),
                ("chr1", 18, 25),
                ("chr2", 0, 7)
            ]
        );

        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i);
        }
        assert_eq!(segments[0].region(), "chr1:1-9");
    }

    #[test]
    fn test_groups_batch_small_contigs() {
        let index = GenomeIndex::from_chromosomes([
            ("chr1", 100),
            ("decoy1", 5),
            ("decoy2", 5),
            ("decoy3", 5),
            ("chr2", 30),
        ]);

        let groups = segment_groups(&index, &partition(40, 12), &[]).unwrap();
        let ids: Vec<_> = groups.iter().map(SegmentGroup::id).collect();

        // chr1 is split in three, the decoys are batched, chr2 stands alone.
        assert_eq!(ids, vec!["00000", "00001", "00002", "00003_to_00004", "00005", "00006"]);
        assert_eq!(groups[3].regions().collect::<Vec<_>>(), vec!["decoy1:1-5", "decoy2:1-5"]);

        let total: u64 = groups.iter().map(SegmentGroup::len).sum();
        assert_eq!(total, index.total_length());
    }

    #[test]
    fn test_call_regions_restrict_and_merge() {
        let index = GenomeIndex::from_chromosomes([("chr1", 1000), ("chr2", 1000)]);
        let regions = [
            Region::parse("chr2:101-200").unwrap(),
            Region::parse("chr1:150-300").unwrap(),
            Region::parse("chr1:100-199").unwrap(),
            Region::parse("chr2:950-5000").unwrap(),
        ];

        let segments = segments(&index, 1000, &regions);
        let spans: Vec<_> = segments.iter().map(Segment::region).collect();

        assert_eq!(spans, vec!["chr1:100-300", "chr2:101-200", "chr2:950-1000"]);
    }

    #[test]
    fn test_unknown_regions_yield_no_groups() {
        let index = GenomeIndex::from_chromosomes([("chr1", 1000)]);
        let regions = [Region::parse("chrUn").unwrap()];

        let groups = segment_groups(&index, &partition(100, 100), &regions).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_empty_reference_is_config_error() {
        let index = GenomeIndex::default();
        assert!(matches!(
            segment_groups(&index, &partition(100, 100), &[]),
            Err(ConfigError::EmptyPartition)
        ));
    }

    #[test]
    fn test_sample_bins() {
        let bins: Vec<_> = sample_bins(3).map(|b| b.to_string()).collect();
        assert_eq!(bins, vec!["0000", "0001", "0002"]);
    }
}
