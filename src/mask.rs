//! Rebuild masked copies of the original sequences from a merged report.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::fasta::Sequence;
use crate::report::AnnotationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskPolicy {
    /// Lower-case masked bases.
    Soft,
    /// Replace masked bases with `N`.
    Hard,
}

impl FromStr for MaskPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "soft" | "xsmall" => Ok(MaskPolicy::Soft),
            "hard" | "n" => Ok(MaskPolicy::Hard),
            _ => Err(PipelineError::Input(format!(
                "unknown mask policy '{s}'. Valid policies: soft, hard"
            ))),
        }
    }
}

/// Applies a set of parent-space intervals to one whole sequence.
pub trait MaskApplier: Send + Sync {
    fn apply_mask(&self, sequence: &Sequence, intervals: &[Range<u64>]) -> Result<Sequence>;
}

/// In-process masker.
#[derive(Debug, Clone, Copy)]
pub struct Masker {
    pub policy: MaskPolicy,
}

impl Masker {
    pub fn new(policy: MaskPolicy) -> Self {
        Self { policy }
    }
}

impl MaskApplier for Masker {
    fn apply_mask(&self, sequence: &Sequence, intervals: &[Range<u64>]) -> Result<Sequence> {
        let mut masked = sequence.clone();
        for interval in intervals {
            if interval.end > sequence.len() || interval.start > interval.end {
                return Err(PipelineError::Consistency(format!(
                    "mask interval {}-{} outside '{}' ({} bp)",
                    interval.start,
                    interval.end,
                    sequence.name,
                    sequence.len()
                )));
            }
            let bases = &mut masked.seq[interval.start as usize..interval.end as usize];
            match self.policy {
                MaskPolicy::Soft => bases.make_ascii_lowercase(),
                MaskPolicy::Hard => bases.fill(b'N'),
            }
        }
        Ok(masked)
    }
}

/// Mask each original sequence with the intervals reported against it.
pub fn mask_sequences(
    originals: &[Sequence],
    records: &[AnnotationRecord],
    applier: &dyn MaskApplier,
) -> Result<Vec<Sequence>> {
    let mut by_parent: HashMap<&str, Vec<Range<u64>>> = HashMap::new();
    for record in records {
        by_parent
            .entry(record.query_name.as_str())
            .or_default()
            .push(record.query_start..record.query_end);
    }

    for name in by_parent.keys() {
        if !originals.iter().any(|s| s.name == *name) {
            return Err(PipelineError::Consistency(format!(
                "report names '{name}', which is not an input sequence"
            )));
        }
    }

    let mut masked = Vec::with_capacity(originals.len());
    let mut masked_bp = 0u64;
    for original in originals {
        let intervals = by_parent
            .get(original.name.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        masked_bp += intervals.iter().map(|r| r.end - r.start).sum::<u64>();
        masked.push(applier.apply_mask(original, intervals)?);
    }

    info!(
        "[mask] masked {} sequences ({} bp of intervals)",
        masked.len(),
        masked_bp
    );
    Ok(masked)
}
