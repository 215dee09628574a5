//! Merge per-chunk delifted record sets into a single report
//!
//! The header is written once; each chunk contributes only data rows. Sets
//! must be supplied in the order the chunker produced the chunks. Records are
//! then stably ordered by parent (input order) and start position, so the
//! same inputs always produce the same bytes.
use log::info;

use crate::error::{PipelineError, Result};
use crate::lift::LiftMap;
use crate::report::{self, AnnotationRecord};

pub fn merge_records(
    record_sets: Vec<Vec<AnnotationRecord>>,
    lift_map: &LiftMap,
) -> Result<Vec<AnnotationRecord>> {
    let mut keyed = Vec::with_capacity(record_sets.iter().map(|s| s.len()).sum());
    for set in record_sets {
        for record in set {
            let rank = lift_map.parent_rank(&record.query_name).ok_or_else(|| {
                PipelineError::Consistency(format!(
                    "merged record names '{}', which is not an input sequence",
                    record.query_name
                ))
            })?;
            keyed.push((rank, record));
        }
    }

    // Stable: ties keep chunk order.
    keyed.sort_by_key(|(rank, record)| (*rank, record.query_start));
    Ok(keyed.into_iter().map(|(_, record)| record).collect())
}

/// Merge per-chunk row blocks (as produced by the annotate stage) into the
/// final report text.
pub fn merge_chunk_outputs(chunk_outputs: &[String], lift_map: &LiftMap) -> Result<String> {
    let mut sets = Vec::with_capacity(chunk_outputs.len());
    for text in chunk_outputs {
        sets.push(report::parse_report(text)?);
    }
    let merged = merge_records(sets, lift_map)?;

    info!(
        "[merge] {} chunk outputs -> {} records",
        chunk_outputs.len(),
        merged.len()
    );
    Ok(report::format_report(&merged))
}
