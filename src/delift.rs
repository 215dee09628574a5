//! Translate chunk-local annotation records back to parent coordinates.
//!
//! A feature belongs to the chunk in which it starts. Records that start in
//! the trailing overlap of a non-terminal chunk are dropped: the next chunk
//! of the same parent sees those bases at its head and reports them. The
//! final chunk of a parent has no successor and keeps everything.

use log::debug;

use crate::error::{PipelineError, Result};
use crate::lift::LiftMap;
use crate::report::AnnotationRecord;

/// Rewrite `records` from chunk space to parent space.
///
/// A record naming a chunk absent from `lift_map` is an
/// [`PipelineError::UnknownChunk`]; that is a bookkeeping defect, never a
/// transient condition.
pub fn delift(records: Vec<AnnotationRecord>, lift_map: &LiftMap) -> Result<Vec<AnnotationRecord>> {
    let mut lifted = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for mut record in records {
        let entry = lift_map
            .get(&record.query_name)
            .ok_or_else(|| PipelineError::UnknownChunk(record.query_name.clone()))?;
        let owned = lift_map
            .owned_len(&entry.chunk_name)
            .ok_or_else(|| PipelineError::UnknownChunk(record.query_name.clone()))?;

        if record.query_end > entry.chunk_len {
            return Err(PipelineError::Consistency(format!(
                "record {}-{} extends past end of chunk '{}' ({} bp)",
                record.query_start, record.query_end, entry.chunk_name, entry.chunk_len
            )));
        }

        if !entry.is_terminal() && record.query_start >= owned {
            dropped += 1;
            continue;
        }

        record.query_name = entry.parent_name.clone();
        record.query_start += entry.offset;
        record.query_end += entry.offset;
        record.query_left = entry.parent_len - record.query_end;
        lifted.push(record);
    }

    if dropped > 0 {
        debug!("[delift] dropped {dropped} records owned by a following chunk");
    }
    Ok(lifted)
}
