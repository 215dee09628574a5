//! Overlap-aware chunking of large sequence collections
//!
//! Two passes, mirroring `faSplit size -extra` followed by `faSplit about`:
//!
//! 1. Size pass: a sequence longer than `max_chunk_size` is cut into windows
//!    of `max_chunk_size` bases whose starts are `max_chunk_size - overlap`
//!    apart, so each window shares `overlap` bases with its successor. The
//!    last window is clipped at the end of the parent.
//! 2. Balance pass: the resulting pieces (and every sequence that was never
//!    cut) are packed, in order, into files of about `max_chunk_size` bases,
//!    never splitting a piece. This keeps the long tail of small contigs from
//!    turning into millions of tasks.
//!
//! Every piece gets one Lift Entry. Unsplit sequences keep their own name
//! and an offset of zero.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{PipelineError, Result};
use crate::fasta::{self, Sequence};
use crate::lift::{LiftEntry, LiftMap};

pub const DEFAULT_OVERLAP: u64 = 1000;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub max_chunk_size: u64,
    pub overlap: u64,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn new(max_chunk_size: u64, overlap: u64) -> Result<Self> {
        let params = Self {
            max_chunk_size,
            overlap,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(PipelineError::Input(
                "max chunk size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(PipelineError::Input(format!(
                "overlap ({}) must be smaller than max chunk size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> u64 {
        self.max_chunk_size - self.overlap
    }
}

/// One output file of the balance pass.
#[derive(Debug, Clone, Default)]
pub struct ChunkFile {
    pub pieces: Vec<Sequence>,
    pub total_bp: u64,
}

impl ChunkFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, piece: Sequence) {
        self.total_bp += piece.len();
        self.pieces.push(piece);
    }

    /// Check if adding a piece would take the file past the target size
    pub fn would_exceed(&self, piece: &Sequence, target_bp: u64) -> bool {
        self.total_bp + piece.len() > target_bp
    }

    pub fn to_fasta(&self) -> Vec<u8> {
        fasta::fasta_bytes(&self.pieces)
    }
}

#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub files: Vec<ChunkFile>,
    pub lift_map: LiftMap,
}

/// Half-open window starts and ends for a parent of length `len`.
pub fn window_bounds(len: u64, params: &ChunkParams) -> Vec<(u64, u64)> {
    if len <= params.max_chunk_size {
        return vec![(0, len)];
    }
    let mut bounds = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + params.max_chunk_size).min(len);
        bounds.push((start, end));
        if end == len {
            break;
        }
        start += params.stride();
    }
    bounds
}

fn window_name(parent: &str, index: usize, count: usize) -> String {
    let width = count.saturating_sub(1).to_string().len().max(2);
    format!("{parent}_{index:0width$}")
}

/// Size pass, planned: the lift entry of every piece, with the index of its
/// parent in `sequences`. No sequence data is copied.
fn plan_pieces(
    sequences: &[Sequence],
    params: &ChunkParams,
) -> Result<Vec<(usize, LiftEntry)>> {
    let input_names: HashSet<&str> = sequences.iter().map(|s| s.name.as_str()).collect();
    let mut piece_names: HashSet<String> = HashSet::new();
    let mut planned = Vec::new();

    for (parent_index, record) in sequences.iter().enumerate() {
        let len = record.len();
        let bounds = window_bounds(len, params);
        let split = bounds.len() > 1;

        for (index, &(start, end)) in bounds.iter().enumerate() {
            let name = if split {
                window_name(&record.name, index, bounds.len())
            } else {
                record.name.clone()
            };
            if split && input_names.contains(name.as_str()) {
                return Err(PipelineError::Input(format!(
                    "chunk name '{}' for '{}' collides with an input sequence",
                    name, record.name
                )));
            }
            if !piece_names.insert(name.clone()) {
                return Err(PipelineError::Input(format!(
                    "chunk name '{name}' would be produced twice"
                )));
            }

            planned.push((
                parent_index,
                LiftEntry {
                    chunk_name: name,
                    parent_name: record.name.clone(),
                    offset: start,
                    chunk_len: end - start,
                    parent_len: len,
                },
            ));
        }
    }

    Ok(planned)
}

/// Every check `split` makes on its input, without producing any chunks.
pub fn validate(sequences: &[Sequence], params: &ChunkParams) -> Result<()> {
    params.validate()?;
    if sequences.is_empty() {
        return Err(PipelineError::Input("no sequences in input".to_string()));
    }
    fasta::check_unique_names(sequences)?;
    plan_pieces(sequences, params).map(|_| ())
}

/// Balance pass: pack pieces into files of about `target_bp` bases.
pub fn balance_pass(pieces: Vec<Sequence>, target_bp: u64) -> Vec<ChunkFile> {
    let mut files = Vec::new();
    let mut current = ChunkFile::new();

    for piece in pieces {
        if !current.pieces.is_empty() && current.would_exceed(&piece, target_bp) {
            files.push(std::mem::take(&mut current));
        }
        current.add(piece);
    }

    if !current.pieces.is_empty() {
        files.push(current);
    }
    files
}

/// Split `sequences` into chunk files and the Lift Map that undoes it.
pub fn split(sequences: &[Sequence], params: &ChunkParams) -> Result<SplitOutput> {
    params.validate()?;
    if sequences.is_empty() {
        return Err(PipelineError::Input("no sequences in input".to_string()));
    }
    fasta::check_unique_names(sequences)?;

    let planned = plan_pieces(sequences, params)?;
    let mut pieces = Vec::with_capacity(planned.len());
    let mut entries = Vec::with_capacity(planned.len());
    for (parent_index, entry) in planned {
        let parent = &sequences[parent_index].seq;
        pieces.push(Sequence::new(
            entry.chunk_name.clone(),
            parent[entry.offset as usize..entry.end() as usize].to_vec(),
        ));
        entries.push(entry);
    }

    let lift_map = LiftMap::from_entries(entries)?;
    let piece_count = pieces.len();
    let total_bp: u64 = pieces.iter().map(|p| p.len()).sum();
    let files = balance_pass(pieces, params.max_chunk_size);

    info!(
        "[split] {} sequences -> {} pieces ({} bp incl. overlap) in {} chunk files",
        sequences.len(),
        piece_count,
        total_bp,
        files.len()
    );

    Ok(SplitOutput { files, lift_map })
}
