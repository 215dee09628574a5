#![allow(dead_code)]
/// Utility functions for pipeline tests
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use splitmask::annotate::Annotator;
use splitmask::chunker::{window_bounds, ChunkParams};
use splitmask::fasta::{self, Sequence};
use splitmask::report::{self, AnnotationRecord, Strand};
use splitmask::{CancelToken, PipelineError};

/// Generate a random upper-case DNA sequence of given length
pub fn generate_dna_sequence(rng: &mut StdRng, length: usize) -> Vec<u8> {
    let bases = b"ACGT";
    (0..length).map(|_| bases[rng.gen_range(0..4)]).collect()
}

pub fn create_fasta_file(path: &Path, sequences: &[Sequence]) {
    fs::write(path, fasta::fasta_bytes(sequences)).expect("Failed to write FASTA file");
}

/// Lower-case `count` features of 20..120 bp into `seq`. Features never
/// straddle a window start or end, so exactly one chunk reports each of
/// them in full.
pub fn plant_features(rng: &mut StdRng, seq: &mut [u8], params: &ChunkParams, count: usize) {
    let len = seq.len() as u64;
    let cuts: Vec<u64> = window_bounds(len, params)
        .iter()
        .flat_map(|&(s, e)| [s, e])
        .collect();
    let mut placed = 0;
    let mut tries = 0;
    while placed < count && tries < count * 100 {
        tries += 1;
        let flen = rng.gen_range(20..120u64);
        if flen + 2 >= len {
            break;
        }
        let start = rng.gen_range(1..len - flen - 1);
        let end = start + flen;
        if cuts.iter().any(|&c| start < c && c < end) {
            continue;
        }
        // Keep one upper-case base on each side so runs stay separate.
        if seq[(start - 1) as usize..=(end as usize)]
            .iter()
            .any(|b| b.is_ascii_lowercase())
        {
            continue;
        }
        seq[start as usize..end as usize].make_ascii_lowercase();
        placed += 1;
    }
}

/// Maximal lower-case runs, half-open.
pub fn lowercase_runs(seq: &[u8]) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, b) in seq.iter().enumerate() {
        match (b.is_ascii_lowercase(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s as u64, i as u64));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s as u64, seq.len() as u64));
    }
    runs
}

pub fn feature_record(name: &str, start: u64, end: u64, seq_len: u64) -> AnnotationRecord {
    AnnotationRecord {
        score: (end - start) as u32 * 10,
        divergence: "0.0".to_string(),
        deletions: "0.0".to_string(),
        insertions: "0.0".to_string(),
        query_name: name.to_string(),
        query_start: start,
        query_end: end,
        query_left: seq_len - end,
        strand: Strand::Forward,
        repeat_name: "LowerRep".to_string(),
        repeat_class: "Unknown".to_string(),
        repeat_start: "1".to_string(),
        repeat_end: (end - start).to_string(),
        repeat_left: "(0)".to_string(),
        id: "1".to_string(),
        overlapped: false,
    }
}

/// The report the pipeline must produce for `sequences` with
/// [`LowercaseAnnotator`].
pub fn expected_report(sequences: &[Sequence]) -> String {
    let mut records = Vec::new();
    for s in sequences {
        for (start, end) in lowercase_runs(&s.seq) {
            records.push(feature_record(&s.name, start, end, s.len()));
        }
    }
    report::format_report(&records)
}

/// Stand-in for RepeatMasker: every lower-case run is one repeat.
#[derive(Default)]
pub struct LowercaseAnnotator {
    pub calls: AtomicUsize,
    /// First sequence name of every chunk file seen, in call order.
    pub seen: Mutex<Vec<String>>,
    /// Chunks whose first sequence has this name fail with a tool error.
    pub fail_on: Option<String>,
    /// Fail this many calls with an infrastructure error before succeeding.
    pub flaky_calls: AtomicUsize,
    /// Cancel this token once `cancel_after` calls have started.
    pub cancel: Option<(CancelToken, usize)>,
}

impl LowercaseAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Annotator for LowercaseAnnotator {
    fn annotate(&self, chunk: &Path, workspace: &Path) -> Result<String, PipelineError> {
        assert!(chunk.starts_with(workspace), "chunk must live in the task workspace");
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((token, after)) = &self.cancel {
            if n >= *after {
                token.cancel();
            }
        }
        if self
            .flaky_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::Infrastructure("worker lost".to_string()));
        }

        let sequences = fasta::parse_fasta_bytes(&fs::read(chunk)?)?;
        let first = sequences.first().map(|s| s.name.clone()).unwrap_or_default();
        self.seen.lock().unwrap().push(first.clone());
        if self.fail_on.as_deref() == Some(first.as_str()) {
            return Err(PipelineError::Tool(format!("annotation of {first} exited with 1")));
        }

        let mut records = Vec::new();
        for s in &sequences {
            for (start, end) in lowercase_runs(&s.seq) {
                records.push(feature_record(&s.name, start, end, s.len()));
            }
        }
        Ok(report::format_report(&records))
    }
}

/// A genome with one long sequence (split by the size pass) and several
/// short contigs (grouped by the balance pass), with planted features.
pub fn synthetic_genome(seed: u64, params: &ChunkParams) -> Vec<Sequence> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sequences = Vec::new();

    let mut long = generate_dna_sequence(&mut rng, (params.max_chunk_size * 4 + 137) as usize);
    plant_features(&mut rng, &mut long, params, 25);
    sequences.push(Sequence::new("chr1", long));

    for i in 0..6 {
        let len = rng.gen_range(params.max_chunk_size / 5..params.max_chunk_size / 2) as usize;
        let mut contig = generate_dna_sequence(&mut rng, len);
        plant_features(&mut rng, &mut contig, params, 2);
        sequences.push(Sequence::new(format!("ctg{i}"), contig));
    }
    sequences
}
