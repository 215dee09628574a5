/// Property-based tests for chunk / delift coordinate handling
///
/// Uses proptest to check the invariants the merged report relies on: every
/// chunk position maps back to exactly one parent position, and the drop
/// rule leaves each parent position covered by exactly one chunk.
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use splitmask::chunker::{self, ChunkParams};
use splitmask::delift::delift;
use splitmask::fasta::Sequence;
use splitmask::lift::{LiftEntry, LiftMap};
use splitmask::report::{AnnotationRecord, Strand};

fn record(name: &str, start: u64, end: u64) -> AnnotationRecord {
    AnnotationRecord {
        score: 100,
        divergence: "1.0".to_string(),
        deletions: "0.0".to_string(),
        insertions: "0.0".to_string(),
        query_name: name.to_string(),
        query_start: start,
        query_end: end,
        query_left: 0,
        strand: Strand::Forward,
        repeat_name: "AluY".to_string(),
        repeat_class: "SINE/Alu".to_string(),
        repeat_start: "1".to_string(),
        repeat_end: "100".to_string(),
        repeat_left: "(211)".to_string(),
        id: "1".to_string(),
        overlapped: false,
    }
}

fn sequence(name: &str, len: u64) -> Sequence {
    let bases = b"ACGT";
    Sequence::new(name, (0..len).map(|i| bases[(i % 4) as usize]).collect::<Vec<u8>>())
}

fn params_strategy() -> impl Strategy<Value = ChunkParams> {
    (10u64..400).prop_flat_map(|max| {
        (Just(max), 0..max).prop_map(|(max, overlap)| ChunkParams::new(max, overlap).unwrap())
    })
}

/// Property: sequences no longer than the chunk size stay whole
#[test]
fn prop_short_sequences_get_single_zero_offset_entry() {
    proptest!(|(params in params_strategy(), frac in 0.0f64..=1.0)| {
        let len = ((params.max_chunk_size as f64 * frac) as u64).max(1);
        let out = chunker::split(&[sequence("s", len)], &params).unwrap();
        let entries: Vec<&LiftEntry> = out.lift_map.entries().collect();
        prop_assert_eq!(entries.len(), 1);
        prop_assert_eq!(entries[0].offset, 0);
        prop_assert_eq!(&entries[0].chunk_name, "s");
        prop_assert_eq!(entries[0].chunk_len, len);
    });
}

/// Property: windows tile the parent with exactly `overlap` shared bases
#[test]
fn prop_windows_tile_parent() {
    proptest!(|(params in params_strategy(), len in 1u64..5000)| {
        let out = chunker::split(&[sequence("chr", len)], &params).unwrap();
        let entries: Vec<&LiftEntry> = out.lift_map.entries().collect();

        prop_assert_eq!(entries[0].offset, 0);
        prop_assert_eq!(entries.last().unwrap().end(), len);
        for e in &entries {
            prop_assert!(e.chunk_len <= params.max_chunk_size);
            prop_assert!(e.end() <= len);
        }
        for pair in entries.windows(2) {
            prop_assert_eq!(pair[0].end() - pair[1].offset, params.overlap);
            prop_assert!(!pair[0].is_terminal());
        }
        prop_assert!(entries.last().unwrap().is_terminal());
        for file in &out.files {
            prop_assert!(file.total_bp <= params.max_chunk_size);
        }
    });
}

/// Property: a kept record at chunk position p lands at offset + p
#[test]
fn prop_delift_adds_offset() {
    proptest!(|(params in params_strategy(), len in 1u64..5000, pick in any::<prop::sample::Index>(), pos in 0.0f64..1.0)| {
        let out = chunker::split(&[sequence("chr", len)], &params).unwrap();
        let entries: Vec<&LiftEntry> = out.lift_map.entries().collect();
        let entry = entries[pick.index(entries.len())];
        let owned = out.lift_map.owned_len(&entry.chunk_name).unwrap();

        let p = ((owned as f64) * pos) as u64;
        let p = p.min(owned - 1);
        let lifted = delift(vec![record(&entry.chunk_name, p, p + 1)], &out.lift_map).unwrap();

        prop_assert_eq!(lifted.len(), 1);
        prop_assert_eq!(&lifted[0].query_name, "chr");
        prop_assert_eq!(lifted[0].query_start, entry.offset + p);
        prop_assert_eq!(lifted[0].query_end, entry.offset + p + 1);
        prop_assert_eq!(lifted[0].query_left, len - (entry.offset + p + 1));
    });
}

/// Property: every chunk reporting every one of its positions yields each
/// parent position exactly once after delifting
#[test]
fn prop_retained_records_cover_parent_once() {
    proptest!(ProptestConfig::with_cases(64), |(params in params_strategy(), len in 1u64..3000)| {
        let out = chunker::split(&[sequence("chr", len)], &params).unwrap();
        let mut records = Vec::new();
        for e in out.lift_map.entries() {
            for p in 0..e.chunk_len {
                records.push(record(&e.chunk_name, p, p + 1));
            }
        }

        let lifted = delift(records, &out.lift_map).unwrap();
        let mut starts: Vec<u64> = lifted.iter().map(|r| r.query_start).collect();
        starts.sort_unstable();
        prop_assert_eq!(starts, (0..len).collect::<Vec<u64>>());
    });
}

#[test]
fn test_record_in_second_chunk_of_three() {
    let params = ChunkParams::new(100_000, 1000).unwrap();
    let out = chunker::split(&[sequence("chr1", 250_000)], &params).unwrap();
    let lifted = delift(vec![record("chr1_01", 500, 600)], &out.lift_map).unwrap();

    assert_eq!(lifted.len(), 1);
    assert_eq!(lifted[0].query_name, "chr1");
    assert_eq!((lifted[0].query_start, lifted[0].query_end), (99_500, 99_600));
    assert_eq!(lifted[0].query_left, 250_000 - 99_600);
}

#[test]
fn test_feature_in_shared_overlap_survives_once() {
    // Two windows of 1000 bp sharing [900, 1000) of a 1900 bp parent.
    let map = LiftMap::from_entries(vec![
        LiftEntry {
            chunk_name: "s_00".into(),
            parent_name: "s".into(),
            offset: 0,
            chunk_len: 1000,
            parent_len: 1900,
        },
        LiftEntry {
            chunk_name: "s_01".into(),
            parent_name: "s".into(),
            offset: 900,
            chunk_len: 1000,
            parent_len: 1900,
        },
    ])
    .unwrap();

    // The same feature, parent [920, 980), as seen by each window.
    let lifted = delift(
        vec![record("s_00", 920, 980), record("s_01", 20, 80)],
        &map,
    )
    .unwrap();
    assert_eq!(lifted.len(), 1);
    assert_eq!((lifted[0].query_start, lifted[0].query_end), (920, 980));

    // Spanning the chunk boundary from the owned region is kept.
    let lifted = delift(vec![record("s_00", 850, 1000)], &map).unwrap();
    assert_eq!((lifted[0].query_start, lifted[0].query_end), (850, 1000));
}

#[test]
fn test_lift_file_round_trips_through_ucsc_format() {
    let params = ChunkParams::new(100, 10).unwrap();
    let out = chunker::split(&[sequence("a", 350), sequence("b", 40)], &params).unwrap();

    let mut text = Vec::new();
    out.lift_map.write_lift(&mut text).unwrap();
    let parsed = LiftMap::read_lift(text.as_slice()).unwrap();
    assert_eq!(parsed, out.lift_map);
}
