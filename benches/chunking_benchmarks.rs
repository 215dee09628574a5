/// Performance benchmarks for chunking and delifting
///
/// Run with: cargo bench
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use splitmask::chunker::{self, ChunkParams};
use splitmask::delift::delift;
use splitmask::fasta::Sequence;
use splitmask::report::{self, AnnotationRecord, Strand};

/// Generate a synthetic genome: one large chromosome plus many small contigs
fn generate_genome(chrom_len: usize, contigs: usize) -> Vec<Sequence> {
    let mut rng = StdRng::seed_from_u64(42);
    let bases = b"ACGT";
    let mut random_seq = |len: usize| -> Vec<u8> {
        (0..len).map(|_| bases[rng.gen_range(0..4)]).collect()
    };

    let mut genome = vec![Sequence::new("chr1", random_seq(chrom_len))];
    for i in 0..contigs {
        genome.push(Sequence::new(format!("ctg{i}"), random_seq(5_000)));
    }
    genome
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    group.sample_size(10);

    for size in [1_000_000usize, 10_000_000].iter() {
        let genome = generate_genome(*size, 200);
        let params = ChunkParams::new(200_000, 1000).unwrap();
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &genome, |b, genome| {
            b.iter(|| chunker::split(black_box(genome), &params).unwrap());
        });
    }

    group.finish();
}

fn bench_delift_and_format(c: &mut Criterion) {
    let genome = generate_genome(10_000_000, 0);
    let params = ChunkParams::new(200_000, 1000).unwrap();
    let split = chunker::split(&genome, &params).unwrap();

    let mut records = Vec::new();
    for entry in split.lift_map.entries() {
        for start in (0..entry.chunk_len.saturating_sub(300)).step_by(500) {
            records.push(AnnotationRecord {
                score: 1000,
                divergence: "12.3".to_string(),
                deletions: "0.4".to_string(),
                insertions: "1.1".to_string(),
                query_name: entry.chunk_name.clone(),
                query_start: start,
                query_end: start + 300,
                query_left: entry.chunk_len - start - 300,
                strand: Strand::Complement,
                repeat_name: "AluSx".to_string(),
                repeat_class: "SINE/Alu".to_string(),
                repeat_start: "(12)".to_string(),
                repeat_end: "300".to_string(),
                repeat_left: "1".to_string(),
                id: "7".to_string(),
                overlapped: false,
            });
        }
    }

    let mut group = c.benchmark_group("delift");
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("delift", |b| {
        b.iter(|| delift(black_box(records.clone()), &split.lift_map).unwrap());
    });

    let lifted = delift(records.clone(), &split.lift_map).unwrap();
    group.bench_function("format_report", |b| {
        b.iter(|| report::format_report(black_box(&lifted)));
    });
    group.finish();
}

criterion_group!(benches, bench_split, bench_delift_and_format);
criterion_main!(benches);
