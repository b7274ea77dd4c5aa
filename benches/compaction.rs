//! Throughput of the parallel compaction pipeline on generated proxy-style logs.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use log_compactor::execution::{CompactionEngine, ExecutionOptions};
use log_compactor::ingestion::{LineParser, MatchSets, ParseOptions};
use log_compactor::types::{Aggregation, FieldDef, FieldType, Schema};

fn parser() -> LineParser {
    let schema = Schema::new(vec![
        FieldDef::new("user", FieldType::String, 0).key(),
        FieldDef::new("bytes", FieldType::Int, 1).with_aggregation(Aggregation::Sum),
        FieldDef::new("latency", FieldType::Float, 2).with_aggregation(Aggregation::Variance),
        FieldDef::new("host", FieldType::String, 3).with_aggregation(Aggregation::UnionCount),
        FieldDef::new("action", FieldType::String, 4).with_aggregation(Aggregation::Union),
        FieldDef::new("denied", FieldType::Int, 4).with_contain_filter("DENIED"),
    ]);
    LineParser::new(
        Arc::new(schema),
        Arc::new(MatchSets::default()),
        ParseOptions::default(),
    )
}

fn generate(lines: usize) -> Vec<u8> {
    let mut out = String::with_capacity(lines * 48);
    for i in 0..lines {
        let action = if i % 5 == 0 { "TCP_DENIED" } else { "TCP_MISS" };
        out.push_str(&format!(
            "user{} {} {}.{} host{}.example {}\n",
            i % 97,
            i * 13 % 4096,
            i % 50,
            i % 10,
            i % 17,
            action
        ));
    }
    out.into_bytes()
}

fn compaction_benchmark(c: &mut Criterion) {
    let parser = parser();
    let input = generate(50_000);
    let mut group = c.benchmark_group("compaction");
    group.throughput(Throughput::Bytes(input.len() as u64));

    for threads in [1_usize, 2, 4] {
        let engine = match CompactionEngine::new(ExecutionOptions {
            num_threads: Some(threads),
            chunks: Some(threads * 4),
            max_in_flight_chunks: threads,
            skip_header: false,
        }) {
            Ok(e) => e,
            Err(_) => continue,
        };
        group.bench_with_input(BenchmarkId::new("threads", threads), &input, |b, input| {
            b.iter(|| {
                let keys = engine
                    .compact_bytes(&parser, input)
                    .map(|t| t.len())
                    .unwrap_or_default();
                black_box(keys);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, compaction_benchmark);
criterion_main!(benches);
