//! Benchmarks for record recovery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagemend::core::StageId;
use stagemend::recovery::RecoveryLadder;
use stagemend::schema::StageCatalog;
use stagemend::testing::fixtures;

fn ladder_benchmark(c: &mut Criterion) {
    let ladder = RecoveryLadder::standard();
    let catalog = StageCatalog::standard();
    let schema = &catalog.profile(StageId::Design).schema;

    let clean = fixtures::valid_text(StageId::Design);
    let fenced = format!("Here is the design:\n```json\n{clean}\n```\nLet me know if anything is missing.");
    let trailing_comma = format!("{},}}", &clean[..clean.len() - 1]);
    let truncated = clean[..clean.len() * 3 / 4].to_string();

    c.bench_function("ladder_direct_parse", |b| {
        b.iter(|| ladder.recover(black_box(&clean), schema));
    });
    c.bench_function("ladder_envelope", |b| {
        b.iter(|| ladder.recover(black_box(&fenced), schema));
    });
    c.bench_function("ladder_syntactic_repair", |b| {
        b.iter(|| ladder.recover(black_box(&trailing_comma), schema));
    });
    c.bench_function("ladder_truncation_repair", |b| {
        b.iter(|| ladder.recover(black_box(&truncated), schema));
    });
}

criterion_group!(benches, ladder_benchmark);
criterion_main!(benches);
