use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sb_core::{decode_action, encode_action, ActionVariant};

fn bench_action(c: &mut Criterion) {
    let flat = vec![2, 1, 1, 0, 1, 0];
    c.bench_function("sb_core_decode_action_extended", |b| {
        b.iter(|| black_box(decode_action(black_box(&flat), ActionVariant::Extended).unwrap()))
    });

    let action = decode_action(&flat, ActionVariant::Extended).unwrap();
    c.bench_function("sb_core_encode_action_extended", |b| {
        b.iter(|| black_box(encode_action(black_box(&action), ActionVariant::Extended).unwrap()))
    });

    let bad = vec![2, 1, 3, 0, 1, 0];
    c.bench_function("sb_core_decode_action_rejected", |b| {
        b.iter(|| black_box(decode_action(black_box(&bad), ActionVariant::Extended).is_err()))
    });
}

criterion_group!(benches, bench_action);
criterion_main!(benches);
