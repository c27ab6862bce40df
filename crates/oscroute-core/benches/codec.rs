//! Codec and matcher benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oscroute_core::{codec, Argument, Message, Pattern};

fn tracking_message() -> Message {
    Message::new("/tracking/trackers/head/position")
        .with_float(0.12)
        .with_float(1.68)
        .with_float(-0.4)
}

fn encode_benchmark(c: &mut Criterion) {
    let msg = tracking_message();

    c.bench_function("encode_tracking_message", |b| {
        b.iter(|| black_box(codec::encode(&msg).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let encoded = codec::encode(&tracking_message()).unwrap();

    c.bench_function("decode_tracking_message", |b| {
        b.iter(|| black_box(codec::decode(&encoded).unwrap()))
    });
}

fn mixed_args_benchmark(c: &mut Criterion) {
    let msg = Message::new("/synth/patch/load")
        .with_arg("warm pad")
        .with_arg(vec![0u8; 61])
        .with_int(7)
        .with_arg(Argument::True)
        .with_arg(Argument::Impulse);
    let encoded = codec::encode(&msg).unwrap();

    c.bench_function("decode_mixed_args", |b| {
        b.iter(|| black_box(codec::decode(&encoded).unwrap()))
    });
}

fn pattern_benchmark(c: &mut Criterion) {
    let pattern = Pattern::compile("/tracking/trackers/{head,*_controller}/[pr]*").unwrap();

    c.bench_function("match_wildcard_pattern", |b| {
        b.iter(|| black_box(pattern.matches("/tracking/trackers/left_controller/rotation")))
    });
}

criterion_group!(
    benches,
    encode_benchmark,
    decode_benchmark,
    mixed_args_benchmark,
    pattern_benchmark
);
criterion_main!(benches);
