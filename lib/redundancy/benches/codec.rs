use criterion::{criterion_group, criterion_main, Criterion};
use rasta_redundancy::message::RedMessageCodec;
use rasta_common::crc::CheckCodeType;

fn bench_codec(c: &mut Criterion) {
    let codec = RedMessageCodec::new(CheckCodeType::B);
    let payload: Vec<u8> = (0..1101).map(|value| (value % 255) as u8).collect();
    let message = codec.create_message(7, &payload).unwrap();

    c.bench_function("red_create_message_max", |bench| {
        bench.iter(|| codec.create_message(7, &payload).unwrap())
    });
    c.bench_function("red_check_message_crc_max", |bench| {
        bench.iter(|| codec.check_message_crc(&message).unwrap())
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
