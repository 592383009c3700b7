use courier_core::wire::Envelope;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn request_envelope(payload_len: usize) -> Envelope {
    Envelope::Request {
        tag: 1000,
        target: "public.hello".into(),
        frames: vec![vec![0xAA; payload_len]],
    }
}

fn bench_envelope_encode(c: &mut Criterion) {
    let envelope = request_envelope(1200);
    let encoded_len = envelope.encode().unwrap().len();

    let mut group = c.benchmark_group("envelope_encode");
    group.throughput(Throughput::Bytes(encoded_len as u64));

    group.bench_function("request_1200_byte_frame", |b| {
        b.iter(|| black_box(&envelope).encode())
    });

    group.finish();
}

fn bench_envelope_decode(c: &mut Criterion) {
    let encoded = request_envelope(1200).encode().unwrap();

    let mut group = c.benchmark_group("envelope_decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("request_1200_byte_frame", |b| {
        b.iter(|| Envelope::decode(black_box(&encoded)))
    });

    group.finish();
}

fn bench_decode_by_size(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (64, "64_bytes"),
        (256, "256_bytes"),
        (1024, "1024_bytes"),
        (4096, "4096_bytes"),
        (16384, "16384_bytes"),
    ];

    let mut group = c.benchmark_group("envelope_decode_by_size");

    for (size, name) in sizes {
        let encoded = request_envelope(size).encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(name, |b| b.iter(|| Envelope::decode(black_box(&encoded))));
    }

    group.finish();
}

fn bench_envelope_roundtrip(c: &mut Criterion) {
    let envelope = request_envelope(1200);

    let mut group = c.benchmark_group("envelope_roundtrip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_and_decode", |b| {
        b.iter(|| {
            let encoded = black_box(&envelope).encode().unwrap();
            let decoded = Envelope::decode(black_box(&encoded)).unwrap();
            black_box(decoded.kind())
        })
    });

    group.finish();
}

fn bench_multi_frame_decode(c: &mut Criterion) {
    let frame_counts = vec![(1usize, "1_frame"), (4, "4_frames"), (16, "16_frames")];

    let mut group = c.benchmark_group("envelope_multi_frame");

    for (count, name) in frame_counts {
        let encoded = Envelope::Send {
            target: "public.batch".into(),
            frames: vec![vec![0x42; 256]; count],
        }
        .encode()
        .unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(name, |b| b.iter(|| Envelope::decode(black_box(&encoded))));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_decode_by_size,
    bench_envelope_roundtrip,
    bench_multi_frame_decode
);
criterion_main!(benches);
