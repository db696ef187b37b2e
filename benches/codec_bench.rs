use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sheetdisk::backend::MemoryBackend;
use sheetdisk::codec::{self, BlockEncoder};
use sheetdisk::pageio::{partition, to_records, ContainerPosition, PageIo, ProgressRenderer};
use sheetdisk::Backend;
use std::io::Cursor;
use std::time::Duration;

fn bench_codec(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let text = codec::encode(&data);

    c.bench_function("encode_1mb", |b| b.iter(|| codec::encode(black_box(&data))));
    c.bench_function("decode_1mb", |b| b.iter(|| codec::decode(black_box(text.as_bytes())).unwrap()));

    c.bench_function("block_encode_1mb", |b| {
        b.iter(|| {
            let mut encoder = BlockEncoder::new(Cursor::new(black_box(&data)), 49_500 * 1_000);
            while encoder.next_block().unwrap().is_some() {}
        })
    });
}

fn bench_records(c: &mut Criterion) {
    let text = "A".repeat(49_500 * 1_000);

    c.bench_function("to_records_full_container", |b| {
        b.iter(|| to_records(black_box(&text), 49_500))
    });
    c.bench_function("partition_1000_records", |b| b.iter(|| partition(black_box(1_000), 10)));
}

fn bench_container_write(c: &mut Criterion) {
    let backend = MemoryBackend::new(1_000, 1_001);
    let records = to_records(&"Q".repeat(1_000 * 1_000), 1_000);
    let io = PageIo::new(&backend, 10, Duration::from_millis(1));

    c.bench_function("write_container_1000x1000", |b| {
        b.iter(|| {
            let handle = backend.create_container("bench").unwrap();
            io.write_container(
                &handle,
                black_box(&records),
                ContainerPosition { index: 1, total: 1 },
                &mut ProgressRenderer::hidden(),
            )
            .unwrap();
            backend.delete_container(&handle.id).unwrap();
        })
    });
}

criterion_group!(benches, bench_codec, bench_records, bench_container_write);
criterion_main!(benches);
