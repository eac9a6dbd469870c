use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hal_core::{compress, decompress, CompressionMode, SpriteDataValidator};

/// Tile-shaped test data: repeated rows, empty upper planes, some noise
fn sprite_sheet(tiles: usize) -> Vec<u8> {
    let mut seed = 0x2468_ACE1u32;
    let mut data = Vec::with_capacity(tiles * 32);
    for tile in 0..tiles {
        for row in 0..8 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (seed >> 28) as u8;
            let plane0 = if (tile + row) % 4 == 0 { 0x3C ^ noise } else { 0x7E };
            data.push(plane0);
            data.push(if row < 4 { 0x18 } else { 0x00 });
        }
        data.extend_from_slice(&[0u8; 16]);
    }
    data
}

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("hal_compress");

    for tiles in [16usize, 64, 256] {
        let raw = sprite_sheet(tiles);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        for mode in [CompressionMode::Normal, CompressionMode::Fast] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), tiles),
                &raw,
                |b, raw| {
                    b.iter(|| black_box(compress(black_box(raw), mode)));
                },
            );
        }
    }

    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("hal_decompress");

    for tiles in [16usize, 64, 256] {
        let raw = sprite_sheet(tiles);
        let packed = compress(&raw, CompressionMode::Normal);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tiles), &packed, |b, packed| {
            b.iter(|| black_box(decompress(black_box(packed), 0, raw.len())));
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let raw = sprite_sheet(256);
    let validator = SpriteDataValidator::default();
    c.bench_function("validator_score_256_tiles", |b| {
        b.iter(|| black_box(validator.score(black_box(&raw))));
    });
}

criterion_group!(benches, bench_compress, bench_decompress, bench_validate);
criterion_main!(benches);
