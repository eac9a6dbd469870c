//! Shared test data.

use hal_core::{compress, indices_to_planar, CompressionMode, IndexGrid};

pub(crate) use crate::header::tests::test_rom;

/// 32x32 disc in three palette bands; 16 tiles that score as a sprite.
pub(crate) fn disc_grid() -> IndexGrid {
    let mut pixels = vec![0u8; 32 * 32];
    for y in 0..32i32 {
        for x in 0..32i32 {
            let (dx, dy) = (x - 16, y - 16);
            if dx * dx + dy * dy <= 14 * 14 {
                pixels[(y * 32 + x) as usize] = match y {
                    0..=11 => 1,
                    12..=21 => 2,
                    _ => 3,
                };
            }
        }
    }
    IndexGrid::from_pixels(32, 32, pixels).unwrap()
}

pub(crate) fn disc_planar() -> Vec<u8> {
    indices_to_planar(&disc_grid()).unwrap()
}

pub(crate) fn disc_compressed() -> Vec<u8> {
    compress(&disc_planar(), CompressionMode::Normal)
}

/// 0xFF-filled buffer of `len` bytes with the compressed disc at each of
/// `offsets`. 0xFF decodes as an immediate terminator, so the background
/// never scores.
pub(crate) fn buffer_with_discs(len: usize, offsets: &[usize]) -> Vec<u8> {
    let packed = disc_compressed();
    let mut buffer = vec![0xFF; len];
    for &offset in offsets {
        buffer[offset..offset + packed.len()].copy_from_slice(&packed);
    }
    buffer
}
