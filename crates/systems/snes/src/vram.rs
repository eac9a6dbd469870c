//! Uncompressed tile access in VRAM dumps.
//!
//! Emulator VRAM dumps hold sprite tiles as plain planar data, so no HAL
//! decoding is involved. Full 64 KiB dumps and 32 KiB half dumps are
//! accepted; anything else is rejected before an offset is looked at.

use hal_core::logging::{log, LogCategory, LogLevel};
use hal_core::BYTES_PER_TILE;

use crate::VramError;

pub const VRAM_SIZE: usize = 0x10000;

/// Where object tiles usually start in a full dump.
pub const DEFAULT_SPRITE_OFFSET: usize = 0xC000;

fn check_dump(vram: &[u8]) -> Result<(), VramError> {
    match vram.len() {
        VRAM_SIZE | 0x8000 => Ok(()),
        len => Err(VramError::WrongSize {
            len,
            expected: VRAM_SIZE,
        }),
    }
}

fn check_range(vram: &[u8], offset: usize, size: usize) -> Result<(), VramError> {
    match offset.checked_add(size) {
        Some(end) if end <= vram.len() => Ok(()),
        _ => Err(VramError::OutOfBounds { offset, size }),
    }
}

/// Whole tiles of `vram[offset..offset + byte_len]`; a trailing partial
/// tile is left out.
pub fn read_tiles(vram: &[u8], offset: usize, byte_len: usize) -> Result<&[u8], VramError> {
    check_dump(vram)?;
    check_range(vram, offset, byte_len)?;
    let whole = byte_len / BYTES_PER_TILE * BYTES_PER_TILE;
    if whole != byte_len {
        log(LogCategory::Tiles, LogLevel::Warn, || {
            format!(
                "VRAM: dropping {} bytes of partial tile at 0x{:04X}",
                byte_len - whole,
                offset + whole
            )
        });
    }
    Ok(&vram[offset..offset + whole])
}

/// Copy of `vram` with `tiles` written at `offset`.
pub fn write_tiles(vram: &[u8], offset: usize, tiles: &[u8]) -> Result<Vec<u8>, VramError> {
    check_dump(vram)?;
    check_range(vram, offset, tiles.len())?;
    let mut patched = vram.to_vec();
    patched[offset..offset + tiles.len()].copy_from_slice(tiles);
    log(LogCategory::Tiles, LogLevel::Info, || {
        format!(
            "VRAM: wrote {} tiles at 0x{:04X}",
            tiles.len() / BYTES_PER_TILE,
            offset
        )
    });
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_sizes() {
        assert!(read_tiles(&vec![0; VRAM_SIZE], 0, 32).is_ok());
        assert!(read_tiles(&vec![0; 0x8000], 0, 32).is_ok());
        assert_eq!(
            read_tiles(&vec![0; 0x1234], 0, 32),
            Err(VramError::WrongSize {
                len: 0x1234,
                expected: VRAM_SIZE
            })
        );
        assert_eq!(
            write_tiles(&[], 0, &[]),
            Err(VramError::WrongSize {
                len: 0,
                expected: VRAM_SIZE
            })
        );
    }

    #[test]
    fn test_read_drops_partial_tile() {
        let mut vram = vec![0u8; VRAM_SIZE];
        vram[DEFAULT_SPRITE_OFFSET] = 0x80;
        let tiles = read_tiles(&vram, DEFAULT_SPRITE_OFFSET, 70).unwrap();
        assert_eq!(tiles.len(), 64);
        assert_eq!(tiles[0], 0x80);
    }

    #[test]
    fn test_ranges_past_the_end() {
        let vram = vec![0u8; VRAM_SIZE];
        assert_eq!(
            read_tiles(&vram, 0xFFF0, 0x20),
            Err(VramError::OutOfBounds {
                offset: 0xFFF0,
                size: 0x20
            })
        );
        assert_eq!(
            write_tiles(&vram, usize::MAX, &[1]),
            Err(VramError::OutOfBounds {
                offset: usize::MAX,
                size: 1
            })
        );
    }

    #[test]
    fn test_write_leaves_input_untouched() {
        let vram = vec![0u8; VRAM_SIZE];
        let patched = write_tiles(&vram, 0xC020, &[0xAA; 32]).unwrap();
        assert!(vram.iter().all(|&b| b == 0));
        assert_eq!(&patched[0xC020..0xC040], &[0xAA; 32]);
        assert_eq!(patched[0xC01F], 0);
        assert_eq!(patched[0xC040], 0);
    }
}
