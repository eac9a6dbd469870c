//! Edited bitmap -> recompressed block in a patched ROM copy.
//!
//! The new block has to fit the hole left by the old one. Normal mode is
//! tried first, fast mode only when normal does not fit, and nothing is
//! written unless one of them does. The rest of the hole is filled with
//! `0xFF` and the header checksum is recomputed on the copy. The caller's
//! ROM is never modified.

use hal_core::logging::{log, LogCategory, LogLevel};
use hal_core::{
    compress, decompress, indices_to_planar, CompressionMode, DecodeError, IndexGrid,
    BYTES_PER_TILE, MAX_DECODED_SIZE,
};
use serde::Serialize;

use crate::header::{recompute_and_patch, RomHeader};
use crate::{vram, InjectionError};

const HOLE_PADDING: u8 = 0xFF;

/// What an injection wrote, kept for audit and undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchPlan {
    pub target_offset: usize,
    pub compressed_bytes: Vec<u8>,
    pub original_hole_size: usize,
    pub mode: CompressionMode,
    /// Hole contents before the patch
    #[serde(skip)]
    pub replaced: Vec<u8>,
}

impl PatchPlan {
    /// Hole bytes left over after the new block.
    pub fn slack(&self) -> usize {
        self.original_hole_size - self.compressed_bytes.len()
    }

    /// Copy of a patched `rom` with the hole restored and the checksum
    /// recomputed.
    pub fn revert(&self, rom: &[u8]) -> Result<Vec<u8>, InjectionError> {
        let end = check_hole(rom, self.target_offset, self.replaced.len())?;
        let mut restored = rom.to_vec();
        restored[self.target_offset..end].copy_from_slice(&self.replaced);
        recompute_and_patch(&mut restored)?;
        Ok(restored)
    }
}

/// An existing compressed block, as measured by [`Injector::measure_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockExtent {
    /// Terminator included
    pub compressed_size: usize,
    pub decoded_size: usize,
}

impl BlockExtent {
    /// Whole tiles the block decodes to.
    pub fn tile_count(&self) -> usize {
        self.decoded_size / BYTES_PER_TILE
    }
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub rom: Vec<u8>,
    pub plan: PatchPlan,
    /// Header of the patched copy, checksum already updated
    pub header: RomHeader,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Injector;

impl Injector {
    pub fn new() -> Self {
        Self
    }

    /// Compress `sprite` into the `original_hole_size` bytes at
    /// `target_offset` of a copy of `rom`.
    pub fn inject(
        &self,
        rom: &[u8],
        target_offset: usize,
        original_hole_size: usize,
        sprite: &IndexGrid,
    ) -> Result<Injection, InjectionError> {
        let hole_end = check_hole(rom, target_offset, original_hole_size)?;
        let planar = indices_to_planar(sprite)?;

        let (compressed, mode) = fit(&planar, original_hole_size)?;
        let plan = PatchPlan {
            target_offset,
            original_hole_size,
            mode,
            replaced: rom[target_offset..hole_end].to_vec(),
            compressed_bytes: compressed,
        };

        let mut patched = rom.to_vec();
        let block_end = target_offset + plan.compressed_bytes.len();
        patched[target_offset..block_end].copy_from_slice(&plan.compressed_bytes);
        patched[block_end..hole_end].fill(HOLE_PADDING);
        let header = recompute_and_patch(&mut patched)?;

        log(LogCategory::Inject, LogLevel::Info, || {
            format!(
                "Inject: {} tiles -> {} bytes at 0x{:06X} ({:?}, {} bytes slack), checksum 0x{:04X}",
                sprite.tile_count(),
                plan.compressed_bytes.len(),
                target_offset,
                mode,
                plan.slack(),
                header.checksum
            )
        });

        Ok(Injection {
            rom: patched,
            plan,
            header,
        })
    }

    /// Compressed and decoded size of the block at `offset`.
    pub fn measure_block(&self, rom: &[u8], offset: usize) -> Result<BlockExtent, InjectionError> {
        check_hole(rom, offset, 1)?;
        let decoded = decompress(rom, offset, MAX_DECODED_SIZE)
            .map_err(|source| InjectionError::Decode { offset, source })?;
        if !decoded.is_complete() {
            return Err(InjectionError::Decode {
                offset,
                source: DecodeError::Oversized {
                    limit: MAX_DECODED_SIZE,
                },
            });
        }
        log(LogCategory::Inject, LogLevel::Debug, || {
            format!(
                "Inject: block at 0x{:06X} is {} bytes ({} decoded)",
                offset,
                decoded.consumed,
                decoded.data.len()
            )
        });
        Ok(BlockExtent {
            compressed_size: decoded.consumed,
            decoded_size: decoded.data.len(),
        })
    }

    /// Length of the compressed block at `offset`, terminator included.
    pub fn hole_size_at(&self, rom: &[u8], offset: usize) -> Result<usize, InjectionError> {
        self.measure_block(rom, offset).map(|block| block.compressed_size)
    }

    /// Uncompressed write of `sprite` into a copy of a VRAM dump.
    pub fn inject_vram(
        &self,
        vram_dump: &[u8],
        offset: usize,
        sprite: &IndexGrid,
    ) -> Result<Vec<u8>, InjectionError> {
        let planar = indices_to_planar(sprite)?;
        Ok(vram::write_tiles(vram_dump, offset, &planar)?)
    }
}

/// End of the hole, or `OutOfBounds`.
fn check_hole(rom: &[u8], offset: usize, size: usize) -> Result<usize, InjectionError> {
    match offset.checked_add(size) {
        Some(end) if end <= rom.len() => Ok(end),
        _ => Err(InjectionError::OutOfBounds {
            offset,
            size,
            len: rom.len(),
        }),
    }
}

/// Smallest-effort encoding that fits `available` bytes.
fn fit(planar: &[u8], available: usize) -> Result<(Vec<u8>, CompressionMode), InjectionError> {
    let normal = compress(planar, CompressionMode::Normal);
    if normal.len() <= available {
        return Ok((normal, CompressionMode::Normal));
    }

    log(LogCategory::Inject, LogLevel::Info, || {
        format!(
            "Inject: normal mode needs {} bytes, hole holds {}; retrying fast",
            normal.len(),
            available
        )
    });
    let fast = compress(planar, CompressionMode::Fast);
    if fast.len() <= available {
        return Ok((fast, CompressionMode::Fast));
    }

    Err(InjectionError::DoesNotFit {
        needed: normal.len().min(fast.len()),
        available,
    })
}
