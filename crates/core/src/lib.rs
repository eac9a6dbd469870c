//! Core primitives for working with HAL-compressed SNES sprite graphics.
//!
//! - [`cursor`]: bounds-checked byte/bit cursors every codec is built on
//! - [`hal`]: the HAL run-length/back-reference codec
//! - [`tile`]: SNES 4bpp planar tiles <-> linear palette-index bitmaps
//! - [`validate`]: heuristics that tell drawn sprite data from garbage
//! - [`logging`]: category/level logging shared by every crate in the workspace
//!
//! Everything here is a pure function over caller-owned buffers. Nothing
//! holds on to a ROM or VRAM image past a single call.

pub mod cursor;
pub mod hal;
pub mod logging;
pub mod tile;
pub mod validate;

pub use cursor::{BitCursor, BitWriter};
pub use hal::{
    compress, compressed_size, decompress, CompressionMode, Decoded, StopReason, MAX_DECODED_SIZE,
};
pub use tile::{
    indices_to_planar, planar_to_indices, planar_to_indices_with_layout, IndexGrid,
    Snes4BppDecoder, TileDecoder, TileError, BYTES_PER_TILE, DEFAULT_TILES_PER_ROW, TILE_SIZE,
};
pub use validate::{SpriteDataValidator, SpriteQualityScore, ValidatorConfig};

use thiserror::Error;

/// Failure of a single decompression attempt.
///
/// These are never fatal: a scanner treats every variant as "not a sprite
/// here" and moves on to the next candidate offset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("compressed stream truncated at offset 0x{offset:X}")]
    Truncated { offset: usize },
    #[error("invalid command byte 0x{opcode:02X} at offset 0x{offset:X}")]
    InvalidOpcode { offset: usize, opcode: u8 },
    #[error(
        "back-reference at offset 0x{offset:X} points to 0x{position:X} but only {available} bytes are decoded"
    )]
    InvalidBackref {
        offset: usize,
        position: usize,
        available: usize,
    },
    #[error("decoded output exceeds the {limit} byte ceiling")]
    Oversized { limit: usize },
}
