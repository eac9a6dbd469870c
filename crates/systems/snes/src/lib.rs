//! SNES ROM tooling for HAL-compressed sprite graphics.
//!
//! Builds on the pure codecs in `hal_core` with everything that knows about
//! ROM layout:
//!
//! - **header**: copier-header detection, LoROM/HiROM header parsing and
//!   the checksum/complement pair
//! - **config**: sprite-location tables and JSON settings
//! - **scan**: bounded-decode scanning for sprite-shaped data
//! - **extract**: ROM region -> validated tile bitmap
//! - **inject**: edited bitmap -> recompressed, checksummed ROM copy
//! - **vram**: uncompressed tiles in a 64 KiB VRAM dump
//!
//! Every operation borrows the caller's buffer for the duration of one call
//! and never keeps it.

pub mod config;
pub mod extract;
pub mod header;
pub mod inject;
pub mod scan;
pub mod vram;

#[cfg(test)]
mod fixtures;

pub use config::{Settings, SpriteLocation, SpriteTable};
pub use extract::{DecodedSprite, ExtractConfig, Extractor, DEFAULT_EXTRACT_CAP};
pub use header::{compute_checksum, parse_header, recompute_and_patch, Mapping, RomHeader};
pub use inject::{BlockExtent, Injection, Injector, PatchPlan};
pub use scan::{Direction, ScanConfig, ScanHit, Scanner};

use std::path::PathBuf;

use hal_core::{DecodeError, TileError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("ROM body is {len} bytes, at least 32 KiB required")]
    TooSmall { len: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field}: '{value}' is not a hex (0x...) or decimal offset")]
    BadOffset { field: String, value: String },
    #[error("sprite '{label}' at 0x{offset:X} lies outside the {len} byte ROM")]
    OffsetOutOfRange {
        label: String,
        offset: usize,
        len: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("scan range 0x{start:X}..0x{end:X} is outside the {len} byte buffer")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("scan step must be at least 1")]
    ZeroStep,
    #[error("no decode size limits configured")]
    NoSizeLimits,
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("offset 0x{offset:X} is outside the {len} byte buffer")]
    OutOfBounds { offset: usize, len: usize },
    #[error("decompression at 0x{offset:X} failed: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: DecodeError,
    },
    #[error("no whole tiles decoded at 0x{offset:X}")]
    Empty { offset: usize },
    #[error(
        "data at 0x{:X} does not look like a sprite (entropy {:.2}, plane consistency {:.2})",
        .sprite.source_offset,
        .sprite.score.entropy,
        .sprite.score.plane_consistency
    )]
    LowQuality { sprite: Box<DecodedSprite> },
    #[error(transparent)]
    Tiles(#[from] TileError),
    #[error(transparent)]
    Vram(#[from] VramError),
}

impl ExtractionError {
    /// The best-effort decode carried by a low quality result.
    pub fn into_sprite(self) -> Option<DecodedSprite> {
        match self {
            ExtractionError::LowQuality { sprite } => Some(*sprite),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("compressed sprite needs {needed} bytes but the hole holds {available}")]
    DoesNotFit { needed: usize, available: usize },
    #[error("hole 0x{offset:X}+{size} is outside the {len} byte ROM")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },
    #[error("existing block at 0x{offset:X} does not decode: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Tiles(#[from] TileError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Vram(#[from] VramError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VramError {
    #[error("VRAM dump is {len} bytes, expected {expected}")]
    WrongSize { len: usize, expected: usize },
    #[error("VRAM range 0x{offset:X}+{size} runs past the end of VRAM")]
    OutOfBounds { offset: usize, size: usize },
}
