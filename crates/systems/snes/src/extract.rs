//! ROM region -> validated palette-index bitmap.
//!
//! An extraction decodes with a bounded cap, cuts the output to whole
//! tiles, lays those tiles out `tiles_per_row` wide and scores them. A
//! failing score is an error carrying the decoded sprite, so callers that
//! want the picture anyway can still have it.
//!
//! Some blocks carry a sprite behind unrelated data in the same stream.
//! When the plain decode fails and the stream keeps going past the cap,
//! the extractor over-decodes and looks for a passing window at a few
//! common sub-offsets.

use hal_core::logging::{log, LogCategory, LogLevel};
use hal_core::{
    decompress, planar_to_indices_with_layout, IndexGrid, SpriteDataValidator, SpriteQualityScore,
    ValidatorConfig, BYTES_PER_TILE, DEFAULT_TILES_PER_ROW,
};
use serde::{Deserialize, Serialize};

use crate::config::{Settings, SpriteLocation};
use crate::vram;
use crate::ExtractionError;

/// Output cap when no expected size is known.
pub const DEFAULT_EXTRACT_CAP: usize = 8192;

/// Sub-offsets into an over-decoded stream tried by the embedded search.
const EMBEDDED_SUB_OFFSETS: [usize; 6] = [0x0, 0x100, 0x200, 0x400, 0x800, 0x1000];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Output cap used when the caller gives no expected size
    pub default_cap: usize,
    pub tiles_per_row: usize,
    /// Look for a passing window inside an over-decode when the plain
    /// decode fails
    pub embedded_search: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            default_cap: DEFAULT_EXTRACT_CAP,
            tiles_per_row: DEFAULT_TILES_PER_ROW,
            embedded_search: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSprite {
    pub pixels: IndexGrid,
    pub width: usize,
    pub height: usize,
    /// Planar bytes behind `pixels`, whole tiles only
    pub byte_size: usize,
    pub source_offset: usize,
    /// Compressed bytes read; zero for uncompressed VRAM tiles
    pub compressed_size: usize,
    /// Where the sprite starts inside the decoded stream; non-zero only
    /// when found by the embedded search
    pub window_offset: usize,
    pub score: SpriteQualityScore,
}

impl DecodedSprite {
    pub fn tile_count(&self) -> usize {
        self.pixels.tile_count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractConfig,
    validator: SpriteDataValidator,
}

impl Extractor {
    pub fn new(config: ExtractConfig, validator: ValidatorConfig) -> Self {
        Self {
            config,
            validator: SpriteDataValidator::new(validator),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.extract.clone(), settings.validator.clone())
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Decode the sprite at `offset`, capped at `expected_size` bytes (or
    /// the configured default), and require a passing score.
    pub fn extract(
        &self,
        buffer: &[u8],
        offset: usize,
        expected_size: Option<usize>,
    ) -> Result<DecodedSprite, ExtractionError> {
        if offset >= buffer.len() {
            return Err(ExtractionError::OutOfBounds {
                offset,
                len: buffer.len(),
            });
        }
        let cap = expected_size.unwrap_or(self.config.default_cap);

        let decoded = decompress(buffer, offset, cap)
            .map_err(|source| ExtractionError::Decode { offset, source })?;
        let sprite = self.build(offset, &decoded.data, decoded.consumed, 0)?;
        if sprite.score.pass {
            log(LogCategory::Rom, LogLevel::Info, || {
                format!(
                    "Extract: 0x{:06X} -> {} tiles ({} compressed bytes)",
                    offset,
                    sprite.tile_count(),
                    sprite.compressed_size
                )
            });
            return Ok(sprite);
        }

        if self.config.embedded_search && !decoded.is_complete() {
            if let Some(found) = self.search_embedded(buffer, offset, cap) {
                return Ok(found);
            }
        }

        log(LogCategory::Rom, LogLevel::Warn, || {
            format!(
                "Extract: 0x{:06X} fails validation (entropy {:.3}, consistency {:.3})",
                offset, sprite.score.entropy, sprite.score.plane_consistency
            )
        });
        Err(ExtractionError::LowQuality {
            sprite: Box::new(sprite),
        })
    }

    /// [`Extractor::extract`] that hands back low quality sprites instead of
    /// failing on them.
    pub fn extract_best_effort(
        &self,
        buffer: &[u8],
        offset: usize,
        expected_size: Option<usize>,
    ) -> Result<DecodedSprite, ExtractionError> {
        self.extract(buffer, offset, expected_size)
            .or_else(|err| match err {
                ExtractionError::LowQuality { sprite } => Ok(*sprite),
                other => Err(other),
            })
    }

    /// Try the primary offset, then each variant. Returns the first passing
    /// sprite, otherwise the primary offset's failure.
    pub fn extract_location(
        &self,
        buffer: &[u8],
        location: &SpriteLocation,
    ) -> Result<DecodedSprite, ExtractionError> {
        let mut primary_failure = None;
        for offset in location.candidates() {
            match self.extract(buffer, offset, location.expected_size_bytes) {
                Ok(sprite) => {
                    if offset != location.offset {
                        log(LogCategory::Rom, LogLevel::Info, || {
                            format!(
                                "Extract: '{}' found at variant offset 0x{:06X}",
                                location.label, offset
                            )
                        });
                    }
                    return Ok(sprite);
                }
                Err(err) => {
                    log(LogCategory::Rom, LogLevel::Debug, || {
                        format!("Extract: '{}' at 0x{:06X}: {}", location.label, offset, err)
                    });
                    primary_failure.get_or_insert(err);
                }
            }
        }
        // candidates() always yields the primary offset first
        Err(primary_failure.unwrap_or(ExtractionError::Empty {
            offset: location.offset,
        }))
    }

    /// Uncompressed tiles from a VRAM dump. Scored but never rejected.
    pub fn extract_vram(
        &self,
        vram: &[u8],
        offset: usize,
        byte_len: usize,
    ) -> Result<DecodedSprite, ExtractionError> {
        let tiles = vram::read_tiles(vram, offset, byte_len)?;
        self.build(offset, tiles, 0, 0)
    }

    fn search_embedded(&self, buffer: &[u8], offset: usize, cap: usize) -> Option<DecodedSprite> {
        let over_cap = cap + EMBEDDED_SUB_OFFSETS[EMBEDDED_SUB_OFFSETS.len() - 1];
        let over = decompress(buffer, offset, over_cap).ok()?;

        for sub in EMBEDDED_SUB_OFFSETS {
            let Some(window) = over.data.get(sub..sub + cap) else {
                break;
            };
            if !self.validator.score(window).pass {
                continue;
            }
            let sprite = self.build(offset, window, over.consumed, sub).ok()?;
            log(LogCategory::Rom, LogLevel::Info, || {
                format!(
                    "Extract: 0x{:06X} holds a sprite at decoded offset +0x{:X}",
                    offset, sub
                )
            });
            return Some(sprite);
        }
        None
    }

    fn build(
        &self,
        offset: usize,
        data: &[u8],
        compressed_size: usize,
        window_offset: usize,
    ) -> Result<DecodedSprite, ExtractionError> {
        let tile_count = data.len() / BYTES_PER_TILE;
        if tile_count == 0 {
            return Err(ExtractionError::Empty { offset });
        }
        let trailing = data.len() % BYTES_PER_TILE;
        if trailing != 0 {
            log(LogCategory::Tiles, LogLevel::Warn, || {
                format!(
                    "Extract: dropping {} trailing bytes at 0x{:06X}",
                    trailing, offset
                )
            });
        }

        let score = self.validator.score(data);
        let pixels = planar_to_indices_with_layout(data, tile_count, self.config.tiles_per_row)?;
        Ok(DecodedSprite {
            width: pixels.width(),
            height: pixels.height(),
            byte_size: tile_count * BYTES_PER_TILE,
            pixels,
            source_offset: offset,
            compressed_size,
            window_offset,
            score,
        })
    }
}
