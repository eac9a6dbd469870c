//! Heuristics that separate drawn sprite tiles from over-decoded garbage.
//!
//! Two measurements are taken over the whole tiles of a decoded buffer:
//!
//! - **entropy**: Shannon entropy of the 4-bit nibbles, divided by 4 so it
//!   lands in [0, 1]. Flat fills sit near 0, noise and text near 1, drawn
//!   art in between.
//! - **plane consistency**: the share of non-blank tiles whose bitplanes
//!   are not pathological. A tile of one repeated non-zero byte, or a tile
//!   where every plane repeats one row byte and one of those bytes is a
//!   partial pattern, comes from fill commands running past the real data.
//!
//! The thresholds are empirical and live in [`ValidatorConfig`].

use serde::{Deserialize, Serialize};

use crate::logging::{log, LogCategory, LogLevel};
use crate::tile::BYTES_PER_TILE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Lowest acceptable normalised nibble entropy
    pub entropy_min: f64,
    /// Highest acceptable normalised nibble entropy
    pub entropy_max: f64,
    pub min_plane_consistency: f64,
    /// Non-blank tiles inspected for plane consistency
    pub tile_sample: usize,
    /// Fewer whole tiles than this never passes
    pub min_tiles: usize,
    /// Largest trailing partial tile tolerated, in bytes
    pub max_misalignment: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            entropy_min: 0.10,
            entropy_max: 0.95,
            min_plane_consistency: 0.5,
            tile_sample: 128,
            min_tiles: 2,
            max_misalignment: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpriteQualityScore {
    pub entropy: f64,
    pub plane_consistency: f64,
    pub pass: bool,
    /// Whole tiles in the buffer
    pub tile_count: usize,
    /// Bytes after the last whole tile
    pub trailing_bytes: usize,
}

impl SpriteQualityScore {
    /// Scalar for ordering candidates; every passing score outranks every
    /// failing one.
    pub fn rank(&self) -> f64 {
        // Moderate entropy (around 0.5) reads as the most sprite-like
        let entropy_fit = (1.0 - (self.entropy - 0.5).abs() * 2.0).clamp(0.0, 1.0);
        let base = self.plane_consistency * 0.6 + entropy_fit * 0.4;
        if self.pass {
            1.0 + base
        } else {
            base
        }
    }
}

/// Scores decoded buffers against a [`ValidatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct SpriteDataValidator {
    config: ValidatorConfig,
}

impl SpriteDataValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn score(&self, decoded: &[u8]) -> SpriteQualityScore {
        let cfg = &self.config;
        let tile_count = decoded.len() / BYTES_PER_TILE;
        let trailing_bytes = decoded.len() % BYTES_PER_TILE;
        let tiles = &decoded[..tile_count * BYTES_PER_TILE];

        let entropy = nibble_entropy(tiles);
        let plane_consistency = plane_consistency(tiles, cfg.tile_sample);

        let pass = tile_count >= cfg.min_tiles.max(1)
            && trailing_bytes <= cfg.max_misalignment
            && entropy >= cfg.entropy_min
            && entropy <= cfg.entropy_max
            && plane_consistency >= cfg.min_plane_consistency;

        log(LogCategory::Validate, LogLevel::Trace, || {
            format!(
                "Validate: {} tiles (+{}), entropy {:.3}, consistency {:.3} -> {}",
                tile_count,
                trailing_bytes,
                entropy,
                plane_consistency,
                if pass { "pass" } else { "fail" }
            )
        });

        SpriteQualityScore {
            entropy,
            plane_consistency,
            pass,
            tile_count,
            trailing_bytes,
        }
    }
}

/// Shannon entropy of the nibbles of `data`, in [0, 1].
fn nibble_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 16];
    for &byte in data {
        counts[(byte >> 4) as usize] += 1;
        counts[(byte & 0x0F) as usize] += 1;
    }
    let total = (data.len() * 2) as f64;
    let bits: f64 = counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum();
    bits / 4.0
}

/// Share of the first `sample` non-blank tiles that are not pathological.
fn plane_consistency(tiles: &[u8], sample: usize) -> f64 {
    let mut checked = 0usize;
    let mut healthy = 0usize;
    for tile in tiles
        .chunks_exact(BYTES_PER_TILE)
        .filter(|tile| tile.iter().any(|&b| b != 0))
        .take(sample)
    {
        checked += 1;
        if !is_pathological(tile) {
            healthy += 1;
        }
    }
    if checked == 0 {
        0.0
    } else {
        healthy as f64 / checked as f64
    }
}

fn is_pathological(tile: &[u8]) -> bool {
    let first = tile[0];
    if first != 0 && tile.iter().all(|&b| b == first) {
        return true;
    }

    // Plane p of row r lives at (p / 2) * 16 + 2r + (p % 2)
    let mut partial_stripe = false;
    for plane in 0..4 {
        let base = (plane / 2) * 16 + (plane % 2);
        let row0 = tile[base];
        if (1..8).any(|row| tile[base + row * 2] != row0) {
            return false;
        }
        if row0 != 0x00 && row0 != 0xFF {
            partial_stripe = true;
        }
    }
    partial_stripe
}
