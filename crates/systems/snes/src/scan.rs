//! Finding HAL-compressed sprites in undifferentiated ROM or VRAM data.
//!
//! At each candidate offset the scanner decodes with a series of output
//! caps (the size-limit ladder, smallest first) and scores each result with
//! the [`SpriteDataValidator`]. The first passing decode wins. A decode
//! that stops on its own terminator below the cap gives the same bytes at
//! every larger cap, so the ladder stops there.
//!
//! With `adaptive_step`, the range is cut into fixed 16 KiB regions and
//! each region gets its own step from a quick-check density sample: dense
//! regions are probed more finely, empty ones more coarsely. Regions are
//! measured from the scan start, so sequential and parallel scans probe
//! the same offsets.
//!
//! Decode failures never surface: an offset that does not decode is simply
//! not a sprite. Only a range outside the buffer is a caller error.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

use hal_core::logging::{log, LogCategory, LogLevel};
use hal_core::{decompress, SpriteDataValidator, SpriteQualityScore, ValidatorConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Settings, SpriteLocation};
use crate::ScanError;

/// Bytes examined by the quick pre-check.
const QUICK_CHECK_LEN: usize = 16;

/// Offsets returned by [`Scanner::find_best_offsets`].
const BEST_OFFSET_COUNT: usize = 5;

/// Region length for adaptive stepping.
const ADAPTIVE_REGION: usize = 0x4000;

/// Spacing of the density samples inside a region.
const DENSITY_SAMPLE_STEP: usize = 0x100;

/// Finest and coarsest adaptive steps.
const MIN_ADAPTIVE_STEP: usize = 0x40;
const MAX_ADAPTIVE_STEP: usize = 0x1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Distance between candidate offsets
    pub step: usize,
    /// Output caps tried in increasing order
    pub size_limits: Vec<usize>,
    /// Furthest [`Scanner::find_adjacent`] probes from its start
    pub max_adjacent_distance: usize,
    /// Step used by [`Scanner::find_best_offsets`]
    pub fine_step: usize,
    /// Reject offsets whose first bytes are uniform or nearly so
    pub quick_check: bool,
    /// Resume after the compressed block of a hit instead of at the next step
    pub skip_after_hit: bool,
    /// Pick the step per region from its quick-check density
    pub adaptive_step: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step: 0x100,
            size_limits: vec![0x800, 0x1000, 0x2000, 0x4000, 0x8000],
            max_adjacent_distance: 0x40000,
            fine_step: 0x10,
            quick_check: true,
            skip_after_hit: false,
            adaptive_step: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A validator-approved candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanHit {
    pub location: SpriteLocation,
    pub score: SpriteQualityScore,
    /// 0-1 blend of decode size, compression ratio, termination and score
    pub confidence: f64,
    pub compressed_size: usize,
    pub decoded_size: usize,
}

impl ScanHit {
    pub fn offset(&self) -> usize {
        self.location.offset
    }

    /// First byte after the hit's compressed block.
    fn resume_offset(&self) -> usize {
        self.offset() + self.compressed_size.max(1)
    }
}

/// Best first; equal scores in offset order.
fn rank_order(a: &ScanHit, b: &ScanHit) -> CmpOrdering {
    b.score
        .rank()
        .total_cmp(&a.score.rank())
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.offset().cmp(&b.offset()))
}

#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScanConfig,
    validator: SpriteDataValidator,
}

impl Scanner {
    pub fn new(mut config: ScanConfig, validator: ValidatorConfig) -> Self {
        config.size_limits.sort_unstable();
        config.size_limits.dedup();
        Self {
            config,
            validator: SpriteDataValidator::new(validator),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.scan.clone(), settings.validator.clone())
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn check_range(&self, len: usize, start: usize, end: usize) -> Result<(), ScanError> {
        if self.config.step == 0 {
            return Err(ScanError::ZeroStep);
        }
        if self.config.size_limits.is_empty() {
            return Err(ScanError::NoSizeLimits);
        }
        if start > end || end > len {
            return Err(ScanError::OutOfBounds { start, end, len });
        }
        Ok(())
    }

    /// Try the size-limit ladder at one offset.
    pub fn probe(&self, buffer: &[u8], offset: usize) -> Option<ScanHit> {
        if offset >= buffer.len() {
            return None;
        }
        if self.config.quick_check && !looks_compressed(&buffer[offset..]) {
            return None;
        }

        for &limit in &self.config.size_limits {
            let decoded = decompress(buffer, offset, limit).ok()?;
            if decoded.data.is_empty() {
                return None;
            }

            let score = self.validator.score(&decoded.data);
            if score.pass {
                let hit = ScanHit {
                    location: SpriteLocation {
                        label: format!("sprite_{:06X}", offset),
                        offset,
                        expected_size_bytes: Some(decoded.data.len()),
                        offset_variants: Vec::new(),
                        description: String::new(),
                    },
                    score,
                    confidence: confidence(&score, decoded.consumed, decoded.data.len(), decoded.is_complete()),
                    compressed_size: decoded.consumed,
                    decoded_size: decoded.data.len(),
                };
                log(LogCategory::Scan, LogLevel::Debug, || {
                    format!(
                        "Scan: hit at 0x{:06X}, {} tiles, {} -> {} bytes, confidence {:.2}",
                        offset,
                        score.tile_count,
                        hit.compressed_size,
                        hit.decoded_size,
                        hit.confidence
                    )
                });
                return Some(hit);
            }
            if decoded.is_complete() {
                return None;
            }
        }
        None
    }

    /// Lazily yield hits in offset order.
    ///
    /// The range is checked up front; `cancel` is polled before every
    /// probe and ends the iteration when set.
    pub fn scan_iter<'a>(
        &'a self,
        buffer: &'a [u8],
        start: usize,
        end: usize,
        cancel: &'a AtomicBool,
    ) -> Result<ScanIter<'a>, ScanError> {
        self.check_range(buffer.len(), start, end)?;
        Ok(ScanIter {
            scanner: self,
            buffer,
            strides: self.strides(buffer, start, end),
            resume: start,
            cancel,
        })
    }

    /// Every hit in `start..end`, best first.
    ///
    /// Deterministic for identical arguments. A cancelled scan returns the
    /// hits found before cancellation.
    pub fn scan_range(
        &self,
        buffer: &[u8],
        start: usize,
        end: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<ScanHit>, ScanError> {
        log(LogCategory::Scan, LogLevel::Info, || {
            format!(
                "Scan: 0x{:06X}..0x{:06X} step 0x{:X}",
                start, end, self.config.step
            )
        });
        let mut hits: Vec<ScanHit> = self.scan_iter(buffer, start, end, cancel)?.collect();
        hits.sort_by(rank_order);
        log(LogCategory::Scan, LogLevel::Info, || {
            format!("Scan: {} candidate(s)", hits.len())
        });
        Ok(hits)
    }

    /// [`Scanner::scan_range`] split into `chunk`-byte pieces scanned on the
    /// rayon pool. Produces the same hits in the same order.
    pub fn scan_parallel(
        &self,
        buffer: &[u8],
        start: usize,
        end: usize,
        chunk: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<ScanHit>, ScanError> {
        self.check_range(buffer.len(), start, end)?;
        let chunk = chunk.max(1);

        // Same offsets as the sequential scan, grouped by chunk
        let offsets: Vec<usize> = self.strides(buffer, start, end).collect();
        let chunks: Vec<&[usize]> = offsets
            .chunk_by(|a, b| (a - start) / chunk == (b - start) / chunk)
            .collect();
        log(LogCategory::Scan, LogLevel::Info, || {
            format!(
                "Scan: 0x{:06X}..0x{:06X}, {} offsets in {} parallel chunk(s)",
                start,
                end,
                offsets.len(),
                chunks.len()
            )
        });

        let mut hits: Vec<ScanHit> = chunks
            .par_iter()
            .flat_map_iter(|group| {
                group
                    .iter()
                    .take_while(|_| !cancel.load(Ordering::Relaxed))
                    .filter_map(|&offset| self.probe(buffer, offset))
                    .collect::<Vec<_>>()
            })
            .collect();

        if self.config.skip_after_hit {
            hits.sort_by_key(ScanHit::offset);
            let mut resume = start;
            hits.retain(|hit| {
                if hit.offset() < resume {
                    return false;
                }
                resume = hit.resume_offset();
                true
            });
        }

        hits.sort_by(rank_order);
        Ok(hits)
    }

    /// Candidate offsets in `start..end`.
    fn strides<'a>(&'a self, buffer: &'a [u8], start: usize, end: usize) -> Strides<'a> {
        Strides {
            scanner: self,
            buffer,
            next: start,
            step: self.config.step,
            region_end: start,
            end,
        }
    }

    /// Step for the region `start..end`, from how many density samples
    /// pass the quick check (per KiB).
    fn region_step(&self, buffer: &[u8], start: usize, end: usize) -> usize {
        let step = self.config.step;
        let len = end - start;
        let samples = (0..len.saturating_sub(QUICK_CHECK_LEN))
            .step_by(DENSITY_SAMPLE_STEP)
            .filter(|&i| looks_compressed(&buffer[start + i..]))
            .count();
        let density = samples as f64 / (len as f64 / 1024.0);

        let adapted = if density > 0.5 {
            (step / 4).max(MIN_ADAPTIVE_STEP).min(step)
        } else if density > 0.1 {
            (step / 2).max(MIN_ADAPTIVE_STEP * 2).min(step)
        } else if density < 0.01 {
            step.saturating_mul(4).min(MAX_ADAPTIVE_STEP).max(step)
        } else {
            step
        };
        log(LogCategory::Scan, LogLevel::Trace, || {
            format!(
                "Scan: region 0x{:06X}..0x{:06X} density {:.3}/KiB, step 0x{:X}",
                start, end, density, adapted
            )
        });
        adapted
    }

    /// Nearest passing offset in `direction`, probing every `step` bytes up
    /// to `max_adjacent_distance` away.
    pub fn find_adjacent(&self, buffer: &[u8], offset: usize, direction: Direction) -> Option<usize> {
        let step = self.config.step.max(1);
        let limit = self.config.max_adjacent_distance;

        let found = (1..)
            .map(|i| i * step)
            .take_while(|&distance| distance <= limit)
            .map_while(|distance| match direction {
                Direction::Forward => Some(offset + distance).filter(|&o| o < buffer.len()),
                Direction::Backward => offset.checked_sub(distance),
            })
            .find(|&candidate| self.probe(buffer, candidate).is_some());

        log(LogCategory::Scan, LogLevel::Debug, || match found {
            Some(next) => format!("Scan: {:?} from 0x{:06X} -> 0x{:06X}", direction, offset, next),
            None => format!("Scan: nothing {:?} from 0x{:06X}", direction, offset),
        });
        found
    }

    /// Fine-step scan within `radius` of `base`, on the `fine_step` grid;
    /// up to five offsets, best first.
    pub fn find_best_offsets(&self, buffer: &[u8], base: usize, radius: usize) -> Vec<usize> {
        let fine = Scanner {
            config: ScanConfig {
                step: self.config.fine_step.max(1),
                skip_after_hit: false,
                adaptive_step: false,
                ..self.config.clone()
            },
            validator: self.validator.clone(),
        };
        let step = fine.config.step;
        let start = (base.saturating_sub(radius) / step * step).min(buffer.len());
        let end = base.saturating_add(radius).min(buffer.len());
        let never = AtomicBool::new(false);

        fine.scan_range(buffer, start, end, &never)
            .map(|hits| {
                hits.into_iter()
                    .take(BEST_OFFSET_COUNT)
                    .map(|hit| hit.offset())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Candidate offsets of one scan. Without adaptive stepping the whole range
/// is a single region on the configured step.
struct Strides<'a> {
    scanner: &'a Scanner,
    buffer: &'a [u8],
    next: usize,
    step: usize,
    region_end: usize,
    end: usize,
}

impl Strides<'_> {
    fn enter_region(&mut self, region_start: usize) {
        let scanner = self.scanner;
        self.next = region_start;
        if scanner.config.adaptive_step {
            self.region_end = (region_start + ADAPTIVE_REGION).min(self.end);
            self.step = scanner.region_step(self.buffer, region_start, self.region_end);
        } else {
            self.region_end = self.end;
            self.step = scanner.config.step;
        }
    }

    fn finish(&mut self) {
        self.next = self.end;
        self.region_end = self.end;
    }
}

impl Iterator for Strides<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.next < self.region_end {
                let offset = self.next;
                self.next = offset.saturating_add(self.step);
                return Some(offset);
            }
            if self.region_end >= self.end {
                return None;
            }
            self.enter_region(self.region_end);
        }
    }
}

/// Lazy scan in offset order, see [`Scanner::scan_iter`].
pub struct ScanIter<'a> {
    scanner: &'a Scanner,
    buffer: &'a [u8],
    strides: Strides<'a>,
    /// Offsets below this lie inside the previous hit's block
    resume: usize,
    cancel: &'a AtomicBool,
}

impl Iterator for ScanIter<'_> {
    type Item = ScanHit;

    fn next(&mut self) -> Option<ScanHit> {
        while let Some(offset) = self.strides.next() {
            if self.cancel.load(Ordering::Relaxed) {
                log(LogCategory::Scan, LogLevel::Info, || {
                    format!("Scan: cancelled at 0x{:06X}", offset)
                });
                self.strides.finish();
                return None;
            }
            if offset < self.resume {
                continue;
            }
            if let Some(hit) = self.scanner.probe(self.buffer, offset) {
                if self.scanner.config.skip_after_hit {
                    self.resume = hit.resume_offset();
                }
                return Some(hit);
            }
        }
        None
    }
}

/// Cheap rejection of flat data before any decoding.
fn looks_compressed(data: &[u8]) -> bool {
    let head = &data[..data.len().min(QUICK_CHECK_LEN)];
    let mut seen = [false; 256];
    let mut distinct = 0;
    for &byte in head {
        if !seen[byte as usize] {
            seen[byte as usize] = true;
            distinct += 1;
        }
    }
    distinct >= 3
}

fn confidence(score: &SpriteQualityScore, compressed: usize, decoded: usize, terminated: bool) -> f64 {
    let mut confidence: f64 = if score.pass { 0.4 } else { 0.0 };

    confidence += match score.tile_count {
        16..=512 => 0.2,
        4..=15 | 513..=2048 => 0.1,
        _ => 0.0,
    };

    let ratio = decoded as f64 / compressed.max(1) as f64;
    confidence += if ratio >= 2.0 {
        0.2
    } else if ratio >= 1.2 {
        0.1
    } else {
        0.0
    };

    if terminated {
        confidence += 0.2;
    }
    confidence.min(1.0)
}
