//! SNES 4bpp planar tiles <-> linear palette-index bitmaps.
//!
//! Each 8x8 tile is 32 bytes holding four interleaved bitplanes:
//!
//! - Bytes `2r` / `2r + 1`: planes 0 and 1 of row `r`
//! - Bytes `16 + 2r` / `17 + 2r`: planes 2 and 3 of row `r`
//!
//! Bit 7 of each plane byte is the leftmost pixel. Nothing here knows about
//! colour; values are palette indices 0-15.

use thiserror::Error;

use crate::logging::{log, LogCategory, LogLevel};

/// Bytes in one 4bpp 8x8 tile.
pub const BYTES_PER_TILE: usize = 32;

/// Tile edge length in pixels.
pub const TILE_SIZE: usize = 8;

/// Tiles per row when the caller does not choose a layout.
pub const DEFAULT_TILES_PER_ROW: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("{tile_count} tiles need {needed} bytes, only {actual} available")]
    ShortBuffer {
        tile_count: usize,
        needed: usize,
        actual: usize,
    },
    #[error("palette index {value} at ({x}, {y}) does not fit in 4 bits")]
    IndexOutOfRange { x: usize, y: usize, value: u8 },
    #[error("{width}x{height} is not a whole number of 8x8 tiles")]
    BadDimensions { width: usize, height: usize },
    #[error("pixel buffer holds {actual} values, {expected} expected")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("tiles per row must be at least 1")]
    ZeroTilesPerRow,
}

/// Trait for decoding tile data into pixel indices.
pub trait TileDecoder {
    /// Palette index of pixel (`x`, `y`) within one tile; 0 when out of range.
    fn decode_pixel(&self, tile_data: &[u8], x: u8, y: u8) -> u8;

    /// Size of a single tile in bytes.
    fn tile_size(&self) -> usize;
}

/// SNES 4bpp planar tiles (BG modes 1-4, sprites).
#[derive(Debug, Clone, Copy, Default)]
pub struct Snes4BppDecoder;

impl TileDecoder for Snes4BppDecoder {
    fn decode_pixel(&self, tile_data: &[u8], x: u8, y: u8) -> u8 {
        if tile_data.len() < BYTES_PER_TILE || x > 7 || y > 7 {
            return 0;
        }

        let row = y as usize * 2;
        let bit = 7 - x;
        let p0 = (tile_data[row] >> bit) & 1;
        let p1 = (tile_data[row + 1] >> bit) & 1;
        let p2 = (tile_data[row + 16] >> bit) & 1;
        let p3 = (tile_data[row + 17] >> bit) & 1;

        (p3 << 3) | (p2 << 2) | (p1 << 1) | p0
    }

    fn tile_size(&self) -> usize {
        BYTES_PER_TILE
    }
}

impl Snes4BppDecoder {
    /// Pack 64 row-major indices into one planar tile. Only the low four
    /// bits of each index are used.
    pub fn encode_tile(&self, pixels: &[u8; 64]) -> [u8; BYTES_PER_TILE] {
        let mut tile = [0u8; BYTES_PER_TILE];
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                let index = pixels[y * TILE_SIZE + x];
                let mask = 0x80 >> x;
                for plane in 0..4 {
                    if index & (1 << plane) != 0 {
                        tile[plane_offset(plane, y)] |= mask;
                    }
                }
            }
        }
        tile
    }
}

/// Byte holding `plane` of row `y`.
#[inline]
fn plane_offset(plane: usize, y: usize) -> usize {
    (plane / 2) * 16 + y * 2 + (plane % 2)
}

/// Row-major grid of 4-bit palette indices made of whole 8x8 tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGrid {
    width: usize,
    height: usize,
    /// Tiles holding real data; cells after these in layout order are padding
    tile_count: usize,
    pixels: Vec<u8>,
}

impl IndexGrid {
    /// Zero-filled grid `tiles_per_row` wide holding `tile_count` tiles.
    pub fn with_layout(tile_count: usize, tiles_per_row: usize) -> Result<Self, TileError> {
        if tiles_per_row == 0 {
            return Err(TileError::ZeroTilesPerRow);
        }
        let columns = tiles_per_row.min(tile_count);
        let rows = if columns == 0 {
            0
        } else {
            tile_count.div_ceil(columns)
        };
        let width = columns * TILE_SIZE;
        let height = rows * TILE_SIZE;
        Ok(Self {
            width,
            height,
            tile_count,
            pixels: vec![0; width * height],
        })
    }

    /// Wrap an external bitmap. Every tile of the grid counts as data.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, TileError> {
        if width % TILE_SIZE != 0 || height % TILE_SIZE != 0 {
            return Err(TileError::BadDimensions { width, height });
        }
        if pixels.len() != width * height {
            return Err(TileError::SizeMismatch {
                expected: width * height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            tile_count: (width / TILE_SIZE) * (height / TILE_SIZE),
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn tiles_per_row(&self) -> usize {
        self.width / TILE_SIZE
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Planar size of the data tiles.
    pub fn byte_size(&self) -> usize {
        self.tile_count * BYTES_PER_TILE
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    /// Returns false when (`x`, `y`) is outside the grid.
    pub fn set(&mut self, x: usize, y: usize, value: u8) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.pixels[y * self.width + x] = value;
        true
    }

    /// Top-left pixel of tile `tile` in layout order.
    fn tile_origin(&self, tile: usize) -> (usize, usize) {
        let columns = self.tiles_per_row().max(1);
        ((tile % columns) * TILE_SIZE, (tile / columns) * TILE_SIZE)
    }
}

/// De-interleave `tile_count` tiles into a grid 16 tiles wide.
pub fn planar_to_indices(bytes: &[u8], tile_count: usize) -> Result<IndexGrid, TileError> {
    planar_to_indices_with_layout(bytes, tile_count, DEFAULT_TILES_PER_ROW)
}

/// De-interleave `tile_count` tiles into a grid `tiles_per_row` wide.
///
/// Bytes after the last tile are ignored.
pub fn planar_to_indices_with_layout(
    bytes: &[u8],
    tile_count: usize,
    tiles_per_row: usize,
) -> Result<IndexGrid, TileError> {
    let needed = tile_count * BYTES_PER_TILE;
    if bytes.len() < needed {
        return Err(TileError::ShortBuffer {
            tile_count,
            needed,
            actual: bytes.len(),
        });
    }

    let decoder = Snes4BppDecoder;
    let mut grid = IndexGrid::with_layout(tile_count, tiles_per_row)?;
    let width = grid.width;

    for (tile, tile_data) in bytes[..needed].chunks_exact(decoder.tile_size()).enumerate() {
        let (ox, oy) = grid.tile_origin(tile);
        for y in 0..TILE_SIZE {
            let row = (oy + y) * width + ox;
            for x in 0..TILE_SIZE {
                grid.pixels[row + x] = decoder.decode_pixel(tile_data, x as u8, y as u8);
            }
        }
    }

    log(LogCategory::Tiles, LogLevel::Trace, || {
        format!(
            "Tiles: {} tiles -> {}x{} indices",
            tile_count, grid.width, grid.height
        )
    });
    Ok(grid)
}

/// Interleave the data tiles of `grid` back into planar bytes
/// (`32 * tile_count` of them).
pub fn indices_to_planar(grid: &IndexGrid) -> Result<Vec<u8>, TileError> {
    if grid.width % TILE_SIZE != 0 || grid.height % TILE_SIZE != 0 {
        return Err(TileError::BadDimensions {
            width: grid.width,
            height: grid.height,
        });
    }
    if let Some(pos) = grid.pixels.iter().position(|&value| value > 0x0F) {
        return Err(TileError::IndexOutOfRange {
            x: pos % grid.width,
            y: pos / grid.width,
            value: grid.pixels[pos],
        });
    }

    let encoder = Snes4BppDecoder;
    let mut out = Vec::with_capacity(grid.byte_size());
    let mut tile_pixels = [0u8; 64];
    for tile in 0..grid.tile_count {
        let (ox, oy) = grid.tile_origin(tile);
        for y in 0..TILE_SIZE {
            let row = (oy + y) * grid.width + ox;
            tile_pixels[y * TILE_SIZE..(y + 1) * TILE_SIZE]
                .copy_from_slice(&grid.pixels[row..row + TILE_SIZE]);
        }
        out.extend_from_slice(&encoder.encode_tile(&tile_pixels));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pixel_reads_all_four_planes() {
        let mut tile = [0u8; 32];
        // Row 0: pixel 0 = 0b1111, pixel 1 = 0b0101, pixel 7 = 0b1000
        tile[0] = 0b1100_0000; // plane 0
        tile[1] = 0b1000_0000; // plane 1
        tile[16] = 0b1100_0000; // plane 2
        tile[17] = 0b1000_0001; // plane 3

        let decoder = Snes4BppDecoder;
        assert_eq!(decoder.decode_pixel(&tile, 0, 0), 15);
        assert_eq!(decoder.decode_pixel(&tile, 1, 0), 5);
        assert_eq!(decoder.decode_pixel(&tile, 7, 0), 8);
        assert_eq!(decoder.decode_pixel(&tile, 3, 0), 0);
        assert_eq!(decoder.tile_size(), 32);
    }

    #[test]
    fn test_decode_pixel_out_of_bounds() {
        let decoder = Snes4BppDecoder;
        assert_eq!(decoder.decode_pixel(&[0xFF; 32], 8, 0), 0);
        assert_eq!(decoder.decode_pixel(&[0xFF; 32], 0, 8), 0);
        assert_eq!(decoder.decode_pixel(&[0xFF; 16], 0, 0), 0);
    }

    #[test]
    fn test_encode_tile_inverts_decode() {
        let pixels: [u8; 64] = std::array::from_fn(|i| ((i * 7) % 16) as u8);
        let decoder = Snes4BppDecoder;
        let tile = decoder.encode_tile(&pixels);
        for y in 0..8u8 {
            for x in 0..8u8 {
                assert_eq!(
                    decoder.decode_pixel(&tile, x, y),
                    pixels[y as usize * 8 + x as usize]
                );
            }
        }
    }

    #[test]
    fn test_layout_left_to_right_then_down() {
        // Tile n is filled with index n
        let decoder = Snes4BppDecoder;
        let bytes: Vec<u8> = (0..5u8)
            .flat_map(|n| decoder.encode_tile(&[n; 64]))
            .collect();

        let grid = planar_to_indices_with_layout(&bytes, 5, 2).unwrap();
        assert_eq!((grid.width(), grid.height()), (16, 24));
        assert_eq!(grid.get(0, 0), Some(0));
        assert_eq!(grid.get(8, 0), Some(1));
        assert_eq!(grid.get(0, 8), Some(2));
        assert_eq!(grid.get(15, 15), Some(3));
        assert_eq!(grid.get(3, 20), Some(4));
        // Unused trailing cell
        assert_eq!(grid.get(12, 20), Some(0));
        assert_eq!(grid.get(16, 0), None);

        assert_eq!(indices_to_planar(&grid).unwrap(), bytes);
    }

    #[test]
    fn test_default_layout_narrows_to_tile_count() {
        let grid = planar_to_indices(&[0u8; 96], 3).unwrap();
        assert_eq!((grid.width(), grid.height()), (24, 8));
        assert_eq!(grid.tiles_per_row(), 3);

        let grid = planar_to_indices(&[0u8; 32 * 20], 20).unwrap();
        assert_eq!((grid.width(), grid.height()), (128, 16));
    }

    #[test]
    fn test_planar_round_trip() {
        let mut seed = 0x1234_5678u32;
        let bytes: Vec<u8> = (0..32 * 37)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                seed as u8
            })
            .collect();
        let grid = planar_to_indices(&bytes, 37).unwrap();
        assert_eq!(grid.tile_count(), 37);
        assert_eq!(grid.byte_size(), bytes.len());
        assert_eq!(indices_to_planar(&grid).unwrap(), bytes);
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(
            planar_to_indices(&[0u8; 40], 2),
            Err(TileError::ShortBuffer {
                tile_count: 2,
                needed: 64,
                actual: 40
            })
        );
        assert_eq!(
            planar_to_indices_with_layout(&[0u8; 32], 1, 0),
            Err(TileError::ZeroTilesPerRow)
        );
    }

    #[test]
    fn test_zero_tiles_is_empty() {
        let grid = planar_to_indices(&[], 0).unwrap();
        assert_eq!((grid.width(), grid.height()), (0, 0));
        assert!(indices_to_planar(&grid).unwrap().is_empty());
    }

    #[test]
    fn test_from_pixels_validation() {
        assert_eq!(
            IndexGrid::from_pixels(12, 8, vec![0; 96]),
            Err(TileError::BadDimensions {
                width: 12,
                height: 8
            })
        );
        assert_eq!(
            IndexGrid::from_pixels(8, 8, vec![0; 10]),
            Err(TileError::SizeMismatch {
                expected: 64,
                actual: 10
            })
        );

        let mut pixels = vec![0u8; 16 * 8];
        pixels[8 * 16 / 8 + 9] = 16;
        let grid = IndexGrid::from_pixels(16, 8, pixels).unwrap();
        assert_eq!(grid.tile_count(), 2);
        assert_eq!(
            indices_to_planar(&grid),
            Err(TileError::IndexOutOfRange {
                x: 9,
                y: 1,
                value: 16
            })
        );
    }

    #[test]
    fn test_set_and_encode() {
        let mut grid = IndexGrid::from_pixels(8, 8, vec![0; 64]).unwrap();
        assert!(grid.set(0, 0, 0x0F));
        assert!(!grid.set(8, 0, 1));
        let bytes = indices_to_planar(&grid).unwrap();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1], 0x80);
        assert_eq!(bytes[16], 0x80);
        assert_eq!(bytes[17], 0x80);
        assert_eq!(bytes.iter().filter(|&&b| b != 0).count(), 4);
    }
}
