//! PNG sprite sheets.
//!
//! Sheets are written as 8-bit grayscale with each palette index scaled by
//! 17, so index 15 is white. On the way back in, grayscale and RGB images
//! are scaled down again, and indexed PNGs (any bit depth) are taken as
//! raw palette indices.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use hal_core::{IndexGrid, TILE_SIZE};

const GRAY_STEP: u8 = 17;

pub fn write_grayscale<W: Write>(w: W, grid: &IndexGrid) -> Result<()> {
    let mut encoder = png::Encoder::new(w, grid.width() as u32, grid.height() as u32);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);

    let gray: Vec<u8> = grid.pixels().iter().map(|&index| index * GRAY_STEP).collect();
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&gray)?;
    writer.finish()?;
    Ok(())
}

pub fn save(path: &Path, grid: &IndexGrid) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_grayscale(BufWriter::new(file), grid)
}

/// Decode a sheet into `(width, height, indices)`.
pub fn read_indices(png_bytes: &[u8]) -> Result<(usize, usize, Vec<u8>)> {
    let probe = png::Decoder::new(png_bytes).read_info()?;
    if probe.info().color_type == png::ColorType::Indexed {
        return read_indexed(png_bytes);
    }

    let mut decoder = png::Decoder::new(png_bytes);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    let buf = &buf[..frame.buffer_size()];

    // Grayscale sheets keep R = G = B, so the first sample is enough
    let samples = frame.color_type.samples();
    let indices = buf
        .chunks_exact(samples)
        .map(|pixel| ((pixel[0] as u16 + GRAY_STEP as u16 / 2) / GRAY_STEP as u16) as u8)
        .collect();
    Ok((frame.width as usize, frame.height as usize, indices))
}

fn read_indexed(png_bytes: &[u8]) -> Result<(usize, usize, Vec<u8>)> {
    let mut reader = png::Decoder::new(png_bytes).read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;

    let width = frame.width as usize;
    let bits = frame.bit_depth as usize;
    let per_byte = 8 / bits;
    let mask = ((1u16 << bits) - 1) as u8;

    let mut indices = Vec::with_capacity(width * frame.height as usize);
    for row in buf[..frame.buffer_size()].chunks_exact(frame.line_size) {
        indices.extend((0..width).map(|x| {
            let shift = 8 - bits * (x % per_byte + 1);
            (row[x / per_byte] >> shift) & mask
        }));
    }
    Ok((width, frame.height as usize, indices))
}

/// Load a sheet as a tile grid. With `tiles`, only that many tiles count
/// as data, taken in row-major order from the sheet's tile columns.
pub fn load(path: &Path, tiles: Option<usize>) -> Result<IndexGrid> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (width, height, indices) = read_indices(&bytes)?;
    if width % TILE_SIZE != 0 || height % TILE_SIZE != 0 {
        bail!(
            "{} is {}x{}, not a whole number of 8x8 tiles",
            path.display(),
            width,
            height
        );
    }

    let Some(tile_count) = tiles else {
        return Ok(IndexGrid::from_pixels(width, height, indices)?);
    };

    let mut grid = IndexGrid::with_layout(tile_count, width / TILE_SIZE)?;
    if grid.height() > height {
        bail!(
            "{} holds {} tiles, {} requested",
            path.display(),
            (width / TILE_SIZE) * (height / TILE_SIZE),
            tile_count
        );
    }
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            grid.set(x, y, indices[y * width + x]);
        }
    }
    Ok(grid)
}
