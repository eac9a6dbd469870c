//! SNES internal header and checksum handling.
//!
//! The 64-byte internal header sits at `0x7FC0` (LoROM) or `0xFFC0` (HiROM)
//! of the ROM body, after an optional 512-byte copier (SMC) header:
//!
//! | offset | field                                  |
//! |--------|----------------------------------------|
//! | +0x00  | title, 21 bytes ASCII                  |
//! | +0x15  | map mode                               |
//! | +0x16  | cartridge type                         |
//! | +0x17  | ROM size code (`1 << n` KiB)           |
//! | +0x18  | SRAM size code                         |
//! | +0x1C  | checksum complement (LE)               |
//! | +0x1E  | checksum (LE)                          |
//! | +0x3C  | reset vector (LE)                      |

use hal_core::logging::{log, LogCategory, LogLevel};
use serde::Serialize;

use crate::HeaderError;

/// Size of a copier header.
pub const SMC_HEADER_SIZE: usize = 512;

/// Smallest body that can hold a LoROM header.
pub const MIN_BODY_SIZE: usize = 0x8000;

const LOROM_HEADER: usize = 0x7FC0;
const HIROM_HEADER: usize = 0xFFC0;

const TITLE_LEN: usize = 21;
const MAP_MODE: usize = 0x15;
const ROM_SIZE: usize = 0x17;
const SRAM_SIZE: usize = 0x18;
const COMPLEMENT: usize = 0x1C;
const CHECKSUM: usize = 0x1E;
const RESET_VECTOR: usize = 0x3C;
const HEADER_LEN: usize = 0x40;

/// ROM mapping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mapping {
    LoRom,
    HiRom,
}

impl Mapping {
    /// Offset of the internal header within the ROM body.
    pub fn header_offset(self) -> usize {
        match self {
            Mapping::LoRom => LOROM_HEADER,
            Mapping::HiRom => HIROM_HEADER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RomHeader {
    pub has_smc_header: bool,
    pub checksum: u16,
    pub complement: u16,
    /// Body size, copier header excluded
    pub size_bytes: usize,
    pub mapping: Mapping,
    pub title: String,
    pub map_mode: u8,
    pub rom_size_code: u8,
    pub sram_size_code: u8,
}

/// Stored checksum compared with one computed from the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksumReport {
    pub stored_checksum: u16,
    pub stored_complement: u16,
    pub computed: u16,
}

impl ChecksumReport {
    pub fn is_valid(&self) -> bool {
        self.stored_checksum == self.computed && self.stored_complement == !self.computed
    }
}

impl RomHeader {
    /// Offset of the ROM body in the file.
    pub fn body_offset(&self) -> usize {
        if self.has_smc_header {
            SMC_HEADER_SIZE
        } else {
            0
        }
    }

    /// Offset of the internal header in the file.
    pub fn header_file_offset(&self) -> usize {
        self.body_offset() + self.mapping.header_offset()
    }

    /// Recompute the body checksum and compare it with the stored pair.
    pub fn verify(&self, rom: &[u8]) -> ChecksumReport {
        let body = rom.get(self.body_offset()..).unwrap_or(&[]);
        let report = ChecksumReport {
            stored_checksum: self.checksum,
            stored_complement: self.complement,
            computed: checksum_for(body, self.mapping),
        };
        if !report.is_valid() {
            log(LogCategory::Rom, LogLevel::Warn, || {
                format!(
                    "ROM: checksum mismatch (stored 0x{:04X}/0x{:04X}, computed 0x{:04X})",
                    report.stored_checksum, report.stored_complement, report.computed
                )
            });
        }
        report
    }
}

/// Length of the copier header in a file of `len` bytes.
pub fn smc_header_len(len: usize) -> usize {
    if len % 1024 == 512 {
        SMC_HEADER_SIZE
    } else {
        0
    }
}

/// Parse the internal header of `rom` (copier header allowed).
///
/// A wrong checksum is not an error here; see [`RomHeader::verify`].
pub fn parse_header(rom: &[u8]) -> Result<RomHeader, HeaderError> {
    let skip = smc_header_len(rom.len());
    let body = rom.get(skip..).unwrap_or(&[]);
    if body.len() < MIN_BODY_SIZE {
        log(LogCategory::Rom, LogLevel::Error, || {
            format!(
                "ROM: body too small ({} bytes, minimum 32KB)",
                body.len()
            )
        });
        return Err(HeaderError::TooSmall { len: body.len() });
    }

    let mapping = detect_mapping(body);
    let at = mapping.header_offset();
    let header = &body[at..at + HEADER_LEN];

    let parsed = RomHeader {
        has_smc_header: skip > 0,
        checksum: read_u16_le(header, CHECKSUM),
        complement: read_u16_le(header, COMPLEMENT),
        size_bytes: body.len(),
        mapping,
        title: decode_title(&header[..TITLE_LEN]),
        map_mode: header[MAP_MODE],
        rom_size_code: header[ROM_SIZE],
        sram_size_code: header[SRAM_SIZE],
    };

    log(LogCategory::Rom, LogLevel::Info, || {
        format!(
            "ROM: '{}' - Size: {} KB, SMC Header: {}, Mapping: {:?}, Checksum: 0x{:04X}",
            parsed.title,
            parsed.size_bytes / 1024,
            if parsed.has_smc_header { "Yes" } else { "No" },
            parsed.mapping,
            parsed.checksum
        )
    });
    Ok(parsed)
}

/// Checksum of a ROM body (copier header already stripped).
pub fn compute_checksum(body: &[u8]) -> u16 {
    checksum_for(body, detect_mapping(body))
}

/// Write a fresh checksum and complement into `rom` and return the
/// updated header.
///
/// Call once after the last body patch; a later patch invalidates it.
pub fn recompute_and_patch(rom: &mut [u8]) -> Result<RomHeader, HeaderError> {
    let mut header = parse_header(rom)?;
    let body_offset = header.body_offset();
    let checksum = checksum_for(&rom[body_offset..], header.mapping);
    let complement = !checksum;

    let at = header.header_file_offset();
    rom[at + COMPLEMENT..at + COMPLEMENT + 2].copy_from_slice(&complement.to_le_bytes());
    rom[at + CHECKSUM..at + CHECKSUM + 2].copy_from_slice(&checksum.to_le_bytes());

    log(LogCategory::Rom, LogLevel::Info, || {
        format!(
            "ROM: checksum 0x{:04X} -> 0x{:04X}",
            header.checksum, checksum
        )
    });
    header.checksum = checksum;
    header.complement = complement;
    Ok(header)
}

fn checksum_for(body: &[u8], mapping: Mapping) -> u16 {
    // Sum as if the stored pair were checksum 0x0000 / complement 0xFFFF
    let mut normalised = body.to_vec();
    let at = mapping.header_offset();
    if at + CHECKSUM + 2 <= normalised.len() {
        normalised[at + COMPLEMENT..at + COMPLEMENT + 2].copy_from_slice(&[0xFF, 0xFF]);
        normalised[at + CHECKSUM..at + CHECKSUM + 2].copy_from_slice(&[0x00, 0x00]);
    }
    mirrored_sum(&normalised) as u16
}

/// Byte sum over `data` padded to the next power of two by repeating its
/// tail, the way the hardware mirrors oddly sized ROMs.
fn mirrored_sum(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }
    if data.len().is_power_of_two() {
        return plain_sum(data);
    }
    let base = data.len().next_power_of_two() / 2;
    let tail = &data[base..];
    let repeats = base / tail.len().next_power_of_two();
    plain_sum(&data[..base]).wrapping_add(mirrored_sum(tail).wrapping_mul(repeats as u32))
}

fn plain_sum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}

/// Detect mapping mode by scoring both candidate headers
fn detect_mapping(body: &[u8]) -> Mapping {
    let lorom_score = score_header(body, Mapping::LoRom);
    let hirom_score = score_header(body, Mapping::HiRom);

    if hirom_score > lorom_score {
        Mapping::HiRom
    } else {
        Mapping::LoRom
    }
}

/// Score a potential header location (higher = more likely valid)
fn score_header(body: &[u8], mapping: Mapping) -> u32 {
    let offset = mapping.header_offset();
    let Some(header) = body.get(offset..offset + HEADER_LEN) else {
        return 0;
    };

    let mut score = 0u32;

    // Map mode 0x20-0x3F; odd low bit means HiROM
    let map_mode = header[MAP_MODE];
    if (0x20..=0x3F).contains(&map_mode) {
        score += 2;
        if (map_mode & 0x01 == 0x01) == (mapping == Mapping::HiRom) {
            score += 1;
        }
    }

    // 0x07-0x0D covers 128 KiB to 8 MiB
    if (0x07..=0x0D).contains(&header[ROM_SIZE]) {
        score += 2;
    }

    if read_u16_le(header, COMPLEMENT) == !read_u16_le(header, CHECKSUM) {
        score += 4;
    }

    if read_u16_le(header, RESET_VECTOR) >= 0x8000 {
        score += 2;
    }

    if header[..TITLE_LEN].iter().all(|&b| (0x20..=0x7E).contains(&b)) {
        score += 2;
    }

    score
}

fn read_u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn decode_title(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '?' })
        .collect::<String>()
        .trim_end()
        .to_string()
}
