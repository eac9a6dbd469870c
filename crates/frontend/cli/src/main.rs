mod sheet;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use hal_core::logging::{LogCategory, LogConfig, LogLevel};
use hal_core::{compress, decompress, CompressionMode, MAX_DECODED_SIZE};
use hal_snes::config::{parse_offset_str, SpriteTable};
use hal_snes::header::smc_header_len;
use hal_snes::{
    parse_header, BlockExtent, ExtractionError, Extractor, InjectionError, Injector, Scanner,
    Settings,
};

#[derive(Parser)]
#[command(
    name = "halsprite",
    version,
    about = "Find, extract and re-inject HAL-compressed SNES sprites"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON settings file (scan, validator and extract sections)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Level for every log category: off, error, warn, info, debug, trace
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Level for one category, e.g. `scan=debug`; repeatable
    #[arg(long = "log", global = true, value_name = "CATEGORY=LEVEL")]
    log: Vec<String>,

    /// Send log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Show the ROM header and checksum state
    Info { rom: PathBuf },

    /// Decode one HAL stream to raw bytes
    Decompress {
        file: PathBuf,
        #[arg(long, value_parser = parse_offset, default_value = "0")]
        offset: usize,
        /// Output cap in bytes
        #[arg(long, value_parser = parse_offset, default_value = "0x10000")]
        max: usize,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encode a raw file as a HAL stream
    Compress {
        input: PathBuf,
        /// Use the fast packer
        #[arg(long)]
        fast: bool,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Search a ROM for sprite-shaped compressed data
    Scan {
        rom: PathBuf,
        #[arg(long, value_parser = parse_offset)]
        start: Option<usize>,
        #[arg(long, value_parser = parse_offset)]
        end: Option<usize>,
        #[arg(long, value_parser = parse_offset)]
        step: Option<usize>,
        /// Refine or coarsen the step per 16 KiB region by data density
        #[arg(long)]
        adaptive: bool,
        /// Scan chunks on all cores
        #[arg(long)]
        parallel: bool,
        #[arg(long, value_parser = parse_offset, default_value = "0x10000")]
        chunk: usize,
        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a sprite to a grayscale PNG
    Extract {
        rom: PathBuf,
        #[arg(long, value_parser = parse_offset)]
        offset: usize,
        /// Expected decoded size in bytes
        #[arg(long, value_parser = parse_offset)]
        size: Option<usize>,
        /// Write the sprite even when it does not look like one
        #[arg(long)]
        best_effort: bool,
        /// Input is an uncompressed VRAM dump
        #[arg(long)]
        vram: bool,
        #[arg(long)]
        tiles_per_row: Option<usize>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Recompress an edited PNG into a copy of the ROM
    Inject {
        rom: PathBuf,
        #[arg(long, value_parser = parse_offset)]
        offset: usize,
        /// Bytes available at the offset; measured from the existing block
        /// when omitted
        #[arg(long, value_parser = parse_offset)]
        hole: Option<usize>,
        #[arg(long)]
        png: PathBuf,
        /// Tiles in the sheet that hold data; defaults to the tile count
        /// of the block being replaced
        #[arg(long)]
        tiles: Option<usize>,
        /// Target is an uncompressed VRAM dump
        #[arg(long)]
        vram: bool,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the table's sprite locations for a ROM and check each one
    Locations { table: PathBuf, rom: PathBuf },
}

fn parse_offset(text: &str) -> Result<usize, String> {
    parse_offset_str(text).ok_or_else(|| format!("'{}' is not a hex (0x...) or decimal number", text))
}

fn configure_logging(cli: &Cli) -> Result<()> {
    let config = LogConfig::global();
    if let Some(level) = &cli.log_level {
        let level =
            LogLevel::from_str(level).ok_or_else(|| anyhow!("unknown log level '{}'", level))?;
        config.set_global_level(level);
    }
    for spec in &cli.log {
        let (category, level) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("--log expects CATEGORY=LEVEL, got '{}'", spec))?;
        let category = LogCategory::from_str(category)
            .ok_or_else(|| anyhow!("unknown log category '{}'", category))?;
        let level =
            LogLevel::from_str(level).ok_or_else(|| anyhow!("unknown log level '{}'", level))?;
        config.set_level(category, level);
    }
    if let Some(path) = &cli.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }
    Ok(())
}

/// Tiles to take from an edited sheet: `--tiles`, or as many as the block
/// being replaced decodes to. Sheets are padded to whole tile rows, so the
/// sheet size alone overstates it.
fn edit_tile_count(
    tiles: Option<usize>,
    block: &Result<BlockExtent, InjectionError>,
    offset: usize,
) -> Result<usize> {
    match (tiles, block) {
        (Some(tiles), _) => Ok(tiles),
        (None, Ok(block)) if block.tile_count() > 0 => Ok(block.tile_count()),
        (None, Ok(_)) => bail!("block at 0x{:06X} holds no whole tiles; pass --tiles", offset),
        (None, Err(err)) => bail!("cannot measure the block at 0x{:06X} ({}); pass --tiles", offset, err),
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    configure_logging(&cli)?;

    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path),
        None => Settings::default(),
    };

    match cli.command {
        Command::Info { rom } => info(&read(&rom)?),
        Command::Decompress {
            file,
            offset,
            max,
            output,
        } => {
            let data = read(&file)?;
            let decoded = decompress(&data, offset, max)
                .with_context(|| format!("decoding at 0x{:X}", offset))?;
            println!(
                "0x{:06X}: {} compressed -> {} decoded ({:?})",
                offset,
                decoded.consumed,
                decoded.data.len(),
                decoded.stop
            );
            if let Some(output) = output {
                write(&output, &decoded.data)?;
            }
            Ok(())
        }
        Command::Compress {
            input,
            fast,
            output,
        } => {
            let raw = read(&input)?;
            if raw.len() > MAX_DECODED_SIZE {
                log::warn!(
                    "{} bytes exceeds the {} byte decode ceiling",
                    raw.len(),
                    MAX_DECODED_SIZE
                );
            }
            let mode = if fast {
                CompressionMode::Fast
            } else {
                CompressionMode::Normal
            };
            let packed = compress(&raw, mode);
            println!("{} -> {} bytes ({:?})", raw.len(), packed.len(), mode);
            write(&output, &packed)
        }
        Command::Scan {
            rom,
            start,
            end,
            step,
            adaptive,
            parallel,
            chunk,
            json,
        } => {
            let data = read(&rom)?;
            let mut scan_config = settings.scan.clone();
            if let Some(step) = step {
                scan_config.step = step;
            }
            scan_config.adaptive_step |= adaptive;
            let scanner = Scanner::new(scan_config, settings.validator.clone());
            let start = start.unwrap_or(0);
            let end = end.unwrap_or(data.len());
            let cancel = AtomicBool::new(false);

            let hits = if parallel {
                scanner.scan_parallel(&data, start, end, chunk, &cancel)?
            } else {
                scanner.scan_range(&data, start, end, &cancel)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for hit in &hits {
                    println!(
                        "0x{:06X}  {:>4} tiles  {:>5} -> {:>5} bytes  confidence {:.2}  entropy {:.3}  consistency {:.2}",
                        hit.offset(),
                        hit.score.tile_count,
                        hit.compressed_size,
                        hit.decoded_size,
                        hit.confidence,
                        hit.score.entropy,
                        hit.score.plane_consistency
                    );
                }
                println!("{} candidate(s)", hits.len());
            }
            Ok(())
        }
        Command::Extract {
            rom,
            offset,
            size,
            best_effort,
            vram,
            tiles_per_row,
            output,
        } => {
            let data = read(&rom)?;
            let mut extract_config = settings.extract.clone();
            if let Some(tiles_per_row) = tiles_per_row {
                extract_config.tiles_per_row = tiles_per_row;
            }
            let extractor = Extractor::new(extract_config, settings.validator.clone());

            let sprite = if vram {
                let byte_len = size.unwrap_or(extractor.config().default_cap);
                extractor.extract_vram(&data, offset, byte_len)?
            } else if best_effort {
                extractor.extract_best_effort(&data, offset, size)?
            } else {
                match extractor.extract(&data, offset, size) {
                    Err(err @ ExtractionError::LowQuality { .. }) => {
                        bail!("{} (use --best-effort to write it anyway)", err)
                    }
                    other => other?,
                }
            };

            if !sprite.score.pass {
                log::warn!("writing low quality sprite from 0x{:X}", offset);
            }
            sheet::save(&output, &sprite.pixels)?;
            println!(
                "0x{:06X}: {} tiles, {}x{}, {} compressed bytes -> {}",
                sprite.source_offset,
                sprite.tile_count(),
                sprite.width,
                sprite.height,
                sprite.compressed_size,
                output.display()
            );
            Ok(())
        }
        Command::Inject {
            rom,
            offset,
            hole,
            png,
            tiles,
            vram,
            output,
        } => {
            let data = read(&rom)?;
            let injector = Injector::new();

            if vram {
                let tiles = tiles.context("--vram needs --tiles: a dump has no block to measure")?;
                let grid = sheet::load(&png, Some(tiles))?;
                let patched = injector.inject_vram(&data, offset, &grid)?;
                println!("{} tiles written at 0x{:04X}", grid.tile_count(), offset);
                return write(&output, &patched);
            }

            let block = injector.measure_block(&data, offset);
            let tiles = edit_tile_count(tiles, &block, offset)?;
            let grid = sheet::load(&png, Some(tiles))?;
            let hole = match hole {
                Some(hole) => hole,
                None => block?.compressed_size,
            };
            let injection = injector.inject(&data, offset, hole, &grid)?;
            println!(
                "0x{:06X}: {} bytes into a {} byte hole ({:?}, {} spare), checksum 0x{:04X}",
                offset,
                injection.plan.compressed_bytes.len(),
                hole,
                injection.plan.mode,
                injection.plan.slack(),
                injection.header.checksum
            );
            write(&output, &injection.rom)
        }
        Command::Locations { table, rom } => {
            let table = SpriteTable::load(&table)?;
            let data = read(&rom)?;
            let header = parse_header(&data)?;
            let locations = table.locations_for(header.checksum, &header.title);
            if locations.is_empty() {
                println!(
                    "no locations for '{}' (checksum 0x{:04X})",
                    header.title, header.checksum
                );
                return Ok(());
            }

            let extractor = Extractor::from_settings(&settings);
            for location in &locations {
                if let Err(err) = location.validate_against(data.len()) {
                    println!("{:<24} {}", location.label, err);
                    continue;
                }
                let status = match extractor.extract_location(&data, location) {
                    Ok(sprite) => format!(
                        "ok at 0x{:06X}, {} tiles",
                        sprite.source_offset,
                        sprite.tile_count()
                    ),
                    Err(err) => err.to_string(),
                };
                println!("{:<24} 0x{:06X}  {}", location.label, location.offset, status);
            }
            Ok(())
        }
    }
}

fn info(rom: &[u8]) -> Result<()> {
    let header = parse_header(rom)?;
    let report = header.verify(rom);
    println!("Title:        {}", header.title);
    println!("Mapping:      {:?} (map mode 0x{:02X})", header.mapping, header.map_mode);
    println!(
        "Size:         {} bytes{}",
        header.size_bytes,
        if smc_header_len(rom.len()) > 0 {
            " + 512 byte copier header"
        } else {
            ""
        }
    );
    println!("ROM code:     0x{:02X}, SRAM code 0x{:02X}", header.rom_size_code, header.sram_size_code);
    println!(
        "Checksum:     stored 0x{:04X} / 0x{:04X}, computed 0x{:04X} ({})",
        report.stored_checksum,
        report.stored_complement,
        report.computed,
        if report.is_valid() { "valid" } else { "MISMATCH" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_arguments() {
        assert_eq!(parse_offset("0xC000"), Ok(0xC000));
        assert_eq!(parse_offset("4096"), Ok(4096));
        assert!(parse_offset("C000h").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "halsprite",
            "--log",
            "scan=debug",
            "scan",
            "game.sfc",
            "--start",
            "0x8000",
            "--parallel",
            "--adaptive",
        ])
        .unwrap();
        assert_eq!(cli.log, vec!["scan=debug".to_string()]);
        match cli.command {
            Command::Scan {
                start,
                parallel,
                adaptive,
                end,
                ..
            } => {
                assert_eq!(start, Some(0x8000));
                assert!(parallel);
                assert!(adaptive);
                assert_eq!(end, None);
            }
            _ => panic!("expected scan"),
        }

        assert!(Cli::try_parse_from(["halsprite", "extract", "game.sfc", "-o", "out.png"]).is_err());
    }

    #[test]
    fn test_edit_keeps_the_block_tile_count() {
        // 17 tiles lay out as two rows of 16, so the sheet holds 32 cells
        let planar: Vec<u8> = (0..17 * 32).map(|i| (i * 7) as u8).collect();
        let extracted = hal_core::planar_to_indices(&planar, 17).unwrap();
        let path = std::env::temp_dir().join(format!("halsprite_edit_{}.png", std::process::id()));
        sheet::save(&path, &extracted).unwrap();
        assert_eq!(sheet::load(&path, None).unwrap().tile_count(), 32);

        let mut rom = vec![0xFF; 0x8000];
        let packed = compress(&planar, CompressionMode::Normal);
        rom[0x100..0x100 + packed.len()].copy_from_slice(&packed);
        let block = Injector::new().measure_block(&rom, 0x100);

        let tiles = edit_tile_count(None, &block, 0x100).unwrap();
        assert_eq!(tiles, 17);
        let edited = sheet::load(&path, Some(tiles)).unwrap();
        assert_eq!(hal_core::indices_to_planar(&edited).unwrap(), planar);

        assert_eq!(edit_tile_count(Some(4), &block, 0x100).unwrap(), 4);
        let empty = Injector::new().measure_block(&rom, 0x4000);
        assert!(edit_tile_count(None, &empty, 0x4000).is_err());
        rom[0x4000] = 0xFD;
        let broken = Injector::new().measure_block(&rom, 0x4000);
        assert!(edit_tile_count(None, &broken, 0x4000).is_err());
        assert_eq!(edit_tile_count(Some(2), &broken, 0x4000).unwrap(), 2);
        std::fs::remove_file(&path).ok();
    }
}
