//! HAL compression, the run-length/back-reference codec used for graphics
//! in HAL Laboratory's SNES titles.
//!
//! # Stream format
//!
//! A stream is a sequence of commands terminated by `0xFF`. Each command
//! starts with a header byte:
//!
//! - Short form `ccc lllll`: command `c` (0-6), length `l + 1` (1-32)
//! - Long form `111 ccc ll` followed by `llllllll`: command `c` (0-6),
//!   10-bit length + 1 (1-1024)
//!
//! | cmd | meaning                                    | argument          |
//! |-----|--------------------------------------------|-------------------|
//! | 0   | literal run, copy `n` bytes                | `n` raw bytes     |
//! | 1   | fill `n` bytes with one value              | 1 byte            |
//! | 2   | fill `n` words with a byte pair (2n bytes) | 2 bytes           |
//! | 3   | `n` bytes counting up from a seed          | 1 byte            |
//! | 4   | copy `n` decoded bytes                     | u16 BE position   |
//! | 5   | copy `n` decoded bytes, bits reversed      | u16 BE position   |
//! | 6   | copy `n` decoded bytes, walking backwards  | u16 BE position   |
//!
//! Back-reference positions are absolute offsets into the decoded output.
//! The long-form encoding of command 7 (`0xFC`-`0xFE`) is never produced by
//! the packer and is rejected as an invalid opcode.
//!
//! # Bounded decoding
//!
//! Compressed blocks sit inside mixed ROM data and a blind decode from a
//! wrong offset rarely hits a terminator, so [`decompress`] always takes a
//! caller-supplied output cap and stops as soon as the output reaches it.
//! Independently of the cap, output beyond [`MAX_DECODED_SIZE`] is an error.

use serde::{Deserialize, Serialize};

use crate::cursor::{BitCursor, BitWriter};
use crate::logging::{log, LogCategory, LogLevel};
use crate::DecodeError;

/// Hard ceiling on decoded output, independent of any caller cap.
pub const MAX_DECODED_SIZE: usize = 0x10000;

/// Longest run a single command can describe.
pub const MAX_RUN: usize = 1024;

/// Longest run that fits the one-byte header form.
const SHORT_RUN: usize = 32;

/// Highest decoded position a back-reference can address.
const MAX_BACKREF_POSITION: usize = 0xFFFF;

const END_OF_STREAM: u8 = 0xFF;

/// Recent positions the fast packer considers for a back-reference.
const FAST_CANDIDATES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Literal,
    Fill,
    WordFill,
    Sequence,
    Copy,
    CopyFlipped,
    CopyReversed,
}

impl Command {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Command::Literal),
            1 => Some(Command::Fill),
            2 => Some(Command::WordFill),
            3 => Some(Command::Sequence),
            4 => Some(Command::Copy),
            5 => Some(Command::CopyFlipped),
            6 => Some(Command::CopyReversed),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Command::Literal => 0,
            Command::Fill => 1,
            Command::WordFill => 2,
            Command::Sequence => 3,
            Command::Copy => 4,
            Command::CopyFlipped => 5,
            Command::CopyReversed => 6,
        }
    }

    /// Argument bytes following the header
    fn argument_len(self, units: usize) -> usize {
        match self {
            Command::Literal => units,
            Command::Fill | Command::Sequence => 1,
            Command::WordFill | Command::Copy | Command::CopyFlipped | Command::CopyReversed => 2,
        }
    }
}

/// Why a decode stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The `0xFF` terminator was read.
    Terminator,
    /// The output reached the caller's cap before a terminator.
    OutputLimit,
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub data: Vec<u8>,
    /// Compressed bytes read from the start offset, terminator included
    pub consumed: usize,
    pub stop: StopReason,
}

impl Decoded {
    /// True when the stream ended on its own terminator.
    pub fn is_complete(&self) -> bool {
        self.stop == StopReason::Terminator
    }
}

/// Output buffer that refuses to grow past the caller's cap.
struct Sink {
    out: Vec<u8>,
    limit: usize,
}

impl Sink {
    fn room(&self) -> usize {
        self.limit.saturating_sub(self.out.len())
    }

    fn is_full(&self) -> bool {
        self.out.len() >= self.limit
    }
}

/// Decompress the HAL stream starting at `start_offset` of `buffer`.
///
/// Decoding stops at the terminator or when `max_output_bytes` have been
/// produced, whichever comes first; the result never exceeds the cap. A
/// terminator immediately after the last capped byte is still consumed.
/// Reads are bounds-checked against `buffer`.
pub fn decompress(
    buffer: &[u8],
    start_offset: usize,
    max_output_bytes: usize,
) -> Result<Decoded, DecodeError> {
    let mut src = BitCursor::at(buffer, start_offset);
    let mut sink = Sink {
        out: Vec::with_capacity(max_output_bytes.min(MAX_DECODED_SIZE)),
        limit: max_output_bytes,
    };

    let stop = loop {
        if sink.is_full() {
            // A terminator right at the cap still ends the stream
            if matches!(src.peek_u8(), Ok(END_OF_STREAM)) {
                src.read_u8()?;
                break StopReason::Terminator;
            }
            break StopReason::OutputLimit;
        }

        let command_offset = src.position();
        let header = src.read_u8()?;
        if header == END_OF_STREAM {
            break StopReason::Terminator;
        }

        let (command_bits, units) = if header & 0xE0 == 0xE0 {
            let low = src.read_u8()?;
            let units = ((((header & 0x03) as usize) << 8) | low as usize) + 1;
            ((header >> 2) & 0x07, units)
        } else {
            (header >> 5, (header & 0x1F) as usize + 1)
        };
        let command = Command::from_bits(command_bits).ok_or(DecodeError::InvalidOpcode {
            offset: command_offset,
            opcode: header,
        })?;

        let produced = if command == Command::WordFill {
            units * 2
        } else {
            units
        };
        if max_output_bytes > MAX_DECODED_SIZE && sink.out.len() + produced > MAX_DECODED_SIZE {
            return Err(DecodeError::Oversized {
                limit: MAX_DECODED_SIZE,
            });
        }
        let take = produced.min(sink.room());

        match command {
            Command::Literal => {
                let bytes = src.read_slice(take)?;
                sink.out.extend_from_slice(bytes);
            }
            Command::Fill => {
                let value = src.read_u8()?;
                sink.out.resize(sink.out.len() + take, value);
            }
            Command::WordFill => {
                let pair = src.read_slice(2)?;
                let (lo, hi) = (pair[0], pair[1]);
                sink.out
                    .extend((0..take).map(|i| if i % 2 == 0 { lo } else { hi }));
            }
            Command::Sequence => {
                let seed = src.read_u8()?;
                sink.out
                    .extend((0..take).map(|i| seed.wrapping_add(i as u8)));
            }
            Command::Copy | Command::CopyFlipped | Command::CopyReversed => {
                let position = src.read_u16_be()? as usize;
                let available = sink.out.len();
                let in_range = match command {
                    Command::CopyReversed => position < available && units <= position + 1,
                    _ => position < available,
                };
                if !in_range {
                    return Err(DecodeError::InvalidBackref {
                        offset: command_offset,
                        position,
                        available,
                    });
                }
                // Source bytes may overlap the bytes being produced
                for i in 0..take {
                    let byte = match command {
                        Command::Copy => sink.out[position + i],
                        Command::CopyFlipped => sink.out[position + i].reverse_bits(),
                        _ => sink.out[position - i],
                    };
                    sink.out.push(byte);
                }
            }
        }
    };

    let consumed = src.position().saturating_sub(start_offset);
    log(LogCategory::Codec, LogLevel::Trace, || {
        format!(
            "HAL: decoded {} bytes from {} compressed at 0x{:06X} ({:?})",
            sink.out.len(),
            consumed,
            start_offset,
            stop
        )
    });

    Ok(Decoded {
        data: sink.out,
        consumed,
        stop,
    })
}

/// Packer strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Exhaustive back-reference search: smallest output, slowest.
    #[default]
    Normal,
    /// Greedy, literal-biased search against a few recent positions.
    Fast,
}

/// A candidate command covering `len` output bytes.
#[derive(Debug, Clone, Copy)]
struct Run {
    command: Command,
    /// Decoded bytes this command covers
    len: usize,
    /// Fill value, word pair, sequence seed or back-reference position;
    /// unused for literals
    arg: u16,
}

impl Run {
    fn units(&self) -> usize {
        if self.command == Command::WordFill {
            self.len / 2
        } else {
            self.len
        }
    }

    fn cost(&self) -> usize {
        header_len(self.units()) + self.command.argument_len(self.units())
    }

    fn gain(&self) -> isize {
        self.len as isize - self.cost() as isize
    }
}

fn header_len(units: usize) -> usize {
    if units <= SHORT_RUN {
        1
    } else {
        2
    }
}

struct Packer<'a> {
    data: &'a [u8],
    mode: CompressionMode,
    out: BitWriter,
    /// Earlier positions grouped by the byte found there
    positions: Vec<Vec<usize>>,
}

impl<'a> Packer<'a> {
    fn new(data: &'a [u8], mode: CompressionMode) -> Self {
        Self {
            data,
            mode,
            out: BitWriter::with_capacity(data.len() / 2 + 8),
            positions: vec![Vec::new(); 256],
        }
    }

    fn run(mut self) -> Vec<u8> {
        let mut pos = 0;
        let mut literal_start = 0;

        while pos < self.data.len() {
            let pending_literal = pos > literal_start;
            let min_gain = match (self.mode, pending_literal) {
                (CompressionMode::Normal, false) => 1,
                (CompressionMode::Normal, true) => 2,
                (CompressionMode::Fast, _) => 3,
            };

            match self.best_run(pos) {
                Some(run) if run.gain() >= min_gain => {
                    self.emit_literals(literal_start, pos);
                    self.emit_run(&run, pos);
                    for p in pos..pos + run.len {
                        self.remember(p);
                    }
                    pos += run.len;
                    literal_start = pos;
                }
                _ => {
                    self.remember(pos);
                    pos += 1;
                }
            }
        }

        self.emit_literals(literal_start, pos);
        self.out.write_u8(END_OF_STREAM);
        self.out.into_inner()
    }

    fn remember(&mut self, pos: usize) {
        if pos <= MAX_BACKREF_POSITION {
            self.positions[self.data[pos] as usize].push(pos);
        }
    }

    fn best_run(&self, pos: usize) -> Option<Run> {
        let data = self.data;
        let remaining = data.len() - pos;
        let max_len = remaining.min(MAX_RUN);
        let first = data[pos];

        let mut best: Option<Run> = None;
        let mut consider = |run: Run| {
            if run.len > 0 && best.map_or(true, |b| run.gain() > b.gain()) {
                best = Some(run);
            }
        };

        let fill = count_while(max_len, |i| data[pos + i] == first);
        consider(Run {
            command: Command::Fill,
            len: fill,
            arg: first as u16,
        });

        if remaining >= 4 {
            let second = data[pos + 1];
            let pairs = count_while((remaining / 2).min(MAX_RUN), |p| {
                data[pos + 2 * p] == first && data[pos + 2 * p + 1] == second
            });
            if pairs >= 2 {
                consider(Run {
                    command: Command::WordFill,
                    len: pairs * 2,
                    arg: u16::from_be_bytes([first, second]),
                });
            }
        }

        let sequence = count_while(max_len, |i| data[pos + i] == first.wrapping_add(i as u8));
        consider(Run {
            command: Command::Sequence,
            len: sequence,
            arg: first as u16,
        });

        // A copy costs more than a fill covering the same span
        if fill < max_len {
            match self.mode {
                CompressionMode::Normal => self.search_copies(pos, max_len, &mut consider),
                CompressionMode::Fast => self.search_recent(pos, max_len, &mut consider),
            }
        }

        best
    }

    /// Every earlier position, all three copy flavours.
    fn search_copies(&self, pos: usize, max_len: usize, consider: &mut impl FnMut(Run)) {
        let data = self.data;
        let first = data[pos];

        let mut longest = 0;
        for &start in self.positions[first as usize].iter().rev() {
            let forward = count_while(max_len, |i| data[start + i] == data[pos + i]);
            if forward > longest {
                longest = forward;
                consider(copy_run(Command::Copy, forward, start));
            }
            if longest == max_len {
                return;
            }
        }

        let mut longest = 0;
        for &start in self.positions[first as usize].iter().rev() {
            let reversed = count_while(max_len.min(start + 1), |i| data[start - i] == data[pos + i]);
            if reversed > longest {
                longest = reversed;
                consider(copy_run(Command::CopyReversed, reversed, start));
            }
            if longest == max_len {
                return;
            }
        }

        let mut longest = 0;
        for &start in self.positions[first.reverse_bits() as usize].iter().rev() {
            let flipped = count_while(max_len, |i| data[start + i].reverse_bits() == data[pos + i]);
            if flipped > longest {
                longest = flipped;
                consider(copy_run(Command::CopyFlipped, flipped, start));
            }
            if longest == max_len {
                return;
            }
        }
    }

    /// Forward copies from the most recent few positions only.
    fn search_recent(&self, pos: usize, max_len: usize, consider: &mut impl FnMut(Run)) {
        let data = self.data;
        for &start in self.positions[data[pos] as usize]
            .iter()
            .rev()
            .take(FAST_CANDIDATES)
        {
            let forward = count_while(max_len, |i| data[start + i] == data[pos + i]);
            consider(copy_run(Command::Copy, forward, start));
        }
    }

    fn emit_header(&mut self, command: Command, units: usize) {
        debug_assert!((1..=MAX_RUN).contains(&units));
        let count = (units - 1) as u16;
        if units <= SHORT_RUN {
            self.out.write_bits(command.bits() as u16, 3);
            self.out.write_bits(count, 5);
        } else {
            self.out.write_bits(0b111, 3);
            self.out.write_bits(command.bits() as u16, 3);
            self.out.write_bits(count, 10);
        }
    }

    fn emit_literals(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos < end {
            let run = Run {
                command: Command::Literal,
                len: (end - pos).min(MAX_RUN),
                arg: 0,
            };
            self.emit_run(&run, pos);
            pos += run.len;
        }
    }

    /// Write `run`, which covers the input starting at `pos`.
    fn emit_run(&mut self, run: &Run, pos: usize) {
        self.emit_header(run.command, run.units());
        match run.command {
            Command::Literal => {
                let data = self.data;
                self.out.write_slice(&data[pos..pos + run.len]);
            }
            Command::Fill | Command::Sequence => self.out.write_u8(run.arg as u8),
            Command::WordFill | Command::Copy | Command::CopyFlipped | Command::CopyReversed => {
                self.out.write_u16_be(run.arg)
            }
        }
    }
}

fn copy_run(command: Command, len: usize, start: usize) -> Run {
    Run {
        command,
        len,
        arg: start as u16,
    }
}

/// Length of the prefix `0..limit` for which `pred` holds.
#[inline]
fn count_while(limit: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let mut n = 0;
    while n < limit && pred(n) {
        n += 1;
    }
    n
}

/// Compress `raw` into a terminated HAL stream.
///
/// Never fails; incompressible input comes back as literal runs. Input
/// longer than [`MAX_DECODED_SIZE`] still encodes, but the stream will be
/// rejected by [`decompress`] unless the caller's cap truncates it.
pub fn compress(raw: &[u8], mode: CompressionMode) -> Vec<u8> {
    let packed = Packer::new(raw, mode).run();
    log(LogCategory::Codec, LogLevel::Debug, || {
        format!(
            "HAL: packed {} bytes into {} ({:?})",
            raw.len(),
            packed.len(),
            mode
        )
    });
    packed
}

/// Size of the stream [`compress`] would produce.
pub fn compressed_size(raw: &[u8], mode: CompressionMode) -> usize {
    compress(raw, mode).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(raw: &[u8], mode: CompressionMode) -> Vec<u8> {
        let packed = compress(raw, mode);
        let decoded = decompress(&packed, 0, raw.len()).unwrap();
        assert_eq!(decoded.data, raw, "round trip failed in {:?} mode", mode);
        packed
    }

    fn lcg_bytes(len: usize, mut seed: u32) -> Vec<u8> {
        (0..len)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (seed >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_fill_then_literal_scenario() {
        // fill 16 x 0xAB, literal [0x01, 0x02], end
        let stream = [0x2F, 0xAB, 0x01, 0x01, 0x02, 0xFF];
        let decoded = decompress(&stream, 0, 32).unwrap();

        let mut expected = vec![0xAB; 16];
        expected.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(decoded.data, expected);
        assert_eq!(decoded.consumed, 6);
        assert!(decoded.is_complete());
    }

    #[test]
    fn test_word_fill_and_sequence() {
        let stream = [0x42, 0xAA, 0xBB, 0x63, 0xFE, 0xFF];
        let decoded = decompress(&stream, 0, 64).unwrap();
        assert_eq!(
            decoded.data,
            vec![0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB, 0xFE, 0xFF, 0x00, 0x01]
        );
    }

    #[test]
    fn test_back_reference_flavours() {
        // literal [1,2,3,4], copy 4 from position 0
        let forward = [0x03, 1, 2, 3, 4, 0x83, 0x00, 0x00, 0xFF];
        assert_eq!(
            decompress(&forward, 0, 64).unwrap().data,
            vec![1, 2, 3, 4, 1, 2, 3, 4]
        );

        // literal [0x01, 0x80], bit-reversed copy of both
        let flipped = [0x01, 0x01, 0x80, 0xA1, 0x00, 0x00, 0xFF];
        assert_eq!(
            decompress(&flipped, 0, 64).unwrap().data,
            vec![0x01, 0x80, 0x80, 0x01]
        );

        // literal [1,2,3], backwards copy of 3 from position 2
        let reversed = [0x02, 1, 2, 3, 0xC2, 0x00, 0x02, 0xFF];
        assert_eq!(
            decompress(&reversed, 0, 64).unwrap().data,
            vec![1, 2, 3, 3, 2, 1]
        );
    }

    #[test]
    fn test_overlapping_copy_repeats_pattern() {
        // literal [7, 9], copy 6 from position 0 reads bytes it just wrote
        let stream = [0x01, 7, 9, 0x85, 0x00, 0x00, 0xFF];
        assert_eq!(
            decompress(&stream, 0, 64).unwrap().data,
            vec![7, 9, 7, 9, 7, 9, 7, 9]
        );
    }

    #[test]
    fn test_long_form_header() {
        // fill 100 bytes: 111 001 00, 99
        let stream = [0xE4, 0x63, 0x5A, 0xFF];
        let decoded = decompress(&stream, 0, 1000).unwrap();
        assert_eq!(decoded.data, vec![0x5A; 100]);
    }

    #[test]
    fn test_decode_from_offset() {
        let mut buffer = vec![0x12, 0x34, 0x56];
        buffer.extend_from_slice(&[0x2F, 0xAB, 0xFF]);
        let decoded = decompress(&buffer, 3, 64).unwrap();
        assert_eq!(decoded.data, vec![0xAB; 16]);
        assert_eq!(decoded.consumed, 3);
    }

    #[test]
    fn test_invalid_opcode() {
        let stream = [0x00, 0x11, 0xFD, 0x00, 0xFF];
        assert_eq!(
            decompress(&stream, 0, 64),
            Err(DecodeError::InvalidOpcode {
                offset: 2,
                opcode: 0xFD
            })
        );
    }

    #[test]
    fn test_invalid_back_references() {
        // Copy before anything was decoded
        let stream = [0x80, 0x00, 0x00, 0xFF];
        assert_eq!(
            decompress(&stream, 0, 64),
            Err(DecodeError::InvalidBackref {
                offset: 0,
                position: 0,
                available: 0
            })
        );

        // Backwards copy of 3 starting at position 1 would walk off the front
        let stream = [0x01, 1, 2, 0xC2, 0x00, 0x01, 0xFF];
        assert!(matches!(
            decompress(&stream, 0, 64),
            Err(DecodeError::InvalidBackref { offset: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_streams() {
        // Literal of 4 with only 2 bytes present
        assert_eq!(
            decompress(&[0x03, 1, 2], 0, 64),
            Err(DecodeError::Truncated { offset: 1 })
        );
        // No terminator before the buffer ends
        assert_eq!(
            decompress(&[0x2F, 0xAB], 0, 64),
            Err(DecodeError::Truncated { offset: 2 })
        );
        // Start offset past the end
        assert!(matches!(
            decompress(&[0xFF], 5, 64),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_output_cap_is_respected() {
        // fill 1024 bytes repeatedly with no terminator in sight
        let stream = [0xE7, 0xFF, 0x11, 0xE7, 0xFF, 0x22];
        let decoded = decompress(&stream, 0, 10).unwrap();
        assert_eq!(decoded.data, vec![0x11; 10]);
        assert_eq!(decoded.stop, StopReason::OutputLimit);
        assert_eq!(decoded.consumed, 3);

        // A literal cut short by the cap only reads what it emits
        let decoded = decompress(&[0x1F, 1, 2, 3], 0, 3).unwrap();
        assert_eq!(decoded.data, vec![1, 2, 3]);

        let decoded = decompress(&stream, 0, 0).unwrap();
        assert!(decoded.data.is_empty());
        assert_eq!(decoded.consumed, 0);

        // Output exactly filling the cap still picks up the terminator
        let decoded = decompress(&[0x2F, 0xAB, 0xFF], 0, 16).unwrap();
        assert_eq!(decoded.consumed, 3);
        assert!(decoded.is_complete());
    }

    #[test]
    fn test_oversized_output_is_rejected() {
        // 65 x fill(1024) = 66,560 bytes, never terminated
        let stream: Vec<u8> = (0..65).flat_map(|_| [0xE7, 0xFF, 0x00]).collect();
        assert_eq!(
            decompress(&stream, 0, usize::MAX),
            Err(DecodeError::Oversized {
                limit: MAX_DECODED_SIZE
            })
        );
        // Within the ceiling the cap simply truncates
        let decoded = decompress(&stream, 0, MAX_DECODED_SIZE).unwrap();
        assert_eq!(decoded.data.len(), MAX_DECODED_SIZE);
    }

    #[test]
    fn test_empty_input_compresses_to_terminator() {
        assert_eq!(compress(&[], CompressionMode::Normal), vec![0xFF]);
        assert_eq!(compress(&[], CompressionMode::Fast), vec![0xFF]);
        let decoded = decompress(&[0xFF], 0, 0).unwrap();
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_fill_compresses_to_three_bytes() {
        let raw = vec![0xAB; 16];
        let packed = round_trip(&raw, CompressionMode::Normal);
        assert_eq!(packed, vec![0x2F, 0xAB, 0xFF]);
    }

    #[test]
    fn test_round_trip_structured_data() {
        let mut raw = Vec::new();
        raw.extend(vec![0u8; 300]);
        raw.extend((0..=255u8).cycle().take(600));
        raw.extend([0x12, 0x34].repeat(700));
        raw.extend(b"HAL Laboratory sprite data, HAL Laboratory sprite data");
        let mirrored: Vec<u8> = raw[400..480].iter().rev().copied().collect();
        raw.extend(mirrored);
        let flipped: Vec<u8> = raw[900..960].iter().map(|b| b.reverse_bits()).collect();
        raw.extend(flipped);
        raw.extend(vec![0xFF; 2000]);

        let normal = round_trip(&raw, CompressionMode::Normal);
        let fast = round_trip(&raw, CompressionMode::Fast);
        assert!(normal.len() < raw.len() / 4);
        assert!(fast.len() < raw.len());
    }

    #[test]
    fn test_round_trip_incompressible_data() {
        let raw = lcg_bytes(3000, 0xC0FFEE);
        let normal = round_trip(&raw, CompressionMode::Normal);
        round_trip(&raw, CompressionMode::Fast);
        // Literal runs cost two header bytes per 1024
        assert!(normal.len() <= raw.len() + 2 * (raw.len() / MAX_RUN + 1) + 1);
    }

    #[test]
    fn test_long_literal_splits_at_max_run() {
        let raw = lcg_bytes(MAX_RUN + 6, 0x5EED);
        for mode in [CompressionMode::Normal, CompressionMode::Fast] {
            let packed = round_trip(&raw, mode);
            assert_eq!(packed.len(), raw.len() + 4);
            assert_eq!(&packed[..2], &[0xE3, 0xFF]);
            assert_eq!(&packed[2..2 + MAX_RUN], &raw[..MAX_RUN]);
            assert_eq!(packed[2 + MAX_RUN], 0x05);
            assert_eq!(&packed[3 + MAX_RUN..packed.len() - 1], &raw[MAX_RUN..]);
        }
    }

    #[test]
    fn test_round_trip_small_inputs() {
        for raw in [
            &[0x00][..],
            &[0xFF],
            &[0xFF, 0xFF],
            &[1, 2],
            &[9, 9, 9],
            &[0xFE, 0xFF, 0x00, 0x01, 0x02],
        ] {
            round_trip(raw, CompressionMode::Normal);
            round_trip(raw, CompressionMode::Fast);
        }
    }

    #[test]
    fn test_round_trip_sprite_like_tiles() {
        // 64 tiles of a shaded ball, many repeated rows
        let mut raw = Vec::new();
        for tile in 0..64u32 {
            for row in 0..8u32 {
                let d = (row as i32 - 4).abs() as u32;
                let plane0 = (0xFFu32 >> d << (d / 2)) as u8;
                let plane1 = if (tile + row) % 3 == 0 { plane0 & 0x3C } else { 0 };
                raw.push(plane0);
                raw.push(plane1);
            }
            raw.extend(vec![(tile & 1) as u8 * 0x18; 16]);
        }
        let normal = round_trip(&raw, CompressionMode::Normal);
        let fast = round_trip(&raw, CompressionMode::Fast);
        assert!(normal.len() < raw.len() / 2);
        assert!(fast.len() < raw.len());
    }

    #[test]
    fn test_decoded_stream_stops_at_its_terminator() {
        let raw = lcg_bytes(200, 7);
        let mut buffer = compress(&raw, CompressionMode::Normal);
        let stream_len = buffer.len();
        buffer.extend_from_slice(&[0x00, 0x01, 0x02, 0x03]);

        let decoded = decompress(&buffer, 0, 0x8000).unwrap();
        assert_eq!(decoded.data, raw);
        assert_eq!(decoded.consumed, stream_len);
        assert!(decoded.is_complete());
    }
}
