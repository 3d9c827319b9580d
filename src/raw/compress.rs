//! The block compression algorithm.
//!
//! We scan the input left to right and ask the match finder for a duplicate at every position.
//! Pending literals and the duplicate that ends them are written as one group. Positions that
//! keep missing are skipped in growing increments, which is what makes incompressible data cheap.

use std::cmp;
use std::io::{self, Write, ErrorKind};
use std::mem;
use byteorder::{NativeEndian, WriteBytesExt, LE};
use fehler::{throw, throws};
use thiserror::Error;

use super::matcher::{self, EncoderTable, Match, U16Table, U32Table, MFLIMIT, MINMATCH};

const ACCELERATION: usize = 1;
const SKIP_TRIGGER: usize = 6; // for each 64 steps, skip in bigger increments


/// Errors when compressing a raw block.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressError {
    #[error("output buffer holds {available} bytes but compressing may need up to {needed}")]
    InsufficientOutputSpace { needed: usize, available: usize },
}

/// What `compress_block` put into the output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodedBlock {
    /// This many bytes of LZ4 sequences.
    Compressed(usize),
    /// Compression did not pay off, this many raw bytes were copied instead.
    Stored(usize),
}

impl EncodedBlock {
    pub fn len(&self) -> usize {
        match *self {
            EncodedBlock::Compressed(len) | EncodedBlock::Stored(len) => len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, EncodedBlock::Stored(_))
    }
}

/// The worst-case size of a compressed block for `input_len` bytes of input.
///
/// Output buffers of at least this size never make `compress_block` fail.
pub fn compress_bound(input_len: usize) -> usize {
    input_len + input_len / 255 + 16
}


#[throws(io::Error)]
fn write_group<W: Write>(writer: &mut W, literal: &[u8], duplicate: Match) {
    let literal_len = literal.len();
    let extra_bytes = duplicate.len - MINMATCH;

    let mut token = 0;
    write_lsic_head(&mut token, 4, literal_len);
    write_lsic_head(&mut token, 0, extra_bytes);

    writer.write_u8(token)?;
    write_lsic_tail(writer, literal_len)?;
    writer.write_all(literal)?;
    writer.write_u16::<LE>(duplicate.offset)?;
    write_lsic_tail(writer, extra_bytes)?;
}

#[throws(io::Error)]
fn write_last_literals<W: Write>(writer: &mut W, literal: &[u8]) {
    let mut token = 0;
    write_lsic_head(&mut token, 4, literal.len());
    writer.write_u8(token)?;
    write_lsic_tail(writer, literal.len())?;
    writer.write_all(literal)?;
}

fn write_lsic_head(token: &mut u8, shift: usize, value: usize) {
    let i = cmp::min(value, 0xF) as u8;
    *token |= i << shift;
}

#[throws(io::Error)]
#[inline]
fn write_lsic_tail<W: Write>(writer: &mut W, mut value: usize) {
    if value < 0xF {
        return;
    }

    value -= 0xF;

    while value >= 4 * 0xFF {
        writer.write_u32::<NativeEndian>(u32::MAX)?;
        value -= 4 * 0xFF;
    }
    while value >= 0xFF {
        writer.write_u8(0xFF)?;
        value -= 0xFF;
    }
    writer.write_u8(value as u8)?;
}

/// Search forward from `literal_start` for the next duplicate.
///
/// Returns `None` once fewer than `MFLIMIT` bytes remain, at which point everything from
/// `literal_start` on has to be written as literals.
fn find_next<T: EncoderTable>(table: &mut T, input: &[u8], literal_start: usize, block_start: usize) -> Option<Match> {
    let mut cursor = literal_start;
    let mut step_counter = ACCELERATION << SKIP_TRIGGER;
    let mut step = 1;
    while input.len().saturating_sub(cursor) >= MFLIMIT {
        if let Some(duplicate) = matcher::find_match(table, input, cursor, literal_start, block_start) {
            return Some(duplicate);
        }

        cursor += step;
        step = step_counter >> SKIP_TRIGGER;

        // the first miss of each group doesn't count, like in the reference encoder
        if literal_start + 1 != cursor {
            step_counter += 1;
        }
    }
    None
}

/// Compress `input[cursor..]` into a single block of LZ4 sequences.
///
/// Everything before `cursor` is history: the block may reference it but does not contain it.
/// The table has to describe that history (or be empty), which is how linked blocks and
/// dictionaries are implemented.
///
/// Always writes at least one token, even for empty input.
#[throws(io::Error)]
pub fn compress_into<W: Write, T: EncoderTable>(input: &[u8], cursor: usize, table: &mut T, mut writer: W) {
    if input.len() > T::payload_size_limit() {
        throw!(io::Error::new(ErrorKind::InvalidInput, "input too large for the encoder table"));
    }

    let block_start = cursor;
    let mut literal_start = cursor;
    while let Some(duplicate) = find_next(table, input, literal_start, block_start) {
        table.replace(input, duplicate.end() - 2);
        write_group(&mut writer, &input[literal_start..duplicate.start], duplicate)?;
        literal_start = duplicate.end();
    }

    // end with a literal-only section
    write_last_literals(&mut writer, &input[literal_start..])?;
}

/// Compress `input` into a freshly allocated block, without any fallback to raw storage.
pub fn compress(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(compress_bound(input.len()));
    if input.len() <= U16Table::payload_size_limit() {
        compress_into(input, 0, &mut U16Table::default(), &mut buf)?;
    } else {
        compress_into(input, 0, &mut U32Table::default(), &mut buf)?;
    }
    Ok(buf)
}

/// Compress `input` into `output`.
///
/// `output` must hold at least `compress_bound(input.len())` bytes. This is checked before
/// anything is written, so on error `output` is left untouched.
///
/// If the sequences would take up as much space as the input or more, the input is copied
/// verbatim and `EncodedBlock::Stored` is returned. Only `EncodedBlock::Compressed` output
/// can be handed to `decompress_block`.
pub fn compress_block(input: &[u8], output: &mut [u8]) -> Result<EncodedBlock, CompressError> {
    let needed = compress_bound(input.len());
    if output.len() < needed {
        return Err(CompressError::InsufficientOutputSpace { needed, available: output.len() });
    }

    // anything not strictly smaller than the input gets stored instead
    let limit = input.len().saturating_sub(1);
    let mut sink = NoPartialWrites(&mut output[..limit]);
    let encoded = if input.len() <= U16Table::payload_size_limit() {
        compress_into(input, 0, &mut U16Table::default(), &mut sink)
    } else {
        compress_into(input, 0, &mut U32Table::default(), &mut sink)
    };

    match encoded {
        Ok(()) => Ok(EncodedBlock::Compressed(limit - sink.remaining())),
        Err(_) => {
            output[..input.len()].copy_from_slice(input);
            Ok(EncodedBlock::Stored(input.len()))
        }
    }
}


/// Helper struct to allow more efficient code generation when using the Write trait on byte buffers.
///
/// The Write impl on [u8] (and everything similar, e.g. Cursor<[u8]>) is specified to write
/// as many bytes as possible before returning an error. That forces a 32-bit write to compile
/// to four 8-bit writes with a range check each.
///
/// This wrapper simply does not write anything in case we fail the bounds check,
/// as the entire buffer is thrown away in that case anyway.
pub struct NoPartialWrites<'a>(pub &'a mut [u8]);

impl<'a> NoPartialWrites<'a> {
    /// How many bytes can still be written.
    pub fn remaining(&self) -> usize {
        self.0.len()
    }
}

impl<'a> Write for NoPartialWrites<'a> {
    #[inline]
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.0.len() < data.len() {
            return Err(ErrorKind::WriteZero.into());
        }

        let amt = data.len();
        let (a, b) = mem::replace(&mut self.0, &mut []).split_at_mut(amt);
        a.copy_from_slice(data);
        self.0 = b;
        Ok(amt)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::str;
    use super::*;
    use crate::raw::decompress::{decompress, decompress_block};

    /// Test that the compressed string decompresses to the original string.
    fn inverse(s: &str) {
        let compressed = compress(s.as_bytes()).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(str::from_utf8(&decompressed).unwrap(), s);
    }

    #[test]
    fn shakespear() {
        inverse("to live or not to live");
        inverse("Love is a wonderful terrible thing");
        inverse("There is nothing either good or bad, but thinking makes it so.");
        inverse("I burn, I pine, I perish.");
    }

    #[test]
    fn save_the_pandas() {
        inverse("To cute to die! Save the red panda!");
        inverse("You are 60% water. Save 60% of yourself!");
        inverse("Save water, it doesn't grow on trees.");
        inverse("The panda bear has an amazing black-and-white fur.");
        inverse("The average panda eats as much as 9 to 14 kg of bamboo shoots a day.");
        inverse("The Empress Dowager Bo was buried with a panda skull in her vault");
    }

    #[test]
    fn not_compressible() {
        inverse("as6yhol.;jrew5tyuikbfewedfyjltre22459ba");
        inverse("jhflkdjshaf9p8u89ybkvjsdbfkhvg4ut08yfrr");
    }

    #[test]
    fn short() {
        inverse("ahhd");
        inverse("ahd");
        inverse("x-29");
        inverse("x");
        inverse("k");
        inverse(".");
        inverse("ajsdh");
    }

    #[test]
    fn empty_string() {
        assert_eq!(compress(b"").unwrap(), [0]);
        inverse("");
    }

    #[test]
    fn nulls() {
        let compressed = compress(&[0; 13]).unwrap();
        // one literal zero, a 7 byte run at offset 1, five trailing literals
        assert_eq!(compressed, [0x13, 0, 1, 0, 0x50, 0, 0, 0, 0, 0]);
        inverse("\0\0\0\0\0\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn inputs_below_mflimit_are_all_literals() {
        for &len in &[MFLIMIT - 1, MFLIMIT] {
            let compressed = compress(&vec![0; len]).unwrap();
            assert_eq!(compressed[0], (len as u8) << 4);
            assert_eq!(compressed.len(), len + 1);
        }
    }

    #[test]
    fn long_literal_and_match_lengths() {
        let mut input: Vec<u8> = (0..300u32).map(|i| (i * 7 % 251) as u8).collect();
        input.extend(std::iter::repeat(b'z').take(2000));
        let compressed = compress(&input).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn compression_works() {
        let s = "The Read trait allows for reading bytes from a source. Implementors of the Read trait are called 'readers'. Readers are defined by one required method, read().";

        inverse(s);

        assert!(compress(s.as_bytes()).unwrap().len() < s.len());
    }

    #[test]
    fn big_compression() {
        let mut s = Vec::with_capacity(1 << 20);

        for n in 0..(1 << 20) {
            s.push((n as u8).wrapping_mul(0xA).wrapping_add(33) ^ 0xA2);
        }

        assert_eq!(&decompress(&compress(&s).unwrap()).unwrap(), &s);
    }

    #[test]
    fn bound_formula() {
        assert_eq!(compress_bound(0), 16);
        assert_eq!(compress_bound(1), 17);
        assert_eq!(compress_bound(254), 270);
        assert_eq!(compress_bound(255), 272);
        assert_eq!(compress_bound(510), 528);
    }

    #[test]
    fn block_rejects_small_output_without_writing() {
        let input = "Hello world, this is quite something".repeat(10);
        let mut output = vec![0xAA; compress_bound(input.len()) - 1];
        assert_eq!(
            compress_block(input.as_bytes(), &mut output),
            Err(CompressError::InsufficientOutputSpace { needed: 377, available: 376 })
        );
        assert!(output.iter().all(|&b| b == 0xAA));

        assert!(compress_block(input.as_bytes(), &mut []).is_err());
    }

    #[test]
    fn block_stores_incompressible_input() {
        let input = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut output = vec![0; compress_bound(input.len())];
        let encoded = compress_block(input, &mut output).unwrap();
        assert_eq!(encoded, EncodedBlock::Stored(26));
        assert_eq!(&output[..26], &input[..]);

        assert_eq!(compress_block(b"", &mut output).unwrap(), EncodedBlock::Stored(0));
    }

    #[test]
    fn block_compresses_repetitions() {
        let input = "Hello world, this is quite something".repeat(10);
        let mut output = vec![0; compress_bound(input.len())];
        let encoded = compress_block(input.as_bytes(), &mut output).unwrap();
        assert!(!encoded.is_stored());
        assert!(encoded.len() < input.len());

        let mut decoded = vec![0; input.len()];
        assert_eq!(decompress_block(&output[..encoded.len()], &mut decoded, input.len()), Ok(input.len()));
        assert_eq!(decoded, input.as_bytes());
    }

    #[test]
    fn no_partial_writes() {
        let mut buf = [0u8; 3];
        let mut sink = NoPartialWrites(&mut buf);
        sink.write_all(b"ab").unwrap();
        assert!(sink.write_all(b"cd").is_err());
        assert_eq!(sink.remaining(), 1);
        assert_eq!(&buf[..2], b"ab");
    }
}
