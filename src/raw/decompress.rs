use byteorder::{ReadBytesExt, LE};
use std::io::Cursor;
use thiserror::Error;

use super::matcher::MINMATCH;

/// Ways in which a sequence can be structurally invalid.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Malformation {
    #[error("a duplicate has offset zero")]
    ZeroOffset,
    /// This may be caused by a missing or incomplete dictionary.
    #[error("duplicate offset {offset} reaches past the {available} bytes of history")]
    OffsetOutOfBounds { offset: usize, available: usize },
    #[error("a length does not fit in memory")]
    LengthOverflow,
    #[error("the block decodes to more than {limit} bytes")]
    OutputOverrun { limit: usize },
}

#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("the block ends in the middle of a sequence")]
    UnexpectedEndOfInput,
    #[error("malformed sequence: {0}")]
    MalformedSequence(Malformation),
    #[error("expected {expected} bytes of output, found {actual}")]
    OutputSizeMismatch { expected: usize, actual: usize },
}

impl From<Malformation> for DecodeError {
    fn from(m: Malformation) -> Self {
        DecodeError::MalformedSequence(m)
    }
}

/// This is how LZ4 encodes varints.
/// Just keep reading and adding while it's all F
fn read_lsic(initial: u8, cursor: &mut Cursor<&[u8]>) -> Result<usize, DecodeError> {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = cursor.read_u8().map_err(|_| DecodeError::UnexpectedEndOfInput)?;
            value = value.checked_add(more as usize).ok_or(Malformation::LengthOverflow)?;
            if more != 0xFF {
                break;
            }
        }
    }
    Ok(value)
}

/// Decompress an LZ4-compressed block, appending at most `max_output` bytes to `output`.
///
/// Note that LZ4 heavily relies on a lookback mechanism where bytes earlier in the output stream are referenced.
/// You may either pre-initialize the output buffer with this data or pass it separately in `prefix`.
/// In particular, an LZ4 "dictionary" should be passed as a `prefix` because you obviously
/// don't want the dictionary to appear at the beginning of the output.
///
/// The block must end with a literal-only sequence exactly at the end of `input`.
pub fn decompress_raw(input: &[u8], prefix: &[u8], output: &mut Vec<u8>, max_output: usize) -> Result<(), DecodeError> {
    let limit = output.len().saturating_add(max_output);
    let fits = |len: usize, extra: usize| -> Result<(), DecodeError> {
        match len.checked_add(extra) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(Malformation::OutputOverrun { limit: max_output }.into()),
        }
    };

    let mut reader = Cursor::new(input);
    loop {
        let token = reader.read_u8().map_err(|_| DecodeError::UnexpectedEndOfInput)?;

        // read literals
        let literal_length = read_lsic(token >> 4, &mut reader)?;
        fits(output.len(), literal_length)?;

        let literal_start = reader.position() as usize;
        let literals = input[literal_start..].get(..literal_length).ok_or(DecodeError::UnexpectedEndOfInput)?;
        output.extend_from_slice(literals);
        reader.set_position((literal_start + literal_length) as u64);

        if literal_start + literal_length == input.len() {
            // the last sequence has no duplicate
            return Ok(());
        }

        // read duplicates
        let offset = reader.read_u16::<LE>().map_err(|_| DecodeError::UnexpectedEndOfInput)? as usize;
        let match_len = read_lsic(token & 0xF, &mut reader)?
            .checked_add(MINMATCH)
            .ok_or(Malformation::LengthOverflow)?;
        fits(output.len(), match_len)?;
        copy_overlapping(offset, match_len, prefix, output)?;
    }
}

fn copy_overlapping(
    offset: usize,
    match_len: usize,
    prefix: &[u8],
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let old_len = output.len();
    match offset {
        0 => return Err(Malformation::ZeroOffset.into()),
        i if i > old_len => {
            // need prefix for this
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                return Err(Malformation::OffsetOutOfBounds { offset, available: old_len + prefix.len() }.into());
            }
            let from_prefix = std::cmp::min(prefix_needed, match_len);
            output.extend_from_slice(&prefix[prefix.len() - prefix_needed..][..from_prefix]);
            let remaining_len = match_len - from_prefix;
            if remaining_len != 0 {
                // offset stays the same because our cursor moved forward by the amount of bytes we took from prefix
                return copy_overlapping(offset, remaining_len, &[], output);
            }
        }

        // fastpath: memset if we repeat the same byte forever
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: nonoverlapping
            // for borrowck reasons we have to extend with zeroes first and then memcpy
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small, repeat a 16 byte pattern
            let mut buf = [0u8; 16];
            for chunk in buf.chunks_mut(offset) {
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            output.resize(old_len + match_len, 0);
            for target in output[old_len..].chunks_mut(buf.len()) {
                target.copy_from_slice(&buf[..target.len()]);
            }
        }
        _ => {
            // slowest path: copy single bytes
            output.reserve(match_len);
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
    Ok(())
}

/// Decompress a block that is known to decode to exactly `expected_len` bytes into `output`.
///
/// Returns the number of bytes written, which is always `expected_len`.
pub fn decompress_block(input: &[u8], output: &mut [u8], expected_len: usize) -> Result<usize, DecodeError> {
    let available = output.len();
    let output = output.get_mut(..expected_len)
        .ok_or(DecodeError::OutputSizeMismatch { expected: expected_len, actual: available })?;

    let written = decompress_slice(input, output)?;
    if written != expected_len {
        return Err(DecodeError::OutputSizeMismatch { expected: expected_len, actual: written });
    }
    Ok(written)
}

/// Like `decompress_raw` without a prefix, but decoding in place into a fixed buffer.
fn decompress_slice(input: &[u8], output: &mut [u8]) -> Result<usize, DecodeError> {
    let limit = output.len();
    let end_of = |written: usize, extra: usize| -> Result<usize, DecodeError> {
        match written.checked_add(extra) {
            Some(end) if end <= limit => Ok(end),
            _ => Err(Malformation::OutputOverrun { limit }.into()),
        }
    };

    let mut reader = Cursor::new(input);
    let mut written = 0;
    loop {
        let token = reader.read_u8().map_err(|_| DecodeError::UnexpectedEndOfInput)?;

        let literal_length = read_lsic(token >> 4, &mut reader)?;
        let literal_end = end_of(written, literal_length)?;

        let literal_start = reader.position() as usize;
        let literals = input[literal_start..].get(..literal_length).ok_or(DecodeError::UnexpectedEndOfInput)?;
        output[written..literal_end].copy_from_slice(literals);
        written = literal_end;
        reader.set_position((literal_start + literal_length) as u64);

        if literal_start + literal_length == input.len() {
            return Ok(written);
        }

        let offset = reader.read_u16::<LE>().map_err(|_| DecodeError::UnexpectedEndOfInput)? as usize;
        let match_len = read_lsic(token & 0xF, &mut reader)?
            .checked_add(MINMATCH)
            .ok_or(Malformation::LengthOverflow)?;
        let match_end = end_of(written, match_len)?;
        if offset == 0 {
            return Err(Malformation::ZeroOffset.into());
        }
        if offset > written {
            return Err(Malformation::OffsetOutOfBounds { offset, available: written }.into());
        }

        let source = written - offset;
        if match_len <= offset {
            output.copy_within(source..source + match_len, written);
        } else {
            // overlapping: every byte may depend on one written in this same copy
            for i in written..match_end {
                output[i] = output[i - offset];
            }
        }
        written = match_end;
    }
}

/// Decompress all bytes of `input`.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut vec = Vec::new();
    decompress_raw(input, &[], &mut vec, usize::MAX)?;
    Ok(vec)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aaaaaaaaaaa_lots_of_aaaaaaaaa() {
        assert_eq!(decompress(&[0x11, b'a', 1, 0, 0x00]).unwrap(), b"aaaaaa");
    }

    #[test]
    fn multiple_repeated_blocks() {
        assert_eq!(
            decompress(&[0x11, b'a', 1, 0, 0x22, b'b', b'c', 2, 0, 0x00]).unwrap(),
            b"aaaaaabcbcbcbc"
        );
    }

    #[test]
    fn all_literal() {
        assert_eq!(decompress(&[0x30, b'a', b'4', b'9']).unwrap(), b"a49");
    }

    #[test]
    fn long_overlapping_copy() {
        // literal "abc", then 4 + 15 + 1 bytes at offset 3
        let decoded = decompress(&[0x3F, b'a', b'b', b'c', 3, 0, 1, 0x00]).unwrap();
        assert_eq!(decoded, b"abc".repeat(8)[..23].to_vec());
    }

    #[test]
    fn offset_oob() {
        assert_eq!(
            decompress(&[0x10, b'a', 2, 0, 0x00]),
            Err(DecodeError::MalformedSequence(Malformation::OffsetOutOfBounds { offset: 2, available: 1 }))
        );
        decompress(&[0x40, b'a', 1, 0]).unwrap_err();
    }

    #[test]
    fn zero_offset() {
        assert_eq!(
            decompress(&[0x10, b'a', 0, 0, 0x00]),
            Err(DecodeError::MalformedSequence(Malformation::ZeroOffset))
        );
    }

    #[test]
    fn truncated_input() {
        assert_eq!(decompress(&[]), Err(DecodeError::UnexpectedEndOfInput));
        // literal run longer than the data
        assert_eq!(decompress(&[0x50, b'a']), Err(DecodeError::UnexpectedEndOfInput));
        // half an offset
        assert_eq!(decompress(&[0x10, b'a', 1]), Err(DecodeError::UnexpectedEndOfInput));
        // missing continuation byte
        assert_eq!(decompress(&[0xF0]), Err(DecodeError::UnexpectedEndOfInput));
        // next token missing after a duplicate
        assert_eq!(decompress(&[0x11, b'a', 1, 0]), Err(DecodeError::UnexpectedEndOfInput));
    }

    #[test]
    fn prefix_is_history() {
        let mut output = Vec::new();
        decompress_raw(&[0x00, 4, 0, 0x00], b"wxyz", &mut output, 16).unwrap();
        assert_eq!(output, b"wxyz");

        // the duplicate starts in the prefix and runs into the output
        let mut output = Vec::new();
        decompress_raw(&[0x04, 2, 0, 0x00], b"xy", &mut output, 16).unwrap();
        assert_eq!(output, b"xyxyxyxy");
    }

    #[test]
    fn block_size_is_enforced() {
        let block = [0x11, b'a', 1, 0, 0x00];
        let mut output = [0u8; 8];
        assert_eq!(decompress_block(&block, &mut output, 6), Ok(6));
        assert_eq!(&output[..6], b"aaaaaa");

        assert_eq!(
            decompress_block(&block, &mut output, 5),
            Err(DecodeError::MalformedSequence(Malformation::OutputOverrun { limit: 5 }))
        );
        assert_eq!(
            decompress_block(&block, &mut output, 7),
            Err(DecodeError::OutputSizeMismatch { expected: 7, actual: 6 })
        );
        assert_eq!(
            decompress_block(&block, &mut output[..4], 6),
            Err(DecodeError::OutputSizeMismatch { expected: 6, actual: 4 })
        );
    }

    #[test]
    fn block_decodes_in_place() {
        // "abc", 20 bytes at offset 3, then "xyz" copied back from offset 23
        let block = [0x3F, b'a', b'b', b'c', 3, 0, 1, 0x00, 23, 0, 0x00];
        let mut expected = b"abc".repeat(8)[..23].to_vec();
        expected.extend_from_slice(b"abca");
        let mut output = vec![0xEE; 32];
        assert_eq!(decompress_block(&block, &mut output, 27), Ok(27));
        assert_eq!(&output[..27], &expected[..]);
        assert!(output[27..].iter().all(|&b| b == 0xEE));
        assert_eq!(decompress(&block).unwrap(), expected);

        let mut output = [0u8; 16];
        assert_eq!(
            decompress_block(&[0x10, b'a', 2, 0, 0x00], &mut output, 6),
            Err(DecodeError::MalformedSequence(Malformation::OffsetOutOfBounds { offset: 2, available: 1 }))
        );
        assert_eq!(
            decompress_block(&[0x10, b'a', 0, 0, 0x00], &mut output, 6),
            Err(DecodeError::MalformedSequence(Malformation::ZeroOffset))
        );
        assert_eq!(
            decompress_block(&[0x50, b'a'], &mut output, 5),
            Err(DecodeError::UnexpectedEndOfInput)
        );
    }
}
