//! Hash-based match finding.
//!
//! Every position we pass is recorded in a hash table keyed by the bytes found there.
//! Each bucket only remembers the most recent position, so a lookup yields at most one
//! candidate. That candidate is verified and extended, which gives a reasonable ratio at
//! a very high speed with fixed memory usage.

use std::mem;
use byteorder::{ByteOrder, NativeEndian};
use cfg_if::cfg_if;

/// Duplication dictionary size.
///
/// Every four bytes is assigned an entry. When this number is lower, fewer entries exists, and
/// thus collisions are more likely, hurting the compression ratio.
const DICTIONARY_SIZE: usize = 1 << HASHLOG;
const HASHLOG: usize = 12;

/// Once the sliding base of a `U32Table` passes this point, all entries are rebased to zero.
const REBASE_THRESHOLD: usize = 1 << 30;

/// The shortest duplicate the format can express.
pub const MINMATCH: usize = 4;
/// The final bytes of every block are always literals.
pub const LAST_LITERALS: usize = 5;
/// No match may start within this many bytes of the end of a block.
pub const MFLIMIT: usize = 12;
/// Offsets are stored in 16 bits.
pub const MAX_OFFSET: usize = u16::MAX as usize;


/// A table remembering where each hashed byte sequence was seen last.
pub trait EncoderTable: Clone + Default {
    /// The longest input whose positions the table can represent.
    fn payload_size_limit() -> usize;

    /// Record `offset` as the latest occurrence of the bytes at `input[offset..]`
    /// and return the previously recorded position for the same hash.
    ///
    /// `offset` must not exceed `payload_size_limit()`.
    fn replace(&mut self, input: &[u8], offset: usize) -> usize;

    /// Shift every recorded position down by `offset`, because that many bytes were
    /// dropped from the front of the input.
    fn offset(&mut self, offset: usize);
}

#[derive(Clone)]
pub struct U32Table {
    dict: [u32; DICTIONARY_SIZE],
    base: usize,
}
impl Default for U32Table {
    fn default() -> Self {
        U32Table { dict: [0; DICTIONARY_SIZE], base: 0 }
    }
}

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        // on 64 bit systems, we read 64 bits and hash 5 bytes instead of 4
        fn hash_for_u32(input: &[u8]) -> usize {
            // we end up only needing 5 bytes but the only case where this becomes
            // zero is at the very end, where we're not allowed to produce matches anyway
            let v = input.get(..8).map(NativeEndian::read_u64).unwrap_or(0);

            #[cfg(target_endian = "little")] fn checksum_u64(v: u64) -> u64 { (v << 24).wrapping_mul(889523592379) }
            #[cfg(target_endian = "big")] fn checksum_u64(v: u64) -> u64 { (v >> 24).wrapping_mul(11400714785074694791) }
            (checksum_u64(v) >> (64 - HASHLOG)) as usize
        }
    } else {
        fn hash_for_u32(input: &[u8]) -> usize {
            hash_for_u16(input) >> 1 // half as many slots as the u16 table
        }
    }
}

fn hash_for_u16(input: &[u8]) -> usize {
    let v = input.get(..4).map(NativeEndian::read_u32).unwrap_or(0);
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG - 1)) as usize // twice as many slots
}

impl EncoderTable for U32Table {
    fn payload_size_limit() -> usize { u32::MAX as usize - REBASE_THRESHOLD }

    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        debug_assert!(offset <= Self::payload_size_limit());
        let slot = &mut self.dict[hash_for_u32(&input[offset..])];
        let previous = mem::replace(slot, (offset + self.base) as u32);
        (previous as usize).saturating_sub(self.base)
    }

    fn offset(&mut self, offset: usize) {
        self.base += offset;
        if self.base > REBASE_THRESHOLD {
            let base = self.base as u32;
            for entry in self.dict.iter_mut() {
                *entry = entry.saturating_sub(base);
            }
            self.base = 0;
        }
    }
}

/// A denser table for inputs of at most 64 KiB.
#[derive(Clone)]
pub struct U16Table {
    dict: [u16; DICTIONARY_SIZE * 2], // u16 fits twice as many slots into the same amount of memory
}
impl Default for U16Table {
    fn default() -> Self {
        U16Table { dict: [0; DICTIONARY_SIZE * 2] }
    }
}
impl EncoderTable for U16Table {
    fn payload_size_limit() -> usize { u16::MAX as usize }

    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        debug_assert!(offset <= Self::payload_size_limit());
        mem::replace(&mut self.dict[hash_for_u16(&input[offset..])], offset as u16) as usize
    }

    fn offset(&mut self, offset: usize) {
        let shift = offset.min(u16::MAX as usize) as u16;
        for entry in self.dict.iter_mut() {
            *entry = entry.saturating_sub(shift);
        }
    }
}


/// A duplicate found in the input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Match {
    /// Where the duplicate starts in the input.
    pub start: usize,
    /// The total length, at least `MINMATCH`.
    pub len: usize,
    /// The number of bytes between the start of the duplicate and its source.
    pub offset: u16,
}

impl Match {
    /// The first input position after the duplicate.
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

pub(crate) fn count_matching_bytes(a: &[u8], b: &[u8]) -> usize {
    const REGSIZE: usize = mem::size_of::<usize>();
    fn read_usize(b: &[u8]) -> usize {
        let mut buf = [0u8; REGSIZE];
        buf.copy_from_slice(&b[..REGSIZE]);
        usize::from_le_bytes(buf)
    }

    let mut matching_bytes = 0;
    // compare a full register at a time
    for (a, b) in a.chunks_exact(REGSIZE).zip(b.chunks_exact(REGSIZE)) {
        let xor = read_usize(a) ^ read_usize(b);
        if xor != 0 {
            // from_le_bytes puts the first differing byte at the low end
            return matching_bytes + (xor.trailing_zeros() / 8) as usize;
        }
        matching_bytes += REGSIZE;
    }

    // up to REGSIZE - 1 bytes remain
    let trailing_matches = a.iter().zip(b).skip(matching_bytes).take_while(|&(a, b)| a == b).count();
    matching_bytes + trailing_matches
}

/// Look up the duplicate at `cursor`.
///
/// Records `cursor` in the table either way. Positions before `literal_start` are history:
/// the match may reference them but is never extended backwards across `literal_start`.
/// A block never opens with a match, so nothing is returned when `cursor == block_start`.
///
/// The caller must guarantee that at least `MFLIMIT` bytes follow `cursor`.
pub fn find_match<T: EncoderTable>(
    table: &mut T,
    input: &[u8],
    cursor: usize,
    literal_start: usize,
    block_start: usize,
) -> Option<Match> {
    let candidate = table.replace(input, cursor);
    if cursor == block_start {
        return None;
    }

    let offset = cursor.checked_sub(candidate).filter(|&o| o != 0 && o <= MAX_OFFSET)?;

    // the match must not run into the trailing literals
    let current_batch = &input[cursor..input.len() - LAST_LITERALS];
    let matching_bytes = count_matching_bytes(current_batch, &input[candidate..]);
    if matching_bytes < MINMATCH {
        // hash collision
        return None;
    }

    // extend backwards into the pending literals, the offset stays the same
    let max_backtrack = cursor - literal_start;
    let backtrack = input[..cursor].iter().rev()
        .zip(input[..candidate].iter().rev())
        .take(max_backtrack)
        .take_while(|&(a, b)| a == b)
        .count();

    Some(Match {
        start: cursor - backtrack,
        len: matching_bytes + backtrack,
        offset: offset as u16,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_bytes_counts_common_prefix() {
        assert_eq!(count_matching_bytes(b"abcdefghijk", b"abcdefghijk"), 11);
        assert_eq!(count_matching_bytes(b"abcdefghijk", b"abcdefghXjk"), 8);
        assert_eq!(count_matching_bytes(b"abcdefghijk", b"abcXefghijk"), 3);
        assert_eq!(count_matching_bytes(b"abc", b"abcdef"), 3);
        assert_eq!(count_matching_bytes(b"", b"abc"), 0);
    }

    #[test]
    fn table_returns_previous_position() {
        let input = b"abcdefghabcdefghabcdefgh";
        let mut table = U16Table::default();
        assert_eq!(table.replace(input, 0), 0);
        assert_eq!(table.replace(input, 8), 0);
        assert_eq!(table.replace(input, 16), 8);

        let mut table = U32Table::default();
        table.replace(input, 0);
        assert_eq!(table.replace(input, 8), 0);
        assert_eq!(table.replace(input, 16), 8);
    }

    #[test]
    fn u32_table_offset_shifts_positions() {
        let input = b"0123456789abcdef0123456789abcdef";
        let mut table = U32Table::default();
        table.replace(input, 16);
        table.offset(10);
        // position 16 is now position 6 of the shortened input
        assert_eq!(table.replace(&input[10..], 6), 6);
    }

    #[test]
    fn u32_table_survives_rebasing() {
        let input = b"0123456789abcdef0123456789abcdef";
        let mut table = U32Table::default();
        table.offset(REBASE_THRESHOLD);
        table.replace(input, 20);
        table.offset(4);
        assert_eq!(table.base, 0);
        assert_eq!(table.replace(&input[4..], 16), 16);
    }

    #[test]
    fn finds_repeated_sequence() {
        let input = b"Hello world, Hello world, and some trailing literals";
        let mut table = U16Table::default();
        let mut found = None;
        for cursor in 0..=13 {
            found = find_match(&mut table, input, cursor, 0, 0);
        }
        let found = found.expect("second 'Hello world' should match");
        assert_eq!(found.start, 13);
        assert_eq!(found.offset, 13);
        assert_eq!(found.len, 13);
        assert_eq!(&input[found.start..found.end()], &input[..found.len]);
    }

    #[test]
    fn extends_backwards_into_literals() {
        let input = b"xyzHELLOxyzHELLO and then some more bytes";
        let mut table = U16Table::default();
        for cursor in 0..3 {
            assert_eq!(find_match(&mut table, input, cursor, 0, 0), None);
        }
        // seed the table with the first "HELLO" only
        table.replace(input, 3);
        let found = find_match(&mut table, input, 11, 8, 0).unwrap();
        assert_eq!(found, Match { start: 8, len: 8, offset: 8 });
    }

    #[test]
    fn never_matches_at_block_start() {
        let input = b"abcdabcdabcdabcdabcdabcd";
        let mut table = U16Table::default();
        table.replace(input, 0);
        assert_eq!(find_match(&mut table, input, 4, 4, 4), None);
        assert!(find_match(&mut table, input, 8, 8, 4).is_some());
    }
}
