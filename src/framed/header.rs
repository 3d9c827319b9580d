#![allow(non_upper_case_globals)]

use byteorder::{LE, WriteBytesExt};
use std::hash::Hasher;
use std::io::{self, Write};
use twox_hash::XxHash32;
use thiserror::Error;
use fehler::{throw, throws};
use bitflags::bitflags;

use super::MAGIC;

bitflags! {
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

const VERSION: u8 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("block size code {0} is reserved")]
    UnimplementedBlocksize(u8),
    #[error("file version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits in flags set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in bd set")]
    ReservedBdBitsSet,
}

impl Flags {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != VERSION {
            throw!(ParseError::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    /// The FLG byte, version bits included.
    pub fn to_byte(self) -> u8 {
        VERSION << 6 | self.bits()
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }
}

/// The maximum amount of data in a single block.
///
/// Larger blocks compress slightly better, smaller blocks need less memory on both sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockSize {
    Max64KB = 4,
    Max256KB = 5,
    Max1MB = 6,
    Max4MB = 7,
}

impl BlockSize {
    pub fn bytes(self) -> usize {
        1 << (self as usize * 2 + 8)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        BlockSize::Max4MB
    }
}

/// The BD byte of the frame descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDescriptor(pub u8);
impl BlockDescriptor {
    pub fn new(block_size: BlockSize) -> Self {
        BlockDescriptor((block_size as u8) << 4)
    }

    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(ParseError)]
    pub fn block_size(&self) -> BlockSize {
        match (self.0 >> 4) & 0b111 {
            4 => BlockSize::Max64KB,
            5 => BlockSize::Max256KB,
            6 => BlockSize::Max1MB,
            7 => BlockSize::Max4MB,
            size => throw!(ParseError::UnimplementedBlocksize(size)),
        }
    }
}

/// The second byte of the XXH32 of the descriptor.
pub fn header_checksum(descriptor: &[u8]) -> u8 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(descriptor);
    (hasher.finish() >> 8) as u8
}

/// Everything that precedes the first block of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: Flags,
    pub block_size: BlockSize,
    pub content_size: Option<u64>,
    pub dictionary_id: Option<u32>,
}

impl FrameHeader {
    /// Build a header, deriving the presence flags from the optional fields.
    pub fn new(mut flags: Flags, block_size: BlockSize, content_size: Option<u64>, dictionary_id: Option<u32>) -> Self {
        flags.set(Flags::ContentSize, content_size.is_some());
        flags.set(Flags::DictionaryId, dictionary_id.is_some());
        FrameHeader { flags, block_size, content_size, dictionary_id }
    }

    /// Size in bytes including the magic number and the header checksum.
    pub fn encoded_len(&self) -> usize {
        let mut len = 4 + 2 + 1;
        if self.content_size.is_some() {
            len += 8;
        }
        if self.dictionary_id.is_some() {
            len += 4;
        }
        len
    }

    /// The bytes covered by the header checksum.
    pub fn descriptor(&self) -> Vec<u8> {
        let mut descriptor = vec![self.flags.to_byte(), BlockDescriptor::new(self.block_size).0];
        if let Some(size) = self.content_size {
            descriptor.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(id) = self.dictionary_id {
            descriptor.extend_from_slice(&id.to_le_bytes());
        }
        descriptor
    }

    #[throws(io::Error)]
    pub fn write<W: Write>(&self, mut writer: W) {
        let descriptor = self.descriptor();
        writer.write_u32::<LE>(MAGIC)?;
        writer.write_all(&descriptor)?;
        writer.write_u8(header_checksum(&descriptor))?;
    }
}
