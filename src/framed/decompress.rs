use byteorder::{LE, ReadBytesExt};
use std::hash::Hasher;
use std::io::{self, Read, BufRead, ErrorKind};
use std::cmp;
use std::convert::TryFrom;
use twox_hash::XxHash32;
use thiserror::Error;
use fehler::{throw, throws};
use tracing::{debug, warn};

use super::{MAGIC, INCOMPRESSIBLE};
use super::header::{self, Flags, BlockDescriptor, BlockSize};
use super::session::DecoderSession;
use crate::raw::{DecodeError, Malformation};


/// Errors when decompressing an LZ4 frame.
#[derive(Error, Debug)]
pub enum DecompressionError {
    #[error("error reading from the input you gave me")]
    InputError(#[from] io::Error),
    #[error("the raw LZ4 decompression failed (data corruption?)")]
    CodecError(#[from] DecodeError),
    #[error("invalid header")]
    HeaderParseError(#[from] header::ParseError),
    #[error("wrong magic number in file header: {0:08x}")]
    InvalidMagicNumber(u32),
    #[error("the header checksum was invalid")]
    HeaderChecksumMismatch,
    #[error("a block checksum was invalid")]
    BlockChecksumMismatch,
    #[error("the content checksum was invalid")]
    ContentChecksumMismatch,
    #[error("the header promised {expected} bytes of content, but the frame holds {actual}")]
    ContentSizeMismatch { expected: u64, actual: u64 },
    #[error("a block decompressed to more data than allowed")]
    BlockSizeOverflow,
    #[error("the frame was compressed with dictionary {0}, which was not supplied")]
    MissingDictionary(u32),
    #[error("output buffer holds {available} bytes but the frame needs {needed}")]
    InsufficientOutputSpace { needed: usize, available: usize },
    #[error("an earlier error left the frame in an unknown state")]
    FrameAborted,
}
type Error = DecompressionError; // do it this way for better docs

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(ErrorKind::Other, e)
    }
}

/// Wrapper around `LZ4FrameReader` that implements `Read` and `BufRead`.
pub struct LZ4FrameIoReader<R: Read> {
    frame_reader: LZ4FrameReader<R>,
    bytes_taken: usize,
    buffer: Vec<u8>,
}
impl<R: Read> Read for LZ4FrameIoReader<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mybuf = self.fill_buf()?;
        let bytes_to_take = cmp::min(mybuf.len(), buf.len());
        buf[..bytes_to_take].copy_from_slice(&mybuf[..bytes_to_take]);
        self.consume(bytes_to_take);
        bytes_to_take
    }
}
impl<R: Read> BufRead for LZ4FrameIoReader<R> {
    #[throws(io::Error)]
    fn fill_buf(&mut self) -> &[u8] {
        if self.bytes_taken == self.buffer.len() {
            self.buffer.clear();
            self.bytes_taken = 0;
            self.frame_reader.decode_block(&mut self.buffer)?;
        }
        &self.buffer[self.bytes_taken..]
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken += amt;
        assert!(self.bytes_taken <= self.buffer.len(), "You consumed more bytes than I even gave you!");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    ReadingBlocks,
    Done,
    Failed,
}

/// Read an LZ4-compressed frame.
///
/// This reader reads the blocks inside a frame one by one.
/// Once any error has been returned, the frame is abandoned and every later call fails.
pub struct LZ4FrameReader<R: Read> {
    reader: R,
    flags: Flags,
    block_size: BlockSize,
    read_buf: Vec<u8>,
    content_size: Option<u64>,
    dictionary_id: Option<u32>,
    dictionary_loaded: bool,
    content_hasher: Option<XxHash32>,
    session: DecoderSession,
    decoded: u64,
    state: State,
}

impl<R: Read> LZ4FrameReader<R> {
    /// Read and validate the frame header.
    #[throws]
    pub fn new(mut reader: R) -> Self {
        let magic = reader.read_u32::<LE>()?;
        if magic != MAGIC {
            throw!(Error::InvalidMagicNumber(magic));
        }

        let mut descriptor = vec![0u8; 2];
        reader.read_exact(&mut descriptor)?;
        // only the presence bits are needed before the checksum can be verified
        let presence = Flags::from_bits_truncate(descriptor[0]);

        let content_size = if presence.content_size() {
            let i = reader.read_u64::<LE>()?;
            descriptor.extend_from_slice(&i.to_le_bytes());
            Some(i)
        } else {
            None
        };

        let dictionary_id = if presence.dictionary_id() {
            let i = reader.read_u32::<LE>()?;
            descriptor.extend_from_slice(&i.to_le_bytes());
            Some(i)
        } else {
            None
        };

        let header_checksum_desired = reader.read_u8()?;
        if header_checksum_desired != header::header_checksum(&descriptor) {
            throw!(Error::HeaderChecksumMismatch);
        }

        let flags = Flags::parse(descriptor[0])?;
        let block_size = BlockDescriptor::parse(descriptor[1])?.block_size()?;
        debug!(flags = flags.bits(), block_size = block_size.bytes(), ?content_size, ?dictionary_id, "read frame header");

        let content_hasher = if flags.content_checksum() {
            Some(XxHash32::with_seed(0))
        } else {
            None
        };

        LZ4FrameReader {
            reader,
            flags,
            block_size,
            read_buf: Vec::new(),
            content_size,
            dictionary_id,
            dictionary_loaded: false,
            content_hasher,
            session: DecoderSession::new(flags.independent_blocks(), None),
            decoded: 0,
            state: State::ReadingBlocks,
        }
    }

    /// Supply the dictionary the frame was compressed with.
    ///
    /// Check `dictionary_id()` to find out which one that is. Must be called before the first block is read.
    pub fn with_dictionary(mut self, dictionary: &[u8]) -> Self {
        self.session = DecoderSession::new(self.flags.independent_blocks(), Some(dictionary));
        self.dictionary_loaded = true;
        self
    }

    pub fn block_size(&self) -> usize { self.block_size.bytes() }
    pub fn frame_size(&self) -> Option<u64> { self.content_size }
    pub fn dictionary_id(&self) -> Option<u32> { self.dictionary_id }
    pub fn flags(&self) -> Flags { self.flags }

    pub fn into_read(self) -> LZ4FrameIoReader<R> {
        LZ4FrameIoReader {
            buffer: Vec::with_capacity(self.block_size()),
            bytes_taken: 0,
            frame_reader: self,
        }
    }

    /// Decode the next non-empty block into `output`.
    ///
    /// Leaves `output` empty once the end of the frame has been reached and verified.
    #[throws]
    pub fn decode_block(&mut self, output: &mut Vec<u8>) {
        assert!(output.is_empty(), "You must pass an empty buffer to this interface.");

        match self.state {
            State::Done => return,
            State::Failed => throw!(Error::FrameAborted),
            State::ReadingBlocks => {}
        }

        if let Err(e) = self.next_block(output) {
            self.state = State::Failed;
            output.clear();
            throw!(e);
        }
    }

    #[throws]
    fn next_block(&mut self, output: &mut Vec<u8>) {
        if let (Some(id), false) = (self.dictionary_id, self.dictionary_loaded) {
            throw!(Error::MissingDictionary(id));
        }

        // blocks that decode to nothing must not be mistaken for the end of the frame
        while output.is_empty() {
            let block_length = self.reader.read_u32::<LE>()?;
            if block_length == 0 {
                self.finish_frame()?;
                return;
            }

            let is_compressed = block_length & INCOMPRESSIBLE == 0;
            let block_length = block_length & !INCOMPRESSIBLE;
            let block_size = self.block_size.bytes();

            if u64::from(block_length) > block_size as u64 {
                throw!(Error::BlockSizeOverflow);
            }

            let buf = &mut self.read_buf;
            buf.resize(block_length as usize, 0);
            self.reader.read_exact(buf.as_mut_slice())?;

            if self.flags.block_checksums() {
                let checksum = self.reader.read_u32::<LE>()?;
                let mut hasher = XxHash32::with_seed(0);
                hasher.write(buf);
                if hasher.finish() != u64::from(checksum) {
                    warn!(block = self.session.block_index(), "block checksum mismatch");
                    throw!(Error::BlockChecksumMismatch);
                }
            }

            self.session.decode_block(buf, is_compressed, output, block_size).map_err(|e| match e {
                DecodeError::MalformedSequence(Malformation::OutputOverrun { .. }) => Error::BlockSizeOverflow,
                e => Error::CodecError(e),
            })?;

            if let Some(hasher) = self.content_hasher.as_mut() {
                hasher.write(output);
            }
            self.decoded += output.len() as u64;
            if let Some(expected) = self.content_size {
                if self.decoded > expected {
                    throw!(Error::ContentSizeMismatch { expected, actual: self.decoded });
                }
            }
        }
    }

    #[throws]
    fn finish_frame(&mut self) {
        if let Some(hasher) = self.content_hasher.take() {
            let checksum = self.reader.read_u32::<LE>()?;
            if hasher.finish() != u64::from(checksum) {
                warn!(bytes = self.decoded, "content checksum mismatch");
                throw!(Error::ContentChecksumMismatch);
            }
        }
        if let Some(expected) = self.content_size {
            if self.decoded != expected {
                throw!(Error::ContentSizeMismatch { expected, actual: self.decoded });
            }
        }

        debug!(blocks = self.session.block_index(), bytes = self.decoded, "finished frame");
        self.state = State::Done;
    }
}

/// Convenience wrapper around `LZ4FrameReader` that reads everything into a vector and returns it.
#[throws]
pub fn decompress_frame<R: Read>(reader: R) -> Vec<u8> {
    let mut reader = LZ4FrameReader::new(reader)?;

    let mut plaintext = Vec::new();
    let mut buf = Vec::with_capacity(reader.block_size());
    loop {
        reader.decode_block(&mut buf)?;
        if buf.is_empty() { break; }
        plaintext.extend_from_slice(&buf);
        buf.clear();
    }

    plaintext
}

/// Decompress a complete frame from `input` into `output`, returning the content length.
#[throws]
pub fn decompress_frame_into(input: &[u8], output: &mut [u8]) -> usize {
    let mut reader = LZ4FrameReader::new(input)?;
    if let Some(size) = reader.frame_size() {
        if size > output.len() as u64 {
            let needed = usize::try_from(size).unwrap_or(usize::MAX);
            throw!(Error::InsufficientOutputSpace { needed, available: output.len() });
        }
    }

    let mut written = 0;
    let mut block = Vec::with_capacity(reader.block_size());
    loop {
        block.clear();
        reader.decode_block(&mut block)?;
        if block.is_empty() {
            break;
        }

        let available = output.len();
        let target = output[written..].get_mut(..block.len())
            .ok_or(Error::InsufficientOutputSpace { needed: written + block.len(), available })?;
        target.copy_from_slice(&block);
        written += block.len();
    }
    written
}
