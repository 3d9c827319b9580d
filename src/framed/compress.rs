use byteorder::{LE, WriteBytesExt};
use std::cmp;
use std::hash::Hasher;
use std::io::{self, Cursor, Read, Write, Seek, SeekFrom, ErrorKind};
use std::mem;
use twox_hash::XxHash32;
use thiserror::Error;
use fehler::throws;
use tracing::debug;

use super::INCOMPRESSIBLE;
use super::header::{Flags, BlockSize, FrameHeader};
use super::session::EncoderSession;
use crate::raw::{compress_bound, EncodedBlock};


/// Errors when compressing an LZ4 frame.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("error reading from the input you gave me")]
    ReadError(io::Error),
    #[error("error writing to the output you gave me")]
    WriteError(#[from] io::Error),
    #[error("output buffer holds {available} bytes but the frame may need up to {needed}")]
    InsufficientOutputSpace { needed: usize, available: usize },
}
type Error = CompressionError; // do it this way for better docs
impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(ErrorKind::Other, e)
    }
}

/// A builder-style struct that configures compression settings.
/// This is how you compress LZ4 frames.
/// (An LZ4 file usually consists of a single frame.)
///
/// Create it using `Default::default()`.
#[derive(Clone, Debug)]
pub struct CompressionSettings<'a> {
    independent_blocks: bool,
    block_checksums: bool,
    content_checksum: bool,
    content_size: bool,
    block_size: BlockSize,
    dictionary: Option<&'a [u8]>,
    dictionary_id: Option<u32>,
}
impl<'a> Default for CompressionSettings<'a> {
    fn default() -> Self {
        Self {
            independent_blocks: true,
            block_checksums: false,
            content_checksum: true,
            content_size: false,
            block_size: BlockSize::Max4MB,
            dictionary: None,
            dictionary_id: None,
        }
    }
}
impl<'a> CompressionSettings<'a> {
    /// In independent mode, blocks are not allowed to reference data from previous blocks.
    /// Hence, using dependent blocks yields slightly better compression.
    /// The downside of dependent blocks is that seeking becomes impossible - the entire frame always has
    /// to be decompressed from the beginning.
    ///
    /// Blocks are independent by default.
    pub fn independent_blocks(&mut self, v: bool) -> &mut Self {
        self.independent_blocks = v;
        self
    }

    /// Block checksums can help detect data corruption in storage and transit.
    /// They do not offer error correction though.
    ///
    /// In most cases, block checksums are not very helpful because you generally want a lower
    /// layer to deal with data corruption more comprehensively.
    ///
    /// Block checksums are disabled by default.
    pub fn block_checksums(&mut self, v: bool) -> &mut Self {
        self.block_checksums = v;
        self
    }

    /// The content checksum (also called frame checksum) is calculated over the contents of the entire frame.
    /// This makes them cheaper than block checksums as their size overhead is constant
    /// as well as marginally more useful, because they can help protect against incorrect decompression.
    ///
    /// Note that the content checksum can only be verified *after* the entire frame has been read
    /// (and returned!), which is the downside of content checksums.
    ///
    /// Frame checksums are enabled by default.
    pub fn content_checksum(&mut self, v: bool) -> &mut Self {
        self.content_checksum = v;
        self
    }

    /// Record the size of the uncompressed content in the frame header.
    ///
    /// Only `compress_frame` honors this, because it is the only interface that knows the size
    /// up front. For streams, use `compress_with_size` instead.
    ///
    /// Disabled by default.
    pub fn content_size(&mut self, v: bool) -> &mut Self {
        self.content_size = v;
        self
    }

    /// The default block size is 4 MiB.
    pub fn block_size(&mut self, v: BlockSize) -> &mut Self {
        self.block_size = v;
        self
    }

    /// A dictionary is essentially a constant slice of bytes shared by the compressing and decompressing party.
    /// Using a dictionary can improve compression ratios, because the compressor can reference data from the dictionary.
    ///
    /// The dictionary id is an application-specific identifier which can be used during decompression to determine
    /// which dictionary to use.
    ///
    /// Note that while the size of a dictionary can be arbitrary, dictionaries larger than 64 KiB are not useful as
    /// the LZ4 algorithm does not support backreferences by more than 64 KiB, i.e. any dictionary content before
    /// the trailing 64 KiB is silently ignored.
    ///
    /// By default, no dictionary is used and no id is specified.
    pub fn dictionary(&mut self, id: u32, dict: &'a [u8]) -> &mut Self {
        self.dictionary_id = Some(id);
        self.dictionary = Some(dict);
        self
    }

    /// The dictionary id header field is intended to tell anyone trying to decompress your frame which dictionary to use.
    /// So it is only natural to assume that the *absence* of a dictionary id indicates that no dictionary was used.
    ///
    /// Unfortunately this assumption turns out to be incorrect. The LZ4 CLI simply never writes a dictionary id.
    /// The major downside is that you can no longer distinguish corrupted data from a missing dictionary
    /// (unless you write block checksums, which the LZ4 CLI also never does).
    ///
    /// Hence, this library is opinionated in the sense that we always want you to specify either neither or both of these things.
    ///
    /// If you think you know better (you probably don't) you may use this method to break this rule.
    pub fn dictionary_id_nonsense_override(&mut self, id: Option<u32>) -> &mut Self {
        self.dictionary_id = id;
        self
    }

    #[throws]
    pub fn compress<R: Read, W: Write>(&self, reader: R, writer: W) {
        self.compress_internal(reader, writer, None)?;
    }

    #[throws]
    pub fn compress_with_size_unchecked<R: Read, W: Write>(&self, reader: R, writer: W, content_size: u64) {
        self.compress_internal(reader, writer, Some(content_size))?;
    }

    #[throws]
    pub fn compress_with_size<R: Read + Seek, W: Write>(&self, mut reader: R, writer: W) {
        // we ignore all bytes before the cursor, which stream_len() would not
        let start = reader.seek(SeekFrom::Current(0)).map_err(Error::ReadError)?;
        let end = reader.seek(SeekFrom::End(0)).map_err(Error::ReadError)?;
        reader.seek(SeekFrom::Start(start)).map_err(Error::ReadError)?;

        self.compress_internal(reader, writer, Some(end - start))?;
    }

    #[throws]
    fn compress_internal<R: Read, W: Write>(&self, mut reader: R, writer: W, content_size: Option<u64>) {
        let mut frame = LZ4FrameWriter::with_content_size(writer, self, content_size)?;
        let block_size = self.block_size.bytes();

        let mut in_buffer = Vec::with_capacity(block_size);
        loop {
            in_buffer.clear();
            // We basically want read_exact semantics, except at the end.
            // Sadly read_exact specifies the buffer contents to be undefined
            // on error, so we have to use this construction instead.
            reader.by_ref().take(block_size as u64).read_to_end(&mut in_buffer).map_err(Error::ReadError)?;
            if in_buffer.is_empty() {
                break;
            }
            frame.write_block(&in_buffer)?;
        }

        frame.finish()?;
    }

    fn header(&self, content_size: Option<u64>) -> FrameHeader {
        let mut flags = Flags::empty();
        flags.set(Flags::IndependentBlocks, self.independent_blocks);
        flags.set(Flags::BlockChecksums, self.block_checksums);
        flags.set(Flags::ContentChecksum, self.content_checksum);
        FrameHeader::new(flags, self.block_size, content_size, self.dictionary_id)
    }
}

/// The largest frame that compressing `input_len` bytes with these settings can produce.
///
/// Stored blocks are the worst case for the frame layout, so this is at least
/// `header + input_len + blocks * (4 [+4]) + 4 [+4]`. It is never below
/// [`compress_bound`], which stays the floor for any output buffer.
pub fn frame_bound(input_len: usize, settings: &CompressionSettings) -> usize {
    let content_size = if settings.content_size { Some(input_len as u64) } else { None };
    let header = settings.header(content_size);

    let block_size = settings.block_size.bytes();
    let blocks = (input_len + block_size - 1) / block_size;
    let per_block = if settings.block_checksums { 8 } else { 4 };
    let trailer = if settings.content_checksum { 8 } else { 4 };

    let stored = header.encoded_len() + input_len + blocks * per_block + trailer;
    cmp::max(compress_bound(input_len), stored)
}

/// Write an LZ4 frame one block at a time.
///
/// The header is written on construction. Blocks are written with `write_block`, or through
/// the `Write` impl which buffers data until a full block is available. Nothing is complete
/// until `finish` writes the end mark and the content checksum.
pub struct LZ4FrameWriter<'a, W: Write> {
    writer: W,
    flags: Flags,
    block_size: usize,
    session: EncoderSession<'a>,
    content_hasher: Option<XxHash32>,
    pending: Vec<u8>,
    out_buffer: Vec<u8>,
    written: u64,
}

impl<'a, W: Write> LZ4FrameWriter<'a, W> {
    #[throws]
    pub fn new(writer: W, settings: &CompressionSettings<'a>) -> Self {
        Self::with_content_size(writer, settings, None)?
    }

    /// The caller promises to write exactly `content_size` bytes, which is recorded in the header.
    #[throws]
    pub fn with_content_size(mut writer: W, settings: &CompressionSettings<'a>, content_size: Option<u64>) -> Self {
        let header = settings.header(content_size);
        header.write(&mut writer)?;
        debug!(flags = header.flags.bits(), block_size = settings.block_size.bytes(), ?content_size, "wrote frame header");

        let block_size = settings.block_size.bytes();
        LZ4FrameWriter {
            writer,
            flags: header.flags,
            block_size,
            session: EncoderSession::new(settings.independent_blocks, settings.dictionary, block_size),
            content_hasher: if settings.content_checksum { Some(XxHash32::with_seed(0)) } else { None },
            pending: Vec::new(),
            out_buffer: vec![0u8; block_size],
            written: 0,
        }
    }

    pub fn block_size(&self) -> usize { self.block_size }

    /// Compress `data` as one or more blocks.
    ///
    /// Data buffered by the `Write` impl is emitted first, as a (possibly short) block of its own.
    #[throws]
    pub fn write_block(&mut self, data: &[u8]) {
        self.flush_pending()?;
        for block in data.chunks(self.block_size) {
            self.emit_block(block)?;
        }
    }

    /// Write the end mark and the content checksum, returning the inner writer.
    #[throws]
    pub fn finish(mut self) -> W {
        self.flush_pending()?;

        self.writer.write_u32::<LE>(0)?;
        if let Some(hasher) = self.content_hasher.take() {
            self.writer.write_u32::<LE>(hasher.finish() as u32)?;
        }
        debug!(blocks = self.session.block_index(), bytes = self.written, "finished frame");

        self.writer
    }

    #[throws]
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = mem::take(&mut self.pending);
        let result = self.emit_block(&pending);
        self.pending = pending;
        self.pending.clear();
        result?;
    }

    #[throws]
    fn emit_block(&mut self, block: &[u8]) {
        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(block);
        }
        self.written += block.len() as u64;

        let encoded = self.session.encode_block(block, &mut self.out_buffer);
        let payload = match encoded {
            EncodedBlock::Compressed(len) => &self.out_buffer[..len],
            EncodedBlock::Stored(_) => block,
        };
        write_block_payload(&mut self.writer, self.flags, encoded, payload)?;
    }

    /// Encode the blocks of `input` on the rayon thread pool.
    ///
    /// Only possible with independent blocks, because linked blocks depend on their predecessor.
    #[cfg(feature = "parallel")]
    #[throws]
    pub(crate) fn write_blocks_parallel(&mut self, input: &[u8]) {
        debug_assert!(self.flags.independent_blocks());
        self.flush_pending()?;

        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(input);
        }
        self.written += input.len() as u64;

        for (encoded, payload) in super::parallel::encode_blocks(input, self.block_size, &mut self.session) {
            write_block_payload(&mut self.writer, self.flags, encoded, &payload)?;
        }
    }
}

#[throws(io::Error)]
fn write_block_payload<W: Write>(writer: &mut W, flags: Flags, encoded: EncodedBlock, payload: &[u8]) {
    let length_field = match encoded {
        EncodedBlock::Compressed(len) => len as u32,
        EncodedBlock::Stored(len) => len as u32 | INCOMPRESSIBLE,
    };
    writer.write_u32::<LE>(length_field)?;
    writer.write_all(payload)?;

    if flags.block_checksums() {
        let mut block_hasher = XxHash32::with_seed(0);
        block_hasher.write(payload);
        writer.write_u32::<LE>(block_hasher.finish() as u32)?;
    }
}

impl<'a, W: Write> Write for LZ4FrameWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pending.capacity() == 0 {
            self.pending.reserve_exact(self.block_size);
        }
        let take = cmp::min(self.block_size - self.pending.len(), buf.len());
        self.pending.extend_from_slice(&buf[..take]);
        if self.pending.len() == self.block_size {
            self.flush_pending()?;
        }
        Ok(take)
    }

    /// Emits buffered data as a short block, so avoid calling this more often than needed.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.writer.flush()
    }
}

/// Compress `input` into a complete frame in `output`, returning the frame's length.
///
/// `output` must hold at least `frame_bound(input.len(), settings)` bytes. This is checked
/// before anything is written.
pub fn compress_frame(input: &[u8], output: &mut [u8], settings: &CompressionSettings) -> Result<usize, Error> {
    let needed = frame_bound(input.len(), settings);
    if output.len() < needed {
        return Err(Error::InsufficientOutputSpace { needed, available: output.len() });
    }

    let content_size = if settings.content_size { Some(input.len() as u64) } else { None };
    let mut cursor = Cursor::new(output);
    let mut frame = LZ4FrameWriter::with_content_size(&mut cursor, settings, content_size)?;

    #[cfg(feature = "parallel")]
    {
        if settings.independent_blocks {
            frame.write_blocks_parallel(input)?;
        } else {
            frame.write_block(input)?;
        }
    }
    #[cfg(not(feature = "parallel"))]
    frame.write_block(input)?;

    frame.finish()?;
    Ok(cursor.position() as usize)
}
