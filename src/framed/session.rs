//! State carried from one block of a frame to the next.
//!
//! With linked blocks, every block may reference the trailing 64 KiB of data that came before it,
//! so both sides keep that much history around. With independent blocks, every block starts
//! from the same state: empty, or the dictionary if there is one.

use tracing::trace;

use super::WINDOW_SIZE;
use crate::raw::{compress_into, decompress_raw, DecodeError, EncodedBlock, NoPartialWrites};
use crate::raw::matcher::{EncoderTable, U32Table};

/// The most recent bytes available to back-references.
///
/// Backed by an arena of twice the window size, so sliding only has to move memory
/// once every 64 KiB of input rather than on every block.
#[derive(Clone, Debug, Default)]
pub struct Window {
    buf: Vec<u8>,
}

impl Window {
    /// A window containing the trailing bytes of `initial`.
    pub fn new(initial: &[u8]) -> Self {
        let mut window = Window { buf: Vec::with_capacity(2 * WINDOW_SIZE) };
        window.extend(initial);
        window
    }

    pub fn extend(&mut self, data: &[u8]) {
        if data.len() >= WINDOW_SIZE {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - WINDOW_SIZE..]);
            return;
        }

        if self.buf.len() + data.len() > 2 * WINDOW_SIZE {
            // keep just enough so that the window is full after appending
            let keep = WINDOW_SIZE - data.len();
            let forget = self.buf.len() - keep;
            self.buf.drain(..forget);
        }
        self.buf.extend_from_slice(data);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.buf.len().saturating_sub(WINDOW_SIZE)..]
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Block encoder with the history needed for linked blocks and dictionaries.
#[derive(Clone)]
pub struct EncoderSession<'a> {
    independent: bool,
    /// What each block starts with in independent mode, and what the first block starts with otherwise.
    initializer: &'a [u8],
    template_table: U32Table,
    table: U32Table,
    /// History followed by the block currently being encoded.
    in_buffer: Vec<u8>,
    block_index: u64,
}

impl<'a> EncoderSession<'a> {
    pub fn new(independent: bool, dictionary: Option<&'a [u8]>, block_size: usize) -> Self {
        let dict = dictionary.unwrap_or(&[]);
        // nothing beyond the window can ever be referenced
        let initializer = &dict[dict.len().saturating_sub(WINDOW_SIZE)..];

        let mut template_table = U32Table::default();
        for offset in (0..initializer.len().saturating_sub(std::mem::size_of::<usize>())).step_by(3) {
            template_table.replace(initializer, offset);
        }

        let mut in_buffer = Vec::with_capacity(WINDOW_SIZE + block_size);
        in_buffer.extend_from_slice(initializer);

        EncoderSession {
            independent,
            initializer,
            table: template_table.clone(),
            template_table,
            in_buffer,
            block_index: 0,
        }
    }

    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    pub fn is_independent(&self) -> bool {
        self.independent
    }

    /// A copy of this session that numbers its blocks starting at `block_index`.
    ///
    /// Only meaningful with independent blocks, where every block starts from the same state.
    #[cfg(feature = "parallel")]
    pub(crate) fn fork(&self, block_index: u64) -> Self {
        EncoderSession { block_index, ..self.clone() }
    }

    #[cfg(feature = "parallel")]
    pub(crate) fn advance(&mut self, blocks: u64) {
        self.block_index += blocks;
    }

    /// Encode the next block of the frame into `output`.
    ///
    /// Encoded sequences are capped at one byte less than the block, if they don't fit
    /// `EncodedBlock::Stored` is returned and the caller is expected to emit `block` verbatim.
    /// In that case the contents of `output` are unspecified.
    pub fn encode_block(&mut self, block: &[u8], output: &mut [u8]) -> EncodedBlock {
        let window_offset = self.in_buffer.len();
        self.in_buffer.extend_from_slice(block);

        let limit = block.len().saturating_sub(1).min(output.len());
        let mut sink = NoPartialWrites(&mut output[..limit]);
        let encoded = match compress_into(&self.in_buffer, window_offset, &mut self.table, &mut sink) {
            Ok(()) => EncodedBlock::Compressed(limit - sink.remaining()),
            // incompressible
            Err(_) => EncodedBlock::Stored(block.len()),
        };

        trace!(block = self.block_index, raw = block.len(), encoded = encoded.len(), stored = encoded.is_stored(), "encoded block");
        self.block_index += 1;

        if self.independent {
            self.in_buffer.clear();
            self.in_buffer.extend_from_slice(self.initializer);
            self.table = self.template_table.clone();
        } else if self.in_buffer.len() > WINDOW_SIZE {
            let how_much_to_forget = self.in_buffer.len() - WINDOW_SIZE;
            self.table.offset(how_much_to_forget);
            self.in_buffer.drain(..how_much_to_forget);
        }

        encoded
    }
}

/// Block decoder with the history needed for linked blocks and dictionaries.
#[derive(Clone, Debug)]
pub struct DecoderSession {
    independent: bool,
    window: Window,
    block_index: u64,
}

impl DecoderSession {
    pub fn new(independent: bool, dictionary: Option<&[u8]>) -> Self {
        DecoderSession {
            independent,
            window: Window::new(dictionary.unwrap_or(&[])),
            block_index: 0,
        }
    }

    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    /// Decode the next block of the frame, appending at most `max_output` bytes to `output`.
    ///
    /// `output` must be empty so that the window can be fed from it.
    pub fn decode_block(&mut self, data: &[u8], compressed: bool, output: &mut Vec<u8>, max_output: usize) -> Result<(), DecodeError> {
        debug_assert!(output.is_empty());

        if compressed {
            decompress_raw(data, self.window.as_slice(), output, max_output)?;
        } else {
            output.extend_from_slice(data);
        }

        trace!(block = self.block_index, encoded = data.len(), raw = output.len(), stored = !compressed, "decoded block");
        self.block_index += 1;

        // in independent mode the window only ever holds the dictionary
        if !self.independent {
            self.window.extend(output);
        }
        Ok(())
    }
}
