//! The LZ4 frame format.
//!
//! A frame wraps a sequence of blocks with a small header describing how they were written
//! (block size, whether blocks may reference each other, which checksums are present) and
//! an end mark. This is what the `lz4` command line tool reads and writes.

mod header;
mod session;
mod compress;
mod decompress;
#[cfg(feature = "parallel")]
mod parallel;

/// The four magic bytes at the start of every LZ4 frame.
const MAGIC: u32 = 0x184D2204;
/// The frame format sets the high bit of every length field to indicate that the data was not compressed.
const INCOMPRESSIBLE: u32 = 1 << 31;
/// The LZ4 raw format maintains a lookback window of exactly 64KiB.
const WINDOW_SIZE: usize = 64 * 1024;


pub use header::{BlockSize, Flags, ParseError};
pub use session::{EncoderSession, DecoderSession, Window};
pub use compress::*;
pub use decompress::*;
#[cfg(feature = "parallel")]
pub use parallel::encode_blocks;
