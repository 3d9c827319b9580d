//! The raw LZ4 block format.
//!
//! Using this directly saves you the overhead of framing (~11 bytes) but you lose several features,
//! most notably the integrity checks and self-describing sizes: the decoder has to be told how
//! large the decompressed block is. The break-even point where framing is always smaller is
//! around 2.5KB for totally incompressible data, because the frame format can store a block
//! uncompressed while the raw format can only express it as one long literal run.

pub mod matcher;
mod compress;
mod decompress;

pub use compress::*;
pub use decompress::*;
