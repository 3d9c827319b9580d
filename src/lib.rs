//! LZ4 compression in pure Rust.
//!
//! The [`raw`] module implements the block format: a single buffer of tokens without any
//! framing, checksums or length information. Most users want the [`framed`] module instead,
//! which implements the frame format understood by the `lz4` command line tool.
//!
//! ```
//! use lz4_frame::{CompressionSettings, decompress_frame};
//!
//! let data = b"a frame holds one or more blocks, and blocks hold tokens".repeat(4);
//! let mut compressed = Vec::new();
//! CompressionSettings::default().compress(&data[..], &mut compressed).unwrap();
//! assert_eq!(decompress_frame(&compressed[..]).unwrap(), data);
//! ```

#![forbid(unsafe_code)]

pub mod raw;
pub mod framed;

pub use raw::{compress_bound, compress_block, decompress_block, EncodedBlock};
pub use framed::{
    compress_frame, decompress_frame, decompress_frame_into, frame_bound,
    BlockSize, CompressionSettings, LZ4FrameReader, LZ4FrameWriter,
};
