//! Encoding independent blocks on the rayon thread pool.

use rayon::prelude::*;
use tracing::debug;

use super::session::EncoderSession;
use crate::raw::EncodedBlock;

/// Split `input` into blocks of `block_size` and encode them concurrently.
///
/// Returns every block's encoding together with the bytes to emit for it, in input order.
/// `session` must use independent blocks, and is advanced past all of them.
pub fn encode_blocks(input: &[u8], block_size: usize, session: &mut EncoderSession) -> Vec<(EncodedBlock, Vec<u8>)> {
    assert!(session.is_independent(), "linked blocks can only be encoded in sequence");

    let first = session.block_index();
    let template: &EncoderSession = session;
    let blocks: Vec<(EncodedBlock, Vec<u8>)> = input
        .par_chunks(block_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut fork = template.fork(first + i as u64);
            let mut out = vec![0u8; chunk.len()];
            match fork.encode_block(chunk, &mut out) {
                EncodedBlock::Compressed(len) => {
                    out.truncate(len);
                    (EncodedBlock::Compressed(len), out)
                }
                stored => (stored, chunk.to_vec()),
            }
        })
        .collect();

    debug!(blocks = blocks.len(), threads = rayon::current_num_threads(), "encoded blocks in parallel");
    session.advance(blocks.len() as u64);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_blocks_as_sequential_encoding() {
        let mut input = Vec::new();
        for i in 0..40_000u32 {
            input.extend_from_slice(&(i / 3).to_le_bytes());
        }
        let block_size = 16 * 1024;

        let mut parallel_session = EncoderSession::new(true, None, block_size);
        let parallel = encode_blocks(&input, block_size, &mut parallel_session);
        assert_eq!(parallel.len(), (input.len() + block_size - 1) / block_size);
        assert_eq!(parallel_session.block_index(), parallel.len() as u64);

        let mut sequential = EncoderSession::new(true, None, block_size);
        for ((encoded, payload), chunk) in parallel.iter().zip(input.chunks(block_size)) {
            let mut out = vec![0u8; chunk.len()];
            let expected = sequential.encode_block(chunk, &mut out);
            assert_eq!(*encoded, expected);
            match expected {
                EncodedBlock::Compressed(len) => assert_eq!(payload, &out[..len]),
                EncodedBlock::Stored(_) => assert_eq!(payload, chunk),
            }
        }
    }
}
