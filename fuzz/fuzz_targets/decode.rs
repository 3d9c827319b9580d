#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_frame::framed::decompress_frame_into;
use lz4_frame::raw::decompress_block;

fuzz_target!(|data: &[u8]| {
    // we deliberately ignore errors here because random bytes from fuzzer
    // are not valid LZ4 data and so are expected to trigger non-fatal errors
    let mut output = vec![0u8; 1 << 16];
    let _ = decompress_frame_into(data, &mut output);
    let _ = decompress_block(data, &mut output, 1 << 16);
});
