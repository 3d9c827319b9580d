#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_frame::framed::{frame_bound, compress_frame, CompressionSettings, LZ4FrameReader};
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    // the first byte picks the settings
    let (bits, data) = match data.split_first() {
        Some((&bits, rest)) => (bits, rest),
        None => return,
    };

    let mut settings = CompressionSettings::default();
    settings
        .content_checksum(bits & 1 != 0)
        .independent_blocks(bits & 2 != 0)
        .block_checksums(bits & 4 != 0)
        .content_size(bits & 8 != 0);

    let mut output = vec![0u8; frame_bound(data.len(), &settings)];
    let len = compress_frame(data, &mut output, &settings).expect("Could not compress input data");

    let mut lz4_reader = LZ4FrameReader::new(&output[..len])
        .expect("Could not create frame reader")
        .into_read();

    let mut roundtripped = Vec::new();
    lz4_reader.read_to_end(&mut roundtripped).expect("Could not read decompressed data");
    assert!(roundtripped.iter().eq(data));
});
