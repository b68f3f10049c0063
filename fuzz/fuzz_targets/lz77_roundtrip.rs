#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let compressed = packr::lz77::compress(data);
    let restored = packr::lz77::decompress(&compressed, data.len() + 16).unwrap();
    assert_eq!(restored, data);
});
