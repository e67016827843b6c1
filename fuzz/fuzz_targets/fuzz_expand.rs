#![no_main]

use libfuzzer_sys::fuzz_target;
use print_ingest::{AssetBundle, expand};

fuzz_target!(|data: &[u8]| {
    // Expansion reports bad archives as warnings and never fails
    let bundle = AssetBundle::single("upload.zip", data.to_vec());
    let expanded = expand(&bundle);
    for path in expanded.bundle.paths() {
        assert!(!path.starts_with('/'));
        assert!(path.split('/').all(|segment| segment != ".."));
    }
});
