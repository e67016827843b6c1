#![no_main]

use libfuzzer_sys::fuzz_target;
use print_ingest::{AssetBundle, Pipeline};

// Every decoder sees the same bytes; none of them may panic
const NAMES: [&str; 6] = [
    "model.stl",
    "model.ply",
    "model.3mf",
    "model.obj",
    "model.gltf",
    "model.glb",
];

fuzz_target!(|data: &[u8]| {
    let pipeline = Pipeline::new();
    for name in NAMES {
        let bundle = AssetBundle::single(name, data.to_vec());
        let _ = pipeline.ingest(&bundle);
    }
});
