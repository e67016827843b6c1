//! Primary model selection

use crate::bundle::AssetBundle;
use crate::format::RecognizedExtensions;

/// Select the entry that holds the bundle's 3D model
///
/// Every key is tested against the recognized extensions. The entry whose
/// extension ranks earliest in the list wins; ties go to the first entry in
/// bundle order. Returns `None` when nothing matches, which callers treat as
/// "nothing to render yet".
///
/// Only one model is ever surfaced per bundle.
///
/// # Example
///
/// ```
/// use print_ingest::{AssetBundle, RecognizedExtensions, select_primary};
///
/// let bundle = AssetBundle::from_entries([
///     ("part.stl", vec![0u8; 4]),
///     ("scene.gltf", b"{}".to_vec()),
///     ("readme.txt", b"hi".to_vec()),
/// ]);
///
/// let primary = select_primary(&bundle, &RecognizedExtensions::default());
/// assert_eq!(primary.as_deref(), Some("scene.gltf"));
/// ```
pub fn select_primary(bundle: &AssetBundle, extensions: &RecognizedExtensions) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;

    for path in bundle.paths() {
        let Some(rank) = extensions.rank(path) else {
            continue;
        };
        // Strictly-less keeps the first path in bundle order for equal ranks
        if best.is_none_or(|(best_rank, _)| rank < best_rank) {
            best = Some((rank, path));
        }
    }

    best.map(|(_, path)| path.to_string())
}
