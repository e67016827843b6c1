//! The asset bundle: an immutable set of named byte buffers
//!
//! A bundle is the only input to the pipeline. Keys are relative paths,
//! normalized on insertion so that `"./a\\b.png"` and `"a/b.png"` name the
//! same entry. Iteration is in lexicographic key order, which makes every
//! "first match" rule in the pipeline deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable mapping of relative path to file bytes
///
/// Buffers are reference counted, so cloning a bundle or deriving a new one
/// from it (as the archive expander does) never copies file contents.
///
/// # Example
///
/// ```
/// use print_ingest::AssetBundle;
///
/// let bundle = AssetBundle::from_entries([
///     ("scene.gltf", b"{}".to_vec()),
///     ("./textures\\wood.png", vec![0x89, b'P', b'N', b'G']),
/// ]);
///
/// assert_eq!(bundle.len(), 2);
/// assert!(bundle.contains("textures/wood.png"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetBundle {
    entries: BTreeMap<String, Arc<[u8]>>,
}

impl AssetBundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bundle from `(path, bytes)` pairs
    ///
    /// Later pairs replace earlier ones with the same normalized path.
    /// Pairs whose path normalizes to an empty string are dropped.
    pub fn from_entries<P, B, I>(entries: I) -> Self
    where
        P: AsRef<str>,
        B: Into<Arc<[u8]>>,
        I: IntoIterator<Item = (P, B)>,
    {
        let mut map = BTreeMap::new();
        for (path, bytes) in entries {
            let key = normalize_path(path.as_ref());
            if !key.is_empty() {
                map.insert(key, bytes.into());
            }
        }
        Self { entries: map }
    }

    /// A bundle holding a single buffer
    pub fn single(path: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::from_entries([(path, bytes)])
    }

    pub(crate) fn from_map(entries: BTreeMap<String, Arc<[u8]>>) -> Self {
        Self { entries }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes stored under `path` (the path is normalized first)
    pub fn get(&self, path: &str) -> Option<&Arc<[u8]>> {
        self.entries.get(normalize_path(path).as_str())
    }

    /// Whether an entry exists under `path`
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Entry paths in bundle order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in bundle order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<[u8]>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total size of all buffers in bytes
    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(|b| b.len()).sum()
    }
}

impl<P: AsRef<str>> FromIterator<(P, Vec<u8>)> for AssetBundle {
    fn from_iter<I: IntoIterator<Item = (P, Vec<u8>)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

/// Normalize a relative path the way bundle keys are stored
///
/// Backslashes become `/`, empty and `.` segments are dropped, and leading
/// `/` is removed. `..` segments are kept; callers that care about
/// escaping the root check for them explicitly.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercase extension of a path, without the dot
pub(crate) fn extension_of(path: &str) -> Option<String> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Final segment of a path
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Directory part of a path including the trailing `/`, or `""`
pub(crate) fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..=pos],
        None => "",
    }
}
