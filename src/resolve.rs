//! Reference resolution against an in-memory bundle
//!
//! Scene formats point at sibling files by relative URI: glTF buffers and
//! images, OBJ material libraries and their textures. Decoders never touch
//! the filesystem or network; they ask a [`ReferenceResolver`] for bytes.

use crate::bundle::{AssetBundle, file_name, normalize_path, parent_dir};
use std::borrow::Cow;
use std::sync::Arc;

/// A reference that was found
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Bundle path that satisfied the reference
    pub path: String,
    /// Bytes of that entry
    pub bytes: Arc<[u8]>,
    /// Other entries that matched equally well, in bundle order
    pub alternatives: Vec<String>,
}

/// Capability to turn a reference path from a model file into bytes
///
/// Implementations must be deterministic for a given input so that repeated
/// decodes of one bundle produce the same scene.
pub trait ReferenceResolver {
    /// Look up a reference exactly as written in the model file
    fn resolve(&self, reference: &str) -> Option<Resolved>;
}

/// Resolver that never finds anything
///
/// Used for single-entry bundles, where there is nothing to resolve against.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn resolve(&self, _reference: &str) -> Option<Resolved> {
        None
    }
}

/// Resolver backed by the entries of an [`AssetBundle`]
///
/// Lookup order, stopping at the first step with any match:
///
/// 1. the reference joined onto the path prefix (`..` segments applied)
/// 2. the reference as a bundle key
/// 3. keys sharing a `/`-aligned suffix with the reference
/// 4. keys with the same file name, ignoring ASCII case
///
/// When a step matches several keys the first in bundle order is used and
/// the rest are reported as [`Resolved::alternatives`].
///
/// # Example
///
/// ```
/// use print_ingest::{AssetBundle, BundleResolver, ReferenceResolver};
///
/// let bundle = AssetBundle::from_entries([
///     ("upload/scene.gltf", b"{}".to_vec()),
///     ("upload/textures/wood%20grain.png", vec![1u8]),
///     ("upload/textures/wood grain.png", vec![2u8]),
/// ]);
/// let resolver = BundleResolver::new(&bundle, "upload/");
///
/// let found = resolver.resolve("textures/wood%20grain.png").unwrap();
/// assert_eq!(found.path, "upload/textures/wood grain.png");
/// ```
#[derive(Debug, Clone)]
pub struct BundleResolver<'a> {
    bundle: &'a AssetBundle,
    prefix: String,
}

impl<'a> BundleResolver<'a> {
    /// Resolver relative to a directory prefix such as `"models/"`
    pub fn new(bundle: &'a AssetBundle, prefix: &str) -> Self {
        let prefix = normalize_path(prefix);
        Self { bundle, prefix }
    }

    /// Resolver relative to the directory holding `primary`
    pub fn for_primary(bundle: &'a AssetBundle, primary: &str) -> Self {
        Self::new(bundle, parent_dir(primary))
    }

    fn lookup(&self, reference: &str) -> Vec<&'a str> {
        // 1. Relative to the prefix
        if let Some(joined) = join(&self.prefix, reference) {
            if self.bundle.contains(&joined) {
                return self.keys_where(|key| key == joined);
            }
        }

        let cleaned = strip_parent_segments(reference);
        if cleaned.is_empty() {
            return Vec::new();
        }

        // 2. Exact key
        if self.bundle.contains(&cleaned) {
            return self.keys_where(|key| key == cleaned);
        }

        // 3. Suffix on a segment boundary, in either direction
        let suffix = self.keys_where(|key| {
            ends_with_segment(key, &cleaned) || ends_with_segment(&cleaned, key)
        });
        if !suffix.is_empty() {
            return suffix;
        }

        // 4. Same file name
        let name = file_name(&cleaned);
        self.keys_where(|key| file_name(key).eq_ignore_ascii_case(name))
    }

    fn keys_where(&self, pred: impl Fn(&str) -> bool) -> Vec<&'a str> {
        self.bundle.paths().filter(|key| pred(key)).collect()
    }
}

impl ReferenceResolver for BundleResolver<'_> {
    fn resolve(&self, reference: &str) -> Option<Resolved> {
        if is_remote(reference) || reference.starts_with("data:") {
            return None;
        }
        let decoded = decode_uri(reference);
        let mut matches = self.lookup(&decoded).into_iter();
        let path = matches.next()?;
        let bytes = self.bundle.get(path)?.clone();
        Some(Resolved {
            path: path.to_string(),
            bytes,
            alternatives: matches.map(str::to_string).collect(),
        })
    }
}

/// Percent-decode a URI reference, keeping it as-is when it is not valid UTF-8
fn decode_uri(reference: &str) -> Cow<'_, str> {
    urlencoding::decode(reference).unwrap_or(Cow::Borrowed(reference))
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file:")
}

/// Join a reference onto a directory prefix, applying `..` segments
///
/// Returns `None` when `..` would climb above the bundle root.
fn join(prefix: &str, reference: &str) -> Option<String> {
    let mut segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    let normalized = normalize_path(reference);
    for segment in normalized.split('/') {
        match segment {
            "" => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Drop leading `..` segments from a normalized reference
fn strip_parent_segments(reference: &str) -> String {
    let normalized = normalize_path(reference);
    let mut rest = normalized.as_str();
    while let Some(stripped) = rest.strip_prefix("../") {
        rest = stripped;
    }
    if rest == ".." {
        rest = "";
    }
    rest.to_string()
}

fn ends_with_segment(haystack: &str, needle: &str) -> bool {
    haystack.len() > needle.len()
        && haystack.ends_with(needle)
        && haystack.as_bytes()[haystack.len() - needle.len() - 1] == b'/'
}
