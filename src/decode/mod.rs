//! Format-specific decoding
//!
//! Dispatch is a table from file extension to [`ModelFormat`] and decode
//! function. Self-contained formats parse their one buffer; scene formats
//! additionally pull sibling files through a [`ReferenceResolver`].

mod gltf;
mod obj;
mod ply;
mod stl;
mod threemf;

use crate::bundle::{AssetBundle, extension_of, parent_dir};
use crate::error::{Error, Result, Warning, report};
use crate::format::{FormatFamily, ModelFormat};
use crate::resolve::{BundleResolver, NoReferences, ReferenceResolver, Resolved};
use crate::scene::SceneGraph;
use tracing::{debug, info};

/// Options for one decode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Directory that relative references are resolved against
    ///
    /// Defaults to the directory of the primary entry.
    pub path_prefix: Option<String>,
}

impl DecodeOptions {
    /// Options with an explicit path prefix
    pub fn with_path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
        }
    }
}

/// A freshly decoded, not yet normalized scene
#[derive(Debug, Clone)]
pub struct DecodedScene {
    /// The scene graph
    pub scene: SceneGraph,
    /// Format of the primary entry
    pub format: ModelFormat,
    /// Missing or ambiguous references and skipped primitives
    pub warnings: Vec<Warning>,
}

type DecodeFn = fn(&mut DecodeContext<'_>) -> Result<SceneGraph>;

struct DecoderEntry {
    extension: &'static str,
    format: ModelFormat,
    decode: DecodeFn,
}

/// Extension → format → decoder. Adding a format is a new row here.
const DECODERS: &[DecoderEntry] = &[
    DecoderEntry {
        extension: "stl",
        format: ModelFormat::Stl,
        decode: stl::decode,
    },
    DecoderEntry {
        extension: "ply",
        format: ModelFormat::Ply,
        decode: ply::decode,
    },
    DecoderEntry {
        extension: "3mf",
        format: ModelFormat::ThreeMf,
        decode: threemf::decode,
    },
    DecoderEntry {
        extension: "obj",
        format: ModelFormat::Obj,
        decode: obj::decode,
    },
    DecoderEntry {
        extension: "gltf",
        format: ModelFormat::Gltf,
        decode: gltf::decode,
    },
    DecoderEntry {
        extension: "glb",
        format: ModelFormat::Glb,
        decode: gltf::decode,
    },
];

/// Format decoded for a file extension (lowercase, no dot)
pub fn format_for_extension(extension: &str) -> Option<ModelFormat> {
    DECODERS
        .iter()
        .find(|entry| entry.extension == extension)
        .map(|entry| entry.format)
}

/// Extensions that have a decoder
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    DECODERS.iter().map(|entry| entry.extension)
}

/// Per-decode state handed to format decoders
pub(crate) struct DecodeContext<'a> {
    /// Bundle path of the primary entry
    pub path: &'a str,
    /// Bytes of the primary entry
    pub bytes: &'a [u8],
    resolver: &'a dyn ReferenceResolver,
    warnings: Vec<Warning>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(path: &'a str, bytes: &'a [u8], resolver: &'a dyn ReferenceResolver) -> Self {
        Self {
            path,
            bytes,
            resolver,
            warnings: Vec::new(),
        }
    }

    pub fn resolver(&self) -> &'a dyn ReferenceResolver {
        self.resolver
    }

    /// Resolve a reference, reporting missing and ambiguous matches
    pub fn resolve(&mut self, reference: &str, referenced_by: &str) -> Option<Resolved> {
        resolve_reference(self.resolver, reference, referenced_by, &mut self.warnings)
    }

    pub fn warn(&mut self, warning: Warning) {
        report(&mut self.warnings, warning);
    }

    pub fn extend_warnings(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        self.warnings.extend(warnings);
    }

    pub fn decode_failure(&self, reason: impl std::fmt::Display) -> Error {
        Error::decode_failure(self.path, reason)
    }
}

/// Resolve through `resolver`, pushing W2001/W2002 warnings as needed
pub(crate) fn resolve_reference(
    resolver: &dyn ReferenceResolver,
    reference: &str,
    referenced_by: &str,
    warnings: &mut Vec<Warning>,
) -> Option<Resolved> {
    match resolver.resolve(reference) {
        Some(resolved) => {
            if !resolved.alternatives.is_empty() {
                let mut candidates = vec![resolved.path.clone()];
                candidates.extend(resolved.alternatives.iter().cloned());
                report(
                    warnings,
                    Warning::AmbiguousReference {
                        reference: reference.to_string(),
                        chosen: resolved.path.clone(),
                        candidates,
                    },
                );
            }
            debug!(reference, resolved = resolved.path.as_str(), "Resolved reference");
            Some(resolved)
        }
        None => {
            report(
                warnings,
                Warning::MissingReference {
                    reference: reference.to_string(),
                    referenced_by: referenced_by.to_string(),
                },
            );
            None
        }
    }
}

/// Decode the primary entry of a bundle
///
/// References are resolved against the bundle, relative to
/// `options.path_prefix` or the primary entry's directory.
///
/// # Errors
///
/// - [`Error::UnsupportedFormat`] when no decoder handles the extension
/// - [`Error::DecodeFailure`] when the primary entry is missing, cannot be
///   parsed, or holds no renderable geometry
///
/// # Example
///
/// ```
/// use print_ingest::{AssetBundle, DecodeOptions, ModelFormat, decode};
///
/// let stl = "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid t\n";
/// let bundle = AssetBundle::single("part.stl", stl.as_bytes().to_vec());
///
/// let decoded = decode(&bundle, "part.stl", &DecodeOptions::default()).unwrap();
/// assert_eq!(decoded.format, ModelFormat::Stl);
/// assert_eq!(decoded.scene.mesh_count(), 1);
/// ```
pub fn decode(bundle: &AssetBundle, primary: &str, options: &DecodeOptions) -> Result<DecodedScene> {
    let prefix = options
        .path_prefix
        .as_deref()
        .unwrap_or_else(|| parent_dir(primary));
    let resolver = BundleResolver::new(bundle, prefix);
    decode_with_resolver(bundle, primary, &resolver)
}

/// Decode the primary entry of a bundle with a caller-supplied resolver
///
/// Self-contained formats never consult the resolver. Scene formats skip it
/// as well when the bundle holds a single entry: there is nothing to resolve
/// against, and any external reference is reported as missing.
pub fn decode_with_resolver(
    bundle: &AssetBundle,
    primary: &str,
    resolver: &dyn ReferenceResolver,
) -> Result<DecodedScene> {
    let mut warnings = Vec::new();
    let (scene, format) = decode_collecting(bundle, primary, resolver, &mut warnings)?;
    Ok(DecodedScene {
        scene,
        format,
        warnings,
    })
}

/// Decode, appending warnings to `warnings` whether or not decoding succeeds
pub(crate) fn decode_collecting(
    bundle: &AssetBundle,
    primary: &str,
    resolver: &dyn ReferenceResolver,
    warnings: &mut Vec<Warning>,
) -> Result<(SceneGraph, ModelFormat)> {
    let bytes = bundle
        .get(primary)
        .ok_or_else(|| Error::decode_failure(primary, "entry is not in the bundle"))?;
    let extension = extension_of(primary).unwrap_or_default();
    let entry = DECODERS
        .iter()
        .find(|entry| entry.extension == extension)
        .ok_or_else(|| Error::UnsupportedFormat {
            extension: extension.clone(),
        })?;

    let resolver: &dyn ReferenceResolver = match entry.format.family() {
        FormatFamily::SelfContainedMesh => &NoReferences,
        FormatFamily::ReferenceResolvingScene if bundle.len() == 1 => {
            debug!(path = primary, "Single-entry bundle, skipping reference resolution");
            &NoReferences
        }
        FormatFamily::ReferenceResolvingScene => resolver,
    };

    let mut ctx = DecodeContext::new(primary, bytes, resolver);
    let decoded = (entry.decode)(&mut ctx);
    let decode_warnings = std::mem::take(&mut ctx.warnings);
    let missing = missing_references(&decode_warnings);
    warnings.extend(decode_warnings);

    let mut scene = decoded?;
    scene.format = entry.format;

    if scene.mesh_count() == 0 {
        let reason = if missing.is_empty() {
            "file contains no renderable geometry".to_string()
        } else {
            format!(
                "file contains no renderable geometry; missing referenced files: {}",
                missing.join(", ")
            )
        };
        return Err(Error::decode_failure(primary, reason));
    }

    info!(
        path = primary,
        format = %entry.format,
        meshes = scene.mesh_count(),
        triangles = scene.triangle_count(),
        warnings = warnings.len(),
        "Decoded model"
    );

    Ok((scene, entry.format))
}

fn missing_references(warnings: &[Warning]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for warning in warnings {
        if let Warning::MissingReference { reference, .. } = warning {
            if !missing.contains(reference) {
                missing.push(reference.clone());
            }
        }
    }
    missing
}

/// Most scene nodes one decode may emit, counting instanced copies
pub const MAX_SCENE_NODES: usize = 100_000;
/// Most triangles one decode may emit, counting instanced copies
pub const MAX_SCENE_TRIANGLES: usize = 50_000_000;

/// Running count of what a decode has emitted
///
/// Formats that instance objects (3MF components, glTF nodes listed more
/// than once) can describe scenes exponentially larger than their bytes.
#[derive(Debug, Default)]
pub(crate) struct SceneBudget {
    nodes: usize,
    triangles: usize,
}

impl SceneBudget {
    /// Charge one node carrying `triangles` triangles
    pub fn charge(&mut self, triangles: usize) -> std::result::Result<(), String> {
        self.nodes += 1;
        self.triangles = self.triangles.saturating_add(triangles);
        if self.nodes > MAX_SCENE_NODES {
            return Err(format!("scene expands to more than {} nodes", MAX_SCENE_NODES));
        }
        if self.triangles > MAX_SCENE_TRIANGLES {
            return Err(format!(
                "scene expands to more than {} triangles",
                MAX_SCENE_TRIANGLES
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Resolver that records how often it was asked
    struct SpyResolver {
        calls: Cell<usize>,
    }

    impl ReferenceResolver for SpyResolver {
        fn resolve(&self, _reference: &str) -> Option<Resolved> {
            self.calls.set(self.calls.get() + 1);
            None
        }
    }

    const TRIANGLE_OBJ: &str = "mtllib model.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";

    #[test]
    fn test_table_lookup() {
        assert_eq!(format_for_extension("stl"), Some(ModelFormat::Stl));
        assert_eq!(format_for_extension("glb"), Some(ModelFormat::Glb));
        assert_eq!(format_for_extension("fbx"), None);
        assert_eq!(supported_extensions().count(), 6);
    }

    #[test]
    fn test_unsupported_format() {
        let bundle = AssetBundle::single("model.fbx", vec![0u8; 16]);
        let err = decode(&bundle, "model.fbx", &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "fbx"));
        assert!(err.to_string().contains(".fbx"));
    }

    #[test]
    fn test_missing_primary_is_decode_failure() {
        let bundle = AssetBundle::single("a.stl", vec![0u8; 4]);
        let err = decode(&bundle, "b.stl", &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::DecodeFailure { .. }));
    }

    #[test]
    fn test_single_entry_skips_resolver() {
        let bundle = AssetBundle::single("model.obj", TRIANGLE_OBJ.as_bytes().to_vec());
        let spy = SpyResolver { calls: Cell::new(0) };

        let decoded = decode_with_resolver(&bundle, "model.obj", &spy).unwrap();

        assert_eq!(spy.calls.get(), 0);
        assert_eq!(decoded.scene.mesh_count(), 1);
        // The mtllib could not be found and is reported, not fatal
        assert!(decoded.warnings.iter().any(|w| matches!(
            w,
            Warning::MissingReference { reference, .. } if reference.ends_with("model.mtl")
        )));
    }

    #[test]
    fn test_multi_entry_uses_resolver() {
        let bundle = AssetBundle::from_entries([
            ("model.obj", TRIANGLE_OBJ.as_bytes().to_vec()),
            ("notes.txt", b"hello".to_vec()),
        ]);
        let spy = SpyResolver { calls: Cell::new(0) };

        decode_with_resolver(&bundle, "model.obj", &spy).unwrap();

        assert_eq!(spy.calls.get(), 1);
    }

    #[test]
    fn test_self_contained_never_resolves() {
        let stl = "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid t\n";
        let bundle = AssetBundle::from_entries([
            ("part.stl", stl.as_bytes().to_vec()),
            ("extra.png", vec![1u8]),
        ]);
        let spy = SpyResolver { calls: Cell::new(0) };

        decode_with_resolver(&bundle, "part.stl", &spy).unwrap();

        assert_eq!(spy.calls.get(), 0);
    }

    #[test]
    fn test_empty_scene_names_missing_references() {
        let gltf = r#"{
  "asset": {"version": "2.0"},
  "scenes": [{"nodes": [0]}],
  "nodes": [{"mesh": 0}],
  "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
  "accessors": [{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0]}],
  "bufferViews": [{"buffer": 0, "byteLength": 36}],
  "buffers": [{"byteLength": 36, "uri": "scene.bin"}]
}"#;
        let bundle = AssetBundle::from_entries([
            ("scene.gltf", gltf.as_bytes().to_vec()),
            ("tex.png", vec![0u8; 4]),
        ]);
        let resolver = BundleResolver::new(&bundle, "");
        let mut warnings = Vec::new();

        let err = decode_collecting(&bundle, "scene.gltf", &resolver, &mut warnings).unwrap_err();

        assert!(matches!(err, Error::DecodeFailure { ref reason, .. } if reason.contains("scene.bin")));
        assert!(warnings.iter().any(|w| matches!(
            w,
            Warning::MissingReference { reference, .. } if reference == "scene.bin"
        )));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, Warning::EmptyPrimitiveSkipped { .. })));
    }

    #[test]
    fn test_scene_budget_limits_nodes() {
        let mut budget = SceneBudget::default();
        for _ in 0..MAX_SCENE_NODES {
            budget.charge(0).unwrap();
        }
        let reason = budget.charge(0).unwrap_err();
        assert!(reason.contains("nodes"));

        let mut budget = SceneBudget::default();
        assert!(budget.charge(MAX_SCENE_TRIANGLES).is_ok());
        assert!(budget.charge(1).unwrap_err().contains("triangles"));
    }

    #[test]
    fn test_resolve_reference_reports_ambiguity() {
        let bundle = AssetBundle::from_entries([("a/t.png", vec![1u8]), ("b/t.png", vec![2u8])]);
        let resolver = BundleResolver::new(&bundle, "");
        let mut warnings = Vec::new();

        let found = resolve_reference(&resolver, "t.png", "image 0", &mut warnings).unwrap();

        assert_eq!(found.path, "a/t.png");
        assert_eq!(
            warnings,
            vec![Warning::AmbiguousReference {
                reference: "t.png".to_string(),
                chosen: "a/t.png".to_string(),
                candidates: vec!["a/t.png".to_string(), "b/t.png".to_string()],
            }]
        );
    }
}
