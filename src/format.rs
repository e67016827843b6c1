//! Model formats, format families and the recognized-extension list

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a format relates to the rest of the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatFamily {
    /// One buffer holds everything; no sibling files are consulted
    SelfContainedMesh,
    /// The model may reference sibling buffers (textures, binaries, MTL files)
    ReferenceResolvingScene,
}

/// Concrete model formats this crate can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
    /// STereoLithography, ASCII or binary
    Stl,
    /// Stanford polygon format, ASCII or binary
    Ply,
    /// 3D Manufacturing Format (zip + XML)
    ThreeMf,
    /// Wavefront OBJ with optional MTL libraries
    Obj,
    /// glTF 2.0, JSON flavor
    Gltf,
    /// glTF 2.0, binary container
    Glb,
}

impl ModelFormat {
    /// The family this format belongs to
    pub fn family(&self) -> FormatFamily {
        match self {
            ModelFormat::Stl | ModelFormat::Ply | ModelFormat::ThreeMf => {
                FormatFamily::SelfContainedMesh
            }
            ModelFormat::Obj | ModelFormat::Gltf | ModelFormat::Glb => {
                FormatFamily::ReferenceResolvingScene
            }
        }
    }

    /// Prefix used for generated mesh names
    pub fn name_prefix(&self) -> &'static str {
        match self {
            ModelFormat::Stl => "STL",
            ModelFormat::Ply => "PLY",
            ModelFormat::ThreeMf => "3MF",
            ModelFormat::Obj => "OBJ",
            ModelFormat::Gltf | ModelFormat::Glb => "GLTF",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFormat::Stl => "STL",
            ModelFormat::Ply => "PLY",
            ModelFormat::ThreeMf => "3MF",
            ModelFormat::Obj => "OBJ",
            ModelFormat::Gltf => "glTF",
            ModelFormat::Glb => "GLB",
        };
        f.write_str(name)
    }
}

/// Ordered list of file extensions that count as 3D models
///
/// Earlier entries take precedence when a bundle holds several candidate
/// files. The list is host configuration: it may name extensions that no
/// decoder handles, which surfaces as
/// [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat) at decode
/// time rather than being silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecognizedExtensions(Vec<String>);

impl RecognizedExtensions {
    /// Build a list from extensions with or without a leading dot
    ///
    /// Entries are lowercased; duplicates keep their first position.
    pub fn new<S: AsRef<str>>(extensions: impl IntoIterator<Item = S>) -> Self {
        let mut list: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !list.contains(&ext) {
                list.push(ext);
            }
        }
        Self(list)
    }

    /// Extensions in precedence order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Precedence rank of a path's extension, or `None` if unrecognized
    ///
    /// Matching is a case-insensitive suffix test on `.ext`.
    pub fn rank(&self, path: &str) -> Option<usize> {
        let lower = path.to_ascii_lowercase();
        self.0.iter().position(|ext| {
            lower.len() > ext.len() + 1
                && lower.ends_with(ext.as_str())
                && lower.as_bytes()[lower.len() - ext.len() - 1] == b'.'
        })
    }

    /// Whether a path carries a recognized extension
    pub fn matches(&self, path: &str) -> bool {
        self.rank(path).is_some()
    }
}

impl Default for RecognizedExtensions {
    /// Scene formats first, then mesh formats
    ///
    /// `fbx` is listed because hosts accept such uploads; no decoder exists
    /// for it, so it is reported as unsupported instead of "no model".
    fn default() -> Self {
        Self::new(["glb", "gltf", "fbx", "obj", "3mf", "stl", "ply"])
    }
}
