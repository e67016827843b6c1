//! Decoded scene graph
//!
//! A [`SceneGraph`] is a tree rooted at a [`Group`]. Groups carry a name, a
//! local transform and children; leaves are [`Mesh`]es with format-agnostic
//! geometry and an optional [`Material`]. Decoders build scenes, the
//! normalizer fills in names and materials, and from then on the scene is
//! shared read-only behind an `Arc`.

use crate::format::ModelFormat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Column-major 4x4 identity matrix
pub const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// RGBA color with 8 bits per channel
///
/// Serialized as `#RRGGBB` when fully opaque and `#RRGGBBAA` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha (255 = opaque)
    pub a: u8,
}

impl Color {
    /// Opaque color from RGB components
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Color from RGBA components
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Color from linear float components in `0.0..=1.0`
    pub fn from_f32(rgba: [f32; 4]) -> Self {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::rgba(channel(rgba[0]), channel(rgba[1]), channel(rgba[2]), channel(rgba[3]))
    }

    /// Components as floats in `0.0..=1.0`
    pub fn to_f32(self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        ]
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (the leading `#` is optional)
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s).ok_or_else(|| format!("invalid color '{}', expected #RRGGBB or #RRGGBBAA", s))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Image bytes bound to a material
#[derive(Debug, Clone, PartialEq)]
pub struct TextureImage {
    /// Where the image came from: a bundle path, `"data:"` or `"buffer view N"`
    pub source: String,
    /// MIME type when the model declared one
    pub mime_type: Option<String>,
    /// Encoded image bytes (PNG, JPEG, ...)
    pub bytes: Arc<[u8]>,
}

/// Surface appearance of a mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Name from the source file, if any
    pub name: Option<String>,
    /// Base color (multiplied with the texture when present)
    pub base_color: Color,
    /// Perceptual roughness in `0.0..=1.0`
    pub roughness: f32,
    /// Metalness in `0.0..=1.0`
    pub metalness: f32,
    /// Render both faces
    pub double_sided: bool,
    /// Use face normals instead of interpolated vertex normals
    pub flat_shading: bool,
    /// Base-color texture
    pub texture: Option<TextureImage>,
}

impl Material {
    /// Opaque material of one color with neutral PBR parameters
    pub fn solid(base_color: Color) -> Self {
        Self {
            name: None,
            base_color,
            roughness: 0.5,
            metalness: 0.0,
            double_sided: false,
            flat_shading: false,
            texture: None,
        }
    }
}

/// Triangle geometry
///
/// Per-vertex attribute vectors are either empty or as long as `positions`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    /// Vertex positions
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals
    pub normals: Vec<[f32; 3]>,
    /// First texture coordinate set
    pub uvs: Vec<[f32; 2]>,
    /// Vertex colors (RGBA, `0.0..=1.0`)
    pub colors: Vec<[f32; 4]>,
    /// Triangle list indices into `positions`
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Whether every index points at a vertex
    pub fn indices_in_bounds(&self) -> bool {
        let count = self.positions.len();
        self.indices.iter().all(|&i| (i as usize) < count)
    }

    /// Replace `normals` with area-weighted vertex normals
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![[0.0f32; 3]; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let (Some(pa), Some(pb), Some(pc)) = (
                self.positions.get(a),
                self.positions.get(b),
                self.positions.get(c),
            ) else {
                continue;
            };
            let u = sub(*pb, *pa);
            let v = sub(*pc, *pa);
            // Unnormalized cross product weights by triangle area
            let n = [
                u[1] * v[2] - u[2] * v[1],
                u[2] * v[0] - u[0] * v[2],
                u[0] * v[1] - u[1] * v[0],
            ];
            for &i in &[a, b, c] {
                normals[i][0] += n[0];
                normals[i][1] += n[1];
                normals[i][2] += n[2];
            }
        }
        for n in &mut normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if len > f32::EPSILON {
                n[0] /= len;
                n[1] /= len;
                n[2] /= len;
            }
        }
        self.normals = normals;
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` without vertices
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(mut lo, mut hi), p| {
            for k in 0..3 {
                lo[k] = lo[k].min(p[k]);
                hi[k] = hi[k].max(p[k]);
            }
            (lo, hi)
        }))
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// A renderable leaf of the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Unique, non-empty after normalization
    pub name: String,
    /// Triangle geometry
    pub geometry: Geometry,
    /// Always `Some` after normalization
    pub material: Option<Material>,
    /// Whether the mesh casts shadows
    pub casts_shadow: bool,
    /// Whether the mesh receives shadows
    pub receives_shadow: bool,
}

impl Mesh {
    /// Unnamed mesh without material, casting and receiving shadows
    pub fn new(geometry: Geometry) -> Self {
        Self {
            name: String::new(),
            geometry,
            material: None,
            casts_shadow: true,
            receives_shadow: true,
        }
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the material
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }
}

/// Interior node grouping children under a local transform
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Name from the source file (may be empty)
    pub name: String,
    /// Column-major local transform
    pub transform: [[f32; 4]; 4],
    /// Child nodes
    pub children: Vec<SceneNode>,
}

impl Group {
    /// Empty group with an identity transform
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: IDENTITY,
            children: Vec::new(),
        }
    }
}

/// Node of the scene tree
#[derive(Debug, Clone, PartialEq)]
pub enum SceneNode {
    /// Interior node
    Group(Group),
    /// Leaf
    Mesh(Mesh),
}

/// Decoded model ready for display and configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    /// Root container
    pub root: Group,
    /// Format the scene was decoded from
    pub format: ModelFormat,
    /// Number of animation clips in the source file
    pub animation_count: usize,
}

impl SceneGraph {
    /// Scene with an empty root group
    pub fn new(format: ModelFormat) -> Self {
        Self {
            root: Group::new("root"),
            format,
            animation_count: 0,
        }
    }

    /// Whether the source carried animations
    pub fn has_animations(&self) -> bool {
        self.animation_count > 0
    }

    /// All meshes, depth-first in child order
    pub fn meshes(&self) -> Vec<&Mesh> {
        let mut out = Vec::new();
        collect_meshes(&self.root, &mut out);
        out
    }

    /// Visit every mesh mutably, depth-first in child order
    pub fn for_each_mesh_mut(&mut self, mut f: impl FnMut(&mut Mesh)) {
        visit_meshes_mut(&mut self.root, &mut f);
    }

    /// Number of meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes().len()
    }

    /// Look up a mesh by name
    pub fn mesh(&self, name: &str) -> Option<&Mesh> {
        self.meshes().into_iter().find(|m| m.name == name)
    }

    /// Snapshot of the mesh names, used to validate color overrides
    pub fn mesh_names(&self) -> MeshNameSet {
        MeshNameSet(self.meshes().iter().map(|m| m.name.clone()).collect())
    }

    /// Total triangle count over all meshes
    pub fn triangle_count(&self) -> usize {
        self.meshes().iter().map(|m| m.geometry.triangle_count()).sum()
    }
}

fn collect_meshes<'a>(group: &'a Group, out: &mut Vec<&'a Mesh>) {
    for child in &group.children {
        match child {
            SceneNode::Mesh(mesh) => out.push(mesh),
            SceneNode::Group(g) => collect_meshes(g, out),
        }
    }
}

fn visit_meshes_mut(group: &mut Group, f: &mut impl FnMut(&mut Mesh)) {
    for child in &mut group.children {
        match child {
            SceneNode::Mesh(mesh) => f(mesh),
            SceneNode::Group(g) => visit_meshes_mut(g, f),
        }
    }
}

/// Set of mesh names taken from a scene at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshNameSet(BTreeSet<String>);

impl MeshNameSet {
    /// Whether a mesh with this name existed
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Names in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of names
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for MeshNameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mesh_has_shadows() {
        let mesh = Mesh::new(Geometry::default());
        assert!(mesh.name.is_empty());
        assert!(mesh.material.is_none());
        assert!(mesh.casts_shadow && mesh.receives_shadow);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(Color::parse_hex("#FF0000"), Some(Color::rgb(255, 0, 0)));
        assert_eq!(Color::parse_hex("00ff00"), Some(Color::rgb(0, 255, 0)));
        assert_eq!(
            Color::parse_hex("#FF000080"),
            Some(Color::rgba(255, 0, 0, 128))
        );
        assert_eq!(Color::parse_hex("#FF"), None);
        assert_eq!(Color::parse_hex("#GG0000"), None);
        assert_eq!(Color::parse_hex("#ÿÿÿ"), None);
    }

    #[test]
    fn test_color_display_roundtrip() {
        assert_eq!(Color::rgb(1, 2, 255).to_string(), "#0102FF");
        assert_eq!(Color::rgba(1, 2, 3, 4).to_string(), "#01020304");
        let c: Color = "#0102FF".parse().unwrap();
        assert_eq!(c, Color::rgb(1, 2, 255));
    }

    #[test]
    fn test_color_from_f32_clamps() {
        assert_eq!(
            Color::from_f32([2.0, -1.0, 0.5, 1.0]),
            Color::rgba(255, 0, 128, 255)
        );
    }

    #[test]
    fn test_compute_vertex_normals_flat_triangle() {
        let mut g = Geometry {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..Geometry::default()
        };
        g.compute_vertex_normals();
        for n in &g.normals {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_bounds() {
        let g = Geometry {
            positions: vec![[0.0, 5.0, -1.0], [2.0, -3.0, 4.0]],
            ..Geometry::default()
        };
        assert_eq!(g.bounds(), Some(([0.0, -3.0, -1.0], [2.0, 5.0, 4.0])));
        assert_eq!(Geometry::default().bounds(), None);
    }

    #[test]
    fn test_meshes_depth_first() {
        let mut scene = SceneGraph::new(ModelFormat::Gltf);
        let mut inner = Group::new("inner");
        inner
            .children
            .push(SceneNode::Mesh(Mesh::new(Geometry::default()).with_name("b")));
        scene
            .root
            .children
            .push(SceneNode::Mesh(Mesh::new(Geometry::default()).with_name("a")));
        scene.root.children.push(SceneNode::Group(inner));
        scene
            .root
            .children
            .push(SceneNode::Mesh(Mesh::new(Geometry::default()).with_name("c")));

        let names: Vec<_> = scene.meshes().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(scene.mesh_names().contains("b"));
        assert!(scene.mesh("c").is_some());
    }
}
