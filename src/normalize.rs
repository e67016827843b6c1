//! Scene normalization
//!
//! Runs once on a freshly decoded scene, before anything else sees it.
//! Afterwards every mesh has a non-empty name that is unique in the scene,
//! a material, and shadows enabled. Names and materials that were already
//! valid are left alone.

use crate::format::{FormatFamily, ModelFormat};
use crate::scene::{Color, Material, SceneGraph};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Base color of the default material for formats without color information
pub const DEFAULT_MESH_COLOR: Color = Color::rgb(0xC8, 0xC8, 0xC8);

/// What a normalization pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Names assigned to meshes that had none, in visit order
    pub generated_names: Vec<String>,
    /// `(original, new)` for meshes whose name repeated an earlier mesh's
    pub renamed: Vec<(String, String)>,
    /// Number of meshes that received a default material
    pub default_materials: usize,
}

impl NormalizeReport {
    /// Whether the scene was already normalized apart from shadow flags
    pub fn is_empty(&self) -> bool {
        self.generated_names.is_empty() && self.renamed.is_empty() && self.default_materials == 0
    }
}

/// Default material for a format family
///
/// Self-contained formats carry no appearance of their own and get a flat,
/// opaque light gray. Scene formats get a neutral PBR surface. Meshes with
/// vertex colors get a white base so the colors show unmodified.
pub fn default_material(family: FormatFamily, has_vertex_colors: bool) -> Material {
    let base = if has_vertex_colors {
        Color::rgb(255, 255, 255)
    } else {
        match family {
            FormatFamily::SelfContainedMesh => DEFAULT_MESH_COLOR,
            FormatFamily::ReferenceResolvingScene => Color::rgb(255, 255, 255),
        }
    };
    let mut material = Material::solid(base);
    material.name = Some("default".to_string());
    if family == FormatFamily::SelfContainedMesh {
        material.flat_shading = true;
        material.roughness = 0.8;
    }
    material
}

/// Normalize mesh names, materials and shadow flags in place
///
/// Empty names become `"{PREFIX}_Mesh"`, then `"{PREFIX}_Mesh_2"`,
/// `"{PREFIX}_Mesh_3"` and so on, skipping names already present. A name
/// repeating an earlier mesh's gets the next free `_{n}` suffix.
///
/// # Example
///
/// ```
/// use print_ingest::normalize::normalize;
/// use print_ingest::scene::{Geometry, Mesh, SceneGraph, SceneNode};
/// use print_ingest::ModelFormat;
///
/// let mut scene = SceneGraph::new(ModelFormat::Stl);
/// scene.root.children.push(SceneNode::Mesh(Mesh::new(Geometry::default())));
///
/// let report = normalize(&mut scene, ModelFormat::Stl);
///
/// let mesh = scene.meshes()[0];
/// assert_eq!(mesh.name, "STL_Mesh");
/// assert!(mesh.material.is_some());
/// assert!(mesh.casts_shadow && mesh.receives_shadow);
/// assert_eq!(report.generated_names, vec!["STL_Mesh".to_string()]);
/// ```
pub fn normalize(scene: &mut SceneGraph, format: ModelFormat) -> NormalizeReport {
    let prefix = format.name_prefix();
    let family = format.family();

    // Every name present up front is reserved so generated names never
    // collide with a mesh visited later.
    let mut taken: HashSet<String> = scene
        .meshes()
        .iter()
        .filter(|m| !m.name.is_empty())
        .map(|m| m.name.clone())
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    // Next suffix to try per duplicated name; every lower suffix is taken
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut generated = 0usize;
    let mut report = NormalizeReport::default();

    scene.for_each_mesh_mut(|mesh| {
        if mesh.name.is_empty() {
            let name = loop {
                generated += 1;
                let candidate = if generated == 1 {
                    format!("{}_Mesh", prefix)
                } else {
                    format!("{}_Mesh_{}", prefix, generated)
                };
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(name.clone());
            report.generated_names.push(name.clone());
            mesh.name = name;
        } else if seen.contains(&mesh.name) {
            let original = mesh.name.clone();
            let suffix = next_suffix.entry(original.clone()).or_insert(2);
            let name = loop {
                let candidate = format!("{}_{}", original, suffix);
                *suffix += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(name.clone());
            report.renamed.push((original, name.clone()));
            mesh.name = name;
        }
        seen.insert(mesh.name.clone());

        if mesh.material.is_none() {
            mesh.material = Some(default_material(family, !mesh.geometry.colors.is_empty()));
            report.default_materials += 1;
        }

        mesh.casts_shadow = true;
        mesh.receives_shadow = true;
    });

    debug!(
        format = %format,
        generated = report.generated_names.len(),
        renamed = report.renamed.len(),
        default_materials = report.default_materials,
        "Normalized scene"
    );
    report
}
