//! Property-based tests for print-ingest
//!
//! These tests use proptest to generate random bundles and scenes and
//! verify that classification, expansion and normalization invariants hold.

use print_ingest::normalize::normalize;
use print_ingest::{
    AssetBundle, Color, Geometry, Group, Material, Mesh, ModelFormat, RecognizedExtensions,
    SceneGraph, SceneNode, expand, select_primary,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Generators
// ============================================================================

/// Extensions seen in real uploads, recognized or not
fn extension_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "stl", "STL", "obj", "mtl", "png", "jpg", "gltf", "glb", "bin", "3mf", "ply", "fbx",
        "txt", "",
    ])
}

/// Bundle paths like `dir/name.ext`
fn path_strategy() -> impl Strategy<Value = String> {
    (
        prop::option::of("[a-z]{1,6}"),
        "[a-zA-Z0-9_]{1,10}",
        extension_strategy(),
    )
        .prop_map(|(dir, stem, ext)| {
            let file = if ext.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, ext)
            };
            match dir {
                Some(dir) => format!("{}/{}", dir, file),
                None => file,
            }
        })
}

/// Entries in generation order, possibly with repeated paths
fn entries_strategy() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::vec(
        (path_strategy(), prop::collection::vec(any::<u8>(), 0..16)),
        0..12,
    )
}

fn material_strategy() -> impl Strategy<Value = Material> {
    (any::<[u8; 4]>(), 0.0f32..=1.0, any::<bool>()).prop_map(|(rgba, roughness, flat)| {
        let mut material = Material::solid(Color::rgba(rgba[0], rgba[1], rgba[2], rgba[3]));
        material.roughness = roughness;
        material.flat_shading = flat;
        material
    })
}

/// A mesh that may lack a name and may lack a material
fn mesh_strategy() -> impl Strategy<Value = Mesh> {
    (
        prop::option::of(material_strategy()),
        prop::collection::vec(any::<[i8; 3]>(), 0..4),
        any::<bool>(),
    )
        .prop_map(|(material, positions, colored)| {
            let mut geometry = Geometry {
                positions: positions
                    .iter()
                    .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
                    .collect(),
                ..Geometry::default()
            };
            if colored {
                geometry.colors = vec![[1.0, 0.5, 0.0, 1.0]; geometry.positions.len()];
            }
            let mut mesh = Mesh::new(geometry);
            mesh.material = material;
            mesh
        })
}

fn format_strategy() -> impl Strategy<Value = ModelFormat> {
    prop::sample::select(vec![
        ModelFormat::Stl,
        ModelFormat::Ply,
        ModelFormat::ThreeMf,
        ModelFormat::Obj,
        ModelFormat::Gltf,
        ModelFormat::Glb,
    ])
}

/// A scene whose named meshes carry distinct names, spread over nested groups
fn scene_strategy() -> impl Strategy<Value = SceneGraph> {
    (
        format_strategy(),
        prop::collection::vec((mesh_strategy(), any::<bool>(), 0usize..3), 0..10),
    )
        .prop_map(|(format, meshes)| {
            let mut scene = SceneGraph::new(format);
            let mut groups: Vec<Group> = (0..3).map(|i| Group::new(format!("g{}", i))).collect();
            for (index, (mut mesh, named, group)) in meshes.into_iter().enumerate() {
                if named {
                    mesh.name = format!("part{}", index);
                }
                if group == 0 {
                    scene.root.children.push(SceneNode::Mesh(mesh));
                } else {
                    groups[group].children.push(SceneNode::Mesh(mesh));
                }
            }
            let nested = groups.remove(2);
            groups[1].children.push(SceneNode::Group(nested));
            scene.root.children.push(SceneNode::Group(groups.remove(1)));
            scene
        })
}

// ============================================================================
// Classifier
// ============================================================================

proptest! {
    #[test]
    fn test_select_primary_deterministic(entries in entries_strategy()) {
        let extensions = RecognizedExtensions::default();
        let forward = AssetBundle::from_entries(entries.clone());
        let first = select_primary(&forward, &extensions);
        let second = select_primary(&forward, &extensions);
        prop_assert_eq!(&first, &second);
    }

    #[test]
    fn test_select_primary_ignores_insertion_order(entries in entries_strategy()) {
        // Repeated paths keep the last value, so dedupe before reversing
        let mut seen = BTreeSet::new();
        let unique: Vec<_> = entries
            .into_iter()
            .filter(|(path, _)| seen.insert(path.clone()))
            .collect();
        let extensions = RecognizedExtensions::default();

        let forward = AssetBundle::from_entries(unique.clone());
        let reversed = AssetBundle::from_entries(unique.into_iter().rev());
        prop_assert_eq!(
            select_primary(&forward, &extensions),
            select_primary(&reversed, &extensions)
        );
    }

    #[test]
    fn test_select_primary_is_recognized_entry(entries in entries_strategy()) {
        let extensions = RecognizedExtensions::default();
        let bundle = AssetBundle::from_entries(entries);
        match select_primary(&bundle, &extensions) {
            Some(primary) => {
                prop_assert!(bundle.contains(&primary));
                prop_assert!(extensions.matches(&primary));
                let rank = extensions.rank(&primary);
                let all_ranked_no_better = bundle.paths().all(|p| {
                    extensions.rank(p).is_none_or(|r| r >= rank.unwrap_or(usize::MAX))
                });
                prop_assert!(all_ranked_no_better);
            }
            None => prop_assert!(bundle.paths().all(|p| !extensions.matches(p))),
        }
    }
}

// ============================================================================
// Archive expansion
// ============================================================================

proptest! {
    #[test]
    fn test_expand_without_archives_is_identity(entries in entries_strategy()) {
        let bundle = AssetBundle::from_entries(entries);
        let expanded = expand(&bundle);
        prop_assert_eq!(&expanded.bundle, &bundle);
        prop_assert!(expanded.warnings.is_empty());
    }
}

// ============================================================================
// Normalizer
// ============================================================================

proptest! {
    #[test]
    fn test_normalize_names_and_materials(scene in scene_strategy()) {
        let original = scene.clone();
        let mut scene = scene;
        let format = scene.format;
        normalize(&mut scene, format);

        let before = original.meshes();
        let after = scene.meshes();
        prop_assert_eq!(before.len(), after.len());

        let mut names = BTreeSet::new();
        for (old, new) in before.iter().zip(after.iter()) {
            prop_assert!(!new.name.is_empty());
            prop_assert!(new.material.is_some());
            prop_assert!(names.insert(new.name.clone()), "duplicate name {}", new.name);
            prop_assert_eq!(&old.geometry, &new.geometry);

            if !old.name.is_empty() {
                prop_assert_eq!(&old.name, &new.name);
            }
            if old.material.is_some() {
                prop_assert_eq!(&old.material, &new.material);
            }
        }
    }

    #[test]
    fn test_normalize_is_idempotent(scene in scene_strategy()) {
        let mut scene = scene;
        let format = scene.format;
        normalize(&mut scene, format);
        let once = scene.clone();
        let report = normalize(&mut scene, format);
        prop_assert!(report.is_empty());
        prop_assert_eq!(once, scene);
    }
}
