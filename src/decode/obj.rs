//! Wavefront OBJ with MTL material libraries via `tobj`
//!
//! Material libraries and their textures are fetched through the resolver.
//! A missing library leaves the meshes without materials; a missing texture
//! leaves the material untextured.

use super::{DecodeContext, resolve_reference};
use crate::error::{Result, Warning};
use crate::format::ModelFormat;
use crate::scene::{Color, Geometry, Material, Mesh, SceneGraph, SceneNode, TextureImage};
use std::cell::RefCell;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Name `tobj` gives objects without an `o`/`g` statement
const TOBJ_UNNAMED: &str = "unnamed_object";

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<SceneGraph> {
    let resolver = ctx.resolver();
    let loader_warnings: RefCell<Vec<Warning>> = RefCell::new(Vec::new());

    let mut reader = Cursor::new(ctx.bytes);
    let (models, materials) = tobj::load_obj_buf(&mut reader, &tobj::GPU_LOAD_OPTIONS, |mtl_path: &Path| {
        let reference = mtl_path.to_string_lossy();
        let resolved = resolve_reference(
            resolver,
            &reference,
            "mtllib",
            &mut loader_warnings.borrow_mut(),
        );
        match resolved {
            Some(resolved) => tobj::load_mtl_buf(&mut Cursor::new(&resolved.bytes[..])),
            None => Err(tobj::LoadError::OpenFileFailed),
        }
    })
    .map_err(|e| ctx.decode_failure(format!("OBJ parse error: {}", e)))?;
    ctx.extend_warnings(loader_warnings.into_inner());

    // An unreadable library was already reported by the loader
    let materials = materials.unwrap_or_default();
    let converted: Vec<Material> = materials
        .iter()
        .map(|material| convert_material(ctx, material))
        .collect();

    let mut scene = SceneGraph::new(ModelFormat::Obj);
    for model in models {
        let Some(geometry) = geometry_from(&model.mesh) else {
            ctx.warn(Warning::EmptyPrimitiveSkipped {
                mesh: model.name.clone(),
                reason: "no triangles".to_string(),
            });
            continue;
        };
        if !geometry.indices_in_bounds() {
            return Err(ctx.decode_failure(format!(
                "object '{}' references a vertex out of range",
                model.name
            )));
        }

        let name = if model.name == TOBJ_UNNAMED {
            String::new()
        } else {
            model.name
        };
        let mut mesh = Mesh::new(geometry).with_name(name);
        mesh.material = model
            .mesh
            .material_id
            .and_then(|id| converted.get(id))
            .cloned();
        scene.root.children.push(SceneNode::Mesh(mesh));
    }

    debug!(
        meshes = scene.root.children.len(),
        materials = converted.len(),
        "OBJ loaded"
    );
    Ok(scene)
}

fn geometry_from(mesh: &tobj::Mesh) -> Option<Geometry> {
    if mesh.indices.is_empty() || mesh.positions.is_empty() {
        return None;
    }
    let vertex_count = mesh.positions.len() / 3;

    let mut geometry = Geometry {
        positions: mesh
            .positions
            .chunks_exact(3)
            .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
            .collect(),
        indices: mesh.indices.clone(),
        ..Geometry::default()
    };
    if mesh.normals.len() == vertex_count * 3 {
        geometry.normals = mesh
            .normals
            .chunks_exact(3)
            .map(|n| [n[0] as f32, n[1] as f32, n[2] as f32])
            .collect();
    } else {
        geometry.compute_vertex_normals();
    }
    if mesh.texcoords.len() == vertex_count * 2 {
        geometry.uvs = mesh
            .texcoords
            .chunks_exact(2)
            .map(|t| [t[0] as f32, t[1] as f32])
            .collect();
    }
    if mesh.vertex_color.len() == vertex_count * 3 {
        geometry.colors = mesh
            .vertex_color
            .chunks_exact(3)
            .map(|c| [c[0] as f32, c[1] as f32, c[2] as f32, 1.0])
            .collect();
    }
    Some(geometry)
}

fn convert_material(ctx: &mut DecodeContext<'_>, material: &tobj::Material) -> Material {
    let diffuse = material.diffuse.unwrap_or([1.0, 1.0, 1.0]);
    let alpha = material.dissolve.unwrap_or(1.0);
    let mut out = Material::solid(Color::from_f32([
        diffuse[0] as f32,
        diffuse[1] as f32,
        diffuse[2] as f32,
        alpha as f32,
    ]));
    out.name = Some(material.name.clone()).filter(|n| !n.is_empty());
    if let Some(shininess) = material.shininess {
        // Phong exponent 0..1000 mapped onto perceptual roughness
        out.roughness = (1.0 - (shininess as f32 / 1000.0).max(0.0).sqrt()).clamp(0.0, 1.0);
    }

    if let Some(map) = material.diffuse_texture.as_deref() {
        let file = texture_file(map);
        let referenced_by = format!("material '{}'", material.name);
        if let Some(resolved) = ctx.resolve(file, &referenced_by) {
            out.texture = Some(TextureImage {
                source: resolved.path,
                mime_type: None,
                bytes: resolved.bytes,
            });
        }
    }
    out
}

/// File name of a `map_Kd` statement, without leading options such as `-s 1 1 1`
fn texture_file(map: &str) -> &str {
    let map = map.trim();
    if map.starts_with('-') {
        map.split_whitespace().last().unwrap_or(map)
    } else {
        map
    }
}
