//! STL (ASCII and binary) via `stl_io`

use super::DecodeContext;
use crate::error::Result;
use crate::format::ModelFormat;
use crate::scene::{Geometry, Mesh, SceneGraph, SceneNode};
use std::io::Cursor;

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<SceneGraph> {
    let mut cursor = Cursor::new(ctx.bytes);
    let stl = stl_io::read_stl(&mut cursor).map_err(|e| ctx.decode_failure(e))?;

    let vertex_count = stl.vertices.len();
    let mut geometry = Geometry {
        positions: stl.vertices.iter().map(|v| v.0).collect(),
        indices: Vec::with_capacity(stl.faces.len() * 3),
        ..Geometry::default()
    };
    for face in &stl.faces {
        if face.vertices.iter().any(|&i| i >= vertex_count) {
            return Err(ctx.decode_failure("face references a vertex out of range"));
        }
        geometry
            .indices
            .extend(face.vertices.iter().map(|&i| i as u32));
    }
    // Facet normals in STL files are often zero or wrong
    geometry.compute_vertex_normals();

    let mut scene = SceneGraph::new(ModelFormat::Stl);
    scene.root.children.push(SceneNode::Mesh(Mesh::new(geometry)));
    Ok(scene)
}
