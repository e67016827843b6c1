//! PLY (ASCII and binary) via `ply-rs`

use super::DecodeContext;
use crate::error::Result;
use crate::format::ModelFormat;
use crate::scene::{Geometry, Mesh, SceneGraph, SceneNode};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use std::io::Cursor;
use tracing::debug;

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<SceneGraph> {
    let parser = Parser::<DefaultElement>::new();
    let mut cursor = Cursor::new(ctx.bytes);
    let ply = parser
        .read_ply(&mut cursor)
        .map_err(|e| ctx.decode_failure(format!("PLY parse error: {}", e)))?;

    let mut geometry = Geometry::default();

    if let Some(vertices) = ply.payload.get("vertex") {
        geometry.positions.reserve(vertices.len());
        let mut colors = Vec::with_capacity(vertices.len());
        let mut normals = Vec::with_capacity(vertices.len());

        for vertex in vertices {
            let coord = |name: &str| {
                scalar(vertex.get(name))
                    .ok_or_else(|| ctx.decode_failure(format!("vertex is missing property '{}'", name)))
            };
            geometry
                .positions
                .push([coord("x")? as f32, coord("y")? as f32, coord("z")? as f32]);

            if let (Some(nx), Some(ny), Some(nz)) = (
                scalar(vertex.get("nx")),
                scalar(vertex.get("ny")),
                scalar(vertex.get("nz")),
            ) {
                normals.push([nx as f32, ny as f32, nz as f32]);
            }

            if let (Some(r), Some(g), Some(b)) = (
                channel(vertex.get("red")),
                channel(vertex.get("green")),
                channel(vertex.get("blue")),
            ) {
                let a = channel(vertex.get("alpha")).unwrap_or(1.0);
                colors.push([r, g, b, a]);
            }
        }

        // Attributes present on only some vertices are dropped
        if normals.len() == geometry.positions.len() {
            geometry.normals = normals;
        }
        if colors.len() == geometry.positions.len() {
            geometry.colors = colors;
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for face in faces {
            let Some(polygon) = face
                .get("vertex_indices")
                .or_else(|| face.get("vertex_index"))
                .and_then(index_list)
            else {
                continue;
            };
            let polygon = polygon.map_err(|index| {
                ctx.decode_failure(format!("face references negative vertex index {}", index))
            })?;
            // Fan triangulation for polygons
            for i in 1..polygon.len().saturating_sub(1) {
                geometry
                    .indices
                    .extend_from_slice(&[polygon[0], polygon[i], polygon[i + 1]]);
            }
        }
    }

    if !geometry.indices_in_bounds() {
        return Err(ctx.decode_failure("face references a vertex out of range"));
    }
    if geometry.normals.is_empty() {
        geometry.compute_vertex_normals();
    }

    debug!(
        vertices = geometry.vertex_count(),
        triangles = geometry.triangle_count(),
        "PLY loaded"
    );

    let mut scene = SceneGraph::new(ModelFormat::Ply);
    scene.root.children.push(SceneNode::Mesh(Mesh::new(geometry)));
    Ok(scene)
}

fn scalar(prop: Option<&Property>) -> Option<f64> {
    match prop? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

/// Color channel in `0.0..=1.0`; integer channels are 8-bit
fn channel(prop: Option<&Property>) -> Option<f32> {
    match prop? {
        Property::Float(v) => Some(v.clamp(0.0, 1.0)),
        Property::Double(v) => Some(v.clamp(0.0, 1.0) as f32),
        Property::UChar(v) => Some(*v as f32 / 255.0),
        Property::Char(v) => Some((*v).max(0) as f32 / 255.0),
        Property::UShort(v) => Some((*v).min(255) as f32 / 255.0),
        Property::Short(v) => Some((*v).clamp(0, 255) as f32 / 255.0),
        Property::UInt(v) => Some((*v).min(255) as f32 / 255.0),
        Property::Int(v) => Some((*v).clamp(0, 255) as f32 / 255.0),
        _ => None,
    }
}

/// Face index list; `Err` carries the first negative index
fn index_list(prop: &Property) -> Option<std::result::Result<Vec<u32>, i64>> {
    fn unsigned<T: Copy + Into<i64>>(list: &[T]) -> std::result::Result<Vec<u32>, i64> {
        list.iter()
            .map(|&i| {
                let i: i64 = i.into();
                u32::try_from(i).map_err(|_| i)
            })
            .collect()
    }

    let list = match prop {
        Property::ListInt(v) => unsigned(v),
        Property::ListUInt(v) => Ok(v.clone()),
        Property::ListShort(v) => unsigned(v),
        Property::ListUShort(v) => Ok(v.iter().map(|&i| i as u32).collect()),
        Property::ListChar(v) => unsigned(v),
        Property::ListUChar(v) => Ok(v.iter().map(|&i| i as u32).collect()),
        _ => return None,
    };
    Some(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::NoReferences;

    const QUAD: &str = "ply
format ascii 1.0
element vertex 4
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 1
property list uchar int vertex_indices
end_header
0 0 0 255 0 0
1 0 0 0 255 0
1 1 0 0 0 255
0 1 0 255 255 255
4 0 1 2 3
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let mut ctx = DecodeContext::new("scan.ply", QUAD.as_bytes(), &NoReferences);
        let scene = decode(&mut ctx).unwrap();

        let mesh = scene.meshes()[0];
        assert_eq!(mesh.geometry.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.geometry.normals.len(), 4);
        assert_eq!(mesh.geometry.colors.len(), 4);
        assert_eq!(mesh.geometry.colors[0], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_out_of_range_face_fails() {
        let text = QUAD.replace("4 0 1 2 3", "3 0 1 9");
        let mut ctx = DecodeContext::new("scan.ply", text.as_bytes(), &NoReferences);
        assert!(decode(&mut ctx).is_err());
    }

    #[test]
    fn test_negative_face_index_fails() {
        let text = QUAD.replace("4 0 1 2 3", "3 -5 1 2");
        let mut ctx = DecodeContext::new("scan.ply", text.as_bytes(), &NoReferences);
        let err = decode(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_binary_little_endian() {
        let mut bytes = b"ply
format binary_little_endian 1.0
element vertex 3
property float x
property float y
property float z
element face 1
property list uchar uint vertex_indices
end_header
"
        .to_vec();
        for v in [0.0f32, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(3);
        for i in [0u32, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        let mut ctx = DecodeContext::new("scan.ply", &bytes, &NoReferences);

        let scene = decode(&mut ctx).unwrap();

        let mesh = scene.meshes()[0];
        assert_eq!(mesh.geometry.positions[1], [2.0, 0.0, 0.0]);
        assert_eq!(mesh.geometry.indices, vec![0, 1, 2]);
        assert!(mesh.geometry.colors.is_empty());
    }

    #[test]
    fn test_garbage_fails() {
        let mut ctx = DecodeContext::new("scan.ply", b"not a ply file", &NoReferences);
        assert!(decode(&mut ctx).is_err());
    }
}
