//! glTF 2.0 (JSON and binary GLB) via the `gltf` crate
//!
//! Buffers and images come from the GLB binary chunk, `data:` URIs or the
//! resolver. A buffer that cannot be found costs only the primitives that
//! read from it; an image that cannot be found leaves its material
//! untextured.

use super::{DecodeContext, SceneBudget};
use crate::error::{Result, Warning};
use crate::format::ModelFormat;
use crate::scene::{Color, Geometry, Group, Material, Mesh, SceneGraph, SceneNode, TextureImage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gltf::Gltf;
use gltf::buffer::Source as BufferSource;
use gltf::image::Source as ImageSource;
use gltf::mesh::Mode;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const MAX_NODE_DEPTH: usize = 128;

type Buffers = Vec<Option<Arc<[u8]>>>;

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<SceneGraph> {
    let gltf = Gltf::from_slice(ctx.bytes).map_err(|e| ctx.decode_failure(e))?;
    check_ranges(ctx, &gltf)?;

    let buffers = load_buffers(ctx, &gltf)?;
    let images = load_images(ctx, &gltf, &buffers);
    let materials: Vec<Material> = gltf
        .materials()
        .map(|material| convert_material(&material, &images))
        .collect();

    let mut scene = SceneGraph::new(ModelFormat::Gltf);
    scene.animation_count = gltf.animations().count();

    let roots: Vec<gltf::Node<'_>> = match gltf.default_scene().or_else(|| gltf.scenes().next()) {
        Some(s) => s.nodes().collect(),
        None => {
            // No scenes: every node without a parent is a root
            let children: HashSet<usize> = gltf
                .nodes()
                .flat_map(|n| n.children().map(|c| c.index()))
                .collect();
            gltf.nodes().filter(|n| !children.contains(&n.index())).collect()
        }
    };

    let mut builder = NodeBuilder {
        ctx,
        buffers: &buffers,
        materials: &materials,
        budget: SceneBudget::default(),
    };
    for node in roots {
        let child = builder.build(&node, 0)?;
        scene.root.children.push(child);
    }
    Ok(scene)
}

/// Reject views and accessors reaching past the declared length of their
/// buffer, so every later slice computation stays in range
fn check_ranges(ctx: &DecodeContext<'_>, gltf: &Gltf) -> Result<()> {
    for view in gltf.views() {
        let end = view.offset().checked_add(view.length());
        if end.is_none_or(|end| end > view.buffer().length()) {
            return Err(ctx.decode_failure(format!(
                "buffer view {} reaches past buffer {}",
                view.index(),
                view.buffer().index()
            )));
        }
    }

    for accessor in gltf.accessors() {
        let element = accessor.size();
        let out_of_range = |view: &gltf::buffer::View<'_>, offset: usize, count: usize| {
            let stride = view.stride().unwrap_or(element).max(element);
            let span = match count.checked_sub(1) {
                None => Some(0),
                Some(last) => last.checked_mul(stride).and_then(|n| n.checked_add(element)),
            };
            span.and_then(|span| span.checked_add(offset))
                .is_none_or(|end| end > view.length())
        };

        if let Some(view) = accessor.view() {
            if out_of_range(&view, accessor.offset(), accessor.count()) {
                return Err(ctx.decode_failure(format!(
                    "accessor {} reaches past buffer view {}",
                    accessor.index(),
                    view.index()
                )));
            }
        }
        if let Some(sparse) = accessor.sparse() {
            let values = sparse.values();
            let indices = sparse.indices();
            if out_of_range(&values.view(), values.offset(), sparse.count())
                || indices.offset() > indices.view().length()
            {
                return Err(ctx.decode_failure(format!(
                    "sparse accessor {} reaches past its buffer views",
                    accessor.index()
                )));
            }
        }
    }
    Ok(())
}

fn load_buffers(ctx: &mut DecodeContext<'_>, gltf: &Gltf) -> Result<Buffers> {
    let mut out = Vec::with_capacity(gltf.buffers().len());
    for buffer in gltf.buffers() {
        let label = format!("buffer {}", buffer.index());
        let data: Option<Arc<[u8]>> = match buffer.source() {
            BufferSource::Bin => match gltf.blob.as_deref() {
                Some(blob) => Some(Arc::from(blob)),
                None => return Err(ctx.decode_failure("GLB binary chunk is missing")),
            },
            BufferSource::Uri(uri) if uri.starts_with("data:") => {
                let (_, bytes) = decode_data_uri(uri)
                    .ok_or_else(|| ctx.decode_failure(format!("{} has a malformed data URI", label)))?;
                Some(Arc::from(bytes))
            }
            BufferSource::Uri(uri) => ctx.resolve(uri, &label).map(|r| r.bytes),
        };

        if let Some(bytes) = &data {
            if bytes.len() < buffer.length() {
                return Err(ctx.decode_failure(format!(
                    "{} holds {} bytes, {} declared",
                    label,
                    bytes.len(),
                    buffer.length()
                )));
            }
        }
        debug!(buffer = buffer.index(), loaded = data.is_some(), "glTF buffer");
        out.push(data);
    }
    Ok(out)
}

fn load_images(ctx: &mut DecodeContext<'_>, gltf: &Gltf, buffers: &Buffers) -> Vec<Option<TextureImage>> {
    gltf.images()
        .map(|image| {
            let label = format!("image {}", image.index());
            match image.source() {
                ImageSource::View { view, mime_type } => {
                    let start = view.offset();
                    let end = start.checked_add(view.length())?;
                    let bytes = buffers
                        .get(view.buffer().index())
                        .and_then(|b| b.as_deref())
                        .and_then(|b| b.get(start..end))?;
                    Some(TextureImage {
                        source: format!("buffer view {}", view.index()),
                        mime_type: Some(mime_type.to_string()),
                        bytes: Arc::from(bytes),
                    })
                }
                ImageSource::Uri { uri, mime_type } if uri.starts_with("data:") => {
                    let Some((declared, bytes)) = decode_data_uri(uri) else {
                        ctx.warn(Warning::MissingReference {
                            reference: "data URI".to_string(),
                            referenced_by: label,
                        });
                        return None;
                    };
                    Some(TextureImage {
                        source: "data:".to_string(),
                        mime_type: mime_type.map(str::to_string).or(declared),
                        bytes: Arc::from(bytes),
                    })
                }
                ImageSource::Uri { uri, mime_type } => {
                    let resolved = ctx.resolve(uri, &label)?;
                    Some(TextureImage {
                        source: resolved.path,
                        mime_type: mime_type.map(str::to_string),
                        bytes: resolved.bytes,
                    })
                }
            }
        })
        .collect()
}

/// Decode `data:[<mime>][;base64],<payload>`
fn decode_data_uri(uri: &str) -> Option<(Option<String>, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mut params = header.split(';');
    let mime = params
        .next()
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let bytes = if params.any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD.decode(payload.trim()).ok()?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    Some((mime, bytes))
}

fn convert_material(material: &gltf::Material<'_>, images: &[Option<TextureImage>]) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let texture = pbr
        .base_color_texture()
        .and_then(|info| images.get(info.texture().source().index()).cloned().flatten());
    Material {
        name: material.name().map(str::to_string),
        base_color: Color::from_f32(pbr.base_color_factor()),
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
        double_sided: material.double_sided(),
        flat_shading: false,
        texture,
    }
}

struct NodeBuilder<'b, 'c> {
    ctx: &'b mut DecodeContext<'c>,
    buffers: &'b Buffers,
    materials: &'b [Material],
    budget: SceneBudget,
}

impl NodeBuilder<'_, '_> {
    fn build(&mut self, node: &gltf::Node<'_>, depth: usize) -> Result<SceneNode> {
        if depth > MAX_NODE_DEPTH {
            return Err(self.ctx.decode_failure(format!(
                "node hierarchy deeper than {} levels",
                MAX_NODE_DEPTH
            )));
        }

        self.budget
            .charge(0)
            .map_err(|reason| self.ctx.decode_failure(reason))?;

        let mut group = Group::new(node.name().unwrap_or_default());
        group.transform = node.transform().matrix();

        if let Some(mesh) = node.mesh() {
            let name = mesh.name().or(node.name()).unwrap_or_default();
            for primitive in mesh.primitives() {
                match read_primitive(&primitive, self.buffers) {
                    Ok(geometry) => {
                        self.budget
                            .charge(geometry.triangle_count())
                            .map_err(|reason| self.ctx.decode_failure(reason))?;
                        let mut out = Mesh::new(geometry).with_name(name);
                        if let Some(index) = primitive.material().index() {
                            out.material = self.materials.get(index).cloned();
                        }
                        group.children.push(SceneNode::Mesh(out));
                    }
                    Err(reason) => self.ctx.warn(Warning::EmptyPrimitiveSkipped {
                        mesh: format!("{}#{}", name, primitive.index()),
                        reason,
                    }),
                }
            }
        }

        for child in node.children() {
            let built = self.build(&child, depth + 1)?;
            group.children.push(built);
        }
        Ok(SceneNode::Group(group))
    }
}

fn read_primitive(primitive: &gltf::Primitive<'_>, buffers: &Buffers) -> std::result::Result<Geometry, String> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).and_then(|d| d.as_deref()));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| "vertex positions are unavailable".to_string())?
        .collect();
    let count = positions.len();
    if count == 0 {
        return Err("primitive has no vertices".to_string());
    }

    let raw: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..count as u32).collect(),
    };
    let mut indices = match primitive.mode() {
        Mode::Triangles => raw,
        Mode::TriangleStrip => strip_to_list(&raw),
        Mode::TriangleFan => fan_to_list(&raw),
        other => return Err(format!("{:?} primitives are not rendered", other)),
    };
    indices.truncate(indices.len() - indices.len() % 3);
    if indices.is_empty() {
        return Err("primitive has no triangles".to_string());
    }

    let mut geometry = Geometry {
        positions,
        indices,
        ..Geometry::default()
    };
    if !geometry.indices_in_bounds() {
        return Err("index out of range".to_string());
    }

    if let Some(normals) = reader.read_normals() {
        geometry.normals = normals.collect();
    }
    if geometry.normals.len() != count {
        geometry.compute_vertex_normals();
    }
    if let Some(uvs) = reader.read_tex_coords(0) {
        geometry.uvs = uvs.into_f32().collect();
        if geometry.uvs.len() != count {
            geometry.uvs.clear();
        }
    }
    if let Some(colors) = reader.read_colors(0) {
        geometry.colors = colors.into_rgba_f32().collect();
        if geometry.colors.len() != count {
            geometry.colors.clear();
        }
    }
    Ok(geometry)
}

fn strip_to_list(strip: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(strip.len().saturating_sub(2) * 3);
    for (i, w) in strip.windows(3).enumerate() {
        // Alternate winding so every triangle faces the same way
        if i % 2 == 0 {
            out.extend_from_slice(&[w[0], w[1], w[2]]);
        } else {
            out.extend_from_slice(&[w[1], w[0], w[2]]);
        }
    }
    out
}

fn fan_to_list(fan: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    for i in 1..fan.len().saturating_sub(1) {
        out.extend_from_slice(&[fan[0], fan[i], fan[i + 1]]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::AssetBundle;
    use crate::resolve::{BundleResolver, NoReferences};

    /// One triangle: three VEC3 float positions, 36 bytes
    fn triangle_buffer() -> Vec<u8> {
        let mut out = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn document(buffer_uri: &str, image_uri: Option<&str>) -> String {
        let (images, textures, texture_ref) = match image_uri {
            Some(uri) => (
                format!(r#""images": [{{"uri": "{}"}}],"#, uri),
                r#""textures": [{"source": 0}],"#.to_string(),
                r#", "baseColorTexture": {"index": 0}"#.to_string(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  "scene": 0,
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{{"name": "Body", "mesh": 0, "translation": [0, 0, 5]}}],
  "meshes": [{{"name": "BodyMesh", "primitives": [{{"attributes": {{"POSITION": 0}}, "material": 0}}]}}],
  "materials": [{{"name": "Paint", "pbrMetallicRoughness": {{"baseColorFactor": [1, 0, 0, 1], "metallicFactor": 0.25, "roughnessFactor": 0.75{texture_ref}}}}}],
  {textures}
  {images}
  "accessors": [{{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0]}}],
  "bufferViews": [{{"buffer": 0, "byteLength": 36}}],
  "buffers": [{{"byteLength": 36, "uri": "{buffer_uri}"}}]
}}"#
        )
    }

    fn data_uri(bytes: &[u8]) -> String {
        format!("data:application/octet-stream;base64,{}", STANDARD.encode(bytes))
    }

    #[test]
    fn test_embedded_buffer() {
        let json = document(&data_uri(&triangle_buffer()), None);
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        let scene = decode(&mut ctx).unwrap();

        let meshes = scene.meshes();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].name, "BodyMesh");
        assert_eq!(meshes[0].geometry.indices, vec![0, 1, 2]);
        let material = meshes[0].material.as_ref().unwrap();
        assert_eq!(material.base_color, Color::rgb(255, 0, 0));
        assert_eq!(material.metalness, 0.25);
        assert_eq!(material.roughness, 0.75);
        let SceneNode::Group(body) = &scene.root.children[0] else {
            panic!("expected node group");
        };
        assert_eq!(body.name, "Body");
        assert_eq!(body.transform[3], [0.0, 0.0, 5.0, 1.0]);
        assert!(!scene.has_animations());
    }

    #[test]
    fn test_external_buffer_and_texture() {
        let json = document("model.bin", Some("textures/paint.png"));
        let bundle = AssetBundle::from_entries([
            ("scene.gltf", json.into_bytes()),
            ("model.bin", triangle_buffer()),
            ("textures/paint.png", vec![0x89, b'P', b'N', b'G']),
        ]);
        let resolver = BundleResolver::new(&bundle, "");
        let bytes = bundle.get("scene.gltf").unwrap().clone();
        let mut ctx = DecodeContext::new("scene.gltf", &bytes, &resolver);

        let scene = decode(&mut ctx).unwrap();

        assert!(ctx.warnings.is_empty(), "{:?}", ctx.warnings);
        let texture = scene.meshes()[0]
            .material
            .as_ref()
            .and_then(|m| m.texture.as_ref())
            .unwrap();
        assert_eq!(texture.source, "textures/paint.png");
        assert_eq!(&texture.bytes[..], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_missing_buffer_skips_primitive() {
        let json = document("missing.bin", None);
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        let scene = decode(&mut ctx).unwrap();

        assert_eq!(scene.mesh_count(), 0);
        assert!(matches!(ctx.warnings[0], Warning::MissingReference { .. }));
        assert!(matches!(ctx.warnings[1], Warning::EmptyPrimitiveSkipped { .. }));
    }

    #[test]
    fn test_short_buffer_fails() {
        let json = document(&data_uri(&triangle_buffer()[..20]), None);
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);
        assert!(decode(&mut ctx).is_err());
    }

    /// Binary glTF container with a JSON chunk and a BIN chunk
    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x004E_4942u32.to_le_bytes());
        out.extend_from_slice(&bin);
        out
    }

    /// Triangle positions followed by a 4-byte image, both in buffer 0
    fn document_with_view_image(buffer: &str, image_offset: &str) -> String {
        format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0}}],
  "meshes": [{{"name": "Packed", "primitives": [{{"attributes": {{"POSITION": 0}}, "material": 0}}]}}],
  "materials": [{{"pbrMetallicRoughness": {{"baseColorTexture": {{"index": 0}}}}}}],
  "textures": [{{"source": 0}}],
  "images": [{{"bufferView": 1, "mimeType": "image/png"}}],
  "accessors": [{{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0]}}],
  "bufferViews": [{{"buffer": 0, "byteLength": 36}}, {{"buffer": 0, "byteOffset": {image_offset}, "byteLength": 4}}],
  "buffers": [{{"byteLength": 40{buffer}}}]
}}"#
        )
    }

    fn packed_bytes() -> Vec<u8> {
        let mut bytes = triangle_buffer();
        bytes.extend_from_slice(&[0x89, b'P', b'N', b'G']);
        bytes
    }

    #[test]
    fn test_glb_binary_chunk_with_view_image() {
        let json = document_with_view_image("", "36");
        let bytes = glb(&json, &packed_bytes());
        let mut ctx = DecodeContext::new("part.glb", &bytes, &NoReferences);

        let scene = decode(&mut ctx).unwrap();

        assert!(ctx.warnings.is_empty(), "{:?}", ctx.warnings);
        let mesh = scene.meshes()[0];
        assert_eq!(mesh.name, "Packed");
        assert_eq!(mesh.geometry.positions[1], [1.0, 0.0, 0.0]);
        let texture = mesh
            .material
            .as_ref()
            .and_then(|m| m.texture.as_ref())
            .unwrap();
        assert_eq!(texture.source, "buffer view 1");
        assert_eq!(texture.mime_type.as_deref(), Some("image/png"));
        assert_eq!(&texture.bytes[..], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_image_view_in_data_uri_buffer() {
        let buffer = format!(r#", "uri": "{}""#, data_uri(&packed_bytes()));
        let json = document_with_view_image(&buffer, "36");
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        let scene = decode(&mut ctx).unwrap();

        let texture = scene.meshes()[0]
            .material
            .as_ref()
            .and_then(|m| m.texture.as_ref())
            .unwrap();
        assert_eq!(texture.bytes.len(), 4);
    }

    #[test]
    fn test_overflowing_view_offset_fails() {
        let buffer = format!(r#", "uri": "{}""#, data_uri(&packed_bytes()));
        let json = document_with_view_image(&buffer, "18446744073709551615");
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        let err = decode(&mut ctx).unwrap_err();

        assert!(matches!(err, crate::error::Error::DecodeFailure { .. }));
    }

    #[test]
    fn test_accessor_past_view_fails() {
        let json = document(&data_uri(&triangle_buffer()), None)
            .replace(r#""count": 3"#, r#""count": 4"#);
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        let err = decode(&mut ctx).unwrap_err();

        assert!(matches!(err, crate::error::Error::DecodeFailure { .. }));
    }

    #[test]
    fn test_repeated_children_hit_node_budget() {
        // Every node lists the next one twice: 2^40 paths from the root
        let nodes: Vec<String> = (0..40)
            .map(|i| format!(r#"{{"children": [{}, {}]}}"#, i + 1, i + 1))
            .chain(std::iter::once("{}".to_string()))
            .collect();
        let json = format!(
            r#"{{"asset": {{"version": "2.0"}}, "scenes": [{{"nodes": [0]}}], "nodes": [{}]}}"#,
            nodes.join(", ")
        );
        let mut ctx = DecodeContext::new("scene.gltf", json.as_bytes(), &NoReferences);

        assert!(decode(&mut ctx).is_err());
    }

    #[test]
    fn test_not_gltf_fails() {
        let mut ctx = DecodeContext::new("scene.gltf", b"{ not json", &NoReferences);
        assert!(decode(&mut ctx).is_err());
    }

    #[test]
    fn test_data_uri() {
        let (mime, bytes) = decode_data_uri("data:image/png;base64,AAEC").unwrap();
        assert_eq!(mime.as_deref(), Some("image/png"));
        assert_eq!(bytes, vec![0, 1, 2]);
        let (mime, bytes) = decode_data_uri("data:,a%20b").unwrap();
        assert_eq!(mime, None);
        assert_eq!(bytes, b"a b".to_vec());
        assert!(decode_data_uri("data:;base64,@@@").is_none());
        assert!(decode_data_uri("tex.png").is_none());
    }

    #[test]
    fn test_strip_and_fan() {
        assert_eq!(strip_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 2, 1, 3]);
        assert_eq!(fan_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 0, 2, 3]);
        assert!(fan_to_list(&[0, 1]).is_empty());
    }
}
