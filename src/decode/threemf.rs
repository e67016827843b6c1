//! 3MF packages
//!
//! A 3MF file is an OPC zip. The root relationships part names the model
//! part; the model XML holds objects (meshes or component assemblies), base
//! materials and the build list that places objects on the plate.

use super::{DecodeContext, SceneBudget};
use crate::error::{Error, Result, Warning};
use crate::format::ModelFormat;
use crate::scene::{Color, Geometry, Group, IDENTITY, Material, Mesh, SceneGraph, SceneNode};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// Relationship type of the 3D model part
pub const MODEL_REL_TYPE: &str = "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel";

const RELS_PATH: &str = "_rels/.rels";
const DEFAULT_MODEL_PATH: &str = "3D/3dmodel.model";
const MAX_MODEL_PART_BYTES: u64 = 512 * 1024 * 1024;
const MAX_COMPONENT_DEPTH: usize = 32;

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<SceneGraph> {
    let model = read_model(ctx.bytes, MAX_MODEL_PART_BYTES).map_err(|e| match e {
        Error::DecodeFailure { .. } => e,
        other => ctx.decode_failure(other),
    })?;
    for object in model.objects.values().filter(|o| o.mixed_properties) {
        let label = if object.name.is_empty() {
            object.id.to_string()
        } else {
            object.name.clone()
        };
        ctx.warn(Warning::MixedTriangleMaterials { object: label });
    }
    build_scene(&model).map_err(|reason| ctx.decode_failure(reason))
}

#[derive(Debug, Default)]
struct Model {
    unit: Option<String>,
    objects: BTreeMap<u32, Object>,
    base_materials: HashMap<u32, Vec<Material>>,
    color_groups: HashMap<u32, Vec<Color>>,
    build: Vec<Placement>,
}

#[derive(Debug, Default)]
struct Object {
    id: u32,
    name: String,
    is_support: bool,
    pid: Option<u32>,
    pindex: Option<usize>,
    mesh: Option<Geometry>,
    components: Vec<Placement>,
    /// Triangles named properties other than the first triangle's
    mixed_properties: bool,
}

#[derive(Debug)]
struct Placement {
    object_id: u32,
    transform: [[f32; 4]; 4],
}

fn read_model(bytes: &[u8], max_part_bytes: u64) -> Result<Model> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let model_path = discover_model_path(&mut archive)?;
    debug!(part = model_path.as_str(), "Reading 3MF model part");

    let file = archive.by_name(&model_path)?;
    let xml = read_part(file, max_part_bytes)?;
    parse_model_xml(&xml)
}

/// Read a whole part as text, failing rather than truncating past `limit`
fn read_part<R: Read>(part: R, limit: u64) -> Result<String> {
    let mut xml = String::new();
    part.take(limit.saturating_add(1)).read_to_string(&mut xml)?;
    if xml.len() as u64 > limit {
        return Err(Error::Xml(format!("model part is larger than {} bytes", limit)));
    }
    Ok(xml)
}

/// Find the model part through the root relationships, falling back to the
/// conventional location when the package has none
fn discover_model_path<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let rels = match archive.by_name(RELS_PATH) {
        Ok(mut file) => {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            content
        }
        Err(_) => return Ok(DEFAULT_MODEL_PATH.to_string()),
    };

    let mut reader = Reader::from_str(&rels);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(ref e) | Event::Start(ref e) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let attrs = parse_attributes(e)?;
                    if attrs.get("Type").map(String::as_str) == Some(MODEL_REL_TYPE) {
                        if let Some(target) = attrs.get("Target") {
                            return Ok(target.trim_start_matches('/').to_string());
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(DEFAULT_MODEL_PATH.to_string())
}

fn parse_model_xml(xml: &str) -> Result<Model> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut model = Model::default();
    let mut buf = Vec::new();
    let mut in_resources = false;
    let mut in_build = false;
    let mut current_object: Option<Object> = None;
    let mut current_mesh: Option<Geometry> = None;
    let mut base_group: Option<(u32, Vec<Material>)> = None;
    let mut color_group: Option<(u32, Vec<Color>)> = None;
    // First per-triangle property of the current mesh, used when the object has none
    let mut triangle_property: Option<(u32, usize)> = None;
    // Effective property of the first triangle, to detect per-triangle materials
    let mut first_effective: Option<Option<(u32, usize)>> = None;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = e.local_name();
                match local.as_ref() {
                    b"model" => {
                        model.unit = parse_attributes(e)?.remove("unit");
                    }
                    b"resources" => in_resources = true,
                    b"build" => in_build = true,
                    b"object" if in_resources => {
                        current_object = Some(parse_object(e)?);
                        triangle_property = None;
                        first_effective = None;
                        if is_empty {
                            finish_object(&mut model, current_object.take(), None, None);
                        }
                    }
                    b"mesh" if current_object.is_some() => {
                        current_mesh = Some(Geometry::default());
                    }
                    b"vertex" => {
                        if let Some(mesh) = current_mesh.as_mut() {
                            mesh.positions.push(parse_vertex(e)?);
                        }
                    }
                    b"triangle" => {
                        if let Some(mesh) = current_mesh.as_mut() {
                            let attrs = parse_attributes(e)?;
                            for key in ["v1", "v2", "v3"] {
                                let index = attrs
                                    .get(key)
                                    .ok_or_else(|| Error::missing_attribute("triangle", key))?
                                    .parse::<u32>()?;
                                mesh.indices.push(index);
                            }
                            let pid = attrs.get("pid").map(|p| p.parse::<u32>()).transpose()?;
                            let p1 = attrs.get("p1").map(|p| p.parse::<usize>()).transpose()?;
                            if triangle_property.is_none() {
                                if let Some(pid) = pid {
                                    triangle_property = Some((pid, p1.unwrap_or(0)));
                                }
                            }
                            if let Some(object) = current_object.as_mut() {
                                let effective = pid
                                    .or(object.pid)
                                    .map(|pid| (pid, p1.or(object.pindex).unwrap_or(0)));
                                match first_effective {
                                    None => first_effective = Some(effective),
                                    Some(first) if first != effective => {
                                        object.mixed_properties = true;
                                    }
                                    Some(_) => {}
                                }
                            }
                        }
                    }
                    b"component" => {
                        if let Some(object) = current_object.as_mut() {
                            object.components.push(parse_placement(e, "component")?);
                        }
                    }
                    b"item" if in_build => {
                        model.build.push(parse_placement(e, "item")?);
                    }
                    b"basematerials" if in_resources => {
                        base_group = Some((required_id(e, "basematerials")?, Vec::new()));
                    }
                    b"base" => {
                        if let Some((_, materials)) = base_group.as_mut() {
                            materials.push(parse_base_material(e)?);
                        }
                    }
                    b"colorgroup" if in_resources => {
                        color_group = Some((required_id(e, "colorgroup")?, Vec::new()));
                    }
                    b"color" => {
                        if let Some((_, colors)) = color_group.as_mut() {
                            let attrs = parse_attributes(e)?;
                            let color = attrs
                                .get("color")
                                .and_then(|c| Color::parse_hex(c))
                                .unwrap_or(Color::rgb(255, 255, 255));
                            colors.push(color);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"resources" => in_resources = false,
                b"build" => in_build = false,
                b"object" => {
                    finish_object(
                        &mut model,
                        current_object.take(),
                        current_mesh.take(),
                        triangle_property.take(),
                    );
                }
                b"basematerials" => {
                    if let Some((id, materials)) = base_group.take() {
                        model.base_materials.insert(id, materials);
                    }
                }
                b"colorgroup" => {
                    if let Some((id, colors)) = color_group.take() {
                        model.color_groups.insert(id, colors);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(model)
}

fn finish_object(
    model: &mut Model,
    object: Option<Object>,
    mesh: Option<Geometry>,
    triangle_property: Option<(u32, usize)>,
) {
    let Some(mut object) = object else {
        return;
    };
    object.mesh = mesh;
    if object.pid.is_none() {
        if let Some((pid, index)) = triangle_property {
            object.pid = Some(pid);
            object.pindex = Some(index);
        }
    }
    model.objects.insert(object.id, object);
}

fn parse_object(e: &BytesStart) -> Result<Object> {
    let attrs = parse_attributes(e)?;
    let id = attrs
        .get("id")
        .ok_or_else(|| Error::missing_attribute("object", "id"))?
        .parse::<u32>()?;

    Ok(Object {
        id,
        name: attrs.get("name").cloned().unwrap_or_default(),
        is_support: attrs.get("type").is_some_and(|t| t == "support"),
        pid: attrs.get("pid").map(|p| p.parse::<u32>()).transpose()?,
        pindex: attrs.get("pindex").map(|p| p.parse::<usize>()).transpose()?,
        ..Object::default()
    })
}

fn parse_vertex(e: &BytesStart) -> Result<[f32; 3]> {
    let attrs = parse_attributes(e)?;
    let coord = |key: &str| -> Result<f32> {
        Ok(attrs
            .get(key)
            .ok_or_else(|| Error::missing_attribute("vertex", key))?
            .parse::<f64>()? as f32)
    };
    Ok([coord("x")?, coord("y")?, coord("z")?])
}

fn parse_placement(e: &BytesStart, element: &str) -> Result<Placement> {
    let attrs = parse_attributes(e)?;
    let object_id = attrs
        .get("objectid")
        .ok_or_else(|| Error::missing_attribute(element, "objectid"))?
        .parse::<u32>()?;
    let transform = match attrs.get("transform") {
        Some(text) => parse_transform(text)?,
        None => IDENTITY,
    };
    Ok(Placement {
        object_id,
        transform,
    })
}

/// 3MF stores a 4x3 row-vector matrix `m00 m01 m02 m10 ... m32`. Read as
/// column-vector convention, each row of three is one column.
fn parse_transform(text: &str) -> Result<[[f32; 4]; 4]> {
    let values = text
        .split_whitespace()
        .map(|s| s.parse::<f64>().map(|v| v as f32))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if values.len() != 12 {
        return Err(Error::Xml(format!(
            "transform must have 12 values, found {}",
            values.len()
        )));
    }
    let mut matrix = IDENTITY;
    for (column, chunk) in values.chunks_exact(3).enumerate() {
        matrix[column][..3].copy_from_slice(chunk);
    }
    Ok(matrix)
}

fn parse_base_material(e: &BytesStart) -> Result<Material> {
    let attrs = parse_attributes(e)?;
    let color = attrs
        .get("displaycolor")
        .and_then(|c| Color::parse_hex(c))
        .unwrap_or(Color::rgb(255, 255, 255));
    let mut material = Material::solid(color);
    material.name = attrs.get("name").cloned();
    Ok(material)
}

fn required_id(e: &BytesStart, element: &str) -> Result<u32> {
    Ok(parse_attributes(e)?
        .get("id")
        .ok_or_else(|| Error::missing_attribute(element, "id"))?
        .parse::<u32>()?)
}

/// Attributes keyed by local name
fn parse_attributes(e: &BytesStart) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|e| Error::Xml(e.to_string()))?
            .to_string();
        let value = std::str::from_utf8(&attr.value)
            .map_err(|e| Error::Xml(e.to_string()))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn build_scene(model: &Model) -> std::result::Result<SceneGraph, String> {
    let mut scene = SceneGraph::new(ModelFormat::ThreeMf);
    scene.root.transform = unit_scale(model.unit.as_deref());
    let mut budget = SceneBudget::default();

    if model.build.is_empty() {
        // No build list: place every printable object once
        for object in model.objects.values().filter(|o| !o.is_support) {
            scene
                .root
                .children
                .push(object_node(model, object, 0, &mut budget)?);
        }
    } else {
        for item in &model.build {
            let object = model
                .objects
                .get(&item.object_id)
                .ok_or_else(|| format!("build item references unknown object {}", item.object_id))?;
            budget.charge(0)?;
            let mut group = Group::new("");
            group.transform = item.transform;
            group.children.push(object_node(model, object, 0, &mut budget)?);
            scene.root.children.push(SceneNode::Group(group));
        }
    }
    Ok(scene)
}

fn object_node(
    model: &Model,
    object: &Object,
    depth: usize,
    budget: &mut SceneBudget,
) -> std::result::Result<SceneNode, String> {
    if depth > MAX_COMPONENT_DEPTH {
        return Err(format!(
            "components of object {} nest deeper than {} levels",
            object.id, MAX_COMPONENT_DEPTH
        ));
    }

    if let Some(geometry) = &object.mesh {
        budget.charge(geometry.triangle_count())?;
        if !geometry.indices_in_bounds() {
            return Err(format!("object {} has a triangle index out of range", object.id));
        }
        let mut geometry = geometry.clone();
        geometry.compute_vertex_normals();
        let mut mesh = Mesh::new(geometry).with_name(object.name.clone());
        mesh.material = object_material(model, object);
        return Ok(SceneNode::Mesh(mesh));
    }

    budget.charge(0)?;
    let mut group = Group::new(object.name.clone());
    for component in &object.components {
        let child = model
            .objects
            .get(&component.object_id)
            .ok_or_else(|| format!("component references unknown object {}", component.object_id))?;
        budget.charge(0)?;
        let mut placed = Group::new("");
        placed.transform = component.transform;
        placed
            .children
            .push(object_node(model, child, depth + 1, budget)?);
        group.children.push(SceneNode::Group(placed));
    }
    Ok(SceneNode::Group(group))
}

fn object_material(model: &Model, object: &Object) -> Option<Material> {
    let pid = object.pid?;
    let index = object.pindex.unwrap_or(0);
    if let Some(material) = model.base_materials.get(&pid).and_then(|m| m.get(index)) {
        return Some(material.clone());
    }
    let color = model.color_groups.get(&pid).and_then(|c| c.get(index))?;
    Some(Material::solid(*color))
}

/// Root transform converting model units to millimeters
fn unit_scale(unit: Option<&str>) -> [[f32; 4]; 4] {
    let scale = match unit.unwrap_or("millimeter") {
        "micron" => 0.001,
        "centimeter" => 10.0,
        "inch" => 25.4,
        "foot" => 304.8,
        "meter" => 1000.0,
        _ => 1.0,
    };
    let mut matrix = IDENTITY;
    for (i, column) in matrix.iter_mut().enumerate().take(3) {
        column[i] = scale;
    }
    matrix
}
