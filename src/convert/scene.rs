//! Interchange scene graph and its conversion to and from model packages.
//!
//! The graph mirrors what a COLLADA document holds once parsed: a node
//! hierarchy, geometries made of float sources, and polygon groups that
//! index those sources through per-input offsets.
//!
//! ```text
//! root
//! └── model node (uid)
//!     └── 1..=7 LOD nodes, in slot order
//!         └── instance node (transform + geometry)
//!             └── polygon group ─► one triangle-list SubModel
//! ```

use crate::model::{
    IndexBufferBuilder, LodInstance, LodSlot, Material, MaterialHandle, MaterialSource, Model, ModelPackage,
    PackageVersion, PrimitiveType, SubModel, UsageType, Vertex, VertexBuffer, LOD_SLOTS,
};
use crate::util::{Color, Error, Mat4, Result, Vec2, Vec4};

use super::dedup::VertexEmitter;

/// Vertex semantic of a polygon input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSemantic {
    Position,
    Normal,
    TexCoord,
    Color,
}

/// Flat float array read in groups of `stride`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneSource {
    pub id: String,
    pub stride: usize,
    pub data: Vec<f32>,
}

impl SceneSource {
    pub fn new(id: impl Into<String>, stride: usize, data: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            stride,
            data,
        }
    }

    pub fn count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    /// Element `index`, zero-extended to four components.
    fn get(&self, index: usize) -> Option<Vec4> {
        let start = index.checked_mul(self.stride)?;
        let values = self.data.get(start..start + self.stride)?;
        let mut v = [0f32; 4];
        for (dst, src) in v.iter_mut().zip(values) {
            *dst = *src;
        }
        Some(Vec4::from_array(v))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneInput {
    pub semantic: InputSemantic,
    /// Semantic set, e.g. the UV channel.
    pub set: u8,
    /// Position of this input's index within each polygon corner.
    pub offset: usize,
    /// Id of a source of the owning geometry.
    pub source: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenePolygons {
    /// Name of a [`SceneMaterial`], or none.
    pub material: Option<String>,
    pub inputs: Vec<SceneInput>,
    /// Corner count per polygon.
    pub vcount: Vec<u32>,
    /// Interleaved corner indices, one per input offset.
    pub p: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneGeometry {
    pub id: String,
    pub sources: Vec<SceneSource>,
    pub polygons: Vec<ScenePolygons>,
}

impl SceneGeometry {
    fn source(&self, id: &str) -> Option<&SceneSource> {
        self.sources.iter().find(|s| s.id == id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneNode {
    pub id: String,
    /// Model UID on model nodes.
    pub uid: Option<u32>,
    pub transform: Mat4,
    pub geometry: Option<SceneGeometry>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uid: None,
            transform: Mat4::IDENTITY,
            geometry: None,
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneMaterial {
    pub name: String,
    pub material: Material,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub root: Option<SceneNode>,
    pub materials: Vec<SceneMaterial>,
}

/// Build a package from a scene.
///
/// Nothing is returned unless the whole scene converts; errors name the
/// offending node.
pub fn import_scene(scene: &Scene, version: PackageVersion, vertex_type: u32) -> Result<ModelPackage> {
    let root = scene
        .root
        .as_ref()
        .ok_or_else(|| Error::conversion("<scene>", "missing root node"))?;

    let mut pkg = ModelPackage::new(version, 0, vertex_type)?;
    pkg.materials = scene.materials.iter().map(|m| m.material.clone()).collect();

    let mut emitter = VertexEmitter::new();
    let mut indices = IndexBufferBuilder::new();

    for (m, model_node) in root.children.iter().enumerate() {
        let lods = &model_node.children;
        if lods.is_empty() || lods.len() > LOD_SLOTS {
            return Err(Error::conversion(
                &model_node.id,
                format!("model needs 1 to {LOD_SLOTS} LOD nodes, found {}", lods.len()),
            ));
        }
        let mut model = Model::new(model_node.uid.unwrap_or(m as u32 + 1), version)?;
        for (slot, lod_node) in lods.iter().enumerate() {
            for instance_node in &lod_node.children {
                let geometry = instance_node
                    .geometry
                    .as_ref()
                    .ok_or_else(|| Error::conversion(&instance_node.id, "instance has no geometry"))?;
                let mut instance = LodInstance {
                    transform: instance_node.transform,
                    use_transform: instance_node.transform != Mat4::IDENTITY,
                    ..LodInstance::default()
                };
                for polygons in &geometry.polygons {
                    let material = material_handle(scene, polygons, &instance_node.id)?;
                    let sm = import_polygons(geometry, polygons, &instance_node.id, &mut emitter, &mut indices)?;
                    instance.submodels.push(SubModel { material, ..sm });
                }
                model.lods[slot].instances.push(instance);
            }
        }
        pkg.models.push(model);
    }

    let mut vertex_buffer = VertexBuffer::create(version, vertex_type)?;
    vertex_buffer.create_vertices(&emitter.into_vertices())?;
    pkg.vertex_buffer = vertex_buffer;
    pkg.index_buffer = indices.compile();
    pkg.relink();
    pkg.recompute_bounds()?;
    pkg.validate()?;
    tracing::debug!(models = pkg.models.len(), vertices = pkg.vertex_buffer.count(), "scene imported");
    Ok(pkg)
}

fn material_handle(scene: &Scene, polygons: &ScenePolygons, node: &str) -> Result<MaterialHandle> {
    let Some(name) = &polygons.material else {
        return Ok(MaterialHandle::NULL);
    };
    let index = scene
        .materials
        .iter()
        .position(|m| &m.name == name)
        .ok_or_else(|| Error::conversion(node, format!("unknown material '{name}'")))?;
    u16::try_from(index)
        .map(MaterialHandle::local)
        .map_err(|_| Error::conversion(node, "too many materials"))
}

fn import_polygons(
    geometry: &SceneGeometry,
    polygons: &ScenePolygons,
    node: &str,
    emitter: &mut VertexEmitter,
    indices: &mut IndexBufferBuilder,
) -> Result<SubModel> {
    if let Some(n) = polygons.vcount.iter().find(|&&n| n != 3) {
        return Err(Error::conversion(node, format!("polygon with {n} corners is not a triangle")));
    }
    if !polygons.inputs.iter().any(|i| i.semantic == InputSemantic::Position) {
        return Err(Error::conversion(node, "polygons have no POSITION input"));
    }
    let inputs = polygons
        .inputs
        .iter()
        .map(|input| {
            geometry
                .source(&input.source)
                .map(|s| (input, s))
                .ok_or_else(|| Error::conversion(node, format!("missing source '{}'", input.source)))
        })
        .collect::<Result<Vec<_>>>()?;

    let stride = polygons.inputs.iter().map(|i| i.offset + 1).max().unwrap_or(1);
    let corners = polygons.vcount.len() * 3;
    if polygons.p.len() != corners * stride {
        return Err(Error::conversion(
            node,
            format!("{} corner indices for {corners} corners of {stride} inputs", polygons.p.len()),
        ));
    }

    emitter.begin_window();
    let index_offset = u32::try_from(indices.len()).map_err(|_| Error::conversion(node, "index buffer full"))?;
    for corner in polygons.p.chunks_exact(stride) {
        let mut v = Vertex::default();
        for (input, source) in &inputs {
            let index = corner[input.offset] as usize;
            let value = source.get(index).ok_or_else(|| {
                Error::conversion(
                    node,
                    format!("index {index} out of range of source '{}' ({})", source.id, source.count()),
                )
            })?;
            match (input.semantic, input.set) {
                (InputSemantic::Position, _) => v.position = value.truncate(),
                (InputSemantic::Normal, _) => v.normal = value.truncate(),
                (InputSemantic::TexCoord, 0) => v.uv = Vec2::new(value.x, value.y),
                (InputSemantic::TexCoord, _) => v.uv1 = Vec2::new(value.x, value.y),
                (InputSemantic::Color, _) => v.color = to_color(value),
            }
        }
        let i = emitter
            .emit(v)
            .map_err(|_| Error::conversion(node, "more than 65536 vertices in one polygon group"))?;
        indices.push(i);
    }

    let start = u32::try_from(emitter.window_start()).map_err(|_| Error::conversion(node, "vertex buffer full"))?;
    Ok(SubModel {
        primitive: PrimitiveType::TriangleList,
        vertex_base: start as i32,
        vertex_offset: start,
        vertex_count: emitter.window_len() as u32,
        index_offset,
        primitive_count: polygons.vcount.len() as u32,
        material: MaterialHandle::NULL,
    })
}

fn to_color(v: Vec4) -> Color {
    let c = (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    Color::new(c.x as u8, c.y as u8, c.z as u8, c.w as u8)
}

/// Scene holding every model of `pkg` as triangle lists.
///
/// Only local materials are carried over; other handles export without one.
pub fn export_scene(pkg: &ModelPackage) -> Result<Scene> {
    let decl = pkg.declaration();
    let materials = pkg
        .materials
        .iter()
        .enumerate()
        .map(|(i, m)| SceneMaterial {
            name: format!("material_{i}"),
            material: m.clone(),
        })
        .collect();

    let mut root = SceneNode::new("scene");
    for model in &pkg.models {
        let model_id = format!("model_{:08x}", model.uid);
        let mut model_node = SceneNode::new(&model_id);
        model_node.uid = Some(model.uid);

        let used = model.lods.iter().rposition(|l| !l.is_empty()).map_or(1, |last| last + 1);
        for lod in &model.lods[..used] {
            let slot = LodSlot::from_index(lod.slot)?;
            let lod_id = format!("{model_id}_{}", slot.name());
            let mut lod_node = SceneNode::new(&lod_id);
            for (k, instance) in lod.instances.iter().enumerate() {
                let id = format!("{lod_id}_{k}");
                let mut node = SceneNode::new(&id);
                node.transform = instance.placement();
                node.geometry = Some(export_instance(pkg, instance, &id)?);
                lod_node.children.push(node);
            }
            model_node.children.push(lod_node);
        }
        root.children.push(model_node);
    }
    tracing::debug!(models = pkg.models.len(), stride = decl.size_of(), "scene exported");
    Ok(Scene {
        root: Some(root),
        materials,
    })
}

fn export_instance(pkg: &ModelPackage, instance: &LodInstance, id: &str) -> Result<SceneGeometry> {
    let decl = pkg.declaration();
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut colors = Vec::new();
    let mut polygons = Vec::new();

    let mut base = 0u32;
    for sm in &instance.submodels {
        for v in pkg.submodel_vertices(sm)? {
            positions.extend(v.position.to_array());
            normals.extend(v.normal.to_array());
            uvs.extend(v.uv.to_array());
            colors.extend(v.color.to_vec4().to_array());
        }
        let triangles = pkg.submodel_triangles(sm)?;
        let p = triangles
            .iter()
            .flatten()
            .map(|&v| {
                v.checked_sub(sm.vertex_offset)
                    .map(|local| local + base)
                    .ok_or_else(|| Error::conversion(id, format!("vertex {v} below range start {}", sm.vertex_offset)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut group = ScenePolygons {
            material: match sm.material.source_kind(pkg.uid) {
                MaterialSource::Local if (sm.material.index as usize) < pkg.materials.len() => {
                    Some(format!("material_{}", sm.material.index))
                }
                _ => None,
            },
            inputs: vec![input(InputSemantic::Position, format!("{id}_positions"))],
            vcount: vec![3; triangles.len()],
            p,
        };
        if decl.has_type(UsageType::Normal, 0) {
            group.inputs.push(input(InputSemantic::Normal, format!("{id}_normals")));
        }
        if decl.has_type(UsageType::TextureCoordinate, 0) {
            group.inputs.push(input(InputSemantic::TexCoord, format!("{id}_uvs")));
        }
        if decl.has_type(UsageType::Color, 0) {
            group.inputs.push(input(InputSemantic::Color, format!("{id}_colors")));
        }
        polygons.push(group);
        base += sm.vertex_count;
    }

    let mut sources = vec![SceneSource::new(format!("{id}_positions"), 3, positions)];
    if decl.has_type(UsageType::Normal, 0) {
        sources.push(SceneSource::new(format!("{id}_normals"), 3, normals));
    }
    if decl.has_type(UsageType::TextureCoordinate, 0) {
        sources.push(SceneSource::new(format!("{id}_uvs"), 2, uvs));
    }
    if decl.has_type(UsageType::Color, 0) {
        sources.push(SceneSource::new(format!("{id}_colors"), 4, colors));
    }
    Ok(SceneGeometry {
        id: format!("{id}_mesh"),
        sources,
        polygons,
    })
}

fn input(semantic: InputSemantic, source: String) -> SceneInput {
    SceneInput {
        semantic,
        set: 0,
        offset: 0,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quad_package;
    use crate::util::Vec3;

    fn triangle_scene() -> Scene {
        let geometry = SceneGeometry {
            id: "tri".into(),
            sources: vec![
                SceneSource::new("pos", 3, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                SceneSource::new("nrm", 3, vec![0.0, 0.0, 1.0]),
            ],
            polygons: vec![ScenePolygons {
                material: Some("paint".into()),
                inputs: vec![
                    SceneInput {
                        semantic: InputSemantic::Position,
                        set: 0,
                        offset: 0,
                        source: "pos".into(),
                    },
                    SceneInput {
                        semantic: InputSemantic::Normal,
                        set: 0,
                        offset: 1,
                        source: "nrm".into(),
                    },
                ],
                vcount: vec![3, 3],
                // second triangle repeats the first corner set
                p: vec![0, 0, 1, 0, 2, 0, 0, 0, 2, 0, 1, 0],
            }],
        };
        let mut instance = SceneNode::new("body_high_0");
        instance.geometry = Some(geometry);
        let mut lod = SceneNode::new("body_high");
        lod.children.push(instance);
        let mut model = SceneNode::new("body");
        model.uid = Some(0x42);
        model.children.push(lod);
        let mut root = SceneNode::new("scene");
        root.children.push(model);
        Scene {
            root: Some(root),
            materials: vec![SceneMaterial {
                name: "paint".into(),
                material: Material::default(),
            }],
        }
    }

    #[test]
    fn test_import_dedups_corners() {
        let pkg = import_scene(&triangle_scene(), PackageVersion::V6, 0).unwrap();
        assert_eq!(pkg.models[0].uid, 0x42);
        assert_eq!(pkg.vertex_buffer.count(), 3);
        let sm = *pkg.submodels().next().unwrap();
        assert_eq!(sm.material, MaterialHandle::local(0));
        assert_eq!(pkg.submodel_triangles(&sm).unwrap(), vec![[0, 1, 2], [0, 2, 1]]);
        assert_eq!(pkg.vertex_buffer.vertex(1).unwrap().normal, Vec3::Z);
    }

    #[test]
    fn test_import_errors_name_node() {
        let mut scene = triangle_scene();
        scene.root = None;
        let err = import_scene(&scene, PackageVersion::V6, 0).unwrap_err();
        assert!(matches!(err, Error::Conversion { ref node, .. } if node == "<scene>"));

        let mut scene = triangle_scene();
        let instance = &mut scene.root.as_mut().unwrap().children[0].children[0].children[0];
        instance.geometry.as_mut().unwrap().polygons[0].vcount = vec![4];
        let err = import_scene(&scene, PackageVersion::V6, 0).unwrap_err();
        assert!(matches!(err, Error::Conversion { ref node, .. } if node == "body_high_0"));

        let mut scene = triangle_scene();
        scene.materials.clear();
        assert!(import_scene(&scene, PackageVersion::V6, 0).unwrap_err().is_format_error());

        let mut scene = triangle_scene();
        scene.root.as_mut().unwrap().children[0].children.clear();
        let err = import_scene(&scene, PackageVersion::V6, 0).unwrap_err();
        assert!(matches!(err, Error::Conversion { ref node, .. } if node == "body"));

        fn polygons(scene: &mut Scene) -> &mut ScenePolygons {
            let instance = &mut scene.root.as_mut().unwrap().children[0].children[0].children[0];
            &mut instance.geometry.as_mut().unwrap().polygons[0]
        }
        let mut scene = triangle_scene();
        polygons(&mut scene).p[2] = 9;
        assert!(import_scene(&scene, PackageVersion::V6, 0).is_err());
        polygons(&mut scene).inputs.remove(0);
        let err = import_scene(&scene, PackageVersion::V6, 0).unwrap_err();
        assert!(err.to_string().contains("POSITION"));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let pkg = quad_package();
        let scene = export_scene(&pkg).unwrap();
        let root = scene.root.as_ref().unwrap();
        assert_eq!(root.children[0].id, "model_00000001");
        assert_eq!(root.children[0].children.len(), 1);

        let back = import_scene(&scene, pkg.version, pkg.vertex_type).unwrap();
        let sm = *back.submodels().next().unwrap();
        assert_eq!(back.submodel_triangles(&sm).unwrap(), vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(back.vertex_buffer.to_vertices().unwrap(), pkg.vertex_buffer.to_vertices().unwrap());
        assert_eq!(sm.material, MaterialHandle::NULL);
    }
}
