//! Integration tests for model packages stored in chunk containers.

use dscript::convert::{
    convert_version, export_scene, import_scene, InputSemantic, Scene, SceneGeometry, SceneInput, SceneMaterial,
    SceneNode, ScenePolygons, SceneSource,
};
use dscript::model::{
    find_model_packages, Family, IndexBuffer, LodInstance, LodSlot, Material, MaterialHandle, Model, ModelPackage,
    PackageVersion, PrimitiveType, SubModel, Substance, Texture, Vertex,
};
use dscript::spooler::{context, SpoolerFile};
use dscript::util::Vec3;

use tempfile::TempDir;

fn geometry(id: &str, positions: Vec<f32>, p: Vec<u32>, material: Option<&str>) -> SceneGeometry {
    let triangles = p.len() / 3;
    SceneGeometry {
        id: id.to_string(),
        sources: vec![SceneSource::new("pos", 3, positions)],
        polygons: vec![ScenePolygons {
            material: material.map(str::to_string),
            inputs: vec![SceneInput {
                semantic: InputSemantic::Position,
                set: 0,
                offset: 0,
                source: "pos".to_string(),
            }],
            vcount: vec![3; triangles],
            p,
        }],
    }
}

/// One model: a quad in the high LOD, a single triangle in the medium LOD.
fn vehicle_scene() -> Scene {
    let mut quad = SceneNode::new("body");
    quad.geometry = Some(geometry(
        "body-mesh",
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
        vec![0, 1, 2, 0, 2, 3],
        Some("paint"),
    ));
    let mut tri = SceneNode::new("body_low");
    tri.geometry = Some(geometry(
        "body-low-mesh",
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        vec![0, 1, 2],
        None,
    ));

    let mut high = SceneNode::new("car_H");
    high.children.push(quad);
    let mut medium = SceneNode::new("car_M");
    medium.children.push(tri);
    let mut model = SceneNode::new("car");
    model.uid = Some(0xCAFE);
    model.children = vec![high, medium];
    let mut root = SceneNode::new("scene");
    root.children.push(model);

    let paint = Material {
        flags: 1,
        animation_speed: 0.0,
        substances: vec![Substance {
            textures: vec![Texture::new(0x10, 2, 2, 0x15, vec![0xFFu8; 16])],
            ..Substance::default()
        }],
    };
    Scene {
        root: Some(root),
        materials: vec![SceneMaterial {
            name: "paint".to_string(),
            material: paint,
        }],
    }
}

fn triangle_positions(pkg: &ModelPackage) -> Vec<[Vec3; 3]> {
    pkg.submodels()
        .flat_map(|sm| pkg.submodel_triangles(sm).unwrap())
        .map(|t| t.map(|i| pkg.vertex_buffer.vertex(i as usize).unwrap().position))
        .collect()
}

#[test]
fn test_model_package_in_container_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vehicle.chunk");

    let pkg = import_scene(&vehicle_scene(), PackageVersion::V6, 0).expect("import");
    let stats = pkg.statistics();
    assert_eq!(stats.vertices, 7, "quad corners are shared");
    assert_eq!(stats.indices, 9);
    assert_eq!(stats.submodels, 2);
    assert_eq!(stats.triangles, 3);
    assert_eq!(stats.lods, 2);

    let mut file = SpoolerFile::create_default().unwrap();
    let root = file.require_root().unwrap();
    let node = file
        .new_buffer(context::MODEL_PACKAGE_PC, 6, 4, pkg.save().unwrap())
        .unwrap();
    file.add_child(root, node).unwrap();
    file.save_as(&path).unwrap();

    let reopened = SpoolerFile::open(&path).unwrap();
    let ids = find_model_packages(&reopened);
    assert_eq!(ids.len(), 1);
    let loaded = ModelPackage::from_spooler(&reopened, ids[0]).expect("load");
    assert_eq!(loaded.statistics(), stats);
    assert_eq!(loaded.models[0].uid, 0xCAFE);
    assert_eq!(triangle_positions(&loaded), triangle_positions(&pkg));
    assert_eq!(loaded.save().unwrap(), pkg.save().unwrap(), "re-save is stable");

    let sms: Vec<SubModel> = loaded.submodels().copied().collect();
    assert_eq!(sms[0].material, MaterialHandle::local(0));
    assert!(sms[1].material.is_null());
}

#[test]
fn test_declaration_stride_from_header() {
    let pkg = ModelPackage::new(PackageVersion::V6, 1, 5).unwrap();
    assert_eq!(pkg.vertex_buffer.stride(), 0x3C);

    let bytes = pkg.save().unwrap();
    let loaded = ModelPackage::load(&bytes).unwrap();
    assert_eq!(loaded.vertex_type, 5);
    assert_eq!(loaded.vertex_buffer.stride(), 0x3C);
}

#[test]
fn test_triangle_fan_submodel() {
    let mut pkg = ModelPackage::new(PackageVersion::V9, 7, 0).unwrap();
    let verts: Vec<Vertex> = (0..5)
        .map(|i| Vertex {
            position: Vec3::new(i as f32, (i % 2) as f32, 0.0),
            ..Vertex::default()
        })
        .collect();
    pkg.vertex_buffer.create_vertices(&verts).unwrap();
    pkg.index_buffer = IndexBuffer::from(vec![0, 1, 2, 3, 4]);
    let mut model = Model::new(1, pkg.version).unwrap();
    model.lod_mut(LodSlot::High).instances.push(LodInstance {
        submodels: vec![SubModel {
            primitive: PrimitiveType::TriangleFan,
            vertex_base: 0,
            vertex_offset: 0,
            vertex_count: 5,
            index_offset: 0,
            primitive_count: 3,
            material: MaterialHandle::NULL,
        }],
        ..LodInstance::default()
    });
    pkg.models.push(model);
    pkg.relink();
    pkg.validate().unwrap();

    let loaded = ModelPackage::load(&pkg.save().unwrap()).unwrap();
    let sm = *loaded.submodels().next().unwrap();
    assert_eq!(sm.primitive, PrimitiveType::TriangleFan);
    assert_eq!(loaded.submodel_triangles(&sm).unwrap(), vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]);
}

#[test]
fn test_index_outside_vertex_range_is_rejected() {
    let mut pkg = import_scene(&vehicle_scene(), PackageVersion::V6, 0).unwrap();
    pkg.index_buffer = IndexBuffer::from(vec![0, 1, 2, 0, 2, 9, 0, 1, 2]);
    assert!(pkg.validate().is_err());
}

#[test]
fn test_scene_export_import_keeps_geometry() {
    let pkg = import_scene(&vehicle_scene(), PackageVersion::V9, 0).unwrap();
    let scene = export_scene(&pkg).unwrap();
    assert_eq!(scene.materials.len(), 1);

    let back = import_scene(&scene, PackageVersion::V9, 0).unwrap();
    assert_eq!(back.statistics().triangles, 3);
    assert_eq!(back.models[0].uid, 0xCAFE);
    assert_eq!(triangle_positions(&back), triangle_positions(&pkg));
}

#[test]
fn test_import_error_names_node() {
    let mut scene = vehicle_scene();
    let root = scene.root.as_mut().unwrap();
    root.children[0].children[1].children[0].geometry = None;
    let err = import_scene(&scene, PackageVersion::V6, 0).unwrap_err();
    assert!(err.to_string().contains("body_low"), "{err}");
}

#[test]
fn test_convert_between_families() {
    let pkg = import_scene(&vehicle_scene(), PackageVersion::V9, 0).unwrap();

    let legacy = convert_version(&pkg, PackageVersion::V1).unwrap();
    assert_eq!(legacy.version.family(), Family::A);
    let reloaded = ModelPackage::load(&legacy.save().unwrap()).unwrap();
    assert_eq!(reloaded.version, PackageVersion::V1);
    assert_eq!(triangle_positions(&reloaded), triangle_positions(&pkg));

    let modern = convert_version(&reloaded, PackageVersion::V6).unwrap();
    assert_eq!(modern.version.family(), Family::B);
    assert_eq!(modern.statistics().triangles, 3);
    assert_eq!(triangle_positions(&modern), triangle_positions(&pkg));
}
