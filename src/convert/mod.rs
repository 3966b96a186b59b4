//! Conversions between package versions and the interchange scene graph.
//!
//! - [`triangles`] - list, strip and fan normalisation
//! - [`dedup`] - vertex de-duplication while rebuilding buffers
//! - [`legacy`] - material shim for the version 1 layout
//! - [`version`] - package version conversion
//! - [`scene`] - scene graph import and export

pub mod dedup;
pub mod legacy;
pub mod scene;
pub mod triangles;
pub mod version;

pub use dedup::VertexEmitter;
pub use scene::{
    export_scene, import_scene, InputSemantic, Scene, SceneGeometry, SceneInput, SceneMaterial, SceneNode, ScenePolygons,
    SceneSource,
};
pub use triangles::{normalize, normalize_with_lookup};
pub use version::convert_version;
