//! # DSCript
//!
//! Rust implementation of the DSCript chunk container ("spooler") format and
//! the model packages stored inside it.
//!
//! The formats belong to a shipped game engine; files written here are meant
//! to load back into it, so every layout follows the engine byte for byte.
//!
//! ## Modules
//!
//! - [`util`] - Errors, little-endian I/O, math types
//! - [`spooler`] - Chunk container: node tree, payload spilling, load and save
//! - [`model`] - Vertex declarations, buffers, model package graph and codec
//! - [`convert`] - Version conversion and interchange scene import/export
//! - [`core`] - Settings and the texture cache
//!
//! ## Example
//!
//! ```ignore
//! use dscript::prelude::*;
//!
//! let file = SpoolerFile::open("vehicles.vvv")?;
//! for id in find_model_packages(&file) {
//!     let pkg = ModelPackage::from_spooler(&file, id)?;
//!     println!("{:#x}: {} models", pkg.uid, pkg.models.len());
//! }
//! ```

pub mod util;
pub mod spooler;
pub mod model;
pub mod convert;
pub mod core;

// Re-export commonly used types
pub use util::{Error, Result};
pub use spooler::{SpoolerFile, SpoolerId, SpoolerTree};
pub use model::ModelPackage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::spooler::{context, SpoolerFile, SpoolerId, SpoolerOptions, SpoolerTree};
    pub use crate::model::{
        find_model_packages, MaterialResolver, ModelPackage, PackageVersion, VertexBuffer, VertexDeclaration,
    };
    pub use crate::convert::{convert_version, export_scene, import_scene};
    pub use crate::core::{Settings, TextureCache};
}
