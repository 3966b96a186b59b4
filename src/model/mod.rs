//! Model packages: the typed asset graph stored in one spooler buffer.
//!
//! ```text
//! ModelPackage
//! ├── models: Model ─► 7 × Lod ─► LodInstance ─► SubModel ──┐
//! ├── materials: Material ─► Substance ─► Texture             │ MaterialHandle
//! ├── vertex_buffer (VertexDeclaration + raw records)  ◄───────┤ vertex range
//! └── index_buffer (u16)                               ◄───────┘ index range
//! ```
//!
//! Layouts differ between two format families: version 1 (Family A) and
//! versions 6 and 9 (Family B). [`PackageVersion`] selects the family, and
//! every table entry implements [`BinaryRecord`](crate::util::BinaryRecord)
//! for both.

mod codec;
mod declaration;
mod format;
mod index_buffer;
mod lod_mask;
mod material;
mod package;
mod resolver;
mod vertex;
mod vertex_buffer;

pub use codec::find_model_packages;
pub use declaration::*;
pub use format::*;
pub use index_buffer::*;
pub use lod_mask::*;
pub use material::*;
pub use package::*;
pub use resolver::*;
pub use vertex::*;
pub use vertex_buffer::*;
