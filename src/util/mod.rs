//! Utility types and functions shared by every layer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`ByteReader`] / [`ByteWriter`] / [`BinaryRecord`] - little-endian I/O
//! - [`align`] / [`crc32`] - layout and hashing helpers
//! - Math type re-exports from glam plus [`Color`] and [`BBox`]

mod binary;
mod error;
mod math;

pub use binary::*;
pub use error::*;
pub use math::*;
