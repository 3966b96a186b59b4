//! Error types for the DSCript library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for container, model package and conversion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic or context at a known position
    #[error("Invalid magic at position {pos:#x}: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic { pos: u64, expected: u32, found: u32 },

    /// Unsupported container or package format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Stream is truncated
    #[error("Unexpected end of data at position {0:#x}")]
    UnexpectedEof(u64),

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// An offset or size does not fit the on-disk field
    #[error("Size overflow: {0}")]
    SizeOverflow(String),

    /// No vertex declaration exists for this pair
    #[error("No vertex declaration for format version {version}, vertex type {vertex_type}")]
    UnknownDeclaration { version: u32, vertex_type: u32 },

    /// LOD slot outside of the seven known slots
    #[error("Unknown LOD slot {0}")]
    UnknownLodSlot(usize),

    /// Type mismatch when reading or writing vertex data
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Material handle could not be resolved (strict mode only)
    #[error("Unresolved material handle {index} (source {source_id:#06x})")]
    UnresolvedMaterial { index: u16, source_id: u16 },

    /// Scene graph or format conversion failure
    #[error("Conversion failed at '{node}': {reason}")]
    Conversion { node: String, reason: String },

    /// Node handle does not refer to a live node of the expected kind
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Operation stopped through its cancellation flag
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a conversion error for the given scene node.
    pub fn conversion(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conversion {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// True for malformed-input errors that abort a load or conversion.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. }
                | Self::UnsupportedVersion(_)
                | Self::UnexpectedEof(_)
                | Self::InvalidStructure(_)
                | Self::SizeOverflow(_)
                | Self::Conversion { .. }
        )
    }
}

/// Result type alias for DSCript operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidMagic { pos: 0x10, expected: 0x4B4E4843, found: 0 };
        assert!(e.to_string().contains("0x4b4e4843"));

        let e = Error::UnknownDeclaration { version: 6, vertex_type: 42 };
        assert!(e.to_string().contains("6"));
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_conversion_names_node() {
        let e = Error::conversion("lod_2", "polygon is not a triangle");
        assert!(e.is_format_error());
        assert!(e.to_string().contains("lod_2"));
    }
}
