//! Model package format versions and fixed layout constants.

use std::fmt;

use crate::util::{Error, Result};

/// Layout family shared by several package versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    /// Legacy layout (version 1).
    A,
    /// Current layout (versions 6 and 9).
    B,
}

/// Model package format version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum PackageVersion {
    V1 = 1,
    V6 = 6,
    V9 = 9,
}

impl PackageVersion {
    pub const ALL: [Self; 3] = [Self::V1, Self::V6, Self::V9];

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            6 => Ok(Self::V6),
            9 => Ok(Self::V9),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn family(self) -> Family {
        match self {
            Self::V1 => Family::A,
            Self::V6 | Self::V9 => Family::B,
        }
    }

    /// Size of the fixed header.
    #[inline]
    pub const fn header_size(self) -> usize {
        match self.family() {
            Family::A => 0x50,
            Family::B => 0x60,
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u32())
    }
}

/// Number of LOD slots per model.
pub const LOD_SLOTS: usize = 7;

/// Size of the vertex and index buffer descriptors.
pub const DESCRIPTOR_SIZE: usize = 0x10;

/// Alignment of the vertex, index and texture data regions.
pub const DATA_ALIGNMENT: u64 = 16;

/// Size of the reserved header tail in Family B packages.
pub const RESERVED_HEADER_SIZE: usize = 0x10;

/// Material handle sources with special meaning.
pub mod source {
    /// Material lives in this package (the package UID's low half also works).
    pub const LOCAL: u16 = 0xFFFF;
    /// Material lives in the shared vehicle globals package.
    pub const GLOBALS: u16 = 0xCCCC;
    /// No material at all.
    pub const NULL: u16 = 0xFFFD;
}
