//! Spooler container format constants and the node entry record.

use crate::util::{ByteReader, ByteWriter, Error, Result};

/// Magic at the start of every package block: "CHNK".
pub const CHUNK_MAGIC: u32 = 0x4B4E_4843;

/// Version stored in every package block header.
pub const CHUNK_VERSION: u32 = 3;

/// Size of a package block header (magic, size, count, version).
pub const BLOCK_HEADER_SIZE: u64 = 16;

/// Size of one node entry.
pub const ENTRY_SIZE: u64 = 16;

/// Largest alignment shift a node may declare.
pub const MAX_ALIGNMENT_SHIFT: u8 = 31;

/// Deepest package nesting accepted on load and save (root = 0).
pub const MAX_NESTING_DEPTH: usize = 128;

/// Default payload size above which buffers are spilled to temp files.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 4096;

/// Offset of the root entry in a container file.
pub const ROOT_ENTRY_POS: u64 = 0;

/// Well-known node contexts.
pub mod context {
    /// Top-level container of a vehicle or level archive.
    pub const SPOOLER_ROOT: u32 = 0x0000_1000;
    /// Model package payload (PC layout).
    pub const MODEL_PACKAGE_PC: u32 = 0x0000_0006;
    /// Model package payload, legacy Family A layout.
    pub const MODEL_PACKAGE_PC_LEGACY: u32 = 0x0000_0001;
    /// Package holding the shared vehicle globals model package.
    pub const VEHICLE_GLOBALS: u32 = 0x0000_0003;

    /// True for contexts whose buffer payload is a model package.
    #[inline]
    pub const fn is_model_package(context: u32) -> bool {
        matches!(context, MODEL_PACKAGE_PC | MODEL_PACKAGE_PC_LEGACY)
    }
}

/// One node entry: the header a parent (or the file) stores for a child.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkEntry {
    pub context: u32,
    /// Root: absolute file position. Child: relative to the parent block.
    pub offset: u32,
    pub version: u8,
    pub description_len: u8,
    pub alignment: u8,
    pub reserved: u8,
    pub size: u32,
}

impl ChunkEntry {
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let entry = Self {
            context: reader.read_u32()?,
            offset: reader.read_u32()?,
            version: reader.read_u8()?,
            description_len: reader.read_u8()?,
            alignment: reader.read_u8()?,
            reserved: reader.read_u8()?,
            size: reader.read_u32()?,
        };
        if entry.alignment > MAX_ALIGNMENT_SHIFT {
            return Err(Error::invalid(format!(
                "alignment shift {} of context {:#x} exceeds {}",
                entry.alignment, entry.context, MAX_ALIGNMENT_SHIFT
            )));
        }
        Ok(entry)
    }

    pub fn write(&self, writer: &mut ByteWriter) -> Result<()> {
        writer.write_u32(self.context)?;
        writer.write_u32(self.offset)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.description_len)?;
        writer.write_u8(self.alignment)?;
        writer.write_u8(self.reserved)?;
        writer.write_u32(self.size)
    }

    /// Bytes the description occupies after the payload (text + NUL).
    #[inline]
    pub fn description_footprint(&self) -> u64 {
        description_footprint(self.description_len as usize)
    }
}

/// Bytes a description of `len` bytes occupies after its payload.
#[inline]
pub const fn description_footprint(len: usize) -> u64 {
    if len == 0 {
        0
    } else {
        len as u64 + 1
    }
}

/// Alignment in bytes for a shift.
#[inline]
pub const fn alignment_bytes(shift: u8) -> u64 {
    1u64 << shift
}

/// True if `payload` starts a package block.
#[inline]
pub fn is_package_payload(payload: &[u8]) -> bool {
    payload.len() as u64 >= BLOCK_HEADER_SIZE
        && u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) == CHUNK_MAGIC
}

/// Convert a layout quantity to an on-disk u32 field.
pub(crate) fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::SizeOverflow(format!("{what} {value:#x} exceeds 32 bits")))
}
