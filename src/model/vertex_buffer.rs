//! Vertex buffers: fixed-stride raw records under one declaration.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::declaration::{DataType, DeclEntry, UsageType, VertexDeclaration};
use super::format::PackageVersion;
use super::vertex::Vertex;
use crate::util::{Error, Result};

/// Upper bound on declaration entries in a standalone header.
const MAX_HEADER_ENTRIES: usize = 32;

/// Raw vertex records.
///
/// The data length is always `count * declaration.size_of()`.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexBuffer {
    declaration: VertexDeclaration,
    data: Vec<u8>,
}

impl VertexBuffer {
    /// Empty buffer using the fixed declaration for `(version, vertex_type)`.
    pub fn create(version: PackageVersion, vertex_type: u32) -> Result<Self> {
        Ok(Self::with_declaration(VertexDeclaration::lookup(version, vertex_type)?))
    }

    pub fn with_declaration(declaration: VertexDeclaration) -> Self {
        Self {
            declaration,
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn declaration(&self) -> &VertexDeclaration {
        &self.declaration
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.declaration.size_of()
    }

    /// Number of records.
    #[inline]
    pub fn count(&self) -> usize {
        match self.stride() {
            0 => 0,
            stride => self.data.len() / stride,
        }
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Replace the contents with `count` records sliced from `raw`.
    pub fn create_vertices_from_raw(&mut self, raw: &[u8], count: usize) -> Result<()> {
        let len = count * self.stride();
        if raw.len() < len {
            return Err(Error::UnexpectedEof(raw.len() as u64));
        }
        self.data = raw[..len].to_vec();
        Ok(())
    }

    /// Replace the contents by encoding canonical vertices.
    pub fn create_vertices(&mut self, vertices: &[Vertex]) -> Result<()> {
        let stride = self.stride();
        let mut data = vec![0u8; vertices.len() * stride];
        for (v, record) in vertices.iter().zip(data.chunks_exact_mut(stride.max(1))) {
            self.declaration.write_vertex(v, record)?;
        }
        self.data = data;
        Ok(())
    }

    /// Append one vertex; returns its index.
    pub fn push(&mut self, v: &Vertex) -> Result<usize> {
        let record = self.declaration.to_raw(v)?;
        self.data.extend_from_slice(&record);
        Ok(self.count() - 1)
    }

    /// Append raw records of the same declaration.
    pub fn extend_raw(&mut self, raw: &[u8]) -> Result<()> {
        if raw.len() % self.stride().max(1) != 0 {
            return Err(Error::invalid(format!(
                "{} bytes is not a whole number of {}-byte records",
                raw.len(),
                self.stride()
            )));
        }
        self.data.extend_from_slice(raw);
        Ok(())
    }

    /// Raw record `index`.
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        let stride = self.stride();
        self.data.get(index * stride..(index + 1) * stride)
    }

    /// Raw bytes of `count` records starting at `start`.
    pub fn records(&self, start: usize, count: usize) -> Result<&[u8]> {
        let stride = self.stride();
        self.data
            .get(start * stride..(start + count) * stride)
            .ok_or_else(|| Error::invalid(format!("vertex range {start}+{count} exceeds {}", self.count())))
    }

    pub fn vertex(&self, index: usize) -> Result<Vertex> {
        let record = self
            .record(index)
            .ok_or_else(|| Error::invalid(format!("vertex {index} out of range ({})", self.count())))?;
        self.declaration.to_vertex(record)
    }

    /// Decode every record.
    pub fn to_vertices(&self) -> Result<Vec<Vertex>> {
        self.data
            .chunks_exact(self.stride().max(1))
            .map(|r| self.declaration.to_vertex(r))
            .collect()
    }

    /// Write the records, optionally preceded by a standalone header
    /// (count, byte size, entry count, then one 4-byte descriptor per entry).
    pub fn write_to<W: Write>(&self, out: &mut W, with_header: bool) -> Result<()> {
        if with_header {
            out.write_u32::<LittleEndian>(self.count() as u32)?;
            out.write_u32::<LittleEndian>(self.data.len() as u32)?;
            let entries = self.declaration.entries();
            out.write_u32::<LittleEndian>(entries.len() as u32)?;
            for entry in entries {
                out.write_u8(entry.data_type as u8)?;
                out.write_u8(entry.usage as u8)?;
                out.write_u8(entry.index)?;
                out.write_u8(0)?;
            }
        }
        out.write_all(&self.data)?;
        Ok(())
    }

    /// Read a buffer written by `write_to(.., true)`.
    ///
    /// Header sizes are never trusted for allocation: the record bytes are
    /// read incrementally and a short input is an [`Error::UnexpectedEof`].
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let count = input.read_u32::<LittleEndian>()? as u64;
        let size = input.read_u32::<LittleEndian>()? as u64;
        let entry_count = input.read_u32::<LittleEndian>()?;
        if entry_count as usize > MAX_HEADER_ENTRIES {
            return Err(Error::invalid(format!(
                "vertex buffer header declares {entry_count} entries (max {MAX_HEADER_ENTRIES})"
            )));
        }
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let data_type = DataType::from_u8(input.read_u8()?)?;
            let usage = UsageType::from_u8(input.read_u8()?)?;
            let index = input.read_u8()?;
            input.read_u8()?;
            entries.push(DeclEntry::new(data_type, usage, index));
        }
        let declaration = VertexDeclaration::new(&entries);
        if count.checked_mul(declaration.size_of() as u64) != Some(size) {
            return Err(Error::invalid(format!(
                "vertex buffer header: {count} x {} != {size} bytes",
                declaration.size_of()
            )));
        }
        let mut data = Vec::new();
        input.take(size).read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(Error::UnexpectedEof(data.len() as u64));
        }
        Ok(Self { declaration, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Color, Vec2, Vec3};

    fn quad() -> Vec<Vertex> {
        (0..4)
            .map(|i| Vertex {
                position: Vec3::new(i as f32, 0.0, 0.0),
                normal: Vec3::Y,
                uv: Vec2::new(i as f32 * 0.25, 0.0),
                color: Color::WHITE,
                ..Vertex::default()
            })
            .collect()
    }

    #[test]
    fn test_stride_invariant() {
        let mut vb = VertexBuffer::create(PackageVersion::V6, 1).unwrap();
        vb.create_vertices(&quad()).unwrap();
        assert_eq!(vb.count(), 4);
        assert_eq!(vb.size(), vb.count() * vb.declaration().size_of());
        vb.push(&Vertex::default()).unwrap();
        assert_eq!(vb.size(), 5 * 36);
    }

    #[test]
    fn test_vertices_roundtrip() {
        let mut vb = VertexBuffer::create(PackageVersion::V6, 1).unwrap();
        vb.create_vertices(&quad()).unwrap();
        assert_eq!(vb.to_vertices().unwrap(), quad());
        assert_eq!(vb.vertex(2).unwrap().uv, Vec2::new(0.5, 0.0));
        assert!(vb.vertex(4).is_err());
    }

    #[test]
    fn test_from_raw() {
        let mut vb = VertexBuffer::create(PackageVersion::V1, 0).unwrap();
        let raw = vec![0u8; 32 * 3 + 5];
        vb.create_vertices_from_raw(&raw, 3).unwrap();
        assert_eq!(vb.count(), 3);
        assert!(vb.create_vertices_from_raw(&raw, 4).is_err());
    }

    #[test]
    fn test_standalone_header() {
        let mut vb = VertexBuffer::create(PackageVersion::V9, 2).unwrap();
        vb.create_vertices(&quad()).unwrap();
        let mut out = Vec::new();
        vb.write_to(&mut out, true).unwrap();
        assert_eq!(out.len(), 12 + 5 * 4 + 4 * 52);
        assert_eq!(&out[0..4], &4u32.to_le_bytes());

        let back = VertexBuffer::read_from(&mut out.as_slice()).unwrap();
        assert_eq!(back, vb);

        let mut plain = Vec::new();
        vb.write_to(&mut plain, false).unwrap();
        assert_eq!(plain, vb.as_bytes());
    }

    #[test]
    fn test_standalone_header_sizes_checked() {
        let mut vb = VertexBuffer::create(PackageVersion::V9, 2).unwrap();
        vb.create_vertices(&quad()).unwrap();
        let mut out = Vec::new();
        vb.write_to(&mut out, true).unwrap();

        // records cut short
        let cut = &out[..out.len() - 10];
        assert!(matches!(
            VertexBuffer::read_from(&mut &cut[..]),
            Err(Error::UnexpectedEof(_))
        ));

        // huge count with a matching size and no data behind it
        let stride = vb.declaration().size_of() as u32;
        let count = u32::MAX / stride;
        let mut hostile = out.clone();
        hostile[0..4].copy_from_slice(&count.to_le_bytes());
        hostile[4..8].copy_from_slice(&(count * stride).to_le_bytes());
        assert!(matches!(
            VertexBuffer::read_from(&mut hostile.as_slice()),
            Err(Error::UnexpectedEof(_))
        ));

        let mut many = out.clone();
        many[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(VertexBuffer::read_from(&mut many.as_slice()).is_err());
    }
}
