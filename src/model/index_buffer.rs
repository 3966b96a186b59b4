//! Index buffers shared by every submodel of a package.

use std::io::Write;
use std::ops::Range;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::util::{Error, Result};

/// Immutable array of 16-bit vertex indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexBuffer {
    indices: Arc<[u16]>,
}

impl IndexBuffer {
    /// Parse `count` little-endian indices.
    pub fn from_bytes(data: &[u8], count: usize) -> Result<Self> {
        if data.len() < count * 2 {
            return Err(Error::UnexpectedEof(data.len() as u64));
        }
        let mut indices = vec![0u16; count];
        LittleEndian::read_u16_into(&data[..count * 2], &mut indices);
        Ok(Self { indices: indices.into() })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.indices
    }

    /// Indices in `range`, or an error if it runs past the end.
    pub fn range(&self, range: Range<usize>) -> Result<&[u16]> {
        let len = self.len();
        self.indices
            .get(range.clone())
            .ok_or_else(|| Error::invalid(format!("index range {range:?} exceeds {len}")))
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.indices.len() * 2
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for &i in self.indices.iter() {
            out.write_u16::<LittleEndian>(i)?;
        }
        Ok(())
    }

    pub fn to_builder(&self) -> IndexBufferBuilder {
        IndexBufferBuilder {
            indices: self.indices.to_vec(),
        }
    }
}

impl From<Vec<u16>> for IndexBuffer {
    fn from(indices: Vec<u16>) -> Self {
        Self { indices: indices.into() }
    }
}

/// Growable index list that compiles into an [`IndexBuffer`].
#[derive(Clone, Debug, Default)]
pub struct IndexBufferBuilder {
    indices: Vec<u16>,
}

impl IndexBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn push(&mut self, index: u16) {
        self.indices.push(index);
    }

    pub fn extend(&mut self, indices: impl IntoIterator<Item = u16>) {
        self.indices.extend(indices);
    }

    pub fn compile(self) -> IndexBuffer {
        IndexBuffer::from(self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_bytes() {
        let mut b = IndexBufferBuilder::new();
        b.extend([0, 1, 2]);
        b.push(0x1234);
        let ib = b.compile();
        assert_eq!(ib.len(), 4);

        let mut out = Vec::new();
        ib.write_to(&mut out).unwrap();
        assert_eq!(&out[6..8], &[0x34, 0x12]);
        assert_eq!(IndexBuffer::from_bytes(&out, 4).unwrap(), ib);
        assert!(IndexBuffer::from_bytes(&out, 5).is_err());
    }

    #[test]
    fn test_range() {
        let ib = IndexBuffer::from(vec![5, 6, 7]);
        assert_eq!(ib.range(1..3).unwrap(), &[6, 7]);
        assert!(ib.range(2..4).is_err());
    }
}
