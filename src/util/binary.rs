//! Little-endian binary primitives shared by the container and package codecs.
//!
//! Everything here works on in-memory byte slices: container payloads are
//! either mapped or rehydrated before they are interpreted, so a bounds-checked
//! cursor is all the readers need.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Mat4, Vec2, Vec3, Vec4};

use super::{Error, Result};

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; 0 and 1 leave the value unchanged.
#[inline]
pub const fn align(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

/// CRC32 (IEEE) of a byte range, used as the texture content hash.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Bounds-checked little-endian reader over a byte slice.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    /// Create a reader positioned at `pos`.
    pub fn at(data: &'a [u8], pos: u64) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.seek(pos)?;
        Ok(reader)
    }

    /// Current position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Total length of the underlying data.
    #[inline]
    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    /// True if the underlying data is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Bytes left after the current position.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position())
    }

    /// Move to an absolute position. Seeking to the end is allowed.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len() {
            return Err(Error::UnexpectedEof(pos));
        }
        self.cursor.set_position(pos);
        Ok(())
    }

    fn ensure(&self, len: u64) -> Result<()> {
        if self.remaining() < len {
            Err(Error::UnexpectedEof(self.position() + len))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    pub fn read_vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// Read a 4x4 matrix stored as four row vectors.
    pub fn read_mat4_rows(&mut self) -> Result<Mat4> {
        let r0 = self.read_vec4()?;
        let r1 = self.read_vec4()?;
        let r2 = self.read_vec4()?;
        let r3 = self.read_vec4()?;
        Ok(Mat4::from_cols(r0, r1, r2, r3).transpose())
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len as u64)?;
        let start = self.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    /// Read a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}

/// Growable little-endian writer.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Current write position (= bytes written so far).
    #[inline]
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Position as a u32 table offset.
    pub fn offset_u32(&self) -> Result<u32> {
        u32::try_from(self.buf.len())
            .map_err(|_| Error::SizeOverflow(format!("offset {:#x} exceeds 32 bits", self.buf.len())))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buf.write_u8(value)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buf.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buf.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.buf.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_vec2(&mut self, v: Vec2) -> Result<()> {
        self.write_f32(v.x)?;
        self.write_f32(v.y)
    }

    pub fn write_vec3(&mut self, v: Vec3) -> Result<()> {
        self.write_f32(v.x)?;
        self.write_f32(v.y)?;
        self.write_f32(v.z)
    }

    pub fn write_vec4(&mut self, v: Vec4) -> Result<()> {
        self.write_f32(v.x)?;
        self.write_f32(v.y)?;
        self.write_f32(v.z)?;
        self.write_f32(v.w)
    }

    /// Write a 4x4 matrix as four row vectors.
    pub fn write_mat4_rows(&mut self, m: &Mat4) -> Result<()> {
        for i in 0..4 {
            self.write_vec4(m.row(i))?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Append zero bytes up to the next multiple of `alignment`.
    pub fn pad_to(&mut self, alignment: u64) -> Result<()> {
        let target = align(self.position(), alignment);
        self.pad_to_position(target)
    }

    /// Append zero bytes up to an absolute position.
    pub fn pad_to_position(&mut self, pos: u64) -> Result<()> {
        if pos < self.position() {
            return Err(Error::other(format!(
                "cannot pad backwards from {:#x} to {:#x}",
                self.position(),
                pos
            )));
        }
        self.buf.resize(pos as usize, 0);
        Ok(())
    }

    /// Overwrite a previously written u32.
    pub fn patch_u32(&mut self, pos: u64, value: u32) -> Result<()> {
        let pos = pos as usize;
        if pos + 4 > self.buf.len() {
            return Err(Error::UnexpectedEof(pos as u64 + 4));
        }
        self.buf[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// A fixed-size table entry whose layout depends on a format version.
pub trait BinaryRecord: Sized {
    /// Format selector (package version, container version, ...).
    type Version: Copy;

    /// Serialized size of one record.
    fn size(version: Self::Version) -> usize;

    fn read(reader: &mut ByteReader<'_>, version: Self::Version) -> Result<Self>;

    fn write(&self, writer: &mut ByteWriter, version: Self::Version) -> Result<()>;

    /// Read `count` consecutive records starting at `offset`.
    fn read_table(data: &[u8], offset: u32, count: u32, version: Self::Version) -> Result<Vec<Self>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let end = offset as u64 + count as u64 * Self::size(version) as u64;
        if end > data.len() as u64 {
            return Err(Error::UnexpectedEof(end));
        }
        let mut reader = ByteReader::at(data, offset as u64)?;
        (0..count).map(|_| Self::read(&mut reader, version)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0, 16), 0);
        assert_eq!(align(1, 16), 16);
        assert_eq!(align(16, 16), 16);
        assert_eq!(align(17, 4096), 4096);
        assert_eq!(align(5, 1), 5);
        assert_eq!(align(5, 0), 5);
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_read_past_end() {
        let data = [1u8, 2, 3];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert!(matches!(r.read_u32(), Err(Error::UnexpectedEof(6))));
        // failed read leaves the cursor alone
        assert_eq!(r.read_u8().unwrap(), 3);
    }

    #[test]
    fn test_writer_reader_mat4_rows() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let mut w = ByteWriter::new();
        w.write_mat4_rows(&m).unwrap();
        let bytes = w.into_inner();
        // translation lives in the last column, i.e. the 4th float of each row
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 1.0);

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_mat4_rows().unwrap(), m);
    }

    #[test]
    fn test_pad_and_patch() {
        let mut w = ByteWriter::new();
        w.write_u8(0xAA).unwrap();
        w.pad_to(8).unwrap();
        assert_eq!(w.position(), 8);
        w.write_u32(0).unwrap();
        w.patch_u32(8, 0xDEADBEEF).unwrap();
        assert_eq!(&w.as_slice()[8..12], &0xDEADBEEFu32.to_le_bytes());
        assert!(w.pad_to_position(4).is_err());
    }
}
