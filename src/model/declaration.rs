//! Vertex declarations.
//!
//! A declaration is an ordered list of `(data type, usage, usage index)`
//! entries. Field offsets are the running sum of the preceding entry sizes
//! and the stride is the total. Records are encoded field by field with
//! explicit little-endian marshaling.
//!
//! Every layout a game version understands is one row of a fixed table,
//! selected by `(package version, vertex type)`.

use byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;

use super::format::{Family, PackageVersion};
use super::vertex::Vertex;
use crate::util::{Color, Error, Result, Vec2, Vec3, Vec4};

/// Storage type of one vertex field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Float = 0,
    Vector2 = 1,
    Vector3 = 2,
    Vector4 = 3,
    /// Packed RGBA8.
    Color = 4,
}

impl DataType {
    /// Size in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Float | Self::Color => 4,
            Self::Vector2 => 8,
            Self::Vector3 => 12,
            Self::Vector4 => 16,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Vector4 => "vector4",
            Self::Color => "color",
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Float,
            1 => Self::Vector2,
            2 => Self::Vector3,
            3 => Self::Vector4,
            4 => Self::Color,
            _ => return Err(Error::invalid(format!("unknown vertex data type {v}"))),
        })
    }
}

/// Semantic meaning of a vertex field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UsageType {
    Position = 0,
    Normal = 1,
    TextureCoordinate = 2,
    BlendWeight = 3,
    Tangent = 4,
    Color = 5,
    BiNormal = 6,
    BlendIndices = 7,
}

impl UsageType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Position,
            1 => Self::Normal,
            2 => Self::TextureCoordinate,
            3 => Self::BlendWeight,
            4 => Self::Tangent,
            5 => Self::Color,
            6 => Self::BiNormal,
            7 => Self::BlendIndices,
            _ => return Err(Error::invalid(format!("unknown vertex usage {v}"))),
        })
    }
}

/// One field of a declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeclEntry {
    pub data_type: DataType,
    pub usage: UsageType,
    pub index: u8,
}

impl DeclEntry {
    pub const fn new(data_type: DataType, usage: UsageType, index: u8) -> Self {
        Self { data_type, usage, index }
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.data_type.size()
    }
}

/// Value types that can be stored in a vertex field.
pub trait VertexElement: Copy {
    const DATA_TYPE: DataType;

    /// Decode from exactly `DATA_TYPE.size()` bytes.
    fn read(bytes: &[u8]) -> Self;

    /// Encode into exactly `DATA_TYPE.size()` bytes.
    fn write(self, bytes: &mut [u8]);
}

impl VertexElement for f32 {
    const DATA_TYPE: DataType = DataType::Float;

    fn read(bytes: &[u8]) -> Self {
        LittleEndian::read_f32(bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f32(bytes, self);
    }
}

impl VertexElement for Vec2 {
    const DATA_TYPE: DataType = DataType::Vector2;

    fn read(bytes: &[u8]) -> Self {
        let mut v = [0f32; 2];
        LittleEndian::read_f32_into(bytes, &mut v);
        Vec2::from_array(v)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f32_into(&self.to_array(), bytes);
    }
}

impl VertexElement for Vec3 {
    const DATA_TYPE: DataType = DataType::Vector3;

    fn read(bytes: &[u8]) -> Self {
        let mut v = [0f32; 3];
        LittleEndian::read_f32_into(bytes, &mut v);
        Vec3::from_array(v)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f32_into(&self.to_array(), bytes);
    }
}

impl VertexElement for Vec4 {
    const DATA_TYPE: DataType = DataType::Vector4;

    fn read(bytes: &[u8]) -> Self {
        let mut v = [0f32; 4];
        LittleEndian::read_f32_into(bytes, &mut v);
        Vec4::from_array(v)
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f32_into(&self.to_array(), bytes);
    }
}

impl VertexElement for Color {
    const DATA_TYPE: DataType = DataType::Color;

    fn read(bytes: &[u8]) -> Self {
        Color::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_bytes());
    }
}

use DataType as D;
use UsageType as U;

const P: DeclEntry = DeclEntry::new(D::Vector3, U::Position, 0);
const P1: DeclEntry = DeclEntry::new(D::Vector3, U::Position, 1);
const N: DeclEntry = DeclEntry::new(D::Vector3, U::Normal, 0);
const N1: DeclEntry = DeclEntry::new(D::Vector3, U::Normal, 1);
const T0: DeclEntry = DeclEntry::new(D::Vector2, U::TextureCoordinate, 0);
const T1: DeclEntry = DeclEntry::new(D::Vector2, U::TextureCoordinate, 1);
const C: DeclEntry = DeclEntry::new(D::Color, U::Color, 0);
const BW: DeclEntry = DeclEntry::new(D::Vector4, U::BlendWeight, 0);
const BI: DeclEntry = DeclEntry::new(D::Color, U::BlendIndices, 0);
const TG: DeclEntry = DeclEntry::new(D::Vector3, U::Tangent, 0);
const BN: DeclEntry = DeclEntry::new(D::Vector3, U::BiNormal, 0);

/// Family A layouts, indexed by vertex type.
const FAMILY_A: &[&[DeclEntry]] = &[
    &[P, N, T0],
    &[P, N, T0, C],
    &[P, N, T0, BW],
    &[P, N, T0, P1, N1],
    &[P, N, T0, TG],
    &[P, C, T0],
];

/// Family B layouts, indexed by vertex type.
const FAMILY_B: &[&[DeclEntry]] = &[
    &[P, N, T0],
    &[P, N, T0, C],
    &[P, N, T0, BW, BI],
    &[P, N, T0, TG, BN],
    &[P, N, T0, C, TG],
    &[P, N, T0, P1, N1, C],
    &[P, N, T0, T1, C],
    &[P, C],
];

fn family_table(family: Family) -> &'static [&'static [DeclEntry]] {
    match family {
        Family::A => FAMILY_A,
        Family::B => FAMILY_B,
    }
}

/// Immutable vertex layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexDeclaration {
    entries: SmallVec<[DeclEntry; 8]>,
    stride: usize,
}

impl VertexDeclaration {
    pub fn new(entries: &[DeclEntry]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
            stride: entries.iter().map(DeclEntry::size).sum(),
        }
    }

    /// Fixed declaration for a package version and vertex type.
    pub fn lookup(version: PackageVersion, vertex_type: u32) -> Result<Self> {
        family_table(version.family())
            .get(vertex_type as usize)
            .map(|entries| Self::new(entries))
            .ok_or(Error::UnknownDeclaration {
                version: version.as_u32(),
                vertex_type,
            })
    }

    /// Number of vertex types known for a version.
    pub fn type_count(version: PackageVersion) -> u32 {
        family_table(version.family()).len() as u32
    }

    /// Smallest declaration of `version`'s family holding every field of `source`.
    ///
    /// Returns the vertex type code together with the declaration.
    pub fn find_compatible(version: PackageVersion, source: &VertexDeclaration) -> Result<(u32, Self)> {
        family_table(version.family())
            .iter()
            .enumerate()
            .map(|(code, entries)| (code as u32, Self::new(entries)))
            .filter(|(_, decl)| source.entries.iter().all(|e| decl.entries.contains(e)))
            .min_by_key(|(code, decl)| (decl.stride, *code))
            .ok_or_else(|| {
                Error::conversion(
                    "vertex declaration",
                    format!("no {version} layout holds {:?}", source.entries.as_slice()),
                )
            })
    }

    #[inline]
    pub fn entries(&self) -> &[DeclEntry] {
        &self.entries
    }

    /// Record size in bytes.
    #[inline]
    pub fn size_of(&self) -> usize {
        self.stride
    }

    fn find(&self, usage: UsageType, index: u8) -> Option<(usize, DeclEntry)> {
        let mut offset = 0;
        for entry in &self.entries {
            if entry.usage == usage && entry.index == index {
                return Some((offset, *entry));
            }
            offset += entry.size();
        }
        None
    }

    /// Byte offset of a field within a record.
    pub fn get_offset(&self, usage: UsageType, index: u8) -> Option<usize> {
        self.find(usage, index).map(|(offset, _)| offset)
    }

    pub fn has_type(&self, usage: UsageType, index: u8) -> bool {
        self.find(usage, index).is_some()
    }

    /// Field present and stored as `T`.
    pub fn has_type_of<T: VertexElement>(&self, usage: UsageType, index: u8) -> bool {
        matches!(self.find(usage, index), Some((_, e)) if e.data_type == T::DATA_TYPE)
    }

    fn check_record(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.stride {
            return Err(Error::invalid(format!(
                "vertex record of {} bytes, declaration stride is {}",
                record.len(),
                self.stride
            )));
        }
        Ok(())
    }

    fn check_type<T: VertexElement>(entry: &DeclEntry) -> Result<()> {
        if entry.data_type != T::DATA_TYPE {
            return Err(Error::TypeMismatch {
                expected: T::DATA_TYPE.name().into(),
                actual: entry.data_type.name().into(),
            });
        }
        Ok(())
    }

    /// Read a field, `None` if the declaration lacks it.
    pub fn field<T: VertexElement>(&self, usage: UsageType, index: u8, record: &[u8]) -> Result<Option<T>> {
        self.check_record(record)?;
        match self.find(usage, index) {
            Some((offset, entry)) => {
                Self::check_type::<T>(&entry)?;
                Ok(Some(T::read(&record[offset..offset + entry.size()])))
            }
            None => Ok(None),
        }
    }

    /// Read a field that must be present.
    pub fn get_data<T: VertexElement>(&self, usage: UsageType, index: u8, record: &[u8]) -> Result<T> {
        self.field(usage, index, record)?
            .ok_or_else(|| Error::invalid(format!("declaration has no {usage:?}{index} field")))
    }

    /// Write a field that must be present.
    pub fn set_data<T: VertexElement>(&self, usage: UsageType, index: u8, record: &mut [u8], value: T) -> Result<()> {
        if !self.put(usage, index, record, value)? {
            return Err(Error::invalid(format!("declaration has no {usage:?}{index} field")));
        }
        Ok(())
    }

    /// Write a field if present; returns whether it was written.
    fn put<T: VertexElement>(&self, usage: UsageType, index: u8, record: &mut [u8], value: T) -> Result<bool> {
        self.check_record(record)?;
        match self.find(usage, index) {
            Some((offset, entry)) => {
                Self::check_type::<T>(&entry)?;
                value.write(&mut record[offset..offset + entry.size()]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode a raw record. Fields the declaration lacks stay at their defaults.
    pub fn to_vertex(&self, record: &[u8]) -> Result<Vertex> {
        let mut v = Vertex::default();
        if let Some(x) = self.field(U::Position, 0, record)? {
            v.position = x;
        }
        if let Some(x) = self.field(U::Position, 1, record)? {
            v.position1 = x;
        }
        if let Some(x) = self.field(U::Normal, 0, record)? {
            v.normal = x;
        }
        if let Some(x) = self.field(U::Normal, 1, record)? {
            v.normal1 = x;
        }
        if let Some(x) = self.field(U::TextureCoordinate, 0, record)? {
            v.uv = x;
        }
        if let Some(x) = self.field(U::TextureCoordinate, 1, record)? {
            v.uv1 = x;
        }
        if let Some(x) = self.field(U::Color, 0, record)? {
            v.color = x;
        }
        if let Some(x) = self.field(U::BlendWeight, 0, record)? {
            v.blend_weight = x;
        }
        if let Some(x) = self.field(U::BlendIndices, 0, record)? {
            v.blend_indices = x;
        }
        if let Some(x) = self.field(U::Tangent, 0, record)? {
            v.tangent = x;
        }
        if let Some(x) = self.field(U::BiNormal, 0, record)? {
            v.binormal = x;
        }
        Ok(v)
    }

    /// Encode into an existing record. Fields the declaration lacks are dropped.
    pub fn write_vertex(&self, v: &Vertex, record: &mut [u8]) -> Result<()> {
        self.put(U::Position, 0, record, v.position)?;
        self.put(U::Position, 1, record, v.position1)?;
        self.put(U::Normal, 0, record, v.normal)?;
        self.put(U::Normal, 1, record, v.normal1)?;
        self.put(U::TextureCoordinate, 0, record, v.uv)?;
        self.put(U::TextureCoordinate, 1, record, v.uv1)?;
        self.put(U::Color, 0, record, v.color)?;
        self.put(U::BlendWeight, 0, record, v.blend_weight)?;
        self.put(U::BlendIndices, 0, record, v.blend_indices)?;
        self.put(U::Tangent, 0, record, v.tangent)?;
        self.put(U::BiNormal, 0, record, v.binormal)?;
        Ok(())
    }

    /// Encode a vertex into a fresh zeroed record.
    pub fn to_raw(&self, v: &Vertex) -> Result<Vec<u8>> {
        let mut record = vec![0u8; self.stride];
        self.write_vertex(v, &mut record)?;
        Ok(record)
    }
}
