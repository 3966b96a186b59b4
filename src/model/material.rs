//! Materials, substances and textures.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use super::format::{source, PackageVersion};
use crate::util::crc32;

bitflags! {
    /// Version-independent substance extra flags.
    ///
    /// Each package version stores these under its own bit layout; see
    /// [`SubstanceExtra::decode`] and [`SubstanceExtra::encode`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SubstanceExtra: u32 {
        const SPECULAR = 1 << 0;
        const EMISSIVE = 1 << 1;
        const DAMAGE = 1 << 2;
        const COLOR_MASK = 1 << 3;
    }
}

/// (normalised flag, stored bit) pairs per version.
fn extra_layout(version: PackageVersion) -> &'static [(SubstanceExtra, u32)] {
    match version {
        PackageVersion::V1 => &[],
        PackageVersion::V6 => &[
            (SubstanceExtra::DAMAGE, 0x1),
            (SubstanceExtra::COLOR_MASK, 0x2),
            (SubstanceExtra::SPECULAR, 0x4),
        ],
        PackageVersion::V9 => &[
            (SubstanceExtra::SPECULAR, 0x1),
            (SubstanceExtra::EMISSIVE, 0x2),
            (SubstanceExtra::DAMAGE, 0x100),
            (SubstanceExtra::COLOR_MASK, 0x200),
        ],
    }
}

impl SubstanceExtra {
    /// Split a stored value into known flags and the bits this version
    /// does not define.
    pub fn decode(version: PackageVersion, raw: u32) -> (Self, u32) {
        let mut flags = Self::empty();
        let mut rest = raw;
        for &(flag, bit) in extra_layout(version) {
            if raw & bit != 0 {
                flags |= flag;
                rest &= !bit;
            }
        }
        (flags, rest)
    }

    /// Stored value for `version`. Flags the version cannot express are dropped.
    pub fn encode(self, version: PackageVersion) -> u32 {
        extra_layout(version)
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .fold(0, |acc, (_, bit)| acc | bit)
    }
}

/// Encoded texture blob plus its table entry.
#[derive(Clone, PartialEq, Eq)]
pub struct Texture {
    pub uid: u32,
    /// CRC32 of `data`.
    pub hash: u32,
    pub width: u16,
    pub height: u16,
    /// Pixel format tag, interpreted by the image codec.
    pub format: u32,
    pub flags: u32,
    pub data: Arc<[u8]>,
}

impl Texture {
    pub fn new(uid: u32, width: u16, height: u16, format: u32, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            uid,
            hash: crc32(&data),
            width,
            height,
            format,
            flags: 0,
            data,
        }
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn recompute_hash(&mut self) {
        self.hash = crc32(&self.data);
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("uid", &format_args!("{:#010x}", self.uid))
            .field("hash", &format_args!("{:#010x}", self.hash))
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Shading unit of a material.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substance {
    pub flags: u8,
    pub mode: u8,
    pub kind: u8,
    pub bin: u8,
    pub extra: SubstanceExtra,
    /// Stored extra bits with no [`SubstanceExtra`] meaning, kept verbatim.
    pub extra_unknown: u32,
    pub textures: Vec<Texture>,
}

impl Substance {
    /// Packed Family A form: flags | mode << 8 | type << 16 | bin << 24.
    pub fn packed(&self) -> u32 {
        self.flags as u32 | (self.mode as u32) << 8 | (self.kind as u32) << 16 | (self.bin as u32) << 24
    }

    pub fn unpack(&mut self, packed: u32) {
        self.flags = packed as u8;
        self.mode = (packed >> 8) as u8;
        self.kind = (packed >> 16) as u8;
        self.bin = (packed >> 24) as u8;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub flags: u32,
    pub animation_speed: f32,
    pub substances: Vec<Substance>,
}

impl Material {
    /// Every texture of every substance.
    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        self.substances.iter().flat_map(|s| s.textures.iter())
    }
}

/// Reference from a submodel to a material in some package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialHandle {
    pub index: u16,
    pub source: u16,
}

/// Where a handle points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialSource {
    Local,
    Globals,
    /// Another package in the same file, by the low half of its UID.
    Package(u16),
    Null,
}

impl MaterialHandle {
    pub const NULL: Self = Self {
        index: 0,
        source: source::NULL,
    };

    pub const fn local(index: u16) -> Self {
        Self {
            index,
            source: source::LOCAL,
        }
    }

    pub const fn globals(index: u16) -> Self {
        Self {
            index,
            source: source::GLOBALS,
        }
    }

    /// Classify relative to the package holding the handle.
    pub fn source_kind(&self, package_uid: u32) -> MaterialSource {
        match self.source {
            source::NULL => MaterialSource::Null,
            source::LOCAL => MaterialSource::Local,
            source::GLOBALS => MaterialSource::Globals,
            s if s == package_uid as u16 => MaterialSource::Local,
            s => MaterialSource::Package(s),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.source == source::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_flags_per_version() {
        let (f, rest) = SubstanceExtra::decode(PackageVersion::V9, 0x301);
        assert_eq!(f, SubstanceExtra::SPECULAR | SubstanceExtra::DAMAGE | SubstanceExtra::COLOR_MASK);
        assert_eq!(rest, 0);
        assert_eq!(f.encode(PackageVersion::V6), 0x7);
        assert_eq!(f.encode(PackageVersion::V1), 0);

        let (f, rest) = SubstanceExtra::decode(PackageVersion::V6, 0x12);
        assert_eq!(f, SubstanceExtra::COLOR_MASK);
        assert_eq!(rest, 0x10);

        // emissive has no v6 bit
        assert_eq!(SubstanceExtra::EMISSIVE.encode(PackageVersion::V6), 0);
    }

    #[test]
    fn test_substance_packing() {
        let mut s = Substance::default();
        s.unpack(0x0403_0201);
        assert_eq!((s.flags, s.mode, s.kind, s.bin), (1, 2, 3, 4));
        assert_eq!(s.packed(), 0x0403_0201);
    }

    #[test]
    fn test_texture_hash() {
        let t = Texture::new(7, 4, 4, 0, b"123456789".to_vec());
        assert_eq!(t.hash, 0xCBF4_3926);
        assert_eq!(t.size(), 9);
    }

    #[test]
    fn test_handle_sources() {
        let uid = 0x0001_2345;
        assert_eq!(MaterialHandle::local(3).source_kind(uid), MaterialSource::Local);
        assert_eq!(MaterialHandle { index: 0, source: 0x2345 }.source_kind(uid), MaterialSource::Local);
        assert_eq!(MaterialHandle::globals(1).source_kind(uid), MaterialSource::Globals);
        assert_eq!(MaterialHandle::NULL.source_kind(uid), MaterialSource::Null);
        assert_eq!(
            MaterialHandle { index: 0, source: 0x0042 }.source_kind(uid),
            MaterialSource::Package(0x42)
        );
    }
}
