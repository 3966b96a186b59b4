//! Math type re-exports and asset-specific math types.
//!
//! This module re-exports the `glam` types used by vertex data and
//! instance transforms, and adds the packed [`Color`] and the
//! [`BBox`] stored in model part headers.

pub use glam::{Mat4, Vec2, Vec3, Vec4};

use std::fmt;

/// Packed 8-bit RGBA color (4 bytes on disk, stored R, G, B, A).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self::new(255, 255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0, 255);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Normalized float channels.
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r as f32, self.g as f32, self.b as f32, self.a as f32) / 255.0
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Color(#{:02x}{:02x}{:02x}{:02x})", self.r, self.g, self.b, self.a)
    }
}

/// Axis-aligned bounding box as stored by model parts (xyz + padding w).
#[derive(Clone, Copy, PartialEq)]
pub struct BBox {
    pub min: Vec4,
    pub max: Vec4,
}

impl BBox {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec4::new(f32::INFINITY, f32::INFINITY, f32::INFINITY, 0.0),
        max: Vec4::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0),
    };

    /// Zero-sized box at the origin; what an untouched part header holds.
    pub const ZERO: Self = Self {
        min: Vec4::ZERO,
        max: Vec4::ZERO,
    };

    #[inline]
    pub const fn new(min: Vec4, max: Vec4) -> Self {
        Self { min, max }
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point. The w lanes are left alone.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = p.min(self.min.truncate()).extend(self.min.w);
        self.max = p.max(self.max.truncate()).extend(self.max.w);
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min.truncate() + self.max.truncate()) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max.truncate() - self.min.truncate()
    }
}

impl Default for BBox {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox({:?} - {:?})", self.min.truncate(), self.max.truncate())
    }
}

/// Component-wise float comparison used for vertex matching.
#[inline]
pub fn nearly_equal(a: f32, b: f32) -> bool {
    (a - b).abs() <= f32::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox() {
        let mut b = BBox::EMPTY;
        assert!(b.is_empty());

        b.expand_by_point(Vec3::ZERO);
        assert!(!b.is_empty());
        b.expand_by_point(Vec3::ONE);
        assert_eq!(b.min.truncate(), Vec3::ZERO);
        assert_eq!(b.max.truncate(), Vec3::ONE);
        assert_eq!(b.center(), Vec3::splat(0.5));
        assert_eq!(b.size(), Vec3::ONE);
    }

    #[test]
    fn test_color_bytes() {
        let c = Color::new(1, 2, 3, 4);
        assert_eq!(Color::from_bytes(c.to_bytes()), c);
        assert_eq!(Color::WHITE.to_vec4(), Vec4::ONE);
    }
}
