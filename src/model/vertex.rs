//! Canonical vertex record, independent of any declaration.

use crate::util::{nearly_equal, Color, Mat4, Vec2, Vec3, Vec4};

/// Every field any declaration can carry.
///
/// The secondary position and normal hold the damage-deformation stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub position1: Vec3,
    pub normal: Vec3,
    pub normal1: Vec3,
    pub uv: Vec2,
    pub uv1: Vec2,
    pub color: Color,
    pub blend_weight: Vec4,
    pub blend_indices: Color,
    pub tangent: Vec3,
    pub binormal: Vec3,
}

fn vec_equal(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(x, y)| nearly_equal(*x, *y))
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            ..Self::default()
        }
    }

    /// Field-wise match with float tolerance; colors compare exactly.
    pub fn possibly_equal(&self, other: &Self) -> bool {
        vec_equal(&self.position.to_array(), &other.position.to_array())
            && vec_equal(&self.normal.to_array(), &other.normal.to_array())
            && vec_equal(&self.uv.to_array(), &other.uv.to_array())
            && vec_equal(&self.position1.to_array(), &other.position1.to_array())
            && vec_equal(&self.normal1.to_array(), &other.normal1.to_array())
            && vec_equal(&self.uv1.to_array(), &other.uv1.to_array())
            && vec_equal(&self.blend_weight.to_array(), &other.blend_weight.to_array())
            && vec_equal(&self.tangent.to_array(), &other.tangent.to_array())
            && vec_equal(&self.binormal.to_array(), &other.binormal.to_array())
            && self.color == other.color
            && self.blend_indices == other.blend_indices
    }

    /// Apply an instance placement to positions and directions.
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self {
            position: m.transform_point3(self.position),
            position1: m.transform_point3(self.position1),
            normal: m.transform_vector3(self.normal).normalize_or_zero(),
            normal1: m.transform_vector3(self.normal1).normalize_or_zero(),
            tangent: m.transform_vector3(self.tangent).normalize_or_zero(),
            binormal: m.transform_vector3(self.binormal).normalize_or_zero(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_possibly_equal() {
        let a = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z, Vec2::ZERO);
        let mut b = a;
        b.position.x += f32::EPSILON / 2.0;
        assert!(a.possibly_equal(&b));
        b.position.x += 0.01;
        assert!(!a.possibly_equal(&b));

        let mut c = a;
        c.color = Color::new(0, 0, 0, 1);
        assert!(!a.possibly_equal(&c));
    }

    #[test]
    fn test_transformed() {
        let v = Vertex::new(Vec3::ZERO, Vec3::X, Vec2::ZERO);
        let t = v.transformed(&Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));
        assert_eq!(t.position, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(t.normal, Vec3::X);
    }
}
