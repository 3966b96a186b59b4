//! Normalisation of list, strip and fan primitives to triangle lists.
//!
//! Fans are walked pairwise with alternating winding, the same way strips
//! are, so the two differ only in which corner of an odd triangle is
//! swapped. Triangles with a repeated corner are dropped.

use crate::model::PrimitiveType;

#[inline]
fn is_degenerate(t: &[u32; 3]) -> bool {
    t[0] == t[1] || t[1] == t[2] || t[0] == t[2]
}

/// Corner positions of the `i`th triangle, before lookup.
#[inline]
fn corners(kind: PrimitiveType, i: usize) -> [usize; 3] {
    match kind {
        PrimitiveType::TriangleList => [i * 3, i * 3 + 1, i * 3 + 2],
        PrimitiveType::TriangleStrip if i % 2 == 1 => [i, i + 2, i + 1],
        PrimitiveType::TriangleFan if i % 2 == 1 => [i + 1, i, i + 2],
        _ => [i, i + 1, i + 2],
    }
}

fn triangle_count(kind: PrimitiveType, len: usize) -> usize {
    match kind {
        PrimitiveType::TriangleList => len / 3,
        _ => len.saturating_sub(2),
    }
}

/// Triangle list of `indices` interpreted as `kind`.
pub fn normalize(kind: PrimitiveType, indices: &[u32]) -> Vec<[u32; 3]> {
    normalize_with_lookup(kind, indices, |i| i)
}

/// Like [`normalize`], mapping every index through `lookup` first.
///
/// Degeneracy is judged on the mapped values, so two source indices that
/// map to one output vertex collapse their triangle.
pub fn normalize_with_lookup<F>(kind: PrimitiveType, indices: &[u32], mut lookup: F) -> Vec<[u32; 3]>
where
    F: FnMut(u32) -> u32,
{
    let count = triangle_count(kind, indices.len());
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let [a, b, c] = corners(kind, i);
        let t = [lookup(indices[a]), lookup(indices[b]), lookup(indices[c])];
        if !is_degenerate(&t) {
            out.push(t);
        }
    }
    out
}
