//! Conversion of a package between format versions.

use crate::model::{
    resolve_mask, Family, ModelPackage, PackageVersion, VertexBuffer, VertexDeclaration, RESERVED_HEADER_SIZE,
};
use crate::util::Result;

use super::legacy::legacy_material;

/// Copy of `pkg` laid out for `target`.
///
/// Vertices are re-encoded under the smallest `target` declaration that
/// holds every field of the current one. Extra flags the target cannot
/// express are dropped, and going from Family B to Family A applies the
/// legacy material shim.
pub fn convert_version(pkg: &ModelPackage, target: PackageVersion) -> Result<ModelPackage> {
    let (vertex_type, declaration) = VertexDeclaration::find_compatible(target, pkg.declaration())?;
    let mut vertex_buffer = VertexBuffer::with_declaration(declaration);
    vertex_buffer.create_vertices(&pkg.vertex_buffer.to_vertices()?)?;

    let to_legacy = pkg.version.family() == Family::B && target.family() == Family::A;
    let mut materials = if to_legacy {
        pkg.materials.iter().map(legacy_material).collect()
    } else {
        pkg.materials.clone()
    };
    if target != pkg.version {
        for substance in materials.iter_mut().flat_map(|m| m.substances.iter_mut()) {
            substance.extra_unknown = 0;
        }
    }

    let mut models = pkg.models.clone();
    for lod in models.iter_mut().flat_map(|m| m.lods.iter_mut()) {
        lod.mask = resolve_mask(target.family(), lod.slot, lod.raw_mask)?;
    }

    let mut out = ModelPackage {
        version: target,
        uid: pkg.uid,
        vertex_type,
        models,
        materials,
        vertex_buffer,
        index_buffer: pkg.index_buffer.clone(),
        reserved: match target.family() {
            Family::A => [0; RESERVED_HEADER_SIZE],
            Family::B => pkg.reserved,
        },
    };
    out.relink();
    tracing::info!(
        uid = pkg.uid,
        from = %pkg.version,
        to = %target,
        vertex_type,
        stride = out.vertex_buffer.stride(),
        "converted model package"
    );
    Ok(out)
}
