//! The model package object graph.
//!
//! Ownership runs strictly downwards: a package owns its models, a model its
//! seven LOD slots, a slot its instances and an instance its submodels.
//! `Lod::parent` and `LodInstance::parent` are plain indices back up the
//! chain and are refreshed by [`ModelPackage::relink`].

use super::declaration::VertexDeclaration;
use super::format::{PackageVersion, LOD_SLOTS, RESERVED_HEADER_SIZE};
use super::index_buffer::IndexBuffer;
use super::lod_mask::{resolve_mask, LodSlot};
use super::material::{Material, MaterialHandle};
use super::vertex::Vertex;
use super::vertex_buffer::VertexBuffer;
use crate::convert::triangles::normalize;
use crate::util::{BBox, Error, Mat4, Result};

/// How a submodel's indices form triangles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimitiveType {
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl PrimitiveType {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            4 => Ok(Self::TriangleList),
            5 => Ok(Self::TriangleStrip),
            6 => Ok(Self::TriangleFan),
            other => Err(Error::invalid(format!("unknown primitive type {other}"))),
        }
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Indices consumed by `primitives` primitives.
    pub const fn index_count(self, primitives: u32) -> u32 {
        match (self, primitives) {
            (_, 0) => 0,
            (Self::TriangleList, n) => n * 3,
            (_, n) => n + 2,
        }
    }

    /// Primitives formed by `indices` indices.
    pub const fn primitive_count(self, indices: u32) -> u32 {
        match self {
            Self::TriangleList => indices / 3,
            _ => indices.saturating_sub(2),
        }
    }
}

/// One drawable range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubModel {
    pub primitive: PrimitiveType,
    /// Added to every index to address the package vertex buffer.
    pub vertex_base: i32,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub primitive_count: u32,
    pub material: MaterialHandle,
}

impl SubModel {
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.primitive.index_count(self.primitive_count)
    }
}

/// Back-reference from an instance to its LOD slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LodRef {
    pub model: usize,
    pub slot: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LodInstance {
    pub parent: LodRef,
    pub transform: Mat4,
    pub use_transform: bool,
    pub submodels: Vec<SubModel>,
}

impl Default for LodInstance {
    fn default() -> Self {
        Self {
            parent: LodRef::default(),
            transform: Mat4::IDENTITY,
            use_transform: false,
            submodels: Vec::new(),
        }
    }
}

impl LodInstance {
    /// Placement applied to this instance, identity when unused.
    pub fn placement(&self) -> Mat4 {
        if self.use_transform {
            self.transform
        } else {
            Mat4::IDENTITY
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lod {
    /// Index of the owning model.
    pub parent: usize,
    pub slot: usize,
    /// Detail levels this slot draws at.
    pub mask: u32,
    /// Mask as stored in the file.
    pub raw_mask: u32,
    pub instances: Vec<LodInstance>,
}

impl Lod {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub uid: u32,
    pub flags: u32,
    pub bounds: BBox,
    /// Always [`LOD_SLOTS`] entries, indexed by slot.
    pub lods: Vec<Lod>,
}

impl Model {
    /// Model with seven empty LOD slots.
    pub fn new(uid: u32, version: PackageVersion) -> Result<Self> {
        let lods = (0..LOD_SLOTS)
            .map(|slot| {
                Ok(Lod {
                    slot,
                    mask: resolve_mask(version.family(), slot, 0)?,
                    ..Lod::default()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            uid,
            flags: 0,
            bounds: BBox::ZERO,
            lods,
        })
    }

    pub fn lod(&self, slot: LodSlot) -> &Lod {
        &self.lods[slot as usize]
    }

    pub fn lod_mut(&mut self, slot: LodSlot) -> &mut Lod {
        &mut self.lods[slot as usize]
    }

    pub fn submodels(&self) -> impl Iterator<Item = &SubModel> {
        self.lods
            .iter()
            .flat_map(|l| l.instances.iter())
            .flat_map(|i| i.submodels.iter())
    }

    /// Recompute `bounds` from the placed positions of every submodel.
    pub fn recompute_bounds(&mut self, vertices: &VertexBuffer) -> Result<()> {
        let mut bounds = BBox::EMPTY;
        for instance in self.lods.iter().flat_map(|l| l.instances.iter()) {
            let placement = instance.placement();
            for sm in &instance.submodels {
                for i in sm.vertex_offset..sm.vertex_offset + sm.vertex_count {
                    let p = vertices.vertex(i as usize)?.position;
                    bounds.expand_by_point(placement.transform_point3(p));
                }
            }
        }
        self.bounds = if bounds.is_empty() { BBox::ZERO } else { bounds };
        Ok(())
    }
}

/// Element counts of a package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackageStatistics {
    pub models: usize,
    /// Non-empty LOD slots.
    pub lods: usize,
    pub instances: usize,
    pub submodels: usize,
    pub materials: usize,
    pub substances: usize,
    pub textures: usize,
    pub vertices: usize,
    pub indices: usize,
    pub triangles: usize,
}

/// Parsed model package.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelPackage {
    pub version: PackageVersion,
    pub uid: u32,
    pub vertex_type: u32,
    pub models: Vec<Model>,
    pub materials: Vec<Material>,
    pub vertex_buffer: VertexBuffer,
    pub index_buffer: IndexBuffer,
    /// Reserved header tail of Family B packages, written back unchanged.
    pub reserved: [u8; RESERVED_HEADER_SIZE],
}

impl ModelPackage {
    /// Empty package.
    pub fn new(version: PackageVersion, uid: u32, vertex_type: u32) -> Result<Self> {
        Ok(Self {
            version,
            uid,
            vertex_type,
            models: Vec::new(),
            materials: Vec::new(),
            vertex_buffer: VertexBuffer::create(version, vertex_type)?,
            index_buffer: IndexBuffer::default(),
            reserved: [0; RESERVED_HEADER_SIZE],
        })
    }

    pub fn declaration(&self) -> &VertexDeclaration {
        self.vertex_buffer.declaration()
    }

    /// Refresh the parent indices of every LOD and instance.
    pub fn relink(&mut self) {
        for (m, model) in self.models.iter_mut().enumerate() {
            for (slot, lod) in model.lods.iter_mut().enumerate() {
                lod.parent = m;
                lod.slot = slot;
                for instance in &mut lod.instances {
                    instance.parent = LodRef { model: m, slot };
                }
            }
        }
    }

    /// Every submodel in model, slot, instance order.
    pub fn submodels(&self) -> impl Iterator<Item = &SubModel> {
        self.models.iter().flat_map(Model::submodels)
    }

    pub fn submodels_mut(&mut self) -> impl Iterator<Item = &mut SubModel> {
        self.models
            .iter_mut()
            .flat_map(|m| m.lods.iter_mut())
            .flat_map(|l| l.instances.iter_mut())
            .flat_map(|i| i.submodels.iter_mut())
    }

    /// Raw (unbased) indices of a submodel.
    pub fn submodel_indices(&self, sm: &SubModel) -> Result<&[u16]> {
        let start = sm.index_offset as usize;
        self.index_buffer.range(start..start + sm.index_count() as usize)
    }

    /// Vertices in the submodel's vertex range.
    pub fn submodel_vertices(&self, sm: &SubModel) -> Result<Vec<Vertex>> {
        (sm.vertex_offset..sm.vertex_offset + sm.vertex_count)
            .map(|i| self.vertex_buffer.vertex(i as usize))
            .collect()
    }

    /// Triangles of a submodel as absolute vertex buffer indices.
    pub fn submodel_triangles(&self, sm: &SubModel) -> Result<Vec<[u32; 3]>> {
        let based = self
            .submodel_indices(sm)?
            .iter()
            .map(|&i| resolve_index(sm, i))
            .collect::<Result<Vec<u32>>>()?;
        Ok(normalize(sm.primitive, &based))
    }

    /// Check that every submodel stays inside the shared buffers.
    pub fn validate(&self) -> Result<()> {
        let vertex_count = self.vertex_buffer.count() as u64;
        for sm in self.submodels() {
            let end = sm.vertex_offset as u64 + sm.vertex_count as u64;
            if end > vertex_count {
                return Err(Error::invalid(format!(
                    "submodel vertex range {}+{} exceeds {vertex_count} vertices",
                    sm.vertex_offset, sm.vertex_count
                )));
            }
            for &i in self.submodel_indices(sm)? {
                let v = resolve_index(sm, i)? as u64;
                if v < sm.vertex_offset as u64 || v >= end {
                    return Err(Error::invalid(format!(
                        "index {i} (base {}) resolves to vertex {v}, outside {}..{end}",
                        sm.vertex_base, sm.vertex_offset
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn recompute_bounds(&mut self) -> Result<()> {
        for model in &mut self.models {
            model.recompute_bounds(&self.vertex_buffer)?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> PackageStatistics {
        let mut stats = PackageStatistics {
            models: self.models.len(),
            materials: self.materials.len(),
            vertices: self.vertex_buffer.count(),
            indices: self.index_buffer.len(),
            ..PackageStatistics::default()
        };
        for lod in self.models.iter().flat_map(|m| m.lods.iter()) {
            if !lod.is_empty() {
                stats.lods += 1;
            }
            stats.instances += lod.instances.len();
        }
        for sm in self.submodels() {
            stats.submodels += 1;
            stats.triangles += sm.primitive_count as usize;
        }
        for material in &self.materials {
            stats.substances += material.substances.len();
            stats.textures += material.textures().count();
        }
        stats
    }
}

/// Absolute vertex index of a raw submodel index.
pub(crate) fn resolve_index(sm: &SubModel, index: u16) -> Result<u32> {
    u32::try_from(sm.vertex_base as i64 + index as i64)
        .map_err(|_| Error::invalid(format!("index {index} with base {} is negative", sm.vertex_base)))
}

/// Single quad (two list triangles) in the high LOD of one model.
#[cfg(test)]
pub(crate) fn quad_package() -> ModelPackage {
    let mut pkg = ModelPackage::new(PackageVersion::V6, 0x1234, 0).unwrap();
    let verts: Vec<Vertex> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
        .iter()
        .map(|&(x, y)| Vertex {
            position: crate::util::Vec3::new(x, y, 0.0),
            normal: crate::util::Vec3::Z,
            ..Vertex::default()
        })
        .collect();
    pkg.vertex_buffer.create_vertices(&verts).unwrap();
    pkg.index_buffer = IndexBuffer::from(vec![0, 1, 2, 0, 2, 3]);
    let mut model = Model::new(1, pkg.version).unwrap();
    model.lod_mut(LodSlot::High).instances.push(LodInstance {
        submodels: vec![SubModel {
            primitive: PrimitiveType::TriangleList,
            vertex_base: 0,
            vertex_offset: 0,
            vertex_count: 4,
            index_offset: 0,
            primitive_count: 2,
            material: MaterialHandle::NULL,
        }],
        ..LodInstance::default()
    });
    pkg.models.push(model);
    pkg.relink();
    pkg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec3;

    #[test]
    fn test_index_counts() {
        assert_eq!(PrimitiveType::TriangleList.index_count(2), 6);
        assert_eq!(PrimitiveType::TriangleStrip.index_count(2), 4);
        assert_eq!(PrimitiveType::TriangleFan.index_count(0), 0);
        assert_eq!(PrimitiveType::TriangleFan.primitive_count(5), 3);
    }

    #[test]
    fn test_validate_and_triangles() {
        let pkg = quad_package();
        pkg.validate().unwrap();
        let sm = *pkg.submodels().next().unwrap();
        assert_eq!(pkg.submodel_triangles(&sm).unwrap(), vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(pkg.submodel_vertices(&sm).unwrap().len(), 4);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut pkg = quad_package();
        pkg.submodels_mut().next().unwrap().vertex_count = 3;
        assert!(pkg.validate().is_err());

        let mut pkg = quad_package();
        pkg.submodels_mut().next().unwrap().vertex_count = 5;
        assert!(pkg.validate().is_err());
    }

    #[test]
    fn test_bounds_and_statistics() {
        let mut pkg = quad_package();
        pkg.models[0].lods[0].instances[0].transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0));
        pkg.models[0].lods[0].instances[0].use_transform = true;
        pkg.recompute_bounds().unwrap();
        let b = pkg.models[0].bounds;
        assert_eq!(b.min.truncate(), Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(b.max.truncate(), Vec3::new(1.0, 1.0, 2.0));

        let stats = pkg.statistics();
        assert_eq!(stats.models, 1);
        assert_eq!(stats.lods, 1);
        assert_eq!(stats.submodels, 1);
        assert_eq!(stats.triangles, 2);
        assert_eq!(stats.vertices, 4);
    }

    #[test]
    fn test_relink() {
        let mut pkg = quad_package();
        pkg.models.insert(0, Model::new(2, pkg.version).unwrap());
        pkg.relink();
        assert_eq!(pkg.models[1].lods[0].parent, 1);
        assert_eq!(pkg.models[1].lods[0].instances[0].parent, LodRef { model: 1, slot: 0 });
    }
}
