//! Binary encoding of model packages.
//!
//! A package is one spooler buffer payload: a fixed header of table
//! references, the flat parallel-indexed tables, two buffer descriptors and
//! finally the vertex, index and texture data regions. All offsets are
//! relative to the start of the payload and every table entry has a
//! version-dependent size.
//!
//! ```text
//! +---------------------+ 0x00
//! | header              | 0x50 (v1) / 0x60 (v6, v9)
//! +---------------------+
//! | parts, lods,        |
//! | instances,          |
//! | submodels,          |
//! | materials,          |
//! | substances,         |
//! | textures            |
//! +---------------------+
//! | VB / IB descriptors | 0x10 each
//! +---------------------+ 16-aligned
//! | vertex data         |
//! +---------------------+ 16-aligned
//! | index data          |
//! +---------------------+ 16-aligned
//! | texture data        |
//! +---------------------+
//! ```
//!
//! Saving compacts the shared buffers: every distinct
//! `(vertex_offset, vertex_count)` range is copied once, and each
//! submodel's indices are rebased onto the new range.

use std::collections::HashMap;
use std::sync::Arc;

use super::declaration::VertexDeclaration;
use super::format::*;
use super::index_buffer::{IndexBuffer, IndexBufferBuilder};
use super::lod_mask::resolve_mask;
use super::material::{Material, MaterialHandle, Substance, SubstanceExtra, Texture};
use super::package::*;
use super::vertex_buffer::VertexBuffer;
use crate::spooler::{context, SpoolerId, SpoolerTree};
use crate::util::{align, BBox, BinaryRecord, ByteReader, ByteWriter, Error, Mat4, Result};

/// Count and offset of one table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TableRef {
    count: u32,
    offset: u32,
}

impl TableRef {
    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            count: r.read_u32()?,
            offset: r.read_u32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter) -> Result<()> {
        w.write_u32(self.count)?;
        w.write_u32(self.offset)
    }
}

#[derive(Clone, Debug, Default)]
struct Header {
    version: u32,
    uid: u32,
    parts: TableRef,
    lods: TableRef,
    instances: TableRef,
    submodels: TableRef,
    materials: TableRef,
    substances: TableRef,
    textures: TableRef,
    texture_data_offset: u32,
    texture_data_size: u32,
    vertex_descriptor: u32,
    index_descriptor: u32,
    reserved: [u8; RESERVED_HEADER_SIZE],
}

impl BinaryRecord for Header {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        version.header_size()
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        let mut h = Self {
            version: r.read_u32()?,
            uid: r.read_u32()?,
            parts: TableRef::read(r)?,
            lods: TableRef::read(r)?,
            instances: TableRef::read(r)?,
            submodels: TableRef::read(r)?,
            materials: TableRef::read(r)?,
            substances: TableRef::read(r)?,
            textures: TableRef::read(r)?,
            texture_data_offset: r.read_u32()?,
            texture_data_size: r.read_u32()?,
            vertex_descriptor: r.read_u32()?,
            index_descriptor: r.read_u32()?,
            reserved: [0; RESERVED_HEADER_SIZE],
        };
        if version.family() == Family::B {
            h.reserved = r.read_array()?;
        }
        Ok(h)
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        w.write_u32(self.version)?;
        w.write_u32(self.uid)?;
        for table in [
            &self.parts,
            &self.lods,
            &self.instances,
            &self.submodels,
            &self.materials,
            &self.substances,
            &self.textures,
        ] {
            table.write(w)?;
        }
        w.write_u32(self.texture_data_offset)?;
        w.write_u32(self.texture_data_size)?;
        w.write_u32(self.vertex_descriptor)?;
        w.write_u32(self.index_descriptor)?;
        if version.family() == Family::B {
            w.write_bytes(&self.reserved)?;
        }
        Ok(())
    }
}

struct PartRecord {
    uid: u32,
    flags: u32,
    bounds: BBox,
    lod_start: u32,
}

impl BinaryRecord for PartRecord {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        match version.family() {
            Family::A => 0x28,
            Family::B => 0x30,
        }
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        let uid = r.read_u32()?;
        let flags = match version.family() {
            Family::A => 0,
            Family::B => r.read_u32()?,
        };
        let bounds = BBox::new(r.read_vec4()?, r.read_vec4()?);
        let lod_start = r.read_u32()?;
        if version.family() == Family::B {
            r.read_u32()?;
        }
        Ok(Self {
            uid,
            flags,
            bounds,
            lod_start,
        })
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        w.write_u32(self.uid)?;
        if version.family() == Family::B {
            w.write_u32(self.flags)?;
        }
        w.write_vec4(self.bounds.min)?;
        w.write_vec4(self.bounds.max)?;
        w.write_u32(self.lod_start)?;
        if version.family() == Family::B {
            w.write_u32(0)?;
        }
        Ok(())
    }
}

struct LodRecord {
    instance_start: u32,
    instance_count: u32,
    mask: u32,
}

impl BinaryRecord for LodRecord {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        match version.family() {
            Family::A => 0x0C,
            Family::B => 0x10,
        }
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        let rec = Self {
            instance_start: r.read_u32()?,
            instance_count: r.read_u32()?,
            mask: r.read_u32()?,
        };
        if version.family() == Family::B {
            r.read_u32()?;
        }
        Ok(rec)
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        w.write_u32(self.instance_start)?;
        w.write_u32(self.instance_count)?;
        w.write_u32(self.mask)?;
        if version.family() == Family::B {
            w.write_u32(0)?;
        }
        Ok(())
    }
}

struct InstanceRecord {
    transform: Mat4,
    use_transform: bool,
    submodel_start: u32,
    submodel_count: u32,
}

impl BinaryRecord for InstanceRecord {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        match version.family() {
            Family::A => 0x48,
            Family::B => 0x50,
        }
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        let transform = r.read_mat4_rows()?;
        Ok(match version.family() {
            Family::A => {
                let submodel_start = r.read_u32()?;
                let submodel_count = r.read_u16()? as u32;
                let use_transform = r.read_u16()? != 0;
                Self {
                    transform,
                    use_transform,
                    submodel_start,
                    submodel_count,
                }
            }
            Family::B => {
                let use_transform = r.read_u32()? != 0;
                let submodel_start = r.read_u32()?;
                let submodel_count = r.read_u32()?;
                r.read_u32()?;
                Self {
                    transform,
                    use_transform,
                    submodel_start,
                    submodel_count,
                }
            }
        })
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        w.write_mat4_rows(&self.transform)?;
        match version.family() {
            Family::A => {
                let count = u16::try_from(self.submodel_count)
                    .map_err(|_| Error::SizeOverflow(format!("{} submodels in one instance", self.submodel_count)))?;
                w.write_u32(self.submodel_start)?;
                w.write_u16(count)?;
                w.write_u16(self.use_transform as u16)
            }
            Family::B => {
                w.write_u32(self.use_transform as u32)?;
                w.write_u32(self.submodel_start)?;
                w.write_u32(self.submodel_count)?;
                w.write_u32(0)
            }
        }
    }
}

impl BinaryRecord for SubModel {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        match version.family() {
            Family::A => 0x1C,
            Family::B => 0x20,
        }
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        match version.family() {
            Family::A => {
                let primitive = PrimitiveType::from_u32(r.read_u16()? as u32)?;
                let index = r.read_u16()?;
                let vertex_base = r.read_i32()?;
                let vertex_offset = r.read_u32()?;
                let vertex_count = r.read_u32()?;
                let index_offset = r.read_u32()?;
                let primitive_count = r.read_u32()?;
                let source = r.read_u16()?;
                r.read_u16()?;
                Ok(Self {
                    primitive,
                    vertex_base,
                    vertex_offset,
                    vertex_count,
                    index_offset,
                    primitive_count,
                    material: MaterialHandle { index, source },
                })
            }
            Family::B => {
                let primitive = PrimitiveType::from_u32(r.read_u32()?)?;
                let vertex_base = r.read_i32()?;
                let vertex_offset = r.read_u32()?;
                let vertex_count = r.read_u32()?;
                let index_offset = r.read_u32()?;
                let primitive_count = r.read_u32()?;
                let index = r.read_u16()?;
                let source = r.read_u16()?;
                r.read_u32()?;
                Ok(Self {
                    primitive,
                    vertex_base,
                    vertex_offset,
                    vertex_count,
                    index_offset,
                    primitive_count,
                    material: MaterialHandle { index, source },
                })
            }
        }
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        match version.family() {
            Family::A => {
                w.write_u16(self.primitive.as_u32() as u16)?;
                w.write_u16(self.material.index)?;
            }
            Family::B => w.write_u32(self.primitive.as_u32())?,
        }
        w.write_i32(self.vertex_base)?;
        w.write_u32(self.vertex_offset)?;
        w.write_u32(self.vertex_count)?;
        w.write_u32(self.index_offset)?;
        w.write_u32(self.primitive_count)?;
        match version.family() {
            Family::A => {
                w.write_u16(self.material.source)?;
                w.write_u16(0)
            }
            Family::B => {
                w.write_u16(self.material.index)?;
                w.write_u16(self.material.source)?;
                w.write_u32(0)
            }
        }
    }
}

struct MaterialRecord {
    substance_start: u32,
    substance_count: u32,
    flags: u32,
    animation_speed: f32,
}

impl BinaryRecord for MaterialRecord {
    type Version = PackageVersion;

    fn size(_: PackageVersion) -> usize {
        0x10
    }

    fn read(r: &mut ByteReader<'_>, _: PackageVersion) -> Result<Self> {
        Ok(Self {
            substance_start: r.read_u32()?,
            substance_count: r.read_u32()?,
            flags: r.read_u32()?,
            animation_speed: r.read_f32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter, _: PackageVersion) -> Result<()> {
        w.write_u32(self.substance_start)?;
        w.write_u32(self.substance_count)?;
        w.write_u32(self.flags)?;
        w.write_f32(self.animation_speed)
    }
}

struct SubstanceRecord {
    flags: u8,
    mode: u8,
    kind: u8,
    bin: u8,
    extra: u32,
    texture_start: u32,
    texture_count: u32,
}

impl BinaryRecord for SubstanceRecord {
    type Version = PackageVersion;

    fn size(version: PackageVersion) -> usize {
        match version.family() {
            Family::A => 0x10,
            Family::B => 0x14,
        }
    }

    fn read(r: &mut ByteReader<'_>, version: PackageVersion) -> Result<Self> {
        let (flags, mode, kind, bin, extra) = match version.family() {
            Family::A => {
                let packed = r.read_u32()?;
                (packed as u8, (packed >> 8) as u8, (packed >> 16) as u8, (packed >> 24) as u8, 0)
            }
            Family::B => (r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u32()?),
        };
        let texture_start = r.read_u32()?;
        let texture_count = r.read_u32()?;
        r.read_u32()?;
        Ok(Self {
            flags,
            mode,
            kind,
            bin,
            extra,
            texture_start,
            texture_count,
        })
    }

    fn write(&self, w: &mut ByteWriter, version: PackageVersion) -> Result<()> {
        match version.family() {
            Family::A => {
                w.write_u32(
                    self.flags as u32 | (self.mode as u32) << 8 | (self.kind as u32) << 16 | (self.bin as u32) << 24,
                )?;
            }
            Family::B => {
                w.write_bytes(&[self.flags, self.mode, self.kind, self.bin])?;
                w.write_u32(self.extra)?;
            }
        }
        w.write_u32(self.texture_start)?;
        w.write_u32(self.texture_count)?;
        w.write_u32(0)
    }
}

struct TextureRecord {
    uid: u32,
    hash: u32,
    data_offset: u32,
    data_size: u32,
    width: u16,
    height: u16,
    format: u32,
    flags: u32,
}

impl BinaryRecord for TextureRecord {
    type Version = PackageVersion;

    fn size(_: PackageVersion) -> usize {
        0x20
    }

    fn read(r: &mut ByteReader<'_>, _: PackageVersion) -> Result<Self> {
        let rec = Self {
            uid: r.read_u32()?,
            hash: r.read_u32()?,
            data_offset: r.read_u32()?,
            data_size: r.read_u32()?,
            width: r.read_u16()?,
            height: r.read_u16()?,
            format: r.read_u32()?,
            flags: r.read_u32()?,
        };
        r.read_u32()?;
        Ok(rec)
    }

    fn write(&self, w: &mut ByteWriter, _: PackageVersion) -> Result<()> {
        w.write_u32(self.uid)?;
        w.write_u32(self.hash)?;
        w.write_u32(self.data_offset)?;
        w.write_u32(self.data_size)?;
        w.write_u16(self.width)?;
        w.write_u16(self.height)?;
        w.write_u32(self.format)?;
        w.write_u32(self.flags)?;
        w.write_u32(0)
    }
}

/// `count` items of `items` starting at `start`, or a structure error.
fn sub_range<'t, T>(items: &'t [T], start: u32, count: u32, what: &str) -> Result<&'t [T]> {
    let start = start as usize;
    let end = start + count as usize;
    items.get(start..end).ok_or_else(|| {
        Error::invalid(format!("{what} range {start}..{end} exceeds table of {}", items.len()))
    })
}

fn u32_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::SizeOverflow(format!("{what} count {len} exceeds 32 bits")))
}

impl ModelPackage {
    /// Parse a package payload.
    pub fn load(data: &[u8]) -> Result<Self> {
        let version = PackageVersion::from_u32(ByteReader::new(data).read_u32()?)?;
        let mut reader = ByteReader::new(data);
        let header = Header::read(&mut reader, version)?;

        let parts = PartRecord::read_table(data, header.parts.offset, header.parts.count, version)?;
        let lods = LodRecord::read_table(data, header.lods.offset, header.lods.count, version)?;
        let instances = InstanceRecord::read_table(data, header.instances.offset, header.instances.count, version)?;
        let submodels = SubModel::read_table(data, header.submodels.offset, header.submodels.count, version)?;
        let materials = MaterialRecord::read_table(data, header.materials.offset, header.materials.count, version)?;
        let substances =
            SubstanceRecord::read_table(data, header.substances.offset, header.substances.count, version)?;
        let textures = TextureRecord::read_table(data, header.textures.offset, header.textures.count, version)?;

        let vertex_buffer = read_vertex_buffer(data, version, header.vertex_descriptor)?;
        let vertex_type = ByteReader::at(data, header.vertex_descriptor as u64 + 8)?.read_u32()?;
        let index_buffer = read_index_buffer(data, header.index_descriptor)?;

        let tex_start = header.texture_data_offset as usize;
        let tex_end = tex_start + header.texture_data_size as usize;
        let texture_data = data
            .get(tex_start..tex_end)
            .ok_or(Error::UnexpectedEof(tex_end as u64))?;

        // Shared blobs are loaded once.
        let mut blobs: HashMap<(u32, u32), Arc<[u8]>> = HashMap::new();
        let mut texture_list = Vec::with_capacity(textures.len());
        for rec in &textures {
            let start = rec.data_offset as usize;
            let end = start + rec.data_size as usize;
            let bytes = texture_data.get(start..end).ok_or_else(|| {
                Error::invalid(format!(
                    "texture {:#010x} data {start:#x}..{end:#x} exceeds data region of {:#x}",
                    rec.uid,
                    texture_data.len()
                ))
            })?;
            let blob = blobs
                .entry((rec.data_offset, rec.data_size))
                .or_insert_with(|| Arc::from(bytes))
                .clone();
            texture_list.push(Texture {
                uid: rec.uid,
                hash: rec.hash,
                width: rec.width,
                height: rec.height,
                format: rec.format,
                flags: rec.flags,
                data: blob,
            });
        }

        let mut substance_list = Vec::with_capacity(substances.len());
        for rec in &substances {
            let (extra, extra_unknown) = SubstanceExtra::decode(version, rec.extra);
            substance_list.push(Substance {
                flags: rec.flags,
                mode: rec.mode,
                kind: rec.kind,
                bin: rec.bin,
                extra,
                extra_unknown,
                textures: sub_range(&texture_list, rec.texture_start, rec.texture_count, "texture")?.to_vec(),
            });
        }

        let material_list = materials
            .iter()
            .map(|rec| {
                Ok(Material {
                    flags: rec.flags,
                    animation_speed: rec.animation_speed,
                    substances: sub_range(&substance_list, rec.substance_start, rec.substance_count, "substance")?
                        .to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut models = Vec::with_capacity(parts.len());
        for part in &parts {
            let mut model = Model {
                uid: part.uid,
                flags: part.flags,
                bounds: part.bounds,
                lods: Vec::with_capacity(LOD_SLOTS),
            };
            let lod_recs = sub_range(&lods, part.lod_start, LOD_SLOTS as u32, "lod")?;
            for (slot, lod_rec) in lod_recs.iter().enumerate() {
                let inst_recs = sub_range(&instances, lod_rec.instance_start, lod_rec.instance_count, "instance")?;
                let lod_instances = inst_recs
                    .iter()
                    .map(|inst| {
                        Ok(LodInstance {
                            parent: LodRef::default(),
                            transform: inst.transform,
                            use_transform: inst.use_transform,
                            submodels: sub_range(&submodels, inst.submodel_start, inst.submodel_count, "submodel")?
                                .to_vec(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                model.lods.push(Lod {
                    parent: 0,
                    slot,
                    mask: resolve_mask(version.family(), slot, lod_rec.mask)?,
                    raw_mask: lod_rec.mask,
                    instances: lod_instances,
                });
            }
            models.push(model);
        }

        let mut pkg = ModelPackage {
            version,
            uid: header.uid,
            vertex_type,
            models,
            materials: material_list,
            vertex_buffer,
            index_buffer,
            reserved: header.reserved,
        };
        pkg.relink();
        pkg.validate()?;
        tracing::debug!(
            version = %version,
            uid = pkg.uid,
            models = pkg.models.len(),
            vertices = pkg.vertex_buffer.count(),
            "model package loaded"
        );
        Ok(pkg)
    }

    /// Encode the package, compacting the shared buffers.
    pub fn save(&self) -> Result<Vec<u8>> {
        let version = self.version;
        let compacted = self.compact()?;

        // Flatten the graph into tables.
        let mut parts = Vec::new();
        let mut lods = Vec::new();
        let mut instances = Vec::new();
        let mut submodels = Vec::new();
        let mut sm_iter = compacted.submodels.iter();
        for model in &self.models {
            if model.lods.len() != LOD_SLOTS {
                return Err(Error::invalid(format!(
                    "model {:#x} has {} LOD slots, expected {LOD_SLOTS}",
                    model.uid,
                    model.lods.len()
                )));
            }
            parts.push(PartRecord {
                uid: model.uid,
                flags: model.flags,
                bounds: model.bounds,
                lod_start: u32_len(lods.len(), "lod")?,
            });
            for lod in &model.lods {
                lods.push(LodRecord {
                    instance_start: u32_len(instances.len(), "instance")?,
                    instance_count: u32_len(lod.instances.len(), "instance")?,
                    mask: lod.raw_mask,
                });
                for instance in &lod.instances {
                    instances.push(InstanceRecord {
                        transform: instance.transform,
                        use_transform: instance.use_transform,
                        submodel_start: u32_len(submodels.len(), "submodel")?,
                        submodel_count: u32_len(instance.submodels.len(), "submodel")?,
                    });
                    for _ in &instance.submodels {
                        let sm = sm_iter
                            .next()
                            .ok_or_else(|| Error::other("submodel compaction out of step"))?;
                        submodels.push(*sm);
                    }
                }
            }
        }

        let mut materials = Vec::new();
        let mut substances = Vec::new();
        let mut textures = Vec::new();
        let mut blobs = TextureBlobs::default();
        for material in &self.materials {
            materials.push(MaterialRecord {
                substance_start: u32_len(substances.len(), "substance")?,
                substance_count: u32_len(material.substances.len(), "substance")?,
                flags: material.flags,
                animation_speed: material.animation_speed,
            });
            for substance in &material.substances {
                substances.push(SubstanceRecord {
                    flags: substance.flags,
                    mode: substance.mode,
                    kind: substance.kind,
                    bin: substance.bin,
                    extra: substance.extra.encode(version) | substance.extra_unknown,
                    texture_start: u32_len(textures.len(), "texture")?,
                    texture_count: u32_len(substance.textures.len(), "texture")?,
                });
                for texture in &substance.textures {
                    textures.push(TextureRecord {
                        uid: texture.uid,
                        hash: texture.hash,
                        data_offset: blobs.insert(texture)?,
                        data_size: u32_len(texture.size(), "texture byte")?,
                        width: texture.width,
                        height: texture.height,
                        format: texture.format,
                        flags: texture.flags,
                    });
                }
            }
        }

        // Measure.
        let mut cursor = version.header_size() as u64;
        let mut header = Header {
            version: version.as_u32(),
            uid: self.uid,
            parts: place::<PartRecord>(&mut cursor, parts.len(), version)?,
            lods: place::<LodRecord>(&mut cursor, lods.len(), version)?,
            instances: place::<InstanceRecord>(&mut cursor, instances.len(), version)?,
            submodels: place::<SubModel>(&mut cursor, submodels.len(), version)?,
            materials: place::<MaterialRecord>(&mut cursor, materials.len(), version)?,
            substances: place::<SubstanceRecord>(&mut cursor, substances.len(), version)?,
            textures: place::<TextureRecord>(&mut cursor, textures.len(), version)?,
            reserved: self.reserved,
            ..Header::default()
        };
        header.vertex_descriptor = to_offset(cursor)?;
        header.index_descriptor = to_offset(cursor + DESCRIPTOR_SIZE as u64)?;
        cursor += 2 * DESCRIPTOR_SIZE as u64;
        let vertex_data = align(cursor, DATA_ALIGNMENT);
        cursor = vertex_data + compacted.vertices.size() as u64;
        let index_data = align(cursor, DATA_ALIGNMENT);
        cursor = index_data + compacted.indices.size() as u64;
        if !blobs.is_empty() {
            header.texture_data_offset = to_offset(align(cursor, DATA_ALIGNMENT))?;
            header.texture_data_size = to_offset(blobs.len())?;
        }

        // Write.
        let mut w = ByteWriter::with_capacity(cursor as usize + blobs.len() as usize + 16);
        header.write(&mut w, version)?;
        write_table(&mut w, &header.parts, &parts, version)?;
        write_table(&mut w, &header.lods, &lods, version)?;
        write_table(&mut w, &header.instances, &instances, version)?;
        write_table(&mut w, &header.submodels, &submodels, version)?;
        write_table(&mut w, &header.materials, &materials, version)?;
        write_table(&mut w, &header.substances, &substances, version)?;
        write_table(&mut w, &header.textures, &textures, version)?;

        w.pad_to_position(header.vertex_descriptor as u64)?;
        w.write_u32(u32_len(compacted.vertices.count(), "vertex")?)?;
        w.write_u32(compacted.vertices.stride() as u32)?;
        w.write_u32(self.vertex_type)?;
        w.write_u32(to_offset(vertex_data)?)?;

        w.write_u32(u32_len(compacted.indices.len(), "index")?)?;
        w.write_u32(to_offset(index_data)?)?;
        w.write_u32(0)?;
        w.write_u32(0)?;

        w.pad_to_position(vertex_data)?;
        w.write_bytes(compacted.vertices.as_bytes())?;
        w.pad_to_position(index_data)?;
        for &i in compacted.indices.as_slice() {
            w.write_u16(i)?;
        }
        if !blobs.is_empty() {
            w.pad_to_position(header.texture_data_offset as u64)?;
            blobs.write_to(&mut w)?;
        }
        Ok(w.into_inner())
    }

    /// Copy every distinct vertex range once and rebase indices onto it.
    fn compact(&self) -> Result<Compacted> {
        let mut vertices = VertexBuffer::with_declaration(self.declaration().clone());
        let mut indices = IndexBufferBuilder::new();
        let mut ranges: HashMap<(u32, u32), u32> = HashMap::new();
        let mut submodels = Vec::new();

        for sm in self.submodels() {
            let new_offset = match ranges.get(&(sm.vertex_offset, sm.vertex_count)) {
                Some(&offset) => offset,
                None => {
                    let offset = u32_len(vertices.count(), "vertex")?;
                    vertices.extend_raw(
                        self.vertex_buffer
                            .records(sm.vertex_offset as usize, sm.vertex_count as usize)?,
                    )?;
                    ranges.insert((sm.vertex_offset, sm.vertex_count), offset);
                    offset
                }
            };
            let index_offset = u32_len(indices.len(), "index")?;
            for &i in self.submodel_indices(sm)? {
                let v = resolve_index(sm, i)?;
                if v < sm.vertex_offset || v >= sm.vertex_offset + sm.vertex_count {
                    return Err(Error::invalid(format!(
                        "index {i} (base {}) outside vertex range {}+{}",
                        sm.vertex_base, sm.vertex_offset, sm.vertex_count
                    )));
                }
                let rebased = u16::try_from(v - sm.vertex_offset)
                    .map_err(|_| Error::SizeOverflow(format!("submodel of {} vertices", sm.vertex_count)))?;
                indices.push(rebased);
            }
            submodels.push(SubModel {
                vertex_base: i32::try_from(new_offset)
                    .map_err(|_| Error::SizeOverflow(format!("vertex offset {new_offset}")))?,
                vertex_offset: new_offset,
                index_offset,
                ..*sm
            });
        }

        Ok(Compacted {
            vertices,
            indices: indices.compile(),
            submodels,
        })
    }

    /// Parse the payload of a model package buffer node.
    pub fn from_spooler(tree: &SpoolerTree, id: SpoolerId) -> Result<Self> {
        Self::load(&tree.get_buffer(id)?)
    }

    /// Re-encode into an existing buffer node.
    pub fn write_to_spooler(&self, tree: &mut SpoolerTree, id: SpoolerId) -> Result<()> {
        tree.set_buffer(id, self.save()?)
    }
}

/// Every model package buffer in a tree, in pre-order.
pub fn find_model_packages(tree: &SpoolerTree) -> Vec<SpoolerId> {
    let Some(root) = tree.root() else {
        return Vec::new();
    };
    tree.descendants(root)
        .unwrap_or_default()
        .into_iter()
        .filter(|&id| {
            tree.get(id)
                .map(|n| n.is_buffer() && context::is_model_package(n.context()))
                .unwrap_or(false)
        })
        .collect()
}

struct Compacted {
    vertices: VertexBuffer,
    indices: IndexBuffer,
    submodels: Vec<SubModel>,
}

/// Texture data region with identical blobs stored once.
///
/// (hash, size) only narrows the search; a blob is reused when its bytes match.
#[derive(Default)]
struct TextureBlobs {
    data: ByteWriter,
    offsets: HashMap<(u32, usize), Vec<u32>>,
}

impl TextureBlobs {
    fn insert(&mut self, texture: &Texture) -> Result<u32> {
        let key = (texture.hash, texture.size());
        let data = self.data.as_slice();
        let existing = self.offsets.get(&key).and_then(|candidates| {
            candidates.iter().copied().find(|&offset| {
                let start = offset as usize;
                data.get(start..start + texture.size()) == Some(&texture.data[..])
            })
        });
        if let Some(offset) = existing {
            return Ok(offset);
        }
        self.data.pad_to(DATA_ALIGNMENT)?;
        let offset = self.data.offset_u32()?;
        self.data.write_bytes(&texture.data)?;
        self.offsets.entry(key).or_default().push(offset);
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.data.position()
    }

    fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn write_to(&self, w: &mut ByteWriter) -> Result<()> {
        w.write_bytes(self.data.as_slice())
    }
}

fn to_offset(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::SizeOverflow(format!("package offset {value:#x} exceeds 32 bits")))
}

fn place<R: BinaryRecord<Version = PackageVersion>>(
    cursor: &mut u64,
    count: usize,
    version: PackageVersion,
) -> Result<TableRef> {
    if count == 0 {
        return Ok(TableRef::default());
    }
    let table = TableRef {
        count: u32_len(count, "table")?,
        offset: to_offset(*cursor)?,
    };
    *cursor += (count * R::size(version)) as u64;
    Ok(table)
}

fn write_table<R: BinaryRecord<Version = PackageVersion>>(
    w: &mut ByteWriter,
    table: &TableRef,
    records: &[R],
    version: PackageVersion,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if w.position() != table.offset as u64 {
        return Err(Error::other(format!(
            "package layout error: table expected at {:#x}, writer at {:#x}",
            table.offset,
            w.position()
        )));
    }
    for record in records {
        record.write(w, version)?;
    }
    Ok(())
}

fn read_vertex_buffer(data: &[u8], version: PackageVersion, descriptor: u32) -> Result<VertexBuffer> {
    let mut r = ByteReader::at(data, descriptor as u64)?;
    let count = r.read_u32()? as usize;
    let stride = r.read_u32()? as usize;
    let vertex_type = r.read_u32()?;
    let offset = r.read_u32()? as usize;

    let declaration = VertexDeclaration::lookup(version, vertex_type)?;
    if declaration.size_of() != stride {
        return Err(Error::invalid(format!(
            "vertex stride {stride} does not match the {}-byte declaration of type {vertex_type}",
            declaration.size_of()
        )));
    }
    let end = offset + count * stride;
    let raw = data.get(offset..end).ok_or(Error::UnexpectedEof(end as u64))?;
    let mut vb = VertexBuffer::with_declaration(declaration);
    vb.create_vertices_from_raw(raw, count)?;
    Ok(vb)
}

fn read_index_buffer(data: &[u8], descriptor: u32) -> Result<IndexBuffer> {
    let mut r = ByteReader::at(data, descriptor as u64)?;
    let count = r.read_u32()? as usize;
    let offset = r.read_u32()? as usize;
    let end = offset + count * 2;
    let raw = data.get(offset..end).ok_or(Error::UnexpectedEof(end as u64))?;
    IndexBuffer::from_bytes(raw, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lod_mask::LodSlot;
    use crate::model::package::quad_package;
    use crate::util::{Vec3, Vec4};

    fn with_material(mut pkg: ModelPackage) -> ModelPackage {
        let tex = Texture::new(0xAA, 8, 8, 3, vec![0x11; 40]);
        let mut copy = tex.clone();
        copy.uid = 0xAB;
        pkg.materials.push(Material {
            flags: 2,
            animation_speed: 0.5,
            substances: vec![Substance {
                flags: 1,
                mode: 2,
                kind: 3,
                bin: 4,
                extra: SubstanceExtra::DAMAGE,
                extra_unknown: 0,
                textures: vec![tex, copy],
            }],
        });
        pkg.submodels_mut().next().unwrap().material = MaterialHandle::local(0);
        pkg
    }

    #[test]
    fn test_roundtrip_v6() {
        let pkg = with_material(quad_package());
        let bytes = pkg.save().unwrap();
        let back = ModelPackage::load(&bytes).unwrap();
        assert_eq!(back, pkg);
        // saving the loaded package is stable
        assert_eq!(back.save().unwrap(), bytes);
    }

    #[test]
    fn test_roundtrip_all_versions() {
        for version in PackageVersion::ALL {
            let mut pkg = with_material(quad_package());
            pkg.version = version;
            pkg.vertex_buffer = {
                let mut vb = VertexBuffer::create(version, 0).unwrap();
                vb.create_vertices(&quad_package().vertex_buffer.to_vertices().unwrap())
                    .unwrap();
                vb
            };
            for model in &mut pkg.models {
                for lod in &mut model.lods {
                    lod.mask = resolve_mask(version.family(), lod.slot, 0).unwrap();
                }
            }
            if version == PackageVersion::V1 {
                pkg.materials[0].substances[0].extra = SubstanceExtra::empty();
            }
            let back = ModelPackage::load(&pkg.save().unwrap()).unwrap();
            assert_eq!(back, pkg, "{version}");
        }
    }

    #[test]
    fn test_header_layout() {
        let pkg = with_material(quad_package());
        let bytes = pkg.save().unwrap();
        let mut r = ByteReader::new(&bytes);
        let h = Header::read(&mut r, PackageVersion::V6).unwrap();
        assert_eq!(h.version, 6);
        assert_eq!(h.uid, 0x1234);
        assert_eq!(h.parts, TableRef { count: 1, offset: 0x60 });
        assert_eq!(h.lods.offset, 0x60 + 0x30);
        assert_eq!(h.lods.count, 7);
        assert_eq!(h.textures.count, 2);
        // identical blobs stored once
        assert_eq!(h.texture_data_size, 40);
        assert_eq!(h.texture_data_offset % 16, 0);
    }

    #[test]
    fn test_texture_blobs_compare_bytes() {
        let mut pkg = with_material(quad_package());
        let textures = &mut pkg.materials[0].substances[0].textures;
        textures[1].data = Arc::from(vec![0x22u8; 40]);
        // stale hash: same key as the first blob, different pixels
        textures[1].hash = textures[0].hash;

        let bytes = pkg.save().unwrap();
        let mut r = ByteReader::new(&bytes);
        let h = Header::read(&mut r, PackageVersion::V6).unwrap();
        assert_eq!(h.texture_data_size, 48 + 40);

        let loaded = ModelPackage::load(&bytes).unwrap();
        let textures = &loaded.materials[0].substances[0].textures;
        assert_eq!(&textures[0].data[..], &[0x11u8; 40][..]);
        assert_eq!(&textures[1].data[..], &[0x22u8; 40][..]);
    }

    #[test]
    fn test_reserved_region_preserved() {
        let mut pkg = quad_package();
        pkg.reserved = *b"junk-region-0123";
        let bytes = pkg.save().unwrap();
        assert_eq!(&bytes[0x50..0x60], b"junk-region-0123");
        assert_eq!(ModelPackage::load(&bytes).unwrap().reserved, pkg.reserved);
    }

    #[test]
    fn test_empty_tables_have_zero_offset() {
        let pkg = ModelPackage::new(PackageVersion::V9, 1, 0).unwrap();
        let bytes = pkg.save().unwrap();
        let h = Header::read(&mut ByteReader::new(&bytes), PackageVersion::V9).unwrap();
        assert_eq!(h.parts, TableRef::default());
        assert_eq!(h.textures, TableRef::default());
        assert_eq!(h.texture_data_offset, 0);
        assert_eq!(ModelPackage::load(&bytes).unwrap(), pkg);
    }

    #[test]
    fn test_compaction_dedups_ranges_and_rebases() {
        let mut pkg = quad_package();
        // pad the buffer with unused vertices and move the quad to the end
        let mut verts = vec![crate::model::Vertex::default(); 3];
        verts.extend(pkg.vertex_buffer.to_vertices().unwrap());
        pkg.vertex_buffer.create_vertices(&verts).unwrap();
        {
            let sm = pkg.submodels_mut().next().unwrap();
            sm.vertex_offset = 3;
            sm.vertex_base = 3;
        }
        // second instance sharing the same range
        let instance = pkg.models[0].lods[0].instances[0].clone();
        pkg.models[0].lod_mut(LodSlot::Medium).instances.push(instance);
        pkg.relink();
        pkg.validate().unwrap();

        let back = ModelPackage::load(&pkg.save().unwrap()).unwrap();
        assert_eq!(back.vertex_buffer.count(), 4);
        assert_eq!(back.index_buffer.len(), 12);
        let sms: Vec<_> = back.submodels().copied().collect();
        assert_eq!(sms[0].vertex_offset, 0);
        assert_eq!(sms[1].vertex_offset, 0);
        assert_eq!(sms[1].index_offset, 6);
        assert_eq!(back.submodel_triangles(&sms[1]).unwrap(), vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_load_rejects_bad_stride() {
        let pkg = quad_package();
        let mut bytes = pkg.save().unwrap();
        let desc = u32::from_le_bytes(bytes[0x48..0x4C].try_into().unwrap()) as usize;
        bytes[desc + 4] = 33;
        assert!(ModelPackage::load(&bytes).unwrap_err().is_format_error());
    }

    #[test]
    fn test_load_rejects_out_of_range_index() {
        let pkg = quad_package();
        let mut bytes = pkg.save().unwrap();
        let desc = u32::from_le_bytes(bytes[0x4C..0x50].try_into().unwrap()) as usize;
        let offset = u32::from_le_bytes(bytes[desc + 4..desc + 8].try_into().unwrap()) as usize;
        bytes[offset] = 9;
        assert!(ModelPackage::load(&bytes).is_err());
    }

    #[test]
    fn test_load_rejects_truncation_and_version() {
        let bytes = quad_package().save().unwrap();
        assert!(ModelPackage::load(&bytes[..0x40]).is_err());
        let mut bad = bytes.clone();
        bad[0] = 2;
        assert!(matches!(ModelPackage::load(&bad), Err(Error::UnsupportedVersion(2))));
    }

    #[test]
    fn test_part_bounds_roundtrip() {
        let mut pkg = quad_package();
        pkg.models[0].bounds = BBox::new(Vec4::new(-1.0, -2.0, -3.0, 0.0), Vec4::new(1.0, 2.0, 3.0, 0.0));
        pkg.models[0].flags = 7;
        let back = ModelPackage::load(&pkg.save().unwrap()).unwrap();
        assert_eq!(back.models[0].bounds.max.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(back.models[0].flags, 7);
    }

    #[test]
    fn test_spooler_helpers() {
        use crate::spooler::SpillPolicy;
        let mut tree = SpoolerTree::with_root(context::SPOOLER_ROOT, 1, 4, SpillPolicy::default()).unwrap();
        let root = tree.root().unwrap();
        let pkg = quad_package();
        let node = tree
            .new_buffer(context::MODEL_PACKAGE_PC, 6, 4, pkg.save().unwrap())
            .unwrap();
        let other = tree.new_buffer(0x99, 0, 0, vec![1]).unwrap();
        tree.add_child(root, other).unwrap();
        tree.add_child(root, node).unwrap();

        assert_eq!(find_model_packages(&tree), vec![node]);
        let mut loaded = ModelPackage::from_spooler(&tree, node).unwrap();
        loaded.uid = 0x4321;
        loaded.write_to_spooler(&mut tree, node).unwrap();
        assert_eq!(ModelPackage::from_spooler(&tree, node).unwrap().uid, 0x4321);
    }
}
