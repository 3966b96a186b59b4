//! Spooler container reader.
//!
//! The whole file is mapped (or read) once, the tree is materialised
//! recursively, and buffer payloads are copied out of the mapping into
//! resident memory or spill files. Nothing refers back to the source file
//! after loading, so the file can be overwritten by a later save.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use super::format::*;
use super::node::{Spooler, SpoolerId, SpoolerKind};
use super::payload::{BufferPayload, SpillPolicy};
use super::tree::SpoolerTree;
use crate::util::{ByteReader, Error, Result};

/// Notification raised once per node as the tree is materialised (pre-order).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpoolerLoaded {
    pub id: SpoolerId,
    pub context: u32,
    pub version: u8,
    /// Payload size (block size for packages).
    pub size: u64,
    pub is_package: bool,
    /// Nesting depth, root = 0.
    pub depth: usize,
}

/// Raw bytes of a container file.
pub enum Source {
    /// Memory-mapped file (preferred for large archives)
    Mmap(Mmap),
    /// Whole file read into memory (fallback)
    Bytes(Vec<u8>),
}

impl Source {
    /// Open a file, mapping it when `use_mmap` is set and the `mmap` feature is on.
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if size < ENTRY_SIZE {
            return Err(Error::UnexpectedEof(size));
        }

        if cfg!(feature = "mmap") && use_mmap {
            // Safety: the mapping is read-only and only lives for the duration of the load
            let mmap = unsafe { Mmap::map(&file) }?;
            Ok(Self::Mmap(mmap))
        } else {
            Ok(Self::Bytes(std::fs::read(path)?))
        }
    }
}

impl Deref for Source {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mmap(mmap) => mmap,
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Materialise a tree from container bytes.
pub fn read_tree<F>(data: &[u8], spill: SpillPolicy, on_loaded: &mut F) -> Result<SpoolerTree>
where
    F: FnMut(&SpoolerLoaded),
{
    let mut reader = ByteReader::at(data, ROOT_ENTRY_POS)?;
    let entry = ChunkEntry::read(&mut reader)?;
    let start = entry.offset as u64;
    if start < ENTRY_SIZE {
        return Err(Error::invalid(format!("root payload at {start:#x} overlaps the root entry")));
    }
    let end = start + entry.size as u64 + entry.description_footprint();
    if end > data.len() as u64 {
        return Err(Error::UnexpectedEof(end));
    }

    let mut tree = SpoolerTree::new(spill);
    let mut loader = Loader {
        data,
        tree: &mut tree,
        on_loaded,
    };
    let root = loader.read_node(&entry, start, None, 0)?;
    tree.set_root(root)?;
    tree.clear_modified();
    tracing::debug!(nodes = tree.len(), bytes = data.len(), "spooler tree loaded");
    Ok(tree)
}

struct Loader<'a, 't, F> {
    data: &'a [u8],
    tree: &'t mut SpoolerTree,
    on_loaded: &'t mut F,
}

impl<F: FnMut(&SpoolerLoaded)> Loader<'_, '_, F> {
    fn read_description(&self, entry: &ChunkEntry, payload_end: u64) -> Result<String> {
        if entry.description_len == 0 {
            return Ok(String::new());
        }
        let start = payload_end as usize;
        let len = entry.description_len as usize;
        let bytes = &self.data[start..start + len];
        if self.data[start + len] != 0 {
            return Err(Error::invalid(format!(
                "description of context {:#x} at {:#x} is not NUL-terminated",
                entry.context, start
            )));
        }
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::invalid(format!("description of context {:#x} is not UTF-8", entry.context)))
    }

    /// Read one node whose payload starts at absolute `start`.
    /// The caller has checked that payload and description are in bounds.
    fn read_node(
        &mut self,
        entry: &ChunkEntry,
        start: u64,
        parent: Option<SpoolerId>,
        depth: usize,
    ) -> Result<SpoolerId> {
        let data = self.data;
        let end = start + entry.size as u64;
        let payload = &data[start as usize..end as usize];
        let description = self.read_description(entry, end)?;

        if start % alignment_bytes(entry.alignment) != 0 {
            tracing::warn!(
                context = entry.context,
                start,
                alignment = entry.alignment,
                "node is not aligned to its declared boundary; save will realign it"
            );
        }

        let is_package = is_package_payload(payload);
        let kind = if is_package {
            SpoolerKind::Package(Vec::new())
        } else {
            SpoolerKind::Buffer(BufferPayload::from_slice(payload, self.tree.spill_policy())?)
        };
        let mut node = Spooler::new(entry.context, entry.version, entry.alignment, kind);
        node.reserved = entry.reserved;
        node.description = description;

        let id = self.tree.insert_loaded(node);
        if let Some(parent) = parent {
            self.tree.attach_loaded(parent, id)?;
        }
        tracing::trace!(
            id = %id,
            context = entry.context,
            size = entry.size,
            is_package,
            "node loaded"
        );
        (self.on_loaded)(&SpoolerLoaded {
            id,
            context: entry.context,
            version: entry.version,
            size: entry.size as u64,
            is_package,
            depth,
        });

        if is_package {
            self.read_block(id, entry, start, depth)?;
        }
        Ok(id)
    }

    fn read_block(&mut self, id: SpoolerId, entry: &ChunkEntry, start: u64, depth: usize) -> Result<()> {
        let data = self.data;
        let block = &data[start as usize..start as usize + entry.size as usize];
        let mut reader = ByteReader::new(block);

        let magic = reader.read_u32()?;
        if magic != CHUNK_MAGIC {
            return Err(Error::InvalidMagic {
                pos: start,
                expected: CHUNK_MAGIC,
                found: magic,
            });
        }
        let block_size = reader.read_u32()?;
        let count = reader.read_u32()? as u64;
        let version = reader.read_u32()?;

        if version != CHUNK_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        if block_size != entry.size {
            return Err(Error::invalid(format!(
                "block at {start:#x} declares size {block_size:#x}, entry says {:#x}",
                entry.size
            )));
        }
        let entries_end = BLOCK_HEADER_SIZE + count * ENTRY_SIZE;
        if entries_end > block_size as u64 {
            return Err(Error::UnexpectedEof(start + entries_end));
        }

        let mut children = Vec::with_capacity(count as usize);
        for _ in 0..count {
            children.push(ChunkEntry::read(&mut reader)?);
        }

        let mut spans = Vec::with_capacity(children.len());
        for child in &children {
            let rel = child.offset as u64;
            if rel < entries_end {
                return Err(Error::invalid(format!(
                    "child {:#x} at offset {rel:#x} overlaps the block header of {start:#x}",
                    child.context
                )));
            }
            let rel_end = rel + child.size as u64 + child.description_footprint();
            if rel_end > block_size as u64 {
                return Err(Error::UnexpectedEof(start + rel_end));
            }
            spans.push((rel, rel_end));
        }
        spans.sort_unstable();
        if let Some(pair) = spans.windows(2).find(|pair| pair[1].0 < pair[0].1) {
            return Err(Error::invalid(format!(
                "children at {:#x} and {:#x} of block {start:#x} overlap",
                start + pair[0].0,
                start + pair[1].0
            )));
        }

        if !children.is_empty() && depth + 1 > MAX_NESTING_DEPTH {
            return Err(Error::invalid(format!(
                "block at {start:#x} nests deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        for child in &children {
            self.read_node(child, start + child.offset as u64, Some(id), depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ByteWriter;

    fn entry(context: u32, offset: u32, size: u32) -> ChunkEntry {
        ChunkEntry {
            context,
            offset,
            size,
            ..ChunkEntry::default()
        }
    }

    /// Root package at 0x10 holding one 4-byte buffer.
    fn sample() -> Vec<u8> {
        let mut w = ByteWriter::new();
        entry(0x1000, 0x10, 0x24).write(&mut w).unwrap();
        w.write_u32(CHUNK_MAGIC).unwrap();
        w.write_u32(0x24).unwrap();
        w.write_u32(1).unwrap();
        w.write_u32(CHUNK_VERSION).unwrap();
        entry(0x42, 0x20, 4).write(&mut w).unwrap();
        w.write_bytes(&[9, 8, 7, 6]).unwrap();
        w.into_inner()
    }

    #[test]
    fn test_read_minimal_tree() {
        let data = sample();
        let mut events = Vec::new();
        let tree = read_tree(&data, SpillPolicy::default(), &mut |e: &SpoolerLoaded| events.push(e.clone())).unwrap();
        let root = tree.root().unwrap();
        let children = tree.children(root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(tree.get_buffer(children[0]).unwrap(), vec![9, 8, 7, 6]);
        assert!(!tree.is_modified());

        assert_eq!(events.len(), 2);
        assert!(events[0].is_package);
        assert_eq!(events[1].context, 0x42);
        assert_eq!(events[1].depth, 1);
    }

    #[test]
    fn test_truncated_payload() {
        let data = sample();
        let err = read_tree(&data[..data.len() - 1], SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof(_)));
    }

    #[test]
    fn test_block_size_mismatch() {
        let mut data = sample();
        // block size field of the root block
        data[0x14] = 0x28;
        let err = read_tree(&data, SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_bad_block_version() {
        let mut data = sample();
        data[0x1C] = 2;
        let err = read_tree(&data, SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(2)));
    }

    #[test]
    fn test_child_overlapping_header() {
        let mut data = sample();
        // child offset points into the entry table
        data[0x10 + 0x10 + 4] = 0x10;
        let err = read_tree(&data, SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }

    #[test]
    fn test_overlapping_siblings() {
        let mut w = ByteWriter::new();
        entry(0x1000, 0x10, 0x38).write(&mut w).unwrap();
        w.write_u32(CHUNK_MAGIC).unwrap();
        w.write_u32(0x38).unwrap();
        w.write_u32(2).unwrap();
        w.write_u32(CHUNK_VERSION).unwrap();
        entry(0x42, 0x30, 8).write(&mut w).unwrap();
        // second child starts inside the first
        entry(0x43, 0x34, 4).write(&mut w).unwrap();
        w.write_bytes(&[0; 8]).unwrap();
        let data = w.into_inner();

        let err = read_tree(&data, SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)), "{err}");
    }

    #[test]
    fn test_nesting_depth_capped() {
        // every block holds one child block at the same relative layout
        let levels = MAX_NESTING_DEPTH + 2;
        let block = |remaining: usize| (remaining as u32) * 0x20;
        let mut w = ByteWriter::new();
        entry(0x1000, 0x10, block(levels)).write(&mut w).unwrap();
        for level in 0..levels {
            let size = block(levels - level);
            w.write_u32(CHUNK_MAGIC).unwrap();
            w.write_u32(size).unwrap();
            w.write_u32(u32::from(level + 1 < levels)).unwrap();
            w.write_u32(CHUNK_VERSION).unwrap();
            if level + 1 < levels {
                entry(0x20, 0x20, size - 0x20).write(&mut w).unwrap();
            } else {
                w.write_bytes(&[0; 16]).unwrap();
            }
        }
        let data = w.into_inner();

        let err = read_tree(&data, SpillPolicy::default(), &mut |_: &SpoolerLoaded| {}).unwrap_err();
        assert!(err.to_string().contains("nests deeper"), "{err}");
    }
}
