//! Spooler container writer.
//!
//! Saving is two-pass. [`layout`] walks the tree top-down handing every node
//! its absolute start, and sizes flow back up from the leaves; only then does
//! [`write_tree`] stream entries, zero padding and payloads sequentially, so
//! every offset is known before it is written and nothing is patched later.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};

use super::format::*;
use super::node::{SpoolerId, SpoolerKind};
use super::tree::SpoolerTree;
use crate::util::{align, Error, Result};

/// Output stream that tracks its write position.
pub struct OStream<W: Write> {
    writer: W,
    pos: u64,
}

impl OStream<BufWriter<File>> {
    /// Create a new output stream for the given file path.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(BufWriter::with_capacity(2 * 1024 * 1024, file)))
    }
}

impl<W: Write> OStream<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, pos: 0 }
    }

    /// Get the current write position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Write bytes and advance position.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.pos += 4;
        Ok(())
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.pos += 1;
        Ok(())
    }

    /// Zero-fill up to an absolute position.
    pub fn pad_to(&mut self, pos: u64) -> Result<()> {
        if pos < self.pos {
            return Err(Error::other(format!(
                "layout error: cannot pad backwards from {:#x} to {:#x}",
                self.pos, pos
            )));
        }
        const ZEROS: [u8; 4096] = [0; 4096];
        while self.pos < pos {
            let n = (pos - self.pos).min(ZEROS.len() as u64) as usize;
            self.write_bytes(&ZEROS[..n])?;
        }
        Ok(())
    }

    /// Write a node entry.
    pub fn write_entry(&mut self, entry: &ChunkEntry) -> Result<()> {
        self.write_u32(entry.context)?;
        self.write_u32(entry.offset)?;
        self.write_u8(entry.version)?;
        self.write_u8(entry.description_len)?;
        self.write_u8(entry.alignment)?;
        self.write_u8(entry.reserved)?;
        self.write_u32(entry.size)
    }

    /// Flush the buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for OStream<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Placement of one node computed by the measuring pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    pub id: SpoolerId,
    /// Absolute start of the payload.
    pub start: u64,
    /// Payload size (block size for packages).
    pub size: u64,
    pub children: Vec<NodeLayout>,
}

impl NodeLayout {
    /// Visit this layout and every nested one in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a NodeLayout)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// Measuring pass: place `id` at absolute `start` and size it bottom-up.
pub fn layout(tree: &SpoolerTree, id: SpoolerId, start: u64) -> Result<NodeLayout> {
    layout_at(tree, id, start, 0)
}

fn layout_at(tree: &SpoolerTree, id: SpoolerId, start: u64, depth: usize) -> Result<NodeLayout> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::invalid(format!("{id} nests deeper than {MAX_NESTING_DEPTH} levels")));
    }
    let node = tree.get(id)?;
    let (size, children) = match node.kind() {
        SpoolerKind::Buffer(payload) => (payload.len(), Vec::new()),
        SpoolerKind::Package(child_ids) => {
            let mut cursor = start + BLOCK_HEADER_SIZE + ENTRY_SIZE * child_ids.len() as u64;
            let mut children = Vec::with_capacity(child_ids.len());
            for &child_id in child_ids {
                let child = tree.get(child_id)?;
                let child_start = align(cursor, child.alignment_bytes());
                let child_layout = layout_at(tree, child_id, child_start, depth + 1)?;
                cursor = child_start + child_layout.size + description_footprint(child.description().len());
                children.push(child_layout);
            }
            (cursor - start, children)
        }
    };
    to_u32(size, "node size")?;
    Ok(NodeLayout { id, start, size, children })
}

/// Start of the root payload in a file.
pub fn root_start(tree: &SpoolerTree, root: SpoolerId) -> Result<u64> {
    Ok(align(ENTRY_SIZE, tree.alignment_bytes(root)?))
}

/// Measure a whole file rooted at `root`.
pub fn layout_file(tree: &SpoolerTree, root: SpoolerId) -> Result<NodeLayout> {
    layout(tree, root, root_start(tree, root)?)
}

fn entry_for(tree: &SpoolerTree, layout: &NodeLayout, offset: u64) -> Result<ChunkEntry> {
    let node = tree.get(layout.id)?;
    Ok(ChunkEntry {
        context: node.context(),
        offset: to_u32(offset, "node offset")?,
        version: node.version(),
        description_len: node.description().len() as u8,
        alignment: node.alignment(),
        reserved: node.reserved(),
        size: to_u32(layout.size, "node size")?,
    })
}

/// Write a complete container rooted at `root`.
///
/// `cancel` is polled between the root's children; when it is set the
/// function returns [`Error::Cancelled`] and the caller discards the output.
pub fn write_tree<W: Write>(
    tree: &SpoolerTree,
    root: SpoolerId,
    out: &mut OStream<W>,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    let layout = layout_file(tree, root)?;
    out.write_entry(&entry_for(tree, &layout, layout.start)?)?;
    out.pad_to(layout.start)?;
    write_node(tree, &layout, out, cancel, 0)?;
    write_description(tree, layout.id, out)?;
    out.flush()
}

/// Write a container rooted at `root` into memory.
pub fn write_tree_to_vec(tree: &SpoolerTree, root: SpoolerId) -> Result<Vec<u8>> {
    let mut out = OStream::new(Vec::new());
    write_tree(tree, root, &mut out, None)?;
    Ok(out.into_inner())
}

fn write_description<W: Write>(tree: &SpoolerTree, id: SpoolerId, out: &mut OStream<W>) -> Result<()> {
    let description = tree.get(id)?.description();
    if !description.is_empty() {
        out.write_bytes(description.as_bytes())?;
        out.write_u8(0)?;
    }
    Ok(())
}

fn write_node<W: Write>(
    tree: &SpoolerTree,
    layout: &NodeLayout,
    out: &mut OStream<W>,
    cancel: Option<&AtomicBool>,
    depth: usize,
) -> Result<()> {
    if out.pos() != layout.start {
        return Err(Error::other(format!(
            "layout error: node {} expected at {:#x}, stream at {:#x}",
            layout.id,
            layout.start,
            out.pos()
        )));
    }

    match tree.get(layout.id)?.kind() {
        SpoolerKind::Buffer(payload) => {
            payload.copy_to(out)?;
        }
        SpoolerKind::Package(_) => {
            out.write_u32(CHUNK_MAGIC)?;
            out.write_u32(to_u32(layout.size, "block size")?)?;
            out.write_u32(to_u32(layout.children.len() as u64, "child count")?)?;
            out.write_u32(CHUNK_VERSION)?;
            for child in &layout.children {
                out.write_entry(&entry_for(tree, child, child.start - layout.start)?)?;
            }
            for child in &layout.children {
                if depth == 0 && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                    return Err(Error::Cancelled);
                }
                out.pad_to(child.start)?;
                write_node(tree, child, out, cancel, depth + 1)?;
                write_description(tree, child.id, out)?;
            }
        }
    }
    Ok(())
}
