//! Arena that owns every node of a container.
//!
//! Packages own their children through the child lists; parents are plain
//! [`SpoolerId`] back-references. Removing a child detaches it: the node stays
//! in the arena as an orphan until [`SpoolerTree::dispose`] frees it.

use std::io::Cursor;

use super::format::{alignment_bytes, is_package_payload, MAX_ALIGNMENT_SHIFT};
use super::node::{Spooler, SpoolerId, SpoolerKind};
use super::payload::{BufferPayload, SpillPolicy};
use super::writer::layout_file;
use crate::util::{Error, Result};

/// Owner of a container's node graph.
#[derive(Debug, Default)]
pub struct SpoolerTree {
    nodes: Vec<Option<Spooler>>,
    free: Vec<usize>,
    root: Option<SpoolerId>,
    spill: SpillPolicy,
    modified: bool,
}

impl SpoolerTree {
    /// Create an empty tree.
    pub fn new(spill: SpillPolicy) -> Self {
        Self {
            spill,
            ..Self::default()
        }
    }

    /// Create a tree whose root is a new, empty package.
    pub fn with_root(context: u32, version: u8, alignment: u8, spill: SpillPolicy) -> Result<Self> {
        let mut tree = Self::new(spill);
        let root = tree.new_package(context, version, alignment)?;
        tree.set_root(root)?;
        tree.modified = false;
        Ok(tree)
    }

    #[inline]
    pub fn spill_policy(&self) -> &SpillPolicy {
        &self.spill
    }

    #[inline]
    pub fn root(&self) -> Option<SpoolerId> {
        self.root
    }

    /// Root handle, or an error for an empty tree.
    pub fn require_root(&self) -> Result<SpoolerId> {
        self.root.ok_or_else(|| Error::InvalidNode("tree has no root".into()))
    }

    /// Make a detached node the root.
    pub fn set_root(&mut self, id: SpoolerId) -> Result<()> {
        if self.get(id)?.parent.is_some() {
            return Err(Error::InvalidNode(format!("{id} is attached to a parent")));
        }
        self.root = Some(id);
        self.modified = true;
        Ok(())
    }

    /// Number of live nodes (attached or orphaned).
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[inline]
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    #[inline]
    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    pub fn get(&self, id: SpoolerId) -> Result<&Spooler> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidNode(format!("{id} does not exist")))
    }

    fn get_mut(&mut self, id: SpoolerId) -> Result<&mut Spooler> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidNode(format!("{id} does not exist")))
    }

    pub fn contains(&self, id: SpoolerId) -> bool {
        self.get(id).is_ok()
    }

    fn insert(&mut self, node: Spooler) -> SpoolerId {
        self.modified = true;
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            SpoolerId(slot)
        } else {
            self.nodes.push(Some(node));
            SpoolerId(self.nodes.len() - 1)
        }
    }

    fn check_alignment(alignment: u8) -> Result<()> {
        if alignment > MAX_ALIGNMENT_SHIFT {
            return Err(Error::invalid(format!("alignment shift {alignment} exceeds {MAX_ALIGNMENT_SHIFT}")));
        }
        Ok(())
    }

    /// A buffer payload that opens with a block header would load back as a package.
    fn check_buffer_payload(data: &[u8]) -> Result<()> {
        if is_package_payload(data) {
            return Err(Error::invalid(format!(
                "buffer payload of {} bytes starts with the chunk block magic",
                data.len()
            )));
        }
        Ok(())
    }

    /// Create a detached, empty package node.
    pub fn new_package(&mut self, context: u32, version: u8, alignment: u8) -> Result<SpoolerId> {
        Self::check_alignment(alignment)?;
        Ok(self.insert(Spooler::new(context, version, alignment, SpoolerKind::Package(Vec::new()))))
    }

    /// Create a detached buffer node.
    pub fn new_buffer(&mut self, context: u32, version: u8, alignment: u8, data: Vec<u8>) -> Result<SpoolerId> {
        Self::check_alignment(alignment)?;
        Self::check_buffer_payload(&data)?;
        let payload = BufferPayload::new(data, &self.spill)?;
        Ok(self.insert(Spooler::new(context, version, alignment, SpoolerKind::Buffer(payload))))
    }

    /// Insert a node built by the reader (already validated).
    pub(crate) fn insert_loaded(&mut self, node: Spooler) -> SpoolerId {
        self.insert(node)
    }

    pub(crate) fn attach_loaded(&mut self, parent: SpoolerId, child: SpoolerId) -> Result<()> {
        self.get_mut(child)?.parent = Some(parent);
        match &mut self.get_mut(parent)?.kind {
            SpoolerKind::Package(children) => {
                children.push(child);
                Ok(())
            }
            SpoolerKind::Buffer(_) => Err(Error::InvalidNode(format!("{parent} is not a package"))),
        }
    }

    /// Children of a node (empty for buffers).
    pub fn children(&self, id: SpoolerId) -> Result<&[SpoolerId]> {
        Ok(self.get(id)?.children())
    }

    pub fn parent(&self, id: SpoolerId) -> Result<Option<SpoolerId>> {
        Ok(self.get(id)?.parent)
    }

    fn is_ancestor(&self, ancestor: SpoolerId, mut id: SpoolerId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.get(id).ok().and_then(|n| n.parent) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    /// Append a detached node to a package.
    pub fn add_child(&mut self, parent: SpoolerId, child: SpoolerId) -> Result<()> {
        let count = self.children(parent)?.len();
        self.insert_child(parent, count, child)
    }

    /// Insert a detached node into a package at `index`.
    pub fn insert_child(&mut self, parent: SpoolerId, index: usize, child: SpoolerId) -> Result<()> {
        if self.get(child)?.parent.is_some() {
            return Err(Error::InvalidNode(format!("{child} already has a parent")));
        }
        if self.root == Some(child) {
            return Err(Error::InvalidNode(format!("{child} is the root")));
        }
        if self.is_ancestor(child, parent) {
            return Err(Error::InvalidNode(format!("{child} is an ancestor of {parent}")));
        }
        match &mut self.get_mut(parent)?.kind {
            SpoolerKind::Package(children) => {
                if index > children.len() {
                    return Err(Error::InvalidNode(format!(
                        "insert index {index} out of bounds (count: {})",
                        children.len()
                    )));
                }
                children.insert(index, child);
            }
            SpoolerKind::Buffer(_) => return Err(Error::InvalidNode(format!("{parent} is not a package"))),
        }
        self.get_mut(child)?.parent = Some(parent);
        self.modified = true;
        Ok(())
    }

    /// Detach a child from its package. The child becomes an orphan.
    pub fn remove_child(&mut self, parent: SpoolerId, child: SpoolerId) -> Result<()> {
        match &mut self.get_mut(parent)?.kind {
            SpoolerKind::Package(children) => {
                let pos = children
                    .iter()
                    .position(|&c| c == child)
                    .ok_or_else(|| Error::InvalidNode(format!("{child} is not a child of {parent}")))?;
                children.remove(pos);
            }
            SpoolerKind::Buffer(_) => return Err(Error::InvalidNode(format!("{parent} is not a package"))),
        }
        self.get_mut(child)?.parent = None;
        self.modified = true;
        Ok(())
    }

    /// Reorder a package's children.
    pub fn move_child(&mut self, parent: SpoolerId, from: usize, to: usize) -> Result<()> {
        match &mut self.get_mut(parent)?.kind {
            SpoolerKind::Package(children) => {
                if from >= children.len() || to >= children.len() {
                    return Err(Error::InvalidNode(format!(
                        "move {from} -> {to} out of bounds (count: {})",
                        children.len()
                    )));
                }
                let child = children.remove(from);
                children.insert(to, child);
            }
            SpoolerKind::Buffer(_) => return Err(Error::InvalidNode(format!("{parent} is not a package"))),
        }
        self.modified = true;
        Ok(())
    }

    /// Free a node and its whole subtree, deleting any spill files.
    pub fn dispose(&mut self, id: SpoolerId) -> Result<()> {
        if let Some(parent) = self.get(id)?.parent {
            self.remove_child(parent, id)?;
        }
        if self.root == Some(id) {
            self.root = None;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                stack.extend_from_slice(node.children());
                self.free.push(next.0);
            }
        }
        self.modified = true;
        Ok(())
    }

    /// Node and all descendants in pre-order.
    pub fn descendants(&self, id: SpoolerId) -> Result<Vec<SpoolerId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = self.get(next)?;
            out.push(next);
            stack.extend(node.children().iter().rev());
        }
        Ok(out)
    }

    /// Every attached node with the given context, in pre-order.
    pub fn find_all(&self, context: u32) -> Vec<SpoolerId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        self.descendants(root)
            .unwrap_or_default()
            .into_iter()
            .filter(|&id| self.get(id).map(|n| n.context == context).unwrap_or(false))
            .collect()
    }

    /// Child indices leading from the root to `id`.
    pub fn path_of(&self, id: SpoolerId) -> Result<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.get(current)?.parent {
            let index = self
                .children(parent)?
                .iter()
                .position(|&c| c == current)
                .ok_or_else(|| Error::invalid(format!("{current} missing from its parent's children")))?;
            path.push(index);
            current = parent;
        }
        if self.root != Some(current) {
            return Err(Error::InvalidNode(format!("{id} is not attached to the root")));
        }
        path.reverse();
        Ok(path)
    }

    /// Follow child indices from the root.
    pub fn node_at_path(&self, path: &[usize]) -> Result<SpoolerId> {
        let mut current = self.require_root()?;
        for &index in path {
            let children = self.children(current)?;
            current = *children.get(index).ok_or_else(|| {
                Error::InvalidNode(format!("child {index} of {current} out of bounds (count: {})", children.len()))
            })?;
        }
        Ok(current)
    }

    /// Nesting depth (root = 0).
    pub fn depth(&self, id: SpoolerId) -> Result<usize> {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.get(current)?.parent {
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }

    fn payload(&self, id: SpoolerId) -> Result<&BufferPayload> {
        self.get(id)?
            .payload()
            .ok_or_else(|| Error::InvalidNode(format!("{id} is not a buffer")))
    }

    /// Full payload of a buffer node, rehydrating spilled data.
    pub fn get_buffer(&self, id: SpoolerId) -> Result<Vec<u8>> {
        self.payload(id)?.to_vec()
    }

    /// Payload as an in-memory stream.
    pub fn buffer_reader(&self, id: SpoolerId) -> Result<Cursor<Vec<u8>>> {
        Ok(Cursor::new(self.get_buffer(id)?))
    }

    /// Replace a buffer's payload. The previous spill file, if any, is deleted.
    pub fn set_buffer(&mut self, id: SpoolerId, data: Vec<u8>) -> Result<()> {
        Self::check_buffer_payload(&data)?;
        let payload = BufferPayload::new(data, &self.spill)?;
        match &mut self.get_mut(id)?.kind {
            SpoolerKind::Buffer(old) => *old = payload,
            SpoolerKind::Package(_) => return Err(Error::InvalidNode(format!("{id} is not a buffer"))),
        }
        self.modified = true;
        Ok(())
    }

    pub fn set_context(&mut self, id: SpoolerId, context: u32) -> Result<()> {
        self.get_mut(id)?.context = context;
        self.modified = true;
        Ok(())
    }

    pub fn set_version(&mut self, id: SpoolerId, version: u8) -> Result<()> {
        self.get_mut(id)?.version = version;
        self.modified = true;
        Ok(())
    }

    pub fn set_alignment(&mut self, id: SpoolerId, alignment: u8) -> Result<()> {
        Self::check_alignment(alignment)?;
        self.get_mut(id)?.alignment = alignment;
        self.modified = true;
        Ok(())
    }

    /// Set the free-text label. Descriptions are limited to 255 bytes.
    pub fn set_description(&mut self, id: SpoolerId, description: impl Into<String>) -> Result<()> {
        let description = description.into();
        if description.len() > u8::MAX as usize {
            return Err(Error::invalid(format!(
                "description of {} bytes exceeds 255",
                description.len()
            )));
        }
        self.get_mut(id)?.description = description;
        self.modified = true;
        Ok(())
    }

    /// Alignment in bytes of a node.
    pub fn alignment_bytes(&self, id: SpoolerId) -> Result<u64> {
        Ok(alignment_bytes(self.get(id)?.alignment))
    }

    /// Serialized payload size. Package sizes depend on where the block
    /// lands, so attached packages are measured in place and detached ones
    /// as they would be exported.
    pub fn size(&self, id: SpoolerId) -> Result<u64> {
        let node = self.get(id)?;
        if let Some(payload) = node.payload() {
            return Ok(payload.len());
        }
        if let (Some(root), Ok(path)) = (self.root, self.path_of(id)) {
            let mut layout = layout_file(self, root)?;
            for index in path {
                layout = layout.children.swap_remove(index);
            }
            return Ok(layout.size);
        }
        Ok(layout_file(self, id)?.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spooler::format::CHUNK_MAGIC;

    fn tree() -> (SpoolerTree, SpoolerId) {
        let tree = SpoolerTree::with_root(0x1000, 1, 4, SpillPolicy::default()).unwrap();
        let root = tree.root().unwrap();
        (tree, root)
    }

    #[test]
    fn test_buffer_rejects_block_magic() {
        let (mut tree, root) = tree();
        let mut data = CHUNK_MAGIC.to_le_bytes().to_vec();
        data.resize(16, 0);
        let err = tree.new_buffer(0x20, 1, 4, data.clone()).unwrap_err();
        assert!(err.is_format_error());

        let id = tree.new_buffer(0x20, 1, 4, vec![0; 16]).unwrap();
        tree.add_child(root, id).unwrap();
        assert!(tree.set_buffer(id, data).is_err());
        assert_eq!(tree.get_buffer(id).unwrap(), vec![0; 16]);

        // shorter than a block header is still plain data
        tree.set_buffer(id, CHUNK_MAGIC.to_le_bytes().to_vec()).unwrap();
    }

    #[test]
    fn test_add_remove_reorder() {
        let (mut tree, root) = tree();
        let a = tree.new_buffer(1, 0, 2, vec![1, 2, 3]).unwrap();
        let b = tree.new_buffer(2, 0, 2, vec![4]).unwrap();
        tree.add_child(root, a).unwrap();
        tree.add_child(root, b).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[a, b]);
        assert_eq!(tree.parent(a).unwrap(), Some(root));
        assert!(tree.is_modified());

        tree.move_child(root, 1, 0).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[b, a]);

        tree.remove_child(root, b).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[a]);
        assert_eq!(tree.parent(b).unwrap(), None);
        // orphan still alive until disposed
        assert!(tree.contains(b));
        tree.dispose(b).unwrap();
        assert!(!tree.contains(b));
    }

    #[test]
    fn test_rejects_cycles_and_double_parents() {
        let (mut tree, root) = tree();
        let p = tree.new_package(5, 0, 0).unwrap();
        let q = tree.new_package(6, 0, 0).unwrap();
        tree.add_child(root, p).unwrap();
        tree.add_child(p, q).unwrap();
        assert!(tree.add_child(root, q).is_err());
        tree.remove_child(p, q).unwrap();
        tree.add_child(q, root).unwrap_err();
        let buf = tree.new_buffer(1, 0, 0, vec![]).unwrap();
        assert!(tree.add_child(buf, q).is_err());
    }

    #[test]
    fn test_dispose_subtree_reuses_slots() {
        let (mut tree, root) = tree();
        let p = tree.new_package(5, 0, 0).unwrap();
        let c = tree.new_buffer(1, 0, 0, vec![0; 8]).unwrap();
        tree.add_child(root, p).unwrap();
        tree.add_child(p, c).unwrap();
        assert_eq!(tree.len(), 3);
        tree.dispose(p).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.children(root).unwrap().is_empty());
        let reused = tree.new_package(7, 0, 0).unwrap();
        assert!(reused == p || reused == c);
    }

    #[test]
    fn test_paths() {
        let (mut tree, root) = tree();
        let p = tree.new_package(5, 0, 0).unwrap();
        let a = tree.new_buffer(1, 0, 0, vec![]).unwrap();
        let b = tree.new_buffer(2, 0, 0, vec![]).unwrap();
        tree.add_child(root, p).unwrap();
        tree.add_child(p, a).unwrap();
        tree.add_child(p, b).unwrap();
        assert_eq!(tree.path_of(b).unwrap(), vec![0, 1]);
        assert_eq!(tree.node_at_path(&[0, 1]).unwrap(), b);
        assert_eq!(tree.depth(b).unwrap(), 2);
        assert!(tree.node_at_path(&[3]).is_err());
        assert_eq!(tree.descendants(root).unwrap(), vec![root, p, a, b]);
        assert_eq!(tree.find_all(2), vec![b]);
    }

    #[test]
    fn test_set_buffer_releases_spill_file() {
        let (mut tree, root) = tree();
        let big = tree.new_buffer(1, 0, 0, vec![7; 5000]).unwrap();
        tree.add_child(root, big).unwrap();
        let path = tree.get(big).unwrap().payload().unwrap().spill_path().unwrap().to_path_buf();
        assert!(path.exists());
        tree.set_buffer(big, vec![1, 2, 3]).unwrap();
        assert!(!path.exists());
        assert_eq!(tree.get_buffer(big).unwrap(), vec![1, 2, 3]);
        assert!(tree.set_buffer(root, vec![]).is_err());
    }

    #[test]
    fn test_package_size_is_measured() {
        let (mut tree, root) = tree();
        let p = tree.new_package(5, 0, 0).unwrap();
        let a = tree.new_buffer(1, 0, 0, vec![0; 10]).unwrap();
        tree.add_child(root, p).unwrap();
        tree.add_child(p, a).unwrap();
        assert_eq!(tree.size(a).unwrap(), 10);
        // header + one entry + payload
        assert_eq!(tree.size(p).unwrap(), 16 + 16 + 10);
        // root: header + entry, child p aligned to 16 bytes
        assert_eq!(tree.size(root).unwrap(), 32 + 42);
    }

    #[test]
    fn test_description_limit() {
        let (mut tree, root) = tree();
        tree.set_description(root, "vehicles").unwrap();
        assert_eq!(tree.get(root).unwrap().description(), "vehicles");
        assert!(tree.set_description(root, "x".repeat(256)).is_err());
    }
}
