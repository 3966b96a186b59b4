//! Spooler nodes: the leaf buffers and composite packages of a container.

use std::fmt;

use super::format::alignment_bytes;
use super::payload::BufferPayload;

/// Handle of a node inside a [`SpoolerTree`](super::SpoolerTree).
///
/// Handles are plain indices: they never own the node they name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpoolerId(pub(crate) usize);

impl SpoolerId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SpoolerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Leaf payload or ordered children.
#[derive(Debug)]
pub enum SpoolerKind {
    Buffer(BufferPayload),
    Package(Vec<SpoolerId>),
}

/// A node of the container tree.
#[derive(Debug)]
pub struct Spooler {
    pub(crate) context: u32,
    pub(crate) version: u8,
    pub(crate) alignment: u8,
    pub(crate) reserved: u8,
    pub(crate) description: String,
    pub(crate) parent: Option<SpoolerId>,
    pub(crate) kind: SpoolerKind,
}

impl Spooler {
    pub(crate) fn new(context: u32, version: u8, alignment: u8, kind: SpoolerKind) -> Self {
        Self {
            context,
            version,
            alignment,
            reserved: 0,
            description: String::new(),
            parent: None,
            kind,
        }
    }

    /// Content tag ("chunk magic").
    #[inline]
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Content-specific format version.
    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Alignment as a power-of-two shift.
    #[inline]
    pub fn alignment(&self) -> u8 {
        self.alignment
    }

    /// Alignment in bytes.
    #[inline]
    pub fn alignment_bytes(&self) -> u64 {
        alignment_bytes(self.alignment)
    }

    /// Reserved entry byte, kept so files round-trip.
    #[inline]
    pub fn reserved(&self) -> u8 {
        self.reserved
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Owning package, or `None` for the root and for detached nodes.
    #[inline]
    pub fn parent(&self) -> Option<SpoolerId> {
        self.parent
    }

    #[inline]
    pub fn is_package(&self) -> bool {
        matches!(self.kind, SpoolerKind::Package(_))
    }

    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, SpoolerKind::Buffer(_))
    }

    #[inline]
    pub fn kind(&self) -> &SpoolerKind {
        &self.kind
    }

    /// Children in order (empty for buffers).
    #[inline]
    pub fn children(&self) -> &[SpoolerId] {
        match &self.kind {
            SpoolerKind::Package(children) => children,
            SpoolerKind::Buffer(_) => &[],
        }
    }

    /// Buffer payload, if this is a buffer node.
    #[inline]
    pub fn payload(&self) -> Option<&BufferPayload> {
        match &self.kind {
            SpoolerKind::Buffer(payload) => Some(payload),
            SpoolerKind::Package(_) => None,
        }
    }

    /// Payload size of a buffer node (0 for packages, whose size depends on layout).
    #[inline]
    pub fn buffer_size(&self) -> u64 {
        self.payload().map_or(0, BufferPayload::len)
    }
}
