//! Container documents: a [`SpoolerTree`] bound to the file it came from.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use tempfile::NamedTempFile;

use super::format::{context, DEFAULT_SPILL_THRESHOLD};
use super::node::SpoolerId;
use super::payload::SpillPolicy;
use super::reader::{read_tree, Source, SpoolerLoaded};
use super::tree::SpoolerTree;
use super::writer::{write_tree, OStream};
use crate::util::{Error, Result};

/// Options that control how containers are loaded.
#[derive(Clone, Debug)]
pub struct SpoolerOptions {
    /// Buffer payloads strictly larger than this are spilled to temp files.
    pub spill_threshold: u64,
    /// Directory for spill files (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
    /// Map the source file instead of reading it.
    pub use_mmap: bool,
}

impl Default for SpoolerOptions {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            temp_dir: None,
            use_mmap: true,
        }
    }
}

impl SpoolerOptions {
    pub fn spill_policy(&self) -> SpillPolicy {
        SpillPolicy {
            threshold: self.spill_threshold,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// An open container file.
///
/// Dereferences to its [`SpoolerTree`], so tree edits go straight through:
///
/// ```ignore
/// let mut file = SpoolerFile::open("vehicles.vvs")?;
/// let root = file.require_root()?;
/// println!("{} children", file.children(root)?.len());
/// file.save()?;
/// ```
#[derive(Debug)]
pub struct SpoolerFile {
    tree: SpoolerTree,
    path: Option<PathBuf>,
}

impl SpoolerFile {
    /// Start a new, unsaved container with an empty root package.
    pub fn create(root_context: u32, version: u8, alignment: u8, options: &SpoolerOptions) -> Result<Self> {
        Ok(Self {
            tree: SpoolerTree::with_root(root_context, version, alignment, options.spill_policy())?,
            path: None,
        })
    }

    /// Start a new container with the standard root context.
    pub fn create_default() -> Result<Self> {
        Self::create(context::SPOOLER_ROOT, 1, 12, &SpoolerOptions::default())
    }

    /// Open with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &SpoolerOptions::default(), |_| {})
    }

    /// Open a container, reporting every node as it is loaded.
    pub fn open_with<F>(path: impl AsRef<Path>, options: &SpoolerOptions, mut on_loaded: F) -> Result<Self>
    where
        F: FnMut(&SpoolerLoaded),
    {
        let path = path.as_ref();
        let source = Source::open(path, options.use_mmap)?;
        let tree = read_tree(&source, options.spill_policy(), &mut on_loaded)?;
        tracing::debug!(path = %path.display(), nodes = tree.len(), "opened container");
        Ok(Self {
            tree,
            path: Some(path.to_path_buf()),
        })
    }

    /// Path this container was opened from or last saved to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tree(&self) -> &SpoolerTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SpoolerTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> SpoolerTree {
        self.tree
    }

    /// Save back to the current path.
    pub fn save(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::other("container has no path; use save_as"))?;
        self.save_as_with(path, None)
    }

    /// Save to a new path, which becomes the current path.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.save_as_with(path, None)
    }

    /// Save with an optional cancel flag. A cancelled save leaves the
    /// destination untouched and returns [`Error::Cancelled`].
    pub fn save_as_with(&mut self, path: impl AsRef<Path>, cancel: Option<&AtomicBool>) -> Result<()> {
        let path = path.as_ref();
        let root = self.tree.require_root()?;
        write_atomic(&self.tree, root, path, cancel)?;
        self.path = Some(path.to_path_buf());
        self.tree.clear_modified();
        tracing::debug!(path = %path.display(), "saved container");
        Ok(())
    }

    /// Write the subtree at `id` as a standalone container.
    pub fn export(&self, id: SpoolerId, path: impl AsRef<Path>) -> Result<()> {
        write_atomic(&self.tree, id, path.as_ref(), None)
    }

    /// Release the tree and every spill file it owns.
    pub fn close(self) {
        if self.tree.is_modified() {
            tracing::debug!(path = ?self.path, "closing container with unsaved changes");
        }
    }
}

impl Deref for SpoolerFile {
    type Target = SpoolerTree;

    fn deref(&self) -> &SpoolerTree {
        &self.tree
    }
}

impl DerefMut for SpoolerFile {
    fn deref_mut(&mut self) -> &mut SpoolerTree {
        &mut self.tree
    }
}

/// Write into a temp file next to `path` and rename it into place.
fn write_atomic(tree: &SpoolerTree, root: SpoolerId, path: &Path, cancel: Option<&AtomicBool>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".dscript-save-")
        .tempfile_in(dir)?;
    {
        let file = tmp.as_file().try_clone()?;
        let mut out = OStream::new(std::io::BufWriter::new(file));
        write_tree(tree, root, &mut out, cancel)?;
    }
    persist(tmp, path)
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
