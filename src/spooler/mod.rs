//! Spooler chunk container format.
//!
//! A container is a tree of context-tagged nodes. Leaves ("buffers") carry
//! raw payloads; composites ("packages") carry a block of child entries
//! followed by the children themselves.
//!
//! ## File Structure
//!
//! ```text
//! +----------------------+
//! | Root entry           |  16 bytes at position 0
//! +----------------------+
//! | padding              |  zero, up to 1 << root.alignment
//! +----------------------+
//! | Block header         |  "CHNK", block size, child count, version 3
//! +----------------------+
//! | Child entries        |  16 bytes each, offsets relative to the block
//! +----------------------+
//! | padding / child 0    |  each child aligned from the start of the file,
//! | [description\0]      |  followed by its optional description
//! | padding / child 1    |
//! | ...                  |
//! +----------------------+
//! ```
//!
//! Entry layout: context u32, offset u32, version u8, description length u8,
//! alignment shift u8, reserved u8, size u32.

mod file;
mod format;
mod node;
mod payload;
mod reader;
mod tree;
pub mod writer;

pub use file::*;
pub use format::*;
pub use node::*;
pub use payload::*;
pub use reader::*;
pub use tree::*;
pub use writer::{layout, layout_file, write_tree, write_tree_to_vec, NodeLayout, OStream};
