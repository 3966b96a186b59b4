//! Runtime services shared by the library's callers.
//!
//! - [`Settings`] - persisted tool settings
//! - [`TextureCache`] / [`TextureDecoder`] - decoded texture cache

mod cache;
mod settings;

pub use cache::{TextureCache, TextureDecoder, TextureKey};
pub use settings::Settings;
