//! Persistent tool settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::spooler::{SpoolerOptions, DEFAULT_SPILL_THRESHOLD};
use crate::util::Result;

use super::cache::TextureCache;

/// Settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Containers
    /// Buffer payloads strictly larger than this are spilled to temp files.
    pub spill_threshold: u64,
    pub temp_dir: Option<PathBuf>,
    pub use_mmap: bool,

    // Model packages
    /// Fail saves on unresolved material handles instead of warning.
    pub strict_materials: bool,

    // Textures
    pub texture_cache_capacity: usize,

    // Recent files (most recent first, max 10)
    pub recent_files: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            temp_dir: None,
            use_mmap: true,
            strict_materials: false,
            texture_cache_capacity: TextureCache::<()>::DEFAULT_CAPACITY,
            recent_files: Vec::new(),
        }
    }
}

const MAX_RECENT_FILES: usize = 10;

impl Settings {
    /// Settings file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("dscript");
            p.push("settings.json");
            p
        })
    }

    /// Load settings, falling back to defaults on any failure
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<()> {
        match Self::path() {
            Some(path) => self.save_to(path),
            None => {
                tracing::warn!("no config directory; settings not saved");
                Ok(())
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Add file to recent files list (moves to top if already present)
    pub fn add_recent(&mut self, path: PathBuf) {
        self.recent_files.retain(|p| p != &path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(MAX_RECENT_FILES);
    }

    /// Recent files that still exist
    pub fn recent_files(&self) -> Vec<&PathBuf> {
        self.recent_files.iter().filter(|p| p.exists()).collect()
    }

    pub fn spooler_options(&self) -> SpoolerOptions {
        SpoolerOptions::from(self)
    }
}

impl From<&Settings> for SpoolerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            spill_threshold: settings.spill_threshold,
            temp_dir: settings.temp_dir.clone(),
            use_mmap: settings.use_mmap,
        }
    }
}
