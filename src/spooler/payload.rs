//! Buffer node payload storage.
//!
//! Small payloads stay resident. Payloads above the spill threshold are
//! written to a named temp file that lives exactly as long as the payload:
//! replacing the payload or disposing the node drops (and deletes) it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::format::DEFAULT_SPILL_THRESHOLD;
use crate::util::Result;

/// Where spilled payloads go and when.
#[derive(Clone, Debug)]
pub struct SpillPolicy {
    /// Payloads strictly larger than this are spilled.
    pub threshold: u64,
    /// Directory for spill files (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for SpillPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SPILL_THRESHOLD,
            temp_dir: None,
        }
    }
}

impl SpillPolicy {
    /// Never spill.
    pub fn resident() -> Self {
        Self {
            threshold: u64::MAX,
            temp_dir: None,
        }
    }

    #[inline]
    pub fn should_spill(&self, len: u64) -> bool {
        len > self.threshold
    }

    fn create_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("spooler-").suffix(".buf");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}

/// Payload of a buffer node.
pub enum BufferPayload {
    Memory(Vec<u8>),
    Spilled { file: NamedTempFile, len: u64 },
}

impl BufferPayload {
    /// Store `data`, spilling it when the policy says so.
    pub fn new(data: Vec<u8>, policy: &SpillPolicy) -> Result<Self> {
        if policy.should_spill(data.len() as u64) {
            Self::spill(&data, policy)
        } else {
            Ok(Self::Memory(data))
        }
    }

    /// Like [`BufferPayload::new`] but borrows, so mapped input is copied only once.
    pub fn from_slice(data: &[u8], policy: &SpillPolicy) -> Result<Self> {
        if policy.should_spill(data.len() as u64) {
            Self::spill(data, policy)
        } else {
            Ok(Self::Memory(data.to_vec()))
        }
    }

    fn spill(data: &[u8], policy: &SpillPolicy) -> Result<Self> {
        let mut file = policy.create_file()?;
        file.write_all(data)?;
        file.flush()?;
        tracing::trace!(path = %file.path().display(), len = data.len(), "spilled buffer payload");
        Ok(Self::Spilled {
            file,
            len: data.len() as u64,
        })
    }

    /// Payload size in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(data) => data.len() as u64,
            Self::Spilled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the payload lives in a temp file.
    pub fn is_spilled(&self) -> bool {
        matches!(self, Self::Spilled { .. })
    }

    /// Path of the spill file, if any.
    pub fn spill_path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::Spilled { file, .. } => Some(file.path()),
        }
    }

    /// Rehydrate the whole payload.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        match self {
            Self::Memory(data) => Ok(data.clone()),
            Self::Spilled { file, len } => {
                let mut handle = reopen(file)?;
                let mut out = Vec::with_capacity(*len as usize);
                handle.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Stream the payload into `out` without rehydrating it.
    pub fn copy_to<W: Write>(&self, out: &mut W) -> Result<u64> {
        match self {
            Self::Memory(data) => {
                out.write_all(data)?;
                Ok(data.len() as u64)
            }
            Self::Spilled { file, .. } => {
                let mut handle = reopen(file)?;
                Ok(std::io::copy(&mut handle, out)?)
            }
        }
    }

    /// Read the first `buf.len()` bytes of the payload.
    pub fn read_prefix(&self, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Memory(data) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(())
            }
            Self::Spilled { file, .. } => {
                let mut handle = reopen(file)?;
                handle.read_exact(buf)?;
                Ok(())
            }
        }
    }
}

fn reopen(file: &NamedTempFile) -> Result<File> {
    let mut handle = file.reopen()?;
    handle.seek(SeekFrom::Start(0))?;
    Ok(handle)
}

impl std::fmt::Debug for BufferPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
            Self::Spilled { file, len } => write!(f, "Spilled({} bytes at {})", len, file.path().display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_stays_resident() {
        let payload = BufferPayload::new(vec![1; 10], &SpillPolicy::default()).unwrap();
        assert!(!payload.is_spilled());
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let policy = SpillPolicy::default();
        let at = BufferPayload::new(vec![0; 4096], &policy).unwrap();
        let above = BufferPayload::new(vec![0; 4097], &policy).unwrap();
        assert!(!at.is_spilled());
        assert!(above.is_spilled());
    }

    #[test]
    fn test_spilled_payload_rehydrates_and_cleans_up() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let payload = BufferPayload::new(data.clone(), &SpillPolicy::default()).unwrap();
        let path = payload.spill_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(payload.to_vec().unwrap(), data);

        let mut prefix = [0u8; 4];
        payload.read_prefix(&mut prefix).unwrap();
        assert_eq!(prefix, [0, 1, 2, 3]);

        let mut out = Vec::new();
        assert_eq!(payload.copy_to(&mut out).unwrap(), 5000);
        assert_eq!(out, data);

        drop(payload);
        assert!(!path.exists());
    }
}
