//! File metadata — the unified entry type used by `stat` and directory
//! listings alike.

use std::time::SystemTime;

const MODE_DIR: u32 = 1 << 31;
const MODE_PERM: u32 = 0o777;

/// Mode bits: a directory flag plus Unix permission triplets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

impl FileMode {
    pub fn dir(perm: u32) -> Self {
        Self(MODE_DIR | (perm & MODE_PERM))
    }

    pub fn file(perm: u32) -> Self {
        Self(perm & MODE_PERM)
    }

    pub fn is_dir(&self) -> bool {
        self.0 & MODE_DIR != 0
    }

    pub fn perm(&self) -> u32 {
        self.0 & MODE_PERM
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Metadata for a file or directory.
///
/// Synthetic files report zero size and a fabricated modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Name of the entry (last path segment, not a full path).
    pub name: String,
    /// Size in bytes (0 for directories and most synthetic files).
    pub size: u64,
    /// Mode bits.
    pub mode: FileMode,
    /// Last modification time, if known.
    pub modified: Option<SystemTime>,
}

impl FileInfo {
    /// A directory entry with default permissions.
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: FileMode::dir(0o755),
            modified: Some(SystemTime::now()),
        }
    }

    /// A file entry with default permissions.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: FileMode::file(0o644),
            modified: Some(SystemTime::now()),
        }
    }

    /// The same entry under a different name. Bindings and map entries use
    /// this to present a bound file under its destination name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_perm(mut self, perm: u32) -> Self {
        self.mode = if self.mode.is_dir() {
            FileMode::dir(perm)
        } else {
            FileMode::file(perm)
        };
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}
