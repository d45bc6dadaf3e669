//! Directory handles and cursor plumbing shared by the synthetic files.

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};

use crate::service::File;

/// Copy bytes from `data[pos..]` into `buf`, advancing `pos`.
pub fn cursor_read(data: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
    if *pos >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - *pos);
    buf[..n].copy_from_slice(&data[*pos..*pos + n]);
    *pos += n;
    n
}

/// A ready directory handle over a fixed entry list.
///
/// Callers decide ordering: the prefix router and the namespace sort their
/// listings, the union preserves member order.
pub struct DirHandle {
    info: FileInfo,
    entries: Vec<FileInfo>,
    drained: bool,
}

impl DirHandle {
    pub fn new(info: FileInfo, entries: Vec<FileInfo>) -> Self {
        Self {
            info,
            entries,
            drained: false,
        }
    }
}

#[async_trait]
impl File for DirHandle {
    async fn read(&mut self, _buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::not_supported("read", self.info.name.clone()))
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        Ok(self.info.clone())
    }

    async fn read_dir(&mut self) -> FsResult<Vec<FileInfo>> {
        if self.drained {
            return Ok(Vec::new());
        }
        self.drained = true;
        Ok(self.entries.clone())
    }
}
