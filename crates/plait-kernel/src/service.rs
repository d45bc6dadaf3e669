//! The file-service contract.
//!
//! A file service is a value implementing `open`, optionally advertising
//! capability sets (Resolver, Creator, Stat) via `caps()`. The capability
//! methods have default-deny implementations, so the composites can ask
//! "does this value support X?" without knowing the concrete type.
//!
//! Services are shared as `Arc<dyn FileService>` and compared by identity:
//! two references are the same service iff they point at the same live
//! instance. The recursive resolver's fixpoint test depends on this.

use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};

use crate::ctx::OpCtx;

/// The capability sets a service advertises beyond base `open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceCaps {
    /// Implements one hop of path resolution.
    pub resolver: bool,
    /// Implements create-or-truncate. Union write-preference dispatches on
    /// this.
    pub creator: bool,
    /// Implements direct stat without opening.
    pub stat: bool,
}

/// One hop of resolution.
#[derive(Debug)]
pub enum ResolveStep {
    /// The service declares itself the leaf for the name — the `(self,
    /// name)` fixpoint of the resolution algebra.
    Local,
    /// Resolution continues at another service with a relative name.
    Descend(Arc<dyn FileService>, String),
}

/// A file service: the one contract every collaborator honors.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Capability sets this service advertises.
    fn caps(&self) -> ServiceCaps {
        ServiceCaps::default()
    }

    /// Open `name`, returning a handle. `.` names the service's root.
    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>>;

    /// Perform exactly one hop of resolution for `name`.
    ///
    /// A resolver asked about a name it does not compose must return
    /// `Local` — never a fabricated `not-exist`. Whether the name exists is
    /// the driver's question to settle at the fixpoint.
    async fn resolve(&self, name: &str, ctx: &OpCtx) -> FsResult<ResolveStep> {
        let _ = ctx;
        Err(FsError::not_supported("resolve", name))
    }

    /// Atomically create a new file or truncate an existing one, returning
    /// a writable handle.
    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        let _ = ctx;
        Err(FsError::not_supported("create", name))
    }

    /// Stat `name` without opening it.
    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        let _ = ctx;
        Err(FsError::not_supported("stat", name))
    }
}

/// A file handle. Every handle supports `close`; directory handles support
/// `read_dir`; everything else is a per-handle subset.
#[async_trait]
pub trait File: Send + Sync {
    /// Read into `buf`. `Ok(0)` is end of file.
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        let _ = data;
        Err(FsError::not_supported("write", ""))
    }

    async fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let _ = pos;
        Err(FsError::not_supported("seek", ""))
    }

    async fn stat(&self) -> FsResult<FileInfo>;

    /// Directory listing. The first call yields the entries; subsequent
    /// calls yield an empty list.
    async fn read_dir(&mut self) -> FsResult<Vec<FileInfo>> {
        Err(FsError::not_supported("readdir", ""))
    }

    async fn close(&mut self) -> FsResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<file>")
    }
}

impl std::fmt::Debug for dyn FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<file-service>")
    }
}

/// Identity comparison for shared services. Compares the data address, so
/// it is unaffected by vtable duplication across codegen units.
pub fn same_service(a: &Arc<dyn FileService>, b: &Arc<dyn FileService>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Drain a handle to a byte vector.
pub async fn read_all(file: &mut dyn File) -> FsResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Stat a name on a service, preferring its Stat capability and falling
/// back to open-then-stat. The capability path is what keeps cyclic
/// compositions from descending through `open(".")` on every mount root.
pub async fn stat_at(fs: &Arc<dyn FileService>, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
    if fs.caps().stat {
        return fs.stat(name, ctx).await;
    }
    let mut file = fs.open(name, ctx).await?;
    let info = file.stat().await;
    let _ = file.close().await;
    info
}

/// Read a directory listing from a service by name.
pub async fn read_dir_at(
    fs: &Arc<dyn FileService>,
    name: &str,
    ctx: &OpCtx,
) -> FsResult<Vec<FileInfo>> {
    let mut file = fs.open(name, ctx).await?;
    let entries = file.read_dir().await;
    let _ = file.close().await;
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fskit::MemFS;

    #[tokio::test]
    async fn same_service_is_identity_not_equality() {
        let a: Arc<dyn FileService> = Arc::new(MemFS::new());
        let b: Arc<dyn FileService> = Arc::new(MemFS::new());
        let a2 = Arc::clone(&a);
        assert!(same_service(&a, &a2));
        assert!(!same_service(&a, &b));
    }

    #[tokio::test]
    async fn stat_at_uses_the_stat_capability() {
        let mem = MemFS::new();
        mem.put("x", b"abc").await;
        let fs: Arc<dyn FileService> = Arc::new(mem);
        let ctx = OpCtx::new();
        let info = stat_at(&fs, "x", &ctx).await.unwrap();
        assert_eq!(info.size, 3);
        assert!(!info.is_dir());
    }

    #[tokio::test]
    async fn read_all_drains_to_eof() {
        let mem = MemFS::new();
        mem.put("big", &vec![7u8; 10_000]).await;
        let fs: Arc<dyn FileService> = Arc::new(mem);
        let ctx = OpCtx::new();
        let mut f = fs.open("big", &ctx).await.unwrap();
        let data = read_all(f.as_mut()).await.unwrap();
        assert_eq!(data.len(), 10_000);
    }
}
