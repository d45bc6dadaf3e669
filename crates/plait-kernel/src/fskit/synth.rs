//! Single-file synthetic services: fields, computed reads, closures, and
//! control files.

use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use plait_types::{FileInfo, FsError, FsResult};
use tokio::sync::RwLock;

use super::node::cursor_read;
use crate::ctx::OpCtx;
use crate::service::{File, FileService, ServiceCaps};

// ─────────────────────────────────────────────────────────────────────────
// FieldFile
// ─────────────────────────────────────────────────────────────────────────

/// A shared string cell exposed as a read/write file (task `cmd` and
/// `dir`). Create truncates, so shell-style redirection lands here.
pub struct FieldFile {
    name: String,
    value: Arc<RwLock<String>>,
}

impl FieldFile {
    pub fn new(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(RwLock::new(initial.into())),
        }
    }

    /// The shared cell, for owners that read the field directly.
    pub fn cell(&self) -> Arc<RwLock<String>> {
        Arc::clone(&self.value)
    }
}

#[async_trait]
impl FileService for FieldFile {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            creator: true,
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, _ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("open", name));
        }
        Ok(Box::new(FieldHandle {
            name: self.name.clone(),
            value: Arc::clone(&self.value),
            pos: 0,
        }))
    }

    async fn create(&self, name: &str, _ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("create", name));
        }
        self.value.write().await.clear();
        Ok(Box::new(FieldHandle {
            name: self.name.clone(),
            value: Arc::clone(&self.value),
            pos: 0,
        }))
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name != "." {
            return Err(FsError::not_exist("stat", name));
        }
        let len = self.value.read().await.len() as u64;
        Ok(FileInfo::file(&self.name, len))
    }
}

struct FieldHandle {
    name: String,
    value: Arc<RwLock<String>>,
    pos: usize,
}

#[async_trait]
impl File for FieldHandle {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let value = self.value.read().await;
        Ok(cursor_read(value.as_bytes(), &mut self.pos, buf))
    }

    async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        let mut value = self.value.write().await;
        value.push_str(&String::from_utf8_lossy(data));
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let len = self.value.read().await.len() as i64;
        let new = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if new < 0 {
            return Err(FsError::invalid("seek", self.name.clone()));
        }
        self.pos = new as usize;
        Ok(new as u64)
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        let len = self.value.read().await.len() as u64;
        Ok(FileInfo::file(&self.name, len))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// FuncFile
// ─────────────────────────────────────────────────────────────────────────

/// Closure producing a file's contents on first read.
pub type FillFn = Arc<dyn Fn(OpCtx) -> SyncBoxFuture<FsResult<Vec<u8>>> + Send + Sync>;

/// A file whose contents are computed by an async closure at first read —
/// the task allocator's `new/<kind>` files are these, so the side effect
/// happens on read, not on open.
pub struct FuncFile {
    name: String,
    fill: FillFn,
}

impl FuncFile {
    pub fn new(name: impl Into<String>, fill: FillFn) -> Self {
        Self {
            name: name.into(),
            fill,
        }
    }

    /// A fixed-content read-only file.
    pub fn fixed(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self::new(name, Arc::new(move |_ctx| {
            let data = data.clone();
            Box::pin(async move { Ok(data) })
        }))
    }
}

#[async_trait]
impl FileService for FuncFile {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("open", name));
        }
        Ok(Box::new(FuncHandle::new(
            FileInfo::file(&self.name, 0).with_perm(0o444),
            (self.fill)(ctx.clone()),
        )))
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name != "." {
            return Err(FsError::not_exist("stat", name));
        }
        Ok(FileInfo::file(&self.name, 0).with_perm(0o444))
    }
}

/// The handle behind `FuncFile`, public so closure-built services can hand
/// these out directly.
pub struct FuncHandle {
    info: FileInfo,
    fill: Option<SyncBoxFuture<FsResult<Vec<u8>>>>,
    data: Vec<u8>,
    pos: usize,
}

/// Like [`BoxFuture`], but also `Sync`, so handles that store a pending
/// fill future can still satisfy `File: Send + Sync`.
pub type SyncBoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + Sync>>;

impl FuncHandle {
    pub fn new(info: FileInfo, fill: SyncBoxFuture<FsResult<Vec<u8>>>) -> Self {
        Self {
            info,
            fill: Some(fill),
            data: Vec::new(),
            pos: 0,
        }
    }
}

#[async_trait]
impl File for FuncHandle {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if let Some(fill) = self.fill.take() {
            self.data = fill.await?;
            self.info.size = self.data.len() as u64;
        }
        Ok(cursor_read(&self.data, &mut self.pos, buf))
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        Ok(self.info.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// OpenFn
// ─────────────────────────────────────────────────────────────────────────

/// Closure serving opens for a whole subtree.
pub type OpenFnFn =
    Arc<dyn Fn(String, OpCtx) -> BoxFuture<'static, FsResult<Box<dyn File>>> + Send + Sync>;

/// A file service built from a closure. Create delegates to open: the
/// files these serve are synthetic, and their "create" is a write-open.
pub struct OpenFn {
    name: String,
    f: OpenFnFn,
}

impl OpenFn {
    pub fn new(name: impl Into<String>, f: OpenFnFn) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl FileService for OpenFn {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            creator: true,
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        (self.f)(name.to_string(), ctx.clone()).await
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        (self.f)(name.to_string(), ctx.clone()).await
    }

    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        if name == "." {
            return Ok(FileInfo::dir(&self.name));
        }
        let mut file = (self.f)(name.to_string(), ctx.clone()).await?;
        let info = file.stat().await;
        let _ = file.close().await;
        info
    }
}

// ─────────────────────────────────────────────────────────────────────────
// CtlFile
// ─────────────────────────────────────────────────────────────────────────

/// Handler for one control command, already split into tokens.
pub type CtlHandler = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;

/// A write-only command file: newline-delimited `VERB ARG…` lines, each
/// dispatched as it completes. A partial trailing line is flushed on close.
/// Dispatch errors surface from `write` in wire form, kind token first.
pub struct CtlFile {
    name: String,
    handler: CtlHandler,
}

impl CtlFile {
    pub fn new(name: impl Into<String>, handler: CtlHandler) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl FileService for CtlFile {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            creator: true,
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, _ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("open", name));
        }
        Ok(Box::new(CtlHandle {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
            buf: String::new(),
        }))
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        self.open(name, ctx).await
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name != "." {
            return Err(FsError::not_exist("stat", name));
        }
        Ok(FileInfo::file(&self.name, 0).with_perm(0o222))
    }
}

struct CtlHandle {
    name: String,
    handler: CtlHandler,
    buf: String,
}

impl CtlHandle {
    async fn dispatch(&self, line: &str) -> FsResult<()> {
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return Ok(());
        }
        (self.handler)(tokens).await
    }
}

#[async_trait]
impl File for CtlHandle {
    async fn read(&mut self, _buf: &mut [u8]) -> FsResult<usize> {
        Ok(0)
    }

    async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.buf.push_str(&String::from_utf8_lossy(data));
        while let Some(idx) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=idx).collect();
            self.dispatch(line.trim_end()).await?;
        }
        Ok(data.len())
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        Ok(FileInfo::file(&self.name, 0).with_perm(0o222))
    }

    async fn close(&mut self) -> FsResult<()> {
        let rest = std::mem::take(&mut self.buf);
        if !rest.trim().is_empty() {
            self.dispatch(rest.trim_end()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;
    use crate::service::read_all;

    #[tokio::test]
    async fn field_create_truncates_and_write_appends() {
        let field = FieldFile::new("cmd", "old contents");
        let ctx = OpCtx::new();

        let mut f = field.create(".", &ctx).await.unwrap();
        f.write(b"hello").await.unwrap();
        f.close().await.unwrap();

        let mut f = field.open(".", &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn field_stat_reports_length() {
        let field = FieldFile::new("dir", "/work");
        let info = field.stat(".", &OpCtx::new()).await.unwrap();
        assert_eq!(info.size, 5);
    }

    #[tokio::test]
    async fn func_file_fills_on_read_not_open() {
        let hits = Arc::new(Mutex::new(0u32));
        let counted = Arc::clone(&hits);
        let file = FuncFile::new(
            "new",
            Arc::new(move |_ctx| {
                let counted = Arc::clone(&counted);
                Box::pin(async move {
                    *counted.lock().await += 1;
                    Ok(b"7\n".to_vec())
                })
            }),
        );
        let ctx = OpCtx::new();

        let mut f = file.open(".", &ctx).await.unwrap();
        assert_eq!(*hits.lock().await, 0, "open must not run the fill");
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"7\n");
        assert_eq!(*hits.lock().await, 1);

        // A second read from the same handle reuses the buffer.
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).await.unwrap(), 0);
        assert_eq!(*hits.lock().await, 1);
    }

    #[tokio::test]
    async fn ctl_dispatches_complete_lines_and_flushes_on_close() {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctl = CtlFile::new(
            "ctl",
            Arc::new(move |tokens| {
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    sink.lock().await.push(tokens);
                    Ok(())
                })
            }),
        );
        let ctx = OpCtx::new();

        let mut f = ctl.open(".", &ctx).await.unwrap();
        f.write(b"bind /a /b after\nsta").await.unwrap();
        assert_eq!(seen.lock().await.len(), 1);
        f.write(b"rt\n").await.unwrap();
        f.write(b"kill 9").await.unwrap();
        f.close().await.unwrap();

        let got = seen.lock().await;
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], ["bind", "/a", "/b", "after"]);
        assert_eq!(got[1], ["start"]);
        assert_eq!(got[2], ["kill", "9"]);
    }

    #[tokio::test]
    async fn ctl_surfaces_handler_errors_from_write() {
        let ctl = CtlFile::new(
            "ctl",
            Arc::new(|tokens: Vec<String>| {
                Box::pin(async move {
                    Err(FsError::invalid("ctl", tokens.join(" ")))
                })
            }),
        );
        let mut f = ctl.open(".", &OpCtx::new()).await.unwrap();
        let err = f.write(b"bogus verb\n").await.unwrap_err();
        assert!(err.to_string().starts_with("invalid:"));
    }
}
