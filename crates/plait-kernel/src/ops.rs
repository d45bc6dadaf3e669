//! Public entry points.
//!
//! These are the calls hosting layers make: they accept the absolute-path
//! spelling, validate, stamp the operation's origin into the context, and
//! drive resolution before touching the leaf. Composites below this layer
//! receive the context unchanged.

use std::sync::Arc;

use plait_types::{FileInfo, FsError, FsResult};

use crate::ctx::OpCtx;
use crate::path;
use crate::resolve::resolve;
use crate::service::{File, FileService, read_dir_at, stat_at};

/// Open `name` on the composition rooted at `fs`.
pub async fn open(fs: &Arc<dyn FileService>, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
    let name = path::normalize(name);
    if !path::valid(&name) {
        return Err(FsError::invalid("open", name));
    }
    let ctx = ctx.with_origin(Arc::clone(fs), &name, "open");
    let (rfs, rname) = resolve(fs, &name, &ctx).await?;
    rfs.open(&rname, &ctx).await
}

/// Create or truncate `name`, returning a writable handle. This is the
/// path shell-style `>` redirection takes through the composition.
pub async fn create(fs: &Arc<dyn FileService>, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
    let name = path::normalize(name);
    if !path::valid(&name) {
        return Err(FsError::invalid("create", name));
    }
    let ctx = ctx.with_origin(Arc::clone(fs), &name, "create");

    if fs.caps().creator {
        return fs.create(&name, &ctx).await;
    }
    let (rfs, rname) = resolve(fs, &name, &ctx).await?;
    if rfs.caps().creator {
        rfs.create(&rname, &ctx).await
    } else {
        Err(FsError::permission("create", name))
    }
}

/// Stat `name` on the composition rooted at `fs`.
pub async fn stat(fs: &Arc<dyn FileService>, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
    let name = path::normalize(name);
    if !path::valid(&name) {
        return Err(FsError::invalid("stat", name));
    }
    let ctx = ctx.with_origin(Arc::clone(fs), &name, "stat");
    stat_at(fs, &name, &ctx).await
}

/// List the directory at `name`.
pub async fn read_dir(
    fs: &Arc<dyn FileService>,
    name: &str,
    ctx: &OpCtx,
) -> FsResult<Vec<FileInfo>> {
    let name = path::normalize(name);
    if !path::valid(&name) {
        return Err(FsError::invalid("readdir", name));
    }
    let ctx = ctx.with_origin(Arc::clone(fs), &name, "readdir");
    read_dir_at(fs, &name, &ctx).await
}
