//! The per-task namespace: a binding table with Plan 9 bind semantics.
//!
//! A namespace maps destination paths to ordered lists of bindings; a list
//! longer than one is a union. The namespace is itself a file service: it
//! resolves by consulting the table and materializes unions lazily at open
//! time. Mutations from one namespace are invisible to every other; a
//! clone deep-copies the table while sharing the underlying services by
//! reference.
//!
//! The binding table lock is held only while the table is inspected or
//! mutated — never across delegated I/O into a bound service. Every
//! operation works on a snapshot taken at its start.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use plait_types::{BindMode, FileInfo, FsError, FsResult};
use tokio::sync::RwLock;

use crate::ctx::OpCtx;
use crate::fskit::DirHandle;
use crate::path;
use crate::resolve::resolve;
use crate::service::{
    File, FileService, ResolveStep, ServiceCaps, read_dir_at, same_service, stat_at,
};

/// A reference to a name in a specific service, with the file info cached
/// at bind time so stat can answer without re-resolving.
#[derive(Clone)]
pub struct Binding {
    pub fs: Arc<dyn FileService>,
    pub path: String,
    pub info: FileInfo,
}

/// Plan 9-style namespace.
pub struct Namespace {
    bindings: RwLock<BTreeMap<String, Vec<Binding>>>,
    ctx: OpCtx,
}

impl Namespace {
    /// An empty namespace. The context carries the owning task's identity
    /// and is used when the namespace itself initiates resolution.
    pub fn new(ctx: OpCtx) -> Self {
        Self {
            bindings: RwLock::new(BTreeMap::new()),
            ctx,
        }
    }

    /// The owning context.
    pub fn context(&self) -> &OpCtx {
        &self.ctx
    }

    /// Deep-copy the binding table for a fork. Bindings share the
    /// underlying services; the new namespace carries the new owner's
    /// context.
    pub async fn clone_with(&self, ctx: OpCtx) -> Namespace {
        let bindings = self.bindings.read().await.clone();
        Namespace {
            bindings: RwLock::new(bindings),
            ctx,
        }
    }

    /// Install `(src, src_path)` at `dst_path`.
    ///
    /// The source is resolved and statted eagerly; what lands in the table
    /// is the resolved leaf. Note the mode inversion inherited from
    /// Plan 9: `After` prepends, making the new source the one consulted
    /// first.
    pub async fn bind(
        &self,
        src: &Arc<dyn FileService>,
        src_path: &str,
        dst_path: &str,
        mode: BindMode,
    ) -> FsResult<()> {
        let src_path = path::normalize(src_path);
        let dst_path = path::normalize(dst_path);
        if !path::valid(&src_path) {
            return Err(FsError::invalid("bind", src_path));
        }
        if !path::valid(&dst_path) {
            return Err(FsError::invalid("bind", dst_path));
        }

        let (rfs, rname) = resolve(src, &src_path, &self.ctx).await?;
        let info = stat_at(&rfs, &rname, &self.ctx).await?;
        let binding = Binding {
            fs: rfs,
            path: rname,
            info,
        };

        tracing::debug!(src = %src_path, dst = %dst_path, mode = %mode, "bind");
        let mut table = self.bindings.write().await;
        let list = table.entry(dst_path).or_default();
        match mode {
            BindMode::After => list.insert(0, binding),
            BindMode::Before => list.push(binding),
            BindMode::Replace => *list = vec![binding],
        }
        Ok(())
    }

    /// Remove every binding at `dst_path` whose resolved source equals
    /// `(src, src_path)` by identity.
    pub async fn unbind(
        &self,
        src: &Arc<dyn FileService>,
        src_path: &str,
        dst_path: &str,
    ) -> FsResult<()> {
        let src_path = path::normalize(src_path);
        let dst_path = path::normalize(dst_path);
        if !path::valid(&src_path) {
            return Err(FsError::invalid("unbind", src_path));
        }
        if !path::valid(&dst_path) {
            return Err(FsError::invalid("unbind", dst_path));
        }

        let (rfs, rname) = resolve(src, &src_path, &self.ctx).await?;

        let mut table = self.bindings.write().await;
        if let Some(list) = table.get_mut(&dst_path) {
            list.retain(|b| !(same_service(&b.fs, &rfs) && b.path == rname));
            if list.is_empty() {
                table.remove(&dst_path);
            }
        }
        Ok(())
    }

    /// The current table: destination path to bound source paths, in
    /// consultation order.
    pub async fn list_binds(&self) -> Vec<(String, Vec<String>)> {
        self.bindings
            .read()
            .await
            .iter()
            .map(|(dst, list)| (dst.clone(), list.iter().map(|b| b.path.clone()).collect()))
            .collect()
    }

    async fn snapshot(&self) -> BTreeMap<String, Vec<Binding>> {
        self.bindings.read().await.clone()
    }
}

#[async_trait]
impl FileService for Namespace {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            resolver: true,
            creator: true,
            stat: true,
        }
    }

    async fn resolve(&self, name: &str, _ctx: &OpCtx) -> FsResult<ResolveStep> {
        let table = self.snapshot().await;

        if let Some(list) = table.get(name) {
            if list.len() == 1 {
                let b = &list[0];
                return Ok(ResolveStep::Descend(Arc::clone(&b.fs), b.path.clone()));
            }
            // A union binding: the namespace exposes it as a single entity
            // and materializes it at open time.
            return Ok(ResolveStep::Local);
        }

        // Longest matching parent binding. Only the first member of a
        // union is descended into for a non-root path.
        for key in path::match_paths(table.keys().map(String::as_str), name) {
            let Some(b) = table.get(key).and_then(|list| list.first()) else {
                continue;
            };
            let sub = path::trim_prefix(name, key);
            return Ok(ResolveStep::Descend(
                Arc::clone(&b.fs),
                path::join(&b.path, sub),
            ));
        }

        Ok(ResolveStep::Local)
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        let table = self.snapshot().await;

        let mut entries: Vec<FileInfo> = Vec::new();
        let mut dir_info: Option<FileInfo> = None;

        // Direct bindings: a file binding answers with the first open that
        // succeeds; directory bindings merge their listings.
        if let Some(list) = table.get(name) {
            for b in list {
                if b.info.is_dir() {
                    if dir_info.is_none() {
                        dir_info = Some(b.info.clone().with_name(path::base(name)));
                    }
                    entries.extend(read_dir_at(&b.fs, &b.path, ctx).await?);
                } else if let Ok(file) = b.fs.open(&b.path, ctx).await {
                    return Ok(file);
                }
            }
        }

        // Subpaths of bindings.
        for key in path::match_paths(table.keys().map(String::as_str), name) {
            if key == name {
                continue; // handled above
            }
            let Some(list) = table.get(key) else { continue };
            for b in list {
                let rel = path::join(&b.path, path::trim_prefix(name, key));
                let Ok(info) = stat_at(&b.fs, &rel, ctx).await else {
                    continue;
                };
                if info.is_dir() {
                    if dir_info.is_none() {
                        dir_info = Some(info.clone().with_name(path::base(name)));
                    }
                    entries.extend(read_dir_at(&b.fs, &rel, ctx).await?);
                } else if let Ok(file) = b.fs.open(&rel, ctx).await {
                    return Ok(file);
                }
            }
        }

        // Parent directories synthesized from multi-segment bind
        // destinations.
        let mut need: Vec<String> = Vec::new();
        if name == "." {
            for (bname, list) in &table {
                match bname.split_once('/') {
                    Some((first, _)) => {
                        if !need.iter().any(|n| n == first) {
                            need.push(first.to_string());
                        }
                    }
                    None if bname != "." => {
                        for b in list {
                            entries.push(b.info.clone().with_name(bname));
                        }
                    }
                    None => {}
                }
            }
        } else {
            let prefix = format!("{name}/");
            for (bname, list) in &table {
                let Some(rest) = bname.strip_prefix(&prefix) else {
                    continue;
                };
                match rest.split_once('/') {
                    Some((first, _)) => {
                        if !need.iter().any(|n| n == first) {
                            need.push(first.to_string());
                        }
                    }
                    None => {
                        for b in list {
                            entries.push(b.info.clone().with_name(rest));
                        }
                    }
                }
            }
            if entries.is_empty() && need.is_empty() && dir_info.is_none() {
                return Err(FsError::not_exist("open", name));
            }
        }

        for n in need {
            if !entries.iter().any(|e| e.name == n) {
                entries.push(FileInfo::dir(n));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let info = dir_info.unwrap_or_else(|| FileInfo::dir(path::base(name)));
        Ok(Box::new(DirHandle::new(info, entries)))
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        let table = self.snapshot().await;

        if let Some(list) = table.get(name)
            && !list.is_empty()
        {
            if let Some(b) = list.iter().find(|b| b.fs.caps().creator) {
                return b.fs.create(&b.path, ctx).await;
            }
            let b = &list[0];
            return b.fs.open(&b.path, ctx).await;
        }

        for key in path::match_paths(table.keys().map(String::as_str), name) {
            let Some(b) = table.get(key).and_then(|list| list.first()) else {
                continue;
            };
            let sub = path::join(&b.path, path::trim_prefix(name, key));
            tracing::debug!(name, key, sub = %sub, "namespace create routed to binding");
            if b.fs.caps().creator {
                return b.fs.create(&sub, ctx).await;
            }
            return b.fs.open(&sub, ctx).await;
        }

        // The namespace does not synthesize new top-level entries.
        Err(FsError::not_exist("create", name))
    }

    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        if name == "." {
            return Ok(FileInfo::dir("."));
        }

        // Direct bindings answer from the info cached at bind time; a
        // union consults only its first member.
        {
            let table = self.bindings.read().await;
            if let Some(b) = table.get(name).and_then(|list| list.first()) {
                return Ok(b.info.clone().with_name(path::base(name)));
            }
        }

        match self.resolve(name, ctx).await? {
            ResolveStep::Descend(fs, rel) => stat_at(&fs, &rel, ctx).await,
            ResolveStep::Local => {
                let mut file = self.open(name, ctx).await?;
                let info = file.stat().await;
                let _ = file.close().await;
                info
            }
        }
    }
}
