//! MapFS — the directory-prefix router.
//!
//! A map from destination path (no leading slash) to file service. Resolve
//! strips the longest matching key and hands the remainder to the mapped
//! service; the recursive driver owns any further unwrapping. An exact
//! match always beats a prefix match.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};

use super::node::DirHandle;
use crate::ctx::OpCtx;
use crate::path;
use crate::service::{File, FileService, ResolveStep, ServiceCaps, stat_at};

/// Prefix-routing composite.
pub struct MapFS {
    entries: BTreeMap<String, Arc<dyn FileService>>,
}

impl Default for MapFS {
    fn default() -> Self {
        Self::new()
    }
}

impl MapFS {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Map `dst` to a service. Replaces any existing mapping.
    pub fn insert(&mut self, dst: impl Into<String>, fs: Arc<dyn FileService>) {
        self.entries.insert(dst.into(), fs);
    }

    fn longest_match(&self, name: &str) -> Option<(&str, &Arc<dyn FileService>)> {
        let keys = path::match_paths(self.entries.keys().map(String::as_str), name);
        keys.first().map(|k| (*k, &self.entries[*k]))
    }

    /// Synthesize the listing for `name`: mapped children one segment down
    /// plus directories implied by deeper keys.
    async fn synth_dir(&self, name: &str, ctx: &OpCtx) -> Option<Vec<FileInfo>> {
        let prefix = if name == "." {
            String::new()
        } else {
            format!("{name}/")
        };

        let mut list: Vec<FileInfo> = Vec::new();
        let mut need: Vec<String> = Vec::new();
        let mut any = false;
        for (key, fs) in &self.entries {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            any = true;
            match rest.split_once('/') {
                None => match stat_at(fs, ".", ctx).await {
                    Ok(info) => list.push(info.with_name(rest)),
                    Err(_) => continue,
                },
                Some((first, _)) => {
                    if !need.iter().any(|n| n == first) {
                        need.push(first.to_string());
                    }
                }
            }
        }
        if !any && name != "." {
            return None;
        }

        for dir in need {
            if !list.iter().any(|e| e.name == dir) {
                list.push(FileInfo::dir(dir).with_perm(0o555));
            }
        }
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Some(list)
    }
}

#[async_trait]
impl FileService for MapFS {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            resolver: true,
            creator: true,
            stat: true,
        }
    }

    async fn resolve(&self, name: &str, _ctx: &OpCtx) -> FsResult<ResolveStep> {
        if let Some(fs) = self.entries.get(name) {
            return Ok(ResolveStep::Descend(Arc::clone(fs), ".".to_string()));
        }
        if let Some((key, fs)) = self.longest_match(name) {
            let rel = path::trim_prefix(name, key);
            return Ok(ResolveStep::Descend(Arc::clone(fs), rel.to_string()));
        }
        // Nothing mapped: this router is the fixpoint; open() will
        // synthesize a directory or fail.
        Ok(ResolveStep::Local)
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name == "." {
            let list = self.synth_dir(".", ctx).await.unwrap_or_default();
            return Ok(Box::new(DirHandle::new(
                FileInfo::dir(".").with_perm(0o555),
                list,
            )));
        }

        if let Some(fs) = self.entries.get(name) {
            return fs.open(".", ctx).await;
        }
        if let Some((key, fs)) = self.longest_match(name) {
            let rel = path::trim_prefix(name, key).to_string();
            return fs.open(&rel, ctx).await;
        }

        match self.synth_dir(name, ctx).await {
            Some(list) => Ok(Box::new(DirHandle::new(
                FileInfo::dir(path::base(name)).with_perm(0o555),
                list,
            ))),
            None => Err(FsError::not_exist("open", name)),
        }
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if let Some(fs) = self.entries.get(name) {
            if fs.caps().creator {
                return fs.create(".", ctx).await;
            }
            return fs.open(".", ctx).await;
        }
        if let Some((key, fs)) = self.longest_match(name) {
            let rel = path::trim_prefix(name, key).to_string();
            tracing::debug!(name, key, rel, "routing create");
            if fs.caps().creator {
                return fs.create(&rel, ctx).await;
            }
            return fs.open(&rel, ctx).await;
        }
        Err(FsError::not_exist("create", name))
    }

    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        // Direct answers here avoid statting every mapped root through
        // open("."), which recurses forever on cyclic compositions.
        if name == "." {
            return Ok(FileInfo::dir(".").with_perm(0o555));
        }
        if let Some(fs) = self.entries.get(name) {
            return Ok(stat_at(fs, ".", ctx).await?.with_name(path::base(name)));
        }
        let mut file = self.open(name, ctx).await?;
        let info = file.stat().await;
        let _ = file.close().await;
        info
    }
}
