//! UnionFS — the ordered read-through union.
//!
//! Members are consulted in insertion order. Resolution runs two passes:
//! resolver members first, then a stat pass over the rest. Under a
//! writable context the first Creator-advertising answer wins (write
//! preference); under a read-only context any answer wins. A `not-exist`
//! from one member is swallowed so later members can answer; any other
//! error propagates immediately.

use std::sync::Arc;

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};

use super::node::DirHandle;
use crate::ctx::OpCtx;
use crate::service::{File, FileService, ResolveStep, ServiceCaps, read_dir_at, same_service, stat_at};

/// Ordered union of file services.
pub struct UnionFS {
    members: Vec<Arc<dyn FileService>>,
}

impl UnionFS {
    pub fn new(members: Vec<Arc<dyn FileService>>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl FileService for UnionFS {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            resolver: true,
            creator: true,
            ..Default::default()
        }
    }

    async fn resolve(&self, name: &str, ctx: &OpCtx) -> FsResult<ResolveStep> {
        if self.members.is_empty() {
            return Err(FsError::not_exist("resolve", name));
        }
        if self.members.len() == 1 {
            return Ok(ResolveStep::Descend(
                Arc::clone(&self.members[0]),
                name.to_string(),
            ));
        }
        if name == "." && ctx.is_read_only() {
            return Ok(ResolveStep::Local);
        }

        let mut to_stat: Vec<&Arc<dyn FileService>> = Vec::new();
        for member in &self.members {
            if member.caps().resolver {
                match member.resolve(name, ctx).await {
                    Err(err) if err.is_not_exist() => continue, // certainly not here
                    Err(err) => return Err(err),
                    Ok(ResolveStep::Descend(rfs, rname)) => {
                        if !ctx.is_read_only() && rfs.caps().creator {
                            return Ok(ResolveStep::Descend(rfs, rname));
                        }
                        if rname != name || !same_service(&rfs, member) {
                            // Resolution moved: the name certainly exists here.
                            return Ok(ResolveStep::Descend(rfs, rname));
                        }
                    }
                    Ok(ResolveStep::Local) => {}
                }
            }
            to_stat.push(member);
        }

        let mut fallback: Option<&Arc<dyn FileService>> = None;
        for member in to_stat {
            if stat_at(member, name, ctx).await.is_err() {
                continue;
            }
            if ctx.is_read_only() || member.caps().creator {
                return Ok(ResolveStep::Descend(Arc::clone(member), name.to_string()));
            }
            fallback.get_or_insert(member);
        }
        // Writable context with no Creator anywhere: fall back to the first
        // member that has the name at all.
        if let Some(member) = fallback {
            return Ok(ResolveStep::Descend(Arc::clone(member), name.to_string()));
        }

        Ok(ResolveStep::Local)
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        match self.resolve(name, ctx).await? {
            ResolveStep::Descend(rfs, rname) => rfs.open(&rname, ctx).await,
            ResolveStep::Local => {
                if name != "." {
                    // Non-root names must resolve to a specific member.
                    tracing::debug!(name, "union open: no member claimed name");
                    return Err(FsError::not_exist("open", name));
                }
                let mut entries: Vec<FileInfo> = Vec::new();
                for member in &self.members {
                    let Ok(member_entries) = read_dir_at(member, ".", ctx).await else {
                        continue;
                    };
                    for entry in member_entries {
                        // Earlier members win for same-named entries,
                        // matching the write-preference rule.
                        if !entries.iter().any(|e| e.name == entry.name) {
                            entries.push(entry);
                        }
                    }
                }
                Ok(Box::new(DirHandle::new(
                    FileInfo::dir(".").with_perm(0o555),
                    entries,
                )))
            }
        }
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        for member in &self.members {
            if !member.caps().creator {
                continue;
            }
            match member.create(name, ctx).await {
                Ok(file) => return Ok(file),
                Err(err) if err.is_not_exist() => continue,
                Err(err) => return Err(err),
            }
        }
        // No member could create; the name may already exist somewhere.
        for member in &self.members {
            match member.open(name, ctx).await {
                Ok(file) => return Ok(file),
                Err(err) if err.is_not_exist() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(FsError::not_exist("create", name))
    }
}
