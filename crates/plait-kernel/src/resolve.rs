//! The recursive resolver.
//!
//! This is the single source of truth for recursion: individual resolvers
//! perform exactly one hop, and this driver runs them to a fixpoint. A
//! resolver is at its fixpoint for a name when it returns `Local`, or when
//! a hop yields the identical service with the identical name.
//!
//! Pushing recursion into each composite was tried and mis-stripped path
//! prefixes across two-level nestings; centralizing it here makes
//! correctness a local property of each resolver.

use std::sync::Arc;

use plait_types::{FsError, FsResult};

use crate::ctx::OpCtx;
use crate::service::{FileService, ResolveStep, same_service};

/// Hop budget before a composition is declared ill-formed.
pub const MAX_RESOLVE_DEPTH: usize = 100;

/// Resolve `(fs, name)` to the service directly containing `name` and the
/// relative name it expects. Cancellation is checked between hops.
pub async fn resolve(
    fs: &Arc<dyn FileService>,
    name: &str,
    ctx: &OpCtx,
) -> FsResult<(Arc<dyn FileService>, String)> {
    let mut cur = Arc::clone(fs);
    let mut cur_name = name.to_string();

    for _ in 0..MAX_RESOLVE_DEPTH {
        if ctx.is_cancelled() {
            return Err(FsError::cancelled("resolve", cur_name));
        }
        if !cur.caps().resolver {
            return Ok((cur, cur_name));
        }
        match cur.resolve(&cur_name, ctx).await? {
            ResolveStep::Local => return Ok((cur, cur_name)),
            ResolveStep::Descend(next, next_name) => {
                if same_service(&next, &cur) && next_name == cur_name {
                    return Ok((cur, cur_name));
                }
                cur = next;
                cur_name = next_name;
            }
        }
    }

    tracing::warn!(path = name, "resolution depth exceeded");
    Err(FsError::depth_exceeded("resolve", name))
}

/// A capability a caller can require of the resolved leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cap {
    Resolver,
    Creator,
    Stat,
}

/// Resolve to a leaf that advertises `want`.
///
/// Runs the resolver to a fixpoint, then attempts one additional step in
/// case the leaf exposes a differently-capable view of itself. Fails with
/// `not-supported` if the reached leaf lacks the capability.
pub async fn resolve_to(
    fs: &Arc<dyn FileService>,
    name: &str,
    ctx: &OpCtx,
    want: Cap,
) -> FsResult<(Arc<dyn FileService>, String)> {
    let (mut rfs, mut rname) = resolve(fs, name, ctx).await?;

    if rfs.caps().resolver
        && let Ok(ResolveStep::Descend(next, next_name)) = rfs.resolve(&rname, ctx).await
        && (!same_service(&next, &rfs) || next_name != rname)
    {
        rfs = next;
        rname = next_name;
    }

    let caps = rfs.caps();
    let has = match want {
        Cap::Resolver => caps.resolver,
        Cap::Creator => caps.creator,
        Cap::Stat => caps.stat,
    };
    if has {
        Ok((rfs, rname))
    } else {
        Err(FsError::not_supported("resolve", name))
    }
}
