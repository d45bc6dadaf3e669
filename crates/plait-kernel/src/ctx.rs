//! The per-operation context.
//!
//! Every resolve/open/create/stat call carries an `OpCtx`. It is cheap to
//! clone and flows through recursion unchanged: the public entry points
//! stamp the origin once, and composites propagate the context as-is, so
//! the origin always names the service the operation entered through —
//! never an intermediate hop.

use std::sync::Arc;

use plait_types::TaskId;
use tokio_util::sync::CancellationToken;

use crate::service::FileService;

/// Where an operation entered the composition: the outermost service, the
/// name asked of it, and the operation verb.
#[derive(Clone)]
pub struct Origin {
    pub fs: Arc<dyn FileService>,
    pub name: String,
    pub op: &'static str,
}

/// Per-operation carrier: origin, read-only mode, task identity, and
/// cooperative cancellation.
#[derive(Clone)]
pub struct OpCtx {
    origin: Option<Origin>,
    read_only: bool,
    task: Option<TaskId>,
    cancel: CancellationToken,
}

impl Default for OpCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCtx {
    pub fn new() -> Self {
        Self {
            origin: None,
            read_only: false,
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A copy of this context marked read-only. Union member selection uses
    /// this to suppress write-preference.
    pub fn read_only(&self) -> Self {
        Self {
            read_only: true,
            ..self.clone()
        }
    }

    /// A copy carrying a task identity. The task service resolves `self`
    /// from this.
    pub fn with_task(&self, task: TaskId) -> Self {
        Self {
            task: Some(task),
            ..self.clone()
        }
    }

    /// A copy with the origin stamped. Called by the entry points; nested
    /// calls keep the context they were given.
    pub fn with_origin(&self, fs: Arc<dyn FileService>, name: &str, op: &'static str) -> Self {
        Self {
            origin: Some(Origin {
                fs,
                name: name.to_string(),
                op,
            }),
            ..self.clone()
        }
    }

    /// A copy observing the given cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
