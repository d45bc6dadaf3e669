//! The error taxonomy every plait operation reports from.
//!
//! Every error carries the operation name and the path it applies to, so a
//! failure deep in a composition still names the thing the caller asked for.
//! The `Display` form is the wire form: the kind token comes first
//! (`not-exist: open task/9/cmd`), which is what control files surface to
//! their writers.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for all plait operations.
pub type FsResult<T> = Result<T, FsError>;

/// Classification of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrKind {
    /// Name has no binding or member answer.
    NotExist,
    /// Operation forbidden on an existing name.
    Permission,
    /// Path validation failed or an argument is ill-formed.
    Invalid,
    /// Capability absent on the reached leaf.
    NotSupported,
    /// The resolver ran its hop budget without reaching a fixpoint.
    DepthExceeded,
    /// The operation's context was cancelled.
    Cancelled,
    /// Lower-level failure, propagated verbatim.
    Io(String),
}

impl ErrKind {
    /// The wire token for this kind.
    pub fn token(&self) -> &'static str {
        match self {
            ErrKind::NotExist => "not-exist",
            ErrKind::Permission => "permission",
            ErrKind::Invalid => "invalid",
            ErrKind::NotSupported => "not-supported",
            ErrKind::DepthExceeded => "depth-exceeded",
            ErrKind::Cancelled => "cancelled",
            ErrKind::Io(_) => "io",
        }
    }
}

/// A structured operation failure: kind, operation, path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.wire())]
pub struct FsError {
    pub kind: ErrKind,
    pub op: &'static str,
    pub path: String,
}

impl FsError {
    pub fn new(kind: ErrKind, op: &'static str, path: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            path: path.into(),
        }
    }

    pub fn not_exist(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::NotExist, op, path)
    }

    pub fn permission(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::Permission, op, path)
    }

    pub fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::Invalid, op, path)
    }

    pub fn not_supported(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::NotSupported, op, path)
    }

    pub fn depth_exceeded(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::DepthExceeded, op, path)
    }

    pub fn cancelled(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrKind::Cancelled, op, path)
    }

    pub fn io(op: &'static str, path: impl Into<String>, msg: impl fmt::Display) -> Self {
        Self::new(ErrKind::Io(msg.to_string()), op, path)
    }

    /// Map an `io::Error` onto the taxonomy, keeping the operation and path.
    pub fn from_io(op: &'static str, path: impl Into<String>, err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrKind::NotExist,
            io::ErrorKind::PermissionDenied => ErrKind::Permission,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrKind::Invalid,
            io::ErrorKind::Unsupported => ErrKind::NotSupported,
            _ => ErrKind::Io(err.to_string()),
        };
        Self::new(kind, op, path)
    }

    /// True if this error means the name simply is not there. Union members
    /// returning this are skipped; any other error propagates.
    pub fn is_not_exist(&self) -> bool {
        self.kind == ErrKind::NotExist
    }

    pub fn is_not_supported(&self) -> bool {
        self.kind == ErrKind::NotSupported
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrKind::Cancelled
    }

    fn wire(&self) -> String {
        match &self.kind {
            ErrKind::Io(msg) => format!("{}: {} {}: {}", self.kind.token(), self.op, self.path, msg),
            _ => format!("{}: {} {}", self.kind.token(), self.op, self.path),
        }
    }
}
