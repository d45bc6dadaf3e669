//! plait-kernel: the core of plait.
//!
//! Plait is a Plan 9-inspired composition layer for file services: given a
//! path in a per-task namespace assembled from independently-implemented
//! services, the kernel locates the one service that owns the final path
//! component and the relative name it expects — across arbitrarily deep
//! nesting of bindings, unions, and mapped directories.
//!
//! This crate provides:
//!
//! - **path**: strict protocol-name validation and prefix matching
//! - **ctx**: the per-operation carrier (origin, read-only, task identity,
//!   cancellation)
//! - **service**: the `FileService` contract and its capability sets
//! - **resolve**: the single recursive driver that runs resolution to a
//!   fixpoint; individual resolvers do exactly one hop
//! - **ops**: the public open/create/stat/read_dir entry points
//! - **fskit**: synthetic building blocks (MapFS, UnionFS, MemFS, field,
//!   func, and control files)
//! - **ns**: the per-task namespace with Plan 9 bind semantics
//! - **task**: the task service — allocator, registry, and per-task
//!   filesystems wired to fd pipes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ops (entry points)                     │
//! │   open / create / stat / read_dir: validate, stamp origin   │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │
//!                       ┌────────▼────────┐
//!                       │     resolve     │  one driver, N hops
//!                       └────────┬────────┘
//!          ┌─────────────┬───────┴──────┬──────────────┐
//!    ┌─────▼─────┐ ┌─────▼─────┐ ┌──────▼─────┐ ┌──────▼─────┐
//!    │ Namespace │ │   MapFS   │ │  UnionFS   │ │ TaskService│
//!    │ (bindings)│ │ (prefixes)│ │ (members)  │ │ (alloc/ids)│
//!    └───────────┘ └───────────┘ └────────────┘ └────────────┘
//! ```

pub mod ctx;
pub mod fskit;
pub mod ns;
pub mod ops;
pub mod path;
pub mod resolve;
pub mod service;
pub mod task;

pub use ctx::{OpCtx, Origin};
pub use ns::{Binding, Namespace};
pub use ops::{create, open, read_dir, stat};
pub use resolve::{Cap, MAX_RESOLVE_DEPTH, resolve, resolve_to};
pub use service::{File, FileService, ResolveStep, ServiceCaps, read_all, same_service};
pub use task::{Starter, Task, TaskService};

// Data types re-exported from plait-types.
pub use plait_types::{BindMode, ErrKind, FileInfo, FileMode, FsError, FsResult, TaskId};
