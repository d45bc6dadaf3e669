//! Synthetic filesystem building blocks.
//!
//! Everything the composites are made of: ready-made directory handles,
//! field/func/control files for synthetic surfaces, an in-memory leaf
//! service, the MapFS prefix router, and the UnionFS read-through union.

mod mapfs;
mod memfs;
mod node;
mod synth;
mod unionfs;

pub use mapfs::MapFS;
pub use memfs::MemFS;
pub use node::{DirHandle, cursor_read};
pub use synth::{CtlFile, CtlHandler, FieldFile, FuncFile, FuncHandle, OpenFn, SyncBoxFuture};
pub use unionfs::UnionFS;
