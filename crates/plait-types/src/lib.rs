//! Pure data types for plait — file metadata, bind modes, and the error
//! taxonomy.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It
//! exists so that file-service implementations outside the kernel can speak
//! plait's type system without pulling in the kernel's transitive deps.

pub mod bind;
pub mod error;
pub mod file_info;
pub mod task;

// Flat re-exports for convenience
pub use bind::*;
pub use error::*;
pub use file_info::*;
pub use task::*;
