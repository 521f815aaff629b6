//! Handles shared across the boundary
//!
//! - [`object`] - host wrappers around native objects
//! - [`table`] - host values referenced from native code by `u64` handle

pub mod object;
pub mod table;

pub use object::{CallGuard, CloneFn, FreeFn, ObjectHandle, ObjectVTable};
pub use table::HandleTable;
