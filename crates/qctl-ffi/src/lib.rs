//! C API for the qctl queue manager.
//!
//! Exposes the process-wide [`qctl::QueueManager`] through opaque give/keep
//! handles, integer backend and device-type inputs, library-owned strings and
//! arrays with matching delete functions, and thread-local error reporting.
//! No panic or Rust error crosses the boundary.

pub mod c_api;
pub mod error;
pub mod memory;

pub use c_api::*;
pub use error::*;
pub use memory::*;
