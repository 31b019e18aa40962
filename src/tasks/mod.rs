//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the host is up.
//!
//! # Tasks
//! - TTL Cleanup: eagerly removes expired cache entries at a fixed interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
