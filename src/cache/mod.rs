//! Cache Module
//!
//! Provides in-memory caching with TTL expiration and LRU eviction, used to
//! serve a degraded but valid response when live loading fails.

mod entry;
mod key;
mod lru;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use key::{CacheKey, HASHED_KEY_THRESHOLD};
pub use lru::LruTracker;
pub use shared::{cached, shared, SharedCache};
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Default capacity
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
