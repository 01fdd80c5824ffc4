//! datagate-cache — tiered key/value cache.
//!
//! Values are looked up in an optional external tier first and fall back to
//! a local in-process store. The external tier is best effort: its failures
//! are logged and absorbed, never returned to the caller.
//!
//! # Architecture
//!
//! ```text
//! CacheManager
//!   ├── ExternalCache (optional, fail-open, bounded by external_timeout)
//!   ├── LocalStore    (TTL entries + byte accounting)
//!   └── cleanup task  (purge expired → evict soonest-expiry until ≤ target)
//! ```

pub mod config;
pub mod external;
mod local;
pub mod manager;

pub use config::CacheConfig;
pub use external::{ExternalCache, ExternalFuture, InMemoryExternalCache};
pub use manager::{CacheHealth, CacheManager, CacheStats, SweepReport};
