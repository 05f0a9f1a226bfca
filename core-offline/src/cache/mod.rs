//! # Media Cache
//!
//! Bounded on-disk storage shared by two policies:
//!
//! - **Retained** entries hold completed downloads. They are only removed
//!   on request (cancel, auto-delete, clear) and never evicted.
//! - **Ephemeral** entries hold streaming reads and are evicted by the
//!   configured [`EvictionPolicy`] whenever a write needs room.
//!
//! Transfers write into a separate staging area and are moved into the
//! retained partition with a single rename once complete.

pub mod config;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, EvictionPolicy};
pub use stats::CacheStats;
pub use store::{CacheEntry, CacheStore};
