//! Caching and rate-limit plumbing owned by individual adapters.
//!
//! Nothing here is global: each adapter receives its own `TtlCache`, and a
//! `RequestLane` is shared only by handing the same clone to every adapter
//! that talks to the rate-limited provider.

pub mod lane;
pub mod ttl;

pub use lane::{LaneConfig, RequestLane};
pub use ttl::{CacheEntry, Cached, Freshness, TtlCache, DEFAULT_MAX_ENTRIES};
