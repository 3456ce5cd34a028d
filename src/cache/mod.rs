//! Caching layers
//!
//! Two cooperating caches with different semantics:
//!
//! - [`TtlCache`]: stores *results* with a time-to-live. Used for lookups
//!   that are safe to serve stale within a window (weather, place names).
//! - [`InFlightCache`]: stores the *pending computation* itself, so
//!   concurrent callers asking for the same key share one outbound call
//!   (geocoding, road info, per-node risk).
//!
//! Both are cheap to clone; clones share the same underlying map.

pub mod inflight;
pub mod ttl;

pub use inflight::InFlightCache;
pub use ttl::{CacheStats, TtlCache};
