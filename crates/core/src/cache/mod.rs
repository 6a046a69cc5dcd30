//! In-memory query cache for gateway reads.
//!
//! This module provides the client-side cache coherence primitives:
//!
//! - Value-compared cache keys (resource kind + optional discriminator)
//! - Per-kind staleness and garbage-collection windows
//! - Bounded retry with an authentication short-circuit
//! - A query store with request coalescing, stale-while-revalidate reads
//!   and timestamp-guarded writes

pub mod key;
pub mod policy;
pub mod query;
pub mod retry;

pub use key::{CacheKey, ResourceKind};
pub use policy::{CachePolicy, PolicyTable};
pub use query::{QueryCache, QueryObserver, QuerySnapshot};
pub use retry::RetryPolicy;
