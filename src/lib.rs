// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! A client-side intercepting, request-coalescing, range-aware cache.
//!
//! `semiocache` sits between an application and a backend API and serves
//! repeated or overlapping requests from a local persistent store while
//! minimizing duplicate network traffic:
//!
//! - [`Range`] / [`SortedRangeSet`]: closed-interval arithmetic over an
//!   ordered revision axis, used to track per-column cache coverage.
//! - [`TaskQueue`]: a deferred-write scheduler so persistence never adds
//!   latency to the read path.
//! - [`CacheEngine`]: per-process context holding the in-progress request
//!   registry, the pooled databases, and the broadcast channels.
//! - [`KeyValueCacheRequest`]: whole-value caching with expiration.
//! - [`TimeseriesCacheRequest`]: partial-cache reconciliation for large
//!   ordered datasets, fetching only the missing column/sub-range slices
//!   and coalescing them against other in-flight requests.

mod channel;
mod config;
mod engine;
pub mod errors;
mod fetch;
mod key_value;
mod range;
mod request;
pub(crate) mod spans;
mod store;
mod task_queue;
mod timeseries;

pub use channel::{channel_name, ChannelMessage, ChannelRegistry};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use engine::CacheEngine;
pub use errors::{FetchError, RangeError, RequestError, SemiocacheError, StoreError};
pub use fetch::{FetchRequest, Fetcher, HttpFetcher};
pub use key_value::KeyValueCacheRequest;
pub use range::{Range, Revision, SortedRangeSet};
pub use request::{CacheRequest, HostLifetime, InterceptedRequest};
pub use store::{revision_key, Database, DatabaseUpgrade, DiskBacking};
pub use task_queue::{TaskQueue, WriteTask};
pub use timeseries::{Row, SeriesKey, TimeseriesCacheRequest, REVISION_COLUMN};
