// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the semiocache library.
//!
//! This module provides strongly-typed errors for all public APIs. It
//! follows a hybrid approach:
//!
//! - **Module-specific errors** for fine-grained handling ([`RangeError`],
//!   [`StoreError`], [`FetchError`], [`RequestError`])
//! - **Unified error type** ([`SemiocacheError`]) for convenience when the
//!   error source does not matter
//!
//! The error taxonomy mirrors how failures are actually handled:
//!
//! - Malformed input ([`RequestError::MissingParameter`],
//!   [`RangeError::InvalidRange`]) rejects the request before any work.
//! - Transient I/O failures (one slice fetch, one store read) are recovered
//!   locally and never cascade to unrelated slices.
//! - Deferred-write failures are caught and logged inside the flush loop,
//!   never retried and never surfaced to the original caller.

mod fetch;
mod range;
mod request;
mod store;

pub use fetch::FetchError;
pub use range::RangeError;
pub use request::RequestError;
pub use store::StoreError;

/// Unified error type for all semiocache operations.
///
/// Wraps all module-specific error types; each converts via `From`, so `?`
/// propagates naturally in code that does not need to distinguish sources.
#[derive(Debug, thiserror::Error)]
pub enum SemiocacheError {
    /// Error from range arithmetic.
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// Error from the embedded object store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the network fetch boundary.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Error from a cache request lifecycle.
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
}
