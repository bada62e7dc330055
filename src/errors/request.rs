// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for cache request lifecycles.

use super::{FetchError, RangeError, StoreError};

/// Errors that can occur while serving an intercepted request.
///
/// This covers the whole request lifecycle: parsing the inbound request,
/// reading the local store, fetching missing slices, and delegating to an
/// in-flight duplicate.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// A required request parameter was absent.
    #[error("Missing required parameter: {name}")]
    MissingParameter {
        /// Name of the absent parameter
        name: String,
    },

    /// A lifecycle method was invoked on a request type that does not
    /// support it. Surfaces immediately in testing rather than silently
    /// no-op-ing.
    #[error("Unimplemented request method: {method}")]
    Unimplemented {
        /// Name of the unimplemented method
        method: &'static str,
    },

    /// Neither the cache nor the network produced any data for the request.
    #[error("No data available: {details}")]
    NoData {
        /// Description of what was requested
        details: String,
    },

    /// A delegated in-flight request failed; the failure is relayed to
    /// every piggybacked caller.
    #[error("In-flight request failed: {message}")]
    Upstream {
        /// Rendered error from the owning request
        message: String,
    },

    /// Error from range arithmetic over the requested interval.
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// Error from the local persistent store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the network fetch boundary.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A persisted or fetched JSON value did not have the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RequestError {
    /// Create a `MissingParameter` error for a parameter name.
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        RequestError::MissingParameter { name: name.into() }
    }

    /// Create an `Unimplemented` error for a method name.
    pub fn unimplemented(method: &'static str) -> Self {
        RequestError::Unimplemented { method }
    }

    /// Create a `NoData` error with details.
    pub fn no_data(details: impl Into<String>) -> Self {
        RequestError::NoData {
            details: details.into(),
        }
    }

    /// Create an `Upstream` error relaying a delegated request's failure.
    pub fn upstream(message: impl std::fmt::Display) -> Self {
        RequestError::Upstream {
            message: message.to_string(),
        }
    }
}
