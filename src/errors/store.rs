// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the embedded object store.

/// Errors that can occur while reading or writing the local persistent store.
///
/// Read failures on the cache path are typically degraded to cache misses by
/// callers; write failures are logged by the deferred-write queue and never
/// surfaced to the original requester.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem I/O failed while loading or saving a database file.
    #[error("Store I/O error: {context}")]
    Io {
        /// Description of the failed operation, including the path
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serializing or deserializing database contents failed.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation referenced an object store that the schema upgrade never
    /// created.
    #[error("Missing object store: {name}")]
    MissingObjectStore {
        /// Name of the absent object store
        name: String,
    },
}

impl StoreError {
    /// Create an `Io` error with context about the failed operation.
    pub fn io_error(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a `MissingObjectStore` error for a store name.
    pub fn missing_object_store(name: impl Into<String>) -> Self {
        StoreError::MissingObjectStore { name: name.into() }
    }
}
