// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the network fetch boundary.

/// Errors that can occur while fetching a slice from the backend.
///
/// A non-2xx status and a malformed body are both treated as fetch failure
/// for that slice; the merge step degrades gracefully by skipping the slice.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The backend answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// Response status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("Malformed response body: {details}")]
    MalformedBody {
        /// Details about why the body could not be decoded
        details: String,
    },

    /// The request never produced a response (connection, DNS, timeout).
    #[error("Transport error: {details}")]
    Transport {
        /// Details from the underlying client
        details: String,
    },
}

impl FetchError {
    /// Create an `Http` error for a status code and URL.
    pub fn http(status: u16, url: impl Into<String>) -> Self {
        FetchError::Http {
            status,
            url: url.into(),
        }
    }

    /// Create a `MalformedBody` error with details.
    pub fn malformed_body(details: impl Into<String>) -> Self {
        FetchError::MalformedBody {
            details: details.into(),
        }
    }

    /// Create a `Transport` error with details.
    pub fn transport(details: impl std::fmt::Display) -> Self {
        FetchError::Transport {
            details: details.to_string(),
        }
    }
}
