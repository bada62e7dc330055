// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for closed-interval range arithmetic.

/// Errors that can occur during range arithmetic.
///
/// Range operations are pure and only fail on geometrically invalid input,
/// which is a caller bug rather than a recoverable condition.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    /// A range with negative duration (or otherwise malformed geometry) was
    /// passed to an operation that requires well-formed operands.
    #[error("Invalid range: {reason}")]
    InvalidRange {
        /// Description of the malformed geometry
        reason: String,
    },
}

impl RangeError {
    /// Create an `InvalidRange` error with details.
    pub fn invalid_range(reason: impl Into<String>) -> Self {
        RangeError::InvalidRange {
            reason: reason.into(),
        }
    }
}
