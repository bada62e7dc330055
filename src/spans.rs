// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Tracing spans for request lifecycles and background work.

use tracing::{debug_span, Span};

pub(crate) fn key_value_respond(key: &str) -> Span {
    debug_span!("semiocache.key_value_respond", key)
}

pub(crate) fn timeseries_respond(series: &str) -> Span {
    debug_span!("semiocache.timeseries_respond", series)
}

pub(crate) fn fetch_slice(series: &str, min: u64, max: u64) -> Span {
    debug_span!("semiocache.fetch_slice", series, min, max)
}

pub(crate) fn write_database(database: &str) -> Span {
    debug_span!("semiocache.write_database", database)
}
