// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers: a scripted fetcher and request builders.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use semiocache::errors::FetchError;
use semiocache::{
    CacheConfigBuilder, CacheEngine, FetchRequest, Fetcher, InterceptedRequest,
};
use serde_json::{json, Value};
use url::Url;

type Responder = Box<dyn Fn(&FetchRequest) -> Result<Value, FetchError> + Send + Sync>;

/// A fetcher driven by a scripted responder, recording every call.
pub struct ScriptedFetcher {
    respond: Responder,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new(
        respond: impl Fn(&FetchRequest) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always returns the same body.
    pub fn constant(value: Value) -> Arc<Self> {
        Self::new(move |_| Ok(value.clone()))
    }

    /// Always fails, simulating a total network outage.
    pub fn failing() -> Arc<Self> {
        Self::new(|request| Err(FetchError::http(503, request.url.as_str())))
    }

    /// Returns one row at each end of the requested revision window, with
    /// the value equal to the revision. Mimics a backend that always has
    /// data at the window boundaries.
    pub fn boundary_rows() -> Arc<Self> {
        Self::new(|request| {
            let min: u64 = request.param("min_revision").unwrap_or("0").parse().unwrap();
            let max: u64 = request.param("max_revision").unwrap_or("0").parse().unwrap();
            let mut data = vec![json!({"revision": min, "value": min as f64})];
            if max != min {
                data.push(json!({"revision": max, "value": max as f64}));
            }
            Ok(json!({
                "units": "ms",
                "improvement_direction": 1,
                "data": data,
            }))
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }

    fn name(&self) -> &'static str {
        "ScriptedFetcher"
    }
}

/// An engine with a flush delay short enough for tests to await.
pub fn test_engine(fetcher: Arc<ScriptedFetcher>) -> Arc<CacheEngine> {
    let config = CacheConfigBuilder::with_defaults()
        .write_flush_delay(Duration::from_millis(10))
        .build();
    CacheEngine::new(config, fetcher)
}

/// A time-series request for the standard test series over `[min, max]`.
pub fn timeseries_request(min: u64, max: u64) -> InterceptedRequest {
    timeseries_request_with_columns(min, max, "revision,value")
}

pub fn timeseries_request_with_columns(min: u64, max: u64, columns: &str) -> InterceptedRequest {
    InterceptedRequest::new(
        "POST",
        Url::parse("https://example.org/api/timeseries2").unwrap(),
    )
    .with_param("test_suite", "rendering")
    .with_param("bot", "linux-perf")
    .with_param("measurement", "frame_time")
    .with_param("columns", columns)
    .with_param("min_revision", min.to_string())
    .with_param("max_revision", max.to_string())
}
