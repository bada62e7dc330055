// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Network boundary.
//!
//! The engine only ever talks to the backend through the [`Fetcher`] trait:
//! `fetch(request) -> JSON body`, where a non-2xx status or a malformed
//! body is a fetch failure for that request. Tests inject scripted
//! implementations; production uses [`HttpFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::errors::FetchError;

/// One outbound backend request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// HTTP method, uppercase
    pub method: String,
    /// Absolute backend URL
    pub url: Url,
    /// Form parameters sent as the request body (POST) or appended to the
    /// query (GET)
    pub params: Vec<(String, String)>,
}

impl FetchRequest {
    /// Create a GET request with no parameters.
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            params: Vec::new(),
        }
    }

    /// Replace (or insert) one parameter, preserving the order of the rest.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.params.iter_mut().find(|(n, _)| n == name) {
            existing.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
    }

    /// Look up a parameter value by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Backend fetch contract.
///
/// Implementations must be thread-safe; the engine issues slice fetches
/// concurrently from a shared handle.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request and decode its JSON body.
    ///
    /// # Errors
    ///
    /// Any transport failure, non-2xx status, or undecodable body is a
    /// [`FetchError`]; the caller treats the affected slice as unavailable.
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;

    /// Human-readable name for logging and debugging.
    fn name(&self) -> &'static str;
}

/// HTTP implementation of [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::transport)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let builder = if request.method.eq_ignore_ascii_case("POST") {
            self.client.post(request.url.clone()).form(&request.params)
        } else {
            self.client
                .get(request.url.clone())
                .query(&request.params)
        };

        let response = builder.send().await.map_err(FetchError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http(status.as_u16(), request.url.as_str()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::malformed_body(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "HttpFetcher"
    }
}
