// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Request lifecycle primitives shared by every cache request type.
//!
//! The host boundary delivers an [`InterceptedRequest`] and two
//! primitives: respond-with (delivering the final payload, modeled as the
//! request's return value) and [`HostLifetime::wait_until`] (extending the
//! host's lifetime guarantee until a deferred write settles).
//!
//! In-flight coalescing is modeled explicitly: a request either owns the
//! work ([`Dedup::Owned`]) or delegates to another request's response cell
//! ([`Dedup::Delegated`]); ownership is never implied by side effects.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use url::Url;

use crate::errors::RequestError;
use crate::timeseries::{SeriesKey, SliceReservation};

/// The cache request lifecycle.
///
/// Every request type serves its intercepted request through
/// [`respond`](Self::respond) and applies its deferred cache write through
/// [`write_database`](Self::write_database). Read-only request types keep
/// the default `write_database`, which fails loudly rather than silently
/// doing nothing.
#[async_trait]
pub trait CacheRequest: Send + Sync {
    /// Short type name for logging.
    fn name(&self) -> &'static str;

    /// Serve the intercepted request and return the response payload.
    async fn respond(self: Arc<Self>, host: &HostLifetime) -> Result<Value, RequestError>;

    /// Apply this request's deferred cache write.
    async fn write_database(self: Arc<Self>) -> Result<(), RequestError> {
        Err(RequestError::unimplemented("write_database"))
    }
}

/// An intercepted network request delivered by the host.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    /// HTTP method, uppercase
    pub method: String,
    /// Full request URL
    pub url: Url,
    /// Body form parameters
    pub params: Vec<(String, String)>,
}

impl InterceptedRequest {
    /// Create a request with no body parameters.
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            params: Vec::new(),
        }
    }

    /// Append a body parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// URL path of the request.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Look up a parameter, checking body parameters before the URL query.
    pub fn param(&self, name: &str) -> Option<String> {
        if let Some((_, value)) = self.params.iter().find(|(n, _)| n == name) {
            return Some(value.clone());
        }
        self.url
            .query_pairs()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Look up a required parameter.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingParameter`] when absent.
    pub fn require_param(&self, name: &str) -> Result<String, RequestError> {
        self.param(name)
            .ok_or_else(|| RequestError::missing_parameter(name))
    }
}

/// Host lifetime extension, the `wait_until` analogue: registered futures
/// keep the host alive until they settle.
#[derive(Default)]
pub struct HostLifetime {
    pending: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl HostLifetime {
    /// Create a lifetime handle with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the host lifetime until `future` completes.
    pub fn wait_until(&self, future: impl std::future::Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(future);
        self.pending
            .lock()
            .expect("host lifetime poisoned")
            .push(handle);
    }

    /// Wait for every registered future to settle. Used by hosts (and
    /// tests) that must not recycle the request context while deferred
    /// writes are outstanding.
    pub async fn settled(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self.pending.lock().expect("host lifetime poisoned"),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

/// State of a shared asynchronous result.
enum CellState<T> {
    Pending,
    Ready(Arc<T>),
    Failed(Arc<RequestError>),
}

/// A write-once result cell that any number of piggybacked consumers can
/// await.
pub(crate) struct SharedCell<T> {
    state: Mutex<CellState<T>>,
    notify: Notify,
}

impl<T> SharedCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
            notify: Notify::new(),
        }
    }

    /// Resolve the cell. Later calls are ignored; the first outcome wins.
    pub(crate) fn fulfill(&self, value: Arc<T>) {
        let mut state = self.state.lock().expect("shared cell poisoned");
        if matches!(*state, CellState::Pending) {
            *state = CellState::Ready(value);
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Reject the cell. Later calls are ignored; the first outcome wins.
    pub(crate) fn fail(&self, error: RequestError) {
        let mut state = self.state.lock().expect("shared cell poisoned");
        if matches!(*state, CellState::Pending) {
            *state = CellState::Failed(Arc::new(error));
            drop(state);
            self.notify.notify_waiters();
        }
    }

    fn try_get(&self) -> Option<Result<Arc<T>, RequestError>> {
        match &*self.state.lock().expect("shared cell poisoned") {
            CellState::Pending => None,
            CellState::Ready(value) => Some(Ok(Arc::clone(value))),
            CellState::Failed(error) => Some(Err(RequestError::upstream(error))),
        }
    }

    /// Wait until the cell resolves.
    pub(crate) async fn wait(&self) -> Result<Arc<T>, RequestError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }
}

/// What an in-progress request looks like to its peers in the registry.
pub(crate) enum RequestDescriptor {
    /// A whole-value request identified by database name and cache key.
    KeyValue { database: String, key: String },
    /// A time-series request identified by its dimension keys, exposing
    /// the slices it has reserved for fetching.
    Timeseries {
        series: SeriesKey,
        slices: Mutex<Vec<SliceReservation>>,
    },
}

/// One registered in-progress request.
pub(crate) struct RequestEntry {
    /// Registry identity
    pub id: u64,
    /// Request path; dedup never matches across different paths
    pub path: String,
    /// Set once the request has delivered its response
    pub responded: AtomicBool,
    /// Set while a deferred write is pending for this request
    pub writing: AtomicBool,
    /// Peer-visible identity and reservations
    pub descriptor: RequestDescriptor,
    /// Final payload, awaited by piggybacked duplicates
    pub response: Arc<SharedCell<Value>>,
}

impl RequestEntry {
    pub(crate) fn new(id: u64, path: String, descriptor: RequestDescriptor) -> Arc<Self> {
        Arc::new(Self {
            id,
            path,
            responded: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            descriptor,
            response: Arc::new(SharedCell::new()),
        })
    }
}

/// Outcome of the dedup step: either this request owns the work, or it has
/// deregistered itself and will relay another request's response.
pub(crate) enum Dedup {
    Owned,
    Delegated(Arc<SharedCell<Value>>),
}
