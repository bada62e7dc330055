// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The cache engine: shared context for every cache request.
//!
//! One [`CacheEngine`] owns the in-progress request registry, the pooled
//! databases, the deferred-write [`TaskQueue`], the broadcast
//! [`ChannelRegistry`], and the backend [`Fetcher`]. Requests receive an
//! `Arc<CacheEngine>` explicitly; there is no global state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::channel::ChannelRegistry;
use crate::config::CacheConfig;
use crate::errors::{FetchError, StoreError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::request::{Dedup, HostLifetime, RequestDescriptor, RequestEntry};
use crate::store::{Database, DatabaseUpgrade, DiskBacking};
use crate::task_queue::{TaskQueue, WriteTask};

/// Shared context for cache requests.
pub struct CacheEngine {
    config: CacheConfig,
    fetcher: Arc<dyn Fetcher>,
    databases: tokio::sync::Mutex<HashMap<String, Arc<Database>>>,
    in_progress: std::sync::Mutex<Vec<Arc<RequestEntry>>>,
    queue: Arc<TaskQueue>,
    channels: ChannelRegistry,
    next_request_id: AtomicU64,
}

impl CacheEngine {
    /// Create an engine with the given configuration and backend fetcher.
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Arc<Self> {
        Arc::new(Self {
            config,
            fetcher,
            databases: tokio::sync::Mutex::new(HashMap::new()),
            in_progress: std::sync::Mutex::new(Vec::new()),
            queue: Arc::new(TaskQueue::new()),
            channels: ChannelRegistry::new(),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Create an engine backed by an [`HttpFetcher`] built from the
    /// configured fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be
    /// initialized.
    pub fn with_http_fetcher(config: CacheConfig) -> Result<Arc<Self>, FetchError> {
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        Ok(Self::new(config, fetcher))
    }

    /// Engine configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Broadcast channel registry for progressive results.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Deferred-write scheduler.
    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Backend fetcher handle.
    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open (or reuse) a pooled database. At most one handle exists per
    /// logical name; the upgrade callback only runs when the database is
    /// actually opened at a newer version.
    pub async fn open_database<F>(
        &self,
        name: &str,
        version: u32,
        upgrade: F,
    ) -> Result<Arc<Database>, StoreError>
    where
        F: FnOnce(&mut DatabaseUpgrade<'_>),
    {
        let mut pool = self.databases.lock().await;
        if let Some(database) = pool.get(name) {
            return Ok(Arc::clone(database));
        }

        let backing = match &self.config.cache_dir {
            Some(dir) => {
                let file_name = format!("{}.json", sanitize_database_name(name));
                Some(DiskBacking::new(dir.join(file_name)).validate()?)
            }
            None => None,
        };

        let database = Database::open(name, version, backing, upgrade).await?;
        pool.insert(name.to_string(), Arc::clone(&database));
        debug!(database = name, version, "opened database");
        Ok(database)
    }

    /// Register a request as in-progress. A new read wave cancels any
    /// pending deferred-write flush so writes stay behind reads.
    pub(crate) fn register(self: &Arc<Self>, entry: Arc<RequestEntry>) {
        self.queue.cancel_flush();
        self.in_progress
            .lock()
            .expect("request registry poisoned")
            .push(entry);
    }

    /// Remove a request from the registry by id.
    pub(crate) fn deregister(&self, id: u64) {
        self.in_progress
            .lock()
            .expect("request registry poisoned")
            .retain(|entry| entry.id != id);
    }

    /// Whole-request dedup: if an in-flight peer serves the same key, this
    /// request deregisters itself and relays the peer's response. The scan
    /// and the self-deregistration happen under one registry lock so two
    /// concurrent duplicates can never delegate to each other.
    pub(crate) fn delegate_if_duplicate(&self, entry: &RequestEntry) -> Dedup {
        let mut registry = self.in_progress.lock().expect("request registry poisoned");

        let peer = registry.iter().find(|peer| {
            peer.id != entry.id
                && peer.path == entry.path
                && descriptors_match(&peer.descriptor, &entry.descriptor)
        });

        match peer {
            Some(peer) => {
                let response = Arc::clone(&peer.response);
                debug!(request = entry.id, peer = peer.id, "delegating to in-flight duplicate");
                registry.retain(|registered| registered.id != entry.id);
                Dedup::Delegated(response)
            }
            None => Dedup::Owned,
        }
    }

    /// Run `f` with every registered peer of `entry` (same path, excluding
    /// `entry` itself) while holding the registry lock. Used for slice-level
    /// dedup, where reservations must be published and borrowed atomically.
    pub(crate) fn with_peers<R>(
        &self,
        entry: &RequestEntry,
        f: impl FnOnce(&[Arc<RequestEntry>]) -> R,
    ) -> R {
        let registry = self.in_progress.lock().expect("request registry poisoned");
        let peers: Vec<Arc<RequestEntry>> = registry
            .iter()
            .filter(|peer| peer.id != entry.id && peer.path == entry.path)
            .map(Arc::clone)
            .collect();
        f(&peers)
    }

    /// Record that a request has delivered its response. The entry stays
    /// registered while its deferred write is pending; once every
    /// registered request has responded, the write flush is armed.
    pub(crate) fn note_responded(self: &Arc<Self>, entry: &RequestEntry) {
        entry.responded.store(true, Ordering::SeqCst);

        let all_responded = {
            let mut registry = self.in_progress.lock().expect("request registry poisoned");
            if !entry.writing.load(Ordering::SeqCst) {
                registry.retain(|registered| registered.id != entry.id);
            }
            registry
                .iter()
                .all(|registered| registered.responded.load(Ordering::SeqCst))
        };

        if all_responded {
            self.queue
                .schedule_flush(self.config.write_flush_delay);
        }
    }

    /// Queue a deferred write on behalf of a request, extending the host
    /// lifetime until the write settles. The entry stays registered (and
    /// visible to dedup) until then.
    pub(crate) fn schedule_write(
        self: &Arc<Self>,
        entry: &Arc<RequestEntry>,
        host: &HostLifetime,
        task: WriteTask,
    ) {
        entry.writing.store(true, Ordering::SeqCst);

        let done = Arc::new(tokio::sync::Notify::new());
        {
            let engine = Arc::clone(self);
            let entry = Arc::clone(entry);
            let done = Arc::clone(&done);
            self.queue.schedule(Box::pin(async move {
                let outcome = task.await;
                entry.writing.store(false, Ordering::SeqCst);
                engine.deregister(entry.id);
                done.notify_one();
                outcome
            }));
        }

        host.wait_until(async move {
            done.notified().await;
        });
    }

    #[cfg(test)]
    pub(crate) fn in_progress_count(&self) -> usize {
        self.in_progress
            .lock()
            .expect("request registry poisoned")
            .len()
    }
}

/// Database identity match for whole-request dedup. Timeseries requests
/// dedup at slice granularity instead, so only exact series identity counts.
fn descriptors_match(a: &RequestDescriptor, b: &RequestDescriptor) -> bool {
    match (a, b) {
        (
            RequestDescriptor::KeyValue { database, key },
            RequestDescriptor::KeyValue {
                database: peer_database,
                key: peer_key,
            },
        ) => database == peer_database && key == peer_key,
        _ => false,
    }
}

/// Database names contain `/` separators; flatten them for file paths.
fn sanitize_database_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}
