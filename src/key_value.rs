// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Whole-value caching with expiration.
//!
//! A [`KeyValueCacheRequest`] caches the entire response body under a key
//! derived from the request URL and parameters. Entries carry an absolute
//! expiration timestamp assigned at write time; an expired entry is treated
//! as a miss and refetched.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, Instrument};

use crate::channel::{channel_name, ChannelMessage};
use crate::engine::CacheEngine;
use crate::errors::{RequestError, SemiocacheError};
use crate::fetch::FetchRequest;
use crate::request::{
    CacheRequest, Dedup, HostLifetime, InterceptedRequest, RequestDescriptor, RequestEntry,
};
use crate::spans;

const DATABASE_NAME: &str = "keyvalue";
const DATABASE_VERSION: u32 = 1;
const STORE_ENTRIES: &str = "entries";

/// One cached response with its expiration.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: Value,
    expiration: DateTime<Utc>,
}

impl StoredEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }
}

/// Caches a whole response body under a URL-derived key.
pub struct KeyValueCacheRequest {
    engine: Arc<CacheEngine>,
    request: InterceptedRequest,
    key: String,
    entry: Arc<RequestEntry>,
    pending_write: Mutex<Option<StoredEntry>>,
}

impl KeyValueCacheRequest {
    /// Create and register the request. Registration happens before any
    /// other work so concurrent duplicates can find this request.
    pub fn new(engine: Arc<CacheEngine>, request: InterceptedRequest) -> Arc<Self> {
        let key = channel_name(&request.url, &request.params);
        let entry = RequestEntry::new(
            engine.next_id(),
            request.path().to_string(),
            RequestDescriptor::KeyValue {
                database: DATABASE_NAME.to_string(),
                key: key.clone(),
            },
        );
        engine.register(Arc::clone(&entry));

        Arc::new(Self {
            engine,
            request,
            key,
            entry,
            pending_write: Mutex::new(None),
        })
    }

    async fn get_response(self: &Arc<Self>, host: &HostLifetime) -> Result<Value, RequestError> {
        let database = self
            .engine
            .open_database(DATABASE_NAME, DATABASE_VERSION, |upgrade| {
                upgrade.create_object_store(STORE_ENTRIES);
            })
            .await?;

        if let Some(stored) = database.get(STORE_ENTRIES, &self.key).await? {
            match serde_json::from_value::<StoredEntry>(stored) {
                Ok(entry) if entry.is_fresh(Utc::now()) => {
                    debug!(key = %self.key, "key-value cache hit");
                    return Ok(entry.value);
                }
                Ok(_) => debug!(key = %self.key, "key-value entry expired"),
                Err(error) => debug!(key = %self.key, %error, "unreadable key-value entry"),
            }
        }

        if let Dedup::Delegated(response) = self.engine.delegate_if_duplicate(&self.entry) {
            debug!(key = %self.key, "waiting on in-flight duplicate");
            let value = response.wait().await?;
            return Ok((*value).clone());
        }

        let fetch_request = FetchRequest {
            method: self.request.method.clone(),
            url: self.request.url.clone(),
            params: self.request.params.clone(),
        };
        let value = self.engine.fetcher().fetch(&fetch_request).await?;

        let ttl = chrono::Duration::from_std(self.engine.config().key_value_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(20));
        *self.pending_write.lock().expect("pending write poisoned") = Some(StoredEntry {
            value: value.clone(),
            expiration: Utc::now() + ttl,
        });

        let this = Arc::clone(self);
        self.engine.clone().schedule_write(
            &self.entry,
            host,
            Box::pin(async move {
                this.write_database()
                    .await
                    .map_err(SemiocacheError::from)
            }),
        );

        Ok(value)
    }
}

#[async_trait]
impl CacheRequest for KeyValueCacheRequest {
    fn name(&self) -> &'static str {
        "KeyValueCacheRequest"
    }

    async fn respond(self: Arc<Self>, host: &HostLifetime) -> Result<Value, RequestError> {
        let span = spans::key_value_respond(&self.key);
        let result = self.get_response(host).instrument(span).await;

        let channels = self.engine.channels();
        match &result {
            Ok(value) => {
                self.entry.response.fulfill(Arc::new(value.clone()));
                channels.publish(&self.key, ChannelMessage::Result(value.clone()));
            }
            Err(error) => {
                self.entry.response.fail(RequestError::upstream(error));
                channels.publish(&self.key, ChannelMessage::Error(error.to_string()));
            }
        }
        channels.publish(&self.key, ChannelMessage::Done);

        self.engine.note_responded(&self.entry);
        result
    }

    async fn write_database(self: Arc<Self>) -> Result<(), RequestError> {
        let Some(entry) = self
            .pending_write
            .lock()
            .expect("pending write poisoned")
            .take()
        else {
            return Ok(());
        };

        let span = spans::write_database(DATABASE_NAME);
        async {
            let database = self
                .engine
                .open_database(DATABASE_NAME, DATABASE_VERSION, |upgrade| {
                    upgrade.create_object_store(STORE_ENTRIES);
                })
                .await?;
            database
                .put(STORE_ENTRIES, &self.key, serde_json::to_value(&entry)?)
                .await?;
            database.commit().await?;
            debug!(key = %self.key, "wrote key-value entry");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::errors::FetchError;
    use crate::fetch::Fetcher;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Semaphore;
    use url::Url;

    struct ScriptedFetcher {
        value: Value,
        calls: AtomicU32,
        gate: Semaphore,
    }

    impl ScriptedFetcher {
        fn new(value: Value, permits: usize) -> Arc<Self> {
            Arc::new(Self {
                value,
                calls: AtomicU32::new(0),
                gate: Semaphore::new(permits),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.expect("gate closed");
            Ok(self.value.clone())
        }

        fn name(&self) -> &'static str {
            "ScriptedFetcher"
        }
    }

    fn request() -> InterceptedRequest {
        InterceptedRequest::new(
            "GET",
            Url::parse("https://example.org/api/describe?suite=rendering").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_miss_fetches_then_warm_hit_skips_fetch() {
        let fetcher = ScriptedFetcher::new(json!({"data": 42}), 100);
        let engine = CacheEngine::new(CacheConfig::default(), fetcher.clone());
        let host = HostLifetime::new();

        let first = KeyValueCacheRequest::new(Arc::clone(&engine), request());
        assert_eq!(first.respond(&host).await.unwrap(), json!({"data": 42}));
        assert_eq!(fetcher.calls(), 1);

        engine.task_queue().flush().await;
        host.settled().await;

        let second = KeyValueCacheRequest::new(Arc::clone(&engine), request());
        assert_eq!(second.respond(&host).await.unwrap(), json!({"data": 42}));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let fetcher = ScriptedFetcher::new(json!({"data": "fresh"}), 100);
        let engine = CacheEngine::new(CacheConfig::default(), fetcher.clone());
        let host = HostLifetime::new();

        let key = channel_name(&request().url, &[]);
        let database = engine
            .open_database(DATABASE_NAME, DATABASE_VERSION, |upgrade| {
                upgrade.create_object_store(STORE_ENTRIES);
            })
            .await
            .unwrap();
        database
            .put(
                STORE_ENTRIES,
                &key,
                serde_json::to_value(StoredEntry {
                    value: json!({"data": "stale"}),
                    expiration: Utc::now() - chrono::Duration::hours(1),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let req = KeyValueCacheRequest::new(Arc::clone(&engine), request());
        assert_eq!(req.respond(&host).await.unwrap(), json!({"data": "fresh"}));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_share_one_fetch() {
        let fetcher = ScriptedFetcher::new(json!({"data": 7}), 0);
        let config = crate::config::CacheConfigBuilder::with_defaults()
            .write_flush_delay(std::time::Duration::from_millis(10))
            .build();
        let engine = CacheEngine::new(config, fetcher.clone());

        let first = KeyValueCacheRequest::new(Arc::clone(&engine), request());
        let second = KeyValueCacheRequest::new(Arc::clone(&engine), request());

        let first_task = tokio::spawn(async move {
            let host = HostLifetime::new();
            let value = first.respond(&host).await;
            host.settled().await;
            value
        });
        let second_task = tokio::spawn(async move {
            let host = HostLifetime::new();
            let value = second.respond(&host).await;
            host.settled().await;
            value
        });
        tokio::task::yield_now().await;

        // Both requests are blocked in or behind one gated fetch
        fetcher.gate.add_permits(10);

        assert_eq!(first_task.await.unwrap().unwrap(), json!({"data": 7}));
        assert_eq!(second_task.await.unwrap().unwrap(), json!({"data": 7}));
        assert_eq!(fetcher.calls(), 1);
    }
}
