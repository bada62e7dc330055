// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Embedded object-store boundary.
//!
//! A [`Database`] holds named object stores (ordered string keys mapping to
//! JSON values), runs a versioned schema-upgrade callback when opened, and
//! supports `get`/`put`/range-cursor/`clear` plus an explicit [`commit`]
//! as the transaction-completion signal. Databases are pooled by the engine
//! so there is at most one open handle per logical name; correctness under
//! concurrent readers relies on the append-only, per-key upsert discipline
//! of the writers rather than extra locking.
//!
//! [`commit`]: Database::commit

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::StoreError;
use crate::range::Revision;

mod disk;

pub use disk::DiskBacking;

/// Ordered key → JSON value map backing one named object store.
pub type ObjectStoreData = BTreeMap<String, Value>;

/// Serializable contents of a whole database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseData {
    /// Schema version the contents were written with
    pub version: u32,
    /// Named object stores
    pub stores: HashMap<String, ObjectStoreData>,
}

/// Handle passed to the schema-upgrade callback when a database is opened
/// at a newer version than its stored contents.
pub struct DatabaseUpgrade<'a> {
    /// Version of the stored contents (0 for a fresh database)
    pub old_version: u32,
    /// Version being opened
    pub new_version: u32,
    data: &'a mut DatabaseData,
}

impl DatabaseUpgrade<'_> {
    /// Create a named object store. No-op if it already exists.
    pub fn create_object_store(&mut self, name: &str) {
        self.data.stores.entry(name.to_string()).or_default();
    }
}

/// Fixed-width key encoding for revisions so lexicographic store order
/// matches numeric order.
pub fn revision_key(revision: Revision) -> String {
    format!("{revision:020}")
}

/// One pooled, possibly disk-backed database of named object stores.
pub struct Database {
    name: String,
    version: u32,
    data: RwLock<DatabaseData>,
    backing: Option<DiskBacking>,
}

impl Database {
    /// Open a database, loading any disk-backed contents and running the
    /// upgrade callback exactly once if the stored version is older than
    /// `version`.
    pub(crate) async fn open<F>(
        name: &str,
        version: u32,
        backing: Option<DiskBacking>,
        upgrade: F,
    ) -> Result<Arc<Self>, StoreError>
    where
        F: FnOnce(&mut DatabaseUpgrade<'_>),
    {
        let mut data = match &backing {
            Some(disk) => disk.load().await?,
            None => DatabaseData::default(),
        };

        if data.version != version {
            let old_version = data.version;
            if old_version > version {
                // Downgrade: stored contents are unusable, start fresh
                tracing::warn!(
                    database = name,
                    stored_version = old_version,
                    requested_version = version,
                    "database version is newer than requested, discarding contents"
                );
                data = DatabaseData::default();
            }
            let mut handle = DatabaseUpgrade {
                old_version,
                new_version: version,
                data: &mut data,
            };
            upgrade(&mut handle);
            data.version = version;
            debug!(database = name, from = old_version, to = version, "upgraded database schema");
        }

        Ok(Arc::new(Self {
            name: name.to_string(),
            version,
            data: RwLock::new(data),
            backing,
        }))
    }

    /// Logical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version this handle was opened at.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Read one value by key.
    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let data = self.data.read().await;
        let store = data
            .stores
            .get(store)
            .ok_or_else(|| StoreError::missing_object_store(store))?;
        Ok(store.get(key).cloned())
    }

    /// Write one value by key, overwriting any existing entry.
    pub async fn put(&self, store: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let store = data
            .stores
            .get_mut(store)
            .ok_or_else(|| StoreError::missing_object_store(store))?;
        store.insert(key.to_string(), value);
        Ok(())
    }

    /// Cursor over all entries with `min_key <= key <= max_key`, in key
    /// order.
    pub async fn get_range(
        &self,
        store: &str,
        min_key: &str,
        max_key: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let data = self.data.read().await;
        let store = data
            .stores
            .get(store)
            .ok_or_else(|| StoreError::missing_object_store(store))?;
        Ok(store
            .range::<str, _>((Bound::Included(min_key), Bound::Included(max_key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// All entries of one object store, in key order.
    pub async fn get_all(&self, store: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let data = self.data.read().await;
        let store = data
            .stores
            .get(store)
            .ok_or_else(|| StoreError::missing_object_store(store))?;
        Ok(store
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Remove every entry from one object store.
    pub async fn clear(&self, store: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let store_data = data
            .stores
            .get_mut(store)
            .ok_or_else(|| StoreError::missing_object_store(store))?;
        store_data.clear();
        Ok(())
    }

    /// Transaction-completion signal: persist the current contents to the
    /// disk backing, if any.
    pub async fn commit(&self) -> Result<(), StoreError> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let snapshot = self.data.read().await.clone();
        backing.save(&snapshot).await
    }
}
