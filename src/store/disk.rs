// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Disk backing for databases: versioned JSON with file locking and atomic
//! writes.

use std::fs::File;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DatabaseData;
use crate::errors::StoreError;

/// Current on-disk format version
const FORMAT_VERSION: u32 = 1;

/// Serialized file layout (versioned independently of the database schema)
#[derive(Debug, Serialize, Deserialize)]
struct DiskEnvelope {
    format_version: u32,
    database: DatabaseData,
}

/// JSON file persistence for one database.
///
/// Uses advisory file locking so multiple processes can share a cache
/// directory, and writes atomically via a temp file rename. Unreadable or
/// version-mismatched files degrade to an empty database rather than
/// failing the open.
#[derive(Debug)]
pub struct DiskBacking {
    path: PathBuf,
}

impl DiskBacking {
    /// Create a backing at the specified path. Path validation is not
    /// performed until [`validate`](Self::validate) or the first I/O.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Check the path and create the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or is not
    /// writable.
    pub fn validate(self) -> Result<Self, StoreError> {
        let parent = self.path.parent().ok_or_else(|| {
            StoreError::io_error(
                format!("cache path '{}' has no parent directory", self.path.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
            )
        })?;

        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::io_error(
                    format!("failed to create cache directory '{}'", parent.display()),
                    e,
                )
            })?;
            debug!(path = %parent.display(), "created cache directory");
        }

        let test_file = parent.join(".cache_write_test");
        std::fs::write(&test_file, b"test").map_err(|e| {
            StoreError::io_error(
                format!("cache directory '{}' is not writable", parent.display()),
                e,
            )
        })?;
        let _ = std::fs::remove_file(&test_file);

        Ok(self)
    }

    /// Load database contents with a shared file lock.
    ///
    /// A missing file, an unparseable file, and a format-version mismatch
    /// all yield an empty database; only I/O failures are errors.
    pub(crate) async fn load(&self) -> Result<DatabaseData, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "database file does not exist, using empty database");
            return Ok(DatabaseData::default());
        }

        let file = File::open(&self.path).map_err(|e| {
            StoreError::io_error(
                format!("failed to open database file '{}'", self.path.display()),
                e,
            )
        })?;

        file.lock_shared().map_err(|e| {
            StoreError::io_error(
                format!(
                    "failed to acquire read lock on database file '{}'",
                    self.path.display()
                ),
                e,
            )
        })?;

        let envelope: DiskEnvelope = match serde_json::from_reader(&file) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to parse database file, using empty database"
                );
                return Ok(DatabaseData::default());
            }
        };
        drop(file);

        if envelope.format_version != FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                stored_format = envelope.format_version,
                current_format = FORMAT_VERSION,
                "database format mismatch, ignoring stored contents"
            );
            return Ok(DatabaseData::default());
        }

        debug!(
            path = %self.path.display(),
            stores = envelope.database.stores.len(),
            "loaded database file"
        );
        Ok(envelope.database)
    }

    /// Save database contents with an exclusive lock and an atomic rename.
    pub(crate) async fn save(&self, data: &DatabaseData) -> Result<(), StoreError> {
        let envelope = DiskEnvelope {
            format_version: FORMAT_VERSION,
            database: data.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::io_error(
                        format!("failed to create cache directory '{}'", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await.map_err(|e| {
            StoreError::io_error(
                format!("failed to write database to '{}'", temp_path.display()),
                e,
            )
        })?;

        let file = File::open(&temp_path).map_err(|e| {
            StoreError::io_error(
                format!("failed to open temp database file '{}'", temp_path.display()),
                e,
            )
        })?;
        file.lock().map_err(|e| {
            StoreError::io_error(
                format!(
                    "failed to acquire write lock on database file '{}'",
                    temp_path.display()
                ),
                e,
            )
        })?;

        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            StoreError::io_error(
                format!(
                    "failed to rename database file from '{}' to '{}'",
                    temp_path.display(),
                    self.path.display()
                ),
                e,
            )
        })?;
        drop(file);

        debug!(path = %self.path.display(), "saved database file");
        Ok(())
    }
}
