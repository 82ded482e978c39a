// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Deduplication cache backed by an embedded SQLite database, durable
//! across restarts.

use crate::storage::{DedupStorage, SctDedupInfo, StorageError};
use futures_util::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use static_ct_api::DedupKey;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteDedupStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDedupStorage {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be initialized.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dedup (
                key        BLOB PRIMARY KEY,
                timestamp  INTEGER NOT NULL,
                leaf_index INTEGER NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl DedupStorage for SqliteDedupStorage {
    fn get(&self, key: DedupKey) -> BoxFuture<'_, Result<Option<SctDedupInfo>, StorageError>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            let info = conn
                .query_row(
                    "SELECT timestamp, leaf_index FROM dedup WHERE key = ?1",
                    params![key.as_slice()],
                    |row| {
                        Ok(SctDedupInfo {
                            timestamp: row.get(0)?,
                            index: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(info)
        })
    }

    fn put(&self, key: DedupKey, info: SctDedupInfo) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            // First writer wins; losers are detected by reading back.
            conn.execute(
                "INSERT OR IGNORE INTO dedup (key, timestamp, leaf_index) VALUES (?1, ?2, ?3)",
                params![key.as_slice(), info.timestamp, info.index],
            )?;
            let stored = conn.query_row(
                "SELECT timestamp, leaf_index FROM dedup WHERE key = ?1",
                params![key.as_slice()],
                |row| {
                    Ok(SctDedupInfo {
                        timestamp: row.get(0)?,
                        index: row.get(1)?,
                    })
                },
            )?;
            if stored != info {
                return Err(StorageError::DedupConflict);
            }
            Ok(())
        })
    }
}
