// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! In-memory storage bundle, used by tests and as a reference for the
//! semantics the traits require.

use crate::storage::{Appender, DedupStorage, IssuerStorage, SctDedupInfo, StorageError};
use futures_util::future::BoxFuture;
use static_ct_api::{DedupKey, LeafIndex, LogEntry, PendingLogEntry, UnixTimestamp};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Assigns sequential indices and keeps every sequenced entry around for
/// inspection.
#[derive(Default)]
pub struct MemoryAppender {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryAppender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything sequenced so far.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().await.clone()
    }
}

impl Appender for MemoryAppender {
    fn add(
        &self,
        entry: PendingLogEntry,
        timestamp: UnixTimestamp,
    ) -> BoxFuture<'_, Result<LeafIndex, StorageError>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let leaf_index = entries.len() as u64;
            entries.push(LogEntry {
                pending: entry,
                leaf_index,
                timestamp,
            });
            Ok(leaf_index)
        })
    }
}

#[derive(Default)]
pub struct MemoryIssuerStorage {
    blobs: Mutex<HashMap<[u8; 32], Vec<u8>>>,
}

impl MemoryIssuerStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IssuerStorage for MemoryIssuerStorage {
    fn exists(&self, fingerprint: [u8; 32]) -> BoxFuture<'_, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.blobs.lock().await.contains_key(&fingerprint)) })
    }

    fn put(&self, fingerprint: [u8; 32], der: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut blobs = self.blobs.lock().await;
            match blobs.get(&fingerprint) {
                Some(existing) if *existing != der => {
                    Err(StorageError::IssuerMismatch(hex::encode(fingerprint)))
                }
                Some(_) => Ok(()),
                None => {
                    blobs.insert(fingerprint, der);
                    Ok(())
                }
            }
        })
    }
}

#[derive(Default)]
pub struct MemoryDedupStorage {
    records: Mutex<HashMap<DedupKey, SctDedupInfo>>,
}

impl MemoryDedupStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStorage for MemoryDedupStorage {
    fn get(&self, key: DedupKey) -> BoxFuture<'_, Result<Option<SctDedupInfo>, StorageError>> {
        Box::pin(async move { Ok(self.records.lock().await.get(&key).copied()) })
    }

    fn put(&self, key: DedupKey, info: SctDedupInfo) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            match records.get(&key) {
                Some(existing) if *existing != info => Err(StorageError::DedupConflict),
                Some(_) => Ok(()),
                None => {
                    records.insert(key, info);
                    Ok(())
                }
            }
        })
    }
}
