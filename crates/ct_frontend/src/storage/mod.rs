// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Storage capabilities consumed by the submission front-end: the appender
//! that sequences entries into the log, the content-addressed issuer store,
//! and the deduplication cache, plus the bundle tying them together.

pub mod mem;
pub mod posix;
pub mod sqlite;

use futures_util::future::{try_join_all, BoxFuture};
use sha2::{Digest, Sha256};
use static_ct_api::{DedupKey, LeafIndex, PendingLogEntry, UnixTimestamp};
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("conflicting deduplication record")]
    DedupConflict,
    #[error("existing issuer blob does not match {0}")]
    IssuerMismatch(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// The `(timestamp, index)` pair assigned to an entry, recorded so that
/// resubmissions of the same leaf are answered with the original SCT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SctDedupInfo {
    pub timestamp: UnixTimestamp,
    pub index: LeafIndex,
}

/// Sequences entries into the append-only log. The returned future resolves
/// with the assigned index only once the entry is durably stored.
pub trait Appender: Send + Sync {
    fn add(
        &self,
        entry: PendingLogEntry,
        timestamp: UnixTimestamp,
    ) -> BoxFuture<'_, Result<LeafIndex, StorageError>>;
}

/// Write-once storage for issuer certificates, keyed by the SHA-256 hash of
/// their DER encoding.
pub trait IssuerStorage: Send + Sync {
    fn exists(&self, fingerprint: [u8; 32]) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Stores an issuer blob. Writing identical bytes under an existing key
    /// is a no-op; differing bytes under the same key is an error.
    fn put(&self, fingerprint: [u8; 32], der: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// The deduplication cache. Durable across restarts and safe under
/// concurrent readers and writers.
pub trait DedupStorage: Send + Sync {
    fn get(&self, key: DedupKey) -> BoxFuture<'_, Result<Option<SctDedupInfo>, StorageError>>;

    /// Records the assignment for a key. The first writer wins: re-putting
    /// the value already stored succeeds, while a differing value is
    /// reported as [`StorageError::DedupConflict`] and leaves the stored
    /// record untouched.
    fn put(&self, key: DedupKey, info: SctDedupInfo) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// The bundle of storage capabilities the coordinator works against.
pub struct CtStorage<A, I, D> {
    pub appender: A,
    pub issuers: I,
    pub dedup: D,
}

impl<A: Appender, I: IssuerStorage, D: DedupStorage> CtStorage<A, I, D> {
    /// Sequences an entry, resolving once it is durable.
    pub async fn add(
        &self,
        entry: PendingLogEntry,
        timestamp: UnixTimestamp,
    ) -> Result<LeafIndex, StorageError> {
        self.appender.add(entry, timestamp).await
    }

    /// Stores any newly-observed issuers, content-addressed by the SHA-256
    /// hash of their DER encoding.
    pub async fn add_issuer_chain(&self, issuers: &[Vec<u8>]) -> Result<(), StorageError> {
        let futures: Vec<_> = issuers
            .iter()
            .map(|der| async move {
                let fingerprint: [u8; 32] = Sha256::digest(der).into();
                if self.issuers.exists(fingerprint).await? {
                    Ok::<_, StorageError>(None)
                } else {
                    self.issuers.put(fingerprint, der.clone()).await?;
                    Ok(Some(fingerprint))
                }
            })
            .collect();

        for fingerprint in try_join_all(futures).await?.into_iter().flatten() {
            info!("observed new issuer; fingerprint={}", hex::encode(fingerprint));
        }

        Ok(())
    }

    pub async fn add_cert_dedup_info(
        &self,
        key: DedupKey,
        info: SctDedupInfo,
    ) -> Result<(), StorageError> {
        self.dedup.put(key, info).await
    }

    pub async fn get_cert_dedup_info(
        &self,
        key: DedupKey,
    ) -> Result<Option<SctDedupInfo>, StorageError> {
        self.dedup.get(key).await
    }
}
