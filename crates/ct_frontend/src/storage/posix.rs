// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! POSIX filesystem storage bundle. Entries are persisted in the static-ct
//! tile-leaf encoding alongside their Merkle record hashes, and a freshly
//! signed checkpoint is published after every append. Suitable for
//! development deployments and tests; a single process must own the
//! directory.

use crate::storage::{Appender, IssuerStorage, StorageError};
use crate::time::TimeSource;
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use static_ct_api::{CheckpointSigner, LeafIndex, LogEntry, PendingLogEntry, UnixTimestamp};
use std::fs;
use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const LEAVES_FILE: &str = "leaves.bin";
const HASHES_FILE: &str = "hashes.bin";
const CHECKPOINT_FILE: &str = "checkpoint";

/// Appends entries to flat files under a directory, maintaining the Merkle
/// record hashes needed to publish a signed checkpoint for every new size.
pub struct PosixAppender {
    dir: PathBuf,
    signer: CheckpointSigner,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<AppenderState>,
}

struct AppenderState {
    record_hashes: Vec<[u8; 32]>,
}

impl PosixAppender {
    /// Opens (or creates) the log directory, recovering the tree from the
    /// persisted record hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or its contents
    /// are corrupt.
    pub fn open(
        dir: PathBuf,
        signer: CheckpointSigner,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir)?;

        let hashes_path = dir.join(HASHES_FILE);
        let record_hashes = if hashes_path.exists() {
            let raw = fs::read(&hashes_path)?;
            if raw.len() % 32 != 0 {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("truncated hash file: {}", hashes_path.display()),
                )
                .into());
            }
            raw.chunks_exact(32)
                .map(|chunk| {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            dir,
            signer,
            time_source,
            state: Mutex::new(AppenderState { record_hashes }),
        })
    }

    /// The number of entries in the log.
    pub async fn size(&self) -> u64 {
        self.state.lock().await.record_hashes.len() as u64
    }

    fn append_file(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }
}

impl Appender for PosixAppender {
    fn add(
        &self,
        entry: PendingLogEntry,
        timestamp: UnixTimestamp,
    ) -> BoxFuture<'_, Result<LeafIndex, StorageError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let leaf_index = state.record_hashes.len() as u64;
            let log_entry = LogEntry {
                pending: entry,
                leaf_index,
                timestamp,
            };

            let record = record_hash(&log_entry.merkle_tree_leaf());
            self.append_file(LEAVES_FILE, &log_entry.tile_leaf())?;
            self.append_file(HASHES_FILE, &record)?;
            state.record_hashes.push(record);

            let root = subtree_hash(&state.record_hashes);
            let note = self.signer.sign_checkpoint(
                state.record_hashes.len() as u64,
                &root,
                self.time_source.now_unix_millis(),
            );
            fs::write(self.dir.join(CHECKPOINT_FILE), note)?;

            Ok(leaf_index)
        })
    }
}

// RFC 6962 leaf hash: SHA-256(0x00 || leaf).
fn record_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0u8]);
    hasher.update(data);
    hasher.finalize().into()
}

// RFC 6962 tree hash over the record hashes, splitting at the largest power
// of two smaller than the subtree size.
fn subtree_hash(hashes: &[[u8; 32]]) -> [u8; 32] {
    match hashes.len() {
        0 => Sha256::digest([]).into(),
        1 => hashes[0],
        n => {
            let mut split = 1;
            while split * 2 < n {
                split *= 2;
            }
            let mut hasher = Sha256::new();
            hasher.update([1u8]);
            hasher.update(subtree_hash(&hashes[..split]));
            hasher.update(subtree_hash(&hashes[split..]));
            hasher.finalize().into()
        }
    }
}

/// Issuer blobs stored as `issuer/<hex-fingerprint>` files, matching the
/// layout read-side servers expose them under.
pub struct PosixIssuerStorage {
    dir: PathBuf,
}

impl PosixIssuerStorage {
    /// Creates the `issuer/` directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(dir.join("issuer"))?;
        Ok(Self { dir })
    }

    fn blob_path(&self, fingerprint: &[u8; 32]) -> PathBuf {
        self.dir.join("issuer").join(hex::encode(fingerprint))
    }
}

impl IssuerStorage for PosixIssuerStorage {
    fn exists(&self, fingerprint: [u8; 32]) -> BoxFuture<'_, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.blob_path(&fingerprint).exists()) })
    }

    fn put(&self, fingerprint: [u8; 32], der: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let path = self.blob_path(&fingerprint);
            if path.exists() {
                if fs::read(&path)? != der {
                    return Err(StorageError::IssuerMismatch(hex::encode(fingerprint)));
                }
                return Ok(());
            }
            // Write-then-rename so concurrent writers of the same blob can
            // only ever land identical bytes at the final path.
            let tmp = self.dir.join("issuer").join(format!(
                ".tmp-{}-{}",
                std::process::id(),
                hex::encode(fingerprint)
            ));
            fs::write(&tmp, &der)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })
    }
}
