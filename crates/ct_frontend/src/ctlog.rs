// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The submission coordinator: the synchronous pipeline behind `add-chain`
//! and `add-pre-chain` that turns a submitted chain into a signed SCT.

use crate::storage::{Appender, CtStorage, DedupStorage, IssuerStorage, SctDedupInfo, StorageError};
use crate::time::TimeSource;
use anyhow::bail;
use p256::ecdsa::SigningKey as EcdsaSigningKey;
use static_ct_api::{
    signed_certificate_timestamp, AddChainResponse, ChainValidationOpts, LogEntry, StaticCTError,
};
use std::sync::Arc;
use tracing::{debug, warn};
use x509_util::CertPool;

/// An error from the submission pipeline.
///
/// Chain validation failures are final and carry a precise reason for the
/// submitter; everything else is an internal failure the client may retry.
#[derive(thiserror::Error, Debug)]
pub enum AddEntryError {
    #[error("{0}")]
    InvalidChain(#[from] StaticCTError),
    #[error("failed to read deduplication cache: {0}")]
    DedupRead(StorageError),
    #[error("failed to persist issuers: {0}")]
    IssuerPersist(StorageError),
    #[error("failed to append entry to log: {0}")]
    Append(StorageError),
    #[error("failed to sign SCT: {0}")]
    Sign(StaticCTError),
}

impl AddEntryError {
    /// Whether this error is the submitter's fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AddEntryError::InvalidChain(_))
    }
}

/// A running log instance: the trust pool, validation policy, signing key,
/// and storage handles, all created at process start and shared read-only
/// between requests.
pub struct Log<A, I, D> {
    origin: String,
    signing_key: EcdsaSigningKey,
    validation_opts: ChainValidationOpts,
    roots: CertPool,
    storage: CtStorage<A, I, D>,
    time_source: Arc<dyn TimeSource>,
}

impl<A: Appender, I: IssuerStorage, D: DedupStorage> Log<A, I, D> {
    /// Creates a new log instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is empty or the trust pool contains no
    /// certificates.
    pub fn new(
        origin: String,
        signing_key: EcdsaSigningKey,
        validation_opts: ChainValidationOpts,
        roots: CertPool,
        storage: CtStorage<A, I, D>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, anyhow::Error> {
        if origin.is_empty() {
            bail!("empty origin");
        }
        if roots.is_empty() {
            bail!("trust pool is empty");
        }
        Ok(Self {
            origin,
            signing_key,
            validation_opts,
            roots,
            storage,
            time_source,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn roots(&self) -> &CertPool {
        &self.roots
    }

    pub fn storage(&self) -> &CtStorage<A, I, D> {
        &self.storage
    }

    /// Handles a submission to `add-chain` (`expect_precert == false`) or
    /// `add-pre-chain` (`expect_precert == true`): validate the chain,
    /// deduplicate, persist issuers, sequence the entry, and sign the SCT.
    ///
    /// Deduplicated resubmissions are answered with an SCT over the original
    /// `(timestamp, index)` assignment; deterministic ECDSA makes those
    /// bytes identical to the first response.
    ///
    /// # Errors
    ///
    /// Returns an [`AddEntryError`] naming the first step that failed.
    pub async fn add_chain_or_pre_chain(
        &self,
        raw_chain: &[Vec<u8>],
        expect_precert: bool,
    ) -> Result<AddChainResponse, AddEntryError> {
        let validated = static_ct_api::validate_chain(
            raw_chain,
            &self.roots,
            &self.validation_opts,
            self.time_source.now_unix_millis(),
            expect_precert,
        )?;

        let key = validated.entry.dedup_key();
        if let Some(info) = self
            .storage
            .get_cert_dedup_info(key)
            .await
            .map_err(AddEntryError::DedupRead)?
        {
            debug!(origin = %self.origin, index = info.index, "entry already sequenced");
            let entry = LogEntry {
                pending: validated.entry,
                leaf_index: info.index,
                timestamp: info.timestamp,
            };
            return signed_certificate_timestamp(&self.signing_key, &entry)
                .map_err(AddEntryError::Sign);
        }

        let timestamp = self.time_source.now_unix_millis();

        self.storage
            .add_issuer_chain(&validated.issuers)
            .await
            .map_err(AddEntryError::IssuerPersist)?;

        let leaf_index = self
            .storage
            .add(validated.entry.clone(), timestamp)
            .await
            .map_err(AddEntryError::Append)?;

        // The entry is durably logged at this point. Failing to record the
        // dedup assignment only means a resubmission gets sequenced anew, so
        // the current response is still served.
        if let Err(e) = self
            .storage
            .add_cert_dedup_info(
                key,
                SctDedupInfo {
                    timestamp,
                    index: leaf_index,
                },
            )
            .await
        {
            warn!(origin = %self.origin, "failed to write entry to deduplication cache: {e}");
        }

        let entry = LogEntry {
            pending: validated.entry,
            leaf_index,
            timestamp,
        };
        signed_certificate_timestamp(&self.signing_key, &entry).map_err(AddEntryError::Sign)
    }
}
