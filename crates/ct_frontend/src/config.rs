// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Log configuration, loaded from a JSON file at startup. Configuration
//! errors are fatal.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use p256::{ecdsa::SigningKey as EcdsaSigningKey, pkcs8::DecodePrivateKey};
use serde::Deserialize;
use static_ct_api::{parse_ext_key_usages, parse_oids, ChainValidationOpts, UnixTimestamp};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use x509_util::CertPool;

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    /// Log identifier, used in SCTs and checkpoints and as the path prefix
    /// of the submission endpoints.
    pub origin: String,
    /// Path to the PEM file of acceptable root certificates, served through
    /// the get-roots endpoint.
    pub roots_pem_file: PathBuf,
    /// Reject leaves whose validity period has already ended.
    #[serde(default)]
    pub reject_expired: bool,
    /// Reject leaves that are currently valid or not yet valid.
    #[serde(default)]
    pub reject_unexpired: bool,
    /// Inclusive lower bound on acceptable leaf NotAfter values.
    #[serde(default)]
    pub not_after_start: Option<DateTime<Utc>>,
    /// Exclusive upper bound on acceptable leaf NotAfter values.
    #[serde(default)]
    pub not_after_limit: Option<DateTime<Utc>>,
    /// Comma-separated extended key usage names of which submitted leaves
    /// must carry at least one. `Any` disables the check.
    #[serde(default)]
    pub ext_key_usages: String,
    /// Comma-separated OIDs, in dotted form, that submitted leaves must not
    /// carry.
    #[serde(default)]
    pub reject_extensions: String,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_http_deadline_ms")]
    pub http_deadline_ms: u64,
    /// Collapse 5xx response bodies to a generic string.
    #[serde(default)]
    pub mask_internal_errors: bool,
    /// Bind address for the HTTP server.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory holding the log entries, issuer blobs, and the
    /// deduplication database.
    pub storage_dir: PathBuf,
}

fn default_http_deadline_ms() -> u64 {
    3000
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl AppConfig {
    /// Loads and validates the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, not valid JSON, or fails
    /// validation.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw).context("failed to parse config")?;
        if config.origin.is_empty() {
            bail!("empty origin");
        }
        Ok(config)
    }

    /// Loads the trust anchors named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM file is missing, unreadable, or contains
    /// no certificates.
    pub fn load_roots(&self) -> anyhow::Result<CertPool> {
        let pem = fs::read(&self.roots_pem_file).with_context(|| {
            format!(
                "failed to read trusted roots from {}",
                self.roots_pem_file.display()
            )
        })?;
        let mut pool = CertPool::default();
        pool.append_certs_from_pem(&pem)
            .map_err(|e| anyhow::anyhow!("failed to parse trusted roots: {e}"))?;
        if pool.is_empty() {
            bail!(
                "no certificates found in {}",
                self.roots_pem_file.display()
            );
        }
        Ok(pool)
    }

    /// Builds the chain validation policy from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error on contradictory expiry flags, a misordered
    /// NotAfter window, unknown extended key usage names, or malformed
    /// OIDs.
    pub fn validation_opts(&self) -> anyhow::Result<ChainValidationOpts> {
        if self.reject_expired && self.reject_unexpired {
            bail!("configuration would reject all certificates");
        }

        let not_after_start = self.not_after_start.map(datetime_to_millis);
        let not_after_limit = self.not_after_limit.map(datetime_to_millis);
        if let (Some(start), Some(limit)) = (not_after_start, not_after_limit) {
            if limit <= start {
                bail!("'Not After' limit is not after its start");
            }
        }

        let ext_key_usages = parse_ext_key_usages(&self.ext_key_usages)
            .context("failed to parse ext_key_usages")?;
        let reject_ext_ids =
            parse_oids(&self.reject_extensions).context("failed to parse reject_extensions")?;

        Ok(ChainValidationOpts {
            reject_expired: self.reject_expired,
            reject_unexpired: self.reject_unexpired,
            not_after_start,
            not_after_limit,
            ext_key_usages,
            reject_ext_ids,
        })
    }

    pub fn http_deadline(&self) -> Duration {
        Duration::from_millis(self.http_deadline_ms)
    }
}

// Timestamps before the Unix epoch are treated as the Unix epoch.
fn datetime_to_millis(dt: DateTime<Utc>) -> UnixTimestamp {
    u64::try_from(dt.timestamp_millis()).unwrap_or_default()
}

/// Loads the log's ECDSA P-256 signing key from a PKCS#8 PEM file. Any
/// other key type fails.
///
/// # Errors
///
/// Returns an error if the file is unreadable or does not contain an ECDSA
/// P-256 private key.
pub fn load_signing_key(path: &Path) -> anyhow::Result<EcdsaSigningKey> {
    let pem = fs::read_to_string(path)
        .with_context(|| format!("failed to read signing key from {}", path.display()))?;
    EcdsaSigningKey::from_pkcs8_pem(&pem)
        .map_err(|e| anyhow::anyhow!("unsupported signing key, expected ECDSA P-256 PKCS#8: {e}"))
}
