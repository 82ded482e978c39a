// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Types and algorithms for the submission side of a
//! [Static CT API](https://c2sp.org/static-ct-api) log: chain validation
//! against a policy, precertificate canonicalization, log entry and SCT
//! construction, and checkpoint signing.

pub mod rfc6962;
pub mod static_ct;

pub use rfc6962::*;
pub use static_ct::*;

#[derive(thiserror::Error, Debug)]
pub enum StaticCTError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error(transparent)]
    Spki(#[from] x509_verify::spki::Error),
    #[error(transparent)]
    Signature(#[from] p256::ecdsa::signature::Error),
    #[error(transparent)]
    Validation(#[from] x509_util::ValidationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unknown extended key usage: {0}")]
    UnknownExtKeyUsage(String),
    #[error("malformed object identifier: {0}")]
    MalformedOid(String),
    #[error("mismatching signature algorithm between certificate and TBS")]
    MismatchingSigAlg,
    #[error("CT poison extension is not critical or invalid")]
    InvalidCTPoison,
    #[error("precertificate submitted to add-chain")]
    UnexpectedPrecert,
    #[error("final certificate submitted to add-pre-chain")]
    NotAPrecert,
    #[error("missing precertificate issuer")]
    MissingPrecertIssuer,
    #[error("precertificate signing certificate is missing its issuer")]
    MissingPrecertSigningCertificateIssuer,
    #[error("leaf certificate is expired")]
    CertExpired,
    #[error("leaf certificate is not yet expired")]
    CertNotExpired,
    #[error("leaf NotAfter is outside the log's acceptance window")]
    NotAfterOutOfRange,
    #[error("leaf certificate is missing a required extended key usage")]
    MissingRequiredEku,
    #[error("leaf certificate carries rejected extension {0}")]
    RejectedExtension(der::oid::ObjectIdentifier),
    #[error("invalid leaf certificate")]
    InvalidLeaf,
    #[error("invalid signer name")]
    InvalidSignerName,
    #[error("invalid extension length")]
    InvalidLength,
    #[error("trailing data")]
    TrailingData,
    #[error("missing leaf_index extension")]
    MissingLeafIndex,
}
