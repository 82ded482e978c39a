// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Utilities for X.509 operations: a certificate pool for trust anchors and
//! signature-chain verification from a submitted leaf up to a trusted root.

use der::{Decode, Encode, Error as DerError};
use sha2::{Digest, Sha256};
use std::collections::{hash_map::Entry, HashMap};
use x509_cert::{
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
    },
    Certificate,
};
use x509_verify::VerifyingKey;

/// Converts a slice of certificates into an array of DER-encoded certificates.
///
/// # Errors
///
/// Returns an error if any of the certificates cannot be DER-encoded.
pub fn certs_to_bytes(certs: &[Certificate]) -> Result<Vec<Vec<u8>>, DerError> {
    certs
        .iter()
        .map(der::Encode::to_der)
        .collect::<Result<_, _>>()
}

/// A `CertPool` is a set of trust anchor certificates.
///
/// It is immutable once construction finishes, and indexed so that candidate
/// issuers for a certificate can be found by authority key identifier or by
/// issuer name.
#[derive(Default)]
pub struct CertPool {
    // Map from SHA-256 fingerprint to index in `certs`.
    by_fingerprint: HashMap<[u8; 32], usize>,
    // Map from subject name to list of indexes of certs with that name.
    by_subject: HashMap<String, Vec<usize>>,
    // Map from SKI to list of indexes of certs with that SKI.
    by_subject_key_id: HashMap<Vec<u8>, Vec<usize>>,
    certs: Vec<Certificate>,
}

impl CertPool {
    /// Constructs a `CertPool` from the given certificates, weeding out
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificates or
    /// their extensions.
    pub fn new(certs: Vec<Certificate>) -> Result<Self, DerError> {
        let mut pool = Self::default();
        for cert in certs {
            pool.add_cert(cert)?;
        }
        Ok(pool)
    }

    /// The certificates in the pool, in insertion order.
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Search the pool for potential issuers of the provided certificate,
    /// preferring an authority-key-identifier match over a name match.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate
    /// extensions.
    pub fn find_potential_parents(&self, cert: &Certificate) -> Result<&[usize], DerError> {
        if let Some((_, aki)) = cert.tbs_certificate.get::<AuthorityKeyIdentifier>()? {
            if let Some(indexes) = aki
                .key_identifier
                .and_then(|key_id| self.by_subject_key_id.get(key_id.as_bytes()))
            {
                return Ok(indexes);
            }
        }
        if let Some(indexes) = self.by_subject.get(&cert.tbs_certificate.issuer.to_string()) {
            return Ok(indexes);
        }
        Ok(&[])
    }

    /// Add a certificate to the pool if it is not already included.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate or
    /// parsing its extensions.
    pub fn add_cert(&mut self, cert: Certificate) -> Result<(), DerError> {
        let fingerprint: [u8; 32] = Sha256::digest(cert.to_der()?).into();
        if let Entry::Vacant(e) = self.by_fingerprint.entry(fingerprint) {
            let idx = self.certs.len();
            e.insert(idx);
            self.by_subject
                .entry(cert.tbs_certificate.subject.to_string())
                .or_default()
                .push(idx);
            if let Some((_, ski)) = cert.tbs_certificate.get::<SubjectKeyIdentifier>()? {
                self.by_subject_key_id
                    .entry(ski.0.as_bytes().to_vec())
                    .or_default()
                    .push(idx);
            }
            self.certs.push(cert);
        }

        Ok(())
    }

    /// Add certs to the pool from a byte slice assumed to contain PEM encoded
    /// data.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be parsed as a PEM certificate
    /// chain or if there are DER encoding issues.
    pub fn append_certs_from_pem(&mut self, input: &[u8]) -> Result<(), DerError> {
        for cert in Certificate::load_pem_chain(input)? {
            self.add_cert(cert)?;
        }
        Ok(())
    }

    /// Check if the pool includes the given certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate.
    pub fn contains(&self, cert: &Certificate) -> Result<bool, DerError> {
        Ok(self
            .by_fingerprint
            .contains_key::<[u8; 32]>(&Sha256::digest(cert.to_der()?).into()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error("empty chain")]
    EmptyChain,
    #[error("invalid signature link in chain")]
    InvalidLinkInChain,
    #[error("intermediate missing CA basic constraint")]
    IntermediateMissingCaBasicConstraint,
    #[error("intermediate missing keyCertSign key usage")]
    IntermediateMissingKeyCertSign,
    #[error("path length constraint exceeded")]
    PathLenConstraintExceeded,
    #[error("issuer not in root store: {issuer}")]
    NoPathToTrustedRoot { issuer: String },
}

/// A certificate chain ordered from the leaf up to and including a trust
/// anchor, with each element's DER encoding alongside.
pub struct VerifiedChain {
    certs: Vec<Certificate>,
    der: Vec<Vec<u8>>,
}

impl VerifiedChain {
    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    /// All certificates above the leaf, i.e. the leaf's issuer up to and
    /// including the root.
    pub fn issuers(&self) -> &[Certificate] {
        &self.certs[1..]
    }

    /// DER encodings of everything above the leaf.
    pub fn issuers_der(&self) -> &[Vec<u8>] {
        &self.der[1..]
    }

    /// SHA-256 fingerprints of everything above the leaf, in order.
    pub fn issuer_fingerprints(&self) -> Vec<[u8; 32]> {
        self.der[1..]
            .iter()
            .map(|der| Sha256::digest(der).into())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Verifies that the submitted chain forms a signature path from the leaf to
/// a certificate in `roots`, appending the root when the submitter left it
/// out. This deliberately stops short of full RFC 5280 path validation; its
/// purpose is to reject chains that do not lead back to a trust anchor or
/// that contain certificates unfit to act as a CA.
///
/// Every certificate above the leaf must carry the CA basic constraint,
/// satisfy its path length constraint, and, when a key usage extension is
/// present, include `keyCertSign`.
///
/// # Errors
///
/// Returns a `ValidationError` if any certificate fails to parse or the
/// chain fails to verify.
pub fn verify_chain(
    raw_chain: &[Vec<u8>],
    roots: &CertPool,
) -> Result<VerifiedChain, ValidationError> {
    if raw_chain.is_empty() {
        return Err(ValidationError::EmptyChain);
    }

    let mut certs = raw_chain
        .iter()
        .map(|bytes| Certificate::from_der(bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let mut der: Vec<Vec<u8>> = raw_chain.to_vec();

    // Walk up the submitted chain, ensuring that each certificate signs the
    // previous one. This simplified validation is possible due to the
    // constraints laid out in RFC 6962: the submitter provides the exact
    // intermediates making up the path.
    for pos in 1..certs.len() {
        if !is_link_valid(&certs[pos - 1], &certs[pos]) {
            return Err(ValidationError::InvalidLinkInChain);
        }
        check_ca_constraints(&certs[pos], pos - 1)?;
    }

    // The chain tip is either a trust anchor itself or must be signed by one.
    let tip = certs.last().ok_or(ValidationError::EmptyChain)?;
    if !roots.contains(tip)? {
        let Some(&found_idx) = roots
            .find_potential_parents(tip)?
            .iter()
            .find(|&&idx| is_link_valid(tip, &roots.certs[idx]))
        else {
            return Err(ValidationError::NoPathToTrustedRoot {
                issuer: tip.tbs_certificate.issuer.to_string(),
            });
        };
        let root = roots.certs[found_idx].clone();
        der.push(root.to_der()?);
        certs.push(root);
    }

    Ok(VerifiedChain { certs, der })
}

// Checks that a certificate is fit to act as a CA in a path that places
// `below` intermediates beneath it.
fn check_ca_constraints(cert: &Certificate, below: usize) -> Result<(), ValidationError> {
    let Some((_, bc)) = cert.tbs_certificate.get::<BasicConstraints>()? else {
        return Err(ValidationError::IntermediateMissingCaBasicConstraint);
    };
    if !bc.ca {
        return Err(ValidationError::IntermediateMissingCaBasicConstraint);
    }
    if bc
        .path_len_constraint
        .is_some_and(|limit| below > limit as usize)
    {
        return Err(ValidationError::PathLenConstraintExceeded);
    }
    if let Some((_, ku)) = cert.tbs_certificate.get::<KeyUsage>()? {
        if !ku.0.contains(KeyUsages::KeyCertSign) {
            return Err(ValidationError::IntermediateMissingKeyCertSign);
        }
    }
    Ok(())
}

/// Returns whether or not the given link in the chain is valid.
/// [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962#section-3.1) says:
/// ```text
/// Logs MUST verify that the submitted end-entity certificate or
/// Precertificate has a valid signature chain leading back to a trusted
/// root CA certificate, using the chain of intermediate CA certificates
/// provided by the submitter.
/// ```
fn is_link_valid(child: &Certificate, issuer: &Certificate) -> bool {
    if let Ok(key) = VerifyingKey::try_from(issuer) {
        key.verify_strict(child).is_ok()
    } else {
        false
    }
}
