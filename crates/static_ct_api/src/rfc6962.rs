// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Parsing and validation of submitted certificate chains based on the
//! requirements of [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962)
//! and the configured acceptance policy, including canonicalization of
//! precertificates into the form that is logged.

use crate::{PendingLogEntry, PrecertData, StaticCTError, UnixTimestamp};
use der::{
    asn1::{Null, OctetString},
    oid::{
        db::rfc5280::{
            ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_KP_CLIENT_AUTH, ID_KP_CODE_SIGNING,
            ID_KP_EMAIL_PROTECTION, ID_KP_OCSP_SIGNING, ID_KP_SERVER_AUTH, ID_KP_TIME_STAMPING,
        },
        db::rfc6962::{CT_PRECERT_POISON, CT_PRECERT_SIGNING_CERT},
        AssociatedOid, ObjectIdentifier,
    },
};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use sha2::{Digest, Sha256};
use x509_cert::{
    der::Encode,
    ext::{
        pkix::{AuthorityKeyIdentifier, ExtendedKeyUsage},
        Extension,
    },
    impl_newtype, Certificate, TbsCertificate,
};
use x509_util::CertPool;

// Data structures for the [Static CT Submission APIs](https://github.com/C2SP/C2SP/blob/main/static-ct-api.md#submission-apis),
// a subset of the APIs from [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962).

/// Add-(pre-)chain request.
#[serde_as]
#[derive(Deserialize, Serialize)]
pub struct AddChainRequest {
    #[serde_as(as = "Vec<Base64>")]
    pub chain: Vec<Vec<u8>>,
}

/// Add-(pre-)chain response.
#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct AddChainResponse {
    pub sct_version: u8,
    #[serde_as(as = "Base64")]
    pub id: Vec<u8>,
    pub timestamp: UnixTimestamp,
    #[serde_as(as = "Base64")]
    pub extensions: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub signature: Vec<u8>,
}

/// Get-roots response.
#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct GetRootsResponse {
    #[serde_as(as = "Vec<Base64>")]
    pub certificates: Vec<Vec<u8>>,
}

// Extended key usages recognized in configuration that RFC 5280 does not
// assign named constants for.
const ID_KP_IPSEC_END_SYSTEM: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.5");
const ID_KP_IPSEC_TUNNEL: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.6");
const ID_KP_IPSEC_USER: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.7");
const ID_KP_MICROSOFT_SGC: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.3.3");
const ID_KP_NETSCAPE_SGC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113730.4.1");

/// Policy applied to submitted leaves on top of chain verification.
///
/// Immutable once constructed from configuration at startup.
#[derive(Clone, Debug, Default)]
pub struct ChainValidationOpts {
    /// Reject leaves whose NotAfter is in the past.
    pub reject_expired: bool,
    /// Reject leaves whose NotAfter is in the future.
    pub reject_unexpired: bool,
    /// Inclusive lower bound on leaf NotAfter, milliseconds since the epoch.
    pub not_after_start: Option<UnixTimestamp>,
    /// Exclusive upper bound on leaf NotAfter, milliseconds since the epoch.
    pub not_after_limit: Option<UnixTimestamp>,
    /// Extended key usages of which the leaf must carry at least one.
    /// `None` disables EKU enforcement.
    pub ext_key_usages: Option<Vec<ObjectIdentifier>>,
    /// Extension OIDs the leaf must not carry.
    pub reject_ext_ids: Vec<ObjectIdentifier>,
}

/// Maps a comma-separated list of extended key usage names to OIDs.
///
/// Returns `None` when the list is empty or contains `Any`, in which case
/// EKU enforcement is disabled entirely.
///
/// # Errors
///
/// Returns an error on names not in the IANA table.
pub fn parse_ext_key_usages(s: &str) -> Result<Option<Vec<ObjectIdentifier>>, StaticCTError> {
    if s.is_empty() {
        return Ok(None);
    }
    let mut usages = Vec::new();
    for name in s.split(',') {
        let oid = match name.trim() {
            "Any" => return Ok(None),
            "ServerAuth" => ID_KP_SERVER_AUTH,
            "ClientAuth" => ID_KP_CLIENT_AUTH,
            "CodeSigning" => ID_KP_CODE_SIGNING,
            "EmailProtection" => ID_KP_EMAIL_PROTECTION,
            "IPSECEndSystem" => ID_KP_IPSEC_END_SYSTEM,
            "IPSECTunnel" => ID_KP_IPSEC_TUNNEL,
            "IPSECUser" => ID_KP_IPSEC_USER,
            "TimeStamping" => ID_KP_TIME_STAMPING,
            "OCSPSigning" => ID_KP_OCSP_SIGNING,
            "MicrosoftServerGatedCrypto" => ID_KP_MICROSOFT_SGC,
            "NetscapeServerGatedCrypto" => ID_KP_NETSCAPE_SGC,
            other => return Err(StaticCTError::UnknownExtKeyUsage(other.to_string())),
        };
        usages.push(oid);
    }
    Ok(Some(usages))
}

/// Parses a comma-separated list of dotted-decimal OIDs.
///
/// # Errors
///
/// Returns an error if any element is not a well-formed OID.
pub fn parse_oids(s: &str) -> Result<Vec<ObjectIdentifier>, StaticCTError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            let part = part.trim();
            ObjectIdentifier::new(part).map_err(|_| StaticCTError::MalformedOid(part.to_string()))
        })
        .collect()
}

/// The output of successful chain validation: the log entry to be sequenced
/// plus the DER of every certificate above the leaf (ordered from the leaf's
/// issuer up to and including the trust anchor), for the issuer store.
pub struct ValidatedChain {
    pub entry: PendingLogEntry,
    pub issuers: Vec<Vec<u8>>,
}

/// Validates a certificate chain according to
/// [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962) and the
/// configured policy, returning the pending log entry and issuer chain.
///
/// `now` is only consulted for the `reject_expired`/`reject_unexpired`
/// policy checks; the produced entry is a deterministic function of the
/// submission.
///
/// # Errors
///
/// Returns a `StaticCTError` describing the first check that failed.
pub fn validate_chain(
    raw_chain: &[Vec<u8>],
    roots: &CertPool,
    opts: &ChainValidationOpts,
    now: UnixTimestamp,
    expect_precert: bool,
) -> Result<ValidatedChain, StaticCTError> {
    let chain = x509_util::verify_chain(raw_chain, roots)?;
    let leaf = chain.leaf();

    // Reject mismatched signature algorithms:
    // https://github.com/google/certificate-transparency-go/pull/702.
    for cert in core::iter::once(leaf).chain(chain.issuers().iter()) {
        if cert.signature_algorithm != cert.tbs_certificate.signature {
            return Err(StaticCTError::MismatchingSigAlg);
        }
    }

    // The poison extension decides which endpoint the chain belongs to.
    let is_leaf_precert = is_precert(leaf)?;
    if is_leaf_precert != expect_precert {
        return Err(if is_leaf_precert {
            StaticCTError::UnexpectedPrecert
        } else {
            StaticCTError::NotAPrecert
        });
    }

    check_leaf_policy(leaf, opts, now)?;

    let precert_opt = if is_leaf_precert {
        Some(precert_data(&chain, raw_chain[0].clone())?)
    } else {
        None
    };

    let certificate = match &precert_opt {
        Some((canonical_tbs, _)) => canonical_tbs.clone(),
        None => raw_chain[0].clone(),
    };

    Ok(ValidatedChain {
        entry: PendingLogEntry {
            certificate,
            precert_opt: precert_opt.map(|(_, data)| data),
            chain_fingerprints: chain.issuer_fingerprints(),
        },
        issuers: chain.issuers_der().to_vec(),
    })
}

// Computes the canonical TBS and the precert metadata for a precertificate
// submission. Returns the canonical TBS alongside so the caller can use it
// as the logged certificate bytes.
fn precert_data(
    chain: &x509_util::VerifiedChain,
    pre_certificate: Vec<u8>,
) -> Result<(Vec<u8>, PrecertData), StaticCTError> {
    let issuers = chain.issuers();

    // Determine the issuing CA: a precertificate signing certificate
    // (carrying the CT precertificate-signing EKU) signs on behalf of the
    // next certificate up, whose key is the one monitors will attribute the
    // final certificate to.
    let immediate = issuers.first().ok_or(StaticCTError::MissingPrecertIssuer)?;
    let (pre_issuer, issuing_ca) = if is_pre_issuer(immediate)? {
        let issuing_ca = issuers
            .get(1)
            .ok_or(StaticCTError::MissingPrecertSigningCertificateIssuer)?;
        (Some(&immediate.tbs_certificate), issuing_ca)
    } else {
        (None, immediate)
    };

    let issuer_key_hash: [u8; 32] = Sha256::digest(
        issuing_ca
            .tbs_certificate
            .subject_public_key_info
            .to_der()?,
    )
    .into();

    let canonical_tbs = build_precert_tbs(&chain.leaf().tbs_certificate, pre_issuer)?;

    Ok((
        canonical_tbs,
        PrecertData {
            issuer_key_hash,
            pre_certificate,
        },
    ))
}

// Enforces the configured leaf policy: expiry flags, the NotAfter window,
// the EKU allowlist, and rejected extensions.
fn check_leaf_policy(
    leaf: &Certificate,
    opts: &ChainValidationOpts,
    now: UnixTimestamp,
) -> Result<(), StaticCTError> {
    let not_after = u64::try_from(
        leaf.tbs_certificate
            .validity
            .not_after
            .to_unix_duration()
            .as_millis(),
    )
    .map_err(|_| StaticCTError::InvalidLeaf)?;

    if opts.reject_expired && not_after <= now {
        return Err(StaticCTError::CertExpired);
    }
    if opts.reject_unexpired && not_after > now {
        return Err(StaticCTError::CertNotExpired);
    }
    if opts.not_after_start.is_some_and(|start| not_after < start)
        || opts.not_after_limit.is_some_and(|limit| not_after >= limit)
    {
        return Err(StaticCTError::NotAfterOutOfRange);
    }

    if let Some(allowed) = opts.ext_key_usages.as_deref() {
        if !allowed.is_empty()
            && !leaf
                .tbs_certificate
                .get::<ExtendedKeyUsage>()?
                .is_some_and(|(_, eku)| eku.0.iter().any(|oid| allowed.contains(oid)))
        {
            return Err(StaticCTError::MissingRequiredEku);
        }
    }

    if !opts.reject_ext_ids.is_empty() {
        if let Some(exts) = &leaf.tbs_certificate.extensions {
            for ext in exts {
                if opts.reject_ext_ids.contains(&ext.extn_id) {
                    return Err(StaticCTError::RejectedExtension(ext.extn_id));
                }
            }
        }
    }

    Ok(())
}

/// Precertificate poison extension that can be decoded with [`TbsCertificate::get`].
#[derive(Debug)]
struct CTPrecertPoison(Null);

impl AssociatedOid for CTPrecertPoison {
    const OID: ObjectIdentifier = CT_PRECERT_POISON;
}
impl_newtype!(CTPrecertPoison, Null);

/// Returns whether or not the certificate contains the precertificate poison
/// extension. A poison extension that is present but not critical (or whose
/// payload is not NULL) is malformed.
fn is_precert(cert: &Certificate) -> Result<bool, StaticCTError> {
    match cert.tbs_certificate.get::<CTPrecertPoison>()? {
        Some((true, _)) => Ok(true),
        Some((false, _)) => Err(StaticCTError::InvalidCTPoison),
        None => Ok(false),
    }
}

/// Returns whether or not the certificate carries the CT
/// precertificate-signing extended key usage.
fn is_pre_issuer(cert: &Certificate) -> Result<bool, StaticCTError> {
    Ok(cert
        .tbs_certificate
        .get::<ExtendedKeyUsage>()?
        .is_some_and(|(_, eku)| eku.0.iter().any(|oid| *oid == CT_PRECERT_SIGNING_CERT)))
}

/// Builds the canonical `TBSCertificate` that is logged for a
/// precertificate (RFC 6962 s3.1), returning its DER encoding.
///
/// The CT poison extension is removed, preserving the order of other
/// extensions. If `pre_issuer` is provided, it is the precertificate signing
/// certificate that signed the leaf, and the issuance information of the TBS
/// is rewritten to reflect the next issuer in the chain:
///   - `Issuer` is changed to the Issuer of the pre-issuer
///   - `AuthorityKeyIdentifier` is changed to that of the pre-issuer,
///     with extension bytes copied verbatim and criticality preserved
fn build_precert_tbs(
    tbs: &TbsCertificate,
    pre_issuer: Option<&TbsCertificate>,
) -> Result<Vec<u8>, StaticCTError> {
    let mut tbs = tbs.clone();

    let exts = tbs
        .extensions
        .as_mut()
        .ok_or(StaticCTError::InvalidCTPoison)?;

    let poison_idx = exts
        .iter()
        .position(|ext| ext.extn_id == CT_PRECERT_POISON)
        .ok_or(StaticCTError::InvalidCTPoison)?;
    exts.remove(poison_idx);

    if let Some(issuer) = pre_issuer {
        tbs.issuer = issuer.issuer.clone();

        let issuer_aki = match issuer.get::<AuthorityKeyIdentifier>()? {
            Some((_, aki)) => Some(OctetString::new(aki.to_der()?)?),
            None => None,
        };
        let aki_idx = exts
            .iter()
            .position(|ext| ext.extn_id == ID_CE_AUTHORITY_KEY_IDENTIFIER);

        match (aki_idx, issuer_aki) {
            // Replace the leaf's authority key id with the pre-issuer's.
            (Some(idx), Some(aki)) => exts[idx].extn_value = aki,
            // The pre-issuer has no authority key id; the rewritten TBS must
            // not carry one either.
            (Some(idx), None) => {
                exts.remove(idx);
            }
            // Only the pre-issuer has one; append it.
            (None, Some(aki)) => exts.push(Extension {
                extn_id: ID_CE_AUTHORITY_KEY_IDENTIFIER,
                critical: false,
                extn_value: aki,
            }),
            (None, None) => {}
        }
    }

    Ok(tbs.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::asn1::UtcTime;
    use der::Decode;
    use p256::ecdsa::{DerSignature, SigningKey};
    use std::str::FromStr;
    use std::time::Duration;
    use x509_cert::{
        builder::{Builder, CertificateBuilder, Profile},
        ext::AsExtension,
        name::Name,
        serial_number::SerialNumber,
        spki::SubjectPublicKeyInfoOwned,
        time::{Time, Validity},
    };

    impl AsExtension for CTPrecertPoison {
        fn critical(&self, _subject: &Name, _extensions: &[Extension]) -> bool {
            true
        }
    }

    const LEAF_NOT_AFTER_SECS: u64 = 2_000_000_000;

    fn keygen(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    fn spki(key: &SigningKey) -> SubjectPublicKeyInfoOwned {
        use p256::pkcs8::EncodePublicKey;
        let der = key.verifying_key().to_public_key_der().unwrap();
        SubjectPublicKeyInfoOwned::try_from(der.as_bytes()).unwrap()
    }

    fn validity() -> Validity {
        Validity {
            not_before: Time::UtcTime(
                UtcTime::from_unix_duration(Duration::from_secs(1_500_000_000)).unwrap(),
            ),
            not_after: Time::UtcTime(
                UtcTime::from_unix_duration(Duration::from_secs(LEAF_NOT_AFTER_SECS)).unwrap(),
            ),
        }
    }

    struct TestCa {
        root: Certificate,
        intermediate: Certificate,
        int_key: SigningKey,
        pre_issuer: Certificate,
        pre_issuer_key: SigningKey,
    }

    fn test_ca() -> TestCa {
        let root_key = keygen(1);
        let int_key = keygen(2);
        let pre_issuer_key = keygen(3);

        let root = {
            let builder = CertificateBuilder::new(
                Profile::Root,
                SerialNumber::from(1u32),
                validity(),
                Name::from_str("CN=Policy Root,O=CT,C=GB").unwrap(),
                spki(&root_key),
                &root_key,
            )
            .unwrap();
            builder.build::<DerSignature>().unwrap()
        };
        let intermediate = {
            let builder = CertificateBuilder::new(
                Profile::SubCA {
                    issuer: root.tbs_certificate.subject.clone(),
                    path_len_constraint: None,
                },
                SerialNumber::from(2u32),
                validity(),
                Name::from_str("CN=Policy Intermediate,O=CT,C=GB").unwrap(),
                spki(&int_key),
                &root_key,
            )
            .unwrap();
            builder.build::<DerSignature>().unwrap()
        };
        let pre_issuer = {
            let mut builder = CertificateBuilder::new(
                Profile::SubCA {
                    issuer: root.tbs_certificate.subject.clone(),
                    path_len_constraint: None,
                },
                SerialNumber::from(3u32),
                validity(),
                Name::from_str("CN=Precert Signer,O=CT,C=GB").unwrap(),
                spki(&pre_issuer_key),
                &root_key,
            )
            .unwrap();
            builder
                .add_extension(&ExtendedKeyUsage(vec![CT_PRECERT_SIGNING_CERT]))
                .unwrap();
            builder.build::<DerSignature>().unwrap()
        };

        TestCa {
            root,
            intermediate,
            int_key,
            pre_issuer,
            pre_issuer_key,
        }
    }

    fn build_leaf(
        issuer: &Certificate,
        signer: &SigningKey,
        poisoned: bool,
        ekus: Option<Vec<ObjectIdentifier>>,
    ) -> Certificate {
        let leaf_key = keygen(9);
        let mut builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: issuer.tbs_certificate.subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            SerialNumber::from(42u32),
            validity(),
            Name::from_str("CN=leaf.example.com,O=CT,C=GB").unwrap(),
            spki(&leaf_key),
            signer,
        )
        .unwrap();
        if let Some(oids) = ekus {
            builder.add_extension(&ExtendedKeyUsage(oids)).unwrap();
        }
        if poisoned {
            builder.add_extension(&CTPrecertPoison(Null)).unwrap();
        }
        builder.build::<DerSignature>().unwrap()
    }

    fn der_chain(certs: &[&Certificate]) -> Vec<Vec<u8>> {
        certs.iter().map(|c| c.to_der().unwrap()).collect()
    }

    #[test]
    fn parse_ext_key_usages_known_names() {
        let usages = parse_ext_key_usages("ServerAuth,ClientAuth").unwrap().unwrap();
        assert_eq!(usages, vec![ID_KP_SERVER_AUTH, ID_KP_CLIENT_AUTH]);
    }

    #[test]
    fn parse_ext_key_usages_any_disables() {
        assert!(parse_ext_key_usages("ServerAuth,Any,ClientAuth")
            .unwrap()
            .is_none());
        assert!(parse_ext_key_usages("").unwrap().is_none());
    }

    #[test]
    fn parse_ext_key_usages_unknown() {
        assert!(matches!(
            parse_ext_key_usages("ServerAuth,Bogus"),
            Err(StaticCTError::UnknownExtKeyUsage(name)) if name == "Bogus"
        ));
    }

    #[test]
    fn parse_oids_lists() {
        assert!(parse_oids("").unwrap().is_empty());
        let oids = parse_oids("1.2.3.4, 2.5.29.35").unwrap();
        assert_eq!(oids.len(), 2);
        assert_eq!(oids[1], ID_CE_AUTHORITY_KEY_IDENTIFIER);
        assert!(matches!(
            parse_oids("1.2.not-an-oid"),
            Err(StaticCTError::MalformedOid(_))
        ));
    }

    #[test]
    fn detects_precert() {
        let ca = test_ca();
        let cert = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        let precert = build_leaf(&ca.intermediate, &ca.int_key, true, None);
        assert!(!is_precert(&cert).unwrap());
        assert!(is_precert(&precert).unwrap());
    }

    #[test]
    fn non_critical_poison_is_malformed() {
        let ca = test_ca();
        let mut precert = build_leaf(&ca.intermediate, &ca.int_key, true, None);
        for ext in precert.tbs_certificate.extensions.as_mut().unwrap() {
            if ext.extn_id == CT_PRECERT_POISON {
                ext.critical = false;
            }
        }
        assert!(matches!(
            is_precert(&precert),
            Err(StaticCTError::InvalidCTPoison)
        ));
    }

    #[test]
    fn validate_chain_cert_roundtrip() {
        let ca = test_ca();
        let leaf = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let validated = validate_chain(
            &der_chain(&[&leaf, &ca.intermediate]),
            &pool,
            &ChainValidationOpts::default(),
            0,
            false,
        )
        .unwrap();

        assert!(!validated.entry.is_precert());
        assert_eq!(validated.entry.certificate, leaf.to_der().unwrap());
        assert_eq!(validated.entry.chain_fingerprints.len(), 2);
        assert_eq!(validated.issuers.len(), 2);

        // The logged certificate reparses to the submitted leaf.
        let reparsed = Certificate::from_der(&validated.entry.certificate).unwrap();
        assert_eq!(reparsed, leaf);
    }

    #[test]
    fn validate_chain_endpoint_mismatch() {
        let ca = test_ca();
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();

        let precert = build_leaf(&ca.intermediate, &ca.int_key, true, None);
        assert!(matches!(
            validate_chain(
                &der_chain(&[&precert, &ca.intermediate]),
                &pool,
                &ChainValidationOpts::default(),
                0,
                false,
            ),
            Err(StaticCTError::UnexpectedPrecert)
        ));

        let cert = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        assert!(matches!(
            validate_chain(
                &der_chain(&[&cert, &ca.intermediate]),
                &pool,
                &ChainValidationOpts::default(),
                0,
                true,
            ),
            Err(StaticCTError::NotAPrecert)
        ));
    }

    #[test]
    fn validate_chain_not_after_window() {
        let ca = test_ca();
        let leaf = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let chain = der_chain(&[&leaf, &ca.intermediate]);
        let not_after_millis = LEAF_NOT_AFTER_SECS * 1000;

        // Exactly at the start of the window is accepted.
        let opts = ChainValidationOpts {
            not_after_start: Some(not_after_millis),
            ..Default::default()
        };
        assert!(validate_chain(&chain, &pool, &opts, 0, false).is_ok());

        // Exactly at the limit is rejected, the limit being exclusive.
        let opts = ChainValidationOpts {
            not_after_limit: Some(not_after_millis),
            ..Default::default()
        };
        assert!(matches!(
            validate_chain(&chain, &pool, &opts, 0, false),
            Err(StaticCTError::NotAfterOutOfRange)
        ));

        let opts = ChainValidationOpts {
            not_after_start: Some(not_after_millis - 1000),
            not_after_limit: Some(not_after_millis + 1000),
            ..Default::default()
        };
        assert!(validate_chain(&chain, &pool, &opts, 0, false).is_ok());
    }

    #[test]
    fn validate_chain_expiry_flags() {
        let ca = test_ca();
        let leaf = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let chain = der_chain(&[&leaf, &ca.intermediate]);
        let not_after_millis = LEAF_NOT_AFTER_SECS * 1000;

        let opts = ChainValidationOpts {
            reject_expired: true,
            ..Default::default()
        };
        // NotAfter equal to now counts as expired.
        assert!(matches!(
            validate_chain(&chain, &pool, &opts, not_after_millis, false),
            Err(StaticCTError::CertExpired)
        ));
        assert!(validate_chain(&chain, &pool, &opts, not_after_millis - 1, false).is_ok());

        let opts = ChainValidationOpts {
            reject_unexpired: true,
            ..Default::default()
        };
        assert!(matches!(
            validate_chain(&chain, &pool, &opts, 0, false),
            Err(StaticCTError::CertNotExpired)
        ));
        assert!(validate_chain(&chain, &pool, &opts, not_after_millis, false).is_ok());
    }

    #[test]
    fn validate_chain_eku_policy() {
        let ca = test_ca();
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let with_server_auth = build_leaf(
            &ca.intermediate,
            &ca.int_key,
            false,
            Some(vec![ID_KP_SERVER_AUTH]),
        );
        let without_eku = build_leaf(&ca.intermediate, &ca.int_key, false, None);

        let opts = ChainValidationOpts {
            ext_key_usages: Some(vec![ID_KP_SERVER_AUTH]),
            ..Default::default()
        };
        assert!(validate_chain(
            &der_chain(&[&with_server_auth, &ca.intermediate]),
            &pool,
            &opts,
            0,
            false
        )
        .is_ok());
        assert!(matches!(
            validate_chain(
                &der_chain(&[&without_eku, &ca.intermediate]),
                &pool,
                &opts,
                0,
                false
            ),
            Err(StaticCTError::MissingRequiredEku)
        ));
    }

    #[test]
    fn validate_chain_rejected_extension() {
        let ca = test_ca();
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let leaf = build_leaf(
            &ca.intermediate,
            &ca.int_key,
            false,
            Some(vec![ID_KP_SERVER_AUTH]),
        );

        // Reject the EKU extension OID that the leaf carries.
        let opts = ChainValidationOpts {
            reject_ext_ids: parse_oids("2.5.29.37").unwrap(),
            ..Default::default()
        };
        assert!(matches!(
            validate_chain(
                &der_chain(&[&leaf, &ca.intermediate]),
                &pool,
                &opts,
                0,
                false
            ),
            Err(StaticCTError::RejectedExtension(_))
        ));
    }

    #[test]
    fn validate_precert_chain() {
        let ca = test_ca();
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let precert = build_leaf(&ca.intermediate, &ca.int_key, true, None);

        let validated = validate_chain(
            &der_chain(&[&precert, &ca.intermediate]),
            &pool,
            &ChainValidationOpts::default(),
            0,
            true,
        )
        .unwrap();

        assert!(validated.entry.is_precert());
        let precert_data = validated.entry.precert_opt.as_ref().unwrap();
        let expected_hash: [u8; 32] = Sha256::digest(
            ca.intermediate
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .unwrap(),
        )
        .into();
        assert_eq!(precert_data.issuer_key_hash, expected_hash);
        assert_eq!(precert_data.pre_certificate, precert.to_der().unwrap());

        // Canonical TBS has no poison and keeps the original issuer.
        let tbs = TbsCertificate::from_der(&validated.entry.certificate).unwrap();
        assert!(tbs.get::<CTPrecertPoison>().unwrap().is_none());
        assert_eq!(tbs.issuer, precert.tbs_certificate.issuer);
    }

    #[test]
    fn validate_precert_chain_with_pre_issuer() {
        let ca = test_ca();
        let pool = CertPool::new(vec![ca.root.clone()]).unwrap();
        let precert = build_leaf(&ca.pre_issuer, &ca.pre_issuer_key, true, None);

        let validated = validate_chain(
            &der_chain(&[&precert, &ca.pre_issuer, &ca.root]),
            &pool,
            &ChainValidationOpts::default(),
            0,
            true,
        )
        .unwrap();

        // The issuer key hash must be the root's, not the precert signer's.
        let precert_data = validated.entry.precert_opt.as_ref().unwrap();
        let expected_hash: [u8; 32] = Sha256::digest(
            ca.root
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .unwrap(),
        )
        .into();
        assert_eq!(precert_data.issuer_key_hash, expected_hash);

        // The canonical TBS carries the pre-issuer's issuance information.
        let tbs = TbsCertificate::from_der(&validated.entry.certificate).unwrap();
        assert!(tbs.get::<CTPrecertPoison>().unwrap().is_none());
        assert_eq!(tbs.issuer, ca.pre_issuer.tbs_certificate.issuer);
        assert_eq!(tbs.issuer, ca.root.tbs_certificate.subject);
    }

    #[test]
    fn pre_issuer_without_issuer_in_chain() {
        let ca = test_ca();
        // Trusting the precert signer itself leaves no certificate to
        // attribute the final issuance to.
        let pool = CertPool::new(vec![ca.pre_issuer.clone()]).unwrap();
        let precert = build_leaf(&ca.pre_issuer, &ca.pre_issuer_key, true, None);

        assert!(matches!(
            validate_chain(
                &der_chain(&[&precert, &ca.pre_issuer]),
                &pool,
                &ChainValidationOpts::default(),
                0,
                true,
            ),
            Err(StaticCTError::MissingPrecertSigningCertificateIssuer)
        ));
    }

    #[test]
    fn build_precert_tbs_rewrites_issuance() {
        let ca = test_ca();
        let precert = build_leaf(&ca.pre_issuer, &ca.pre_issuer_key, true, None);
        let tbs = &precert.tbs_certificate;
        let pre_issuer_tbs = &ca.pre_issuer.tbs_certificate;

        let der = build_precert_tbs(tbs, Some(pre_issuer_tbs)).unwrap();
        let rebuilt = TbsCertificate::from_der(&der).unwrap();

        // Poison removed.
        assert!(tbs.get::<CTPrecertPoison>().unwrap().is_some());
        assert!(rebuilt.get::<CTPrecertPoison>().unwrap().is_none());

        // Issuer rewritten.
        assert_ne!(rebuilt.issuer, tbs.issuer);
        assert_eq!(rebuilt.issuer, pre_issuer_tbs.issuer);

        // Authority key identifier rewritten to the pre-issuer's.
        let old_aki = tbs.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        let new_aki = rebuilt.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        let pre_issuer_aki = pre_issuer_tbs.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        assert_ne!(new_aki, old_aki);
        assert_eq!(new_aki, pre_issuer_aki);

        // Extension count drops by exactly the poison.
        assert_eq!(
            rebuilt.extensions.as_ref().unwrap().len(),
            tbs.extensions.as_ref().unwrap().len() - 1
        );
    }

    #[test]
    fn build_precert_tbs_without_poison_fails() {
        let ca = test_ca();
        let cert = build_leaf(&ca.intermediate, &ca.int_key, false, None);
        assert!(matches!(
            build_precert_tbs(&cert.tbs_certificate, None),
            Err(StaticCTError::InvalidCTPoison)
        ));
    }
}
