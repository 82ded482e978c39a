// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Wire formats for the [Static CT API](https://c2sp.org/static-ct-api):
//! log entries, the SCT extension carrying the leaf index, deterministic SCT
//! signing, and checkpoint signing in the signed-note format.

use crate::{AddChainResponse, StaticCTError};
use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use p256::{
    ecdsa::{
        signature::Signer, Signature as EcdsaSignature, SigningKey as EcdsaSigningKey,
        VerifyingKey as EcdsaVerifyingKey,
    },
    pkcs8::EncodePublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};

/// Unix timestamp, measured since the epoch (January 1, 1970, 00:00),
/// ignoring leap seconds, in milliseconds.
/// This can be unsigned as we never deal with negative timestamps.
pub type UnixTimestamp = u64;

/// Zero-based position of a leaf in the log.
pub type LeafIndex = u64;

/// Key under which an entry is recorded in the deduplication cache:
/// the SHA-256 hash of the bytes that end up in the Merkle leaf (the leaf
/// DER for a certificate, the canonical TBS for a precertificate).
pub type DedupKey = [u8; 32];

/// Precertificate-specific log entry data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrecertData {
    /// SHA-256 of the issuing CA's `SubjectPublicKeyInfo`.
    pub issuer_key_hash: [u8; 32],

    /// The submitted precertificate, i.e. the
    /// `PrecertChainEntry.pre_certificate`.
    pub pre_certificate: Vec<u8>,
}

/// A validated submission that has not yet been assigned a position in the
/// log. Its fields are a deterministic function of the submitted chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingLogEntry {
    /// Either the `TimestampedEntry.signed_entry`, or the
    /// `PreCert.tbs_certificate` for precertificates.
    /// It must be at most 2^24-1 bytes long.
    pub certificate: Vec<u8>,

    /// Present exactly when this entry is a precertificate.
    pub precert_opt: Option<PrecertData>,

    /// The SHA-256 hashes of the certificates above the leaf, ordered from
    /// the leaf's issuer up to and including the root.
    pub chain_fingerprints: Vec<[u8; 32]>,
}

impl PendingLogEntry {
    pub fn is_precert(&self) -> bool {
        self.precert_opt.is_some()
    }

    /// The deduplication cache key for this entry.
    pub fn dedup_key(&self) -> DedupKey {
        Sha256::digest(&self.certificate).into()
    }
}

/// A log entry with its assigned position and timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub pending: PendingLogEntry,

    /// The zero-based index of the leaf in the log.
    /// It must be between 0 and 2^40-1.
    pub leaf_index: LeafIndex,

    /// The `TimestampedEntry.timestamp`.
    pub timestamp: UnixTimestamp,
}

impl LogEntry {
    /// Returns a marshaled RFC 6962 `TimestampedEntry`.
    fn marshal_timestamped_entry(&self) -> Vec<u8> {
        let mut buffer = Vec::new();

        buffer.write_u64::<BigEndian>(self.timestamp).unwrap();
        if let Some(precert) = &self.pending.precert_opt {
            buffer.write_u16::<BigEndian>(1).unwrap(); // entry_type = precert_entry
            buffer.extend_from_slice(&precert.issuer_key_hash);
        } else {
            buffer.write_u16::<BigEndian>(0).unwrap(); // entry_type = x509_entry
        }
        write_length_prefixed(&mut buffer, &self.pending.certificate, 3).unwrap();
        write_length_prefixed(
            &mut buffer,
            &Extensions {
                leaf_index: self.leaf_index,
            }
            .to_bytes(),
            2,
        )
        .unwrap();

        buffer
    }

    /// Returns a marshaled [RFC 6962 `MerkleTreeLeaf`](https://datatracker.ietf.org/doc/html/rfc6962#section-3.4).
    ///
    /// # Panics
    ///
    /// Panics if writing to the internal buffer fails, which should never happen.
    pub fn merkle_tree_leaf(&self) -> Vec<u8> {
        let mut buffer = vec![
            0, // version = v1 (0)
            0, // leaf_type = timestamped_entry (0)
        ];
        buffer.extend(self.marshal_timestamped_entry());

        buffer
    }

    /// Returns a marshaled [static-ct-api `TileLeaf`](https://c2sp.org/static-ct-api#log-entries).
    ///
    /// # Panics
    ///
    /// Panics if writing to the internal buffer fails, which should never happen.
    pub fn tile_leaf(&self) -> Vec<u8> {
        let mut buffer = self.marshal_timestamped_entry();
        if let Some(precert) = &self.pending.precert_opt {
            write_length_prefixed(&mut buffer, &precert.pre_certificate, 3).unwrap();
        }
        write_length_prefixed(&mut buffer, &self.pending.chain_fingerprints.concat(), 2).unwrap();

        buffer
    }
}

/// The `CTExtensions` field of `SignedCertificateTimestamp` and
/// `TimestampedEntry`, according to c2sp.org/static-ct-api.
#[derive(Default, Debug, PartialEq)]
pub struct Extensions {
    pub leaf_index: LeafIndex,
}

impl Extensions {
    /// Marshals extensions for inclusion in an add-(pre-)chain response.
    ///
    /// # Panics
    ///
    /// Panics if writing to the internal buffer fails, which should never happen.
    pub fn to_bytes(&self) -> Vec<u8> {
        // https://github.com/C2SP/C2SP/blob/main/static-ct-api.md#sct-extension
        // enum {
        //     leaf_index(0), (255)
        // } ExtensionType;
        //
        // struct {
        //     ExtensionType extension_type;
        //     opaque extension_data<0..2^16-1>;
        // } Extension;
        //
        // Extension CTExtensions<0..2^16-1>;
        //
        // uint8 uint40[5];
        // uint40 leaf_index;

        let mut buffer = Vec::new();
        buffer.write_u8(0).unwrap(); // extension_type = leaf_index
        buffer.write_u16::<BigEndian>(5).unwrap();
        buffer.write_uint::<BigEndian>(self.leaf_index, 5).unwrap();

        buffer
    }

    /// Parse a `CTExtensions` field, ignoring unknown extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the `leaf_index` extension is missing
    /// or the extensions are otherwise malformed.
    pub fn from_bytes(ext_bytes: &[u8]) -> Result<Self, StaticCTError> {
        let mut cursor = Cursor::new(ext_bytes);

        while cursor.position() < ext_bytes.len() as u64 {
            let extension_type = cursor.read_u8()?;
            let length = cursor.read_u16::<BigEndian>()? as usize;

            if cursor.position() + length as u64 > ext_bytes.len() as u64 {
                return Err(StaticCTError::InvalidLength);
            }

            let mut extension = vec![0; length];
            cursor.read_exact(&mut extension)?;

            if extension_type == 0 {
                let mut extension_cursor = Cursor::new(&extension);
                let leaf_index = extension_cursor.read_uint::<BigEndian>(5)?;

                if extension_cursor.position() != extension.len() as u64 {
                    return Err(StaticCTError::TrailingData);
                }

                return Ok(Extensions { leaf_index });
            }
        }

        Err(StaticCTError::MissingLeafIndex)
    }
}

/// Calculates the log ID from a verifying key: the SHA-256 hash of its
/// `SubjectPublicKeyInfo`.
///
/// # Errors
///
/// Returns an error if encoding the verifying key fails.
pub fn log_id_from_key(vkey: &EcdsaVerifyingKey) -> Result<[u8; 32], x509_verify::spki::Error> {
    let pkix = vkey.to_public_key_der()?;
    Ok(Sha256::digest(&pkix).into())
}

/// Returns a signed add-[pre-]chain response with the `leaf_index` extension.
///
/// # Errors
///
/// Returns an error if there are encoding issues with the provided signing
/// key or if signing fails.
pub fn signed_certificate_timestamp(
    signing_key: &EcdsaSigningKey,
    entry: &LogEntry,
) -> Result<AddChainResponse, StaticCTError> {
    let mut buffer = vec![
        0, // sct_version = v1 (0)
        0, // signature_type = certificate_timestamp (0)
    ];
    buffer.extend(entry.marshal_timestamped_entry());
    let signature = sign(signing_key, &buffer);
    let id = log_id_from_key(signing_key.verifying_key())?.to_vec();

    Ok(AddChainResponse {
        sct_version: 0, // sct_version = v1 (0)
        id,
        timestamp: entry.timestamp,
        extensions: Extensions {
            leaf_index: entry.leaf_index,
        }
        .to_bytes(),
        signature,
    })
}

/// Produces an encoded digitally-signed signature as defined in RFC 5246.
///
/// We use deterministic RFC 6979 ECDSA signatures so that when fetching a
/// previous SCT's timestamp and index from the deduplication cache, the new
/// SCT we produce is identical.
///
/// # Panics
///
/// Panics if writing to an internal buffer fails, which should never happen.
pub fn sign(signing_key: &EcdsaSigningKey, msg: &[u8]) -> Vec<u8> {
    let sig: EcdsaSignature = signing_key.sign(msg);
    let sig_der = sig.to_der();
    let sig_bytes = sig_der.as_bytes();

    // https://datatracker.ietf.org/doc/html/rfc5246#section-4.7
    let mut digitally_signed = Vec::new();
    digitally_signed.push(4); // hash = sha256
    digitally_signed.push(3); // signature = ecdsa
    digitally_signed
        .write_u16::<BigEndian>(u16::try_from(sig_bytes.len() & 0xFFFF).unwrap())
        .unwrap();
    digitally_signed.extend_from_slice(sig_bytes);

    digitally_signed
}

/// Signs tree heads as [checkpoints](https://c2sp.org/tlog-checkpoint) in the
/// signed-note format, with the RFC 6962 `TreeHeadSignature` embedded in a
/// `RFC6962NoteSignature` according to <https://c2sp.org/static-ct-api#checkpoints>.
///
/// Handed to the append engine at construction so that published tree heads
/// carry the log's signature.
pub struct CheckpointSigner {
    origin: String,
    key_id: u32,
    signing_key: EcdsaSigningKey,
}

impl CheckpointSigner {
    /// Returns a new `CheckpointSigner` for the given origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not a valid signed-note key name or
    /// if the key cannot be encoded.
    pub fn new(origin: &str, signing_key: EcdsaSigningKey) -> Result<Self, StaticCTError> {
        // Key name rules from c2sp.org/signed-note.
        if origin.is_empty() || origin.chars().any(char::is_whitespace) || origin.contains('+') {
            return Err(StaticCTError::InvalidSignerName);
        }

        let pkix = signing_key.verifying_key().to_public_key_der()?;
        let spki_hash = Sha256::digest(&pkix);

        // The note key ID binds the origin to the RFC 6962 signature type
        // (0x05) and the log's key hash.
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update(b"\n");
        hasher.update([0x05]);
        hasher.update(spki_hash);
        let digest = hasher.finalize();
        let key_id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

        Ok(Self {
            origin: origin.to_string(),
            key_id,
            signing_key,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Signs a tree head, returning the serialized signed note.
    ///
    /// # Panics
    ///
    /// Panics if writing to an internal buffer fails, which should never happen.
    pub fn sign_checkpoint(
        &self,
        tree_size: u64,
        root_hash: &[u8; 32],
        timestamp: UnixTimestamp,
    ) -> Vec<u8> {
        let sth_bytes = serialize_sth_signature_input(timestamp, tree_size, root_hash);
        let tree_head_signature = sign(&self.signing_key, &sth_bytes);

        // struct {
        //     uint64 timestamp;
        //     TreeHeadSignature signature;
        // } RFC6962NoteSignature;
        let mut sig = Vec::new();
        sig.write_u64::<BigEndian>(timestamp).unwrap();
        sig.extend_from_slice(&tree_head_signature);

        let mut line_sig = self.key_id.to_be_bytes().to_vec();
        line_sig.extend_from_slice(&sig);

        let mut note = format!(
            "{}\n{}\n{}\n",
            self.origin,
            tree_size,
            BASE64_STANDARD.encode(root_hash)
        )
        .into_bytes();
        note.extend_from_slice(b"\n");
        note.extend_from_slice(
            format!(
                "\u{2014} {} {}\n",
                self.origin,
                BASE64_STANDARD.encode(&line_sig)
            )
            .as_bytes(),
        );

        note
    }
}

/// Serializes the passed in STH parameters into the correct format for signing
/// according to <https://datatracker.ietf.org/doc/html/rfc6962#section-3.5>.
/// ```text
/// digitally-signed struct {
///     Version version;
///     SignatureType signature_type = tree_hash;
///     uint64 timestamp;
///     uint64 tree_size;
///     opaque sha256_root_hash[32];
/// } TreeHeadSignature;
/// ```
///
/// # Panics
///
/// Panics if writing to the internal buffer fails, which should never happen.
fn serialize_sth_signature_input(
    timestamp: UnixTimestamp,
    tree_size: u64,
    root_hash: &[u8; 32],
) -> Vec<u8> {
    let mut buffer = Vec::new();

    buffer.write_u8(0).unwrap(); // version = 0 (v1)
    buffer.write_u8(1).unwrap(); // signature_type = 1 (tree_hash)
    buffer.write_u64::<BigEndian>(timestamp).unwrap();
    buffer.write_u64::<BigEndian>(tree_size).unwrap();
    buffer.extend(root_hash);

    buffer
}

/// Write length-prefixed data to the passed in writer.
pub(crate) fn write_length_prefixed<W: Write>(
    writer: &mut W,
    data: &[u8],
    length_bytes: usize,
) -> Result<usize, std::io::Error> {
    writer.write_uint::<BigEndian>(data.len() as u64, length_bytes)?;
    writer.write(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;

    fn test_key() -> EcdsaSigningKey {
        EcdsaSigningKey::from_slice(&[42; 32]).unwrap()
    }

    fn cert_entry() -> LogEntry {
        LogEntry {
            pending: PendingLogEntry {
                certificate: vec![1, 2, 3, 4],
                precert_opt: None,
                chain_fingerprints: vec![[7; 32], [8; 32]],
            },
            leaf_index: 123,
            timestamp: 1_700_000_000_000,
        }
    }

    fn precert_entry() -> LogEntry {
        LogEntry {
            pending: PendingLogEntry {
                certificate: vec![9; 10],
                precert_opt: Some(PrecertData {
                    issuer_key_hash: [5; 32],
                    pre_certificate: vec![6; 20],
                }),
                chain_fingerprints: vec![[7; 32]],
            },
            leaf_index: 7,
            timestamp: 1_700_000_000_001,
        }
    }

    #[test]
    fn extensions_roundtrip() {
        let ext = Extensions { leaf_index: 123 };
        let buf = ext.to_bytes();
        assert_eq!(buf.len(), 1 + 2 + 5);
        let ext2 = Extensions::from_bytes(&buf).unwrap();
        assert_eq!(ext, ext2);
    }

    #[test]
    fn extensions_missing_leaf_index() {
        assert!(matches!(
            Extensions::from_bytes(&[]),
            Err(StaticCTError::MissingLeafIndex)
        ));
        // An unknown extension alone does not satisfy parsing.
        assert!(matches!(
            Extensions::from_bytes(&[1, 0, 1, 0xab]),
            Err(StaticCTError::MissingLeafIndex)
        ));
    }

    #[test]
    fn merkle_tree_leaf_layout() {
        let entry = cert_entry();
        let leaf = entry.merkle_tree_leaf();
        // version, leaf_type, timestamp, entry_type = x509_entry.
        assert_eq!(&leaf[..2], &[0, 0]);
        assert_eq!(
            u64::from_be_bytes(leaf[2..10].try_into().unwrap()),
            entry.timestamp
        );
        assert_eq!(&leaf[10..12], &[0, 0]);
        // 24-bit length prefix then the certificate bytes.
        assert_eq!(&leaf[12..15], &[0, 0, 4]);
        assert_eq!(&leaf[15..19], &entry.pending.certificate[..]);
    }

    #[test]
    fn precert_leaf_carries_issuer_key_hash() {
        let entry = precert_entry();
        let leaf = entry.merkle_tree_leaf();
        assert_eq!(&leaf[10..12], &[0, 1]);
        assert_eq!(&leaf[12..44], &[5; 32]);
    }

    #[test]
    fn tile_leaf_appends_chain_and_precert() {
        let cert = cert_entry();
        let tile = cert.tile_leaf();
        // Fingerprint block is the last element, length-prefixed with 2 bytes.
        let fp_len = u16::from_be_bytes(tile[tile.len() - 66..tile.len() - 64].try_into().unwrap());
        assert_eq!(fp_len, 64);

        let pre = precert_entry();
        let tile = pre.tile_leaf();
        // The precertificate body is included ahead of the fingerprints.
        let needle = [6u8; 20];
        assert!(tile.windows(20).any(|w| w == needle));
    }

    #[test]
    fn dedup_key_tracks_certificate_bytes() {
        let a = cert_entry().pending;
        let mut b = a.clone();
        assert_eq!(a.dedup_key(), b.dedup_key());
        b.certificate.push(0);
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn sct_is_deterministic() {
        let key = test_key();
        let entry = cert_entry();
        let a = signed_certificate_timestamp(&key, &entry).unwrap();
        let b = signed_certificate_timestamp(&key, &entry).unwrap();
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.sct_version, 0);
        assert_eq!(a.timestamp, entry.timestamp);
        assert_eq!(a.id, log_id_from_key(key.verifying_key()).unwrap());
        assert_eq!(
            Extensions::from_bytes(&a.extensions).unwrap().leaf_index,
            entry.leaf_index
        );
    }

    #[test]
    fn sct_signature_verifies() {
        let key = test_key();
        let entry = cert_entry();
        let sct = signed_certificate_timestamp(&key, &entry).unwrap();

        // Reconstruct the signed input and check the DigitallySigned wrapper.
        let mut signed = vec![0, 0];
        signed.extend(entry.marshal_timestamped_entry());
        assert_eq!(&sct.signature[..2], &[4, 3]);
        let sig_len = u16::from_be_bytes(sct.signature[2..4].try_into().unwrap()) as usize;
        let sig = EcdsaSignature::from_der(&sct.signature[4..4 + sig_len]).unwrap();
        key.verifying_key().verify(&signed, &sig).unwrap();
    }

    #[test]
    fn checkpoint_signer_rejects_bad_origin() {
        assert!(matches!(
            CheckpointSigner::new("", test_key()),
            Err(StaticCTError::InvalidSignerName)
        ));
        assert!(matches!(
            CheckpointSigner::new("bad origin", test_key()),
            Err(StaticCTError::InvalidSignerName)
        ));
    }

    #[test]
    fn checkpoint_note_shape() {
        let key = test_key();
        let signer = CheckpointSigner::new("example.com/test-log", key.clone()).unwrap();
        let root_hash = [3u8; 32];
        let timestamp = 1_700_000_000_000;
        let note = signer.sign_checkpoint(5, &root_hash, timestamp);
        let text = String::from_utf8(note).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "example.com/test-log");
        assert_eq!(lines[1], "5");
        assert_eq!(lines[2], BASE64_STANDARD.encode(root_hash));
        assert_eq!(lines[3], "");
        let sig_line = lines[4];
        assert!(sig_line.starts_with("\u{2014} example.com/test-log "));

        // Decode the signature line: 4-byte key ID, 8-byte timestamp, then
        // the TreeHeadSignature.
        let b64 = sig_line.rsplit(' ').next().unwrap();
        let raw = BASE64_STANDARD.decode(b64).unwrap();
        assert_eq!(
            u32::from_be_bytes(raw[..4].try_into().unwrap()),
            signer.key_id()
        );
        assert_eq!(
            u64::from_be_bytes(raw[4..12].try_into().unwrap()),
            timestamp
        );
        let ths = &raw[12..];
        assert_eq!(&ths[..2], &[4, 3]);
        let sig_len = u16::from_be_bytes(ths[2..4].try_into().unwrap()) as usize;
        let sig = EcdsaSignature::from_der(&ths[4..4 + sig_len]).unwrap();
        let sth = serialize_sth_signature_input(timestamp, 5, &root_hash);
        key.verifying_key().verify(&sth, &sig).unwrap();
    }

    #[test]
    fn pending_entry_serde_roundtrip() {
        let entry = precert_entry();
        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
