//! Signature engine - keyed integrity hash over the manifest mapping
//!
//! The digest is PBKDF2-HMAC-SHA512 over a canonical serialization of the
//! mapping, keyed by the per-session salt. The canonical form is compact
//! JSON with top-level keys in ascending order (inherent in [`Mapping`]'s
//! `BTreeMap`) and the `signature` entry excluded, so two independent
//! implementations agree on the bytes being hashed regardless of insertion
//! order.

use crate::error::ManifestError;
use crate::{Mapping, MANIFEST_RELEASE, SIGNING_KEY, VERSION_KEY};
use pbkdf2::pbkdf2_hmac;
use serde_yaml_ng::Value;
use sha2::Sha512;

/// PBKDF2 iteration count. Part of the signature contract; changing it
/// invalidates every existing manifest.
pub const HASH_ITERATIONS: u32 = 15_000;

const DIGEST_LEN: usize = 64;

/// Canonical byte form of the mapping with the signature entry stripped.
fn canonical_bytes(meta: &Mapping) -> Result<Vec<u8>, ManifestError> {
    let unsigned: std::collections::BTreeMap<&String, &Value> = meta
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNING_KEY)
        .collect();

    serde_json::to_vec(&unsigned).map_err(|e| ManifestError::Canonicalize { source: e })
}

/// Deterministic keyed hash of the mapping, excluding `signature`.
///
/// Output is the hex form of the 64-byte PBKDF2-HMAC-SHA512 derivation,
/// 128 characters.
pub fn hash(meta: &Mapping, salt: &str) -> Result<String, ManifestError> {
    let message = canonical_bytes(meta)?;

    let mut digest = [0u8; DIGEST_LEN];
    pbkdf2_hmac::<Sha512>(&message, salt.as_bytes(), HASH_ITERATIONS, &mut digest);

    Ok(hex::encode(digest))
}

/// Seal the mapping: stamp the format release, hash the remaining entries,
/// and store the digest under `signature`. Returns the digest.
pub fn sign(meta: &mut Mapping, salt: &str) -> Result<String, ManifestError> {
    meta.insert(
        VERSION_KEY.to_string(),
        Value::String(MANIFEST_RELEASE.to_string()),
    );

    let digest = hash(meta, salt)?;
    meta.insert(SIGNING_KEY.to_string(), Value::String(digest.clone()));
    Ok(digest)
}

/// Recompute the hash and compare against `expected`, or against the stored
/// `signature` entry when `expected` is `None`. A mapping with no stored
/// signature never verifies.
pub fn verify(meta: &Mapping, salt: &str, expected: Option<&str>) -> Result<bool, ManifestError> {
    let stored;
    let expected = match expected {
        Some(sig) => sig,
        None => {
            stored = meta.get(SIGNING_KEY).and_then(Value::as_str);
            match stored {
                Some(sig) => sig,
                None => return Ok(false),
            }
        }
    };

    Ok(hash(meta, salt)? == expected)
}
