// SPDX-License-Identifier: MIT OR Apache-2.0

//! The two signable key kinds and their shared contract.
//!
//! A per-device key and a cross-signing key differ in self-signature and
//! validity rules but share everything a signature chain needs to see:
//! owning user, identifier, public key material, the signatures attached to
//! them and a private memo of prior verification results. Trust
//! relationships between keys are expressed through `(user id, key id)`
//! lookups against the registry, never through references between key
//! objects.
mod cross_signing;
mod device;

pub use cross_signing::{CrossSigningKey, KeyUsage};
pub use device::DeviceKey;

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::canonical::CanonicalError;
use crate::ed25519::SignatureVerifier;

pub(crate) const ED25519_PREFIX: &str = "ed25519:";

pub(crate) fn ed25519_key_id(identifier: &str) -> String {
    format!("{ED25519_PREFIX}{identifier}")
}

/// Common contract of every key that can carry and receive signatures.
pub trait SignableKey {
    fn user_id(&self) -> &str;

    /// Local id of this key: the device id for device keys, the public key
    /// for cross-signing keys. Keys without an identifier are never valid.
    fn identifier(&self) -> Option<&str>;

    /// Public key material, keyed by `<algorithm>:<identifier>`.
    fn keys(&self) -> &BTreeMap<String, String>;

    /// Signatures over this key, keyed by signing user and then by the
    /// signing key's full id.
    fn signatures(&self) -> &BTreeMap<String, BTreeMap<String, String>>;

    /// Canonical bytes over which signatures of this key are computed.
    fn signing_bytes(&self) -> Result<Vec<u8>, CanonicalError>;

    /// The Ed25519 public material of this key.
    fn ed25519_key(&self) -> Option<&str> {
        let identifier = self.identifier()?;
        self.keys()
            .get(&ed25519_key_id(identifier))
            .map(String::as_str)
    }
}

/// A key resolved from a user's tables.
#[derive(Clone, Copy, Debug)]
pub enum KeyRef<'a> {
    Device(&'a DeviceKey),
    CrossSigning(&'a CrossSigningKey),
}

impl<'a> KeyRef<'a> {
    pub fn user_id(self) -> &'a str {
        match self {
            KeyRef::Device(key) => &key.user_id,
            KeyRef::CrossSigning(key) => &key.user_id,
        }
    }

    pub fn identifier(self) -> Option<&'a str> {
        match self {
            KeyRef::Device(key) => key.identifier(),
            KeyRef::CrossSigning(key) => key.identifier(),
        }
    }

    pub fn ed25519_key(self) -> Option<&'a str> {
        match self {
            KeyRef::Device(key) => key.ed25519_key(),
            KeyRef::CrossSigning(key) => key.ed25519_key(),
        }
    }

    pub fn signatures(self) -> &'a BTreeMap<String, BTreeMap<String, String>> {
        match self {
            KeyRef::Device(key) => &key.signatures,
            KeyRef::CrossSigning(key) => &key.signatures,
        }
    }

    pub fn direct_verified(self) -> bool {
        match self {
            KeyRef::Device(key) => key.direct_verified(),
            KeyRef::CrossSigning(key) => key.direct_verified(),
        }
    }

    /// Effective block state; a device failing its own self-signature counts
    /// as blocked.
    pub fn blocked(self, verifier: &impl SignatureVerifier) -> bool {
        match self {
            KeyRef::Device(key) => key.blocked(verifier),
            KeyRef::CrossSigning(key) => key.blocked(),
        }
    }

    pub fn signing_bytes(self) -> Result<Vec<u8>, CanonicalError> {
        match self {
            KeyRef::Device(key) => key.signing_bytes(),
            KeyRef::CrossSigning(key) => key.signing_bytes(),
        }
    }

    pub(crate) fn signature_cache(self) -> &'a SignatureCache {
        match self {
            KeyRef::Device(key) => &key.signature_cache,
            KeyRef::CrossSigning(key) => &key.signature_cache,
        }
    }
}

/// Memoized signature verification results, keyed by signing user and full
/// key id.
///
/// Entries are terminal once written: the verified tuple of signing content,
/// signer material and signature is immutable for the lifetime of the
/// containing key. The cache is interior-mutable so chain walks can memoize
/// through shared access, and it is never persisted.
#[derive(Debug, Default)]
pub struct SignatureCache {
    inner: RwLock<BTreeMap<String, BTreeMap<String, bool>>>,
}

impl SignatureCache {
    pub fn get(&self, user_id: &str, key_id: &str) -> Option<bool> {
        self.inner
            .read()
            .expect("acquire shared read access on signature cache")
            .get(user_id)
            .and_then(|keys| keys.get(key_id))
            .copied()
    }

    pub fn insert(&self, user_id: &str, key_id: &str, valid: bool) {
        self.inner
            .write()
            .expect("acquire exclusive write access on signature cache")
            .entry(user_id.to_owned())
            .or_default()
            .insert(key_id.to_owned(), valid);
    }
}

impl Clone for SignatureCache {
    fn clone(&self) -> Self {
        let inner = self
            .inner
            .read()
            .expect("acquire shared read access on signature cache")
            .clone();
        Self {
            inner: RwLock::new(inner),
        }
    }
}

/// Attempted to change trust state of a cross-signing key which is missing
/// required material.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("cross-signing key of {user_id} is invalid and cannot change trust state")]
pub struct InvalidKeyError {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::SignatureCache;

    #[test]
    fn cache_round_trip() {
        let cache = SignatureCache::default();
        assert_eq!(cache.get("@alice:example.org", "ed25519:DEVICE"), None);

        cache.insert("@alice:example.org", "ed25519:DEVICE", true);
        cache.insert("@alice:example.org", "ed25519:OTHER", false);

        assert_eq!(cache.get("@alice:example.org", "ed25519:DEVICE"), Some(true));
        assert_eq!(cache.get("@alice:example.org", "ed25519:OTHER"), Some(false));
        assert_eq!(cache.get("@bob:example.org", "ed25519:DEVICE"), None);
    }

    #[test]
    fn cloning_carries_entries() {
        let cache = SignatureCache::default();
        cache.insert("@alice:example.org", "ed25519:DEVICE", true);

        let cloned = cache.clone();
        assert_eq!(cloned.get("@alice:example.org", "ed25519:DEVICE"), Some(true));
    }
}
