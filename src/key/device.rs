// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{self, CanonicalError};
use crate::ed25519::{SignatureVerifier, VerifyOutcome};
use crate::key::{ed25519_key_id, SignableKey, SignatureCache};

/// Key material announced by one device of a user.
///
/// Devices carry an Ed25519 signing key and a Curve25519 key for session
/// establishment, and must sign their own canonical form with the former.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceKey {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Encryption algorithms the device supports, in announcement order.
    #[serde(default)]
    pub algorithms: Vec<String>,

    #[serde(default)]
    pub keys: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,

    /// Metadata excluded from the signing input, e.g. a display name.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub unsigned: Map<String, Value>,

    /// Milliseconds since the epoch at which the device was last seen
    /// active. Local bookkeeping, not part of the announced form.
    #[serde(skip)]
    pub last_active: i64,

    #[serde(skip)]
    pub(crate) verified: bool,

    #[serde(skip)]
    pub(crate) blocked: bool,

    #[serde(skip)]
    pub(crate) signature_cache: SignatureCache,

    #[serde(skip)]
    pub(crate) self_signed: OnceLock<bool>,
}

impl DeviceKey {
    /// The Curve25519 companion key of this device.
    pub fn curve25519_key(&self) -> Option<&str> {
        let device_id = self.device_id.as_deref()?;
        self.keys
            .get(&format!("curve25519:{device_id}"))
            .map(String::as_str)
    }

    /// Whether the device carries a valid signature by itself over its own
    /// canonical form. Computed once, then memoized.
    ///
    /// An unavailable primitive counts as valid so new devices remain
    /// loadable before it is up; full trust still requires a signature
    /// chain, where an unavailable primitive fails.
    pub fn self_signed(&self, verifier: &impl SignatureVerifier) -> bool {
        *self
            .self_signed
            .get_or_init(|| self.check_self_signature(verifier))
    }

    fn check_self_signature(&self, verifier: &impl SignatureVerifier) -> bool {
        let Some(device_id) = self.device_id.as_deref() else {
            return false;
        };
        let Some(signature) = self
            .signatures
            .get(&self.user_id)
            .and_then(|keys| keys.get(&ed25519_key_id(device_id)))
        else {
            return false;
        };
        let Some(public_key) = self.ed25519_key() else {
            return false;
        };
        let Ok(message) = self.signing_bytes() else {
            return false;
        };

        match verifier.verify_ed25519(public_key, &message, signature) {
            VerifyOutcome::Valid | VerifyOutcome::Unavailable => true,
            VerifyOutcome::Invalid => false,
        }
    }

    /// Effective block state. A device that fails its own self-signature is
    /// permanently untrusted, independent of the local flag.
    pub fn blocked(&self, verifier: &impl SignatureVerifier) -> bool {
        self.blocked || !self.self_signed(verifier)
    }

    /// Whether the local user marked this device as verified.
    pub fn direct_verified(&self) -> bool {
        self.verified
    }

    pub fn is_valid(&self, verifier: &impl SignatureVerifier) -> bool {
        self.device_id.is_some()
            && !self.keys.is_empty()
            && self.curve25519_key().is_some()
            && self.ed25519_key().is_some()
            && self.self_signed(verifier)
    }

    /// Flips the direct-verified flag. Invalid devices are skipped; returns
    /// whether the flag was applied so callers know to persist.
    pub(crate) fn set_verified(&mut self, verified: bool, verifier: &impl SignatureVerifier) -> bool {
        if !self.is_valid(verifier) {
            return false;
        }
        self.verified = verified;
        true
    }

    /// Flips the block flag, with the same no-op rule as `set_verified`.
    pub(crate) fn set_blocked(&mut self, blocked: bool, verifier: &impl SignatureVerifier) -> bool {
        if !self.is_valid(verifier) {
            return false;
        }
        self.blocked = blocked;
        true
    }
}

impl SignableKey for DeviceKey {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn identifier(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn keys(&self) -> &BTreeMap<String, String> {
        &self.keys
    }

    fn signatures(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.signatures
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        canonical::signing_bytes(&serde_json::to_value(self)?)
    }
}

impl PartialEq for DeviceKey {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.device_id == other.device_id
    }
}

impl Eq for DeviceKey {}

#[cfg(test)]
mod tests {
    use crate::ed25519::{Ed25519Verifier, UnavailableVerifier};
    use crate::test_utils::device_key;

    #[test]
    fn self_signature() {
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        assert!(device.self_signed(&Ed25519Verifier));
        assert!(device.is_valid(&Ed25519Verifier));
        assert!(!device.blocked(&Ed25519Verifier));
    }

    #[test]
    fn missing_self_signature() {
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        device.signatures.clear();

        assert!(!device.self_signed(&Ed25519Verifier));
        assert!(!device.is_valid(&Ed25519Verifier));
        // Failing the self-signature blocks the device on its own.
        assert!(device.blocked(&Ed25519Verifier));
    }

    #[test]
    fn tampered_content_fails_self_signature() {
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        device.algorithms.push("m.fancy.v2".to_owned());

        assert!(!device.self_signed(&Ed25519Verifier));
    }

    #[test]
    fn unavailable_primitive_accepts_self_signature() {
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);

        assert!(device.self_signed(&UnavailableVerifier));
        assert!(device.is_valid(&UnavailableVerifier));
    }

    #[test]
    fn self_signature_is_memoized() {
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        assert!(device.self_signed(&Ed25519Verifier));

        // Later tampering no longer changes the memoized answer.
        device.algorithms.push("m.fancy.v2".to_owned());
        assert!(device.self_signed(&Ed25519Verifier));
    }

    #[test]
    fn equality_is_identity() {
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        let (mut other, _) = device_key("@alice:example.org", "ALICEDESK", 2);
        other.last_active = 12_000;

        // Same user and device id, regardless of the rest.
        assert_eq!(device, other);

        let (other_user, _) = device_key("@bob:example.org", "ALICEDESK", 1);
        assert_ne!(device, other_user);
    }

    #[test]
    fn announced_form_round_trips() {
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);

        let json = serde_json::to_vec(&device).unwrap();
        let parsed: super::DeviceKey = serde_json::from_slice(&json).unwrap();

        assert_eq!(parsed.keys, device.keys);
        assert_eq!(parsed.signatures, device.signatures);
        assert_eq!(parsed.algorithms, device.algorithms);
        assert!(parsed.self_signed(&Ed25519Verifier));
    }
}
