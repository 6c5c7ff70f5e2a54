// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::canonical::{self, CanonicalError};
use crate::key::{InvalidKeyError, SignableKey, SignatureCache, ED25519_PREFIX};

/// Role label of a cross-signing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyUsage {
    /// Long-lived identity anchor of a user.
    Master,
    /// Attests the user's own devices.
    SelfSigning,
    /// Attests other users' master keys.
    UserSigning,
    /// Labels this implementation does not recognize are carried through.
    Other(String),
}

impl KeyUsage {
    /// Returns the role label as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            KeyUsage::Master => "master",
            KeyUsage::SelfSigning => "self_signing",
            KeyUsage::UserSigning => "user_signing",
            KeyUsage::Other(label) => label,
        }
    }
}

impl From<&str> for KeyUsage {
    fn from(label: &str) -> Self {
        match label {
            "master" => KeyUsage::Master,
            "self_signing" => KeyUsage::SelfSigning,
            "user_signing" => KeyUsage::UserSigning,
            other => KeyUsage::Other(other.to_owned()),
        }
    }
}

impl Serialize for KeyUsage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyUsage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(KeyUsage::from(label.as_str()))
    }
}

impl Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Long-lived identity-layer key of a user, carrying one or more role
/// labels.
///
/// Unlike devices, cross-signing keys have no self-signature requirement;
/// they are anchored by the local user marking them verified, or by being
/// signed by the owning user's master key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrossSigningKey {
    pub user_id: String,

    #[serde(default)]
    pub usage: Vec<KeyUsage>,

    #[serde(default)]
    pub keys: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub unsigned: Map<String, Value>,

    #[serde(skip)]
    pub(crate) verified: bool,

    #[serde(skip)]
    pub(crate) blocked: bool,

    #[serde(skip)]
    pub(crate) signature_cache: SignatureCache,
}

impl CrossSigningKey {
    /// The public key of this cross-signing key, doubling as its
    /// identifier.
    pub fn public_key(&self) -> Option<&str> {
        self.keys
            .keys()
            .find_map(|key_id| key_id.strip_prefix(ED25519_PREFIX))
    }

    pub fn has_usage(&self, usage: &KeyUsage) -> bool {
        self.usage.contains(usage)
    }

    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty()
            && self.public_key().is_some()
            && !self.keys.is_empty()
            && self.ed25519_key().is_some()
    }

    /// Whether the local user marked this key as verified.
    pub fn direct_verified(&self) -> bool {
        self.verified
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    /// Flips the direct-verified flag.
    ///
    /// Fails on invalid keys: cross-signing key validity is a prerequisite
    /// for all anchoring decisions, so silently accepting the flag (as
    /// device keys do) would poison later chain walks.
    pub(crate) fn set_verified(&mut self, verified: bool) -> Result<(), InvalidKeyError> {
        if !self.is_valid() {
            return Err(InvalidKeyError {
                user_id: self.user_id.clone(),
            });
        }
        self.verified = verified;
        Ok(())
    }

    /// Flips the block flag, with the same validity requirement as
    /// `set_verified`.
    pub(crate) fn set_blocked(&mut self, blocked: bool) -> Result<(), InvalidKeyError> {
        if !self.is_valid() {
            return Err(InvalidKeyError {
                user_id: self.user_id.clone(),
            });
        }
        self.blocked = blocked;
        Ok(())
    }
}

impl SignableKey for CrossSigningKey {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn identifier(&self) -> Option<&str> {
        self.public_key()
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

impl PartialEq for CrossSigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.public_key() == other.public_key()
    }
}

impl Eq for CrossSigningKey {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::key::{InvalidKeyError, SignableKey};
    use crate::test_utils::cross_signing_key;

    use super::{CrossSigningKey, KeyUsage};

    #[test]
    fn usage_labels_round_trip() {
        let key: CrossSigningKey = serde_json::from_value(json!({
            "user_id": "@alice:example.org",
            "usage": ["master", "self_signing", "frobnicating"],
            "keys": { "ed25519:abcd": "abcd" },
        }))
        .unwrap();

        assert_eq!(
            key.usage,
            vec![
                KeyUsage::Master,
                KeyUsage::SelfSigning,
                KeyUsage::Other("frobnicating".to_owned()),
            ]
        );

        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(
            value.get("usage").unwrap(),
            &json!(["master", "self_signing", "frobnicating"])
        );
    }

    #[test]
    fn usage_string_representation() {
        assert_eq!(KeyUsage::Master.as_str(), "master");
        assert_eq!(KeyUsage::SelfSigning.as_str(), "self_signing");
        assert_eq!(KeyUsage::UserSigning.as_str(), "user_signing");
        assert_eq!(KeyUsage::Other("frobnicating".to_owned()).as_str(), "frobnicating");

        assert_eq!(format!("{}", KeyUsage::UserSigning), "user_signing");
        assert_eq!(KeyUsage::from("master"), KeyUsage::Master);
        assert_eq!(
            KeyUsage::from("frobnicating"),
            KeyUsage::Other("frobnicating".to_owned())
        );
    }

    #[test]
    fn public_key_is_the_identifier() {
        let (key, signing_key) = cross_signing_key("@alice:example.org", &[KeyUsage::Master], 3);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());

        assert_eq!(key.public_key(), Some(public_key.as_str()));
        assert_eq!(key.identifier(), Some(public_key.as_str()));
        assert_eq!(key.ed25519_key(), Some(public_key.as_str()));
        assert!(key.is_valid());
    }

    #[test]
    fn trust_changes_fail_on_invalid_keys() {
        let (valid, _) = cross_signing_key("@alice:example.org", &[KeyUsage::Master], 3);

        let mut missing_user = valid.clone();
        missing_user.user_id.clear();
        assert_eq!(
            missing_user.set_verified(true),
            Err(InvalidKeyError {
                user_id: String::new()
            })
        );

        let mut missing_keys = valid.clone();
        missing_keys.keys.clear();
        assert!(missing_keys.set_blocked(true).is_err());

        let mut valid = valid;
        assert!(valid.set_verified(true).is_ok());
        assert!(valid.direct_verified());
    }
}
