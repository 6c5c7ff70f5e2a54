// SPDX-License-Identifier: MIT OR Apache-2.0

//! All keys known for a single user.
use std::collections::BTreeMap;

use crate::ed25519::SignatureVerifier;
use crate::key::{CrossSigningKey, DeviceKey, KeyRef, KeyUsage, SignableKey};
use crate::store::{CrossSigningKeyRecord, DeviceKeyRecord, RecordError, UserRecord};

/// Verification rollup over all of a user's devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserVerifiedStatus {
    /// No identity anchor has been established for the user, or some of
    /// their devices are unverified while none is anchored.
    Unknown,
    /// The user's identity is anchored, but at least one device is not
    /// verified.
    UnknownDevice,
    /// Every device of the user is verified.
    Verified,
}

/// The set of device and cross-signing keys announced by one user.
///
/// Created on first sight of a user and mutated whenever the server pushes
/// new key material; the containing registry never destroys it.
#[derive(Clone, Debug)]
pub struct UserKeys {
    pub user_id: String,
    /// Set when the locally held key material needs re-fetching: right
    /// after first sight, or when any announced key failed validation.
    pub outdated: bool,
    pub device_keys: BTreeMap<String, DeviceKey>,
    pub cross_signing_keys: BTreeMap<String, CrossSigningKey>,
}

impl UserKeys {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            outdated: true,
            device_keys: BTreeMap::new(),
            cross_signing_keys: BTreeMap::new(),
        }
    }

    /// Looks up a key by identifier, trying the device table first.
    pub fn get_key(&self, identifier: &str) -> Option<KeyRef<'_>> {
        if let Some(device) = self.device_keys.get(identifier) {
            return Some(KeyRef::Device(device));
        }
        self.cross_signing_keys
            .get(identifier)
            .map(KeyRef::CrossSigning)
    }

    /// The first cross-signing key carrying the given role.
    pub fn cross_signing_key(&self, usage: &KeyUsage) -> Option<&CrossSigningKey> {
        self.cross_signing_keys
            .values()
            .find(|key| key.has_usage(usage))
    }

    pub fn master_key(&self) -> Option<&CrossSigningKey> {
        self.cross_signing_key(&KeyUsage::Master)
    }

    pub fn self_signing_key(&self) -> Option<&CrossSigningKey> {
        self.cross_signing_key(&KeyUsage::SelfSigning)
    }

    pub fn user_signing_key(&self) -> Option<&CrossSigningKey> {
        self.cross_signing_key(&KeyUsage::UserSigning)
    }

    /// Replaces the key tables with freshly synced material.
    ///
    /// Trust flags granted earlier carry over to re-announced keys whose
    /// identifier and Ed25519 material are unchanged; a key that rotated
    /// its material re-enters untrusted. Any announced key that fails
    /// validation marks the whole set as outdated.
    pub(crate) fn update(
        &mut self,
        devices: Vec<DeviceKey>,
        cross_signing_keys: Vec<CrossSigningKey>,
        verifier: &impl SignatureVerifier,
    ) {
        let previous_devices = std::mem::take(&mut self.device_keys);
        let previous_cross_signing = std::mem::take(&mut self.cross_signing_keys);
        self.outdated = false;

        for mut device in devices {
            let Some(device_id) = device.device_id.clone() else {
                self.outdated = true;
                continue;
            };
            if let Some(previous) = previous_devices.get(&device_id) {
                if previous.ed25519_key() == device.ed25519_key() {
                    device.verified = previous.verified;
                    device.blocked = previous.blocked;
                    device.last_active = previous.last_active;
                }
            }
            if !device.is_valid(verifier) {
                self.outdated = true;
            }
            self.device_keys.insert(device_id, device);
        }

        for mut key in cross_signing_keys {
            let Some(public_key) = key.public_key().map(ToOwned::to_owned) else {
                self.outdated = true;
                continue;
            };
            if let Some(previous) = previous_cross_signing.get(&public_key) {
                if previous.ed25519_key() == key.ed25519_key() {
                    key.verified = previous.verified;
                    key.blocked = previous.blocked;
                }
            }
            if !key.is_valid() {
                self.outdated = true;
            }
            self.cross_signing_keys.insert(public_key, key);
        }
    }

    /// Hydrates a user's key set from persistence records.
    pub fn from_records(
        user: UserRecord,
        devices: Vec<DeviceKeyRecord>,
        cross_signing_keys: Vec<CrossSigningKeyRecord>,
        verifier: &impl SignatureVerifier,
    ) -> Result<Self, RecordError> {
        let mut keys = Self::new(&user.user_id);
        keys.outdated = user.outdated;

        for record in devices {
            let mut device: DeviceKey = serde_json::from_slice(&record.content)?;
            device.verified = record.verified;
            device.blocked = record.blocked;
            device.last_active = record.last_active;

            let Some(device_id) = device.device_id.clone() else {
                keys.outdated = true;
                continue;
            };
            if !device.is_valid(verifier) {
                keys.outdated = true;
            }
            keys.device_keys.insert(device_id, device);
        }

        for record in cross_signing_keys {
            let mut key: CrossSigningKey = serde_json::from_slice(&record.content)?;
            key.verified = record.verified;
            key.blocked = record.blocked;

            let Some(public_key) = key.public_key().map(ToOwned::to_owned) else {
                keys.outdated = true;
                continue;
            };
            if !key.is_valid() {
                keys.outdated = true;
            }
            keys.cross_signing_keys.insert(public_key, key);
        }

        Ok(keys)
    }

    /// The persistence records for this user's key set.
    pub fn to_records(
        &self,
    ) -> Result<(UserRecord, Vec<DeviceKeyRecord>, Vec<CrossSigningKeyRecord>), RecordError> {
        let user = UserRecord {
            user_id: self.user_id.clone(),
            outdated: self.outdated,
        };

        let mut devices = Vec::with_capacity(self.device_keys.len());
        for (device_id, device) in &self.device_keys {
            devices.push(DeviceKeyRecord {
                user_id: device.user_id.clone(),
                device_id: device_id.clone(),
                content: serde_json::to_vec(device)?,
                verified: device.verified,
                blocked: device.blocked,
                last_active: device.last_active,
            });
        }

        let mut cross_signing_keys = Vec::with_capacity(self.cross_signing_keys.len());
        for (public_key, key) in &self.cross_signing_keys {
            cross_signing_keys.push(CrossSigningKeyRecord {
                user_id: key.user_id.clone(),
                public_key: public_key.clone(),
                content: serde_json::to_vec(key)?,
                verified: key.verified,
                blocked: key.blocked,
            });
        }

        Ok((user, devices, cross_signing_keys))
    }
}

#[cfg(test)]
mod tests {
    use crate::ed25519::Ed25519Verifier;
    use crate::key::{KeyRef, KeyUsage};
    use crate::test_utils::{cross_signing_key, device_key, public_key_hex};

    use super::UserKeys;

    #[test]
    fn lookup_prefers_the_device_table() {
        let mut user = UserKeys::new("@alice:example.org");
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        let (cross, signing_key) = cross_signing_key("@alice:example.org", &[KeyUsage::Master], 2);
        let public_key = public_key_hex(&signing_key);

        user.update(vec![device], vec![cross], &Ed25519Verifier);

        assert!(matches!(
            user.get_key("ALICEDESK"),
            Some(KeyRef::Device(_))
        ));
        assert!(matches!(
            user.get_key(&public_key),
            Some(KeyRef::CrossSigning(_))
        ));
        assert!(user.get_key("UNKNOWN").is_none());
    }

    #[test]
    fn usage_views() {
        let mut user = UserKeys::new("@alice:example.org");
        let (master, _) = cross_signing_key("@alice:example.org", &[KeyUsage::Master], 1);
        let (self_signing, _) =
            cross_signing_key("@alice:example.org", &[KeyUsage::SelfSigning], 2);

        user.update(vec![], vec![master, self_signing], &Ed25519Verifier);

        assert!(user.master_key().is_some());
        assert!(user.self_signing_key().is_some());
        assert!(user.user_signing_key().is_none());
    }

    #[test]
    fn fresh_valid_material_clears_outdated() {
        let mut user = UserKeys::new("@alice:example.org");
        assert!(user.outdated);

        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        user.update(vec![device], vec![], &Ed25519Verifier);
        assert!(!user.outdated);
    }

    #[test]
    fn invalid_material_marks_outdated() {
        let mut user = UserKeys::new("@alice:example.org");
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        device.signatures.clear();

        user.update(vec![device], vec![], &Ed25519Verifier);
        assert!(user.outdated);
    }

    #[test]
    fn trust_carries_over_to_unchanged_keys() {
        let mut user = UserKeys::new("@alice:example.org");
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        device.verified = true;
        user.update(vec![device], vec![], &Ed25519Verifier);

        // Same device re-announced: the flag survives.
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        user.update(vec![device], vec![], &Ed25519Verifier);
        assert!(user.device_keys["ALICEDESK"].direct_verified());

        // Rotated Ed25519 material: the device re-enters untrusted.
        let (device, _) = device_key("@alice:example.org", "ALICEDESK", 9);
        user.update(vec![device], vec![], &Ed25519Verifier);
        assert!(!user.device_keys["ALICEDESK"].direct_verified());
    }

    #[test]
    fn records_round_trip() {
        let mut user = UserKeys::new("@alice:example.org");
        let (mut device, _) = device_key("@alice:example.org", "ALICEDESK", 1);
        device.last_active = 1_700_000_000_000;
        let (cross, _) = cross_signing_key("@alice:example.org", &[KeyUsage::Master], 2);
        user.update(vec![device], vec![cross], &Ed25519Verifier);
        user.device_keys.get_mut("ALICEDESK").unwrap().verified = true;

        let (user_record, device_records, cross_records) = user.to_records().unwrap();
        let restored = UserKeys::from_records(
            user_record.clone(),
            device_records.clone(),
            cross_records.clone(),
            &Ed25519Verifier,
        )
        .unwrap();

        let (restored_user, restored_devices, restored_cross) = restored.to_records().unwrap();
        assert_eq!(restored_user, user_record);
        assert_eq!(restored_devices, device_records);
        assert_eq!(restored_cross, cross_records);

        let device = &restored.device_keys["ALICEDESK"];
        assert!(device.direct_verified());
        assert_eq!(device.last_active, 1_700_000_000_000);
    }
}
