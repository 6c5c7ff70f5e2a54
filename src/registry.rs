// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide trust decisions over every known user's keys.
//!
//! The registry owns one [`UserKeys`] set per user and answers the central
//! question of this crate: is a given key trusted? Trust terminates at
//! anchors (keys the local user verified directly, in particular their own
//! master key) and travels along signatures. The signature graph is walked
//! through `(user id, key id)` lookups against the registry; keys never
//! hold references to one another, so ownership stays a strict forest.
use std::collections::{BTreeMap, HashSet};

use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::ed25519::{Ed25519Verifier, SignatureVerifier, VerifyOutcome};
use crate::key::{
    CrossSigningKey, DeviceKey, InvalidKeyError, KeyRef, KeyUsage, SignableKey, ED25519_PREFIX,
};
use crate::store::{CrossSigner, CrossSigningKeyRecord, DeviceKeyRecord, RecordError, TrustStore, UserRecord};
use crate::user_keys::{UserKeys, UserVerifiedStatus};
use crate::verification::{VerificationError, VerificationSessions};

/// Process-wide view of all known users' keys and the trust state over
/// them.
///
/// `S` is the persistence and co-signing collaborator, `V` the Ed25519
/// primitive (which may be [`crate::ed25519::UnavailableVerifier`] when the
/// primitive is absent).
pub struct TrustRegistry<S, V = Ed25519Verifier> {
    self_user_id: String,
    encryption_enabled: bool,
    users: BTreeMap<String, UserKeys>,
    store: S,
    verifier: V,
    signing_tasks: JoinSet<()>,
}

impl<S, V> TrustRegistry<S, V> {
    pub fn new(self_user_id: &str, store: S, verifier: V) -> Self {
        Self {
            self_user_id: self_user_id.to_owned(),
            encryption_enabled: true,
            users: BTreeMap::new(),
            store,
            verifier,
            signing_tasks: JoinSet::new(),
        }
    }

    pub fn self_user_id(&self) -> &str {
        &self.self_user_id
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption_enabled
    }

    /// While disabled, every signature chain fails.
    pub fn set_encryption_enabled(&mut self, enabled: bool) {
        self.encryption_enabled = enabled;
    }

    pub fn get_user(&self, user_id: &str) -> Option<&UserKeys> {
        self.users.get(user_id)
    }

    pub fn get_key(&self, user_id: &str, identifier: &str) -> Option<KeyRef<'_>> {
        self.users.get(user_id)?.get_key(identifier)
    }

    /// The key set of a user, created on first sight.
    pub fn insert_user(&mut self, user_id: &str) -> &mut UserKeys {
        self.users
            .entry(user_id.to_owned())
            .or_insert_with(|| UserKeys::new(user_id))
    }

    /// Await completion of any in-flight co-signing requests. Intended for
    /// orderly shutdown; trust mutations never await these themselves.
    pub async fn drain_signing_tasks(&mut self) {
        while self.signing_tasks.join_next().await.is_some() {}
    }
}

impl<S, V> TrustRegistry<S, V>
where
    V: SignatureVerifier,
{
    /// Replaces a user's key material from a fresh server push.
    pub fn update_user_keys(
        &mut self,
        user_id: &str,
        devices: Vec<DeviceKey>,
        cross_signing_keys: Vec<CrossSigningKey>,
    ) {
        let user = self
            .users
            .entry(user_id.to_owned())
            .or_insert_with(|| UserKeys::new(user_id));
        user.update(devices, cross_signing_keys, &self.verifier);
    }

    /// Hydrates a user's key set from persistence records.
    pub fn load_user(
        &mut self,
        user: UserRecord,
        devices: Vec<DeviceKeyRecord>,
        cross_signing_keys: Vec<CrossSigningKeyRecord>,
    ) -> Result<(), RecordError> {
        let keys = UserKeys::from_records(user, devices, cross_signing_keys, &self.verifier)?;
        self.users.insert(keys.user_id.clone(), keys);
        Ok(())
    }

    /// Whether the key can be reached from a trust anchor along valid
    /// signatures.
    ///
    /// With `verified_only` the walk only accepts directly verified signers
    /// as anchors; without it any valid signature from an admissible signer
    /// terminates the walk successfully. A non-empty
    /// `only_validate_user_ids` restricts the walk to those users.
    ///
    /// Signatures are only accepted from the key's owning user (their own
    /// keys attesting each other) or from the local user; transitive trust
    /// through third parties is disallowed. Every `(user, identifier)` node
    /// is expanded at most once, so cycles terminate and the work is linear
    /// in the number of reachable signature edges.
    pub fn has_valid_signature_chain(
        &self,
        key: KeyRef<'_>,
        verified_only: bool,
        only_validate_user_ids: &HashSet<String>,
    ) -> bool {
        let mut visited = HashSet::new();
        self.walk_signature_chain(key, verified_only, &mut visited, only_validate_user_ids)
    }

    fn walk_signature_chain(
        &self,
        key: KeyRef<'_>,
        verified_only: bool,
        visited: &mut HashSet<(String, String)>,
        only_validate_user_ids: &HashSet<String>,
    ) -> bool {
        if !self.encryption_enabled {
            return false;
        }
        let Some(identifier) = key.identifier() else {
            return false;
        };
        let node = (key.user_id().to_owned(), identifier.to_owned());
        if visited.contains(&node) {
            return false;
        }
        if !only_validate_user_ids.is_empty() && !only_validate_user_ids.contains(key.user_id()) {
            return false;
        }
        visited.insert(node);

        for (signer_user_id, signer_signatures) in key.signatures() {
            let Some(signer_keys) = self.users.get(signer_user_id) else {
                continue;
            };
            // Transitive trust is disallowed: only the owning user or we
            // ourselves may vouch for a key.
            if signer_user_id.as_str() != key.user_id()
                && signer_user_id != &self.self_user_id
            {
                continue;
            }

            for (full_key_id, signature) in signer_signatures {
                let Some(signer_key_id) = full_key_id.strip_prefix(ED25519_PREFIX) else {
                    continue;
                };
                // A signature of a key by itself carries no chain
                // information.
                if signer_user_id.as_str() == key.user_id() && signer_key_id == identifier {
                    continue;
                }
                let Some(signer_key) = signer_keys.get_key(signer_key_id) else {
                    continue;
                };
                if !only_validate_user_ids.is_empty()
                    && !only_validate_user_ids.contains(signer_key.user_id())
                {
                    continue;
                }
                if signer_key.blocked(&self.verifier) {
                    continue;
                }
                if !self.signature_valid(key, signer_user_id, full_key_id, signature, signer_key) {
                    continue;
                }

                if verified_only && signer_key.direct_verified() {
                    return true;
                }
                if let KeyRef::CrossSigning(cross_key) = signer_key {
                    // The "I trust my own master key" anchor.
                    if cross_key.has_usage(&KeyUsage::Master)
                        && cross_key.direct_verified()
                        && cross_key.user_id == self.self_user_id
                    {
                        return true;
                    }
                }
                if !verified_only {
                    // Any valid signature is fine, anchored or not.
                    return true;
                }
                if self.walk_signature_chain(
                    signer_key,
                    verified_only,
                    visited,
                    only_validate_user_ids,
                ) {
                    return true;
                }
            }
        }

        false
    }

    fn signature_valid(
        &self,
        key: KeyRef<'_>,
        signer_user_id: &str,
        full_key_id: &str,
        signature: &str,
        signer_key: KeyRef<'_>,
    ) -> bool {
        if let Some(cached) = key.signature_cache().get(signer_user_id, full_key_id) {
            trace!(signer_user_id, full_key_id, cached, "signature cache hit");
            return cached;
        }
        let Some(public_key) = signer_key.ed25519_key() else {
            return false;
        };
        let Ok(message) = key.signing_bytes() else {
            return false;
        };

        match self.verifier.verify_ed25519(public_key, &message, signature) {
            VerifyOutcome::Valid => {
                key.signature_cache().insert(signer_user_id, full_key_id, true);
                true
            }
            VerifyOutcome::Invalid => {
                key.signature_cache()
                    .insert(signer_user_id, full_key_id, false);
                false
            }
            // Not a verification result; leave the cache untouched so a
            // later-loaded primitive gets to decide.
            VerifyOutcome::Unavailable => false,
        }
    }

    /// Whether this key is suitable for encrypting message payloads to it
    /// or for attesting other keys.
    pub fn key_verified(&self, key: KeyRef<'_>) -> bool {
        key.identifier().is_some()
            && !key.blocked(&self.verifier)
            && (key.direct_verified() || self.cross_verified(key))
    }

    /// Chain validation against verified anchors only.
    pub fn cross_verified(&self, key: KeyRef<'_>) -> bool {
        self.has_valid_signature_chain(key, true, &HashSet::new())
    }

    /// Chain validation accepting any signature, even towards unverified
    /// anchors.
    pub fn key_signed(&self, key: KeyRef<'_>) -> bool {
        self.has_valid_signature_chain(key, false, &HashSet::new())
    }

    /// Whether message payloads may be encrypted towards this device.
    ///
    /// Once the owning user's master key is verified, the device itself
    /// must be verified too. Without an established identity anchor
    /// encryption is permitted optimistically, since refusing would
    /// deadlock first contact.
    pub fn encrypt_to_device(&self, device: &DeviceKey) -> bool {
        if device.blocked(&self.verifier)
            || device.device_id.is_none()
            || device.ed25519_key().is_none()
        {
            return false;
        }

        let master_verified = self
            .users
            .get(&device.user_id)
            .and_then(|user| user.master_key())
            .is_some_and(|master| self.key_verified(KeyRef::CrossSigning(master)));

        if master_verified {
            self.key_verified(KeyRef::Device(device))
        } else {
            true
        }
    }

    /// Three-valued verification rollup over all of a user's devices.
    pub fn user_verified_status(&self, user_id: &str) -> UserVerifiedStatus {
        let Some(user) = self.users.get(user_id) else {
            return UserVerifiedStatus::Unknown;
        };
        let Some(master) = user.master_key() else {
            return UserVerifiedStatus::Unknown;
        };

        let all_devices_verified = user
            .device_keys
            .values()
            .all(|device| self.key_verified(KeyRef::Device(device)));

        match (
            self.key_verified(KeyRef::CrossSigning(master)),
            all_devices_verified,
        ) {
            (_, true) => UserVerifiedStatus::Verified,
            (true, false) => UserVerifiedStatus::UnknownDevice,
            // Without an anchored identity, device-level gaps collapse into
            // the user being unknown.
            (false, false) => UserVerifiedStatus::Unknown,
        }
    }

    /// Starts an interactive verification with the given user.
    ///
    /// Verifying another user happens inside the direct room shared with
    /// them; verifying ourselves broadcasts to all of our devices. The
    /// session machine lives behind the `sessions` collaborator.
    pub async fn start_verification<G>(
        &self,
        sessions: &G,
        user_id: &str,
    ) -> Result<G::Session, VerificationError<G::Error>>
    where
        G: VerificationSessions,
    {
        if user_id == self.self_user_id {
            return sessions
                .start_broadcast_session(user_id, "*")
                .await
                .map_err(VerificationError::Sessions);
        }

        let room_id = sessions
            .direct_room(user_id)
            .await
            .map_err(VerificationError::Sessions)?
            .ok_or(VerificationError::RoomCreationFailed)?;
        sessions
            .start_room_session(&room_id, user_id)
            .await
            .map_err(VerificationError::Sessions)
    }
}

impl<S, V> TrustRegistry<S, V>
where
    S: TrustStore + CrossSigner + Clone + Send + Sync + 'static,
    V: SignatureVerifier,
{
    /// Marks a device as directly verified, or revokes that.
    ///
    /// Unknown and invalid devices are silently skipped. Newly granted
    /// verification offers the key to the co-signing component; that runs
    /// supervised in the background and its outcome never rolls the local
    /// flag back.
    pub async fn set_device_verified(
        &mut self,
        user_id: &str,
        device_id: &str,
        verified: bool,
    ) -> Result<(), TrustError<<S as TrustStore>::Error>> {
        let Some(device) = self
            .users
            .get_mut(user_id)
            .and_then(|user| user.device_keys.get_mut(device_id))
        else {
            return Ok(());
        };

        let newly_verified = verified && !device.direct_verified();
        if !device.set_verified(verified, &self.verifier) {
            return Ok(());
        }
        debug!(user_id, device_id, verified, "device trust changed");

        self.store
            .set_device_verified(user_id, device_id, verified)
            .await
            .map_err(TrustError::Store)?;

        if newly_verified {
            self.request_signature(user_id, device_id);
        }
        Ok(())
    }

    /// Blocks or unblocks a device; unknown and invalid devices are
    /// silently skipped.
    pub async fn set_device_blocked(
        &mut self,
        user_id: &str,
        device_id: &str,
        blocked: bool,
    ) -> Result<(), TrustError<<S as TrustStore>::Error>> {
        let Some(device) = self
            .users
            .get_mut(user_id)
            .and_then(|user| user.device_keys.get_mut(device_id))
        else {
            return Ok(());
        };

        if !device.set_blocked(blocked, &self.verifier) {
            return Ok(());
        }
        debug!(user_id, device_id, blocked, "device block changed");

        self.store
            .set_device_blocked(user_id, device_id, blocked)
            .await
            .map_err(TrustError::Store)
    }

    /// Marks a cross-signing key as directly verified, or revokes that.
    ///
    /// Unknown or invalid keys fail with [`InvalidKeyError`].
    pub async fn set_cross_signing_verified(
        &mut self,
        user_id: &str,
        public_key: &str,
        verified: bool,
    ) -> Result<(), TrustError<<S as TrustStore>::Error>> {
        let Some(key) = self
            .users
            .get_mut(user_id)
            .and_then(|user| user.cross_signing_keys.get_mut(public_key))
        else {
            return Err(InvalidKeyError {
                user_id: user_id.to_owned(),
            }
            .into());
        };

        let newly_verified = verified && !key.direct_verified();
        key.set_verified(verified)?;
        debug!(user_id, public_key, verified, "cross-signing trust changed");

        self.store
            .set_cross_signing_verified(user_id, public_key, verified)
            .await
            .map_err(TrustError::Store)?;

        if newly_verified {
            self.request_signature(user_id, public_key);
        }
        Ok(())
    }

    /// Blocks or unblocks a cross-signing key; unknown or invalid keys fail
    /// with [`InvalidKeyError`].
    pub async fn set_cross_signing_blocked(
        &mut self,
        user_id: &str,
        public_key: &str,
        blocked: bool,
    ) -> Result<(), TrustError<<S as TrustStore>::Error>> {
        let Some(key) = self
            .users
            .get_mut(user_id)
            .and_then(|user| user.cross_signing_keys.get_mut(public_key))
        else {
            return Err(InvalidKeyError {
                user_id: user_id.to_owned(),
            }
            .into());
        };

        key.set_blocked(blocked)?;
        debug!(user_id, public_key, blocked, "cross-signing block changed");

        self.store
            .set_cross_signing_blocked(user_id, public_key, blocked)
            .await
            .map_err(TrustError::Store)
    }

    /// Offers a newly verified key to the co-signing component,
    /// fire-and-forget. The task is supervised by the registry's own task
    /// set and aborted with it, so it cannot outlive the registry.
    fn request_signature(&mut self, user_id: &str, key_id: &str) {
        if !self.store.is_signable(user_id, key_id) {
            return;
        }

        // Reap co-signing tasks that already finished.
        while self.signing_tasks.try_join_next().is_some() {}

        let store = self.store.clone();
        let user_id = user_id.to_owned();
        let key_id = key_id.to_owned();
        self.signing_tasks.spawn(async move {
            if let Err(err) = store.sign(&user_id, &key_id).await {
                warn!(%user_id, %key_id, %err, "cross-signing request failed");
            }
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrustError<E> {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),

    #[error("{0}")]
    Store(E),
}
