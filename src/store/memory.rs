// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for trust state.
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::store::{
    CrossSigner, CrossSigningKeyRecord, DeviceKeyRecord, TrustStore, UserRecord,
};

#[derive(Clone, Debug, Default)]
pub struct InnerMemoryTrustStore {
    pub users: BTreeMap<String, UserRecord>,
    pub device_keys: BTreeMap<(String, String), DeviceKeyRecord>,
    pub cross_signing_keys: BTreeMap<(String, String), CrossSigningKeyRecord>,
}

/// An in-memory store for trust records.
///
/// `MemoryTrustStore` supports usage in asynchronous and multi-threaded
/// contexts by wrapping an `InnerMemoryTrustStore` with an `RwLock` and
/// `Arc`. Convenience methods are provided to obtain a read- or write-lock
/// on the underlying store.
#[derive(Clone, Debug, Default)]
pub struct MemoryTrustStore {
    inner: Arc<RwLock<InnerMemoryTrustStore>>,
}

impl MemoryTrustStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a read-lock on the store.
    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryTrustStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryTrustStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }

    pub fn insert_user(&self, record: UserRecord) {
        self.write_store()
            .users
            .insert(record.user_id.clone(), record);
    }

    pub fn insert_device_key(&self, record: DeviceKeyRecord) {
        self.write_store()
            .device_keys
            .insert((record.user_id.clone(), record.device_id.clone()), record);
    }

    pub fn insert_cross_signing_key(&self, record: CrossSigningKeyRecord) {
        self.write_store()
            .cross_signing_keys
            .insert((record.user_id.clone(), record.public_key.clone()), record);
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.read_store().users.get(user_id).cloned()
    }

    pub fn device_key(&self, user_id: &str, device_id: &str) -> Option<DeviceKeyRecord> {
        self.read_store()
            .device_keys
            .get(&(user_id.to_owned(), device_id.to_owned()))
            .cloned()
    }

    pub fn cross_signing_key(
        &self,
        user_id: &str,
        public_key: &str,
    ) -> Option<CrossSigningKeyRecord> {
        self.read_store()
            .cross_signing_keys
            .get(&(user_id.to_owned(), public_key.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    type Error = Infallible;

    async fn set_device_verified(
        &self,
        user_id: &str,
        device_id: &str,
        verified: bool,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        if let Some(record) = store
            .device_keys
            .get_mut(&(user_id.to_owned(), device_id.to_owned()))
        {
            record.verified = verified;
        }
        Ok(())
    }

    async fn set_device_blocked(
        &self,
        user_id: &str,
        device_id: &str,
        blocked: bool,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        if let Some(record) = store
            .device_keys
            .get_mut(&(user_id.to_owned(), device_id.to_owned()))
        {
            record.blocked = blocked;
        }
        Ok(())
    }

    async fn set_cross_signing_verified(
        &self,
        user_id: &str,
        public_key: &str,
        verified: bool,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        if let Some(record) = store
            .cross_signing_keys
            .get_mut(&(user_id.to_owned(), public_key.to_owned()))
        {
            record.verified = verified;
        }
        Ok(())
    }

    async fn set_cross_signing_blocked(
        &self,
        user_id: &str,
        public_key: &str,
        blocked: bool,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        if let Some(record) = store
            .cross_signing_keys
            .get_mut(&(user_id.to_owned(), public_key.to_owned()))
        {
            record.blocked = blocked;
        }
        Ok(())
    }
}

#[async_trait]
impl CrossSigner for MemoryTrustStore {
    type Error = Infallible;

    // No cross-signing secrets live in a memory-only deployment.
    fn is_signable(&self, _user_id: &str, _key_id: &str) -> bool {
        false
    }

    async fn sign(&self, _user_id: &str, _key_id: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{DeviceKeyRecord, TrustStore, UserRecord};

    use super::MemoryTrustStore;

    fn device_record(user_id: &str, device_id: &str) -> DeviceKeyRecord {
        DeviceKeyRecord {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            content: b"{}".to_vec(),
            verified: false,
            blocked: false,
            last_active: 0,
        }
    }

    #[tokio::test]
    async fn trust_flags_are_recorded() {
        let store = MemoryTrustStore::new();
        store.insert_user(UserRecord {
            user_id: "@alice:example.org".to_owned(),
            outdated: false,
        });
        store.insert_device_key(device_record("@alice:example.org", "ALICEDESK"));

        store
            .set_device_verified("@alice:example.org", "ALICEDESK", true)
            .await
            .unwrap();
        store
            .set_device_blocked("@alice:example.org", "ALICEDESK", true)
            .await
            .unwrap();

        let record = store.device_key("@alice:example.org", "ALICEDESK").unwrap();
        assert!(record.verified);
        assert!(record.blocked);

        // Unknown rows are quietly skipped.
        store
            .set_device_verified("@alice:example.org", "GHOST", true)
            .await
            .unwrap();
        assert!(store.device_key("@alice:example.org", "GHOST").is_none());
    }
}
