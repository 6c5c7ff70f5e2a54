// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence seams and record shapes for trust state.
//!
//! The core never talks to a concrete backend. It issues the four named
//! trust mutations through [`TrustStore`] and hands keys to the co-signing
//! component through [`CrossSigner`]; what a backend does with them is its
//! own business. Key material round-trips through the record shapes below,
//! which store the upstream JSON form as received.
mod memory;

pub use memory::{InnerMemoryTrustStore, MemoryTrustStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted form of a device key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeyRecord {
    pub user_id: String,
    pub device_id: String,
    /// Upstream JSON form as received, including `signatures` and
    /// `unsigned`.
    pub content: Vec<u8>,
    pub verified: bool,
    pub blocked: bool,
    pub last_active: i64,
}

/// Persisted form of a cross-signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossSigningKeyRecord {
    pub user_id: String,
    pub public_key: String,
    pub content: Vec<u8>,
    pub verified: bool,
    pub blocked: bool,
}

/// Persisted per-user row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub outdated: bool,
}

/// Store for local trust decisions.
///
/// Implementations only need to record the flags; the registry keeps the
/// in-memory state authoritative and never reads back mid-operation.
#[async_trait]
pub trait TrustStore {
    type Error: std::error::Error + Send + Sync;

    async fn set_device_verified(
        &self,
        user_id: &str,
        device_id: &str,
        verified: bool,
    ) -> Result<(), Self::Error>;

    async fn set_device_blocked(
        &self,
        user_id: &str,
        device_id: &str,
        blocked: bool,
    ) -> Result<(), Self::Error>;

    async fn set_cross_signing_verified(
        &self,
        user_id: &str,
        public_key: &str,
        verified: bool,
    ) -> Result<(), Self::Error>;

    async fn set_cross_signing_blocked(
        &self,
        user_id: &str,
        public_key: &str,
        blocked: bool,
    ) -> Result<(), Self::Error>;
}

/// The co-signing component, able to attest keys with the local user's own
/// cross-signing secrets.
#[async_trait]
pub trait CrossSigner {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether secrets able to attest the given key are present.
    fn is_signable(&self, user_id: &str, key_id: &str) -> bool;

    /// Attest the given key. The registry dispatches this fire-and-forget;
    /// completion is never awaited by trust mutations.
    async fn sign(&self, user_id: &str, key_id: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
