// SPDX-License-Identifier: MIT OR Apache-2.0

//! `keytrust` is the cross-signing trust evaluation core of a client-side
//! end-to-end encryption subsystem: it decides, for any Ed25519 public key
//! belonging to any user the client knows about, whether that key is
//! currently *trusted*, meaning suitable for encrypting message payloads to
//! it or for attesting other keys.
//!
//! ## Two kinds of keys
//!
//! Users announce two kinds of signable keys. [`DeviceKey`]s belong to one
//! device each, carry a Curve25519 companion for session establishment and
//! must sign their own canonical form. [`CrossSigningKey`]s are long-lived
//! identity-layer keys carrying role labels (`master`, `self_signing`,
//! `user_signing`) and are anchored instead of self-signed. Both share the
//! [`SignableKey`] contract: signatures over them are computed against the
//! canonical JSON form of their public attributes ([`canonical`]), with
//! local trust flags and unsigned metadata excluded.
//!
//! ## Chains and anchors
//!
//! Trust decisions enter at the [`registry::TrustRegistry`], which holds
//! every known user's [`UserKeys`]. A key is trusted when the local user
//! verified it directly, or when a chain of valid signatures connects it to
//! an anchor, in particular the local user's own verified master key.
//! Signatures from third parties are ignored: only a key's owning user and
//! the local user may vouch for it, which keeps strangers from
//! bootstrapping trust. The chain walk resolves signers through
//! `(user id, key id)` lookups, expands every node at most once (cycles are
//! safe) and memoizes each verified edge on the signed key.
//!
//! ## Collaborators
//!
//! The Ed25519 primitive sits behind [`SignatureVerifier`] and may be
//! absent at runtime; persistence and the co-signing component sit behind
//! [`TrustStore`] and [`CrossSigner`]; the interactive verification
//! machinery sits behind [`verification::VerificationSessions`]. An
//! in-memory store is provided for tests and memory-only deployments.
pub mod canonical;
pub mod ed25519;
pub mod key;
pub mod registry;
pub mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod user_keys;
pub mod verification;

pub use ed25519::{Ed25519Verifier, SignatureVerifier, UnavailableVerifier, VerifyOutcome};
pub use key::{CrossSigningKey, DeviceKey, InvalidKeyError, KeyRef, KeyUsage, SignableKey};
pub use registry::{TrustError, TrustRegistry};
pub use store::{
    CrossSigner, CrossSigningKeyRecord, DeviceKeyRecord, MemoryTrustStore, RecordError,
    TrustStore, UserRecord,
};
pub use user_keys::{UserKeys, UserVerifiedStatus};
pub use verification::{VerificationError, VerificationSessions};
