// SPDX-License-Identifier: MIT OR Apache-2.0

//! Detached Ed25519 signature verification.
//!
//! The cryptographic primitive is an external collaborator which may not be
//! available at runtime, so verification yields a three-valued outcome
//! instead of failing: callers decide per call-site what an unavailable
//! primitive means (a device self-signature is optimistically accepted, a
//! chain edge pessimistically rejected).
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

/// Result of checking one detached signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid,
    /// The primitive could not be instantiated.
    Unavailable,
}

/// Verifies detached Ed25519 signatures over canonical key material.
///
/// Public keys and signatures are hex-encoded strings as they appear in key
/// objects; malformed material counts as an invalid signature.
pub trait SignatureVerifier {
    fn verify_ed25519(&self, public_key: &str, message: &[u8], signature: &str) -> VerifyOutcome;
}

/// Verifier backed by `ed25519-dalek`.
///
/// A fresh `VerifyingKey` handle is built for every call and released when
/// the call returns; handles are never shared across a chain walk.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify_ed25519(&self, public_key: &str, message: &[u8], signature: &str) -> VerifyOutcome {
        let Some(public_key) = decode_verifying_key(public_key) else {
            return VerifyOutcome::Invalid;
        };
        let Some(signature) = decode_signature(signature) else {
            return VerifyOutcome::Invalid;
        };

        match public_key.verify(message, &signature) {
            Ok(()) => VerifyOutcome::Valid,
            Err(_) => VerifyOutcome::Invalid,
        }
    }
}

/// Stand-in for an absent primitive: every verification is `Unavailable`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableVerifier;

impl SignatureVerifier for UnavailableVerifier {
    fn verify_ed25519(&self, _public_key: &str, _message: &[u8], _signature: &str) -> VerifyOutcome {
        VerifyOutcome::Unavailable
    }
}

fn decode_verifying_key(public_key: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(public_key).ok()?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_signature(signature: &str) -> Option<Signature> {
    let bytes = hex::decode(signature).ok()?;
    let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::{Ed25519Verifier, SignatureVerifier, UnavailableVerifier, VerifyOutcome};

    #[test]
    fn verify() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        let signature = hex::encode(signing_key.sign(b"payload").to_bytes());

        assert_eq!(
            Ed25519Verifier.verify_ed25519(&public_key, b"payload", &signature),
            VerifyOutcome::Valid
        );
        assert_eq!(
            Ed25519Verifier.verify_ed25519(&public_key, b"tampered payload", &signature),
            VerifyOutcome::Invalid
        );
    }

    #[test]
    fn malformed_material_is_invalid() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        let signature = hex::encode(signing_key.sign(b"payload").to_bytes());

        // Not hex at all.
        assert_eq!(
            Ed25519Verifier.verify_ed25519("zz", b"payload", &signature),
            VerifyOutcome::Invalid
        );
        assert_eq!(
            Ed25519Verifier.verify_ed25519(&public_key, b"payload", "not hex"),
            VerifyOutcome::Invalid
        );

        // Right alphabet, wrong length.
        assert_eq!(
            Ed25519Verifier.verify_ed25519("00ff", b"payload", &signature),
            VerifyOutcome::Invalid
        );
        assert_eq!(
            Ed25519Verifier.verify_ed25519(&public_key, b"payload", "00ff"),
            VerifyOutcome::Invalid
        );
    }

    #[test]
    fn unavailable_primitive() {
        assert_eq!(
            UnavailableVerifier.verify_ed25519("00", b"payload", "00"),
            VerifyOutcome::Unavailable
        );
    }
}
