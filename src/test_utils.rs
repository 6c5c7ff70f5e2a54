// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic fixtures for tests against the trust core.
use ed25519_dalek::{Signer, SigningKey};

use crate::key::{CrossSigningKey, DeviceKey, KeyUsage, SignableKey};

/// Deterministic signing key for tests.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Hex form of the public half, as it appears in key objects.
pub fn public_key_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().to_bytes())
}

/// A device key with proper Ed25519 material and a valid self-signature,
/// together with the key that controls it.
pub fn device_key(user_id: &str, device_id: &str, seed: u8) -> (DeviceKey, SigningKey) {
    let signing_key = self::signing_key(seed);

    let mut device = DeviceKey {
        user_id: user_id.to_owned(),
        device_id: Some(device_id.to_owned()),
        algorithms: vec![
            "m.olm.v1.curve25519-aes-sha2".to_owned(),
            "m.megolm.v1.aes-sha2".to_owned(),
        ],
        ..Default::default()
    };
    device
        .keys
        .insert(format!("ed25519:{device_id}"), public_key_hex(&signing_key));
    // The Curve25519 companion is never parsed by the trust core; any
    // material of the right shape will do for fixtures.
    device
        .keys
        .insert(format!("curve25519:{device_id}"), hex::encode([seed; 32]));

    sign_device_key(
        &mut device,
        user_id,
        &format!("ed25519:{device_id}"),
        &signing_key,
    );
    (device, signing_key)
}

/// A cross-signing key carrying the given roles, together with the key that
/// controls it.
pub fn cross_signing_key(
    user_id: &str,
    usage: &[KeyUsage],
    seed: u8,
) -> (CrossSigningKey, SigningKey) {
    let signing_key = self::signing_key(seed);
    let public_key = public_key_hex(&signing_key);

    let mut key = CrossSigningKey {
        user_id: user_id.to_owned(),
        usage: usage.to_vec(),
        ..Default::default()
    };
    key.keys
        .insert(format!("ed25519:{public_key}"), public_key);

    (key, signing_key)
}

/// Attaches `signer`'s signature over the device's canonical form.
pub fn sign_device_key(
    device: &mut DeviceKey,
    signer_user_id: &str,
    signer_key_id: &str,
    signer: &SigningKey,
) {
    let message = device
        .signing_bytes()
        .expect("canonical encoding of device fixture");
    let signature = hex::encode(signer.sign(&message).to_bytes());
    device
        .signatures
        .entry(signer_user_id.to_owned())
        .or_default()
        .insert(signer_key_id.to_owned(), signature);
}

/// Attaches `signer`'s signature over the cross-signing key's canonical
/// form.
pub fn sign_cross_signing_key(
    key: &mut CrossSigningKey,
    signer_user_id: &str,
    signer_key_id: &str,
    signer: &SigningKey,
) {
    let message = key
        .signing_bytes()
        .expect("canonical encoding of cross-signing fixture");
    let signature = hex::encode(signer.sign(&message).to_bytes());
    key.signatures
        .entry(signer_user_id.to_owned())
        .or_default()
        .insert(signer_key_id.to_owned(), signature);
}
