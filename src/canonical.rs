// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical JSON encoding of signable key material.
//!
//! Signatures over key objects are computed and verified against one exact
//! byte sequence: the key's public attributes serialized as canonical JSON
//! (sorted object keys, no insignificant whitespace, minimally encoded
//! integers, UTF-8). Local trust flags and unsigned metadata must never
//! perturb that sequence, so they are removed before encoding.
use serde_json::Value;
use thiserror::Error;

/// Top-level fields excluded from the signing input.
///
/// `unsigned` is excluded by definition; `verified` and `blocked` are local
/// flags which legacy serializations sometimes embed; `signatures` is what
/// is being computed.
const LOCAL_FIELDS: [&str; 4] = ["verified", "blocked", "unsigned", "signatures"];

/// Returns the canonical byte sequence over which signatures of the given
/// key object are computed.
///
/// Sorted key order comes from `serde_json`'s default map representation;
/// the `preserve_order` feature must stay disabled.
pub fn signing_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let Value::Object(fields) = value else {
        return Err(CanonicalError::NotAnObject);
    };

    let mut fields = fields.clone();
    for field in LOCAL_FIELDS {
        fields.remove(field);
    }

    let value = Value::Object(fields);
    check_numbers(&value)?;

    Ok(serde_json::to_vec(&value)?)
}

fn check_numbers(value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Number(number) if !number.is_i64() && !number.is_u64() => {
            Err(CanonicalError::NonIntegerNumber)
        }
        Value::Array(items) => items.iter().try_for_each(check_numbers),
        Value::Object(fields) => fields.values().try_for_each(check_numbers),
        _ => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("signable content needs to be a JSON object")]
    NotAnObject,

    #[error("canonical JSON does not permit non-integer numbers")]
    NonIntegerNumber,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::signing_bytes;

    #[test]
    fn sorted_and_compact() {
        let value = json!({
            "user_id": "@alice:example.org",
            "keys": {
                "ed25519:DEVICE": "00ff",
            },
            "algorithms": ["m.megolm.v1.aes-sha2"],
            "device_id": "DEVICE",
        });

        assert_eq!(
            signing_bytes(&value).unwrap(),
            br#"{"algorithms":["m.megolm.v1.aes-sha2"],"device_id":"DEVICE","keys":{"ed25519:DEVICE":"00ff"},"user_id":"@alice:example.org"}"#
        );
    }

    #[test]
    fn local_fields_never_perturb_signing() {
        let bare = json!({
            "device_id": "DEVICE",
            "user_id": "@alice:example.org",
        });
        let decorated = json!({
            "device_id": "DEVICE",
            "user_id": "@alice:example.org",
            "verified": true,
            "blocked": false,
            "unsigned": { "device_display_name": "laptop" },
            "signatures": {
                "@alice:example.org": { "ed25519:DEVICE": "ff00" },
            },
        });

        assert_eq!(
            signing_bytes(&bare).unwrap(),
            signing_bytes(&decorated).unwrap()
        );
    }

    #[test]
    fn rejects_non_objects() {
        assert!(signing_bytes(&json!("just a string")).is_err());
        assert!(signing_bytes(&json!(["a", "list"])).is_err());
    }

    #[test]
    fn rejects_floats() {
        assert!(signing_bytes(&json!({ "last_active": 1.5 })).is_err());
        assert!(signing_bytes(&json!({ "nested": { "deep": [0.25] } })).is_err());

        // Integers are fine, wherever they are.
        assert!(signing_bytes(&json!({ "nested": { "deep": [25, -3] } })).is_ok());
    }
}
