// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Ed25519 signing adapter (§4.B).
//!
//! `sign_json`/`verify_json` canonicalize a value with any `signature` field
//! stripped, then sign or verify the canonical bytes. Signing and
//! verification always agree bit-for-bit on the signable payload.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use gait_core::{Signature, canonical_json_value, sha256_hex, without_field};
use gait_error::{GaitError, GaitResult, codes};
use serde::Serialize;

const ALG: &str = "ed25519";

/// Canonicalizes `value` with its `signature` field (if any) stripped, and
/// signs the resulting bytes with `signing_key`.
///
/// # Errors
///
/// Returns a `validation` error tagged `encoding_error` if `value` is not
/// JSON-representable.
pub fn sign_json<T: Serialize>(
    signing_key: &SigningKey,
    key_id: &str,
    value: &T,
) -> GaitResult<Signature> {
    let canonical = signable_bytes(value)?;
    let signed_digest = sha256_hex(canonical.as_bytes());
    let sig = signing_key.sign(canonical.as_bytes());
    Ok(Signature {
        alg: ALG.to_string(),
        key_id: key_id.to_string(),
        sig: BASE64.encode(sig.to_bytes()),
        signed_digest,
    })
}

/// Verifies that `signature` is a valid Ed25519 signature by `verifying_key`
/// over the canonicalization of `value` with `signature` stripped.
///
/// Returns `Ok(false)` (rather than an error) for any mismatch that is part
/// of normal verification — wrong digest, malformed base64, bad signature
/// bytes, cryptographic failure — since "does this verify" is the whole
/// contract. Only a non-`"ed25519"` algorithm or an unencodable `value` is
/// treated as a caller error.
///
/// # Errors
///
/// Returns a `validation` error tagged `encoding_error` if `value` is not
/// JSON-representable, or a `schema_invalid` error if `signature.alg` is not
/// `"ed25519"`.
pub fn verify_json<T: Serialize>(
    verifying_key: &VerifyingKey,
    signature: &Signature,
    value: &T,
) -> GaitResult<bool> {
    if signature.alg != ALG {
        return Err(GaitError::schema_invalid(
            codes::ENCODING_ERROR,
            format!("unsupported signature algorithm: {}", signature.alg),
        ));
    }

    let canonical = signable_bytes(value)?;
    let signed_digest = sha256_hex(canonical.as_bytes());
    if signed_digest != signature.signed_digest {
        return Ok(false);
    }

    let Ok(sig_bytes) = BASE64.decode(&signature.sig) else {
        return Ok(false);
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return Ok(false);
    };
    let sig = DalekSignature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(canonical.as_bytes(), &sig).is_ok())
}

fn signable_bytes<T: Serialize>(value: &T) -> GaitResult<String> {
    let v = serde_json::to_value(value).map_err(|e| {
        GaitError::validation(codes::ENCODING_ERROR, format!("not json-representable: {e}"))
    })?;
    let stripped = without_field(&v, "signature");
    canonical_json_value(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn keypair() -> (SigningKey, VerifyingKey) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        (signing_key, verifying_key)
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (sk, vk) = keypair();
        let payload = json!({"intent_digest": "a".repeat(64), "scope": ["tool:read"]});
        let sig = sign_json(&sk, "key-1", &payload).unwrap();
        assert_eq!(sig.alg, "ed25519");
        assert!(verify_json(&vk, &sig, &payload).unwrap());
    }

    #[test]
    fn mutating_a_signed_field_breaks_verification() {
        let (sk, vk) = keypair();
        let mut payload = json!({"intent_digest": "a".repeat(64)});
        let sig = sign_json(&sk, "key-1", &payload).unwrap();
        payload["intent_digest"] = json!("b".repeat(64));
        assert!(!verify_json(&vk, &sig, &payload).unwrap());
    }

    #[test]
    fn mutating_the_signature_breaks_verification() {
        let (sk, vk) = keypair();
        let payload = json!({"intent_digest": "a".repeat(64)});
        let mut sig = sign_json(&sk, "key-1", &payload).unwrap();
        sig.sig = BASE64.encode([0u8; 64]);
        assert!(!verify_json(&vk, &sig, &payload).unwrap());
    }

    #[test]
    fn signature_field_on_the_payload_is_ignored() {
        let (sk, vk) = keypair();
        let payload_without = json!({"intent_digest": "a".repeat(64)});
        let sig = sign_json(&sk, "key-1", &payload_without).unwrap();

        let mut payload_with = payload_without.clone();
        payload_with["signature"] = serde_json::to_value(&sig).unwrap();
        assert!(verify_json(&vk, &sig, &payload_with).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (sk, _vk) = keypair();
        let (_other_sk, other_vk) = keypair();
        let payload = json!({"intent_digest": "a".repeat(64)});
        let sig = sign_json(&sk, "key-1", &payload).unwrap();
        assert!(!verify_json(&other_vk, &sig, &payload).unwrap());
    }
}
