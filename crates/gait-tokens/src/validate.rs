// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validation of signed capability tokens (§4.G).
//!
//! Each `validate_*` function verifies the signature first, then walks an
//! ordered list of binding checks, returning the first violation found.
//! Scope checks treat a rule scope entry of `"*"` as matching any requested
//! scope entry.

use crate::model::{ApprovalToken, DelegationToken, SayToken};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use gait_error::{GaitError, GaitResult, codes};
use gait_sign::verify_json;

fn scope_satisfied(granted: &[String], required: &[String]) -> bool {
    required
        .iter()
        .all(|need| granted.iter().any(|have| have == "*" || have == need))
}

/// Parameters an [`ApprovalToken`] is checked against.
pub struct ApprovalCheck<'a> {
    pub intent_digest: &'a str,
    pub policy_digest: &'a str,
    pub delegation_binding_digest: Option<&'a str>,
    pub required_scope: &'a [String],
    pub target_count: u32,
    pub op_count: u32,
}

/// Verifies `token`'s signature and bindings against `check` as of `now`
/// (§4.G).
///
/// # Errors
///
/// Returns `approval_token_signature_invalid` if the signature is missing or
/// does not verify, `approval_token_intent_mismatch`/`_policy_mismatch`/
/// `_delegation_mismatch` on a digest mismatch, `approval_token_expired` if
/// `now` is past `expires_at`, `approval_token_scope_mismatch` if
/// `required_scope` is not covered, or `approval_token_max_targets_exceeded`/
/// `_max_ops_exceeded` if the counts exceed the token's limits.
#[tracing::instrument(skip(verifying_key, token, check), fields(token_id = %token.token_id))]
pub fn validate_approval_token(
    verifying_key: &VerifyingKey,
    token: &ApprovalToken,
    check: &ApprovalCheck<'_>,
    now: DateTime<Utc>,
) -> GaitResult<()> {
    verify_signature(verifying_key, &token.signature, token, codes::APPROVAL_TOKEN_SIGNATURE_INVALID)?;

    if token.intent_digest != check.intent_digest {
        return Err(GaitError::binding_mismatch(
            codes::APPROVAL_TOKEN_INTENT_MISMATCH,
            "approval token intent_digest does not match the intent under evaluation",
        ));
    }
    if token.policy_digest != check.policy_digest {
        return Err(GaitError::binding_mismatch(
            codes::APPROVAL_TOKEN_POLICY_MISMATCH,
            "approval token policy_digest does not match the active policy",
        ));
    }
    if let Some(expected) = check.delegation_binding_digest {
        if token.delegation_binding_digest.as_deref() != Some(expected) {
            return Err(GaitError::binding_mismatch(
                codes::APPROVAL_TOKEN_DELEGATION_MISMATCH,
                "approval token delegation_binding_digest does not match the active delegation",
            ));
        }
    }
    if now > token.expires_at {
        return Err(GaitError::expired(codes::APPROVAL_TOKEN_EXPIRED, "approval token has expired"));
    }
    if !scope_satisfied(&token.scope, check.required_scope) {
        return Err(GaitError::binding_mismatch(
            codes::APPROVAL_TOKEN_SCOPE_MISMATCH,
            "approval token scope does not cover the required scope",
        ));
    }
    if let Some(max_targets) = token.max_targets {
        if check.target_count > max_targets {
            return Err(GaitError::validation(
                codes::APPROVAL_TOKEN_MAX_TARGETS_EXCEEDED,
                format!("target_count {} exceeds max_targets {max_targets}", check.target_count),
            ));
        }
    }
    if let Some(max_ops) = token.max_ops {
        if check.op_count > max_ops {
            return Err(GaitError::validation(
                codes::APPROVAL_TOKEN_MAX_OPS_EXCEEDED,
                format!("op_count {} exceeds max_ops {max_ops}", check.op_count),
            ));
        }
    }
    tracing::debug!(token_id = %token.token_id, "approval token validated");
    Ok(())
}

/// Verifies `token`'s signature, expiry, and scope coverage (§4.G).
///
/// `intent_digest`/`policy_digest` carried on the token are informational
/// audit linkage, not enforced bindings: delegation authority is scoped by
/// `scope` and bounded by `expires_at` alone.
///
/// # Errors
///
/// Returns `delegation_token_signature_invalid` if the signature does not
/// verify, `delegation_token_expired` if `now` is past `expires_at`, or
/// `delegation_token_scope_mismatch` if `required_scope` is not covered.
#[tracing::instrument(skip(verifying_key, token, required_scope), fields(token_id = %token.token_id))]
pub fn validate_delegation_token(
    verifying_key: &VerifyingKey,
    token: &DelegationToken,
    required_scope: &[String],
    now: DateTime<Utc>,
) -> GaitResult<()> {
    verify_signature(verifying_key, &token.signature, token, codes::DELEGATION_TOKEN_SIGNATURE_INVALID)?;

    if now > token.expires_at {
        return Err(GaitError::expired(codes::DELEGATION_TOKEN_EXPIRED, "delegation token has expired"));
    }
    if !scope_satisfied(&token.scope, required_scope) {
        return Err(GaitError::binding_mismatch(
            codes::DELEGATION_TOKEN_SCOPE_MISMATCH,
            "delegation token scope does not cover the required scope",
        ));
    }
    tracing::debug!(token_id = %token.token_id, "delegation token validated");
    Ok(())
}

/// Parameters a [`SayToken`] is checked against.
pub struct SayCheck<'a> {
    pub call_id: &'a str,
    pub turn_index: u32,
    pub call_seq: u32,
    pub commitment_class: &'a str,
}

/// Verifies `token`'s signature, call binding, commitment class, and expiry
/// (§4.G).
///
/// # Errors
///
/// Returns `say_token_signature_invalid` if the signature does not verify,
/// `say_token_call_binding_mismatch` if `call_id`/`turn_index`/`call_seq`
/// differ, `say_token_commitment_class_mismatch` if the commitment class
/// differs, or `say_token_expired` if `now` is past `expires_at`.
#[tracing::instrument(skip(verifying_key, token, check), fields(token_id = %token.token_id))]
pub fn validate_say_token(
    verifying_key: &VerifyingKey,
    token: &SayToken,
    check: &SayCheck<'_>,
    now: DateTime<Utc>,
) -> GaitResult<()> {
    verify_signature(verifying_key, &token.signature, token, codes::SAY_TOKEN_SIGNATURE_INVALID)?;

    if token.call_id != check.call_id || token.turn_index != check.turn_index || token.call_seq != check.call_seq {
        return Err(GaitError::binding_mismatch(
            codes::SAY_TOKEN_CALL_BINDING_MISMATCH,
            "say token is not bound to this call turn",
        ));
    }
    if token.commitment_class != check.commitment_class {
        return Err(GaitError::binding_mismatch(
            codes::SAY_TOKEN_COMMITMENT_CLASS_MISMATCH,
            "say token commitment_class does not match the commitment under evaluation",
        ));
    }
    if now > token.expires_at {
        return Err(GaitError::expired(codes::SAY_TOKEN_EXPIRED, "say token has expired"));
    }
    tracing::debug!(token_id = %token.token_id, "say token validated");
    Ok(())
}

fn verify_signature<T: serde::Serialize>(
    verifying_key: &VerifyingKey,
    signature: &Option<gait_core::Signature>,
    token: &T,
    invalid_code: &'static str,
) -> GaitResult<()> {
    let Some(signature) = signature else {
        tracing::warn!(code = invalid_code, "token carries no signature");
        return Err(GaitError::signature_missing(invalid_code, "token carries no signature"));
    };
    if !verify_json(verifying_key, signature, token)? {
        tracing::warn!(code = invalid_code, "token signature does not verify");
        return Err(GaitError::signature_failed(invalid_code, "token signature does not verify"));
    }
    Ok(())
}
