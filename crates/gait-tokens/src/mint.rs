// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minting of signed capability tokens (§4.G).

use crate::model::{ApprovalToken, DelegationToken, SayToken};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use ed25519_dalek::SigningKey;
use gait_core::{is_64_hex, schema_id, sha256_hex, SCHEMA_VERSION};
use gait_error::{GaitError, GaitResult, codes};
use gait_sign::sign_json;

/// Inputs to [`mint_approval_token`].
pub struct ApprovalTokenRequest {
    pub intent_digest: String,
    pub policy_digest: String,
    pub delegation_binding_digest: Option<String>,
    pub approver_identity: String,
    pub reason_code: String,
    pub scope: Vec<String>,
    pub max_targets: Option<u32>,
    pub max_ops: Option<u32>,
    pub ttl_seconds: i64,
}

/// Mints and signs an [`ApprovalToken`] (§4.G).
///
/// # Errors
///
/// Returns a `validation` error if `intent_digest`/`policy_digest` are not
/// 64-character lowercase hex, `ttl_seconds` is not positive, `scope` is
/// empty, or `approver_identity`/`reason_code` are blank.
#[tracing::instrument(skip(signing_key, req), fields(approver_identity = %req.approver_identity))]
pub fn mint_approval_token(
    signing_key: &SigningKey,
    key_id: &str,
    req: ApprovalTokenRequest,
    now: DateTime<Utc>,
) -> GaitResult<ApprovalToken> {
    if !is_64_hex(&req.intent_digest) {
        return Err(GaitError::validation(
            codes::INVALID_DIGEST_FORMAT,
            "intent_digest must be 64 lowercase hex characters",
        ));
    }
    if !is_64_hex(&req.policy_digest) {
        return Err(GaitError::validation(
            codes::INVALID_DIGEST_FORMAT,
            "policy_digest must be 64 lowercase hex characters",
        ));
    }
    if let Some(d) = &req.delegation_binding_digest {
        if !is_64_hex(d) {
            return Err(GaitError::validation(
                codes::INVALID_DIGEST_FORMAT,
                "delegation_binding_digest must be 64 lowercase hex characters",
            ));
        }
    }
    if req.ttl_seconds <= 0 {
        return Err(GaitError::validation(codes::INVALID_TTL, "ttl_seconds must be positive"));
    }
    if req.approver_identity.trim().is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "approver_identity is required"));
    }
    if req.reason_code.trim().is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "reason_code is required"));
    }
    if req.scope.is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "scope must not be empty"));
    }

    let expires_at = now + ChronoDuration::seconds(req.ttl_seconds);
    let token_id = token_id(&[
        "approval",
        &req.intent_digest,
        &req.policy_digest,
        req.delegation_binding_digest.as_deref().unwrap_or(""),
        &req.approver_identity,
    ], expires_at);

    let mut token = ApprovalToken {
        schema_id: schema_id::APPROVAL_TOKEN.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        token_id,
        created_at: now,
        expires_at,
        intent_digest: req.intent_digest,
        policy_digest: req.policy_digest,
        delegation_binding_digest: req.delegation_binding_digest,
        approver_identity: req.approver_identity,
        reason_code: req.reason_code,
        scope: req.scope,
        max_targets: req.max_targets,
        max_ops: req.max_ops,
        signature: None,
    };
    token.signature = Some(sign_json(signing_key, key_id, &token)?);
    tracing::debug!(token_id = %token.token_id, approver_identity = %token.approver_identity, "approval token minted");
    Ok(token)
}

/// Inputs to [`mint_delegation_token`].
pub struct DelegationTokenRequest {
    pub delegator_identity: String,
    pub delegate_identity: String,
    pub scope: Vec<String>,
    pub intent_digest: Option<String>,
    pub policy_digest: Option<String>,
    pub ttl_seconds: i64,
}

/// Mints and signs a [`DelegationToken`] (§4.G).
///
/// # Errors
///
/// Returns a `validation` error if either identity is blank, `scope` is
/// empty, `ttl_seconds` is not positive, or a supplied digest is not
/// 64-character lowercase hex.
#[tracing::instrument(skip(signing_key, req), fields(delegate_identity = %req.delegate_identity))]
pub fn mint_delegation_token(
    signing_key: &SigningKey,
    key_id: &str,
    req: DelegationTokenRequest,
    now: DateTime<Utc>,
) -> GaitResult<DelegationToken> {
    if req.delegator_identity.trim().is_empty() || req.delegate_identity.trim().is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "delegator_identity and delegate_identity are required"));
    }
    if req.scope.is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "scope must not be empty"));
    }
    if req.ttl_seconds <= 0 {
        return Err(GaitError::validation(codes::INVALID_TTL, "ttl_seconds must be positive"));
    }
    for digest in [&req.intent_digest, &req.policy_digest].into_iter().flatten() {
        if !is_64_hex(digest) {
            return Err(GaitError::validation(codes::INVALID_DIGEST_FORMAT, "digest must be 64 lowercase hex characters"));
        }
    }

    let expires_at = now + ChronoDuration::seconds(req.ttl_seconds);
    let token_id = token_id(&[
        "delegation",
        &req.delegator_identity,
        &req.delegate_identity,
        req.intent_digest.as_deref().unwrap_or(""),
        req.policy_digest.as_deref().unwrap_or(""),
    ], expires_at);

    let mut token = DelegationToken {
        schema_id: schema_id::DELEGATION_TOKEN.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        token_id,
        created_at: now,
        expires_at,
        delegator_identity: req.delegator_identity,
        delegate_identity: req.delegate_identity,
        scope: req.scope,
        intent_digest: req.intent_digest,
        policy_digest: req.policy_digest,
        signature: None,
    };
    token.signature = Some(sign_json(signing_key, key_id, &token)?);
    tracing::debug!(token_id = %token.token_id, delegate_identity = %token.delegate_identity, "delegation token minted");
    Ok(token)
}

/// Inputs to [`mint_say_token`].
pub struct SayTokenRequest {
    pub commitment_class: String,
    pub call_id: String,
    pub turn_index: u32,
    pub call_seq: u32,
    pub min_amount_minor: Option<u64>,
    pub max_amount_minor: Option<u64>,
    pub ttl_seconds: i64,
}

/// Mints and signs a [`SayToken`] (§4.G).
///
/// # Errors
///
/// Returns a `validation` error if `commitment_class`/`call_id` are blank,
/// `ttl_seconds` is not positive, or both amount bounds are present with
/// `min_amount_minor` exceeding `max_amount_minor`.
#[tracing::instrument(skip(signing_key, req), fields(call_id = %req.call_id))]
pub fn mint_say_token(
    signing_key: &SigningKey,
    key_id: &str,
    req: SayTokenRequest,
    now: DateTime<Utc>,
) -> GaitResult<SayToken> {
    if req.commitment_class.trim().is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "commitment_class is required"));
    }
    if req.call_id.trim().is_empty() {
        return Err(GaitError::validation(codes::MISSING_FIELD, "call_id is required"));
    }
    if req.ttl_seconds <= 0 {
        return Err(GaitError::validation(codes::INVALID_TTL, "ttl_seconds must be positive"));
    }
    if let (Some(min), Some(max)) = (req.min_amount_minor, req.max_amount_minor) {
        if min > max {
            return Err(GaitError::validation(
                codes::INVALID_AMOUNT_BOUNDS,
                "min_amount_minor must not exceed max_amount_minor",
            ));
        }
    }

    let expires_at = now + ChronoDuration::seconds(req.ttl_seconds);
    let token_id = token_id(&[
        "say",
        &req.commitment_class,
        &req.call_id,
        &req.turn_index.to_string(),
        &req.call_seq.to_string(),
    ], expires_at);

    let mut token = SayToken {
        schema_id: schema_id::SAY_TOKEN.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        token_id,
        created_at: now,
        expires_at,
        commitment_class: req.commitment_class,
        call_id: req.call_id,
        turn_index: req.turn_index,
        call_seq: req.call_seq,
        min_amount_minor: req.min_amount_minor,
        max_amount_minor: req.max_amount_minor,
        signature: None,
    };
    token.signature = Some(sign_json(signing_key, key_id, &token)?);
    tracing::debug!(token_id = %token.token_id, call_id = %token.call_id, "say token minted");
    Ok(token)
}

/// Derives a stable 24-character hex `token_id` from the token's immutable
/// fields and its `expires_at`, so two tokens minted with identical claims
/// but different lifetimes never collide.
fn token_id(immutable_fields: &[&str], expires_at: DateTime<Utc>) -> String {
    let joined = format!(
        "{}|{}",
        immutable_fields.join("|"),
        expires_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    );
    sha256_hex(joined.as_bytes())[..24].to_string()
}
