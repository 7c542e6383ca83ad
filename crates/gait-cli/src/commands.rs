// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin argument-parsing shims over the library crates. No decision logic
//! lives here: every command loads its inputs, calls straight into
//! `gait-ratelimit`/`gait-tokens`/`gait-job`, and serializes the result.

use anyhow::{Context, Result};
use chrono::Utc;
use ed25519_dalek::{SigningKey, VerifyingKey};
use gait_intent::{IntentRequest, RawIntentRequest};
use gait_job::{CheckpointKind, ResumeRequest, SubmitRequest};
use gait_ratelimit::RateLimit;
use gait_tokens::{ApprovalCheck, ApprovalToken, ApprovalTokenRequest};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let bytes = std::fs::read(path).with_context(|| format!("reading signing key file {}", path.display()))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("signing key file must contain exactly 32 raw bytes"))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let bytes = std::fs::read(path).with_context(|| format!("reading verifying key file {}", path.display()))?;
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("verifying key file must contain exactly 32 raw bytes"))?;
    VerifyingKey::from_bytes(&raw).context("verifying key bytes are not a valid Ed25519 public key")
}

/// Builds a minimal [`IntentRequest`] from the flags `enforce-rate-limit`
/// takes, without going through a full tool-call payload.
fn minimal_intent(tool_name: &str, identity: &str) -> Result<IntentRequest> {
    let raw = RawIntentRequest {
        tool_name: tool_name.to_string(),
        args: json!({}),
        targets: vec![],
        arg_provenance: vec![],
        skill_provenance: None,
        delegation: None,
        context: gait_intent::RawIntentContext {
            identity: identity.to_string(),
            workspace: "/".to_string(),
            risk_class: "low".to_string(),
            phase: None,
            session_id: None,
            environment_fingerprint: None,
            context_set_digest: None,
            context_evidence_mode: None,
            credential_scopes: vec![],
            auth_context: None,
        },
        script: None,
    };
    gait_intent::normalize_intent(raw).map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))
}

/// `enforce-rate-limit`.
pub fn enforce_rate_limit(
    state_path: PathBuf,
    scope: String,
    window: String,
    limit: u64,
    tool_name: String,
    identity: String,
) -> Result<Value> {
    let intent = minimal_intent(&tool_name, &identity)?;
    let limit = RateLimit { scope, window, limit };
    let decision = gait_ratelimit::enforce(&state_path, &limit, &intent, Utc::now())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(decision)?)
}

/// `token mint`.
#[allow(clippy::too_many_arguments)]
pub fn mint_approval_token(
    key_file: PathBuf,
    key_id: String,
    intent_digest: String,
    policy_digest: String,
    delegation_binding_digest: Option<String>,
    approver_identity: String,
    reason_code: String,
    scope: Vec<String>,
    ttl_seconds: i64,
    max_targets: Option<u32>,
    max_ops: Option<u32>,
) -> Result<Value> {
    let signing_key = load_signing_key(&key_file)?;
    let token = gait_tokens::mint_approval_token(
        &signing_key,
        &key_id,
        ApprovalTokenRequest {
            intent_digest,
            policy_digest,
            delegation_binding_digest,
            approver_identity,
            reason_code,
            scope,
            max_targets,
            max_ops,
            ttl_seconds,
        },
        Utc::now(),
    )
    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(token)?)
}

/// `token validate`.
#[allow(clippy::too_many_arguments)]
pub fn validate_approval_token(
    pubkey_file: PathBuf,
    token_file: PathBuf,
    intent_digest: String,
    policy_digest: String,
    delegation_binding_digest: Option<String>,
    required_scope: Vec<String>,
    target_count: u32,
    op_count: u32,
) -> Result<Value> {
    let verifying_key = load_verifying_key(&pubkey_file)?;
    let contents = std::fs::read_to_string(&token_file)
        .with_context(|| format!("reading token file {}", token_file.display()))?;
    let token: ApprovalToken = serde_json::from_str(&contents).context("parsing approval token")?;
    let check = ApprovalCheck {
        intent_digest: &intent_digest,
        policy_digest: &policy_digest,
        delegation_binding_digest: delegation_binding_digest.as_deref(),
        required_scope: &required_scope,
        target_count,
        op_count,
    };
    match gait_tokens::validate_approval_token(&verifying_key, &token, &check, Utc::now()) {
        Ok(()) => Ok(json!({ "valid": true })),
        Err(e) => Ok(json!({ "valid": false, "code": e.code(), "message": e.to_string() })),
    }
}

/// `job submit`.
#[allow(clippy::too_many_arguments)]
pub fn job_submit(
    root: PathBuf,
    job_id: String,
    control_boundary: String,
    fail_closed: bool,
    default_privacy: String,
    environment_fingerprint: Option<String>,
    policy_digest: Option<String>,
    policy_ref: Option<String>,
    identity: Option<String>,
) -> Result<Value> {
    let state = gait_job::submit(
        &root,
        SubmitRequest {
            job_id,
            control_boundary,
            fail_closed,
            default_privacy,
            environment_fingerprint,
            policy_digest,
            policy_ref,
            identity,
        },
        Utc::now(),
    )
    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job status`.
pub fn job_status(root: PathBuf, job_id: String) -> Result<Value> {
    let status = gait_job::status(&root, &job_id).map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(json!({ "status": status.as_str() }))
}

/// `job inspect`.
pub fn job_inspect(root: PathBuf, job_id: String) -> Result<Value> {
    let state = gait_job::inspect(&root, &job_id).map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job add-checkpoint`.
pub fn job_add_checkpoint(
    root: PathBuf,
    job_id: String,
    checkpoint_id: String,
    kind: CheckpointKind,
    label: Option<String>,
) -> Result<Value> {
    let state = gait_job::add_checkpoint(&root, &job_id, checkpoint_id, kind, label, Utc::now())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job pause`.
pub fn job_pause(root: PathBuf, job_id: String) -> Result<Value> {
    let state = gait_job::pause(&root, &job_id, Utc::now()).map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job cancel`.
pub fn job_cancel(root: PathBuf, job_id: String, reason: Option<String>) -> Result<Value> {
    let state =
        gait_job::cancel(&root, &job_id, reason, Utc::now()).map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job approve`.
pub fn job_approve(root: PathBuf, job_id: String, checkpoint_id: String, approver_identity: String) -> Result<Value> {
    let state = gait_job::approve(&root, &job_id, &checkpoint_id, approver_identity, Utc::now())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job resume`.
#[allow(clippy::too_many_arguments)]
pub fn job_resume(
    root: PathBuf,
    job_id: String,
    policy_digest: Option<String>,
    identity: Option<String>,
    identity_revoked: bool,
    environment_fingerprint: Option<String>,
    allow_environment_mismatch: bool,
) -> Result<Value> {
    let state = gait_job::resume(
        &root,
        &job_id,
        ResumeRequest {
            policy_digest,
            identity,
            identity_revoked,
            environment_fingerprint,
            allow_environment_mismatch,
        },
        Utc::now(),
    )
    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job emergency-stop`.
pub fn job_emergency_stop(root: PathBuf, job_id: String, reason: Option<String>) -> Result<Value> {
    let state = gait_job::emergency_stop(&root, &job_id, reason, Utc::now())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}

/// `job record-blocked-dispatch`.
pub fn job_record_blocked_dispatch(root: PathBuf, job_id: String, tool_name: String) -> Result<Value> {
    let state = gait_job::record_blocked_dispatch(&root, &job_id, &tool_name, Utc::now())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;
    Ok(serde_json::to_value(state)?)
}
