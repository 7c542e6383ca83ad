// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Unified error taxonomy for the gait trust-plane core.
//!
//! Every fallible component returns a [`GaitError`]. Each variant corresponds
//! to one of the error kinds in the component design, and carries a stable
//! machine-readable `code` string alongside a human message. Codes in the
//! [`codes`] module are part of the external contract and must not change
//! once published.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level grouping of [`GaitError`] variants, used for dashboards and
/// coarse-grained retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    SchemaInvalid,
    SignatureMissing,
    SignatureFailed,
    BindingMismatch,
    Expired,
    BudgetExceeded,
    StateContention,
    IoFailure,
    InvalidTransition,
    ApprovalRequired,
    IdentityRevoked,
    IdentityValidationMissing,
    EnvironmentMismatch,
    PolicyEvaluationRequired,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::SchemaInvalid => "schema_invalid",
            Self::SignatureMissing => "signature_missing",
            Self::SignatureFailed => "signature_failed",
            Self::BindingMismatch => "binding_mismatch",
            Self::Expired => "expired",
            Self::BudgetExceeded => "budget_exceeded",
            Self::StateContention => "state_contention",
            Self::IoFailure => "io_failure",
            Self::InvalidTransition => "invalid_transition",
            Self::ApprovalRequired => "approval_required",
            Self::IdentityRevoked => "identity_revoked",
            Self::IdentityValidationMissing => "identity_validation_missing",
            Self::EnvironmentMismatch => "environment_mismatch",
            Self::PolicyEvaluationRequired => "policy_evaluation_required",
        };
        write!(f, "{s}")
    }
}

/// The single error type returned by every fallible operation in the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum GaitError {
    #[error("validation failed ({code}): {message}")]
    Validation { code: String, message: String },

    #[error("schema invalid ({code}): {message}")]
    SchemaInvalid { code: String, message: String },

    #[error("signature missing ({code}): {message}")]
    SignatureMissing { code: String, message: String },

    #[error("signature verification failed ({code}): {message}")]
    SignatureFailed { code: String, message: String },

    #[error("binding mismatch ({code}): {message}")]
    BindingMismatch { code: String, message: String },

    #[error("expired ({code}): {message}")]
    Expired { code: String, message: String },

    #[error("budget exceeded ({code}): {message}")]
    BudgetExceeded { code: String, message: String },

    #[error("state contention ({code}): {message}")]
    StateContention { code: String, message: String },

    #[error("I/O failure ({code}): {message}")]
    IoFailure { code: String, message: String },

    #[error("invalid transition ({code}): {message}")]
    InvalidTransition { code: String, message: String },

    #[error("approval required ({code}): {message}")]
    ApprovalRequired { code: String, message: String },

    #[error("identity revoked ({code}): {message}")]
    IdentityRevoked { code: String, message: String },

    #[error("identity validation missing ({code}): {message}")]
    IdentityValidationMissing { code: String, message: String },

    #[error("environment mismatch ({code}): {message}")]
    EnvironmentMismatch { code: String, message: String },

    #[error("policy evaluation required ({code}): {message}")]
    PolicyEvaluationRequired { code: String, message: String },
}

macro_rules! ctor {
    ($name:ident, $variant:ident) => {
        #[must_use]
        pub fn $name(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self::$variant {
                code: code.into(),
                message: message.into(),
            }
        }
    };
}

impl GaitError {
    ctor!(validation, Validation);
    ctor!(schema_invalid, SchemaInvalid);
    ctor!(signature_missing, SignatureMissing);
    ctor!(signature_failed, SignatureFailed);
    ctor!(binding_mismatch, BindingMismatch);
    ctor!(expired, Expired);
    ctor!(budget_exceeded, BudgetExceeded);
    ctor!(state_contention, StateContention);
    ctor!(io_failure, IoFailure);
    ctor!(invalid_transition, InvalidTransition);
    ctor!(approval_required, ApprovalRequired);
    ctor!(identity_revoked, IdentityRevoked);
    ctor!(identity_validation_missing, IdentityValidationMissing);
    ctor!(environment_mismatch, EnvironmentMismatch);
    ctor!(policy_evaluation_required, PolicyEvaluationRequired);

    /// The coarse-grained category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::SchemaInvalid { .. } => ErrorCategory::SchemaInvalid,
            Self::SignatureMissing { .. } => ErrorCategory::SignatureMissing,
            Self::SignatureFailed { .. } => ErrorCategory::SignatureFailed,
            Self::BindingMismatch { .. } => ErrorCategory::BindingMismatch,
            Self::Expired { .. } => ErrorCategory::Expired,
            Self::BudgetExceeded { .. } => ErrorCategory::BudgetExceeded,
            Self::StateContention { .. } => ErrorCategory::StateContention,
            Self::IoFailure { .. } => ErrorCategory::IoFailure,
            Self::InvalidTransition { .. } => ErrorCategory::InvalidTransition,
            Self::ApprovalRequired { .. } => ErrorCategory::ApprovalRequired,
            Self::IdentityRevoked { .. } => ErrorCategory::IdentityRevoked,
            Self::IdentityValidationMissing { .. } => ErrorCategory::IdentityValidationMissing,
            Self::EnvironmentMismatch { .. } => ErrorCategory::EnvironmentMismatch,
            Self::PolicyEvaluationRequired { .. } => ErrorCategory::PolicyEvaluationRequired,
        }
    }

    /// The stable machine-readable code carried by this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. }
            | Self::SchemaInvalid { code, .. }
            | Self::SignatureMissing { code, .. }
            | Self::SignatureFailed { code, .. }
            | Self::BindingMismatch { code, .. }
            | Self::Expired { code, .. }
            | Self::BudgetExceeded { code, .. }
            | Self::StateContention { code, .. }
            | Self::IoFailure { code, .. }
            | Self::InvalidTransition { code, .. }
            | Self::ApprovalRequired { code, .. }
            | Self::IdentityRevoked { code, .. }
            | Self::IdentityValidationMissing { code, .. }
            | Self::EnvironmentMismatch { code, .. }
            | Self::PolicyEvaluationRequired { code, .. } => code,
        }
    }

    /// Whether a caller may retry the operation unchanged after a backoff.
    /// Only lock-acquisition timeouts are retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StateContention { .. })
    }
}

/// Convenience alias used throughout the core crates.
pub type GaitResult<T> = Result<T, GaitError>;

/// Stable string codes that are part of the external contract (§7, §6).
/// These are referenced both as [`GaitError`] codes and as free-standing
/// `reason_code`/`violation` entries in evaluation outcomes.
pub mod codes {
    // Fail-closed gate
    pub const FAIL_CLOSED_INTENT_INVALID: &str = "fail_closed_intent_invalid";
    pub const FAIL_CLOSED_MISSING_TARGETS: &str = "fail_closed_missing_targets";
    pub const FAIL_CLOSED_MISSING_ARG_PROVENANCE: &str = "fail_closed_missing_arg_provenance";
    pub const FAIL_CLOSED_MISSING_ENDPOINT_CLASS: &str = "fail_closed_missing_endpoint_class";
    pub const FAIL_CLOSED_MISSING_DELEGATION: &str = "fail_closed_missing_delegation";
    pub const FAIL_CLOSED_MISSING_CONTEXT_EVIDENCE: &str = "fail_closed_missing_context_evidence";
    pub const FAIL_CLOSED_ENDPOINT_CLASS_UNKNOWN: &str = "fail_closed_endpoint_class_unknown";

    // Script rollup
    pub const SCRIPT_MAX_STEPS_EXCEEDED: &str = "script_max_steps_exceeded";
    pub const SCRIPT_MIXED_RISK_BLOCKED: &str = "script_mixed_risk_blocked";

    // Constraint composition
    pub const DATAFLOW_TAINTED_SOURCE_BLOCKED: &str = "dataflow_tainted_source_blocked";
    pub const DATAFLOW_TAINTED_SOURCE_REQUIRES_APPROVAL: &str =
        "dataflow_tainted_source_requires_approval";
    pub const ENDPOINT_PATH_DENIED: &str = "endpoint_path_denied";
    pub const ENDPOINT_DOMAIN_DENIED: &str = "endpoint_domain_denied";
    pub const ENDPOINT_EGRESS_CLASS_DENIED: &str = "endpoint_egress_class_denied";
    pub const ENDPOINT_DESTRUCTIVE_ACTION_BLOCKED: &str = "endpoint_destructive_action_blocked";
    pub const CONTEXT_EVIDENCE_MISSING: &str = "context_evidence_missing";
    pub const CONTEXT_EVIDENCE_MODE_NOT_REQUIRED: &str = "context_evidence_mode_not_required";
    pub const CONTEXT_EVIDENCE_TOO_OLD: &str = "context_evidence_too_old";
    pub const PLAN_PHASE_NON_DESTRUCTIVE: &str = "plan_phase_non_destructive";
    pub const DESTRUCTIVE_APPLY_REQUIRES_APPROVAL: &str = "destructive_apply_requires_approval";
    pub const DEFAULT_VERDICT_APPLIED: &str = "default_verdict_applied";

    // Rate limiting
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const RATE_LIMIT_LOCK_TIMEOUT: &str = "rate_limit_lock_timeout";

    // Approval tokens
    pub const APPROVAL_TOKEN_EXPIRED: &str = "approval_token_expired";
    pub const APPROVAL_TOKEN_SCOPE_MISMATCH: &str = "approval_token_scope_mismatch";
    pub const APPROVAL_TOKEN_INTENT_MISMATCH: &str = "approval_token_intent_mismatch";
    pub const APPROVAL_TOKEN_POLICY_MISMATCH: &str = "approval_token_policy_mismatch";
    pub const APPROVAL_TOKEN_DELEGATION_MISMATCH: &str = "approval_token_delegation_mismatch";
    pub const APPROVAL_TOKEN_MAX_TARGETS_EXCEEDED: &str = "approval_token_max_targets_exceeded";
    pub const APPROVAL_TOKEN_MAX_OPS_EXCEEDED: &str = "approval_token_max_ops_exceeded";
    pub const APPROVAL_TOKEN_SIGNATURE_INVALID: &str = "approval_token_signature_invalid";

    // Delegation tokens
    pub const DELEGATION_TOKEN_EXPIRED: &str = "delegation_token_expired";
    pub const DELEGATION_TOKEN_SCOPE_MISMATCH: &str = "delegation_token_scope_mismatch";
    pub const DELEGATION_TOKEN_SIGNATURE_INVALID: &str = "delegation_token_signature_invalid";

    // Say tokens
    pub const SAY_TOKEN_EXPIRED: &str = "say_token_expired";
    pub const SAY_TOKEN_CALL_BINDING_MISMATCH: &str = "say_token_call_binding_mismatch";
    pub const SAY_TOKEN_COMMITMENT_CLASS_MISMATCH: &str = "say_token_commitment_class_mismatch";
    pub const SAY_TOKEN_SIGNATURE_INVALID: &str = "say_token_signature_invalid";

    // Approved-script registry
    pub const APPROVED_SCRIPT_NOT_FOUND: &str = "approved_script_not_found";
    pub const APPROVED_SCRIPT_EXPIRED: &str = "approved_script_expired";

    // Job runtime
    pub const INVALID_JOB_ID: &str = "invalid_job_id";
    pub const JOB_NOT_FOUND: &str = "job_not_found";
    pub const JOB_RESUME_MISSING_DECISION: &str = "job_resume_missing_decision";
    pub const RESUMED_WITH_POLICY_TRANSITION: &str = "resumed_with_policy_transition";
    pub const IDENTITY_BINDING_MISMATCH: &str = "identity_binding_mismatch";
    pub const IDENTITY_REVOKED: &str = "identity_revoked";
    pub const ENVIRONMENT_FINGERPRINT_MISMATCH: &str = "environment_fingerprint_mismatch";
    pub const ENVIRONMENT_FINGERPRINT_MISMATCH_WITH_OVERRIDE: &str =
        "environment_fingerprint_mismatch_with_env_override";
    pub const EMERGENCY_STOPPED: &str = "emergency_stopped";
    pub const DISPATCH_BLOCKED: &str = "dispatch_blocked";
    pub const JOB_STATE_LOCK_TIMEOUT: &str = "job_state_lock_timeout";
    pub const JOB_ALREADY_EXISTS: &str = "job_already_exists";
    pub const JOB_INVALID_TRANSITION: &str = "job_invalid_transition";
    pub const POLICY_DIGEST_REQUIRED: &str = "policy_digest_required";

    // Generic
    pub const ENCODING_ERROR: &str = "encoding_error";
    pub const TOOL_NAME_REQUIRED: &str = "tool_name_required";
    pub const MISSING_FIELD: &str = "missing_field";

    // Capability-token minting (§4.G)
    pub const INVALID_DIGEST_FORMAT: &str = "invalid_digest_format";
    pub const INVALID_TTL: &str = "invalid_ttl";
    pub const INVALID_AMOUNT_BOUNDS: &str = "invalid_amount_bounds";

    // Intent normalization (§4.C)
    pub const EMPTY_ARG_KEY: &str = "empty_arg_key";
    pub const INVALID_TARGET_KIND: &str = "invalid_target_kind";
    pub const INVALID_ENDPOINT_CLASS: &str = "invalid_endpoint_class";
    pub const INVALID_PROVENANCE_SOURCE: &str = "invalid_provenance_source";
    pub const INVALID_INTEGRITY_DIGEST: &str = "invalid_integrity_digest";
    pub const MISSING_CONTEXT_IDENTITY: &str = "missing_context_identity";
    pub const MISSING_CONTEXT_WORKSPACE: &str = "missing_context_workspace";
    pub const MISSING_CONTEXT_RISK_CLASS: &str = "missing_context_risk_class";
    pub const INVALID_RISK_CLASS: &str = "invalid_risk_class";
    pub const INVALID_PHASE: &str = "invalid_phase";
    pub const INVALID_CONTEXT_EVIDENCE_MODE: &str = "invalid_context_evidence_mode";
    pub const INVALID_CONTEXT_SET_DIGEST: &str = "invalid_context_set_digest";
    pub const MISSING_DELEGATION_REQUESTER: &str = "missing_delegation_requester";
    pub const MISSING_DELEGATION_LINK_IDENTITY: &str = "missing_delegation_link_identity";
    pub const INVALID_SCRIPT_STEP_COUNT: &str = "invalid_script_step_count";

    // Policy parsing (§4.D)
    pub const UNKNOWN_POLICY_FIELD: &str = "unknown_policy_field";
    pub const INVALID_DEFAULT_VERDICT: &str = "invalid_default_verdict";
    pub const DEFAULT_VERDICT_CONFLICT: &str = "default_verdict_conflict";
    pub const RULE_EFFECT_REQUIRED: &str = "rule_effect_required";
    pub const INVALID_RATE_LIMIT_SCOPE: &str = "invalid_rate_limit_scope";
    pub const INVALID_RATE_LIMIT_WINDOW: &str = "invalid_rate_limit_window";
    pub const INVALID_EGRESS_CLASS: &str = "invalid_egress_class";
    pub const SCHEMA_ID_MISMATCH: &str = "schema_id_mismatch";
    pub const SCHEMA_VERSION_MISMATCH: &str = "schema_version_mismatch";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_category_round_trip() {
        let err = GaitError::expired(codes::APPROVAL_TOKEN_EXPIRED, "token has expired");
        assert_eq!(err.code(), codes::APPROVAL_TOKEN_EXPIRED);
        assert_eq!(err.category(), ErrorCategory::Expired);
        assert!(!err.is_retryable());
    }

    #[test]
    fn state_contention_is_retryable() {
        let err = GaitError::state_contention(codes::JOB_STATE_LOCK_TIMEOUT, "lock held");
        assert!(err.is_retryable());
    }

    #[test]
    fn serde_round_trip() {
        let err = GaitError::binding_mismatch(codes::APPROVAL_TOKEN_INTENT_MISMATCH, "mismatch");
        let json = serde_json::to_string(&err).unwrap();
        let back: GaitError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
