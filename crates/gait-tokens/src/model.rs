// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability token shapes (§3 "Capability tokens", §4.G).

use chrono::{DateTime, Utc};
use gait_core::Signature;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A signed approval: one identity's sign-off binding an intent and policy
/// digest, optionally chained to a delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalToken {
    pub schema_id: String,
    pub schema_version: String,
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub intent_digest: String,
    pub policy_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_binding_digest: Option<String>,
    pub approver_identity: String,
    pub reason_code: String,
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_targets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// A signed grant of authority from one identity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationToken {
    pub schema_id: String,
    pub schema_version: String,
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub delegator_identity: String,
    pub delegate_identity: String,
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// A signed voice-commitment: binds a specific call turn to a bounded
/// commitment class so a spoken agreement can be verified after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SayToken {
    pub schema_id: String,
    pub schema_version: String,
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub commitment_class: String,
    pub call_id: String,
    pub turn_index: u32,
    pub call_seq: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount_minor: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount_minor: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}
