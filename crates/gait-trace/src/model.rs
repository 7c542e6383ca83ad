// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trace and audit record shapes (§4.I).

use chrono::{DateTime, Utc};
use gait_core::Signature;
use gait_policy::Verdict;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A typed reference to an entity involved in a decision (`trace`, `tool`,
/// `agent`, `policy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

/// A directed relationship between two entity ids (`calls`, `governed_by`,
/// `delegates_to`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub relation: String,
}

/// The relationship graph a trace or audit record is embedded in, derived
/// from the intent's context and delegation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RelationshipEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,
    #[serde(default)]
    pub entity_refs: Vec<EntityRef>,
    #[serde(default)]
    pub agent_chain: Vec<String>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A signed record of a single gate decision (§4.I).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceRecord {
    pub schema_id: String,
    pub schema_version: String,
    pub trace_id: String,
    pub event_id: String,
    pub observed_at: DateTime<Utc>,
    pub policy_digest: String,
    pub intent_digest: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_hash: Option<String>,
    #[serde(default)]
    pub step_verdicts: Vec<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_provenance_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_risk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_approved_pattern_id: Option<String>,
    #[serde(default)]
    pub matched_rule_ids: Vec<String>,
    pub relationships: RelationshipEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// A single approval entry folded into an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalEntry {
    pub approver_identity: String,
    pub token_id: String,
    pub scope: Vec<String>,
    pub valid: bool,
}

/// Deterministic audit summary over a set of approval-token entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalAuditRecord {
    pub schema_id: String,
    pub schema_version: String,
    pub entries: Vec<ApprovalEntry>,
    pub valid_count: u32,
    pub approved: bool,
    pub relationships: RelationshipEnvelope,
}

/// A single delegation entry folded into an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationEntry {
    pub delegator_identity: String,
    pub delegate_identity: String,
    pub token_id: String,
    pub scope: Vec<String>,
    pub valid: bool,
}

/// Deterministic audit summary over a set of delegation-token entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationAuditRecord {
    pub schema_id: String,
    pub schema_version: String,
    pub entries: Vec<DelegationEntry>,
    pub valid_count: u32,
    pub delegated: bool,
    pub relationships: RelationshipEnvelope,
}
