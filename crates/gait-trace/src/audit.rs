// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic approval/delegation audit records (§4.I).

use crate::model::{
    ApprovalAuditRecord, ApprovalEntry, DelegationAuditRecord, DelegationEntry, Edge, EntityRef,
    RelationshipEnvelope,
};
use gait_core::schema_id;
use gait_intent::IntentRequest;

/// Builds a deterministic [`ApprovalAuditRecord`] from a list of
/// `(approver_identity, token_id, scope, valid)` entries, sorted by
/// `identity/token_id/scope join` (§4.I).
#[must_use]
pub fn build_approval_audit_record(intent: &IntentRequest, policy_digest: &str, mut entries: Vec<ApprovalEntry>) -> ApprovalAuditRecord {
    entries.sort_by(|a, b| sort_key(&a.approver_identity, &a.token_id, &a.scope).cmp(&sort_key(&b.approver_identity, &b.token_id, &b.scope)));

    let valid_count = entries.iter().filter(|e| e.valid).count() as u32;
    ApprovalAuditRecord {
        schema_id: schema_id::APPROVAL_AUDIT_RECORD.to_string(),
        schema_version: gait_core::SCHEMA_VERSION.to_string(),
        approved: valid_count > 0,
        relationships: relationship_envelope(intent, policy_digest),
        entries,
        valid_count,
    }
}

/// Builds a deterministic [`DelegationAuditRecord`] from a list of
/// `(delegator_identity, delegate_identity, token_id, scope, valid)`
/// entries, sorted by `identity/token_id/scope join` (§4.I).
#[must_use]
pub fn build_delegation_audit_record(intent: &IntentRequest, policy_digest: &str, mut entries: Vec<DelegationEntry>) -> DelegationAuditRecord {
    entries.sort_by(|a, b| {
        sort_key(&a.delegate_identity, &a.token_id, &a.scope).cmp(&sort_key(&b.delegate_identity, &b.token_id, &b.scope))
    });

    let valid_count = entries.iter().filter(|e| e.valid).count() as u32;
    DelegationAuditRecord {
        schema_id: schema_id::DELEGATION_AUDIT_RECORD.to_string(),
        schema_version: gait_core::SCHEMA_VERSION.to_string(),
        delegated: valid_count > 0,
        relationships: relationship_envelope(intent, policy_digest),
        entries,
        valid_count,
    }
}

fn sort_key(identity: &str, token_id: &str, scope: &[String]) -> String {
    format!("{identity}|{token_id}|{}", scope.join(","))
}

fn relationship_envelope(intent: &IntentRequest, policy_digest: &str) -> RelationshipEnvelope {
    let agent = intent.context.identity.clone();
    let tool = intent.tool_name.clone();
    RelationshipEnvelope {
        parent_ref: intent.context.session_id.clone(),
        entity_refs: vec![
            EntityRef {
                kind: "agent".to_string(),
                id: agent.clone(),
            },
            EntityRef {
                kind: "tool".to_string(),
                id: tool.clone(),
            },
            EntityRef {
                kind: "policy".to_string(),
                id: policy_digest.to_string(),
            },
        ],
        agent_chain: Vec::new(),
        edges: vec![Edge {
            from: agent,
            to: tool,
            relation: "calls".to_string(),
        }],
    }
}
