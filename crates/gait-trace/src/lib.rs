// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Signed decision traces and deterministic approval/delegation audit
//! records (§4.I).
//!
//! [`emit_signed_trace`] is the sole stateful entry point; everything else
//! in this crate is a pure builder. Use [`gait_core::canonical_json`] to
//! serialize a [`ApprovalAuditRecord`]/[`DelegationAuditRecord`] with
//! canonical indentation before persisting or hashing it.

mod audit;
mod emit;
mod model;

pub use audit::{build_approval_audit_record, build_delegation_audit_record};
pub use emit::{TraceOpts, emit_signed_trace};
pub use model::{
    ApprovalAuditRecord, ApprovalEntry, DelegationAuditRecord, DelegationEntry, Edge, EntityRef,
    RelationshipEnvelope, TraceRecord,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ed25519_dalek::SigningKey;
    use gait_intent::{DelegationChainLink, RawArgProvenance, RawDelegation, RawIntentContext, RawIntentRequest, RawTarget};
    use gait_policy::{EvalOutcome, Policy, Verdict};
    use rand::rngs::OsRng;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn now() -> DateTime<Utc> {
        "2026-03-01T00:00:00Z".parse().unwrap()
    }

    fn minimal_policy() -> Policy {
        gait_policy::parse_policy(serde_json::json!({
            "default_verdict": "allow",
            "rules": [],
        }))
        .unwrap()
    }

    fn intent_with_delegation() -> IntentRequest {
        gait_intent::normalize_intent(RawIntentRequest {
            tool_name: "fs.write".to_string(),
            args: serde_json::json!({"path": "/tmp/a"}),
            targets: Vec::<RawTarget>::new(),
            arg_provenance: Vec::<RawArgProvenance>::new(),
            skill_provenance: None,
            delegation: Some(RawDelegation {
                requester: "user:alice".to_string(),
                chain: vec![DelegationChainLink {
                    delegator: "user:alice".to_string(),
                    delegate: "agent:bot-1".to_string(),
                    scope_class: "tool:fs.write".to_string(),
                    token_ref: None,
                }],
                token_refs: vec![],
            }),
            context: RawIntentContext {
                identity: "agent:bot-1".to_string(),
                workspace: "/ws".to_string(),
                risk_class: "low".to_string(),
                phase: None,
                session_id: Some("session-1".to_string()),
                environment_fingerprint: None,
                context_set_digest: None,
                context_evidence_mode: None,
                credential_scopes: vec![],
                auth_context: None,
            },
            script: None,
        })
        .unwrap()
    }

    #[test]
    fn emitted_trace_is_deterministic_in_trace_id_but_not_event_id() {
        let sk = keypair();
        let policy = minimal_policy();
        let intent = intent_with_delegation();
        let result = EvalOutcome {
            verdict: Verdict::Allow,
            reasons: vec![],
            violations: vec![],
            matched_rule: None,
            min_approvals: 0,
            require_distinct_approvers: false,
            require_broker_credential: false,
            broker_ref: None,
            broker_scopes: vec![],
            rate_limit: None,
            destructive_budget: None,
            dataflow_triggered: false,
            step_verdicts: vec![],
            script_hash: None,
            composite_risk: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let trace_a = emit_signed_trace(
            &sk,
            "key-1",
            &policy,
            &intent,
            &result,
            TraceOpts::default(),
            now(),
            &dir.path().join("a.json"),
        )
        .unwrap();
        let trace_b = emit_signed_trace(
            &sk,
            "key-1",
            &policy,
            &intent,
            &result,
            TraceOpts::default(),
            now(),
            &dir.path().join("b.json"),
        )
        .unwrap();

        assert_eq!(trace_a.trace_id, trace_b.trace_id);
        assert_ne!(trace_a.event_id, trace_b.event_id);
        assert_eq!(trace_a.relationships.parent_ref.as_deref(), Some("session-1"));
    }

    #[test]
    fn emit_signed_trace_rejects_parent_segments_in_trace_path() {
        let sk = keypair();
        let policy = minimal_policy();
        let intent = intent_with_delegation();
        let result = EvalOutcome {
            verdict: Verdict::Allow,
            reasons: vec![],
            violations: vec![],
            matched_rule: None,
            min_approvals: 0,
            require_distinct_approvers: false,
            require_broker_credential: false,
            broker_ref: None,
            broker_scopes: vec![],
            rate_limit: None,
            destructive_budget: None,
            dataflow_triggered: false,
            step_verdicts: vec![],
            script_hash: None,
            composite_risk: None,
        };

        let err = emit_signed_trace(
            &sk,
            "key-1",
            &policy,
            &intent,
            &result,
            TraceOpts::default(),
            now(),
            std::path::Path::new("../escape/trace.json"),
        )
        .unwrap_err();
        assert_eq!(err.code(), gait_error::codes::ENCODING_ERROR);
    }

    #[test]
    fn approval_audit_record_sorts_entries_and_flags_approved() {
        let intent = intent_with_delegation();
        let record = build_approval_audit_record(
            &intent,
            "policy-digest",
            vec![
                ApprovalEntry {
                    approver_identity: "user:bob".to_string(),
                    token_id: "tok-2".to_string(),
                    scope: vec!["tool:fs.write".to_string()],
                    valid: true,
                },
                ApprovalEntry {
                    approver_identity: "user:alice".to_string(),
                    token_id: "tok-1".to_string(),
                    scope: vec!["tool:fs.write".to_string()],
                    valid: true,
                },
            ],
        );
        assert!(record.approved);
        assert_eq!(record.valid_count, 2);
        assert_eq!(record.entries[0].approver_identity, "user:alice");
    }
}
