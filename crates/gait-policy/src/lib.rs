// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Declarative policy parsing and intent evaluation (§4.D, §4.E).
//!
//! [`parse_policy`] turns a loosely-typed JSON document into a normalized,
//! priority-sorted [`Policy`]; [`evaluate_detailed`] runs an already
//! normalized [`gait_intent::IntentRequest`] against it and returns a
//! [`Verdict`] plus the full rule-match, constraint, and approval metadata
//! behind it.

mod evaluate;
mod model;
mod parse;

pub use evaluate::{EvalOutcome, evaluate, evaluate_detailed, evaluate_detailed_raw};
pub use model::{
    ApprovalParams, Constraints, ContextEvidenceConstraint, DataflowConstraint,
    DelegationConstraint, EndpointConstraint, FailClosed, Policy, RATE_LIMIT_SCOPES,
    RATE_LIMIT_WINDOWS, RateLimitConstraint, Rule, RuleMatch, ScriptPolicy, Verdict,
};
pub use parse::{parse_policy, policy_digest};

#[cfg(test)]
mod tests {
    use super::*;
    use gait_intent::{RawArgProvenance, RawIntentContext, RawIntentRequest, RawTarget};
    use serde_json::{Value, json};

    fn minimal_policy(rules: Vec<Value>) -> Value {
        json!({
            "schema_id": "",
            "schema_version": "",
            "default_verdict": "block",
            "rules": rules,
        })
    }

    fn basic_intent(tool_name: &str, risk_class: &str) -> RawIntentRequest {
        RawIntentRequest {
            tool_name: tool_name.to_string(),
            args: json!({}),
            targets: vec![RawTarget {
                kind: "path".to_string(),
                value: "/tmp/a.txt".to_string(),
                operation: "read".to_string(),
                sensitivity: "low".to_string(),
                endpoint_class: None,
                endpoint_domain: None,
                destructive: None,
                hints: vec![],
            }],
            arg_provenance: vec![RawArgProvenance {
                arg_path: "a".to_string(),
                source: "user".to_string(),
                source_ref: None,
                integrity_digest: None,
            }],
            skill_provenance: None,
            delegation: None,
            context: RawIntentContext {
                identity: "agent:1".to_string(),
                workspace: "/ws".to_string(),
                risk_class: risk_class.to_string(),
                phase: None,
                session_id: None,
                environment_fingerprint: None,
                context_set_digest: None,
                context_evidence_mode: None,
                credential_scopes: vec![],
                auth_context: None,
            },
            script: None,
        }
    }

    #[test]
    fn parse_policy_rejects_unknown_fields() {
        let doc = json!({ "schema_id": "", "schema_version": "", "default_verdict": "block", "rules": [], "not_a_field": true });
        let err = parse_policy(doc).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::UNKNOWN_POLICY_FIELD);
    }

    #[test]
    fn parse_policy_sorts_rules_by_priority_then_name() {
        let doc = minimal_policy(vec![
            json!({"name": "b", "priority": 1, "effect": "allow", "reason_code": "r"}),
            json!({"name": "a", "priority": 1, "effect": "allow", "reason_code": "r"}),
            json!({"name": "z", "priority": 0, "effect": "allow", "reason_code": "r"}),
        ]);
        let policy = parse_policy(doc).unwrap();
        let names: Vec<&str> = policy.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[test]
    fn no_matching_rule_falls_back_to_default_verdict() {
        let doc = minimal_policy(vec![json!({
            "name": "only-write", "priority": 0, "effect": "allow", "reason_code": "r",
            "match": {"tools": ["write_file"]}
        })]);
        let policy = parse_policy(doc).unwrap();
        let intent = gait_intent::normalize_intent(basic_intent("read_file", "low")).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert!(outcome.matched_rule.is_none());
    }

    #[test]
    fn matching_rule_supplies_effect_and_reason() {
        let doc = minimal_policy(vec![json!({
            "name": "allow-read", "priority": 0, "effect": "allow", "reason_code": "read_ok",
            "match": {"tools": ["read_file"]}
        })]);
        let policy = parse_policy(doc).unwrap();
        let intent = gait_intent::normalize_intent(basic_intent("read_file", "low")).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.matched_rule.as_deref(), Some("allow-read"));
        assert!(outcome.reasons.contains(&"read_ok".to_string()));
    }

    #[test]
    fn fail_closed_blocks_missing_delegation_for_critical_risk() {
        let doc = json!({
            "schema_id": "", "schema_version": "", "default_verdict": "allow",
            "fail_closed": {"enabled": true, "risk_classes": ["critical"], "required_fields": ["delegation"]},
            "rules": [],
        });
        let policy = parse_policy(doc).unwrap();
        let intent = gait_intent::normalize_intent(basic_intent("read_file", "critical")).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert!(outcome.violations.contains(&gait_error::codes::FAIL_CLOSED_MISSING_DELEGATION.to_string()));
    }

    #[test]
    fn destructive_apply_requires_approval() {
        let doc = minimal_policy(vec![json!({
            "name": "allow-all", "priority": 0, "effect": "allow", "reason_code": "ok",
        })]);
        let policy = parse_policy(doc).unwrap();
        let mut raw = basic_intent("delete_file", "medium");
        raw.targets[0].operation = "delete".to_string();
        raw.context.phase = Some("apply".to_string());
        let intent = gait_intent::normalize_intent(raw).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert_eq!(outcome.verdict, Verdict::RequireApproval);
        assert_eq!(outcome.min_approvals, 1);
    }

    #[test]
    fn destructive_apply_requires_approval_with_no_matching_rule() {
        let doc = json!({
            "schema_id": "", "schema_version": "", "default_verdict": "allow",
            "rules": [],
        });
        let policy = parse_policy(doc).unwrap();
        let mut raw = basic_intent("delete_file", "medium");
        raw.targets[0].kind = "fs".to_string();
        raw.targets[0].operation = "delete".to_string();
        raw.context.phase = Some("apply".to_string());
        let intent = gait_intent::normalize_intent(raw).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert!(outcome.matched_rule.is_none());
        assert_eq!(outcome.verdict, Verdict::RequireApproval);
        assert_eq!(outcome.min_approvals, 1);
        assert!(outcome.reasons.contains(&gait_error::codes::DESTRUCTIVE_APPLY_REQUIRES_APPROVAL.to_string()));
    }

    #[test]
    fn script_step_count_exceeding_max_blocks() {
        let doc = json!({
            "schema_id": "", "schema_version": "", "default_verdict": "allow",
            "scripts": {"max_steps": 1},
            "rules": [{"name": "allow-all", "priority": 0, "effect": "allow", "reason_code": "ok"}],
        });
        let policy = parse_policy(doc).unwrap();
        let mut raw = basic_intent("script", "low");
        raw.script = Some(gait_intent::RawScript {
            steps: vec![basic_intent("read_file", "low"), basic_intent("read_file", "low")],
        });
        let intent = gait_intent::normalize_intent(raw).unwrap();
        let outcome = evaluate_detailed(&policy, &intent).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert!(outcome.violations.contains(&gait_error::codes::SCRIPT_MAX_STEPS_EXCEEDED.to_string()));
    }

    #[test]
    fn policy_digest_is_stable_and_ignores_absent_optionals() {
        let doc = minimal_policy(vec![json!({
            "name": "a", "priority": 0, "effect": "allow", "reason_code": "ok",
        })]);
        let policy = parse_policy(doc).unwrap();
        let d1 = policy_digest(&policy).unwrap();
        let d2 = policy_digest(&policy).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn evaluate_detailed_raw_converts_normalization_failure_to_block_under_fail_closed() {
        let doc = json!({
            "schema_id": "", "schema_version": "", "default_verdict": "allow",
            "fail_closed": {"enabled": true, "risk_classes": ["critical"]},
            "rules": [],
        });
        let policy = parse_policy(doc).unwrap();
        let mut raw = basic_intent("", "critical");
        raw.tool_name = "   ".to_string();
        let outcome = evaluate_detailed_raw(&policy, raw).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
    }
}
