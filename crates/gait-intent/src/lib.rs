// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Intent validation, normalization, and content digesting (§4.C).
//!
//! [`normalize_intent`] is the single entry point every other component
//! calls before evaluating, signing, or auditing an intent: it turns a
//! loosely-typed [`RawIntentRequest`] into a fully validated, deterministic
//! [`IntentRequest`] with `args_digest`/`script_hash`/`intent_digest` filled
//! in, so that two requests which differ only in key order, whitespace, or
//! set order always normalize to byte-identical output.

mod model;
mod normalize;

pub use model::{
    ArgProvenance, CONTEXT_EVIDENCE_MODES, Delegation, DelegationChainLink, ENDPOINT_CLASSES,
    IntentContext, IntentRequest, PHASES, PROVENANCE_SOURCES, RISK_CLASSES, RawArgProvenance,
    RawDelegation, RawIntentContext, RawIntentRequest, RawScript, RawTarget, Script,
    SkillProvenance, TARGET_KINDS, Target, is_valid_endpoint_class,
};
pub use normalize::{args_digest, intent_digest, normalize_intent, script_hash};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_context() -> RawIntentContext {
        RawIntentContext {
            identity: "agent:builder-1".to_string(),
            workspace: "/home/user/project".to_string(),
            risk_class: "Medium".to_string(),
            phase: None,
            session_id: Some("sess-1".to_string()),
            environment_fingerprint: None,
            context_set_digest: None,
            context_evidence_mode: None,
            credential_scopes: vec!["Read:Files".to_string(), "read:files".to_string()],
            auth_context: None,
        }
    }

    fn base_request() -> RawIntentRequest {
        RawIntentRequest {
            tool_name: "  Write_File  ".to_string(),
            args: json!({ " path ": "  /tmp/out.txt  ", "content": "hello" }),
            targets: vec![RawTarget {
                kind: "Path".to_string(),
                value: "/tmp/out.txt".to_string(),
                operation: "Write".to_string(),
                sensitivity: "low".to_string(),
                endpoint_class: None,
                endpoint_domain: None,
                destructive: None,
                hints: vec![],
            }],
            arg_provenance: vec![RawArgProvenance {
                arg_path: "content".to_string(),
                source: "User".to_string(),
                source_ref: None,
                integrity_digest: None,
            }],
            skill_provenance: None,
            delegation: None,
            context: base_context(),
            script: None,
        }
    }

    #[test]
    fn normalization_trims_lowercases_and_infers_fields() {
        let intent = normalize_intent(base_request()).unwrap();
        assert_eq!(intent.tool_name, "write_file");
        assert_eq!(intent.context.risk_class, "medium");
        assert_eq!(intent.context.credential_scopes, vec!["read:files"]);
        assert_eq!(intent.targets.len(), 1);
        let target = &intent.targets[0];
        assert_eq!(target.kind, "path");
        assert_eq!(target.endpoint_class, "fs.write");
        assert_eq!(target.discovery_method, "inferred");
        assert!(!target.destructive);
        assert_eq!(intent.args_digest.len(), 64);
        assert_eq!(intent.intent_digest.len(), 64);
    }

    #[test]
    fn normalization_is_idempotent() {
        let intent = normalize_intent(base_request()).unwrap();
        let reserialized: RawIntentRequest = raw_from_intent(&intent);
        let renormalized = normalize_intent(reserialized).unwrap();
        assert_eq!(intent.intent_digest, renormalized.intent_digest);
        assert_eq!(
            serde_json::to_string(&intent).unwrap(),
            serde_json::to_string(&renormalized).unwrap()
        );
    }

    #[test]
    fn digest_is_stable_across_key_order_and_whitespace_variation() {
        let mut a = base_request();
        a.args = json!({ "path": "/tmp/out.txt", "content": "hello" });

        let mut b = base_request();
        b.args = json!({ "content": "  hello  ", "  path  ": "/tmp/out.txt" });
        b.tool_name = "WRITE_FILE".to_string();

        let digest_a = intent_digest(a).unwrap();
        let digest_b = intent_digest(b).unwrap();
        assert_eq!(digest_a, digest_b);
    }

    #[test]
    fn digest_is_stable_across_set_order_of_credential_scopes() {
        let mut a = base_request();
        a.context.credential_scopes = vec!["a".to_string(), "b".to_string()];
        let mut b = base_request();
        b.context.credential_scopes = vec!["b".to_string(), "a".to_string()];
        assert_eq!(intent_digest(a).unwrap(), intent_digest(b).unwrap());
    }

    #[test]
    fn empty_tool_name_is_rejected() {
        let mut raw = base_request();
        raw.tool_name = "   ".to_string();
        let err = normalize_intent(raw).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::TOOL_NAME_REQUIRED);
    }

    #[test]
    fn unknown_target_kind_is_rejected() {
        let mut raw = base_request();
        raw.targets[0].kind = "spreadsheet".to_string();
        let err = normalize_intent(raw).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::INVALID_TARGET_KIND);
    }

    #[test]
    fn empty_arg_key_is_rejected() {
        let mut raw = base_request();
        raw.args = json!({ "   ": "value" });
        let err = normalize_intent(raw).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::EMPTY_ARG_KEY);
    }

    #[test]
    fn script_with_zero_steps_is_rejected() {
        let mut raw = base_request();
        raw.script = Some(RawScript { steps: vec![] });
        let err = normalize_intent(raw).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::INVALID_SCRIPT_STEP_COUNT);
    }

    #[test]
    fn script_intent_aggregates_step_targets_and_forces_tool_name() {
        let mut raw = base_request();
        raw.script = Some(RawScript {
            steps: vec![base_request(), base_request()],
        });
        let intent = normalize_intent(raw).unwrap();
        assert_eq!(intent.tool_name, "script");
        assert_eq!(intent.targets.len(), 1, "identical step targets dedupe");
        assert_eq!(intent.script.as_ref().unwrap().steps.len(), 2);
        assert!(intent.script_hash.is_some());
    }

    #[test]
    fn destructive_operation_is_inferred_when_not_declared() {
        let mut raw = base_request();
        raw.targets[0].operation = "delete".to_string();
        raw.targets[0].destructive = None;
        let intent = normalize_intent(raw).unwrap();
        assert!(intent.targets[0].destructive);
    }

    #[test]
    fn url_target_infers_domain_and_net_http_class() {
        let mut raw = base_request();
        raw.targets[0].kind = "url".to_string();
        raw.targets[0].value = "https://Example.com:8443/a/b?x=1".to_string();
        let intent = normalize_intent(raw).unwrap();
        let target = &intent.targets[0];
        assert_eq!(target.endpoint_class, "net.http");
        assert_eq!(target.endpoint_domain.as_deref(), Some("example.com"));
    }

    fn raw_from_intent(intent: &IntentRequest) -> RawIntentRequest {
        RawIntentRequest {
            tool_name: intent.tool_name.clone(),
            args: intent.args.clone(),
            targets: intent
                .targets
                .iter()
                .map(|t| {
                    let explicit = t.discovery_method == "explicit";
                    RawTarget {
                        kind: t.kind.clone(),
                        value: t.value.clone(),
                        operation: t.operation.clone(),
                        sensitivity: t.sensitivity.clone(),
                        endpoint_class: explicit.then(|| t.endpoint_class.clone()),
                        endpoint_domain: explicit.then(|| t.endpoint_domain.clone()).flatten(),
                        destructive: Some(t.destructive),
                        hints: t.hints.clone(),
                    }
                })
                .collect(),
            arg_provenance: intent
                .arg_provenance
                .iter()
                .map(|p| RawArgProvenance {
                    arg_path: p.arg_path.clone(),
                    source: p.source.clone(),
                    source_ref: p.source_ref.clone(),
                    integrity_digest: p.integrity_digest.clone(),
                })
                .collect(),
            skill_provenance: intent.skill_provenance.clone(),
            delegation: intent.delegation.as_ref().map(|d| RawDelegation {
                requester: d.requester.clone(),
                chain: d.chain.clone(),
                token_refs: d.token_refs.clone(),
            }),
            context: RawIntentContext {
                identity: intent.context.identity.clone(),
                workspace: intent.context.workspace.clone(),
                risk_class: intent.context.risk_class.clone(),
                phase: Some(intent.context.phase.clone()),
                session_id: intent.context.session_id.clone(),
                environment_fingerprint: intent.context.environment_fingerprint.clone(),
                context_set_digest: intent.context.context_set_digest.clone(),
                context_evidence_mode: intent.context.context_evidence_mode.clone(),
                credential_scopes: intent.context.credential_scopes.clone(),
                auth_context: intent.context.auth_context.clone(),
            },
            script: None,
        }
    }
}
