// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed trace emission (§4.I).

use crate::model::{Edge, EntityRef, RelationshipEnvelope, TraceRecord};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use gait_core::{atomic_write, schema_id, sha256_hex, SCHEMA_VERSION};
use gait_error::{GaitError, GaitResult, codes};
use gait_intent::IntentRequest;
use gait_policy::{EvalOutcome, Policy, policy_digest};
use gait_sign::sign_json;
use std::path::Path;
use uuid::Uuid;

/// Caller-supplied fields not derivable from `policy`/`intent`/`result`
/// alone.
#[derive(Debug, Clone, Default)]
pub struct TraceOpts {
    pub correlation_id: Option<String>,
    pub latency_ms: Option<i64>,
    pub approval_token_ref: Option<String>,
    pub delegation_ref: Option<String>,
    pub skill_provenance_digest: Option<String>,
    pub context_source: Option<String>,
    pub pre_approved_pattern_id: Option<String>,
    pub extra_matched_rule_ids: Vec<String>,
}

/// Builds a signed [`TraceRecord`] for one gate decision and writes it
/// atomically to `trace_path` (§4.I).
///
/// `trace_id` is derived deterministically from `policy_digest:intent_digest:verdict`
/// so repeated emissions of the same logical decision share an id;
/// `event_id` is a fresh random id per call, distinguishing repeat
/// emissions of that same trace.
///
/// # Errors
///
/// Returns a `validation` error if `result.verdict`'s reasons/violations are
/// inconsistent with an empty verdict, if `trace_path` contains a `..`
/// segment, or if signing/serialization fails; propagates
/// [`atomic_write`]'s `io_failure` errors.
#[allow(clippy::too_many_arguments)]
pub fn emit_signed_trace(
    signing_key: &SigningKey,
    key_id: &str,
    policy: &Policy,
    intent: &IntentRequest,
    result: &EvalOutcome,
    opts: TraceOpts,
    now: DateTime<Utc>,
    trace_path: &Path,
) -> GaitResult<TraceRecord> {
    reject_parent_segments(trace_path)?;

    let policy_digest = policy_digest(policy)?;
    let intent_digest = intent.intent_digest.clone();
    let verdict = result.verdict;

    let trace_id = sha256_hex(format!("{policy_digest}:{intent_digest}:{}", verdict.as_str()).as_bytes())[..24].to_string();
    let event_id = Uuid::new_v4().to_string();

    let mut violations = result.violations.clone();
    violations.sort();
    violations.dedup();

    let mut matched_rule_ids: Vec<String> = result.matched_rule.iter().cloned().chain(opts.extra_matched_rule_ids).collect();
    matched_rule_ids.sort();
    matched_rule_ids.dedup();

    let relationships = build_relationship_envelope(&trace_id, intent, &policy_digest);

    let mut record = TraceRecord {
        schema_id: schema_id::TRACE.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        trace_id,
        event_id,
        observed_at: now,
        policy_digest,
        intent_digest,
        verdict,
        violations,
        correlation_id: opts.correlation_id,
        latency_ms: opts.latency_ms.map(|ms| ms.max(0) as u64),
        approval_token_ref: opts.approval_token_ref,
        delegation_ref: opts.delegation_ref,
        script_hash: result.script_hash.clone(),
        step_verdicts: result.step_verdicts.clone(),
        skill_provenance_digest: opts.skill_provenance_digest,
        composite_risk: result.composite_risk.clone(),
        context_source: opts.context_source,
        pre_approved_pattern_id: opts.pre_approved_pattern_id,
        matched_rule_ids,
        relationships,
        signature: None,
    };
    record.signature = Some(sign_json(signing_key, key_id, &record)?);

    let bytes = serde_json::to_vec_pretty(&record)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("{e}")))?;
    atomic_write(trace_path, &bytes, 0o600)?;

    tracing::debug!(trace_id = %record.trace_id, verdict = %record.verdict.as_str(), "trace emitted");
    Ok(record)
}

fn build_relationship_envelope(trace_id: &str, intent: &IntentRequest, policy_digest: &str) -> RelationshipEnvelope {
    let agent = intent.context.identity.clone();
    let tool = intent.tool_name.clone();

    let mut entity_refs = vec![
        EntityRef {
            kind: "trace".to_string(),
            id: trace_id.to_string(),
        },
        EntityRef {
            kind: "tool".to_string(),
            id: tool.clone(),
        },
        EntityRef {
            kind: "agent".to_string(),
            id: agent.clone(),
        },
        EntityRef {
            kind: "policy".to_string(),
            id: policy_digest.to_string(),
        },
    ];
    entity_refs.sort_by(|a, b| (&a.kind, &a.id).cmp(&(&b.kind, &b.id)));

    let mut edges = vec![
        Edge {
            from: agent.clone(),
            to: tool.clone(),
            relation: "calls".to_string(),
        },
        Edge {
            from: tool,
            to: policy_digest.to_string(),
            relation: "governed_by".to_string(),
        },
    ];

    let mut agent_chain = Vec::new();
    if let Some(delegation) = &intent.delegation {
        for link in &delegation.chain {
            agent_chain.push(link.delegate.clone());
            edges.push(Edge {
                from: link.delegator.clone(),
                to: link.delegate.clone(),
                relation: "delegates_to".to_string(),
            });
        }
    }
    agent_chain.sort();
    agent_chain.dedup();

    RelationshipEnvelope {
        parent_ref: intent.context.session_id.clone(),
        entity_refs,
        agent_chain,
        edges,
    }
}

fn reject_parent_segments(path: &Path) -> GaitResult<()> {
    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(GaitError::validation(
            codes::ENCODING_ERROR,
            "trace_path must not contain '..' segments",
        ));
    }
    Ok(())
}
