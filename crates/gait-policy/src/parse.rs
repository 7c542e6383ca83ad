// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy parsing and normalization (§4.D).

use crate::model::{
    ApprovalParams, Constraints, ContextEvidenceConstraint, DataflowConstraint,
    DelegationConstraint, EndpointConstraint, FailClosed, Policy, RATE_LIMIT_SCOPES,
    RATE_LIMIT_WINDOWS, RateLimitConstraint, Rule, RuleMatch, ScriptPolicy, Verdict,
};
use gait_core::{SCHEMA_VERSION, digest_value, schema_id};
use gait_error::{GaitError, GaitResult, codes};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawPolicy {
    schema_id: String,
    schema_version: String,
    default_verdict: String,
    fail_closed: RawFailClosed,
    scripts: RawScriptPolicy,
    rules: Vec<RawRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawFailClosed {
    enabled: bool,
    risk_classes: Vec<String>,
    required_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawScriptPolicy {
    max_steps: u32,
    require_approval_above: Option<u32>,
    block_mixed_risk: bool,
}

impl Default for RawScriptPolicy {
    fn default() -> Self {
        Self {
            max_steps: 64,
            require_approval_above: None,
            block_mixed_risk: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawRule {
    name: String,
    priority: i64,
    effect: String,
    r#match: RawRuleMatch,
    constraints: RawConstraints,
    approval: RawApprovalParams,
    reason_code: String,
    violation_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawRuleMatch {
    tools: Vec<String>,
    target_kinds: Vec<String>,
    endpoint_classes: Vec<String>,
    sensitivities: Vec<String>,
    risk_classes: Vec<String>,
    phases: Vec<String>,
    identities: Vec<String>,
    workspaces: Vec<String>,
    destructive: Option<bool>,
    require_delegation: Option<bool>,
    delegation_allowlist: Vec<String>,
    delegation_scopes: Vec<String>,
    delegation_max_depth: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawConstraints {
    dataflow: Option<RawDataflowConstraint>,
    endpoint: Option<RawEndpointConstraint>,
    context_evidence: Option<ContextEvidenceConstraint>,
    rate_limit: Option<RawRateLimitConstraint>,
    destructive_budget: Option<RawRateLimitConstraint>,
    delegation: Option<DelegationConstraint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawDataflowConstraint {
    tainted_sources: Vec<String>,
    action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawEndpointConstraint {
    allow_paths: Vec<String>,
    deny_paths: Vec<String>,
    allow_domains: Vec<String>,
    deny_domains: Vec<String>,
    egress_classes: Vec<String>,
    destructive_action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRateLimitConstraint {
    scope: String,
    window: String,
    limit: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawApprovalParams {
    min_approvals: u32,
    require_distinct_approvers: bool,
    require_broker_credential: bool,
    broker_ref: Option<String>,
    broker_scopes: Vec<String>,
}

/// Parses and normalizes a declarative policy document (§4.D).
///
/// # Errors
///
/// Returns a `schema_invalid` error tagged [`codes::UNKNOWN_POLICY_FIELD`]
/// if the document carries a field this schema does not recognize, or a
/// `validation` error for any other normalization failure.
pub fn parse_policy(raw: Value) -> GaitResult<Policy> {
    let raw: RawPolicy = serde_json::from_value(raw).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("unknown field") {
            GaitError::schema_invalid(codes::UNKNOWN_POLICY_FIELD, msg)
        } else {
            GaitError::validation(codes::ENCODING_ERROR, format!("not a valid policy document: {msg}"))
        }
    })?;

    let schema_id = if raw.schema_id.trim().is_empty() {
        schema_id::POLICY.to_string()
    } else if raw.schema_id.trim() != schema_id::POLICY {
        return Err(GaitError::schema_invalid(
            codes::SCHEMA_ID_MISMATCH,
            format!("expected schema_id {}, got {}", schema_id::POLICY, raw.schema_id),
        ));
    } else {
        schema_id::POLICY.to_string()
    };

    let schema_version = if raw.schema_version.trim().is_empty() {
        SCHEMA_VERSION.to_string()
    } else if raw.schema_version.trim() != SCHEMA_VERSION {
        return Err(GaitError::schema_invalid(
            codes::SCHEMA_VERSION_MISMATCH,
            format!("expected schema_version {SCHEMA_VERSION}, got {}", raw.schema_version),
        ));
    } else {
        SCHEMA_VERSION.to_string()
    };

    let default_verdict = if raw.default_verdict.trim().is_empty() {
        Verdict::RequireApproval
    } else {
        Verdict::parse(&raw.default_verdict.trim().to_lowercase()).ok_or_else(|| {
            GaitError::validation(
                codes::INVALID_DEFAULT_VERDICT,
                format!("unknown default_verdict: {}", raw.default_verdict),
            )
        })?
    };

    let mut fail_closed = FailClosed {
        enabled: raw.fail_closed.enabled,
        risk_classes: lower_sorted_dedup(raw.fail_closed.risk_classes),
        required_fields: lower_sorted_dedup(raw.fail_closed.required_fields),
    };
    if fail_closed.enabled && fail_closed.risk_classes.is_empty() {
        fail_closed.risk_classes = vec!["critical".to_string(), "high".to_string()];
        fail_closed.risk_classes.sort();
    }

    let scripts = ScriptPolicy {
        max_steps: if raw.scripts.max_steps == 0 {
            64
        } else {
            raw.scripts.max_steps
        },
        require_approval_above: raw.scripts.require_approval_above,
        block_mixed_risk: raw.scripts.block_mixed_risk,
    };

    let mut rules = raw
        .rules
        .into_iter()
        .map(normalize_rule)
        .collect::<GaitResult<Vec<_>>>()?;
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    Ok(Policy {
        schema_id,
        schema_version,
        default_verdict,
        fail_closed,
        scripts,
        rules,
    })
}

fn normalize_rule(raw: RawRule) -> GaitResult<Rule> {
    let name = raw.name.trim().to_string();
    let effect = Verdict::parse(raw.effect.trim().to_lowercase().as_str()).ok_or_else(|| {
        GaitError::validation(
            codes::RULE_EFFECT_REQUIRED,
            format!("rule '{name}' has missing or unknown effect: '{}'", raw.effect),
        )
    })?;

    let r#match = RuleMatch {
        tools: lower_sorted_dedup(raw.r#match.tools),
        target_kinds: lower_sorted_dedup(raw.r#match.target_kinds),
        endpoint_classes: lower_sorted_dedup(raw.r#match.endpoint_classes),
        sensitivities: lower_sorted_dedup(raw.r#match.sensitivities),
        risk_classes: lower_sorted_dedup(raw.r#match.risk_classes),
        phases: lower_sorted_dedup(raw.r#match.phases),
        identities: lower_sorted_dedup(raw.r#match.identities),
        workspaces: trimmed_sorted_dedup(raw.r#match.workspaces),
        destructive: raw.r#match.destructive,
        require_delegation: raw.r#match.require_delegation,
        delegation_allowlist: lower_sorted_dedup(raw.r#match.delegation_allowlist),
        delegation_scopes: lower_sorted_dedup(raw.r#match.delegation_scopes),
        delegation_max_depth: raw.r#match.delegation_max_depth,
    };

    let constraints = normalize_constraints(raw.constraints, &name)?;

    let mut approval = ApprovalParams {
        min_approvals: raw.approval.min_approvals,
        require_distinct_approvers: raw.approval.require_distinct_approvers,
        require_broker_credential: raw.approval.require_broker_credential,
        broker_ref: raw.approval.broker_ref,
        broker_scopes: lower_sorted_dedup(raw.approval.broker_scopes),
    };
    if approval.min_approvals > 1 {
        approval.require_distinct_approvers = true;
    }

    Ok(Rule {
        name,
        priority: raw.priority,
        effect,
        r#match,
        constraints,
        approval,
        reason_code: raw.reason_code.trim().to_string(),
        violation_code: raw.violation_code,
    })
}

fn normalize_constraints(raw: RawConstraints, rule_name: &str) -> GaitResult<Constraints> {
    let dataflow = raw
        .dataflow
        .map(|d| -> GaitResult<DataflowConstraint> {
            let action = Verdict::parse(d.action.trim().to_lowercase().as_str()).ok_or_else(|| {
                GaitError::validation(
                    codes::RULE_EFFECT_REQUIRED,
                    format!("rule '{rule_name}' dataflow constraint has unknown action: '{}'", d.action),
                )
            })?;
            Ok(DataflowConstraint {
                tainted_sources: lower_sorted_dedup(d.tainted_sources),
                action,
            })
        })
        .transpose()?;

    let endpoint = raw
        .endpoint
        .map(|e| -> GaitResult<EndpointConstraint> {
            for class in &e.egress_classes {
                if !class.trim().to_lowercase().starts_with("net.") {
                    return Err(GaitError::validation(
                        codes::INVALID_EGRESS_CLASS,
                        format!("rule '{rule_name}' egress class must start with net.: '{class}'"),
                    ));
                }
            }
            let destructive_action = e
                .destructive_action
                .map(|a| {
                    Verdict::parse(a.trim().to_lowercase().as_str()).ok_or_else(|| {
                        GaitError::validation(
                            codes::RULE_EFFECT_REQUIRED,
                            format!("rule '{rule_name}' has unknown destructive_action: '{a}'"),
                        )
                    })
                })
                .transpose()?;
            Ok(EndpointConstraint {
                allow_paths: e.allow_paths,
                deny_paths: e.deny_paths,
                allow_domains: lower_sorted_dedup(e.allow_domains),
                deny_domains: lower_sorted_dedup(e.deny_domains),
                egress_classes: lower_sorted_dedup(e.egress_classes),
                destructive_action,
            })
        })
        .transpose()?;

    let rate_limit = raw.rate_limit.map(|r| normalize_rate_limit(r, rule_name)).transpose()?;
    let destructive_budget = raw
        .destructive_budget
        .map(|r| normalize_rate_limit(r, rule_name))
        .transpose()?;

    Ok(Constraints {
        dataflow,
        endpoint,
        context_evidence: raw.context_evidence.or(Some(ContextEvidenceConstraint::default())),
        rate_limit,
        destructive_budget,
        delegation: raw.delegation,
    })
}

fn normalize_rate_limit(raw: RawRateLimitConstraint, rule_name: &str) -> GaitResult<RateLimitConstraint> {
    let scope = raw.scope.trim().to_lowercase();
    if !RATE_LIMIT_SCOPES.contains(&scope.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_RATE_LIMIT_SCOPE,
            format!("rule '{rule_name}' has unknown rate_limit scope: '{scope}'"),
        ));
    }
    let window = raw.window.trim().to_lowercase();
    if !RATE_LIMIT_WINDOWS.contains(&window.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_RATE_LIMIT_WINDOW,
            format!("rule '{rule_name}' has unknown rate_limit window: '{window}'"),
        ));
    }
    Ok(RateLimitConstraint {
        scope,
        window,
        limit: raw.limit,
    })
}

fn lower_sorted_dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn trimmed_sorted_dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// The canonical digest of a policy's semantically meaningful fields.
///
/// Absent optionals serialize to `null` and are stripped before digesting,
/// so adding a new optional field to the schema does not change the digest
/// of policies that do not use it.
///
/// # Errors
///
/// Propagates [`digest_value`]'s errors.
pub fn policy_digest(policy: &Policy) -> GaitResult<String> {
    let value = serde_json::to_value(policy).map_err(|e| {
        GaitError::validation(codes::ENCODING_ERROR, format!("not json-representable: {e}"))
    })?;
    digest_value(&compact(&value))
}

fn compact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(k.clone(), compact(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(compact).collect()),
        other => other.clone(),
    }
}
