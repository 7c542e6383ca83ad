// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy evaluation: rule matching, constraint composition, script rollup,
//! and fail-closed gating (§4.E).

use crate::model::{Policy, RateLimitConstraint, Rule, RuleMatch, Verdict};
use gait_error::{GaitError, GaitResult, codes};
use gait_glob::{DomainRules, IncludeExcludeGlobs, MatchDecision};
use gait_intent::{Delegation, IntentRequest, RawIntentRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

const TAINT_DESTINATION_KINDS: &[&str] = &["host", "url", "bucket", "queue", "topic"];

/// Rich evaluation outcome for a single intent against a policy (§4.E).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub verdict: Verdict,
    pub reasons: Vec<String>,
    pub violations: Vec<String>,
    pub matched_rule: Option<String>,
    pub min_approvals: u32,
    pub require_distinct_approvers: bool,
    pub require_broker_credential: bool,
    pub broker_ref: Option<String>,
    pub broker_scopes: Vec<String>,
    pub rate_limit: Option<RateLimitConstraint>,
    pub destructive_budget: Option<RateLimitConstraint>,
    pub dataflow_triggered: bool,
    pub step_verdicts: Vec<Verdict>,
    pub script_hash: Option<String>,
    pub composite_risk: Option<String>,
}

impl EvalOutcome {
    fn synthetic(verdict: Verdict, reason: &str, violation: &str) -> Self {
        Self {
            verdict,
            reasons: vec![reason.to_string()],
            violations: vec![violation.to_string()],
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
        }
    }

    fn finalize(mut self) -> Self {
        self.reasons.sort();
        self.reasons.dedup();
        self.violations.sort();
        self.violations.dedup();
        self.broker_scopes.sort();
        self.broker_scopes.dedup();
        self
    }
}

/// Evaluates a raw (not yet normalized) intent against `policy`.
///
/// Normalizes `raw` first. If normalization fails and the intent's declared
/// risk class is subject to fail-closed, returns a synthetic `block`
/// outcome rather than propagating the error (§4.E step 1).
///
/// # Errors
///
/// Propagates normalization failures that fail-closed does not cover.
pub fn evaluate_detailed_raw(policy: &Policy, raw: RawIntentRequest) -> GaitResult<EvalOutcome> {
    let declared_risk = raw.context.risk_class.trim().to_lowercase();
    match gait_intent::normalize_intent(raw) {
        Ok(intent) => evaluate_detailed(policy, &intent),
        Err(e) => {
            if policy.fail_closed.enabled && policy.fail_closed.risk_classes.contains(&declared_risk)
            {
                Ok(EvalOutcome::synthetic(
                    Verdict::Block,
                    codes::FAIL_CLOSED_INTENT_INVALID,
                    codes::FAIL_CLOSED_INTENT_INVALID,
                )
                .finalize())
            } else {
                Err(e)
            }
        }
    }
}

/// Evaluates an already-normalized intent against `policy`, returning only
/// the final verdict.
///
/// # Errors
///
/// Propagates [`evaluate_detailed`]'s errors.
pub fn evaluate(policy: &Policy, intent: &IntentRequest) -> GaitResult<Verdict> {
    Ok(evaluate_detailed(policy, intent)?.verdict)
}

/// Evaluates an already-normalized intent against `policy` (§4.E steps 2-7).
///
/// # Errors
///
/// Returns a `validation` error if a context-evidence age value on the
/// intent cannot be interpreted as a number of seconds.
pub fn evaluate_detailed(policy: &Policy, intent: &IntentRequest) -> GaitResult<EvalOutcome> {
    // Step 2: fail-closed gate.
    if policy.fail_closed.enabled && policy.fail_closed.risk_classes.contains(&intent.context.risk_class) {
        let violations = fail_closed_violations(policy, intent);
        if !violations.is_empty() {
            let mut outcome =
                EvalOutcome::synthetic(Verdict::Block, codes::FAIL_CLOSED_INTENT_INVALID, codes::FAIL_CLOSED_INTENT_INVALID);
            outcome.violations.extend(violations.iter().map(|s| s.to_string()));
            return Ok(outcome.finalize());
        }
    }

    // Step 3: script rollup.
    if let Some(script) = &intent.script {
        return evaluate_script(policy, intent, script);
    }

    // Steps 4-6: single-intent path.
    evaluate_single(policy, intent)
}

fn fail_closed_violations(policy: &Policy, intent: &IntentRequest) -> Vec<&'static str> {
    let mut violations = Vec::new();
    for field in &policy.fail_closed.required_fields {
        match field.as_str() {
            "targets" if intent.targets.is_empty() => violations.push(codes::FAIL_CLOSED_MISSING_TARGETS),
            "arg_provenance" if intent.arg_provenance.is_empty() => {
                violations.push(codes::FAIL_CLOSED_MISSING_ARG_PROVENANCE);
            }
            "endpoint_class"
                if intent
                    .targets
                    .iter()
                    .any(|t| t.endpoint_class.is_empty() || t.endpoint_class == "other") =>
            {
                violations.push(codes::FAIL_CLOSED_ENDPOINT_CLASS_UNKNOWN);
            }
            "delegation" if intent.delegation.is_none() => {
                violations.push(codes::FAIL_CLOSED_MISSING_DELEGATION);
            }
            "context_evidence"
                if intent.context.context_set_digest.is_none()
                    || intent.context.context_evidence_mode.is_none() =>
            {
                violations.push(codes::FAIL_CLOSED_MISSING_CONTEXT_EVIDENCE);
            }
            _ => {}
        }
    }
    violations
}

fn evaluate_script(
    policy: &Policy,
    intent: &IntentRequest,
    script: &gait_intent::Script,
) -> GaitResult<EvalOutcome> {
    let mut step_outcomes = Vec::with_capacity(script.steps.len());
    for step in &script.steps {
        step_outcomes.push(evaluate_detailed(policy, step)?);
    }

    let mut verdict = step_outcomes
        .iter()
        .map(|o| o.verdict)
        .max()
        .unwrap_or(Verdict::Allow);
    let mut reasons: Vec<String> = step_outcomes.iter().flat_map(|o| o.reasons.clone()).collect();
    let mut violations: Vec<String> = step_outcomes.iter().flat_map(|o| o.violations.clone()).collect();
    let min_approvals = step_outcomes.iter().map(|o| o.min_approvals).max().unwrap_or(0);
    let require_distinct_approvers = step_outcomes.iter().any(|o| o.require_distinct_approvers);
    let require_broker_credential = step_outcomes.iter().any(|o| o.require_broker_credential);
    let dataflow_triggered = step_outcomes.iter().any(|o| o.dataflow_triggered);

    let rate_limit = step_outcomes
        .iter()
        .filter_map(|o| o.rate_limit.clone())
        .fold(None, |acc, next| Some(tighter_rate_limit(acc, next)));
    let destructive_budget = step_outcomes
        .iter()
        .filter_map(|o| o.destructive_budget.clone())
        .fold(None, |acc, next| Some(tighter_rate_limit(acc, next)));

    let step_count = script.steps.len() as u32;
    if step_count > policy.scripts.max_steps {
        verdict = Verdict::Block;
        reasons.push(codes::SCRIPT_MAX_STEPS_EXCEEDED.to_string());
        violations.push(codes::SCRIPT_MAX_STEPS_EXCEEDED.to_string());
    } else if let Some(threshold) = policy.scripts.require_approval_above {
        if step_count > threshold && verdict < Verdict::RequireApproval {
            verdict = Verdict::RequireApproval;
        }
    }

    if policy.scripts.block_mixed_risk {
        let mut risk_classes: Vec<&str> = script
            .steps
            .iter()
            .map(|s| s.context.risk_class.as_str())
            .collect();
        risk_classes.sort_unstable();
        risk_classes.dedup();
        if risk_classes.len() > 1 {
            verdict = Verdict::Block;
            reasons.push(codes::SCRIPT_MIXED_RISK_BLOCKED.to_string());
            violations.push(codes::SCRIPT_MIXED_RISK_BLOCKED.to_string());
        }
    }

    let composite_risk = intent
        .script
        .as_ref()
        .and_then(|s| s.steps.iter().map(|s| s.context.risk_class.clone()).max_by_key(|r| risk_rank(r)));

    Ok(EvalOutcome {
        verdict,
        reasons,
        violations,
        matched_rule: None,
        min_approvals: if verdict == Verdict::RequireApproval && min_approvals == 0 {
            1
        } else {
            min_approvals
        },
        require_distinct_approvers,
        require_broker_credential,
        broker_ref: None,
        broker_scopes: vec![],
        rate_limit,
        destructive_budget,
        dataflow_triggered,
        step_verdicts: step_outcomes.iter().map(|o| o.verdict).collect(),
        script_hash: intent.script_hash.clone(),
        composite_risk,
    }
    .finalize())
}

fn risk_rank(risk_class: &str) -> u8 {
    match risk_class {
        "low" => 0,
        "medium" => 1,
        "high" => 2,
        "critical" => 3,
        _ => 0,
    }
}

fn tighter_rate_limit(a: Option<RateLimitConstraint>, b: RateLimitConstraint) -> RateLimitConstraint {
    let Some(a) = a else { return b };
    if a.limit != b.limit {
        return if a.limit < b.limit { a } else { b };
    }
    let window_rank = |w: &str| if w == "minute" { 0 } else { 1 };
    if window_rank(&a.window) != window_rank(&b.window) {
        return if window_rank(&a.window) < window_rank(&b.window) { a } else { b };
    }
    if a.scope <= b.scope { a } else { b }
}

fn evaluate_single(policy: &Policy, intent: &IntentRequest) -> GaitResult<EvalOutcome> {
    let matched = policy.rules.iter().find(|r| rule_matches(r, intent));

    let Some(rule) = matched else {
        let mut verdict = policy.default_verdict;
        let mut reasons = vec![codes::DEFAULT_VERDICT_APPLIED.to_string()];
        verdict = apply_phase_policy(verdict, &mut reasons, intent);
        let min_approvals = min_approvals_floor(verdict, 0);

        return Ok(EvalOutcome {
            verdict,
            reasons,
            violations: vec![],
            matched_rule: None,
            min_approvals,
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
        }
        .finalize());
    };

    let mut verdict = rule.effect;
    let mut reasons = vec![rule.reason_code.clone()];
    let mut violations: Vec<String> = rule.violation_code.iter().cloned().collect();
    let mut dataflow_triggered = false;

    // Dataflow constraint.
    if let Some(dataflow) = &rule.constraints.dataflow {
        let tainted = intent
            .arg_provenance
            .iter()
            .any(|p| dataflow.tainted_sources.contains(&p.source));
        let destination = intent
            .targets
            .iter()
            .any(|t| TAINT_DESTINATION_KINDS.contains(&t.kind.as_str()));
        if tainted && destination {
            dataflow_triggered = true;
            verdict = verdict.max(dataflow.action);
            let code = if dataflow.action == Verdict::Block {
                codes::DATAFLOW_TAINTED_SOURCE_BLOCKED
            } else {
                codes::DATAFLOW_TAINTED_SOURCE_REQUIRES_APPROVAL
            };
            reasons.push(code.to_string());
            violations.push(code.to_string());
        }
    }

    // Endpoint constraint.
    if let Some(endpoint) = &rule.constraints.endpoint {
        let path_rules = IncludeExcludeGlobs::new(&endpoint.allow_paths, &endpoint.deny_paths)
            .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, e.to_string()))?;
        let domain_rules = DomainRules::new(&endpoint.allow_domains, &endpoint.deny_domains);

        for target in &intent.targets {
            if matches!(path_rules.decide_path(Path::new(&target.value)), MatchDecision::DeniedByExclude | MatchDecision::DeniedByMissingInclude)
                && (target.kind == "path" || target.kind == "repo")
            {
                verdict = verdict.max(Verdict::Block);
                reasons.push(codes::ENDPOINT_PATH_DENIED.to_string());
                violations.push(codes::ENDPOINT_PATH_DENIED.to_string());
            }
            if let Some(domain) = &target.endpoint_domain {
                if matches!(domain_rules.decide(domain), MatchDecision::DeniedByExclude | MatchDecision::DeniedByMissingInclude) {
                    verdict = verdict.max(Verdict::Block);
                    reasons.push(codes::ENDPOINT_DOMAIN_DENIED.to_string());
                    violations.push(codes::ENDPOINT_DOMAIN_DENIED.to_string());
                }
            }
            if target.endpoint_class.starts_with("net.")
                && !endpoint.egress_classes.is_empty()
                && !endpoint.egress_classes.contains(&target.endpoint_class)
            {
                verdict = verdict.max(Verdict::Block);
                reasons.push(codes::ENDPOINT_EGRESS_CLASS_DENIED.to_string());
                violations.push(codes::ENDPOINT_EGRESS_CLASS_DENIED.to_string());
            }
        }

        if let Some(action) = endpoint.destructive_action {
            if intent.targets.iter().any(|t| t.destructive) {
                verdict = verdict.max(action);
                reasons.push(codes::ENDPOINT_DESTRUCTIVE_ACTION_BLOCKED.to_string());
                violations.push(codes::ENDPOINT_DESTRUCTIVE_ACTION_BLOCKED.to_string());
            }
        }
    }

    // Context-evidence constraint.
    if let Some(evidence) = &rule.constraints.context_evidence {
        if evidence.require_context_evidence || evidence.max_context_age_seconds.is_some() {
            if intent.context.context_set_digest.is_none() {
                verdict = Verdict::Block;
                reasons.push(codes::CONTEXT_EVIDENCE_MISSING.to_string());
                violations.push(codes::CONTEXT_EVIDENCE_MISSING.to_string());
            } else if evidence.require_context_evidence
                && intent.context.context_evidence_mode.as_deref() != Some("required")
            {
                verdict = Verdict::Block;
                reasons.push(codes::CONTEXT_EVIDENCE_MODE_NOT_REQUIRED.to_string());
                violations.push(codes::CONTEXT_EVIDENCE_MODE_NOT_REQUIRED.to_string());
            } else if let Some(limit) = evidence.max_context_age_seconds {
                match context_age_seconds(intent) {
                    Some(age) if age > limit as f64 => {
                        verdict = Verdict::Block;
                        reasons.push(codes::CONTEXT_EVIDENCE_TOO_OLD.to_string());
                        violations.push(codes::CONTEXT_EVIDENCE_TOO_OLD.to_string());
                    }
                    None => {
                        verdict = Verdict::Block;
                        reasons.push(codes::CONTEXT_EVIDENCE_MISSING.to_string());
                        violations.push(codes::CONTEXT_EVIDENCE_MISSING.to_string());
                    }
                    _ => {}
                }
            }
        }
    }

    // Phase policy.
    verdict = apply_phase_policy(verdict, &mut reasons, intent);
    let min_approvals = min_approvals_floor(verdict, rule.approval.min_approvals);

    Ok(EvalOutcome {
        verdict,
        reasons,
        violations,
        matched_rule: Some(rule.name.clone()),
        min_approvals,
        require_distinct_approvers: rule.approval.require_distinct_approvers,
        require_broker_credential: rule.approval.require_broker_credential,
        broker_ref: rule.approval.broker_ref.clone(),
        broker_scopes: rule.approval.broker_scopes.clone(),
        rate_limit: rule.constraints.rate_limit.clone(),
        destructive_budget: rule.constraints.destructive_budget.clone(),
        dataflow_triggered,
        step_verdicts: vec![],
        script_hash: intent.script_hash.clone(),
        composite_risk: Some(intent.context.risk_class.clone()),
    }
    .finalize())
}

/// Applies the phase policy (§4.E): destructive targets in the `plan` phase
/// are downgraded to `dry_run`, destructive targets in the `apply` phase are
/// raised to `require_approval`. Runs on both the matched-rule and
/// default-verdict paths, since it reads only `intent.context.phase` and
/// `target.destructive`, never `rule.constraints`.
fn apply_phase_policy(verdict: Verdict, reasons: &mut Vec<String>, intent: &IntentRequest) -> Verdict {
    let any_destructive = intent.targets.iter().any(|t| t.destructive);
    if intent.context.phase == "plan" && any_destructive && verdict < Verdict::DryRun {
        reasons.push(codes::PLAN_PHASE_NON_DESTRUCTIVE.to_string());
        Verdict::DryRun
    } else if intent.context.phase == "apply" && any_destructive && verdict < Verdict::RequireApproval {
        reasons.push(codes::DESTRUCTIVE_APPLY_REQUIRES_APPROVAL.to_string());
        Verdict::RequireApproval
    } else {
        verdict
    }
}

fn min_approvals_floor(verdict: Verdict, base: u32) -> u32 {
    if verdict == Verdict::RequireApproval && base == 0 { 1 } else { base }
}

fn context_age_seconds(intent: &IntentRequest) -> Option<f64> {
    let auth_context = intent.context.auth_context.as_ref()?;
    let raw = auth_context.get("context_age_seconds")?;
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn rule_matches(rule: &Rule, intent: &IntentRequest) -> bool {
    let m = &rule.r#match;
    list_clause_holds(&m.tools, std::slice::from_ref(&intent.tool_name))
        && list_clause_holds(
            &m.target_kinds,
            &intent.targets.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
        )
        && list_clause_holds(
            &m.endpoint_classes,
            &intent.targets.iter().map(|t| t.endpoint_class.clone()).collect::<Vec<_>>(),
        )
        && list_clause_holds(
            &m.sensitivities,
            &intent.targets.iter().map(|t| t.sensitivity.clone()).collect::<Vec<_>>(),
        )
        && list_clause_holds(&m.risk_classes, std::slice::from_ref(&intent.context.risk_class))
        && list_clause_holds(&m.phases, std::slice::from_ref(&intent.context.phase))
        && list_clause_holds(&m.identities, std::slice::from_ref(&intent.context.identity))
        && list_clause_holds(&m.workspaces, std::slice::from_ref(&intent.context.workspace))
        && bool_clause_holds(m.destructive, intent.targets.iter().any(|t| t.destructive))
        && delegation_clause_holds(m, &intent.delegation)
}

fn list_clause_holds(clause: &[String], candidates: &[String]) -> bool {
    clause.is_empty() || candidates.iter().any(|c| clause.contains(c))
}

fn bool_clause_holds(clause: Option<bool>, actual: bool) -> bool {
    clause.is_none_or(|want| want == actual)
}

fn delegation_clause_holds(m: &RuleMatch, delegation: &Option<Delegation>) -> bool {
    if let Some(want) = m.require_delegation {
        if want != delegation.is_some() {
            return false;
        }
    }
    if !m.delegation_allowlist.is_empty() {
        let requester = delegation.as_ref().map(|d| d.requester.to_lowercase());
        if !requester.is_some_and(|r| m.delegation_allowlist.contains(&r)) {
            return false;
        }
    }
    if !m.delegation_scopes.is_empty() {
        let scopes: Vec<String> = delegation
            .as_ref()
            .map(|d| d.chain.iter().map(|l| l.scope_class.clone()).collect())
            .unwrap_or_default();
        if !m.delegation_scopes.iter().any(|s| scopes.contains(s)) {
            return false;
        }
    }
    if let Some(max_depth) = m.delegation_max_depth {
        let depth = delegation.as_ref().map_or(0, |d| d.chain.len());
        if depth > max_depth {
            return false;
        }
    }
    true
}
