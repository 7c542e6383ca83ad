// SPDX-License-Identifier: MIT OR Apache-2.0

//! The eight-step normalization algorithm (§4.C).

use crate::model::{
    ArgProvenance, CONTEXT_EVIDENCE_MODES, Delegation, DelegationChainLink, IntentContext,
    IntentRequest, PHASES, PROVENANCE_SOURCES, RISK_CLASSES, RawArgProvenance, RawDelegation,
    RawIntentContext, RawIntentRequest, RawTarget, Script, Target, is_valid_endpoint_class,
};
use gait_core::{digest_json, digest_value, is_64_hex, without_field};
use gait_error::{GaitError, GaitResult, codes};
use serde_json::Value;

const MAX_SCRIPT_STEPS: usize = 64;

const DESTRUCTIVE_OPERATIONS: &[&str] =
    &["delete", "remove", "drop", "truncate", "exec", "spawn"];
const DESTRUCTIVE_ENDPOINT_CLASSES: &[&str] = &["fs.delete", "proc.exec"];

/// Validates, normalizes, and digests a raw intent request (§4.C).
///
/// Runs the eight normalization steps in the order the contract fixes:
/// script recursion, `tool_name` normalization, deep `args` normalization,
/// target normalization, arg-provenance normalization, context validation,
/// delegation normalization, and finally digest computation.
///
/// # Errors
///
/// Returns a `validation` error on the first failed check.
pub fn normalize_intent(raw: RawIntentRequest) -> GaitResult<IntentRequest> {
    // Step 1: script recursion.
    let script = match raw.script {
        Some(raw_script) => {
            let step_count = raw_script.steps.len();
            if step_count < 1 || step_count > MAX_SCRIPT_STEPS {
                return Err(GaitError::validation(
                    codes::INVALID_SCRIPT_STEP_COUNT,
                    format!("script must have between 1 and {MAX_SCRIPT_STEPS} steps, got {step_count}"),
                ));
            }
            let steps = raw_script
                .steps
                .into_iter()
                .map(normalize_intent)
                .collect::<GaitResult<Vec<_>>>()?;
            Some(Script { steps })
        }
        None => None,
    };

    // Step 2: tool_name.
    let tool_name = if script.is_some() {
        "script".to_string()
    } else {
        let trimmed = raw.tool_name.trim().to_lowercase();
        if trimmed.is_empty() {
            return Err(GaitError::validation(
                codes::TOOL_NAME_REQUIRED,
                "tool_name is required",
            ));
        }
        trimmed
    };

    // Step 3: deep-normalize args.
    let args = deep_normalize_value(&raw.args)?;

    // Step 4: normalize targets.
    let mut targets = raw
        .targets
        .into_iter()
        .map(|t| normalize_target(t, &tool_name))
        .collect::<GaitResult<Vec<_>>>()?;

    // Step 5: normalize arg_provenance.
    let mut arg_provenance = raw
        .arg_provenance
        .into_iter()
        .map(normalize_arg_provenance)
        .collect::<GaitResult<Vec<_>>>()?;

    if let Some(script) = &script {
        for step in &script.steps {
            targets.extend(step.targets.iter().cloned());
            arg_provenance.extend(step.arg_provenance.iter().cloned());
        }
    }
    targets.sort();
    targets.dedup();
    arg_provenance.sort();
    arg_provenance.dedup();

    // Step 6: validate context.
    let context = normalize_context(raw.context)?;

    // Step 7: normalize delegation.
    let delegation = raw.delegation.map(normalize_delegation).transpose()?;

    // Step 8: compute digests.
    let args_digest = digest_value(&args)?;
    let script_hash = script.as_ref().map(digest_json).transpose()?;

    let mut intent = IntentRequest {
        tool_name,
        args,
        targets,
        arg_provenance,
        skill_provenance: raw.skill_provenance,
        delegation,
        context,
        script,
        args_digest,
        script_hash,
        intent_digest: String::new(),
    };
    intent.intent_digest = compute_intent_digest(&intent)?;
    Ok(intent)
}

fn compute_intent_digest(intent: &IntentRequest) -> GaitResult<String> {
    let value = serde_json::to_value(intent).map_err(|e| {
        GaitError::validation(codes::ENCODING_ERROR, format!("not json-representable: {e}"))
    })?;
    let stripped = without_field(&value, "intent_digest");
    digest_value(&stripped)
}

/// Computes only the `intent_digest` a raw request would normalize to.
///
/// # Errors
///
/// Propagates [`normalize_intent`]'s errors.
pub fn intent_digest(raw: RawIntentRequest) -> GaitResult<String> {
    Ok(normalize_intent(raw)?.intent_digest)
}

/// Computes the canonical digest of a (not yet normalized) args object.
///
/// # Errors
///
/// Propagates [`deep_normalize_value`]'s errors.
pub fn args_digest(args: &Value) -> GaitResult<String> {
    digest_value(&deep_normalize_value(args)?)
}

/// Computes only the `script_hash` a raw request would normalize to, or
/// `Ok(None)` if it carries no script.
///
/// # Errors
///
/// Propagates [`normalize_intent`]'s errors.
pub fn script_hash(raw: RawIntentRequest) -> GaitResult<Option<String>> {
    Ok(normalize_intent(raw)?.script_hash)
}

/// Trims string values, rejects empty object keys (after trim), preserves
/// numeric types, and recurses into arrays and objects.
fn deep_normalize_value(value: &Value) -> GaitResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        Value::Array(items) => {
            let normalized = items
                .iter()
                .map(deep_normalize_value)
                .collect::<GaitResult<Vec<_>>>()?;
            Ok(Value::Array(normalized))
        }
        Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (key, val) in map {
                let trimmed_key = key.trim();
                if trimmed_key.is_empty() {
                    return Err(GaitError::validation(
                        codes::EMPTY_ARG_KEY,
                        "object keys must be non-empty after trim",
                    ));
                }
                normalized.insert(trimmed_key.to_string(), deep_normalize_value(val)?);
            }
            Ok(Value::Object(normalized))
        }
        other => Ok(other.clone()),
    }
}

fn normalize_target(raw: RawTarget, tool_name: &str) -> GaitResult<Target> {
    let kind = raw.kind.trim().to_lowercase();
    if !crate::model::TARGET_KINDS.contains(&kind.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_TARGET_KIND,
            format!("unknown target kind: {kind}"),
        ));
    }
    let value = raw.value.trim().to_string();
    let operation = raw.operation.trim().to_lowercase();
    let sensitivity = raw.sensitivity.trim().to_lowercase();

    let (endpoint_class, discovery_method) = match raw
        .endpoint_class
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(explicit) => {
            let lowered = explicit.to_lowercase();
            if !is_valid_endpoint_class(&lowered) {
                return Err(GaitError::validation(
                    codes::INVALID_ENDPOINT_CLASS,
                    format!("unknown endpoint class: {lowered}"),
                ));
            }
            (lowered, "explicit".to_string())
        }
        None => (
            infer_endpoint_class(&kind, &operation, tool_name),
            "inferred".to_string(),
        ),
    };

    let endpoint_domain = raw
        .endpoint_domain
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .or_else(|| infer_endpoint_domain(&kind, &value));

    let destructive = raw.destructive.unwrap_or_else(|| {
        DESTRUCTIVE_ENDPOINT_CLASSES.contains(&endpoint_class.as_str())
            || DESTRUCTIVE_OPERATIONS.contains(&operation.as_str())
    });

    let mut hints: Vec<String> = raw.hints.into_iter().map(|h| h.trim().to_lowercase()).collect();
    hints.sort();
    hints.dedup();

    Ok(Target {
        kind,
        value,
        operation,
        sensitivity,
        endpoint_class,
        endpoint_domain,
        destructive,
        discovery_method,
        hints,
    })
}

fn infer_endpoint_class(kind: &str, operation: &str, tool_name: &str) -> String {
    if DESTRUCTIVE_OPERATIONS.contains(&operation) && (kind == "path" || tool_name.contains("file"))
    {
        return "fs.delete".to_string();
    }
    match kind {
        "path" => match operation {
            "write" | "create" | "append" => "fs.write".to_string(),
            _ => "fs.read".to_string(),
        },
        "url" => "net.http".to_string(),
        "host" => "net.dns".to_string(),
        _ => {
            if tool_name.contains("exec") || tool_name.contains("shell") || tool_name.contains("run")
            {
                "proc.exec".to_string()
            } else {
                "other".to_string()
            }
        }
    }
}

fn infer_endpoint_domain(kind: &str, value: &str) -> Option<String> {
    match kind {
        "host" => Some(value.to_lowercase()),
        "url" => extract_domain(value),
        _ => None,
    }
}

fn extract_domain(value: &str) -> Option<String> {
    let without_scheme = value.split("://").nth(1).unwrap_or(value);
    let authority = without_scheme.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn normalize_arg_provenance(raw: RawArgProvenance) -> GaitResult<ArgProvenance> {
    let arg_path = raw.arg_path.trim().to_string();
    let source = raw.source.trim().to_lowercase();
    if !PROVENANCE_SOURCES.contains(&source.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_PROVENANCE_SOURCE,
            format!("unknown provenance source: {source}"),
        ));
    }
    let integrity_digest = raw
        .integrity_digest
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty());
    if let Some(digest) = &integrity_digest {
        if !is_64_hex(digest) {
            return Err(GaitError::validation(
                codes::INVALID_INTEGRITY_DIGEST,
                "integrity_digest must be 64 lowercase hex characters",
            ));
        }
    }
    Ok(ArgProvenance {
        arg_path,
        source,
        source_ref: raw.source_ref.map(|s| s.trim().to_string()),
        integrity_digest,
    })
}

fn normalize_context(raw: RawIntentContext) -> GaitResult<IntentContext> {
    let identity = raw.identity.trim().to_string();
    if identity.is_empty() {
        return Err(GaitError::validation(
            codes::MISSING_CONTEXT_IDENTITY,
            "context.identity is required",
        ));
    }
    let workspace = raw.workspace.trim().replace('\\', "/");
    if workspace.is_empty() {
        return Err(GaitError::validation(
            codes::MISSING_CONTEXT_WORKSPACE,
            "context.workspace is required",
        ));
    }
    let risk_class = raw.risk_class.trim().to_lowercase();
    if risk_class.is_empty() {
        return Err(GaitError::validation(
            codes::MISSING_CONTEXT_RISK_CLASS,
            "context.risk_class is required",
        ));
    }
    if !RISK_CLASSES.contains(&risk_class.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_RISK_CLASS,
            format!("unknown risk class: {risk_class}"),
        ));
    }

    let phase = raw
        .phase
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "apply".to_string());
    if !PHASES.contains(&phase.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_PHASE,
            format!("unknown phase: {phase}"),
        ));
    }

    let context_evidence_mode = raw
        .context_evidence_mode
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty());
    if let Some(mode) = &context_evidence_mode {
        if !CONTEXT_EVIDENCE_MODES.contains(&mode.as_str()) {
            return Err(GaitError::validation(
                codes::INVALID_CONTEXT_EVIDENCE_MODE,
                format!("unknown context evidence mode: {mode}"),
            ));
        }
    }

    let context_set_digest = raw
        .context_set_digest
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty());
    if let Some(digest) = &context_set_digest {
        if !is_64_hex(digest) {
            return Err(GaitError::validation(
                codes::INVALID_CONTEXT_SET_DIGEST,
                "context_set_digest must be 64 lowercase hex characters",
            ));
        }
    }

    let mut credential_scopes: Vec<String> = raw
        .credential_scopes
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .collect();
    credential_scopes.sort();
    credential_scopes.dedup();

    let auth_context = raw.auth_context.map(|v| deep_normalize_value(&v)).transpose()?;

    Ok(IntentContext {
        identity,
        workspace,
        risk_class,
        phase,
        session_id: raw.session_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        environment_fingerprint: raw
            .environment_fingerprint
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty()),
        context_set_digest,
        context_evidence_mode,
        credential_scopes,
        auth_context,
    })
}

fn normalize_delegation(raw: RawDelegation) -> GaitResult<Delegation> {
    let requester = raw.requester.trim().to_string();
    if requester.is_empty() {
        return Err(GaitError::validation(
            codes::MISSING_DELEGATION_REQUESTER,
            "delegation.requester is required",
        ));
    }

    let chain = raw
        .chain
        .into_iter()
        .map(normalize_delegation_link)
        .collect::<GaitResult<Vec<_>>>()?;

    let mut token_refs: Vec<String> = raw.token_refs.into_iter().map(|t| t.trim().to_string()).collect();
    token_refs.sort();
    token_refs.dedup();

    Ok(Delegation {
        requester,
        chain,
        token_refs,
    })
}

fn normalize_delegation_link(link: DelegationChainLink) -> GaitResult<DelegationChainLink> {
    let delegator = link.delegator.trim().to_string();
    let delegate = link.delegate.trim().to_string();
    if delegator.is_empty() || delegate.is_empty() {
        return Err(GaitError::validation(
            codes::MISSING_DELEGATION_LINK_IDENTITY,
            "delegation chain links require both delegator and delegate identities",
        ));
    }
    Ok(DelegationChainLink {
        delegator,
        delegate,
        scope_class: link.scope_class.trim().to_lowercase(),
        token_ref: link.token_ref.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
    })
}
