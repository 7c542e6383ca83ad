// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalized intent data model (§3).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target kinds a rule or constraint may reference.
pub const TARGET_KINDS: &[&str] = &[
    "path", "url", "host", "repo", "bucket", "table", "queue", "topic", "other",
];

/// Non-`ui.*` endpoint classes; any string beginning with `ui.` is also valid.
pub const ENDPOINT_CLASSES: &[&str] = &[
    "fs.read",
    "fs.write",
    "fs.delete",
    "proc.exec",
    "net.http",
    "net.dns",
    "other",
];

/// Returns `true` if `s` is a recognized endpoint class: one of
/// [`ENDPOINT_CLASSES`] or any `ui.*`-prefixed string.
#[must_use]
pub fn is_valid_endpoint_class(s: &str) -> bool {
    ENDPOINT_CLASSES.contains(&s) || s.starts_with("ui.")
}

/// Provenance sources for an argument value.
pub const PROVENANCE_SOURCES: &[&str] = &["user", "tool_output", "external", "system"];

/// Risk classes, ascending severity.
pub const RISK_CLASSES: &[&str] = &["low", "medium", "high", "critical"];

/// Intent phases.
pub const PHASES: &[&str] = &["plan", "apply"];

/// Context-evidence strictness modes.
pub const CONTEXT_EVIDENCE_MODES: &[&str] = &["best_effort", "required"];

/// A single proposed sub-resource a tool invocation touches.
///
/// Field order doubles as the total sort key used to deduplicate and order
/// a target list deterministically (§4.C step 4): `(kind, value, operation,
/// sensitivity, endpoint_class, endpoint_domain, destructive,
/// discovery_method, hints)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    pub kind: String,
    pub value: String,
    pub operation: String,
    pub sensitivity: String,
    pub endpoint_class: String,
    pub endpoint_domain: Option<String>,
    pub destructive: bool,
    /// `"explicit"` when the caller supplied `endpoint_class`/`endpoint_domain`
    /// directly, `"inferred"` when step 4 derived them.
    pub discovery_method: String,
    pub hints: Vec<String>,
}

/// Where a single `args` value (addressed by `arg_path`, a JSON-pointer-like
/// dotted path) originated.
///
/// Field order is the sort key for step 5: `(arg_path, source, source_ref,
/// integrity_digest)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct ArgProvenance {
    pub arg_path: String,
    pub source: String,
    pub source_ref: Option<String>,
    pub integrity_digest: Option<String>,
}

/// Provenance of an invoked "skill" (a named, possibly third-party, bundle
/// of tool behavior).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SkillProvenance {
    pub skill_name: String,
    pub source: String,
    pub publisher: String,
    pub digest: Option<String>,
}

/// One hop in a delegation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationChainLink {
    pub delegator: String,
    pub delegate: String,
    pub scope_class: String,
    pub token_ref: Option<String>,
}

/// Delegation metadata for an intent acting on behalf of another identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Delegation {
    pub requester: String,
    pub chain: Vec<DelegationChainLink>,
    pub token_refs: Vec<String>,
}

/// The ambient context an intent was issued under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntentContext {
    pub identity: String,
    pub workspace: String,
    pub risk_class: String,
    #[serde(default = "default_phase")]
    pub phase: String,
    pub session_id: Option<String>,
    pub environment_fingerprint: Option<String>,
    pub context_set_digest: Option<String>,
    pub context_evidence_mode: Option<String>,
    pub credential_scopes: Vec<String>,
    pub auth_context: Option<Value>,
}

fn default_phase() -> String {
    "apply".to_string()
}

/// An ordered sequence of sub-intents executed as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Script {
    pub steps: Vec<IntentRequest>,
}

/// A proposed tool invocation, normalized and digested (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntentRequest {
    pub tool_name: String,
    pub args: Value,
    pub targets: Vec<Target>,
    pub arg_provenance: Vec<ArgProvenance>,
    pub skill_provenance: Option<SkillProvenance>,
    pub delegation: Option<Delegation>,
    pub context: IntentContext,
    pub script: Option<Script>,
    pub args_digest: String,
    pub script_hash: Option<String>,
    pub intent_digest: String,
}

/// Loosely validated wire shape accepted by [`crate::normalize_intent`].
///
/// Unlike [`IntentRequest`], fields carry permissive defaults so that
/// partially-specified or hand-authored documents can be normalized rather
/// than rejected at the deserialization layer; `normalize_intent` performs
/// the actual validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIntentRequest {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default = "default_args")]
    pub args: Value,
    #[serde(default)]
    pub targets: Vec<RawTarget>,
    #[serde(default)]
    pub arg_provenance: Vec<RawArgProvenance>,
    #[serde(default)]
    pub skill_provenance: Option<SkillProvenance>,
    #[serde(default)]
    pub delegation: Option<RawDelegation>,
    pub context: RawIntentContext,
    #[serde(default)]
    pub script: Option<RawScript>,
}

fn default_args() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub sensitivity: String,
    #[serde(default)]
    pub endpoint_class: Option<String>,
    #[serde(default)]
    pub endpoint_domain: Option<String>,
    #[serde(default)]
    pub destructive: Option<bool>,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawArgProvenance {
    #[serde(default)]
    pub arg_path: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub integrity_digest: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDelegation {
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub chain: Vec<DelegationChainLink>,
    #[serde(default)]
    pub token_refs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIntentContext {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub risk_class: String,
    pub phase: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub environment_fingerprint: Option<String>,
    #[serde(default)]
    pub context_set_digest: Option<String>,
    #[serde(default)]
    pub context_evidence_mode: Option<String>,
    #[serde(default)]
    pub credential_scopes: Vec<String>,
    #[serde(default)]
    pub auth_context: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawScript {
    #[serde(default)]
    pub steps: Vec<RawIntentRequest>,
}
