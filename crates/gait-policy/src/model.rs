// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalized policy data model (§3, §4.D).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A policy outcome, totally ordered from least to most restrictive:
/// `allow < dry_run < require_approval < block`.
///
/// Constraint composition and script rollup only ever *raise* a verdict
/// along this lattice, never lower it, so `max` is the correct combinator
/// for aggregating several partial verdicts into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    DryRun,
    RequireApproval,
    Block,
}

impl Verdict {
    /// Parses a verdict from its lowercase wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "dry_run" => Some(Self::DryRun),
            "require_approval" => Some(Self::RequireApproval),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    /// The lowercase wire name of this verdict.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::DryRun => "dry_run",
            Self::RequireApproval => "require_approval",
            Self::Block => "block",
        }
    }
}

/// Rate-limit scopes a rule's `rate_limit` constraint may key on.
pub const RATE_LIMIT_SCOPES: &[&str] = &["tool", "identity", "tool_identity"];

/// Rate-limit windows a rule's `rate_limit` constraint may use.
pub const RATE_LIMIT_WINDOWS: &[&str] = &["minute", "hour"];

/// A windowed request budget attached to a rule or destructive-action limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateLimitConstraint {
    pub scope: String,
    pub window: String,
    pub limit: u64,
}

/// Endpoint-level allow/deny constraints composed against a rule's targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EndpointConstraint {
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub deny_paths: Vec<String>,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub deny_domains: Vec<String>,
    #[serde(default)]
    pub egress_classes: Vec<String>,
    #[serde(default)]
    pub destructive_action: Option<Verdict>,
}

/// Dataflow taint-propagation constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataflowConstraint {
    #[serde(default)]
    pub tainted_sources: Vec<String>,
    pub action: Verdict,
}

/// Context-evidence freshness constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContextEvidenceConstraint {
    #[serde(default)]
    pub require_context_evidence: bool,
    #[serde(default)]
    pub max_context_age_seconds: Option<u64>,
}

/// Delegation-shape constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationConstraint {
    #[serde(default)]
    pub require_delegation: bool,
    #[serde(default)]
    pub allowed_delegators: Vec<String>,
    #[serde(default)]
    pub allowed_scopes: Vec<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

/// The full set of optional constraints a rule may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Constraints {
    #[serde(default)]
    pub dataflow: Option<DataflowConstraint>,
    #[serde(default)]
    pub endpoint: Option<EndpointConstraint>,
    #[serde(default)]
    pub context_evidence: Option<ContextEvidenceConstraint>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConstraint>,
    #[serde(default)]
    pub destructive_budget: Option<RateLimitConstraint>,
    #[serde(default)]
    pub delegation: Option<DelegationConstraint>,
}

/// Approval requirements a matched rule attaches to a `require_approval`
/// (or escalated) verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalParams {
    #[serde(default)]
    pub min_approvals: u32,
    #[serde(default)]
    pub require_distinct_approvers: bool,
    #[serde(default)]
    pub require_broker_credential: bool,
    #[serde(default)]
    pub broker_ref: Option<String>,
    #[serde(default)]
    pub broker_scopes: Vec<String>,
}

/// Match clauses tested against a normalized intent. Every non-empty clause
/// must hold for the rule to match (an AND across clauses); within a list
/// clause, any one value present in the intent satisfies it (an OR within
/// the clause).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleMatch {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub target_kinds: Vec<String>,
    #[serde(default)]
    pub endpoint_classes: Vec<String>,
    #[serde(default)]
    pub sensitivities: Vec<String>,
    #[serde(default)]
    pub risk_classes: Vec<String>,
    #[serde(default)]
    pub phases: Vec<String>,
    #[serde(default)]
    pub identities: Vec<String>,
    #[serde(default)]
    pub workspaces: Vec<String>,
    #[serde(default)]
    pub destructive: Option<bool>,
    #[serde(default)]
    pub require_delegation: Option<bool>,
    #[serde(default)]
    pub delegation_allowlist: Vec<String>,
    #[serde(default)]
    pub delegation_scopes: Vec<String>,
    #[serde(default)]
    pub delegation_max_depth: Option<usize>,
}

/// A single normalized policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub name: String,
    pub priority: i64,
    pub effect: Verdict,
    #[serde(default)]
    pub r#match: RuleMatch,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub approval: ApprovalParams,
    pub reason_code: String,
    #[serde(default)]
    pub violation_code: Option<String>,
}

/// The fail-closed gate (§4.E step 2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FailClosed {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub risk_classes: Vec<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Script-level rollup overrides (§4.E step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptPolicy {
    pub max_steps: u32,
    #[serde(default)]
    pub require_approval_above: Option<u32>,
    #[serde(default)]
    pub block_mixed_risk: bool,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            max_steps: 64,
            require_approval_above: None,
            block_mixed_risk: false,
        }
    }
}

/// A fully parsed and normalized policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    pub schema_id: String,
    pub schema_version: String,
    pub default_verdict: Verdict,
    #[serde(default)]
    pub fail_closed: FailClosed,
    #[serde(default)]
    pub scripts: ScriptPolicy,
    pub rules: Vec<Rule>,
}
