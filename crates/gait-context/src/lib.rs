// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Per-tool context overlay injection applied to an intent's context before
//! normalization (§4.K).
//!
//! [`inject`] never touches `identity`, `workspace`, or `risk_class` — those
//! are caller-supplied trust anchors, not overlay-able metadata. Callers are
//! expected to re-run the result through `gait_intent::normalize_intent`;
//! this crate does not validate or digest anything it touches.

use gait_intent::IntentContext;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Matches every tool name in a [`ContextOverlaySet`].
pub const WILDCARD_TOOL: &str = "*";

/// A patch applied to an [`IntentContext`] prior to normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextOverlay {
    /// Replaces the base `environment_fingerprint` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_fingerprint: Option<String>,
    /// Unioned into the base `credential_scopes`, not a replacement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credential_scopes: Vec<String>,
    /// Shallow-merged into the base `auth_context`; overlay wins on key
    /// collision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_context: Option<Map<String, Value>>,
    /// Floored against the base `context_evidence_mode`: `required` beats
    /// `best_effort`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_evidence_mode: Option<String>,
}

/// A registry of [`ContextOverlay`]s keyed by `tool_name`, with [`WILDCARD_TOOL`]
/// as a catch-all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextOverlaySet {
    /// Overlays keyed by `tool_name`; a key of [`WILDCARD_TOOL`] is the
    /// catch-all entry.
    pub entries: BTreeMap<String, ContextOverlay>,
}

impl ContextOverlaySet {
    /// Resolves the most specific overlay for `tool_name`: an exact match,
    /// falling back to the wildcard entry. At most one overlay applies.
    #[must_use]
    pub fn resolve(&self, tool_name: &str) -> Option<&ContextOverlay> {
        self.entries.get(tool_name).or_else(|| self.entries.get(WILDCARD_TOOL))
    }
}

/// Applies `overlay` to `base`, returning the patched context (§4.K).
#[must_use]
pub fn inject(mut base: IntentContext, overlay: &ContextOverlay) -> IntentContext {
    if let Some(fingerprint) = &overlay.environment_fingerprint {
        base.environment_fingerprint = Some(fingerprint.clone());
    }

    if !overlay.credential_scopes.is_empty() {
        for scope in &overlay.credential_scopes {
            if !base.credential_scopes.contains(scope) {
                base.credential_scopes.push(scope.clone());
            }
        }
        base.credential_scopes.sort();
    }

    if let Some(overlay_auth) = &overlay.auth_context {
        let mut merged = match base.auth_context.take() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in overlay_auth {
            merged.insert(key.clone(), value.clone());
        }
        base.auth_context = Some(Value::Object(merged));
    }

    if let Some(overlay_mode) = &overlay.context_evidence_mode {
        base.context_evidence_mode = Some(stricter_mode(base.context_evidence_mode.as_deref(), overlay_mode));
    }

    base
}

/// Resolves the overlay for `tool_name` in `set` and applies it to `base`,
/// or returns `base` unchanged if no overlay matches.
#[must_use]
pub fn inject_from_set(base: IntentContext, tool_name: &str, set: &ContextOverlaySet) -> IntentContext {
    match set.resolve(tool_name) {
        Some(overlay) => inject(base, overlay),
        None => base,
    }
}

fn evidence_mode_rank(mode: &str) -> u8 {
    match mode {
        "required" => 2,
        "best_effort" => 1,
        _ => 0,
    }
}

fn stricter_mode(base: Option<&str>, overlay: &str) -> String {
    match base {
        Some(existing) if evidence_mode_rank(existing) >= evidence_mode_rank(overlay) => existing.to_string(),
        _ => overlay.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_context() -> IntentContext {
        IntentContext {
            identity: "agent:bot-1".to_string(),
            workspace: "/ws".to_string(),
            risk_class: "low".to_string(),
            phase: "apply".to_string(),
            session_id: Some("session-1".to_string()),
            environment_fingerprint: Some("E1".to_string()),
            context_set_digest: None,
            context_evidence_mode: Some("best_effort".to_string()),
            credential_scopes: vec!["tool:fs.read".to_string()],
            auth_context: Some(Value::Object(Map::from_iter([(
                "tenant".to_string(),
                Value::String("acme".to_string()),
            )]))),
        }
    }

    #[test]
    fn overlay_replaces_environment_fingerprint_and_unions_scopes() {
        let overlay = ContextOverlay {
            environment_fingerprint: Some("E2".to_string()),
            credential_scopes: vec!["tool:fs.write".to_string(), "tool:fs.read".to_string()],
            auth_context: None,
            context_evidence_mode: None,
        };
        let injected = inject(base_context(), &overlay);
        assert_eq!(injected.environment_fingerprint.as_deref(), Some("E2"));
        assert_eq!(
            injected.credential_scopes,
            vec!["tool:fs.read".to_string(), "tool:fs.write".to_string()]
        );
    }

    #[test]
    fn overlay_never_touches_trust_anchors() {
        let overlay = ContextOverlay {
            environment_fingerprint: Some("E2".to_string()),
            ..Default::default()
        };
        let injected = inject(base_context(), &overlay);
        assert_eq!(injected.identity, "agent:bot-1");
        assert_eq!(injected.workspace, "/ws");
        assert_eq!(injected.risk_class, "low");
    }

    #[test]
    fn auth_context_shallow_merges_with_overlay_winning_ties() {
        let overlay = ContextOverlay {
            auth_context: Some(Map::from_iter([
                ("tenant".to_string(), Value::String("globex".to_string())),
                ("region".to_string(), Value::String("eu".to_string())),
            ])),
            ..Default::default()
        };
        let injected = inject(base_context(), &overlay);
        let merged = injected.auth_context.unwrap();
        assert_eq!(merged["tenant"], Value::String("globex".to_string()));
        assert_eq!(merged["region"], Value::String("eu".to_string()));
    }

    #[test]
    fn evidence_mode_floor_prefers_required_over_best_effort() {
        let overlay = ContextOverlay {
            context_evidence_mode: Some("required".to_string()),
            ..Default::default()
        };
        let injected = inject(base_context(), &overlay);
        assert_eq!(injected.context_evidence_mode.as_deref(), Some("required"));
    }

    #[test]
    fn evidence_mode_floor_keeps_existing_required_against_weaker_overlay() {
        let mut base = base_context();
        base.context_evidence_mode = Some("required".to_string());
        let overlay = ContextOverlay {
            context_evidence_mode: Some("best_effort".to_string()),
            ..Default::default()
        };
        let injected = inject(base, &overlay);
        assert_eq!(injected.context_evidence_mode.as_deref(), Some("required"));
    }

    #[test]
    fn overlay_set_resolves_exact_match_before_wildcard() {
        let set = ContextOverlaySet {
            entries: BTreeMap::from_iter([
                (
                    WILDCARD_TOOL.to_string(),
                    ContextOverlay {
                        environment_fingerprint: Some("wildcard-fp".to_string()),
                        ..Default::default()
                    },
                ),
                (
                    "fs.write".to_string(),
                    ContextOverlay {
                        environment_fingerprint: Some("specific-fp".to_string()),
                        ..Default::default()
                    },
                ),
            ]),
        };
        let injected = inject_from_set(base_context(), "fs.write", &set);
        assert_eq!(injected.environment_fingerprint.as_deref(), Some("specific-fp"));

        let fallback = inject_from_set(base_context(), "fs.read", &set);
        assert_eq!(fallback.environment_fingerprint.as_deref(), Some("wildcard-fp"));
    }

    #[test]
    fn overlay_set_with_no_match_returns_base_unchanged() {
        let set = ContextOverlaySet { entries: BTreeMap::new() };
        let injected = inject_from_set(base_context(), "fs.read", &set);
        assert_eq!(injected, base_context());
    }
}
