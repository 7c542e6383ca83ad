// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Approved-script registry: matching a script intent against signed,
//! pre-approved tool sequences (§4.H).
//!
//! Registry files are read in either of two shapes — an `{"entries": [...]}`
//! envelope or a bare JSON list — but [`save_entries`] always writes the
//! envelope form (§9).

mod model;

pub use model::{ApprovedScriptEntry, ApprovedScriptFile};

use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use gait_core::{atomic_write, schema_id, SCHEMA_VERSION};
use gait_error::{GaitError, GaitResult, codes};
use gait_intent::IntentRequest;
use gait_sign::{sign_json, verify_json};
use std::path::Path;

/// Outcome of [`match_approved_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A registry entry matched; carries its `pattern_id`.
    Matched {
        /// The matched entry's `pattern_id`.
        pattern_id: String,
    },
    /// No entry matched.
    NotMatched {
        /// Always [`codes::APPROVED_SCRIPT_NOT_FOUND`].
        reason: &'static str,
    },
}

/// Signs and returns `entry` with `signature` attached (§4.H: "Signature is
/// over the entry with `signature` absent").
///
/// # Errors
///
/// Propagates [`gait_sign::sign_json`]'s errors.
pub fn sign_entry(signing_key: &SigningKey, key_id: &str, mut entry: ApprovedScriptEntry) -> GaitResult<ApprovedScriptEntry> {
    entry.signature = None;
    entry.signature = Some(sign_json(signing_key, key_id, &entry)?);
    Ok(entry)
}

/// Matches `intent` against `entries` as of `now` (§4.H).
///
/// An entry matches if it is unexpired, its signature verifies under
/// `verifying_key`, its `policy_digest` and `script_hash` equal the
/// intent's, and its `tool_sequence` equals the intent's step tool-name
/// sequence (a single, non-script intent is treated as a one-element
/// sequence). The first matching entry wins.
#[tracing::instrument(skip(verifying_key, intent, entries), fields(tool_name = %intent.tool_name))]
#[must_use]
pub fn match_approved_script(
    verifying_key: &VerifyingKey,
    intent: &IntentRequest,
    policy_digest: &str,
    entries: &[ApprovedScriptEntry],
    now: DateTime<Utc>,
) -> MatchOutcome {
    let tool_sequence = tool_sequence(intent);
    let Some(script_hash) = &intent.script_hash else {
        tracing::warn!("intent carries no script_hash, cannot match against the registry");
        return MatchOutcome::NotMatched {
            reason: codes::APPROVED_SCRIPT_NOT_FOUND,
        };
    };

    for entry in entries {
        if entry.expires_at <= now {
            continue;
        }
        if entry.policy_digest != policy_digest {
            continue;
        }
        if &entry.script_hash != script_hash {
            continue;
        }
        if entry.tool_sequence != tool_sequence {
            continue;
        }
        let Some(signature) = &entry.signature else {
            continue;
        };
        match verify_json(verifying_key, signature, entry) {
            Ok(true) => {
                tracing::debug!(pattern_id = %entry.pattern_id, "approved script matched");
                return MatchOutcome::Matched {
                    pattern_id: entry.pattern_id.clone(),
                };
            }
            _ => continue,
        }
    }

    tracing::warn!("no approved-script entry matched this intent");
    MatchOutcome::NotMatched {
        reason: codes::APPROVED_SCRIPT_NOT_FOUND,
    }
}

fn tool_sequence(intent: &IntentRequest) -> Vec<String> {
    match &intent.script {
        Some(script) => script.steps.iter().map(|step| step.tool_name.clone()).collect(),
        None => vec![intent.tool_name.clone()],
    }
}

/// Loads registry entries from `path`, accepting either the envelope or the
/// bare-list file shape (§9).
///
/// # Errors
///
/// Returns an `io_failure` error if the file cannot be read, or a
/// `validation` error tagged [`codes::ENCODING_ERROR`] if neither shape
/// parses.
pub fn load_entries(path: &Path) -> GaitResult<Vec<ApprovedScriptEntry>> {
    let contents = std::fs::read_to_string(path).map_err(|e| GaitError::io_failure("io_read_failed", format!("{e}")))?;

    if let Ok(file) = serde_json::from_str::<ApprovedScriptFile>(&contents) {
        return Ok(file.entries);
    }
    serde_json::from_str::<Vec<ApprovedScriptEntry>>(&contents)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("corrupt approved-script registry: {e}")))
}

/// Writes `entries` to `path` in the envelope form, atomically, at mode
/// 0600.
///
/// # Errors
///
/// Returns a `validation` error if `entries` is not JSON-representable, or
/// propagates [`atomic_write`]'s `io_failure` errors.
pub fn save_entries(path: &Path, entries: &[ApprovedScriptEntry]) -> GaitResult<()> {
    let file = ApprovedScriptFile {
        entries: entries.to_vec(),
    };
    let bytes = serde_json::to_vec_pretty(&file)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("{e}")))?;
    atomic_write(path, &bytes, 0o600)
}

/// Builds an unsigned entry ready for [`sign_entry`].
#[must_use]
pub fn new_entry(
    pattern_id: impl Into<String>,
    policy_digest: impl Into<String>,
    script_hash: impl Into<String>,
    tool_sequence: Vec<String>,
    approver_identity: impl Into<String>,
    expires_at: DateTime<Utc>,
) -> ApprovedScriptEntry {
    ApprovedScriptEntry {
        schema_id: schema_id::APPROVED_SCRIPT_ENTRY.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        pattern_id: pattern_id.into(),
        policy_digest: policy_digest.into(),
        script_hash: script_hash.into(),
        tool_sequence,
        approver_identity: approver_identity.into(),
        expires_at,
        signature: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_intent::{RawArgProvenance, RawIntentContext, RawIntentRequest, RawScript, RawTarget};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, VerifyingKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        (sk, vk)
    }

    fn now() -> DateTime<Utc> {
        "2026-03-01T00:00:00Z".parse().unwrap()
    }

    fn raw_step(tool: &str) -> RawIntentRequest {
        RawIntentRequest {
            tool_name: tool.to_string(),
            args: serde_json::json!({}),
            targets: Vec::<RawTarget>::new(),
            arg_provenance: Vec::<RawArgProvenance>::new(),
            skill_provenance: None,
            delegation: None,
            context: RawIntentContext {
                identity: "agent:bot-1".to_string(),
                workspace: "/ws".to_string(),
                risk_class: "low".to_string(),
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

    fn script_intent(tools: &[&str]) -> IntentRequest {
        gait_intent::normalize_intent(RawIntentRequest {
            script: Some(RawScript {
                steps: tools.iter().map(|t| raw_step(t)).collect(),
            }),
            ..raw_step(tools[0])
        })
        .unwrap()
    }

    #[test]
    fn matching_entry_is_found() {
        let (sk, vk) = keypair();
        let intent = script_intent(&["fs.read", "fs.write"]);
        let entry = sign_entry(
            &sk,
            "key-1",
            new_entry(
                "pattern-1",
                "policy-digest",
                intent.script_hash.clone().unwrap(),
                vec!["fs.read".to_string(), "fs.write".to_string()],
                "user:alice",
                now() + chrono::Duration::hours(1),
            ),
        )
        .unwrap();

        let outcome = match_approved_script(&vk, &intent, "policy-digest", &[entry], now());
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                pattern_id: "pattern-1".to_string()
            }
        );
    }

    #[test]
    fn expired_entry_does_not_match() {
        let (sk, vk) = keypair();
        let intent = script_intent(&["fs.read"]);
        let entry = sign_entry(
            &sk,
            "key-1",
            new_entry(
                "pattern-1",
                "policy-digest",
                intent.script_hash.clone().unwrap(),
                vec!["fs.read".to_string()],
                "user:alice",
                now() - chrono::Duration::hours(1),
            ),
        )
        .unwrap();

        let outcome = match_approved_script(&vk, &intent, "policy-digest", &[entry], now());
        assert_eq!(
            outcome,
            MatchOutcome::NotMatched {
                reason: codes::APPROVED_SCRIPT_NOT_FOUND
            }
        );
    }

    #[test]
    fn mismatched_tool_sequence_does_not_match() {
        let (sk, vk) = keypair();
        let intent = script_intent(&["fs.read", "fs.delete"]);
        let entry = sign_entry(
            &sk,
            "key-1",
            new_entry(
                "pattern-1",
                "policy-digest",
                intent.script_hash.clone().unwrap(),
                vec!["fs.read".to_string(), "fs.write".to_string()],
                "user:alice",
                now() + chrono::Duration::hours(1),
            ),
        )
        .unwrap();

        let outcome = match_approved_script(&vk, &intent, "policy-digest", &[entry], now());
        assert_eq!(
            outcome,
            MatchOutcome::NotMatched {
                reason: codes::APPROVED_SCRIPT_NOT_FOUND
            }
        );
    }

    #[test]
    fn tampered_entry_does_not_match() {
        let (sk, vk) = keypair();
        let intent = script_intent(&["fs.read"]);
        let mut entry = sign_entry(
            &sk,
            "key-1",
            new_entry(
                "pattern-1",
                "policy-digest",
                intent.script_hash.clone().unwrap(),
                vec!["fs.read".to_string()],
                "user:alice",
                now() + chrono::Duration::hours(1),
            ),
        )
        .unwrap();
        entry.approver_identity = "user:mallory".to_string();

        let outcome = match_approved_script(&vk, &intent, "policy-digest", &[entry], now());
        assert_eq!(
            outcome,
            MatchOutcome::NotMatched {
                reason: codes::APPROVED_SCRIPT_NOT_FOUND
            }
        );
    }

    #[test]
    fn load_entries_accepts_both_envelope_and_bare_list_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let (sk, _vk) = keypair();
        let entry = sign_entry(
            &sk,
            "key-1",
            new_entry(
                "pattern-1",
                "policy-digest",
                "a".repeat(64),
                vec!["fs.read".to_string()],
                "user:alice",
                now() + chrono::Duration::hours(1),
            ),
        )
        .unwrap();

        let envelope_path = dir.path().join("envelope.json");
        save_entries(&envelope_path, std::slice::from_ref(&entry)).unwrap();
        let loaded = load_entries(&envelope_path).unwrap();
        assert_eq!(loaded.len(), 1);

        let bare_path = dir.path().join("bare.json");
        std::fs::write(&bare_path, serde_json::to_vec(&vec![entry]).unwrap()).unwrap();
        let loaded_bare = load_entries(&bare_path).unwrap();
        assert_eq!(loaded_bare.len(), 1);
    }
}
