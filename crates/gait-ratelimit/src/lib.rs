// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Windowed, file-locked rate and destructive-budget enforcement (§4.F).
//!
//! [`enforce`] is the sole entry point: it scopes a request to a bucket key,
//! takes an exclusive advisory lock on `state_path.lock`, loads the
//! persisted counters, decides, increments on success, and writes back
//! atomically before releasing the lock.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use gait_core::{atomic_write, schema_id, SCHEMA_VERSION};
use gait_error::{GaitError, GaitResult, codes};
use gait_intent::IntentRequest;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Scopes a [`RateLimit`] constraint may key on.
pub const SCOPES: &[&str] = &["tool", "identity", "tool_identity"];

/// Windows a [`RateLimit`] constraint may use.
pub const WINDOWS: &[&str] = &["minute", "hour"];

const LOCK_DEADLINE: Duration = Duration::from_secs(3);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(15);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(15);

/// A request budget to enforce against a single intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateLimit {
    /// `tool`, `identity`, or `tool_identity`.
    pub scope: String,
    /// `minute` or `hour`.
    pub window: String,
    /// Maximum allowed requests within the window.
    pub limit: u64,
}

/// Outcome of a single [`enforce`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// Whether this request was admitted.
    pub allowed: bool,
    /// The limit enforced.
    pub limit: u64,
    /// Requests used in the current bucket, including this one if allowed.
    pub used: u64,
    /// `limit.saturating_sub(used)`.
    pub remaining: u64,
    /// The scope key (`tool`, `identity`, `tool_identity`).
    pub scope: String,
    /// The full bucket key this decision was made against.
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    key: String,
    count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateLimitState {
    schema_id: String,
    schema_version: String,
    counters: Vec<Counter>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            schema_id: schema_id::RATE_LIMIT_STATE.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            counters: Vec::new(),
        }
    }
}

/// Enforces `limit` for `intent` against the counters persisted at
/// `state_path`, as of `now` (§4.F).
///
/// Acquires an exclusive advisory lock on `state_path` + `.lock` (bounded by
/// a 3s deadline, 15ms poll interval, 15s staleness window), prunes stale
/// buckets for this `(window, scope)` pair, and either denies (if the
/// bucket is already at `limit`) or increments and persists.
///
/// # Errors
///
/// Returns a retryable [`GaitError::state_contention`] if the lock cannot be
/// acquired within the deadline, a `validation` error for an unknown scope
/// or window, or an `io_failure` for any other filesystem error.
#[tracing::instrument(skip(intent), fields(scope = %limit.scope, window = %limit.window))]
pub fn enforce(
    state_path: &Path,
    limit: &RateLimit,
    intent: &IntentRequest,
    now: DateTime<Utc>,
) -> GaitResult<Decision> {
    if !SCOPES.contains(&limit.scope.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_RATE_LIMIT_SCOPE,
            format!("unknown rate_limit scope: '{}'", limit.scope),
        ));
    }
    if !WINDOWS.contains(&limit.window.as_str()) {
        return Err(GaitError::validation(
            codes::INVALID_RATE_LIMIT_WINDOW,
            format!("unknown rate_limit window: '{}'", limit.window),
        ));
    }

    let scope_key = scope_key(&limit.scope, intent);
    let bucket_start = truncate_to_window(now, &limit.window);
    let key = format!(
        "{}|{}|{}|{}",
        limit.window,
        limit.scope,
        bucket_start.to_rfc3339_opts(SecondsFormat::Secs, true),
        scope_key
    );

    let lock_path = lock_path_for(state_path);
    let _guard = gait_core::acquire_file_lock(
        &lock_path,
        LOCK_DEADLINE,
        LOCK_POLL_INTERVAL,
        LOCK_STALE_AFTER,
        codes::RATE_LIMIT_LOCK_TIMEOUT,
    )?;

    let mut state = load_state(state_path)?;
    let prefix = format!("{}|{}|", limit.window, limit.scope);
    state
        .counters
        .retain(|c| !c.key.starts_with(&prefix) || c.key == key);

    let used = state.counters.iter().find(|c| c.key == key).map_or(0, |c| c.count);

    if used >= limit.limit {
        tracing::warn!(key = %key, used, limit = limit.limit, "rate limit exceeded");
        return Ok(Decision {
            allowed: false,
            limit: limit.limit,
            used,
            remaining: 0,
            scope: limit.scope.clone(),
            key,
        });
    }

    let new_used = used + 1;
    match state.counters.iter_mut().find(|c| c.key == key) {
        Some(c) => c.count = new_used,
        None => state.counters.push(Counter {
            key: key.clone(),
            count: new_used,
        }),
    }

    let bytes = serde_json::to_vec_pretty(&state)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("{e}")))?;
    atomic_write(state_path, &bytes, 0o600)?;

    tracing::debug!(key = %key, used = new_used, limit = limit.limit, "rate limit admitted");
    Ok(Decision {
        allowed: true,
        limit: limit.limit,
        used: new_used,
        remaining: limit.limit.saturating_sub(new_used),
        scope: limit.scope.clone(),
        key,
    })
}

fn scope_key(scope: &str, intent: &IntentRequest) -> String {
    match scope {
        "tool" => intent.tool_name.clone(),
        "identity" => intent.context.identity.clone(),
        "tool_identity" => format!("{}|{}", intent.tool_name, intent.context.identity),
        _ => unreachable!("scope validated by caller"),
    }
}

fn truncate_to_window(now: DateTime<Utc>, window: &str) -> DateTime<Utc> {
    let truncated = now.with_second(0).and_then(|d| d.with_nanosecond(0)).unwrap_or(now);
    match window {
        "hour" => truncated.with_minute(0).unwrap_or(truncated),
        _ => truncated,
    }
}

fn lock_path_for(state_path: &Path) -> std::path::PathBuf {
    let mut name = state_path.as_os_str().to_os_string();
    name.push(".lock");
    std::path::PathBuf::from(name)
}

fn load_state(state_path: &Path) -> GaitResult<RateLimitState> {
    match std::fs::read_to_string(state_path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("corrupt rate limit state: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RateLimitState::default()),
        Err(e) => Err(GaitError::io_failure("io_read_failed", format!("{e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_intent::{RawArgProvenance, RawIntentContext, RawIntentRequest, RawTarget};
    use std::sync::Arc;

    fn intent(tool: &str, identity: &str) -> IntentRequest {
        gait_intent::normalize_intent(RawIntentRequest {
            tool_name: tool.to_string(),
            args: serde_json::json!({}),
            targets: Vec::<RawTarget>::new(),
            arg_provenance: Vec::<RawArgProvenance>::new(),
            skill_provenance: None,
            delegation: None,
            context: RawIntentContext {
                identity: identity.to_string(),
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
        })
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2026-02-05T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn first_request_under_limit_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let limit = RateLimit {
            scope: "tool".to_string(),
            window: "minute".to_string(),
            limit: 2,
        };
        let decision = enforce(&state_path, &limit, &intent("tool.read", "alice"), now()).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn request_over_limit_is_denied_without_incrementing() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let limit = RateLimit {
            scope: "tool".to_string(),
            window: "minute".to_string(),
            limit: 1,
        };
        let first = enforce(&state_path, &limit, &intent("tool.read", "alice"), now()).unwrap();
        assert!(first.allowed);
        let second = enforce(&state_path, &limit, &intent("tool.read", "alice"), now()).unwrap();
        assert!(!second.allowed);
        assert_eq!(second.used, 1);
        assert_eq!(second.remaining, 0);
    }

    #[test]
    fn different_scope_keys_get_independent_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let limit = RateLimit {
            scope: "identity".to_string(),
            window: "minute".to_string(),
            limit: 1,
        };
        let alice = enforce(&state_path, &limit, &intent("tool.read", "alice"), now()).unwrap();
        let bob = enforce(&state_path, &limit, &intent("tool.read", "bob"), now()).unwrap();
        assert!(alice.allowed);
        assert!(bob.allowed);
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let limit = RateLimit {
            scope: "bogus".to_string(),
            window: "minute".to_string(),
            limit: 1,
        };
        let err = enforce(&state_path, &limit, &intent("tool.read", "alice"), now()).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_RATE_LIMIT_SCOPE);
    }

    /// S5 — 10 concurrent `enforce` calls against `limit=2` admit exactly 2.
    #[test]
    fn concurrent_enforcement_admits_at_most_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = Arc::new(dir.path().join("state.json"));
        let limit = Arc::new(RateLimit {
            scope: "tool_identity".to_string(),
            window: "minute".to_string(),
            limit: 2,
        });

        let results: Vec<GaitResult<Decision>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let state_path = Arc::clone(&state_path);
                    let limit = Arc::clone(&limit);
                    s.spawn(move || enforce(&state_path, &limit, &intent("tool.write", "alice"), now()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.len(), 10);
        let allowed = results.iter().filter(|r| matches!(r, Ok(d) if d.allowed)).count();
        assert!(allowed <= 2);
        for r in &results {
            match r {
                Ok(_) => {}
                Err(e) => assert!(e.is_retryable()),
            }
        }
    }
}
