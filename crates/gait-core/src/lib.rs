// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Canonical JSON encoding, digesting, and file-write primitives shared by
//! every component of the gait trust-plane core.
//!
//! If you only take one dependency, take this one: all downstream digests
//! and signatures go through [`canonical_json`] and [`sha256_hex`], never
//! around them.

use gait_error::{GaitError, GaitResult, codes};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Schema version stamped on every on-disk record (§6).
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Schema identifiers for every record shape emitted by the core (§6).
pub mod schema_id {
    pub const INTENT_REQUEST: &str = "gait.gate.intent_request";
    pub const POLICY: &str = "gait.gate.policy";
    pub const RESULT: &str = "gait.gate.result";
    pub const TRACE: &str = "gait.gate.trace";
    pub const APPROVAL_TOKEN: &str = "gait.gate.approval_token";
    pub const APPROVAL_AUDIT_RECORD: &str = "gait.gate.approval_audit_record";
    pub const DELEGATION_TOKEN: &str = "gait.gate.delegation_token";
    pub const DELEGATION_AUDIT_RECORD: &str = "gait.gate.delegation_audit_record";
    pub const BROKER_CREDENTIAL_RECORD: &str = "gait.gate.broker_credential_record";
    pub const APPROVED_SCRIPT_ENTRY: &str = "gait.gate.approved_script_entry";
    pub const RATE_LIMIT_STATE: &str = "gait.gate.rate_limit_state";
    pub const COMMITMENT_INTENT: &str = "gait.voice.commitment_intent";
    pub const SAY_TOKEN: &str = "gait.voice.say_token";
    pub const JOB_RUNTIME: &str = "gait.job.runtime";
    pub const JOB_EVENT: &str = "gait.job.event";
}

/// Produce the canonical serialization of `value`: object keys sorted
/// ascending, no insignificant whitespace, numbers in `serde_json`'s
/// shortest round-trip form, strings unescaped except required control
/// escapes.
///
/// `serde_json::Map` is a `BTreeMap` by construction in this workspace (the
/// `preserve_order` feature is never enabled), so a plain round trip through
/// [`serde_json::Value`] already yields sorted keys at every nesting level.
///
/// # Errors
///
/// Returns a `validation` error tagged `encoding_error` if `value` is not
/// JSON-representable.
pub fn canonical_json<T: Serialize>(value: &T) -> GaitResult<String> {
    let v = serde_json::to_value(value).map_err(|e| {
        GaitError::validation(codes::ENCODING_ERROR, format!("not json-representable: {e}"))
    })?;
    canonical_json_value(&v)
}

/// As [`canonical_json`], starting from an already-built [`Value`].
///
/// # Errors
///
/// Returns a `validation` error tagged `encoding_error` if `value` contains
/// a non-finite float, which has no canonical JSON representation.
pub fn canonical_json_value(value: &Value) -> GaitResult<String> {
    reject_non_finite(value)?;
    serde_json::to_string(value).map_err(|e| {
        GaitError::validation(codes::ENCODING_ERROR, format!("canonicalization failed: {e}"))
    })
}

fn reject_non_finite(value: &Value) -> GaitResult<()> {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(GaitError::validation(
                        codes::ENCODING_ERROR,
                        "non-finite number is not json-representable",
                    ));
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(reject_non_finite),
        Value::Object(map) => map.values().try_for_each(reject_non_finite),
        _ => Ok(()),
    }
}

/// Lowercase hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 digest of the canonical encoding of `value`.
///
/// # Errors
///
/// Propagates [`canonical_json`]'s errors.
pub fn digest_json<T: Serialize>(value: &T) -> GaitResult<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// SHA-256 digest of the canonical encoding of an already-built [`Value`].
///
/// # Errors
///
/// Propagates [`canonical_json_value`]'s errors.
pub fn digest_value(value: &Value) -> GaitResult<String> {
    Ok(sha256_hex(canonical_json_value(value)?.as_bytes()))
}

/// Returns `true` if `s` is exactly 64 lowercase hex characters.
#[must_use]
pub fn is_64_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Removes `field` from a JSON object value, returning the value unchanged
/// if it is not an object or does not contain the field. Used to strip a
/// `signature` field before canonicalizing a payload for signing (§4.B).
#[must_use]
pub fn without_field(value: &Value, field: &str) -> Value {
    match value {
        Value::Object(map) => {
            let mut clone = map.clone();
            clone.remove(field);
            Value::Object(clone)
        }
        other => other.clone(),
    }
}

/// An Ed25519 signature envelope attached to signed records (§4.B).
///
/// Serializes last among a record's fields by convention; callers control
/// field order via struct declaration order per §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Signature {
    /// Always `"ed25519"`.
    pub alg: String,
    /// Identifier of the key used to produce `sig`.
    pub key_id: String,
    /// Base64-encoded raw signature bytes.
    pub sig: String,
    /// Hex digest of the canonical payload that was signed.
    pub signed_digest: String,
}

/// Writes `bytes` to `path` atomically: a temp file is created in the same
/// directory, written, `fsync`ed, `chmod`ed to `mode`, then renamed over
/// `path`. The parent directory is created (mode 0750) if missing.
///
/// # Errors
///
/// Returns an `io_failure` error on any filesystem failure.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: u32) -> GaitResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent, 0o750)?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("atomic-write"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    let write_result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        set_mode(&tmp_path, mode)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    write_result.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        GaitError::io_failure("io_atomic_write_failed", format!("{e}"))
    })
}

fn ensure_dir(path: &Path, mode: u32) -> GaitResult<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
        .map_err(|e| GaitError::io_failure("io_mkdir_failed", format!("{e}")))?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> GaitResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| GaitError::io_failure("io_chmod_failed", format!("{e}")))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> GaitResult<()> {
    Ok(())
}

/// Holds an advisory, `O_CREATE|O_EXCL`-style exclusive lock for as long as
/// it lives; the lock file is removed on drop.
///
/// This is the one synchronization primitive the core uses (§5). Multiple
/// components (rate limiting, job-runtime mutation) take a lock, perform a
/// pure read-transform-write cycle, and let the guard's `Drop` release it —
/// mirroring how a short-lived database lock file is held for a critical
/// section and cleaned up unconditionally.
#[derive(Debug)]
pub struct FileLockGuard {
    lock_path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Acquires an exclusive file lock at `lock_path`, retrying at
/// `poll_interval` until `deadline` elapses. A lock file older than
/// `stale_after` is treated as abandoned and removed before retrying.
///
/// # Errors
///
/// Returns a retryable [`GaitError::state_contention`] tagged with
/// `retryable_code` if the deadline elapses before the lock is acquired, or
/// an `io_failure` for any other filesystem error.
pub fn acquire_file_lock(
    lock_path: &Path,
    deadline: Duration,
    poll_interval: Duration,
    stale_after: Duration,
    retryable_code: &str,
) -> GaitResult<FileLockGuard> {
    use std::fs::OpenOptions;

    if let Some(parent) = lock_path.parent() {
        ensure_dir(parent, 0o750)?;
    }

    let start = Instant::now();
    loop {
        let metadata = serde_json::json!({
            "pid": std::process::id(),
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let _ = file.write_all(metadata.to_string().as_bytes());
                return Ok(FileLockGuard {
                    lock_path: lock_path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Ok(meta) = std::fs::metadata(lock_path) {
                    if let Ok(modified) = meta.modified() {
                        if modified.elapsed().unwrap_or_default() > stale_after {
                            let _ = std::fs::remove_file(lock_path);
                            continue;
                        }
                    }
                }
                if start.elapsed() >= deadline {
                    return Err(GaitError::state_contention(
                        retryable_code,
                        "lock acquisition timed out",
                    ));
                }
                std::thread::sleep(poll_interval);
            }
            Err(e) => return Err(GaitError::io_failure("io_lock_failed", format!("{e}"))),
        }
    }
}
