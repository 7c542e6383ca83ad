// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-backed job runtime operations (§4.J).

use crate::model::{
    Approval, Checkpoint, CheckpointKind, JobEvent, JobState, JobStatus, SafetyInvariantInputs,
    SafetyInvariantLedger,
};
use chrono::{DateTime, Utc};
use gait_core::{atomic_write, schema_id, SCHEMA_VERSION};
use gait_error::{codes, GaitError, GaitResult};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_DEADLINE: Duration = Duration::from_secs(2);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

const MAX_JOB_ID_LEN: usize = 128;

/// Inputs to [`submit`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_id: String,
    pub control_boundary: String,
    pub fail_closed: bool,
    pub default_privacy: String,
    pub environment_fingerprint: Option<String>,
    pub policy_digest: Option<String>,
    pub policy_ref: Option<String>,
    pub identity: Option<String>,
}

/// Inputs to [`resume`] (§4.J resume guards).
#[derive(Debug, Clone, Default)]
pub struct ResumeRequest {
    pub policy_digest: Option<String>,
    pub identity: Option<String>,
    pub identity_revoked: bool,
    pub environment_fingerprint: Option<String>,
    pub allow_environment_mismatch: bool,
}

struct MutationOutcome {
    event_type: &'static str,
    reason_code: Option<String>,
    detail: serde_json::Value,
}

/// Validates a `job_id` against `^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$`.
///
/// # Errors
///
/// Returns a `validation` error tagged [`codes::INVALID_JOB_ID`] if the id
/// is empty, too long, or contains a character outside the allowed set.
pub fn validate_job_id(job_id: &str) -> GaitResult<()> {
    if job_id.is_empty() || job_id.len() > MAX_JOB_ID_LEN {
        return Err(GaitError::validation(
            codes::INVALID_JOB_ID,
            format!("job_id length must be 1..={MAX_JOB_ID_LEN}"),
        ));
    }
    let mut chars = job_id.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphanumeric() {
        return Err(GaitError::validation(
            codes::INVALID_JOB_ID,
            "job_id must start with an ASCII alphanumeric character",
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')) {
        return Err(GaitError::validation(
            codes::INVALID_JOB_ID,
            "job_id may only contain ASCII alphanumerics, '.', '_', ':', '-'",
        ));
    }
    Ok(())
}

/// Resolves `root/job_id`, rejecting job ids that would escape `root`.
///
/// Since [`validate_job_id`] forbids `/` and any leading `.`, the resolved
/// directory always has `job_id` as its sole path component under `root`.
fn job_dir(root: &Path, job_id: &str) -> GaitResult<PathBuf> {
    validate_job_id(job_id)?;
    let dir = root.join(job_id);
    if dir.parent() != Some(root) {
        return Err(GaitError::validation(
            codes::INVALID_JOB_ID,
            "job_id must resolve to a direct child of root",
        ));
    }
    Ok(dir)
}

fn state_path(root: &Path, job_id: &str) -> GaitResult<PathBuf> {
    Ok(job_dir(root, job_id)?.join("state.json"))
}

fn events_path(root: &Path, job_id: &str) -> GaitResult<PathBuf> {
    Ok(job_dir(root, job_id)?.join("events.jsonl"))
}

fn lock_path(root: &Path, job_id: &str) -> GaitResult<PathBuf> {
    Ok(job_dir(root, job_id)?.join("state.json.lock"))
}

fn load_state(path: &Path) -> GaitResult<JobState> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| GaitError::schema_invalid(codes::ENCODING_ERROR, format!("corrupt job state: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(GaitError::validation(codes::JOB_NOT_FOUND, "job not found"))
        }
        Err(e) => Err(GaitError::io_failure("io_read_failed", format!("{e}"))),
    }
}

fn write_state(path: &Path, state: &JobState) -> GaitResult<()> {
    let mut bytes = serde_json::to_vec_pretty(state)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("{e}")))?;
    bytes.push(b'\n');
    atomic_write(path, &bytes, 0o600)
}

fn append_event(path: &Path, event: &JobEvent) -> GaitResult<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let line = serde_json::to_string(event)
        .map_err(|e| GaitError::validation(codes::ENCODING_ERROR, format!("{e}")))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GaitError::io_failure("io_write_failed", format!("{e}")))?;
    writeln!(file, "{line}").map_err(|e| GaitError::io_failure("io_write_failed", format!("{e}")))
}

/// Acquires the per-job lock, loads state, applies `f`, persists the new
/// state, appends the resulting event, and releases the lock (§4.J
/// "Concurrency"). `f` returns the mutation's event shape; `revision` and
/// `updated_at` are bumped by this function, not by `f`.
fn mutate_job(
    root: &Path,
    job_id: &str,
    now: DateTime<Utc>,
    f: impl FnOnce(&mut JobState) -> GaitResult<MutationOutcome>,
) -> GaitResult<JobState> {
    let state_file = state_path(root, job_id)?;
    let events_file = events_path(root, job_id)?;
    let lock_file = lock_path(root, job_id)?;

    let _guard = gait_core::acquire_file_lock(
        &lock_file,
        LOCK_DEADLINE,
        LOCK_POLL_INTERVAL,
        LOCK_STALE_AFTER,
        codes::JOB_STATE_LOCK_TIMEOUT,
    )?;

    let mut state = load_state(&state_file)?;
    let outcome = f(&mut state)?;
    state.revision += 1;
    state.updated_at = now;
    write_state(&state_file, &state)?;

    let event = JobEvent {
        schema_id: schema_id::JOB_EVENT.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        job_id: job_id.to_string(),
        revision: state.revision,
        event_type: outcome.event_type.to_string(),
        reason_code: outcome.reason_code,
        occurred_at: now,
        detail: outcome.detail,
    };
    append_event(&events_file, &event)?;

    if matches!(event.event_type.as_str(), "emergency_stopped" | "dispatch_blocked" | "checkpoint_blocked") {
        tracing::warn!(job_id, event_type = %event.event_type, revision = state.revision, "job state mutated");
    } else {
        tracing::debug!(job_id, event_type = %event.event_type, revision = state.revision, "job state mutated");
    }
    Ok(state)
}

fn reject_if_emergency_stopped(state: &JobState) -> GaitResult<()> {
    if state.status == JobStatus::EmergencyStopped {
        return Err(GaitError::invalid_transition(
            codes::EMERGENCY_STOPPED,
            "job is emergency stopped; only cancel and record_blocked_dispatch are permitted",
        ));
    }
    Ok(())
}

/// Submits a new job, deriving its safety-invariant ledger and persisting
/// its initial `running` state (§4.J).
///
/// # Errors
///
/// Returns a `validation` error tagged [`codes::INVALID_JOB_ID`] for a
/// malformed id, [`codes::JOB_ALREADY_EXISTS`] if the job directory already
/// holds a `state.json`, or a retryable `state_contention` on lock timeout.
#[tracing::instrument(skip(req), fields(job_id = %req.job_id))]
pub fn submit(root: &Path, req: SubmitRequest, now: DateTime<Utc>) -> GaitResult<JobState> {
    let state_file = state_path(root, &req.job_id)?;
    if state_file.exists() {
        return Err(GaitError::invalid_transition(
            codes::JOB_ALREADY_EXISTS,
            format!("job '{}' already exists", req.job_id),
        ));
    }

    let lock_file = lock_path(root, &req.job_id)?;
    let _guard = gait_core::acquire_file_lock(
        &lock_file,
        LOCK_DEADLINE,
        LOCK_POLL_INTERVAL,
        LOCK_STALE_AFTER,
        codes::JOB_STATE_LOCK_TIMEOUT,
    )?;

    let safety_invariants = SafetyInvariantLedger::derive(&SafetyInvariantInputs {
        control_boundary: req.control_boundary,
        fail_closed: req.fail_closed,
        default_privacy: req.default_privacy,
        policy_digest: req.policy_digest.clone(),
        policy_ref: req.policy_ref.clone(),
        identity: req.identity.clone(),
    });

    let state = JobState {
        schema_id: schema_id::JOB_RUNTIME.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        job_id: req.job_id.clone(),
        status: JobStatus::Running,
        stop_reason: None,
        status_reason_code: None,
        environment_fingerprint: req.environment_fingerprint,
        policy_digest: req.policy_digest,
        policy_ref: req.policy_ref,
        identity: req.identity,
        revision: 1,
        checkpoints: Vec::new(),
        approvals: Vec::new(),
        safety_invariants,
        created_at: now,
        updated_at: now,
    };
    write_state(&state_file, &state)?;

    let events_file = events_path(root, &req.job_id)?;
    let event = JobEvent {
        schema_id: schema_id::JOB_EVENT.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        job_id: req.job_id,
        revision: 1,
        event_type: "submitted".to_string(),
        reason_code: None,
        occurred_at: now,
        detail: json!({}),
    };
    append_event(&events_file, &event)?;

    tracing::debug!(job_id = %event.job_id, event_type = "submitted", "job state mutated");
    Ok(state)
}

/// Returns the current status of a job without taking a lock (§4.J
/// "Readers do not lock but MUST tolerate partial event streams").
///
/// # Errors
///
/// Returns [`codes::JOB_NOT_FOUND`] if no such job exists.
pub fn status(root: &Path, job_id: &str) -> GaitResult<JobStatus> {
    Ok(load_state(&state_path(root, job_id)?)?.status)
}

/// Returns the full persisted state of a job.
///
/// # Errors
///
/// Returns [`codes::JOB_NOT_FOUND`] if no such job exists.
pub fn inspect(root: &Path, job_id: &str) -> GaitResult<JobState> {
    load_state(&state_path(root, job_id)?)
}

/// Adds a checkpoint to a job, transitioning its status per `kind` (§4.J
/// state diagram).
///
/// # Errors
///
/// Returns [`codes::JOB_INVALID_TRANSITION`] if the current status does not
/// permit the requested checkpoint kind, or [`codes::EMERGENCY_STOPPED`] if
/// the job is emergency stopped.
#[tracing::instrument(skip(root, label), fields(job_id))]
pub fn add_checkpoint(
    root: &Path,
    job_id: &str,
    checkpoint_id: impl Into<String>,
    kind: CheckpointKind,
    label: Option<String>,
    now: DateTime<Utc>,
) -> GaitResult<JobState> {
    let checkpoint_id = checkpoint_id.into();
    mutate_job(root, job_id, now, |state| {
        reject_if_emergency_stopped(state)?;
        match kind {
            CheckpointKind::Decision => {
                if state.status != JobStatus::Running {
                    return Err(GaitError::invalid_transition(
                        codes::JOB_INVALID_TRANSITION,
                        format!("cannot add decision checkpoint from {}", state.status.as_str()),
                    ));
                }
                state.status = JobStatus::DecisionNeeded;
            }
            CheckpointKind::Blocked => {
                if state.status != JobStatus::Running {
                    return Err(GaitError::invalid_transition(
                        codes::JOB_INVALID_TRANSITION,
                        format!("cannot add blocked checkpoint from {}", state.status.as_str()),
                    ));
                }
                state.status = JobStatus::Blocked;
            }
            CheckpointKind::Completed => {
                if state.status.is_terminal() {
                    return Err(GaitError::invalid_transition(
                        codes::JOB_INVALID_TRANSITION,
                        format!("cannot complete a job already {}", state.status.as_str()),
                    ));
                }
                state.status = JobStatus::Completed;
            }
        }
        state.checkpoints.push(Checkpoint {
            checkpoint_id: checkpoint_id.clone(),
            kind,
            created_at: now,
            label,
        });
        Ok(MutationOutcome {
            event_type: match kind {
                CheckpointKind::Decision => "checkpoint_decision",
                CheckpointKind::Blocked => "checkpoint_blocked",
                CheckpointKind::Completed => "checkpoint_completed",
            },
            reason_code: None,
            detail: json!({ "checkpoint_id": checkpoint_id }),
        })
    })
}

/// Pauses a running job.
///
/// # Errors
///
/// Returns [`codes::JOB_INVALID_TRANSITION`] if the job is not `running`.
#[tracing::instrument(skip(root), fields(job_id))]
pub fn pause(root: &Path, job_id: &str, now: DateTime<Utc>) -> GaitResult<JobState> {
    mutate_job(root, job_id, now, |state| {
        reject_if_emergency_stopped(state)?;
        if state.status != JobStatus::Running {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                format!("cannot pause from {}", state.status.as_str()),
            ));
        }
        state.status = JobStatus::Paused;
        Ok(MutationOutcome {
            event_type: "paused",
            reason_code: None,
            detail: json!({}),
        })
    })
}

/// Cancels a job from any status (§4.J: `any -- cancel --> CANCELLED`).
#[tracing::instrument(skip(root, reason), fields(job_id))]
pub fn cancel(root: &Path, job_id: &str, reason: Option<String>, now: DateTime<Utc>) -> GaitResult<JobState> {
    mutate_job(root, job_id, now, |state| {
        state.status = JobStatus::Cancelled;
        state.stop_reason = reason.clone();
        Ok(MutationOutcome {
            event_type: "cancelled",
            reason_code: None,
            detail: json!({ "reason": reason }),
        })
    })
}

/// Records an approval against a pending decision checkpoint.
///
/// # Errors
///
/// Returns [`codes::JOB_INVALID_TRANSITION`] if `checkpoint_id` does not
/// name an existing decision checkpoint, or if the job is terminal or
/// emergency stopped.
#[tracing::instrument(skip(root), fields(job_id))]
pub fn approve(
    root: &Path,
    job_id: &str,
    checkpoint_id: &str,
    approver_identity: impl Into<String>,
    now: DateTime<Utc>,
) -> GaitResult<JobState> {
    let approver_identity = approver_identity.into();
    mutate_job(root, job_id, now, |state| {
        reject_if_emergency_stopped(state)?;
        if state.status.is_terminal() {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                format!("cannot approve a job already {}", state.status.as_str()),
            ));
        }
        let exists = state
            .checkpoints
            .iter()
            .any(|c| c.checkpoint_id == checkpoint_id && c.kind == CheckpointKind::Decision);
        if !exists {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                format!("no pending decision checkpoint '{checkpoint_id}'"),
            ));
        }
        state.approvals.push(Approval {
            checkpoint_id: checkpoint_id.to_string(),
            approver_identity: approver_identity.clone(),
            decided_at: now,
        });
        Ok(MutationOutcome {
            event_type: "approved",
            reason_code: None,
            detail: json!({
                "checkpoint_id": checkpoint_id,
                "approver_identity": approver_identity,
            }),
        })
    })
}

/// Resumes a `paused`/`decision_needed`/`blocked` job back to `running`,
/// enforcing the four resume guards in order (§4.J).
///
/// # Errors
///
/// Returns [`codes::JOB_RESUME_MISSING_DECISION`] (guard 1),
/// [`codes::POLICY_DIGEST_REQUIRED`] or a `binding_mismatch` (guard 2),
/// [`codes::IDENTITY_BINDING_MISMATCH`] / [`codes::IDENTITY_REVOKED`] (guard
/// 3), or [`codes::ENVIRONMENT_FINGERPRINT_MISMATCH`] (guard 4).
#[tracing::instrument(skip(root, req), fields(job_id))]
pub fn resume(root: &Path, job_id: &str, req: ResumeRequest, now: DateTime<Utc>) -> GaitResult<JobState> {
    mutate_job(root, job_id, now, |state| {
        reject_if_emergency_stopped(state)?;
        if !matches!(state.status, JobStatus::Paused | JobStatus::DecisionNeeded | JobStatus::Blocked) {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                format!("cannot resume from {}", state.status.as_str()),
            ));
        }

        // Guard 1: pending decision checkpoints matched by distinct approvals.
        if state.status == JobStatus::DecisionNeeded {
            let decision_ids: Vec<&str> = state
                .checkpoints
                .iter()
                .filter(|c| c.kind == CheckpointKind::Decision)
                .map(|c| c.checkpoint_id.as_str())
                .collect();
            if decision_ids.is_empty() {
                return Err(GaitError::approval_required(
                    codes::JOB_RESUME_MISSING_DECISION,
                    "decision_needed with no decision checkpoints",
                ));
            }
            let approved: HashSet<&str> = state.approvals.iter().map(|a| a.checkpoint_id.as_str()).collect();
            if !decision_ids.iter().all(|id| approved.contains(id)) {
                return Err(GaitError::approval_required(
                    codes::JOB_RESUME_MISSING_DECISION,
                    "a pending decision checkpoint has no matching approval",
                ));
            }
        }

        // Guard 2: policy digest binding.
        let mut policy_transitioned = false;
        match (&state.policy_digest, &req.policy_digest) {
            (Some(_), None) => {
                return Err(GaitError::policy_evaluation_required(
                    codes::POLICY_DIGEST_REQUIRED,
                    "job was submitted with a policy_digest; resume must supply one",
                ));
            }
            (Some(existing), Some(supplied)) if existing != supplied => {
                policy_transitioned = true;
                state.policy_digest = Some(supplied.clone());
            }
            (None, Some(supplied)) => {
                state.policy_digest = Some(supplied.clone());
            }
            _ => {}
        }

        // Guard 3: identity binding.
        if let Some(bound) = state.identity.clone() {
            match &req.identity {
                None => {
                    return Err(GaitError::identity_validation_missing(
                        codes::IDENTITY_BINDING_MISMATCH,
                        "job has a bound identity; resume must supply one",
                    ));
                }
                Some(supplied) if *supplied != bound => {
                    return Err(GaitError::binding_mismatch(
                        codes::IDENTITY_BINDING_MISMATCH,
                        format!("identity mismatch: expected '{bound}'"),
                    ));
                }
                Some(_) => {}
            }
            if req.identity_revoked {
                return Err(GaitError::identity_revoked(codes::IDENTITY_REVOKED, "identity has been revoked"));
            }
        }

        // Guard 4: environment fingerprint.
        let mut env_overridden = false;
        if let Some(stored_fp) = state.environment_fingerprint.clone() {
            let matches = req.environment_fingerprint.as_deref() == Some(stored_fp.as_str());
            if !matches {
                if req.allow_environment_mismatch {
                    env_overridden = true;
                    state.environment_fingerprint = req.environment_fingerprint.clone();
                } else {
                    return Err(GaitError::environment_mismatch(
                        codes::ENVIRONMENT_FINGERPRINT_MISMATCH,
                        "environment fingerprint mismatch",
                    ));
                }
            }
        }

        let reason_code = if policy_transitioned {
            Some(codes::RESUMED_WITH_POLICY_TRANSITION.to_string())
        } else if env_overridden {
            Some(codes::ENVIRONMENT_FINGERPRINT_MISMATCH_WITH_OVERRIDE.to_string())
        } else {
            None
        };

        state.status = JobStatus::Running;
        state.stop_reason = None;
        state.status_reason_code = reason_code.clone();

        Ok(MutationOutcome {
            event_type: "resumed",
            reason_code,
            detail: json!({
                "policy_transitioned": policy_transitioned,
                "environment_overridden": env_overridden,
            }),
        })
    })
}

/// Emergency-stops a job from any non-terminal status (§4.J).
///
/// # Errors
///
/// Returns [`codes::JOB_INVALID_TRANSITION`] if the job is already
/// terminal.
#[tracing::instrument(skip(root, reason), fields(job_id))]
pub fn emergency_stop(root: &Path, job_id: &str, reason: Option<String>, now: DateTime<Utc>) -> GaitResult<JobState> {
    mutate_job(root, job_id, now, |state| {
        if !matches!(
            state.status,
            JobStatus::Running | JobStatus::Paused | JobStatus::DecisionNeeded | JobStatus::Blocked
        ) {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                format!("cannot emergency stop from {}", state.status.as_str()),
            ));
        }
        state.status = JobStatus::EmergencyStopped;
        state.stop_reason = reason.clone();
        Ok(MutationOutcome {
            event_type: "emergency_stopped",
            reason_code: None,
            detail: json!({ "reason": reason }),
        })
    })
}

/// Records that a dispatch was blocked while a job is emergency stopped
/// (§4.J: the sole mutation permitted alongside `cancel` in that state).
///
/// # Errors
///
/// Returns [`codes::JOB_INVALID_TRANSITION`] if the job is not currently
/// `emergency_stopped`.
#[tracing::instrument(skip(root), fields(job_id))]
pub fn record_blocked_dispatch(
    root: &Path,
    job_id: &str,
    blocked_tool_name: &str,
    now: DateTime<Utc>,
) -> GaitResult<JobState> {
    mutate_job(root, job_id, now, |state| {
        if state.status != JobStatus::EmergencyStopped {
            return Err(GaitError::invalid_transition(
                codes::JOB_INVALID_TRANSITION,
                "record_blocked_dispatch is only permitted while emergency stopped",
            ));
        }
        Ok(MutationOutcome {
            event_type: "dispatch_blocked",
            reason_code: Some(codes::DISPATCH_BLOCKED.to_string()),
            detail: json!({ "tool_name": blocked_tool_name }),
        })
    })
}
