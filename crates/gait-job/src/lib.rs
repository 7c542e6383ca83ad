// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! File-backed job runtime state machine with a hashed safety-invariant
//! ledger (§4.J).
//!
//! Every mutator (everything but [`status`] and [`inspect`]) takes an
//! exclusive lock on `<root>/<job_id>/state.json.lock`, reads the current
//! [`JobState`], applies a pure transformation, bumps `revision`, writes the
//! new state atomically, appends one line to `<root>/<job_id>/events.jsonl`,
//! and releases the lock.

mod model;
mod ops;

pub use model::{
    Approval, Checkpoint, CheckpointKind, JobEvent, JobState, JobStatus, SafetyInvariantInputs,
    SafetyInvariantLedger,
};
pub use ops::{
    add_checkpoint, approve, cancel, emergency_stop, inspect, pause, record_blocked_dispatch, resume, status,
    submit, validate_job_id, ResumeRequest, SubmitRequest,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        "2026-02-05T12:00:00Z".parse().unwrap()
    }

    fn submit_request(job_id: &str) -> SubmitRequest {
        SubmitRequest {
            job_id: job_id.to_string(),
            control_boundary: "agent".to_string(),
            fail_closed: true,
            default_privacy: "strict".to_string(),
            environment_fingerprint: Some("E1".to_string()),
            policy_digest: Some("a".repeat(64)),
            policy_ref: None,
            identity: Some("alice".to_string()),
        }
    }

    #[test]
    fn sequential_reads_observe_strictly_increasing_revision() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let s1 = submit(root, submit_request("job-1"), now()).unwrap();
        assert_eq!(s1.revision, 1);

        let s2 = add_checkpoint(root, "job-1", "cp-1", CheckpointKind::Decision, None, now()).unwrap();
        assert!(s2.revision > s1.revision);

        let s3 = approve(root, "job-1", "cp-1", "alice", now()).unwrap();
        assert!(s3.revision > s2.revision);

        let s4 = resume(
            root,
            "job-1",
            ResumeRequest {
                policy_digest: Some("a".repeat(64)),
                identity: Some("alice".to_string()),
                identity_revoked: false,
                environment_fingerprint: Some("E1".to_string()),
                allow_environment_mismatch: false,
            },
            now(),
        )
        .unwrap();
        assert!(s4.revision > s3.revision);

        let read_back = inspect(root, "job-1").unwrap();
        assert_eq!(read_back.revision, s4.revision);
    }

    /// S6 — resume with a policy-digest transition.
    #[test]
    fn resume_with_differing_policy_digest_records_transition() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let submitted = submit(root, submit_request("job-s6"), now()).unwrap();
        assert_eq!(submitted.revision, 1);
        assert_eq!(submitted.policy_digest.as_deref(), Some("a".repeat(64).as_str()));

        add_checkpoint(root, "job-s6", "cp-1", CheckpointKind::Decision, None, now()).unwrap();
        approve(root, "job-s6", "cp-1", "alice", now()).unwrap();

        let resumed = resume(
            root,
            "job-s6",
            ResumeRequest {
                policy_digest: Some("b".repeat(64)),
                identity: Some("alice".to_string()),
                identity_revoked: false,
                environment_fingerprint: Some("E1".to_string()),
                allow_environment_mismatch: false,
            },
            now(),
        )
        .unwrap();

        assert_eq!(resumed.status, JobStatus::Running);
        assert_eq!(resumed.policy_digest.as_deref(), Some("b".repeat(64).as_str()));
        assert_eq!(resumed.status_reason_code.as_deref(), Some(gait_error::codes::RESUMED_WITH_POLICY_TRANSITION));
        assert_eq!(resumed.revision, submitted.revision + 3);

        let events = std::fs::read_to_string(root.join("job-s6").join("events.jsonl")).unwrap();
        let last_line = events.lines().last().unwrap();
        let last_event: JobEvent = serde_json::from_str(last_line).unwrap();
        assert_eq!(last_event.reason_code.as_deref(), Some(gait_error::codes::RESUMED_WITH_POLICY_TRANSITION));
    }

    #[test]
    fn resume_rejects_decision_needed_job_with_no_approval() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        submit(root, submit_request("job-2"), now()).unwrap();
        add_checkpoint(root, "job-2", "cp-1", CheckpointKind::Decision, None, now()).unwrap();

        let err = resume(
            root,
            "job-2",
            ResumeRequest {
                policy_digest: Some("a".repeat(64)),
                identity: Some("alice".to_string()),
                identity_revoked: false,
                environment_fingerprint: Some("E1".to_string()),
                allow_environment_mismatch: false,
            },
            now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), gait_error::codes::JOB_RESUME_MISSING_DECISION);
    }

    #[test]
    fn resume_rejects_identity_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        submit(root, submit_request("job-3"), now()).unwrap();
        pause(root, "job-3", now()).unwrap();

        let err = resume(
            root,
            "job-3",
            ResumeRequest {
                policy_digest: Some("a".repeat(64)),
                identity: Some("mallory".to_string()),
                identity_revoked: false,
                environment_fingerprint: Some("E1".to_string()),
                allow_environment_mismatch: false,
            },
            now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), gait_error::codes::IDENTITY_BINDING_MISMATCH);
    }

    #[test]
    fn resume_allows_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        submit(root, submit_request("job-4"), now()).unwrap();
        pause(root, "job-4", now()).unwrap();

        let resumed = resume(
            root,
            "job-4",
            ResumeRequest {
                policy_digest: Some("a".repeat(64)),
                identity: Some("alice".to_string()),
                identity_revoked: false,
                environment_fingerprint: Some("E2".to_string()),
                allow_environment_mismatch: true,
            },
            now(),
        )
        .unwrap();
        assert_eq!(resumed.status, JobStatus::Running);
        assert_eq!(resumed.environment_fingerprint.as_deref(), Some("E2"));
        assert_eq!(
            resumed.status_reason_code.as_deref(),
            Some(gait_error::codes::ENVIRONMENT_FINGERPRINT_MISMATCH_WITH_OVERRIDE)
        );
    }

    #[test]
    fn emergency_stop_blocks_all_mutation_but_cancel_and_dispatch_block() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        submit(root, submit_request("job-5"), now()).unwrap();
        emergency_stop(root, "job-5", Some("safety incident".to_string()), now()).unwrap();

        let pause_err = pause(root, "job-5", now()).unwrap_err();
        assert_eq!(pause_err.code(), gait_error::codes::EMERGENCY_STOPPED);

        let dispatch = record_blocked_dispatch(root, "job-5", "fs.write", now()).unwrap();
        assert_eq!(dispatch.status, JobStatus::EmergencyStopped);

        let cancelled = cancel(root, "job-5", Some("operator abort".to_string()), now()).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn invalid_job_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let err = submit(root, submit_request(".leading-dot"), now()).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::INVALID_JOB_ID);
    }

    #[test]
    fn submitting_same_job_id_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        submit(root, submit_request("job-6"), now()).unwrap();
        let err = submit(root, submit_request("job-6"), now()).unwrap_err();
        assert_eq!(err.code(), gait_error::codes::JOB_ALREADY_EXISTS);
    }
}
