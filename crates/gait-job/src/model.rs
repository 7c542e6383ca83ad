// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job runtime persisted shapes (§3 "JobState", §4.J).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A job's current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Paused,
    DecisionNeeded,
    Blocked,
    Completed,
    Cancelled,
    EmergencyStopped,
}

impl JobStatus {
    /// Whether this status is terminal: no further mutation is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::EmergencyStopped)
    }

    /// The lowercase wire name of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::DecisionNeeded => "decision_needed",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::EmergencyStopped => "emergency_stopped",
        }
    }
}

/// The kind of a checkpoint recorded against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Requires an operator decision before the job may resume.
    Decision,
    /// Marks the job as blocked pending external remediation.
    Blocked,
    /// Marks the job as finished.
    Completed,
}

/// A checkpoint recorded against a job at some point in its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A single approval against a pending decision checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Approval {
    pub checkpoint_id: String,
    pub approver_identity: String,
    pub decided_at: DateTime<Utc>,
}

/// The derived, hashed ledger of safety invariants a job was submitted
/// under (§4.J).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SafetyInvariantLedger {
    pub version: u32,
    pub invariants: Vec<String>,
    pub digest: String,
}

/// Inputs the safety-invariant ledger is derived from at submit time.
#[derive(Debug, Clone, Default)]
pub struct SafetyInvariantInputs {
    pub control_boundary: String,
    pub fail_closed: bool,
    pub default_privacy: String,
    pub policy_digest: Option<String>,
    pub policy_ref: Option<String>,
    pub identity: Option<String>,
}

impl SafetyInvariantLedger {
    /// Derives the ledger from `inputs` (§4.J: "derive invariant strings
    /// from `{control_boundary, fail_closed, default_privacy, policy_digest,
    /// policy_ref, identity}`, sort them, and store both the list and its
    /// SHA-256 hash").
    #[must_use]
    pub fn derive(inputs: &SafetyInvariantInputs) -> Self {
        let mut invariants = vec![
            format!("control_boundary={}", inputs.control_boundary),
            format!("fail_closed={}", inputs.fail_closed),
            format!("default_privacy={}", inputs.default_privacy),
            format!("policy_digest={}", inputs.policy_digest.clone().unwrap_or_default()),
            format!("policy_ref={}", inputs.policy_ref.clone().unwrap_or_default()),
            format!("identity={}", inputs.identity.clone().unwrap_or_default()),
        ];
        invariants.sort();
        let joined = invariants.join("\n");
        let digest = gait_core::sha256_hex(joined.as_bytes());
        Self {
            version: 1,
            invariants,
            digest,
        }
    }
}

/// The full persisted state of one job (§3 "JobState").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobState {
    pub schema_id: String,
    pub schema_version: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub revision: u64,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    pub safety_invariants: SafetyInvariantLedger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of the append-only `events.jsonl` journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobEvent {
    pub schema_id: String,
    pub schema_version: String,
    pub job_id: String,
    pub revision: u64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: serde_json::Value,
}
