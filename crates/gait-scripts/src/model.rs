// SPDX-License-Identifier: MIT OR Apache-2.0

//! Approved-script registry entry shape (§4.H).

use chrono::{DateTime, Utc};
use gait_core::Signature;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A signed, pre-approved tool sequence bound to a specific policy and
/// script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovedScriptEntry {
    pub schema_id: String,
    pub schema_version: String,
    pub pattern_id: String,
    pub policy_digest: String,
    pub script_hash: String,
    pub tool_sequence: Vec<String>,
    pub approver_identity: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// On-disk envelope form: `{"entries": [...]}`. Always written; the bare
/// list form is accepted on read but never produced (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedScriptFile {
    pub entries: Vec<ApprovedScriptEntry>,
}
