//! Progress reporting (§4.4): a phase executor writes these as it
//! makes headway; consumers (the CLI's `plan --format text` live
//! view) poll the most recent entry per phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_common::ids::PhaseId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub phase: PhaseId,
    /// 0..=100.
    pub completion: u8,
    pub step: String,
    pub message: String,
    pub created_ts: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(phase: PhaseId, completion: u8, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self { phase, completion: completion.min(100), step: step.into(), message: message.into(), created_ts: Utc::now() }
    }
}
