//! Shared condition types used across Weaver CRD statuses.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition state cannot be determined
    Unknown,
}

/// A single observation of an object's state
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, Finalizing, CleanupFailed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned between statuses
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the object the condition was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Upsert `new` into `conditions` keyed by condition type.
///
/// Returns true when the stored conditions changed. The transition time is
/// only advanced when the status actually flips, so repeated identical
/// updates are no-ops that never dirty the object.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        None => {
            conditions.push(new);
            true
        }
        Some(existing) => {
            if existing.status != new.status {
                *existing = new;
                return true;
            }
            let changed = existing.reason != new.reason
                || existing.message != new.message
                || existing.observed_generation != new.observed_generation;
            if changed {
                existing.reason = new.reason;
                existing.message = new.message;
                existing.observed_generation = new.observed_generation;
            }
            changed
        }
    }
}
