//! Condition constructors for Release status.
//!
//! Conditions are the externally observable record of reconciler progress:
//! Ready tracks steady-state convergence, Finalizing marks the deletion
//! state machine, CleanupFailed records a finalization pass that could not
//! reach the target cluster.

use crate::crd::{Condition, ConditionStatus};

/// Condition type for steady-state convergence
pub const TYPE_READY: &str = "Ready";
/// Condition type for the deletion state machine
pub const TYPE_FINALIZING: &str = "Finalizing";

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) -> Condition {
    Condition::new(type_, status, reason, message).observed_generation(observed_generation)
}

/// All desired resources applied and healthy
pub fn ready(resource_count: usize, observed_generation: Option<i64>) -> Condition {
    condition(
        TYPE_READY,
        ConditionStatus::True,
        "ResourcesApplied",
        format!("Applied {resource_count} resources"),
        observed_generation,
    )
}

/// Resources applied but still converging on the target cluster
pub fn progressing(observed_generation: Option<i64>) -> Condition {
    condition(
        TYPE_READY,
        ConditionStatus::False,
        "ResourcesProgressing",
        "One or more resources are still progressing",
        observed_generation,
    )
}

/// Deletion observed; cleanup is underway.
///
/// Persisted before any cleanup work so a crash mid-cleanup is
/// distinguishable from cleanup never having started.
pub fn finalizing(observed_generation: Option<i64>) -> Condition {
    condition(
        TYPE_FINALIZING,
        ConditionStatus::True,
        "FinalizationInProgress",
        "Deleting resources from the data plane",
        observed_generation,
    )
}

/// A finalization pass failed before resources could be deleted
pub fn cleanup_failed(message: impl Into<String>, observed_generation: Option<i64>) -> Condition {
    condition(
        TYPE_FINALIZING,
        ConditionStatus::False,
        "CleanupFailed",
        message,
        observed_generation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::set_condition;

    #[test]
    fn test_ready_condition_reports_count() {
        let cond = ready(3, Some(2));
        assert_eq!(cond.type_, TYPE_READY);
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.reason, "ResourcesApplied");
        assert!(cond.message.contains('3'));
        assert_eq!(cond.observed_generation, Some(2));
    }

    #[test]
    fn test_progressing_flips_ready_to_false() {
        let mut conditions = vec![ready(2, Some(1))];
        let changed = set_condition(&mut conditions, progressing(Some(1)));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].reason, "ResourcesProgressing");
    }

    #[test]
    fn test_cleanup_failed_carries_cause() {
        let cond = cleanup_failed("dataplane unreachable: connection refused", None);
        assert_eq!(cond.type_, TYPE_FINALIZING);
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, "CleanupFailed");
        assert!(cond.message.contains("connection refused"));
    }

    #[test]
    fn test_finalizing_is_distinct_from_ready() {
        let mut conditions = vec![ready(1, Some(4))];
        set_condition(&mut conditions, finalizing(Some(4)));
        assert_eq!(conditions.len(), 2);
    }
}
