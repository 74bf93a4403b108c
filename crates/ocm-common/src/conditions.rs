//! Kubernetes-style status conditions and merge helpers
//!
//! Conditions are the only user-visible surface of the operators. The status
//! sub-document is treated as an append/merge log keyed by condition type:
//! setting a condition replaces the entry with the same type, preserving
//! `lastTransitionTime` when the status did not actually change.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Any condition flipped to `True` carries a stable machine-readable `reason`
/// token and a human `message`; the `type`/`reason` pairs are public contract.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Applied, Progressing)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
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
        }
    }
}

/// Merge a condition into a condition list, keyed by type.
///
/// The existing entry's `lastTransitionTime` is kept when the status is
/// unchanged, so repeated reconciles do not churn the timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time: transition_time,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check whether a condition of the given type exists and is True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    matches!(
        find_condition(conditions, type_),
        Some(c) if c.status == ConditionStatus::True
    )
}

/// Remove a condition by type, if present
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_appends_new_types() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            Condition::new("Applied", ConditionStatus::True, "Applied", "all good"),
        );
        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, "Applied"));
    }

    #[test]
    fn set_condition_replaces_same_type() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            Condition::new("Progressing", ConditionStatus::True, "Rolling", "rolling out"),
        );
        set_condition(
            &mut conditions,
            Condition::new("Progressing", ConditionStatus::False, "UpToDate", "converged"),
        );
        assert_eq!(conditions.len(), 1);
        assert!(!is_condition_true(&conditions, "Progressing"));
        assert_eq!(conditions[0].reason, "UpToDate");
    }

    #[test]
    fn transition_time_kept_when_status_unchanged() {
        let mut conditions = vec![];
        let first = Condition::new("Applied", ConditionStatus::True, "Applied", "v1");
        let stamp = first.last_transition_time;
        set_condition(&mut conditions, first);

        // Same status, new message: the timestamp must not move.
        let mut second = Condition::new("Applied", ConditionStatus::True, "Applied", "v2");
        second.last_transition_time = stamp + chrono::Duration::seconds(30);
        set_condition(&mut conditions, second);

        assert_eq!(conditions[0].last_transition_time, stamp);
        assert_eq!(conditions[0].message, "v2");
    }

    #[test]
    fn transition_time_moves_on_status_change() {
        let mut conditions = vec![];
        let first = Condition::new("Applied", ConditionStatus::True, "Applied", "ok");
        let stamp = first.last_transition_time;
        set_condition(&mut conditions, first);

        let mut second = Condition::new("Applied", ConditionStatus::False, "ApplyFailed", "boom");
        second.last_transition_time = stamp + chrono::Duration::seconds(30);
        set_condition(&mut conditions, second.clone());

        assert_eq!(conditions[0].last_transition_time, second.last_transition_time);
    }

    #[test]
    fn remove_condition_drops_entry() {
        let mut conditions = vec![Condition::new(
            "RebootstrapProgressing",
            ConditionStatus::True,
            "WaitingForScaleDown",
            "",
        )];
        remove_condition(&mut conditions, "RebootstrapProgressing");
        assert!(conditions.is_empty());
    }
}
