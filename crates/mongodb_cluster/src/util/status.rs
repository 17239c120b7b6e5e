use chrono::{SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::util::errors::{Result, StdError};

/// Current time as a `metav1.Time`.
pub fn now() -> Result<Time> {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(ts))
        .map_err(|e| StdError::JsonSerializationError(e).into())
}

/// Sets the corresponding condition in conditions to new_condition and returns
/// a tuple containing the new conditions vector and whether it was changed.
///
/// The new condition's LastTransitionTime is only taken over when the status
/// flips or the condition is added; reason, message and observed generation
/// are overwritten in place.
pub fn set_status_condition(conditions: &[Condition], new_condition: Condition) -> (Vec<Condition>, bool) {
    let mut new_conditions = conditions.to_vec();

    let Some(existing) = new_conditions
        .iter_mut()
        .find(|c| c.type_ == new_condition.type_)
    else {
        new_conditions.push(new_condition);
        return (new_conditions, true);
    };

    let mut changed = false;
    if existing.status != new_condition.status {
        existing.status = new_condition.status;
        existing.last_transition_time = new_condition.last_transition_time;
        changed = true;
    }
    if existing.reason != new_condition.reason {
        existing.reason = new_condition.reason;
        changed = true;
    }
    if existing.message != new_condition.message {
        existing.message = new_condition.message;
        changed = true;
    }
    if existing.observed_generation != new_condition.observed_generation {
        existing.observed_generation = new_condition.observed_generation;
        changed = true;
    }

    (new_conditions, changed)
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_status_condition(conditions, condition_type).is_some_and(|c| c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(ts: &str) -> Time {
        serde_json::from_value(serde_json::Value::String(ts.to_string())).unwrap()
    }

    fn condition(status: &str, reason: &str, at: &str) -> Condition {
        Condition {
            type_: "TLSConfigured".to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: time(at),
            observed_generation: Some(1),
        }
    }

    #[test]
    fn adds_missing_condition() {
        let (conditions, changed) = set_status_condition(&[], condition("False", "TLSStaged", "2024-01-01T00:00:00Z"));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert!(!is_status_condition_true(&conditions, "TLSConfigured"));
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let start = vec![condition("False", "TLSStaged", "2024-01-01T00:00:00Z")];

        let (same_status, changed) =
            set_status_condition(&start, condition("False", "TLSConfigInvalid", "2024-01-02T00:00:00Z"));
        assert!(changed);
        assert_eq!(same_status[0].reason, "TLSConfigInvalid");
        assert_eq!(same_status[0].last_transition_time, time("2024-01-01T00:00:00Z"));

        let (flipped, changed) = set_status_condition(&same_status, condition("True", "TLSEnabled", "2024-01-03T00:00:00Z"));
        assert!(changed);
        assert_eq!(flipped[0].last_transition_time, time("2024-01-03T00:00:00Z"));
        assert!(is_status_condition_true(&flipped, "TLSConfigured"));
    }

    #[test]
    fn unchanged_condition_reports_no_change() {
        let start = vec![condition("True", "TLSEnabled", "2024-01-01T00:00:00Z")];
        let (conditions, changed) =
            set_status_condition(&start, condition("True", "TLSEnabled", "2024-01-05T00:00:00Z"));
        assert!(!changed);
        assert_eq!(conditions, start);
    }

    #[test]
    fn now_is_a_valid_time() {
        assert!(now().is_ok());
    }
}
