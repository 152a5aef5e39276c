//! Small pure predicates used for validation and dispatch.
//!
//! The value predicates work on [`serde_json::Value`], the dynamic shape
//! token claims and event payloads take before they are interpreted. The
//! step predicates answer the two questions the builder and executor ask of
//! a step: can it be called, and does it complete asynchronously.

use crate::pipeline::Step;
use crate::pipeline::StepFn;
use serde_json::Value;

/// Returns true for JSON objects.
#[must_use]
pub const fn is_object(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}

/// Returns true for numbers with no fractional part that fit in 64 bits.
#[must_use]
pub fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

/// Returns true for `null`, `""`, `[]` and `{}`.
#[must_use]
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Returns true if the slot holds a step.
#[must_use]
pub const fn is_callable<I, O>(slot: &Option<Step<I, O>>) -> bool {
    slot.is_some()
}

/// Returns true if the step completes asynchronously.
#[must_use]
pub const fn is_async<I, O>(step: &Step<I, O>) -> bool {
    step.func.is_async()
}

pub(crate) const fn is_callable_slot(slot: &Option<StepFn>) -> bool {
    slot.is_some()
}

pub(crate) fn is_sync_slot(slot: &Option<StepFn>) -> bool {
    slot.as_ref().is_some_and(|func| !func.is_async())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_predicates() {
        assert!(is_object(&json!({"a": 1})));
        assert!(!is_object(&json!([1, 2])));
        assert!(is_integer(&json!(3)));
        assert!(is_integer(&json!(-3)));
        assert!(!is_integer(&json!(3.5)));
        assert!(!is_integer(&json!("3")));
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(&Value::Null));
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!(false)));
        assert!(!is_empty(&json!([null])));
    }

    #[test]
    fn test_step_predicates() {
        let sync = Step::new(|x: i32| Ok(x));
        let pending = Step::from_async(|x: i32| async move { anyhow::Ok(x) });

        assert!(is_callable(&Some(sync.clone())));
        assert!(!is_callable(&None::<Step<i32, i32>>));
        assert!(!is_async(&sync));
        assert!(is_async(&pending));

        assert!(is_sync_slot(&Some(sync.func)));
        assert!(!is_sync_slot(&Some(pending.func)));
        assert!(!is_sync_slot(&None));
    }
}
