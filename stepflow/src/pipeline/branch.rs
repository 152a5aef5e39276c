//! Conditional steps.

use super::step::{BoxedValue, Step, StepFn, StepValue};
use std::fmt;
use std::sync::Arc;

/// Chooses a branch for each input.
pub enum Condition<T> {
    /// Always takes the same branch.
    Always(bool),
    /// Evaluated against every input, never cached.
    When(Arc<dyn Fn(&T) -> bool + Send + Sync>),
}

impl<T> Condition<T> {
    /// Creates a condition from a predicate over the input.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate))
    }

    /// Evaluates the condition for `value`.
    pub fn evaluate(&self, value: &T) -> bool {
        match self {
            Self::Always(taken) => *taken,
            Self::When(predicate) => predicate(value),
        }
    }
}

impl<T> From<bool> for Condition<T> {
    fn from(taken: bool) -> Self {
        Self::Always(taken)
    }
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Always(taken) => Self::Always(*taken),
            Self::When(predicate) => Self::When(Arc::clone(predicate)),
        }
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always(taken) => f.debug_tuple("Always").field(taken).finish(),
            Self::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Applies `then` when the condition holds and passes the input through
/// otherwise.
pub fn pipe_if<T: StepValue>(condition: impl Into<Condition<T>>, then: Step<T, T>) -> Step<T, T> {
    pipe_if_else(condition, then, Step::identity())
}

/// Applies `then` or `otherwise` depending on the condition.
///
/// The result is one step: synchronous when both branches are, asynchronous
/// otherwise. Errors from the chosen branch are returned as they are.
pub fn pipe_if_else<I: StepValue, O: StepValue>(
    condition: impl Into<Condition<I>>,
    then: Step<I, O>,
    otherwise: Step<I, O>,
) -> Step<I, O> {
    let condition = condition.into();

    let func = match (then.func, otherwise.func) {
        (StepFn::Sync(then), StepFn::Sync(otherwise)) => StepFn::Sync(Arc::new(move |value| {
            if holds(&condition, &value) {
                then(value)
            } else {
                otherwise(value)
            }
        })),
        (then, otherwise) => StepFn::Async(Arc::new(move |value| {
            if holds(&condition, &value) {
                then.call_async(value)
            } else {
                otherwise.call_async(value)
            }
        })),
    };

    Step::from_fn(func)
}

fn holds<T: StepValue>(condition: &Condition<T>, value: &BoxedValue) -> bool {
    value
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|value| condition.evaluate(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{pipe, Pipeline};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fixed_condition() {
        let double = Step::new(|x: i32| Ok(x * 2));
        let on = pipe([pipe_if(true, double.clone())]).unwrap();
        let off = pipe([pipe_if(false, double)]).unwrap();
        assert_eq!(on.run(4).unwrap(), 8);
        assert_eq!(off.run(4).unwrap(), 4);
    }

    #[test]
    fn test_predicate_evaluated_every_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let condition = Condition::when(move |x: &i32| {
            counted.fetch_add(1, Ordering::SeqCst);
            *x > 10
        });

        let clamp = pipe([pipe_if(condition, Step::new(|_: i32| Ok(10)))]).unwrap();
        assert_eq!(clamp.run(3).unwrap(), 3);
        assert_eq!(clamp.run(30).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_if_else_changes_type_and_propagates_errors() {
        let describe = pipe_if_else(
            Condition::when(|x: &i32| *x >= 0),
            Step::new(|x: i32| Ok(format!("+{x}"))),
            Step::new(|_: i32| -> anyhow::Result<String> { anyhow::bail!("negative input") }),
        );
        assert!(!describe.is_async());

        let pipeline = Pipeline::new().then_step(describe).build().unwrap();
        assert_eq!(pipeline.run(5).unwrap(), "+5");

        let err = pipeline.run(-1).unwrap_err();
        assert_eq!(err.step(), 1);
        assert_eq!(err.cause().unwrap().to_string(), "negative input");
    }

    #[tokio::test]
    async fn test_mixed_branches_become_async() {
        let step = pipe_if(
            Condition::when(|x: &i32| x % 2 == 0),
            Step::from_async(|x: i32| async move { anyhow::Ok(x / 2) }),
        );
        assert!(step.is_async());

        let pipeline = Pipeline::new().then_step(step).build_async().unwrap();
        assert_eq!(pipeline.run(8).await.unwrap(), 4);
        assert_eq!(pipeline.run(7).await.unwrap(), 7);
    }
}
