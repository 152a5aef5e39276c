//! Step functions and the type-erased form the executor runs.

use futures::future::{self, BoxFuture, FutureExt};
use std::any::{type_name, Any};
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A value that can flow between pipeline steps.
///
/// `Clone` lets a retried step receive the same input again; `Debug` lets
/// traces render intermediate values.
pub trait StepValue: Any + Clone + Debug + Send + 'static {}

impl<T: Any + Clone + Debug + Send + 'static> StepValue for T {}

pub(crate) trait DynValue: Any + Debug + Send {
    fn clone_boxed(&self) -> BoxedValue;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: StepValue> DynValue for T {
    fn clone_boxed(&self) -> BoxedValue {
        Box::new(self.clone())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) type BoxedValue = Box<dyn DynValue>;

pub(crate) fn boxed<T: StepValue>(value: T) -> BoxedValue {
    Box::new(value)
}

pub(crate) fn unbox<T: StepValue>(value: BoxedValue) -> anyhow::Result<T> {
    value
        .into_any()
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| anyhow::anyhow!("step received a value that is not a {}", type_name::<T>()))
}

pub(crate) type SyncFn = Arc<dyn Fn(BoxedValue) -> anyhow::Result<BoxedValue> + Send + Sync>;
pub(crate) type AsyncFn =
    Arc<dyn Fn(BoxedValue) -> BoxFuture<'static, anyhow::Result<BoxedValue>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum StepFn {
    Sync(SyncFn),
    Async(AsyncFn),
}

impl StepFn {
    pub(crate) const fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Runs the step as a future regardless of its flavour.
    pub(crate) fn call_async(&self, value: BoxedValue) -> BoxFuture<'static, anyhow::Result<BoxedValue>> {
        match self {
            Self::Sync(func) => future::ready(func(value)).boxed(),
            Self::Async(func) => func(value),
        }
    }
}

/// A unary transformation from `I` to `O`, synchronous or asynchronous.
///
/// The step's error is kept verbatim as the cause of whatever pipeline error
/// reports it.
pub struct Step<I, O> {
    pub(crate) func: StepFn,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: StepValue, O: StepValue> Step<I, O> {
    /// Creates a synchronous step.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let func: SyncFn = Arc::new(move |value| f(unbox::<I>(value)?).map(boxed));
        Self::from_fn(StepFn::Sync(func))
    }

    /// Creates an asynchronous step from a function returning a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let func: AsyncFn = Arc::new(move |value| match unbox::<I>(value) {
            Ok(input) => f(input).map(|result| result.map(boxed)).boxed(),
            Err(err) => future::ready(Err(err)).boxed(),
        });
        Self::from_fn(StepFn::Async(func))
    }

    /// Returns true if the step produces its result asynchronously.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.func.is_async()
    }

    pub(crate) const fn from_fn(func: StepFn) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

impl<T: StepValue> Step<T, T> {
    /// The step that returns its input.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Ok)
    }
}

impl<I, O> Clone for Step<I, O> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> Debug for Step<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("input", &type_name::<I>())
            .field("output", &type_name::<O>())
            .field("async", &self.func.is_async())
            .finish()
    }
}
