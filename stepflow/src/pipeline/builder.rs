//! Pipeline builder with validation.

use super::executor;
use super::options::{ExecutionOptions, PipelineConfig};
use super::step::{boxed, unbox, Step, StepFn, StepValue};
use crate::errors::PipelineError;
use crate::predicates::{is_callable_slot, is_sync_slot};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Which run mode a step list is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every step must be present and synchronous.
    Sync,
    /// Every step must be present.
    Async,
}

/// Builder for a pipeline from `I` to `O`.
///
/// Chaining with [`Pipeline::then`] and friends checks at compile time that
/// each step consumes what the previous one produced.
pub struct Pipeline<I, O> {
    steps: Vec<Option<StepFn>>,
    config: PipelineConfig,
    _marker: PhantomData<fn(I) -> O>,
}

impl<T: StepValue> Pipeline<T, T> {
    /// Creates an empty pipeline, the identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            config: PipelineConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Creates a pipeline from a homogeneous step list.
    ///
    /// `None` entries stand for steps that could not be resolved; they are
    /// rejected by validation or reported when the pipeline runs.
    pub fn from_steps<S>(steps: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<Option<Step<T, T>>>,
    {
        Self {
            steps: steps
                .into_iter()
                .map(|step| step.into().map(|step| step.func))
                .collect(),
            config: PipelineConfig::default(),
            _marker: PhantomData,
        }
    }
}

impl<T: StepValue> Default for Pipeline<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: StepValue, O: StepValue> Pipeline<I, O> {
    /// Appends a synchronous step.
    #[must_use]
    pub fn then<N, F>(self, f: F) -> Pipeline<I, N>
    where
        N: StepValue,
        F: Fn(O) -> anyhow::Result<N> + Send + Sync + 'static,
    {
        self.then_step(Step::new(f))
    }

    /// Appends an asynchronous step.
    #[must_use]
    pub fn then_async<N, F, Fut>(self, f: F) -> Pipeline<I, N>
    where
        N: StepValue,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<N>> + Send + 'static,
    {
        self.then_step(Step::from_async(f))
    }

    /// Appends a prepared step.
    #[must_use]
    pub fn then_step<N: StepValue>(self, step: Step<O, N>) -> Pipeline<I, N> {
        let mut steps = self.steps;
        steps.push(Some(step.func));
        Pipeline {
            steps,
            config: self.config,
            _marker: PhantomData,
        }
    }

    /// Replaces the config.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the config.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Checks the step list for the given run mode.
    ///
    /// Runs regardless of `strict_validation`; the build methods call it only
    /// when that flag is set.
    pub fn validate(&self, mode: ValidationMode) -> Result<(), PipelineError> {
        for (index, slot) in self.steps.iter().enumerate() {
            let step = index + 1;
            if !is_callable_slot(slot) {
                return Err(PipelineError::validation(
                    step,
                    format!("argument {step} is not a callable step"),
                ));
            }
            if mode == ValidationMode::Sync && !is_sync_slot(slot) {
                return Err(PipelineError::validation(
                    step,
                    format!("argument {step} is asynchronous; build an async pipeline instead"),
                ));
            }
        }
        Ok(())
    }

    /// Builds a synchronous pipeline.
    pub fn build(self) -> Result<SyncPipeline<I, O>, PipelineError> {
        if self.config.strict_validation {
            self.validate(ValidationMode::Sync)?;
        }
        Ok(SyncPipeline {
            steps: self.steps.into(),
            trace: None,
            _marker: PhantomData,
        })
    }

    /// Builds an asynchronous pipeline with default options.
    pub fn build_async(self) -> Result<AsyncPipeline<I, O>, PipelineError> {
        self.build_async_with_options(ExecutionOptions::default())
    }

    /// Builds an asynchronous pipeline that applies `options` on every run.
    pub fn build_async_with_options(
        self,
        options: ExecutionOptions,
    ) -> Result<AsyncPipeline<I, O>, PipelineError> {
        if self.config.strict_validation {
            self.validate(ValidationMode::Async)?;
        }
        Ok(AsyncPipeline {
            steps: self.steps.into(),
            options,
            _marker: PhantomData,
        })
    }
}

impl<I, O> std::fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A built pipeline that runs its steps synchronously.
pub struct SyncPipeline<I, O> {
    steps: Arc<[Option<StepFn>]>,
    trace: Option<String>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: StepValue, O: StepValue> SyncPipeline<I, O> {
    /// Applies the steps to `input` in order.
    pub fn run(&self, input: I) -> Result<O, PipelineError> {
        let output = executor::run_sync(&self.steps, boxed(input), self.trace.as_deref())?;
        unbox(output).map_err(|err| PipelineError::execution(self.steps.len(), err))
    }

    /// Logs input, intermediate values and output under `label`.
    #[must_use]
    pub fn with_trace(mut self, label: impl Into<String>) -> Self {
        self.trace = Some(label.into());
        self
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Turns the pipeline into a plain function.
    pub fn into_fn(self) -> impl Fn(I) -> Result<O, PipelineError> + Send + Sync + 'static {
        move |input| self.run(input)
    }

    /// Turns the pipeline into a single step of another pipeline.
    pub fn into_step(self) -> Step<I, O> {
        Step::new(move |input| self.run(input).map_err(anyhow::Error::from))
    }
}

impl<I, O> Clone for SyncPipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            trace: self.trace.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for SyncPipeline<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("steps", &self.steps.len())
            .field("trace", &self.trace)
            .finish()
    }
}

/// A built pipeline that resolves each step before feeding the next.
pub struct AsyncPipeline<I, O> {
    steps: Arc<[Option<StepFn>]>,
    options: ExecutionOptions,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: StepValue, O: StepValue> AsyncPipeline<I, O> {
    /// Runs the pipeline with its own options.
    pub async fn run(&self, input: I) -> Result<O, PipelineError> {
        self.run_with(input, &self.options).await
    }

    /// Runs the pipeline with options supplied for this invocation only.
    pub async fn run_with(&self, input: I, options: &ExecutionOptions) -> Result<O, PipelineError> {
        let output = executor::run_async(&self.steps, boxed(input), options).await?;
        unbox(output).map_err(|err| PipelineError::execution(self.steps.len(), err))
    }

    /// Returns the options applied by [`AsyncPipeline::run`].
    pub const fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Turns the pipeline into a single asynchronous step of another
    /// pipeline.
    pub fn into_step(self) -> Step<I, O> {
        Step::from_async(move |input| {
            let pipeline = self.clone();
            async move { pipeline.run(input).await.map_err(anyhow::Error::from) }
        })
    }
}

impl<I, O> Clone for AsyncPipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            options: self.options.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for AsyncPipeline<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPipeline")
            .field("steps", &self.steps.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Builds a synchronous pipeline from a homogeneous step list.
pub fn pipe<T, S>(steps: impl IntoIterator<Item = S>) -> Result<SyncPipeline<T, T>, PipelineError>
where
    T: StepValue,
    S: Into<Option<Step<T, T>>>,
{
    Pipeline::from_steps(steps).build()
}

/// Builds an asynchronous pipeline from a homogeneous step list.
pub fn pipe_async<T, S>(
    steps: impl IntoIterator<Item = S>,
) -> Result<AsyncPipeline<T, T>, PipelineError>
where
    T: StepValue,
    S: Into<Option<Step<T, T>>>,
{
    Pipeline::from_steps(steps).build_async()
}

/// Builds an asynchronous pipeline that applies `options` on every run.
pub fn pipe_async_with_options<T, S>(
    options: ExecutionOptions,
    steps: impl IntoIterator<Item = S>,
) -> Result<AsyncPipeline<T, T>, PipelineError>
where
    T: StepValue,
    S: Into<Option<Step<T, T>>>,
{
    Pipeline::from_steps(steps).build_async_with_options(options)
}

/// Builds a synchronous pipeline applying `steps` right to left.
///
/// Reported step positions count steps in application order, so the last
/// element of `steps` is step 1.
pub fn compose<T, S>(steps: impl IntoIterator<Item = S>) -> Result<SyncPipeline<T, T>, PipelineError>
where
    T: StepValue,
    S: Into<Option<Step<T, T>>>,
{
    let mut steps: Vec<S> = steps.into_iter().collect();
    steps.reverse();
    pipe(steps)
}

/// Builds a synchronous pipeline from closures applied left to right.
///
/// ```
/// let inc_then_double = stepflow::pipe!(|x: i32| Ok(x + 1), |x| Ok(x * 2)).unwrap();
/// assert_eq!(inc_then_double.run(3).unwrap(), 8);
/// ```
#[macro_export]
macro_rules! pipe {
    () => {
        $crate::pipeline::Pipeline::new().build()
    };
    ($($step:expr),+ $(,)?) => {
        $crate::pipeline::Pipeline::new()$(.then($step))+.build()
    };
}

/// Builds an asynchronous pipeline from closures returning futures.
///
/// Prefix the closures with `options;` to apply [`ExecutionOptions`] on every
/// run.
#[macro_export]
macro_rules! pipe_async {
    () => {
        $crate::pipeline::Pipeline::new().build_async()
    };
    ($options:expr; $($step:expr),+ $(,)?) => {
        $crate::pipeline::Pipeline::new()$(.then_async($step))+.build_async_with_options($options)
    };
    ($($step:expr),+ $(,)?) => {
        $crate::pipeline::Pipeline::new()$(.then_async($step))+.build_async()
    };
}

/// Builds a synchronous pipeline from closures applied right to left:
/// `compose!(f, g)` computes `f(g(x))`.
#[macro_export]
macro_rules! compose {
    (@rev [$($rev:expr),*]) => {
        $crate::pipeline::Pipeline::new()$(.then($rev))*.build()
    };
    (@rev [$($rev:expr),*] $head:expr $(, $tail:expr)*) => {
        $crate::compose!(@rev [$head $(, $rev)*] $($tail),*)
    };
    () => {
        $crate::pipeline::Pipeline::new().build()
    };
    ($($step:expr),+ $(,)?) => {
        $crate::compose!(@rev [] $($step),+)
    };
}
