//! Sequential step pipelines.
//!
//! A pipeline is an ordered, immutable list of steps applied one at a time,
//! each step's output feeding the next. Pipelines run synchronously
//! ([`SyncPipeline`]) or asynchronously ([`AsyncPipeline`]); the asynchronous
//! mode adds per-step timeout, per-step retry and an abort signal through
//! [`ExecutionOptions`].
//!
//! ```
//! use stepflow::pipeline::{pipe, Step};
//!
//! let pipeline = pipe([Step::new(|x: i32| Ok(x + 1)), Step::new(|x: i32| Ok(x * 2))]).unwrap();
//! assert_eq!(pipeline.run(3).unwrap(), 8);
//! ```

mod branch;
mod builder;
mod executor;
mod memo;
mod options;
mod step;

#[cfg(test)]
mod integration_tests;

pub use branch::{pipe_if, pipe_if_else, Condition};
pub use builder::{
    compose, pipe, pipe_async, pipe_async_with_options, AsyncPipeline, Pipeline, SyncPipeline,
    ValidationMode,
};
pub use memo::{memoize, MemoStats, Memoized, StructuralKey};
pub use options::{ExecutionOptions, PipelineConfig};
pub use step::{Step, StepValue};

pub(crate) use step::StepFn;
