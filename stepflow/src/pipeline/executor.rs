//! Sequential step execution.
//!
//! Both modes apply slots strictly in order, one at a time. Step positions
//! reported in errors and logs are 1-based.

use super::options::ExecutionOptions;
use super::step::{BoxedValue, StepFn};
use crate::errors::PipelineError;
use crate::retry::RetryStrategy;
use anyhow::anyhow;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Runs `steps` synchronously over `input`.
///
/// `trace` carries the label when tracing is enabled.
pub(crate) fn run_sync(
    steps: &[Option<StepFn>],
    input: BoxedValue,
    trace: Option<&str>,
) -> Result<BoxedValue, PipelineError> {
    if steps.is_empty() {
        return Ok(input);
    }

    if let Some(label) = trace {
        debug!(pipeline = %label, input = ?input, "pipeline input");
    }

    let mut value = input;
    for (index, slot) in steps.iter().enumerate() {
        let step = index + 1;
        let func = match slot {
            Some(StepFn::Sync(func)) => func,
            Some(StepFn::Async(_)) => {
                return Err(PipelineError::execution(
                    step,
                    anyhow!("step {step} is asynchronous and cannot run synchronously"),
                ))
            }
            None => return Err(not_callable(step)),
        };

        value = func(value).map_err(|err| PipelineError::from_step_failure(step, err))?;

        if let Some(label) = trace {
            debug!(pipeline = %label, step, value = ?value, "step output");
        }
    }

    if let Some(label) = trace {
        debug!(pipeline = %label, output = ?value, "pipeline output");
    }
    Ok(value)
}

/// Runs `steps` asynchronously over `input` with the given options.
pub(crate) async fn run_async(
    steps: &[Option<StepFn>],
    input: BoxedValue,
    options: &ExecutionOptions,
) -> Result<BoxedValue, PipelineError> {
    if steps.is_empty() {
        return Ok(input);
    }

    let label = options.label();
    let strategy = options.strategy();

    emit(options, "pipeline.started", json!({ "pipeline": label, "steps": steps.len() }));
    if options.trace {
        debug!(pipeline = %label, input = ?input, "pipeline input");
    }

    let mut value = input;
    for (index, slot) in steps.iter().enumerate() {
        let step = index + 1;
        match run_step(step, slot.as_ref(), value, options, strategy.as_ref()).await {
            Ok(next) => value = next,
            Err(err) => {
                debug!(pipeline = %label, step, error = %err, "pipeline failed");
                emit(options, "pipeline.failed", json!({ "pipeline": label, "error": err.to_dict() }));
                return Err(err);
            }
        }

        if options.trace {
            debug!(pipeline = %label, step, value = ?value, "step output");
        }
    }

    if options.trace {
        debug!(pipeline = %label, output = ?value, "pipeline output");
    }
    emit(options, "pipeline.completed", json!({ "pipeline": label, "steps": steps.len() }));
    Ok(value)
}

async fn run_step(
    step: usize,
    slot: Option<&StepFn>,
    input: BoxedValue,
    options: &ExecutionOptions,
    strategy: &dyn RetryStrategy,
) -> Result<BoxedValue, PipelineError> {
    check_abort(step, options)?;
    let func = slot.ok_or_else(|| not_callable(step))?;

    let max_attempts = options.max_attempts();
    if max_attempts <= 1 {
        return invoke(step, func, input, options.timeout)
            .await
            .map_err(|err| PipelineError::from_step_failure(step, err));
    }

    let mut attempt: u32 = 1;
    loop {
        let attempt_input = input.clone_boxed();
        let failure = match invoke(step, func, attempt_input, options.timeout).await {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        if failure
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_terminal)
        {
            return Err(PipelineError::from_step_failure(step, failure));
        }
        if attempt >= max_attempts {
            return Err(PipelineError::retry_exhausted(step, attempt, failure));
        }
        if !strategy.should_retry(attempt, &failure) {
            return Err(PipelineError::from_step_failure(step, failure));
        }

        let delay = strategy.delay_for_attempt(attempt);
        debug!(
            pipeline = %options.label(),
            step,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "retrying step"
        );
        emit(
            options,
            "pipeline.step.retrying",
            json!({
                "pipeline": options.label(),
                "step": step,
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64,
                "error": failure.to_string(),
            }),
        );

        match &options.abort_signal {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
        check_abort(step, options)?;
    }
}

/// Invokes one attempt of a step.
///
/// Synchronous steps run inline. With a timeout, an asynchronous step runs
/// as its own task so that expiry can leave it running detached.
async fn invoke(
    step: usize,
    func: &StepFn,
    input: BoxedValue,
    timeout: Option<Duration>,
) -> anyhow::Result<BoxedValue> {
    let func = match func {
        StepFn::Sync(func) => return func(input),
        StepFn::Async(func) => func,
    };

    let future = func(input);
    let Some(limit) = timeout else {
        return future.await;
    };

    let handle = tokio::spawn(future);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(anyhow!("step {step} panicked: {join_error}")),
        Err(_) => Err(PipelineError::timeout(step, limit).into()),
    }
}

fn check_abort(step: usize, options: &ExecutionOptions) -> Result<(), PipelineError> {
    match &options.abort_signal {
        Some(token) if token.is_cancelled() => Err(PipelineError::aborted(step, token.reason())),
        _ => Ok(()),
    }
}

fn not_callable(step: usize) -> PipelineError {
    PipelineError::execution(step, anyhow!("step {step} is not a callable step"))
}

fn emit(options: &ExecutionOptions, event_type: &str, data: serde_json::Value) {
    if let Some(sink) = &options.event_sink {
        sink.emit(event_type, data);
    }
}
