//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::errors::{PipelineError, PipelineErrorKind, ServiceError};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{
        compose, pipe, pipe_async, pipe_async_with_options, ExecutionOptions, Pipeline, Step,
    };
    use crate::retry::{AuthAwareRetryStrategy, ExponentialBackoff};
    use crate::testing::{failing_step, flaky_step};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn counting(counter: &Arc<AtomicUsize>, f: fn(i64) -> i64) -> Step<i64, i64> {
        let counter = Arc::clone(counter);
        Step::new(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(f(x))
        })
    }

    #[test]
    fn test_sync_run_equals_left_fold() {
        let fns: [fn(i64) -> i64; 4] = [|x| x + 3, |x| x * 7, |x| x - 11, |x| x / 2];
        let counter = Arc::new(AtomicUsize::new(0));

        for len in 1..=fns.len() {
            let pipeline = pipe(fns[..len].iter().map(|f| counting(&counter, *f))).unwrap();
            for input in [-20_i64, -1, 0, 1, 5, 1000] {
                let expected = fns[..len].iter().fold(input, |acc, f| f(acc));
                assert_eq!(pipeline.run(input).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_compose_is_function_composition() {
        let f = |x: i64| x * 3;
        let g = |x: i64| x - 4;
        let composed = compose([Step::new(move |x| Ok(f(x))), Step::new(move |x| Ok(g(x)))]).unwrap();

        for x in [-3_i64, 0, 2, 10] {
            assert_eq!(composed.run(x).unwrap(), f(g(x)));
        }
    }

    #[test]
    fn test_compose_reports_position_in_application_order() {
        let composed = compose([
            Step::new(|_: i64| -> anyhow::Result<i64> { anyhow::bail!("outer") }),
            Step::new(|x: i64| Ok(x)),
            Step::new(|x: i64| Ok(x)),
        ])
        .unwrap();

        let err = composed.run(1).unwrap_err();
        assert_eq!(err.step(), 3);
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_identity() {
        let sync = pipe(Vec::<Step<String, String>>::new()).unwrap();
        assert_eq!(sync.run("same".to_string()).unwrap(), "same");

        let token = CancellationToken::new();
        token.cancel("already aborted");
        let options = ExecutionOptions::new()
            .with_abort_signal(token)
            .with_timeout(Duration::from_millis(1));
        let pipeline = pipe_async_with_options(options, Vec::<Step<i32, i32>>::new()).unwrap();
        assert_eq!(pipeline.run(42).await.unwrap(), 42);
    }

    #[test]
    fn test_failing_step_reports_position_and_stops() {
        let after = Arc::new(AtomicUsize::new(0));
        let (broken, broken_calls) = failing_step("step two broke");
        let pipeline = pipe([
            Step::new(|x: i64| Ok(x + 1)),
            broken,
            counting(&after, |x| x),
            counting(&after, |x| x),
        ])
        .unwrap();

        let err = pipeline.run(1).unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Execution);
        assert_eq!(err.step(), 2);
        assert_eq!(err.cause().unwrap().to_string(), "step two broke");
        assert_eq!(broken_calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preset_abort_invokes_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel("user navigated away");

        let pipeline = pipe_async_with_options(
            ExecutionOptions::new().with_abort_signal(token),
            [counting(&calls, |x| x + 1), counting(&calls, |x| x + 1)],
        )
        .unwrap();

        let err = pipeline.run(0).await.unwrap_err();
        assert!(matches!(
            &err,
            PipelineError::Aborted { step: 1, reason: Some(reason) } if reason == "user navigated away"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_wait_for_step() {
        let settled = Arc::new(AtomicUsize::new(0));
        let slow = {
            let settled = Arc::clone(&settled);
            Step::from_async(move |x: i64| {
                let settled = Arc::clone(&settled);
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    settled.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(x)
                }
            })
        };

        let pipeline = pipe_async_with_options(
            ExecutionOptions::new().with_timeout(Duration::from_millis(50)),
            [Step::new(|x: i64| Ok(x)), slow],
        )
        .unwrap();

        let started = Instant::now();
        let err = pipeline.run(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { step: 2, timeout } if timeout == Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(settled.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt_with_growing_delays() {
        let attempts = Arc::new(Mutex::new(Vec::<Instant>::new()));
        let flaky = {
            let attempts = Arc::clone(&attempts);
            Step::from_async(move |x: i64| {
                let attempts = Arc::clone(&attempts);
                async move {
                    let count = {
                        let mut attempts = attempts.lock();
                        attempts.push(Instant::now());
                        attempts.len()
                    };
                    if count < 3 {
                        anyhow::bail!("network hiccup {count}");
                    }
                    Ok(x * 10)
                }
            })
        };

        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(3)
                .with_retry_delay(Duration::from_millis(100)),
            [flaky],
        )
        .unwrap();

        assert_eq!(pipeline.run(4).await.unwrap(), 40);

        let attempts = attempts.lock();
        assert_eq!(attempts.len(), 3);
        let first_gap = attempts[1] - attempts[0];
        let second_gap = attempts[2] - attempts[1];
        assert!(first_gap >= Duration::from_millis(80), "{first_gap:?}");
        assert!(second_gap >= first_gap, "{first_gap:?} then {second_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_carries_attempts_and_cause() {
        let (down, calls) = failing_step("always down");
        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(3)
                .with_retry_delay(Duration::from_millis(10)),
            [Step::new(|x: i64| Ok(x)), down],
        )
        .unwrap();

        let err = pipeline.run(1).await.unwrap_err();
        match &err {
            PipelineError::RetryExhausted {
                step,
                attempts,
                cause,
            } => {
                assert_eq!(*step, 2);
                assert_eq!(*attempts, 3);
                assert_eq!(cause.to_string(), "always down");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_flaky_step_within_budget() {
        let (flaky, calls) = flaky_step(2);
        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(3)
                .with_retry_delay(Duration::from_millis(10)),
            [flaky, Step::new(|x: i64| Ok(x * 2))],
        )
        .unwrap();
        assert_eq!(pipeline.run(4).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let (flaky, calls) = flaky_step(2);
        let short = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(2)
                .with_retry_delay(Duration::from_millis(10)),
            [flaky],
        )
        .unwrap();
        let err = short.run(4).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::RetryExhausted);
        assert_eq!(err.cause().unwrap().to_string(), "network error on call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_refusal_stops_after_one_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rejected = {
            let calls = Arc::clone(&calls);
            Step::from_async(move |_: i64| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<i64, _>(
                        ServiceError::new("Invalid login credentials")
                            .with_code("invalid_credentials")
                            .into(),
                    )
                }
            })
        };

        let strategy = Arc::new(AuthAwareRetryStrategy::new(ExponentialBackoff::with_max_retries(3)));
        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(4)
                .with_retry_strategy(strategy),
            [rejected],
        )
        .unwrap();

        let err = pipeline.run(0).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Execution);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_backoff_wakes_early() {
        let (offline, calls) = failing_step("offline");
        let token = CancellationToken::new();
        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_retry_attempts(5)
                .with_retry_delay(Duration::from_secs(60))
                .with_abort_signal(token.clone()),
            [offline],
        )
        .unwrap();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel("unmounted");
        });

        let started = Instant::now();
        let err = pipeline.run(0).await.unwrap_err();
        assert_ok!(canceller.await);

        assert_eq!(err.kind(), PipelineErrorKind::Aborted);
        assert_eq!(err.step(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_timeout_propagates_unchanged() {
        let inner = pipe_async_with_options(
            ExecutionOptions::new().with_timeout(Duration::from_millis(10)),
            [Step::from_async(|x: i64| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                anyhow::Ok(x)
            })],
        )
        .unwrap();

        let outer = Pipeline::new()
            .then(|x: i64| Ok(x + 1))
            .then(|x: i64| Ok(x + 1))
            .then_step(inner.into_step())
            .build_async()
            .unwrap();

        let err = outer.run(0).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Timeout);
        assert_eq!(err.step(), 1);
    }

    #[tokio::test]
    async fn test_nested_execution_error_is_wrapped_at_outer_step() {
        let inner = pipe([Step::new(|_: i64| -> anyhow::Result<i64> { anyhow::bail!("inner") })]).unwrap();
        let outer = Pipeline::new()
            .then(|x: i64| Ok(x))
            .then_step(inner.into_step())
            .build_async()
            .unwrap();

        let err = outer.run(0).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Execution);
        assert_eq!(err.step(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_emitted_for_run_and_retries() {
        let sink = Arc::new(CollectingEventSink::new());
        let (fetch, _calls) = failing_step("fetch failed");
        let pipeline = pipe_async_with_options(
            ExecutionOptions::new()
                .with_label("profile-fetch")
                .with_retry_attempts(2)
                .with_retry_delay(Duration::from_millis(5))
                .with_event_sink(sink.clone()),
            [fetch],
        )
        .unwrap();

        assert_err!(pipeline.run(1).await);
        assert_eq!(
            sink.names(),
            vec!["pipeline.started", "pipeline.step.retrying", "pipeline.failed"]
        );
        let (_, failed) = &sink.events()[2];
        assert_eq!(failed["pipeline"], "profile-fetch");
        assert_eq!(failed["error"]["type"], "RetryExhaustedError");
    }

    #[tokio::test]
    async fn test_async_pipeline_mixes_sync_and_async_steps_with_trace() {
        let pipeline = Pipeline::new()
            .then(|x: i64| Ok(x + 1))
            .then_async(|x: i64| async move { anyhow::Ok(x.to_string()) })
            .then(|s: String| Ok(format!("<{s}>")))
            .build_async_with_options(ExecutionOptions::new().with_trace(true).with_label("mixed"))
            .unwrap();

        assert_eq!(pipeline.run(1).await.unwrap(), "<2>");

        let default = pipe_async([Step::new(|x: i64| Ok(x * 2))]).unwrap();
        assert_eq!(
            default
                .run_with(2, &ExecutionOptions::new().with_trace(true))
                .await
                .unwrap(),
            4
        );
    }

    #[test]
    fn test_scenario_a_increment_then_double() {
        let pipeline = crate::pipe!(|x: i32| Ok(x + 1), |x| Ok(x * 2)).unwrap();
        assert_eq!(pipeline.run(3).unwrap(), 8);
    }

    #[test]
    fn test_scenario_b_increment_then_stringify() {
        let pipeline = crate::pipe!(|x: i32| Ok(x + 1), |x: i32| Ok(x.to_string()))
            .unwrap()
            .with_trace("scenario-b");
        assert_eq!(pipeline.run(3).unwrap(), "4");
    }
}
