//! Integration tests for request lifecycles driven through the engine
//!
//! Covers retry bookkeeping under shared templates, misbehaving templates,
//! and the attempt bounds that retry policies promise.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use courier_core::{
    Completion, ErrorCode, ExecutionContext, IllegalStateTransition, Operation, RequestError,
    RequestExecution, RequestTemplate, SharedTemplate, StateName, Step, TemplateChain, Transition,
    TransitionFor,
};
use courier_runtime::retry::{DelaySequence, RetryPolicy, RetryTemplate};
use courier_runtime::templates::{AttemptLimit, Deadline};
use courier_runtime::{BlockingStrategy, Engine, PolicyError, TokioStrategy};
use courier_testing::{
    AlwaysRetry, MockClient, MockReply, MockRequest, MockResponse, MockTransportError,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Sleeps after every response, resuming with a second sleep.
struct SleepsTwice;

impl<T> RequestTemplate<MockClient, T> for SleepsTwice {
    fn after_response(
        &self,
        _context: &mut ExecutionContext,
        _request: &MockRequest,
        _response: &MockResponse,
    ) -> TransitionFor<MockClient, T> {
        Transition::sleep(
            Duration::from_millis(1),
            Transition::sleep(Duration::from_millis(1), Transition::Continue),
        )
    }
}

/// Tags every retried request with the attempt number it is about to make.
struct TagAttempts;

impl<T> RequestTemplate<MockClient, T> for TagAttempts {
    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        request: &MockRequest,
        _error: &MockTransportError,
    ) -> TransitionFor<MockClient, T> {
        let next = context.attempts() + 1;
        Transition::retry(request.clone().with_header("x-attempt", next.to_string()))
    }
}

// ============================================================================
// Retry
// ============================================================================

#[test]
fn retry_exhaustion_surfaces_last_transport_error() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("refused"))
        .template(RetryTemplate::new(RetryPolicy::immediate(2)))
        .build();

    let result = engine.execute(MockRequest::get("http://svc/"));

    assert_eq!(engine.client().send_count(), 3);
    match result {
        Err(RequestError::Transport(error)) => assert_eq!(error.attempt, 3),
        other => panic!("expected the third transport error, got {other:?}"),
    }
}

#[test]
fn shared_retry_template_counts_per_execution() {
    let retry: SharedTemplate<MockClient, MockResponse> =
        Arc::new(RetryTemplate::new(RetryPolicy::immediate(1)));
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("refused"))
        .shared_template(retry)
        .build();

    // A template-wide counter would refuse to retry the second execution
    let first = engine.execute(MockRequest::get("http://svc/a"));
    let second = engine.execute(MockRequest::get("http://svc/b"));

    assert!(first.is_err());
    assert!(second.is_err());
    assert_eq!(engine.client().send_count(), 4);
}

#[test]
fn retry_resends_the_request_the_template_chose() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::with_sequence([
        MockReply::fail("reset"),
        MockReply::fail("reset"),
        MockReply::ok(json!(null)),
    ]))
    .template(TagAttempts)
    .build();

    engine.execute(MockRequest::get("http://svc/")).unwrap();

    let tags: Vec<Option<String>> = engine
        .client()
        .history()
        .into_iter()
        .map(|request| request.headers.get("x-attempt").cloned())
        .collect();
    assert_eq!(tags, vec![None, Some("2".into()), Some("3".into())]);
}

#[test]
fn retryable_status_is_resent() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::with_sequence([
        MockReply::status(503, json!(null)),
        MockReply::status(429, json!(null)),
        MockReply::ok(json!({"done": true})),
    ]))
    .template(RetryTemplate::new(RetryPolicy::immediate(5)).when_status([429, 503]))
    .build();

    let response = engine.execute(MockRequest::get("http://svc/")).unwrap();

    assert_eq!(response.body, json!({"done": true}));
    assert_eq!(engine.client().send_count(), 3);
}

#[test]
fn non_retryable_error_fails_immediately() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("bad certificate"))
        .template(
            RetryTemplate::new(RetryPolicy::immediate(5))
                .when_error(|error: &MockTransportError| error.message.contains("reset")),
        )
        .build();

    let result = engine.execute(MockRequest::get("http://svc/"));

    assert_eq!(result.err().map(|e| e.code()), Some(ErrorCode::Transport));
    assert_eq!(engine.client().send_count(), 1);
}

#[test]
fn finite_backoff_stops_before_max_retries() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("refused"))
        .template(
            RetryTemplate::new(RetryPolicy::immediate(2))
                .with_backoff(DelaySequence::once(Duration::from_millis(1))),
        )
        .build();

    let result = engine.execute(MockRequest::get("http://svc/"));

    assert_eq!(engine.client().send_count(), 2);
    match result {
        Err(RequestError::Transport(error)) => assert_eq!(error.attempt, 2),
        other => panic!("expected the second transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn backoff_position_is_tracked_per_execution() {
    let retry: SharedTemplate<MockClient, MockResponse> = Arc::new(
        RetryTemplate::new(RetryPolicy::immediate(10)).with_backoff(DelaySequence::new([
            Duration::from_millis(1),
            Duration::from_millis(1),
        ])),
    );
    let engine: Engine<MockClient, TokioStrategy> =
        Engine::builder(MockClient::always_failing("refused"))
            .shared_template(retry)
            .strategy(TokioStrategy)
            .build();

    let first = engine.execute(MockRequest::get("http://svc/a")).await;
    let second = engine.execute(MockRequest::get("http://svc/b")).await;

    assert!(first.is_err() && second.is_err());
    assert_eq!(engine.client().send_count(), 6);
}

// ============================================================================
// Sleeps and protocol misuse
// ============================================================================

#[test]
fn sleep_can_resume_into_another_sleep() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_ok(json!(null)))
        .template(SleepsTwice)
        .build();

    let started = Instant::now();
    let result = engine.execute(MockRequest::get("http://svc/"));

    assert!(result.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(2));
    assert_eq!(engine.client().send_count(), 1);
}

#[tokio::test]
async fn tokio_strategy_honors_chained_sleeps() {
    let engine: Engine<MockClient, TokioStrategy> =
        Engine::builder(MockClient::always_ok(json!(null)))
            .template(SleepsTwice)
            .strategy(TokioStrategy)
            .build();

    let result = engine.execute(MockRequest::get("http://svc/")).await;

    assert!(result.is_ok());
    assert_eq!(engine.client().send_count(), 1);
}

#[test]
fn completing_twice_is_an_illegal_transition() {
    let mut execution: RequestExecution<MockClient> = RequestExecution::start(
        Arc::new(MockClient::always_ok(json!(null))),
        Arc::new(TemplateChain::new()),
        MockRequest::get("http://svc/"),
    );
    let invocation = loop {
        match execution.step() {
            Step::Send(invocation) => break invocation,
            Step::Advanced => {},
            other => panic!("expected a send, got {other:?}"),
        }
    };
    let duplicate = Completion::new(
        invocation.request().clone(),
        Ok(MockResponse::ok(json!(null))),
    );

    execution.complete(invocation.invoke());
    execution.complete(duplicate);

    match execution.into_result() {
        Err(RequestError::IllegalStateTransition(IllegalStateTransition { operation, state })) => {
            assert_eq!(operation, Operation::Finish);
            assert_eq!(state, StateName::AwaitingAfterDecision);
        },
        other => panic!("expected an illegal transition, got {other:?}"),
    }
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn deadline_cuts_retries_short() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("refused"))
        .template(Deadline::new(Duration::from_millis(60)))
        .template(RetryTemplate::new(
            RetryPolicy::builder()
                .max_retries(100)
                .initial_delay(Duration::from_millis(25))
                .multiplier(1.0)
                .build(),
        ))
        .build();

    let result = engine.execute(MockRequest::get("http://svc/"));

    let sends = engine.client().send_count();
    assert!((2..=4).contains(&sends), "unexpected send count {sends}");
    assert!(matches!(
        result.as_ref().err().and_then(RequestError::user_error::<PolicyError>),
        Some(PolicyError::DeadlineExceeded { limit_ms: 60, .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retry_template_sends_at_most_one_more_than_max_retries(
        max_retries in 0usize..6,
        failures in 0usize..10,
    ) {
        let mut script: Vec<MockReply> = (0..failures).map(|i| MockReply::fail(format!("e{i}"))).collect();
        script.push(MockReply::ok(json!(null)));

        let engine: Engine<MockClient> = Engine::builder(MockClient::with_sequence(script))
            .template(RetryTemplate::new(RetryPolicy::immediate(max_retries)))
            .build();
        let result = engine.execute(MockRequest::get("http://svc/"));

        let sends = engine.client().send_count();
        prop_assert!(sends <= max_retries + 1);
        prop_assert_eq!(result.is_ok(), failures <= max_retries);
        prop_assert_eq!(sends, failures.min(max_retries) + 1);
    }

    #[test]
    fn attempt_limit_bounds_unbounded_retry(limit in 0usize..8) {
        let engine: Engine<MockClient> = Engine::builder(MockClient::always_failing("refused"))
            .template(AttemptLimit::new(limit))
            .template(AlwaysRetry)
            .build();
        let result = engine.execute(MockRequest::get("http://svc/"));

        prop_assert_eq!(engine.client().send_count(), limit);
        prop_assert_eq!(
            result.as_ref().err().and_then(RequestError::user_error::<PolicyError>).cloned(),
            Some(PolicyError::AttemptLimitExceeded { attempts: limit })
        );
    }
}

#[test]
fn blocking_strategy_is_the_default() {
    let engine: Engine<MockClient> = Engine::builder(MockClient::always_ok(json!(1))).build();
    let _: &BlockingStrategy = engine.strategy();
    assert!(engine.templates().is_empty());
}
