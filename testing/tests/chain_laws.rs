//! Laws every template chain must obey, checked against scripted clients

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use courier_core::{
    ErrorCode, ExecutionContext, RequestError, RequestTemplate, TemplateChain, Transition,
    TransitionFor,
};
use courier_runtime::retry::{RetryPolicy, RetryTemplate};
use courier_runtime::templates::AttemptLimit;
use courier_runtime::{Engine, PolicyError};
use courier_testing::properties::{arb_mock_request, arb_script};
use courier_testing::{
    AlwaysRetry, ExecutionTest, MockClient, MockReply, MockRequest, MockResponse,
    MockTransportError, RecordingTemplate, assertions,
};
use proptest::prelude::*;
use serde_json::json;

/// Finishes before any send.
struct Cached;

impl RequestTemplate<MockClient, MockResponse> for Cached {
    fn before_request(
        &self,
        _context: &mut ExecutionContext,
        _request: &MockRequest,
    ) -> TransitionFor<MockClient, MockResponse> {
        Transition::finish(MockResponse::ok(json!("cached")))
    }
}

fn outcome(
    result: &Result<MockResponse, RequestError<MockTransportError>>,
) -> Result<MockResponse, String> {
    result.as_ref().cloned().map_err(ToString::to_string)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Passive templates change nothing: same outcome, same requests sent.
    #[test]
    fn passive_templates_are_identity(script in arb_script(), request in arb_mock_request()) {
        let bare: Engine<MockClient> =
            Engine::builder(MockClient::with_sequence(script.clone())).build();
        let observed: Engine<MockClient> = Engine::builder(MockClient::with_sequence(script))
            .template(RecordingTemplate::new())
            .template(TemplateChain::new().with(RecordingTemplate::new()))
            .build();

        let expected = bare.execute(request.clone());
        let actual = observed.execute(request);

        prop_assert_eq!(outcome(&expected), outcome(&actual));
        prop_assert_eq!(bare.client().history(), observed.client().history());
        prop_assert_eq!(bare.client().send_count(), 1);
    }
}

#[test]
fn empty_chain_returns_response_unchanged() {
    ExecutionTest::new(|| MockClient::always_ok(json!({"id": 7})))
        .when_request(MockRequest::get("http://svc/users/7"))
        .then_result(|result| {
            assert_eq!(result.as_ref().unwrap(), &MockResponse::ok(json!({"id": 7})));
        })
        .then_client(|client| assert_eq!(client.send_count(), 1))
        .run_both();
}

#[test]
fn empty_chain_surfaces_transport_error() {
    ExecutionTest::new(|| MockClient::always_failing("connection refused"))
        .when_request(MockRequest::get("http://svc/"))
        .then_result(|result| {
            let error = result.as_ref().unwrap_err().transport().unwrap();
            assert_eq!(error.message, "connection refused");
        })
        .run_both();
}

#[test]
fn first_intervention_short_circuits_later_templates() {
    let later = RecordingTemplate::new();
    ExecutionTest::new(|| MockClient::always_ok(json!("fresh")))
        .with_template(Cached)
        .with_template(later.clone())
        .when_request(MockRequest::get("http://svc/"))
        .then_result(|result| assert_eq!(result.as_ref().unwrap().body, json!("cached")))
        .then_client(|client| assert_eq!(client.send_count(), 0))
        .run_both();

    assert!(later.calls().is_empty());
}

#[test]
fn attempt_limit_in_front_of_unbounded_retry() {
    ExecutionTest::new(|| MockClient::always_failing("refused"))
        .with_template(AttemptLimit::new(3))
        .with_template(AlwaysRetry)
        .when_request(MockRequest::get("http://svc/"))
        .then_result(|result| {
            let error = assertions::assert_user_error::<_, _, PolicyError>(result);
            assert_eq!(error, &PolicyError::AttemptLimitExceeded { attempts: 3 });
        })
        .then_client(|client| assert_eq!(client.send_count(), 3))
        .run_both();
}

#[test]
fn bounded_retry_fails_with_last_transport_error() {
    ExecutionTest::new(|| MockClient::always_failing("refused"))
        .with_template(RetryTemplate::new(RetryPolicy::immediate(2)))
        .when_request(MockRequest::get("http://svc/"))
        .then_result(|result| {
            assertions::assert_failed_with(result, ErrorCode::Transport);
            let error = result.as_ref().unwrap_err().transport().unwrap();
            assert_eq!(error.attempt, 3);
        })
        .then_client(|client| assert_eq!(client.send_count(), 3))
        .run_both();
}

#[test]
fn recovers_after_transient_failures() {
    ExecutionTest::new(|| {
        MockClient::with_sequence([
            MockReply::fail("reset"),
            MockReply::status(503, json!(null)),
            MockReply::ok(json!({"id": 1})),
        ])
    })
    .with_template(
        RetryTemplate::new(RetryPolicy::immediate(2)).when_status_5xx(),
    )
    .when_request(MockRequest::post("http://svc/users", json!({"name": "ada"})))
    .then_result(assertions::assert_finished)
    .then_client(|client| {
        assert_eq!(client.send_count(), 3);
        assert!(client.history().iter().all(|r| r.method == "POST"));
    })
    .run_both();
}

#[tokio::test]
async fn async_harness_matches_blocking_expectations() {
    ExecutionTest::new(|| MockClient::with_sequence([MockReply::fail("reset"), MockReply::ok(json!(2))]))
        .with_template(AttemptLimit::new(2))
        .with_template(AlwaysRetry)
        .when_request(MockRequest::get("http://svc/"))
        .then_result(assertions::assert_finished)
        .then_client(|client| assert_eq!(client.send_count(), 2))
        .run_async()
        .await;
}
