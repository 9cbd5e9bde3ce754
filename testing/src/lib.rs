//! # Courier Testing
//!
//! Testing utilities and helpers for courier clients and template chains.
//!
//! This crate provides:
//! - A scriptable [`MockClient`] with an HTTP-shaped request vocabulary, and
//!   its async counterpart [`MockAsyncClient`]
//! - Passive and retrying templates for exercising the lifecycle
//! - A Given-When-Then harness that runs a chain under either strategy
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use courier_runtime::templates::AttemptLimit;
//! use courier_testing::{AlwaysRetry, ExecutionTest, MockClient, MockRequest, assertions};
//! use courier_core::ErrorCode;
//!
//! ExecutionTest::new(|| MockClient::always_failing("connection refused"))
//!     .with_template(AttemptLimit::new(3))
//!     .with_template(AlwaysRetry)
//!     .when_request(MockRequest::get("http://svc/health"))
//!     .then_result(|result| assertions::assert_failed_with(result, ErrorCode::User))
//!     .then_client(|client| assert_eq!(client.send_count(), 3))
//!     .run_both();
//! ```

/// Scriptable clients and passive templates
pub mod mocks;


/// Test helpers and utilities.
pub mod helpers {
    use courier_core::{Client, ExecutionResult};
    use courier_runtime::{Engine, TokioStrategy};
    use futures::future::join_all;

    /// Install a `fmt` subscriber filtered by `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Execute every request concurrently on `engine`, results in input order.
    pub async fn run_concurrently<C, T>(
        engine: &Engine<C, TokioStrategy, T>,
        requests: impl IntoIterator<Item = C::Request>,
    ) -> Vec<ExecutionResult<C, T>>
    where
        C: Client + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static,
    {
        join_all(requests.into_iter().map(|request| engine.execute(request))).await
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use crate::mocks::{MockReply, MockRequest, MockResponse};
    use proptest::prelude::*;
    use serde_json::{Value, json};

    /// Status codes, weighted towards success.
    pub fn arb_status() -> impl Strategy<Value = u16> {
        prop_oneof![
            3 => Just(200u16),
            1 => 400u16..600,
        ]
    }

    fn arb_body() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(|n| json!({ "n": n })),
            "[a-z]{0,12}".prop_map(Value::String),
        ]
    }

    /// Requests with a random method, path, header and body.
    pub fn arb_mock_request() -> impl Strategy<Value = MockRequest> {
        (
            prop_oneof![Just("GET"), Just("POST"), Just("PUT"), Just("DELETE")],
            "[a-z]{1,8}(/[a-z0-9]{1,6}){0,3}",
            proptest::option::of("[a-z0-9]{1,12}"),
            proptest::option::of(arb_body()),
        )
            .prop_map(|(method, path, trace_id, body)| {
                let mut request = MockRequest::new(method, format!("http://svc/{path}"));
                if let Some(trace_id) = trace_id {
                    request = request.with_header("x-trace-id", trace_id);
                }
                if let Some(body) = body {
                    request = request.with_body(body);
                }
                request
            })
    }

    /// Responses with a random status and body.
    pub fn arb_mock_response() -> impl Strategy<Value = MockResponse> {
        (arb_status(), arb_body()).prop_map(|(status, body)| MockResponse::with_status(status, body))
    }

    /// A single scripted reply: a response or a transport error.
    pub fn arb_reply() -> impl Strategy<Value = MockReply> {
        prop_oneof![
            arb_mock_response().prop_map(MockReply::Respond),
            "[a-z ]{1,16}".prop_map(MockReply::Fail),
        ]
    }

    /// A non-empty script for [`MockClient::with_sequence`](crate::MockClient::with_sequence).
    pub fn arb_script() -> impl Strategy<Value = Vec<MockReply>> {
        proptest::collection::vec(arb_reply(), 1..8)
    }
}

// Re-export commonly used items
pub use execution_test::{ExecutionTest, assertions};
pub use mocks::{
    AlwaysRetry, MockAsyncClient, MockClient, MockReply, MockRequest, MockResponse,
    MockTransportError, RecordingTemplate,
};
