//! Scriptable clients and passive templates for tests.
//!
//! - [`MockClient`]: replies from a script, records every request it sees
//! - [`MockAsyncClient`]: the same script behind an [`AsyncClient`], with a
//!   timer-based latency and an in-flight gauge
//! - [`MockRequest`] / [`MockResponse`] / [`MockTransportError`]: a small
//!   HTTP-shaped vocabulary for the mock client
//! - [`RecordingTemplate`]: observes hook calls without intervening
//! - [`AlwaysRetry`]: retries every transport error, forever

use courier_core::{
    AsyncClient, Client, ExecutionContext, Hook, RequestTemplate, ResponseStatus, Transition,
    TransitionFor, Transport,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking assertion elsewhere must not hide what was recorded
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fully bound outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRequest {
    /// HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Header map
    pub headers: BTreeMap<String, String>,
    /// JSON body
    pub body: Option<Value>,
    /// Transport timeout
    pub timeout: Option<Duration>,
}

impl MockRequest {
    /// A request with no headers, body or timeout.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// A `POST` request with a JSON body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new("POST", url).with_body(body)
    }

    /// Set a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response with a status and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    /// Status code
    pub status: u16,
    /// JSON body
    pub body: Value,
}

impl MockResponse {
    /// A `200` response.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// A response with an arbitrary status.
    #[must_use]
    pub const fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

impl ResponseStatus for MockResponse {
    fn status(&self) -> u16 {
        self.status
    }
}

/// A transport failure produced by [`MockClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mock transport error on send {attempt}: {message}")]
pub struct MockTransportError {
    /// 1-based number of the send that failed
    pub attempt: usize,
    /// Scripted message
    pub message: String,
}

/// One scripted reply of a [`MockClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this response.
    Respond(MockResponse),
    /// Fail with a transport error carrying this message.
    Fail(String),
}

impl MockReply {
    /// A `200` response with `body`.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self::Respond(MockResponse::ok(body))
    }

    /// A response with `status` and `body`.
    #[must_use]
    pub const fn status(status: u16, body: Value) -> Self {
        Self::Respond(MockResponse::with_status(status, body))
    }

    /// A transport error.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// A [`Client`] replying from a script.
///
/// Scripted replies are consumed in order; once the script is empty every
/// send gets the fallback reply. Every request is recorded, so tests can
/// assert on what was sent and how often.
///
/// # Example
///
/// ```
/// use courier_core::Client;
/// use courier_testing::{MockClient, MockReply, MockRequest};
/// use serde_json::json;
///
/// let client = MockClient::always_ok(json!({"id": 7}))
///     .then(MockReply::fail("connection reset"));
///
/// assert!(client.send(&MockRequest::get("http://svc/users/7")).is_err());
/// assert!(client.send(&MockRequest::get("http://svc/users/7")).is_ok());
/// assert_eq!(client.send_count(), 2);
/// ```
#[derive(Debug)]
pub struct MockClient {
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    history: Mutex<Vec<MockRequest>>,
    latency: Duration,
}

impl MockClient {
    /// A client that answers every send with `fallback`.
    #[must_use]
    pub fn new(fallback: MockReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            history: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Every send succeeds with a `200` and `body`.
    #[must_use]
    pub fn always_ok(body: Value) -> Self {
        Self::new(MockReply::ok(body))
    }

    /// Every send fails with `message`.
    #[must_use]
    pub fn always_failing(message: impl Into<String>) -> Self {
        Self::new(MockReply::fail(message))
    }

    /// Reply with `replies` in order, then keep repeating the last one.
    #[must_use]
    pub fn with_sequence(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let mut script: VecDeque<MockReply> = replies.into_iter().collect();
        let fallback = script
            .pop_back()
            .unwrap_or_else(|| MockReply::fail("mock script is empty"));
        Self {
            script: Mutex::new(script),
            ..Self::new(fallback)
        }
    }

    /// Queue `reply` after the already scripted ones.
    #[must_use]
    pub fn then(self, reply: MockReply) -> Self {
        lock(&self.script).push_back(reply);
        self
    }

    /// Block every send for `latency` before replying.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn history(&self) -> Vec<MockRequest> {
        lock(&self.history).clone()
    }

    /// Number of sends so far.
    #[must_use]
    pub fn send_count(&self) -> usize {
        lock(&self.history).len()
    }
}

impl Client for MockClient {
    type Request = MockRequest;
    type Response = MockResponse;
    type Error = MockTransportError;

    fn send(&self, request: &MockRequest) -> Result<MockResponse, MockTransportError> {
        let attempt = {
            let mut history = lock(&self.history);
            history.push(request.clone());
            history.len()
        };

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let reply = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        tracing::trace!(attempt, url = %request.url, ?reply, "Mock client replying");

        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(message) => Err(MockTransportError { attempt, message }),
        }
    }
}

/// An [`AsyncClient`] replying from a [`MockClient`] script.
///
/// Latency is a `tokio::time::sleep`, so sends must be polled inside a tokio
/// runtime and never hold a thread while they wait. A request is recorded
/// in the history once its latency has elapsed; a send dropped before that
/// is never recorded.
///
/// # Example
///
/// ```
/// use courier_core::AsyncClient;
/// use courier_testing::{MockAsyncClient, MockClient, MockRequest};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = MockAsyncClient::new(MockClient::always_ok(json!("pong")));
/// let reply = client.send(&MockRequest::get("http://svc/ping")).await;
/// assert_eq!(reply.map(|r| r.body).ok(), Some(json!("pong")));
/// assert_eq!(client.peak_in_flight(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct MockAsyncClient {
    replies: Arc<MockClient>,
    latency: Duration,
    in_flight: Arc<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockAsyncClient {
    /// Reply from `replies`' script. Its own latency, if any, still blocks.
    #[must_use]
    pub fn new(replies: MockClient) -> Self {
        Self {
            replies: Arc::new(replies),
            latency: Duration::ZERO,
            in_flight: Arc::default(),
        }
    }

    /// Suspend every send for `latency` before replying.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request answered so far, in order.
    #[must_use]
    pub fn history(&self) -> Vec<MockRequest> {
        self.replies.history()
    }

    /// Number of requests answered so far.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.replies.send_count()
    }

    /// Sends currently waiting on their latency.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.current.load(Ordering::SeqCst)
    }

    /// Highest number of sends that were in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }
}

impl Transport for MockAsyncClient {
    type Request = MockRequest;
    type Response = MockResponse;
    type Error = MockTransportError;
}

impl AsyncClient for MockAsyncClient {
    fn send(
        &self,
        request: &MockRequest,
    ) -> BoxFuture<'static, Result<MockResponse, MockTransportError>> {
        let replies = Arc::clone(&self.replies);
        let in_flight = Arc::clone(&self.in_flight);
        let latency = self.latency;
        let request = request.clone();
        async move {
            let _guard = in_flight.enter();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Client::send(replies.as_ref(), &request)
        }
        .boxed()
    }
}

/// A passive template that records every hook call it sees.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTemplate {
    calls: Arc<Mutex<Vec<Hook>>>,
}

impl RecordingTemplate {
    /// A template with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Hook> {
        lock(&self.calls).clone()
    }

    fn record(&self, hook: Hook) {
        lock(&self.calls).push(hook);
    }
}

impl<C: Transport, T> RequestTemplate<C, T> for RecordingTemplate {
    fn before_request(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
    ) -> TransitionFor<C, T> {
        self.record(Hook::BeforeRequest);
        Transition::Continue
    }

    fn after_response(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        _response: &C::Response,
    ) -> TransitionFor<C, T> {
        self.record(Hook::AfterResponse);
        Transition::Continue
    }

    fn after_exception(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        _error: &C::Error,
    ) -> TransitionFor<C, T> {
        self.record(Hook::AfterException);
        Transition::Continue
    }
}

/// Retries every transport error immediately with the same request.
///
/// Unbounded on its own; pair it with an attempt limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<C, T> RequestTemplate<C, T> for AlwaysRetry
where
    C: Transport,
    C::Request: Clone,
{
    fn after_exception(
        &self,
        _context: &mut ExecutionContext,
        request: &C::Request,
        _error: &C::Error,
    ) -> TransitionFor<C, T> {
        Transition::retry(request.clone())
    }
}
