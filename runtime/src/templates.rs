//! Bundled request templates.
//!
//! - [`AttemptLimit`]: bound the number of sends of one execution
//! - [`Deadline`]: bound the total time of one execution
//! - [`ResponseHandler`] / [`ErrorHandler`]: map responses and transport
//!   errors to caller-visible values, optionally through several
//!   [`then`](ResponseHandler::then) stages
//!
//! Retry lives in [`crate::retry`].

use crate::error::PolicyError;
use courier_core::{
    BoxError, ExecutionContext, RequestTemplate, Transition, TransitionFor, Transport,
};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Fails the execution before a send once `max_attempts` sends were made.
///
/// Place it in front of unbounded retry templates to guarantee termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimit {
    max_attempts: usize,
}

impl AttemptLimit {
    /// Allow at most `max_attempts` sends.
    #[must_use]
    pub const fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// The configured limit.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl<C: Transport, T> RequestTemplate<C, T> for AttemptLimit {
    fn before_request(
        &self,
        context: &mut ExecutionContext,
        _request: &C::Request,
    ) -> TransitionFor<C, T> {
        let attempts = context.attempts();
        if attempts >= self.max_attempts {
            tracing::warn!(
                execution_id = %context.id(),
                attempts,
                max_attempts = self.max_attempts,
                "Attempt limit reached"
            );
            Transition::fail(PolicyError::AttemptLimitExceeded { attempts })
        } else {
            Transition::Continue
        }
    }
}

/// Bounds the total duration of an execution.
///
/// - Before each send, and after a response: fails once the budget is spent.
/// - After a transport error: fails once the budget is spent. If less than
///   the configured reserve is left, no retry can fit, so it sleeps out the
///   rest of the budget and then fails.
///
/// Put it before retry templates so it sees transport errors first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    budget: Duration,
    reserve: Duration,
}

impl Deadline {
    /// Allow the execution to run for `budget`.
    #[must_use]
    pub const fn new(budget: Duration) -> Self {
        Self {
            budget,
            reserve: Duration::ZERO,
        }
    }

    /// Minimum time a retry needs; with less left the execution gives up.
    #[must_use]
    pub const fn with_reserve(mut self, reserve: Duration) -> Self {
        self.reserve = reserve;
        self
    }

    /// The configured budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    fn exceeded<C: Transport, T>(&self, context: &ExecutionContext) -> TransitionFor<C, T> {
        let elapsed = context.elapsed();
        tracing::warn!(
            execution_id = %context.id(),
            elapsed_ms = elapsed.as_millis(),
            limit_ms = self.budget.as_millis(),
            "Deadline exceeded"
        );
        Transition::fail(PolicyError::deadline_exceeded(elapsed, self.budget))
    }
}

impl<C: Transport, T> RequestTemplate<C, T> for Deadline {
    fn before_request(
        &self,
        context: &mut ExecutionContext,
        _request: &C::Request,
    ) -> TransitionFor<C, T> {
        if context.elapsed() >= self.budget {
            self.exceeded::<C, T>(context)
        } else {
            Transition::Continue
        }
    }

    fn after_response(
        &self,
        context: &mut ExecutionContext,
        _request: &C::Request,
        _response: &C::Response,
    ) -> TransitionFor<C, T> {
        if context.elapsed() >= self.budget {
            self.exceeded::<C, T>(context)
        } else {
            Transition::Continue
        }
    }

    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        _request: &C::Request,
        _error: &C::Error,
    ) -> TransitionFor<C, T> {
        let elapsed = context.elapsed();
        if elapsed >= self.budget {
            return self.exceeded::<C, T>(context);
        }

        let remaining = self.budget - elapsed;
        if remaining < self.reserve {
            tracing::debug!(
                execution_id = %context.id(),
                remaining_ms = remaining.as_millis(),
                "No time left for a retry, waiting out the deadline"
            );
            return Transition::sleep(
                remaining,
                Transition::fail(PolicyError::deadline_exceeded(self.budget, self.budget)),
            );
        }

        Transition::Continue
    }
}

/// A fallible mapping from a borrowed `In` to `Out`.
///
/// Implemented by every `Fn(&In) -> Result<Out, BoxError>` closure and by
/// [`Then`] pipelines built with [`ResponseHandler::then`] or
/// [`ErrorHandler::then`].
pub trait Handler<In, Out>: Send + Sync {
    /// Map `input`.
    ///
    /// # Errors
    ///
    /// Whatever the mapping rejects; the execution fails with it as a user
    /// error.
    fn handle(&self, input: &In) -> Result<Out, BoxError>;
}

impl<In, Out, F> Handler<In, Out> for F
where
    F: Fn(&In) -> Result<Out, BoxError> + Send + Sync,
{
    fn handle(&self, input: &In) -> Result<Out, BoxError> {
        self(input)
    }
}

/// A handler whose output is fed into `next`.
///
/// The first error stops the pipeline.
pub struct Then<H, G, Mid> {
    first: H,
    next: G,
    _mid: PhantomData<fn() -> Mid>,
}

impl<In, Mid, Out, H, G> Handler<In, Out> for Then<H, G, Mid>
where
    H: Handler<In, Mid>,
    G: Fn(Mid) -> Result<Out, BoxError> + Send + Sync,
{
    fn handle(&self, input: &In) -> Result<Out, BoxError> {
        (self.next)(self.first.handle(input)?)
    }
}

impl<H, G, Mid> fmt::Debug for Then<H, G, Mid> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Then").finish_non_exhaustive()
    }
}

/// Maps every response to the execution's value.
///
/// Returning `Err` fails the execution with a user error. Stages added with
/// [`then`](Self::then) each receive the previous stage's output, and only
/// the last one decides the finished value.
///
/// # Example
///
/// ```rust
/// use courier_core::BoxError;
/// use courier_runtime::templates::ResponseHandler;
///
/// // For a client whose responses are strings, parse them as numbers,
/// // then reject zero.
/// let parse = ResponseHandler::new(|body: &String| -> Result<u64, BoxError> {
///     Ok(body.trim().parse::<u64>()?)
/// })
/// .then(|n: u64| -> Result<u64, BoxError> {
///     if n == 0 { Err("zero".into()) } else { Ok(n) }
/// });
/// # let _ = parse;
/// ```
pub struct ResponseHandler<H> {
    handler: H,
}

impl<H> ResponseHandler<H> {
    /// Wrap `handler`.
    #[must_use]
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Feed this handler's output into `next`.
    #[must_use]
    pub fn then<Mid, Out, G>(self, next: G) -> ResponseHandler<Then<H, G, Mid>>
    where
        G: Fn(Mid) -> Result<Out, BoxError> + Send + Sync,
    {
        ResponseHandler {
            handler: Then {
                first: self.handler,
                next,
                _mid: PhantomData,
            },
        }
    }
}

impl<H> fmt::Debug for ResponseHandler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler").finish_non_exhaustive()
    }
}

impl<C, T, H> RequestTemplate<C, T> for ResponseHandler<H>
where
    C: Transport,
    H: Handler<C::Response, T>,
{
    fn after_response(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        response: &C::Response,
    ) -> TransitionFor<C, T> {
        match self.handler.handle(response) {
            Ok(value) => Transition::finish(value),
            Err(error) => Transition::fail(error),
        }
    }
}

/// Maps transport errors.
///
/// `Ok` recovers with a value, `Err` replaces the transport error with an
/// application error.
pub struct ErrorHandler<H> {
    handler: H,
}

impl<H> ErrorHandler<H> {
    /// Wrap `handler`.
    #[must_use]
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Feed a recovered value into `next`.
    #[must_use]
    pub fn then<Mid, Out, G>(self, next: G) -> ErrorHandler<Then<H, G, Mid>>
    where
        G: Fn(Mid) -> Result<Out, BoxError> + Send + Sync,
    {
        ErrorHandler {
            handler: Then {
                first: self.handler,
                next,
                _mid: PhantomData,
            },
        }
    }
}

impl<H> fmt::Debug for ErrorHandler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler").finish_non_exhaustive()
    }
}

impl<C, T, H> RequestTemplate<C, T> for ErrorHandler<H>
where
    C: Transport,
    H: Handler<C::Error, T>,
{
    fn after_exception(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        error: &C::Error,
    ) -> TransitionFor<C, T> {
        match self.handler.handle(error) {
            Ok(value) => Transition::finish(value),
            Err(error) => Transition::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockingStrategy;
    use crate::strategy::IoStrategy;
    use courier_core::{ErrorCode, ExecutionResult, RequestExecution, TemplateChain};
    use courier_testing::{
        AlwaysRetry, MockClient, MockReply, MockRequest, MockResponse, MockTransportError,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Status(u16);

    impl From<MockResponse> for Status {
        fn from(response: MockResponse) -> Self {
            Self(response.status)
        }
    }

    fn run<T>(
        client: MockClient,
        chain: TemplateChain<MockClient, T>,
    ) -> (Arc<MockClient>, ExecutionResult<MockClient, T>)
    where
        T: From<MockResponse> + Send + 'static,
    {
        let client = Arc::new(client);
        let execution = RequestExecution::start(
            Arc::clone(&client),
            Arc::new(chain),
            MockRequest::get("http://svc/"),
        );
        let result = BlockingStrategy.drive(execution);
        (client, result)
    }

    fn policy_error<T>(result: &ExecutionResult<MockClient, T>) -> Option<&PolicyError> {
        result.as_ref().err().and_then(|e| e.user_error::<PolicyError>())
    }

    #[test]
    fn attempt_limit_stops_unbounded_retry() {
        let chain = TemplateChain::new()
            .with(AttemptLimit::new(2))
            .with(AlwaysRetry);
        let (client, result) = run::<MockResponse>(MockClient::always_failing("refused"), chain);

        assert_eq!(client.send_count(), 2);
        assert_eq!(
            policy_error(&result),
            Some(&PolicyError::AttemptLimitExceeded { attempts: 2 })
        );
    }

    #[test]
    fn attempt_limit_of_zero_never_sends() {
        let chain = TemplateChain::new().with(AttemptLimit::new(0));
        let (client, result) = run::<MockResponse>(MockClient::always_ok(json!(null)), chain);

        assert_eq!(client.send_count(), 0);
        assert_eq!(result.err().map(|e| e.code()), Some(ErrorCode::User));
    }

    #[test]
    fn spent_deadline_fails_before_sending() {
        let chain = TemplateChain::new().with(Deadline::new(Duration::ZERO));
        let (client, result) = run::<MockResponse>(MockClient::always_ok(json!(null)), chain);

        assert_eq!(client.send_count(), 0);
        assert!(matches!(
            policy_error(&result),
            Some(PolicyError::DeadlineExceeded { limit_ms: 0, .. })
        ));
    }

    #[test]
    fn deadline_waits_out_budget_when_no_retry_fits() {
        let budget = Duration::from_millis(50);
        let chain = TemplateChain::new()
            .with(Deadline::new(budget).with_reserve(Duration::from_secs(5)))
            .with(AlwaysRetry);
        let started = Instant::now();
        let (client, result) = run::<MockResponse>(MockClient::always_failing("refused"), chain);

        assert!(started.elapsed() >= budget);
        assert_eq!(client.send_count(), 1);
        assert_eq!(
            policy_error(&result),
            Some(&PolicyError::DeadlineExceeded {
                elapsed_ms: 50,
                limit_ms: 50
            })
        );
    }

    #[test]
    fn deadline_lets_retries_through_while_time_is_left() {
        let chain = TemplateChain::new()
            .with(Deadline::new(Duration::from_secs(10)))
            .with(AttemptLimit::new(3))
            .with(AlwaysRetry);
        let client = MockClient::with_sequence([MockReply::fail("reset"), MockReply::ok(json!(1))]);
        let (client, result) = run::<MockResponse>(client, chain);

        assert_eq!(client.send_count(), 2);
        assert_eq!(result.ok().map(|r| r.body), Some(json!(1)));
    }

    #[test]
    fn deadline_rejects_a_response_that_arrives_late() {
        let chain = TemplateChain::new()
            .with(Deadline::new(Duration::from_millis(10)))
            .with(crate::retry::RetryTemplate::<MockClient>::on_transport_error(3).when_status_5xx());
        let client = MockClient::always_ok(json!(null)).with_latency(Duration::from_millis(30));
        let (client, result) = run::<MockResponse>(client, chain);

        assert_eq!(client.send_count(), 1);
        assert!(matches!(
            policy_error(&result),
            Some(PolicyError::DeadlineExceeded { limit_ms: 10, .. })
        ));
    }

    #[test]
    fn deadline_passes_timely_responses_through() {
        let chain = TemplateChain::new().with(Deadline::new(Duration::from_secs(10)));
        let (_, result) = run::<MockResponse>(MockClient::always_ok(json!(3)), chain);
        assert_eq!(result.ok().map(|r| r.body), Some(json!(3)));
    }

    #[test]
    fn stacked_response_handlers_feed_each_other() {
        let handler = ResponseHandler::new(|response: &MockResponse| -> Result<u16, BoxError> {
            Ok(response.status)
        })
        .then(|status: u16| -> Result<u16, BoxError> { Ok(status + 1) })
        .then(|status: u16| -> Result<Status, BoxError> { Ok(Status(status * 2)) });

        let (_, result) = run::<Status>(
            MockClient::new(MockReply::status(200, json!(null))),
            TemplateChain::new().with(handler),
        );
        assert_eq!(result.ok(), Some(Status(402)));
    }

    #[test]
    fn failing_stage_stops_the_pipeline() {
        let later = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&later);
        let handler = ResponseHandler::new(|response: &MockResponse| -> Result<u16, BoxError> {
            if response.status == 200 { Ok(response.status) } else { Err("not ok".into()) }
        })
        .then(move |status: u16| -> Result<Status, BoxError> {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Status(status))
        });

        let (_, result) = run::<Status>(
            MockClient::new(MockReply::status(500, json!(null))),
            TemplateChain::new().with(handler),
        );
        assert_eq!(result.err().map(|e| e.to_string()).as_deref(), Some("not ok"));
        assert_eq!(later.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn error_handler_stages_refine_recovered_values() {
        let recover = ErrorHandler::new(|error: &MockTransportError| -> Result<usize, BoxError> {
            Ok(error.attempt)
        })
        .then(|attempt: usize| -> Result<Status, BoxError> {
            Ok(Status(u16::try_from(attempt)?))
        });
        let (_, result) = run::<Status>(
            MockClient::always_failing("refused"),
            TemplateChain::new().with(recover),
        );
        assert_eq!(result.ok(), Some(Status(1)));
    }

    #[test]
    fn response_handler_maps_and_rejects() {
        let handler = || {
            ResponseHandler::new(|response: &MockResponse| -> Result<Status, BoxError> {
                if response.status >= 500 {
                    Err(format!("server answered {}", response.status).into())
                } else {
                    Ok(Status(response.status))
                }
            })
        };

        let (_, result) = run::<Status>(
            MockClient::new(MockReply::status(204, json!(null))),
            TemplateChain::new().with(handler()),
        );
        assert_eq!(result.ok(), Some(Status(204)));

        let (_, result) = run::<Status>(
            MockClient::new(MockReply::status(503, json!(null))),
            TemplateChain::new().with(handler()),
        );
        let error = result.err().map(|e| e.to_string());
        assert_eq!(error.as_deref(), Some("server answered 503"));
    }

    #[test]
    fn error_handler_recovers_transport_errors() {
        let recover = ErrorHandler::new(|error: &MockTransportError| -> Result<Status, BoxError> {
            if error.message == "not found" {
                Ok(Status(404))
            } else {
                Err("unrecoverable".into())
            }
        });
        let (_, result) = run::<Status>(
            MockClient::always_failing("not found"),
            TemplateChain::new().with(recover),
        );
        assert_eq!(result.ok(), Some(Status(404)));
    }

    #[test]
    fn error_handler_leaves_responses_alone() {
        let recover = ErrorHandler::new(|_: &MockTransportError| -> Result<Status, BoxError> {
            Ok(Status(0))
        });
        let (_, result) = run::<Status>(
            MockClient::always_ok(json!(null)),
            TemplateChain::new().with(recover),
        );
        assert_eq!(result.ok(), Some(Status(200)));
    }
}
