//! Retry with exponential backoff, as a request template.
//!
//! [`RetryTemplate`] inspects transport errors (and optionally responses) and
//! answers with `Sleep(delay, Retry(request))`, which restarts the lifecycle
//! after the backoff delay. Once the policy is exhausted it returns
//! `Continue`, so the last response or transport error surfaces through the
//! default mapping.
//!
//! Retry bookkeeping lives in the execution's context, not in the template:
//! one template instance shared by many concurrent executions gives each of
//! them its full retry budget.
//!
//! # Example
//!
//! ```rust
//! use courier_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
//! ```

use courier_core::{
    ExecutionContext, RequestTemplate, ResponseStatus, Transition, TransitionFor, Transport,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (sends after the first one)
    pub max_retries: usize,
    /// Delay before the first retry; zero retries immediately
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `0.5..=1.0`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: false,
        }
    }

    /// A policy retrying `max_retries` times without any delay.
    #[must_use]
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Calculate delay for a given retry number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ retry`, capped
    /// at `max_delay`, then scaled by the jitter factor when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        use rand::Rng;

        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_secs
        };

        Duration::try_from_secs_f64(final_secs).unwrap_or(self.max_delay)
    }
}

/// A source of retry delays.
///
/// `delay(n)` is the pause before retry `n` (0-indexed). `None` means the
/// sequence is exhausted and the template stops retrying, even if
/// `max_retries` would allow more. Implementations are shared by every
/// execution; the retry number is tracked per execution by the template.
///
/// Implemented by [`RetryPolicy`] (unbounded exponential backoff), by
/// [`DelaySequence`] (a finite list) and by any
/// `Fn(usize) -> Option<Duration>` closure.
pub trait Backoff: Send + Sync {
    /// Delay before retry `retry`, if any is left.
    fn delay(&self, retry: usize) -> Option<Duration>;
}

impl Backoff for RetryPolicy {
    fn delay(&self, retry: usize) -> Option<Duration> {
        Some(self.delay_for_attempt(retry))
    }
}

impl<F> Backoff for F
where
    F: Fn(usize) -> Option<Duration> + Send + Sync,
{
    fn delay(&self, retry: usize) -> Option<Duration> {
        self(retry)
    }
}

/// A finite list of delays, one per retry.
///
/// ```rust
/// use courier_runtime::retry::{Backoff, DelaySequence};
/// use std::time::Duration;
///
/// let backoff = DelaySequence::new([Duration::from_millis(10), Duration::from_millis(50)]);
/// assert_eq!(backoff.delay(1), Some(Duration::from_millis(50)));
/// assert_eq!(backoff.delay(2), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelaySequence {
    delays: Vec<Duration>,
}

impl DelaySequence {
    /// Retry once per delay, in order.
    #[must_use]
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// A single retry after `delay`.
    #[must_use]
    pub fn once(delay: Duration) -> Self {
        Self::new([delay])
    }

    /// Number of retries the sequence allows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    /// Whether the sequence allows no retry at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Backoff for DelaySequence {
    fn delay(&self, retry: usize) -> Option<Duration> {
        self.delays.get(retry).copied()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Randomize delays to spread out retries of concurrent requests.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter,
        }
    }
}

type Predicate<X> = Arc<dyn Fn(&X) -> bool + Send + Sync>;

#[derive(Default)]
struct RetryState {
    retries: usize,
}

/// Retries failed sends with backoff.
///
/// By default retries every transport error and no response. Use
/// [`RetryTemplate::when_error`] and [`RetryTemplate::when_response`] (or the
/// status helpers) to choose what is retryable.
///
/// # Example
///
/// ```rust
/// use courier_core::{Client, TemplateChain};
/// use courier_runtime::retry::{RetryPolicy, RetryTemplate};
///
/// struct Echo;
/// impl Client for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
///     fn send(&self, request: &String) -> Result<String, std::io::Error> {
///         Ok(request.clone())
///     }
/// }
///
/// let retry = RetryTemplate::<Echo>::new(RetryPolicy::immediate(2))
///     .when_error(|error: &std::io::Error| error.kind() == std::io::ErrorKind::TimedOut);
/// let chain: TemplateChain<Echo, String> = TemplateChain::new().with(retry);
/// assert_eq!(chain.len(), 1);
/// ```
pub struct RetryTemplate<C: Transport> {
    policy: RetryPolicy,
    backoff: Option<Arc<dyn Backoff>>,
    on_error: Predicate<C::Error>,
    on_response: Option<Predicate<C::Response>>,
    stop_after: Option<Duration>,
}

impl<C: Transport> RetryTemplate<C> {
    /// Retry every transport error according to `policy`.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            backoff: None,
            on_error: Arc::new(|_: &C::Error| true),
            on_response: None,
            stop_after: None,
        }
    }

    /// Retry every transport error up to `max_retries` times with the default
    /// backoff.
    #[must_use]
    pub fn on_transport_error(max_retries: usize) -> Self {
        Self::new(RetryPolicy::builder().max_retries(max_retries).build())
    }

    /// Retry only transport errors matching `predicate`.
    #[must_use]
    pub fn when_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C::Error) -> bool + Send + Sync + 'static,
    {
        self.on_error = Arc::new(predicate);
        self
    }

    /// Also retry responses matching `predicate`.
    #[must_use]
    pub fn when_response<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C::Response) -> bool + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(predicate));
        self
    }

    /// Also retry responses whose status is one of `statuses`.
    #[must_use]
    pub fn when_status(self, statuses: impl IntoIterator<Item = u16>) -> Self
    where
        C::Response: ResponseStatus,
    {
        let statuses: Vec<u16> = statuses.into_iter().collect();
        self.when_response(move |response: &C::Response| statuses.contains(&response.status()))
    }

    /// Also retry 5xx responses.
    #[must_use]
    pub fn when_status_5xx(self) -> Self
    where
        C::Response: ResponseStatus,
    {
        self.when_response(|response: &C::Response| response.is_server_error())
    }

    /// Override the maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Take delays from `backoff` instead of the policy's exponential curve.
    ///
    /// `max_retries` still bounds the number of retries; a finite backoff can
    /// stop earlier.
    #[must_use]
    pub fn with_backoff<B>(mut self, backoff: B) -> Self
    where
        B: Backoff + 'static,
    {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Stop retrying once the execution has run for `limit`.
    #[must_use]
    pub const fn stop_after(mut self, limit: Duration) -> Self {
        self.stop_after = Some(limit);
        self
    }

    /// The backoff policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn schedule<T>(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        reason: &'static str,
    ) -> TransitionFor<C, T>
    where
        C::Request: Clone,
    {
        let retries = context.scoped_state::<RetryState, _>(self).retries;

        if retries >= self.policy.max_retries {
            tracing::warn!(
                execution_id = %context.id(),
                retries,
                reason,
                "Retries exhausted"
            );
            return Transition::Continue;
        }

        if let Some(limit) = self.stop_after {
            if context.elapsed() >= limit {
                tracing::warn!(
                    execution_id = %context.id(),
                    retries,
                    limit_ms = limit.as_millis(),
                    reason,
                    "Retry window elapsed"
                );
                return Transition::Continue;
            }
        }

        let delay = match &self.backoff {
            Some(backoff) => backoff.delay(retries),
            None => self.policy.delay(retries),
        };
        let Some(delay) = delay else {
            tracing::warn!(
                execution_id = %context.id(),
                retries,
                reason,
                "Backoff exhausted"
            );
            return Transition::Continue;
        };
        context.scoped_state::<RetryState, _>(self).retries = retries + 1;

        tracing::warn!(
            execution_id = %context.id(),
            retry = retries + 1,
            delay_ms = delay.as_millis(),
            reason,
            "Request failed, retrying..."
        );

        let retry = Transition::retry(request.clone());
        if delay.is_zero() {
            retry
        } else {
            Transition::sleep(delay, retry)
        }
    }
}

impl<C: Transport> Clone for RetryTemplate<C> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            backoff: self.backoff.clone(),
            on_error: Arc::clone(&self.on_error),
            on_response: self.on_response.clone(),
            stop_after: self.stop_after,
        }
    }
}

impl<C: Transport> fmt::Debug for RetryTemplate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTemplate")
            .field("policy", &self.policy)
            .field("custom_backoff", &self.backoff.is_some())
            .field("retries_responses", &self.on_response.is_some())
            .field("stop_after", &self.stop_after)
            .finish_non_exhaustive()
    }
}

impl<C, T> RequestTemplate<C, T> for RetryTemplate<C>
where
    C: Transport,
    C::Request: Clone,
{
    fn after_response(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        response: &C::Response,
    ) -> TransitionFor<C, T> {
        match &self.on_response {
            Some(retryable) if retryable(response) => {
                self.schedule(context, request, "retryable response")
            },
            _ => Transition::Continue,
        }
    }

    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        error: &C::Error,
    ) -> TransitionFor<C, T> {
        if (self.on_error)(error) {
            self.schedule(context, request, "transport error")
        } else {
            tracing::debug!(
                execution_id = %context.id(),
                "Error is not retryable, failing immediately"
            );
            Transition::Continue
        }
    }
}
