//! The execution driver for one request lifecycle.
//!
//! A [`RequestExecution`] owns the active [`RequestState`] and applies the
//! template chain at the right points. It never performs I/O itself: each call
//! to [`RequestExecution::step`] performs at most one state transition and may
//! hand back a suspension point ([`Step::Send`] or [`Step::Sleep`]) that the
//! caller (an I/O strategy) must perform before resuming the execution with
//! [`RequestExecution::complete`] or [`RequestExecution::wake`].
//!
//! # Example
//!
//! A minimal blocking driver:
//!
//! ```
//! use courier_core::{Client, RequestExecution, Step, TemplateChain};
//! use std::sync::Arc;
//!
//! struct Echo;
//! impl Client for Echo {
//!     type Request = String;
//!     type Response = String;
//!     type Error = std::io::Error;
//!     fn send(&self, request: &String) -> Result<String, std::io::Error> {
//!         Ok(request.to_uppercase())
//!     }
//! }
//!
//! let mut execution: RequestExecution<Echo> =
//!     RequestExecution::start(Arc::new(Echo), Arc::new(TemplateChain::new()), "hi".into());
//! loop {
//!     match execution.step() {
//!         Step::Advanced => {},
//!         Step::Send(invocation) => execution.complete(invocation.invoke()),
//!         Step::Sleep(duration) => {
//!             std::thread::sleep(duration);
//!             execution.wake();
//!         },
//!         Step::Done => break,
//!     }
//! }
//! assert_eq!(execution.into_result().ok(), Some("HI".to_string()));
//! ```

use crate::chain::TemplateChain;
use crate::client::{AsyncClient, Client, Transport};
use futures::FutureExt;
use futures::future::BoxFuture;
use crate::context::{ExecutionContext, ExecutionId};
use crate::error::{IllegalStateTransition, Operation, RequestError, StateName};
use crate::state::RequestState;
use crate::template::RequestTemplate;
use crate::transition::{Transition, TransitionFor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Final outcome of an execution of client `C` producing `T`.
pub type ExecutionResult<C, T> = Result<T, RequestError<<C as Transport>::Error>>;

type StateOf<C, T> = RequestState<
    <C as Transport>::Request,
    <C as Transport>::Response,
    T,
    <C as Transport>::Error,
>;

/// A pending call to the client.
///
/// Owns the request while it is in flight; [`Invocation::invoke`] hands it
/// back inside the [`Completion`].
pub struct Invocation<C: Transport> {
    client: Arc<C>,
    request: C::Request,
    attempt: usize,
}

impl<C: Transport> Invocation<C> {
    /// The request about to be sent.
    pub const fn request(&self) -> &C::Request {
        &self.request
    }

    /// 1-based send attempt number within the execution.
    #[must_use]
    pub const fn attempt(&self) -> usize {
        self.attempt
    }
}

impl<C: Client> Invocation<C> {
    /// Call the client. Blocks for as long as the client does.
    #[must_use]
    pub fn invoke(self) -> Completion<C> {
        let outcome = self.client.send(&self.request);
        Completion {
            request: self.request,
            outcome,
        }
    }
}

impl<C> Invocation<C>
where
    C: AsyncClient + 'static,
    C::Request: Send + 'static,
    C::Response: Send + 'static,
    C::Error: Send + 'static,
{
    /// Call the async client. Nothing is sent until the future is polled.
    pub fn invoke_async(self) -> BoxFuture<'static, Completion<C>> {
        let Self {
            client, request, ..
        } = self;
        async move {
            let pending = AsyncClient::send(client.as_ref(), &request);
            let outcome = pending.await;
            Completion { request, outcome }
        }
        .boxed()
    }
}

impl<C: Transport> fmt::Debug for Invocation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// The result of an [`Invocation`], fed back through
/// [`RequestExecution::complete`].
pub struct Completion<C: Transport> {
    request: C::Request,
    outcome: Result<C::Response, C::Error>,
}

impl<C: Transport> Completion<C> {
    /// Pair a request with what the client returned for it.
    pub const fn new(request: C::Request, outcome: Result<C::Response, C::Error>) -> Self {
        Self { request, outcome }
    }

    /// What the client returned.
    pub const fn outcome(&self) -> &Result<C::Response, C::Error> {
        &self.outcome
    }

    /// Whether the client returned a response.
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What the driver must do after a call to [`RequestExecution::step`].
pub enum Step<C: Transport> {
    /// A transition happened; call `step` again.
    Advanced,
    /// Perform the invocation, then call [`RequestExecution::complete`].
    Send(Invocation<C>),
    /// Pause for the duration, then call [`RequestExecution::wake`].
    Sleep(Duration),
    /// The execution is terminal.
    Done,
}

impl<C: Transport> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advanced => write!(f, "Step::Advanced"),
            Self::Send(invocation) => f.debug_tuple("Step::Send").field(invocation).finish(),
            Self::Sleep(duration) => f.debug_tuple("Step::Sleep").field(duration).finish(),
            Self::Done => write!(f, "Step::Done"),
        }
    }
}

/// The live driver of one request's lifecycle.
///
/// Holds the active state, the shared template chain and the shared client.
/// Exactly one state is active at a time and every execution ends in exactly
/// one terminal state.
///
/// # Type Parameters
///
/// - `C`: the client
/// - `T`: the caller-visible success value; an all-`Continue` chain finishes
///   with `T::from(response)`
pub struct RequestExecution<C: Transport, T = <C as Transport>::Response> {
    client: Arc<C>,
    templates: Arc<TemplateChain<C, T>>,
    context: ExecutionContext,
    // `None` only while a step is in progress
    state: Option<StateOf<C, T>>,
}

impl<C, T> RequestExecution<C, T>
where
    C: Transport,
    T: From<C::Response>,
{
    /// Seed the `Created` state for `request`.
    #[must_use]
    pub fn start(
        client: Arc<C>,
        templates: Arc<TemplateChain<C, T>>,
        request: C::Request,
    ) -> Self {
        let context = ExecutionContext::new(CancellationToken::new());
        tracing::debug!(execution_id = %context.id(), "Request execution started");
        Self {
            client,
            templates,
            context,
            state: Some(RequestState::created(request)),
        }
    }

    /// Observe `token` instead of the execution's own cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.context.set_cancellation(token);
        self
    }

    /// Identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> ExecutionId {
        self.context.id()
    }

    /// Lifecycle metadata shared with templates.
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// A handle that cancels this execution at its next suspension point.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancellation_token().clone()
    }

    /// Name of the active state.
    #[must_use]
    pub fn state(&self) -> StateName {
        self.state
            .as_ref()
            .map_or(StateName::Failed, RequestState::name)
    }

    /// Whether the execution reached `Finished` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Perform the next step of the lifecycle.
    ///
    /// Runs at most one hook stage and one state transition. Calling `step`
    /// while a send or sleep is outstanding is a protocol violation and fails
    /// the execution with [`RequestError::IllegalStateTransition`].
    pub fn step(&mut self) -> Step<C> {
        let Some(mut state) = self.state.take() else {
            return Step::Done;
        };

        if let Some(resume) = state.take_resume() {
            tracing::trace!(
                execution_id = %self.context.id(),
                transition = %resume.kind(),
                "Applying transition resumed after sleep"
            );
            return self.apply(state, resume);
        }

        if let Some(transition) = self.decide(&state) {
            return self.apply(state, transition);
        }

        let from = state.name();
        match from {
            StateName::Created => {
                let next = state.prepare();
                self.commit(from, next)
            },
            StateName::Sending => {
                self.abandon(IllegalStateTransition::new(Operation::Send, from))
            },
            StateName::Sleeping => {
                self.abandon(IllegalStateTransition::new(Operation::Sleep, from))
            },
            _ => {
                self.state = Some(state);
                Step::Done
            },
        }
    }

    /// Resume after a [`Step::Send`] with what the client returned.
    pub fn complete(&mut self, completion: Completion<C>) {
        let Some(state) = self.state.take() else {
            return;
        };
        let from = state.name();
        let Completion { request, outcome } = completion;
        let next = state.complete(request, outcome);
        self.commit(from, next);
    }

    /// Resume after a [`Step::Sleep`].
    ///
    /// A cancellation requested during the pause fails the execution instead
    /// of applying the pending transition.
    pub fn wake(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let from = state.name();
        match state.wake() {
            Ok(awake) if self.context.is_cancelled() => {
                self.cancelled(awake);
            },
            next => {
                self.commit(from, next);
            },
        }
    }

    /// Cancel now: any non-terminal state moves to `Failed(Cancelled)`.
    ///
    /// Drivers call this when cancellation interrupts an outstanding send or
    /// sleep.
    pub fn cancel(&mut self) {
        self.context.cancellation_token().cancel();
        if let Some(state) = self.state.take() {
            if state.is_terminal() {
                self.state = Some(state);
            } else {
                self.cancelled(state);
            }
        }
    }

    /// The terminal outcome.
    ///
    /// # Errors
    ///
    /// The `Failed` state's error; [`RequestError::IllegalStateTransition`]
    /// if the execution is not terminal yet.
    pub fn into_result(self) -> ExecutionResult<C, T> {
        match self.state {
            Some(RequestState::Finished { value }) => Ok(value),
            Some(RequestState::Failed { error }) => Err(error),
            Some(other) => Err(IllegalStateTransition::new(Operation::Finish, other.name()).into()),
            None => Err(RequestError::Cancelled),
        }
    }

    /// Run the hook stage for an awaiting state.
    fn decide(&mut self, state: &StateOf<C, T>) -> Option<TransitionFor<C, T>> {
        let templates: &TemplateChain<C, T> = &self.templates;
        match state {
            RequestState::AwaitingBeforeDecision { request, .. } => {
                self.context.record_cycle();
                Some(templates.before_request(&mut self.context, request))
            },
            RequestState::AwaitingAfterDecision {
                request,
                outcome: Ok(response),
                ..
            } => Some(templates.after_response(&mut self.context, request, response)),
            RequestState::AwaitingAfterDecision {
                request,
                outcome: Err(error),
                ..
            } => Some(templates.after_exception(&mut self.context, request, error)),
            _ => None,
        }
    }

    fn apply(&mut self, state: StateOf<C, T>, transition: TransitionFor<C, T>) -> Step<C> {
        let from = state.name();
        match transition {
            Transition::Continue if from == StateName::AwaitingAfterDecision => {
                let next = state.settle();
                self.commit(from, next)
            },
            Transition::Continue => self.enter_send(state),
            Transition::Retry(request) => {
                let next = state.retry(request);
                self.commit(from, next)
            },
            Transition::Sleep { duration, resume } => self.enter_sleep(state, duration, *resume),
            Transition::Finish(value) => {
                let next = state.finish(value);
                self.commit(from, next)
            },
            Transition::Fail(error) => {
                let next = state.fail(error);
                self.commit(from, next)
            },
        }
    }

    fn enter_send(&mut self, state: StateOf<C, T>) -> Step<C> {
        if self.context.is_cancelled() {
            return self.cancelled(state);
        }
        let from = state.name();
        let attempt = self.context.attempts() + 1;
        match state.send(attempt) {
            Ok((next, request)) => {
                self.context.record_attempt();
                self.transitioned(from, &next);
                self.state = Some(next);
                Step::Send(Invocation {
                    client: Arc::clone(&self.client),
                    request,
                    attempt,
                })
            },
            Err(illegal) => self.abandon(illegal),
        }
    }

    fn enter_sleep(
        &mut self,
        state: StateOf<C, T>,
        duration: Duration,
        resume: TransitionFor<C, T>,
    ) -> Step<C> {
        if self.context.is_cancelled() {
            return self.cancelled(state);
        }
        let from = state.name();
        match state.sleep(duration, resume) {
            Ok(next) => {
                self.transitioned(from, &next);
                self.state = Some(next);
                Step::Sleep(duration)
            },
            Err(illegal) => self.abandon(illegal),
        }
    }

    fn commit(
        &mut self,
        from: StateName,
        next: Result<StateOf<C, T>, IllegalStateTransition>,
    ) -> Step<C> {
        match next {
            Ok(next) => {
                self.transitioned(from, &next);
                let step = if next.is_terminal() {
                    Step::Done
                } else {
                    Step::Advanced
                };
                self.state = Some(next);
                step
            },
            Err(illegal) => self.abandon(illegal),
        }
    }

    fn cancelled(&mut self, state: StateOf<C, T>) -> Step<C> {
        tracing::warn!(
            execution_id = %self.context.id(),
            state = %state.name(),
            "Request execution cancelled"
        );
        self.state = Some(state.abort(RequestError::Cancelled));
        Step::Done
    }

    fn abandon(&mut self, illegal: IllegalStateTransition) -> Step<C> {
        tracing::error!(
            execution_id = %self.context.id(),
            operation = %illegal.operation,
            state = %illegal.state,
            "Illegal request state transition"
        );
        self.state = Some(RequestState::Failed {
            error: illegal.into(),
        });
        Step::Done
    }

    fn transitioned(&self, from: StateName, next: &StateOf<C, T>) {
        tracing::trace!(
            execution_id = %self.context.id(),
            %from,
            to = %next.name(),
            "Request state transition"
        );
        match next {
            RequestState::Finished { .. } => tracing::debug!(
                execution_id = %self.context.id(),
                attempts = self.context.attempts(),
                "Request execution finished"
            ),
            RequestState::Failed { error } => tracing::debug!(
                execution_id = %self.context.id(),
                attempts = self.context.attempts(),
                code = %error.code(),
                "Request execution failed"
            ),
            _ => {},
        }
    }
}

impl<C: Transport, T> fmt::Debug for RequestExecution<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecution")
            .field("context", &self.context)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
