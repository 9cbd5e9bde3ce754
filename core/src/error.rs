//! Error types for request executions.
//!
//! Three families of failure reach a caller:
//!
//! - **Illegal state transitions**: a template (or a driver) asked the state machine
//!   for an operation the current state does not allow. Always fatal, never retried.
//! - **Transport errors**: surfaced by the [`Client`](crate::client::Client) and handed
//!   to `after_exception` hooks before they become terminal.
//! - **User errors**: produced by a `Fail` transition carrying an application error.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Boxed application error carried by [`RequestError::User`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Name of a request state, used for diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateName {
    /// Execution was started but not prepared yet
    Created,
    /// Waiting on the `before_request` decision
    AwaitingBeforeDecision,
    /// The client is (or should be) sending the request
    Sending,
    /// Waiting on the `after_response` / `after_exception` decision
    AwaitingAfterDecision,
    /// Pausing before a pending transition is applied
    Sleeping,
    /// Terminal success
    Finished,
    /// Terminal failure
    Failed,
}

impl StateName {
    /// Whether no further transition can leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Stable snake case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingBeforeDecision => "awaiting_before_decision",
            Self::Sending => "sending",
            Self::AwaitingAfterDecision => "awaiting_after_decision",
            Self::Sleeping => "sleeping",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine operation, as reported by [`IllegalStateTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Enter the `before_request` stage
    Prepare,
    /// Hand the request to the client
    Send,
    /// Pause before applying another transition
    Sleep,
    /// Terminate successfully (also: deliver a response, resume after a sleep)
    Finish,
    /// Terminate with an error (also: deliver a transport error)
    Fail,
    /// Restart the lifecycle with a new request
    Retry,
}

impl Operation {
    /// Stable snake case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Send => "send",
            Self::Sleep => "sleep",
            Self::Finish => "finish",
            Self::Fail => "fail",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation was attempted from a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "illegal transition [{operation}] from request state [{state}]: \
     this is possibly due to a badly designed RequestTemplate"
)]
pub struct IllegalStateTransition {
    /// The attempted operation
    pub operation: Operation,
    /// The state that rejected it
    pub state: StateName,
}

impl IllegalStateTransition {
    /// Create a new illegal transition report.
    #[must_use]
    pub const fn new(operation: Operation, state: StateName) -> Self {
        Self { operation, state }
    }
}

/// Coarse classification of a [`RequestError`], for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// See [`RequestError::IllegalStateTransition`]
    IllegalStateTransition,
    /// See [`RequestError::Transport`]
    Transport,
    /// See [`RequestError::User`]
    User,
    /// See [`RequestError::Cancelled`]
    Cancelled,
}

impl ErrorCode {
    /// Stable snake case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IllegalStateTransition => "illegal_state_transition",
            Self::Transport => "transport",
            Self::User => "user",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error of a request execution.
///
/// `E` is the transport error type of the [`Client`](crate::client::Client).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RequestError<E> {
    /// A template or driver misused the state machine.
    ///
    /// Surfaced distinctly from ordinary failures: it indicates a defect, not a
    /// failed request.
    #[error(transparent)]
    IllegalStateTransition(#[from] IllegalStateTransition),

    /// The client failed and no template recovered.
    #[error("transport error: {0}")]
    Transport(#[source] E),

    /// A template failed the request with an application error.
    #[error("{0}")]
    User(#[source] BoxError),

    /// The execution was cancelled at a suspension point.
    #[error("request execution cancelled")]
    Cancelled,
}

impl<E> RequestError<E> {
    /// Wrap an application error.
    pub fn user(error: impl Into<BoxError>) -> Self {
        Self::User(error.into())
    }

    /// Classification of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IllegalStateTransition(_) => ErrorCode::IllegalStateTransition,
            Self::Transport(_) => ErrorCode::Transport,
            Self::User(_) => ErrorCode::User,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// The transport error, if this is one.
    #[must_use]
    pub const fn transport(&self) -> Option<&E> {
        match self {
            Self::Transport(error) => Some(error),
            _ => None,
        }
    }

    /// Downcast a user error to a concrete type.
    #[must_use]
    pub fn user_error<U>(&self) -> Option<&U>
    where
        U: std::error::Error + 'static,
    {
        match self {
            Self::User(error) => error.downcast_ref::<U>(),
            _ => None,
        }
    }

    /// Whether this error reports a state machine misuse.
    #[must_use]
    pub const fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::IllegalStateTransition(_))
    }
}
