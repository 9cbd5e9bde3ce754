//! Transition vocabulary.
//!
//! A [`Transition`] is a value describing the next lifecycle step. Templates
//! return transitions; the execution applies them. Transitions carry data only.

use crate::client::Transport;
use crate::error::{BoxError, RequestError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The next step an execution should take.
///
/// # Type Parameters
///
/// - `R`: the request type
/// - `T`: the caller-visible success value
/// - `E`: the transport error type
pub enum Transition<R, T, E> {
    /// No intervention: proceed with the stage's default behavior.
    ///
    /// Before the request is sent the default is to send it; after a response
    /// it is to finish with that response; after a transport error it is to
    /// fail with that error.
    Continue,

    /// Restart the lifecycle with a (possibly modified) request.
    Retry(R),

    /// Pause, then apply `resume` as if the requesting stage had returned it.
    Sleep {
        /// How long to pause
        duration: Duration,
        /// Transition applied once the pause is over
        resume: Box<Transition<R, T, E>>,
    },

    /// Terminate successfully with a caller-visible value.
    Finish(T),

    /// Terminate with an error.
    Fail(RequestError<E>),
}

/// Transition type for templates of client `C` producing `T`.
pub type TransitionFor<C, T> =
    Transition<<C as Transport>::Request, T, <C as Transport>::Error>;

/// Discriminant of a [`Transition`], for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// [`Transition::Continue`]
    Continue,
    /// [`Transition::Retry`]
    Retry,
    /// [`Transition::Sleep`]
    Sleep,
    /// [`Transition::Finish`]
    Finish,
    /// [`Transition::Fail`]
    Fail,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Sleep => "sleep",
            Self::Finish => "finish",
            Self::Fail => "fail",
        };
        f.write_str(text)
    }
}

impl<R, T, E> Transition<R, T, E> {
    /// Restart the lifecycle with `request`.
    #[must_use]
    pub const fn retry(request: R) -> Self {
        Self::Retry(request)
    }

    /// Pause for `duration`, then apply `resume`.
    #[must_use]
    pub fn sleep(duration: Duration, resume: Self) -> Self {
        Self::Sleep {
            duration,
            resume: Box::new(resume),
        }
    }

    /// Finish with `value`.
    #[must_use]
    pub const fn finish(value: T) -> Self {
        Self::Finish(value)
    }

    /// Fail with an application error.
    #[must_use]
    pub fn fail(error: impl Into<BoxError>) -> Self {
        Self::Fail(RequestError::User(error.into()))
    }

    /// Fail with an already classified error.
    #[must_use]
    pub const fn fail_with(error: RequestError<E>) -> Self {
        Self::Fail(error)
    }

    /// Whether this is [`Transition::Continue`].
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// The discriminant of this transition.
    #[must_use]
    pub const fn kind(&self) -> TransitionKind {
        match self {
            Self::Continue => TransitionKind::Continue,
            Self::Retry(_) => TransitionKind::Retry,
            Self::Sleep { .. } => TransitionKind::Sleep,
            Self::Finish(_) => TransitionKind::Finish,
            Self::Fail(_) => TransitionKind::Fail,
        }
    }
}

impl<R, T, E> Default for Transition<R, T, E> {
    fn default() -> Self {
        Self::Continue
    }
}

// Payloads are opaque, so Debug only shows the shape
impl<R, T, E> fmt::Debug for Transition<R, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "Transition::Continue"),
            Self::Retry(_) => write!(f, "Transition::Retry(<request>)"),
            Self::Sleep { duration, resume } => f
                .debug_struct("Transition::Sleep")
                .field("duration", duration)
                .field("resume", resume)
                .finish(),
            Self::Finish(_) => write!(f, "Transition::Finish(<value>)"),
            Self::Fail(error) => write!(f, "Transition::Fail({})", error.code()),
        }
    }
}
