//! Request templates: middleware hooks around the request lifecycle.

use crate::client::Transport;
use crate::context::ExecutionContext;
use crate::transition::{Transition, TransitionFor};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Hooks that can intercept one request lifecycle.
///
/// Every hook defaults to [`Transition::Continue`], so a template implements
/// only the hooks it cares about. Returning anything else overrides the
/// default behavior of that stage.
///
/// Templates are shared read-only across executions. State that must survive
/// between hook calls of one request belongs in
/// [`ExecutionContext::scoped_state`].
///
/// # Type Parameters
///
/// - `C`: the client whose requests, responses and errors the hooks see
/// - `T`: the caller-visible success value
///
/// # Example
///
/// ```
/// use courier_core::{ExecutionContext, RequestTemplate, Transition, TransitionFor, Transport};
///
/// /// Turns any transport error into a finished `None`.
/// struct Optional;
///
/// impl<C: Transport, R> RequestTemplate<C, Option<R>> for Optional {
///     fn after_exception(
///         &self,
///         _context: &mut ExecutionContext,
///         _request: &C::Request,
///         _error: &C::Error,
///     ) -> TransitionFor<C, Option<R>> {
///         Transition::finish(None)
///     }
/// }
/// ```
pub trait RequestTemplate<C: Transport, T>: Send + Sync {
    /// Called before each send.
    ///
    /// Default behavior on `Continue`: send the request.
    fn before_request(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
    ) -> TransitionFor<C, T> {
        Transition::Continue
    }

    /// Called after the client returned a response.
    ///
    /// Default behavior on `Continue`: finish with the response.
    fn after_response(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        _response: &C::Response,
    ) -> TransitionFor<C, T> {
        Transition::Continue
    }

    /// Called after the client failed.
    ///
    /// Default behavior on `Continue`: fail with the transport error.
    fn after_exception(
        &self,
        _context: &mut ExecutionContext,
        _request: &C::Request,
        _error: &C::Error,
    ) -> TransitionFor<C, T> {
        Transition::Continue
    }
}

impl<C, T, X> RequestTemplate<C, T> for Arc<X>
where
    C: Transport,
    X: RequestTemplate<C, T> + ?Sized,
{
    fn before_request(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
    ) -> TransitionFor<C, T> {
        (**self).before_request(context, request)
    }

    fn after_response(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        response: &C::Response,
    ) -> TransitionFor<C, T> {
        (**self).after_response(context, request, response)
    }

    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        error: &C::Error,
    ) -> TransitionFor<C, T> {
        (**self).after_exception(context, request, error)
    }
}

impl<C, T, X> RequestTemplate<C, T> for Box<X>
where
    C: Transport,
    X: RequestTemplate<C, T> + ?Sized,
{
    fn before_request(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
    ) -> TransitionFor<C, T> {
        (**self).before_request(context, request)
    }

    fn after_response(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        response: &C::Response,
    ) -> TransitionFor<C, T> {
        (**self).after_response(context, request, response)
    }

    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        error: &C::Error,
    ) -> TransitionFor<C, T> {
        (**self).after_exception(context, request, error)
    }
}

/// Identifies a template hook, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// [`RequestTemplate::before_request`]
    BeforeRequest,
    /// [`RequestTemplate::after_response`]
    AfterResponse,
    /// [`RequestTemplate::after_exception`]
    AfterException,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BeforeRequest => "before_request",
            Self::AfterResponse => "after_response",
            Self::AfterException => "after_exception",
        };
        f.write_str(text)
    }
}
