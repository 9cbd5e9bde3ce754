//! # Courier Core
//!
//! Core traits and types for orchestrating a single client request.
//!
//! A request executed through courier moves through a small, explicit state
//! machine. Application code customizes the lifecycle by writing
//! [`RequestTemplate`]s whose hooks return [`Transition`] values; the
//! [`RequestExecution`] applies those transitions. The crate never performs
//! I/O scheduling itself: drivers in `courier-runtime` decide whether a send
//! blocks a thread or suspends a task.
//!
//! ## Core Concepts
//!
//! - **Client**: the transport adapter, `send(request) -> Result<Response, Error>`;
//!   [`AsyncClient`] is its future-returning counterpart
//! - **Transition**: a value describing the next step (`Continue`, `Retry`,
//!   `Sleep`, `Finish`, `Fail`)
//! - **RequestTemplate**: hooks before a send, after a response and after a
//!   transport error
//! - **TemplateChain**: ordered templates; the first intervention wins
//! - **RequestState**: the lifecycle state machine
//! - **RequestExecution**: drives one lifecycle, one step at a time
//!
//! ## Architecture Principles
//!
//! - Transitions are data, application is centralized
//! - Illegal transitions are errors, never silent no-ops
//! - Templates are shared and read-only; per-request state lives in the
//!   [`ExecutionContext`]
//! - Suspension points are explicit ([`Step::Send`], [`Step::Sleep`])
//!
//! ## Example
//!
//! ```
//! use courier_core::*;
//! use std::sync::Arc;
//!
//! struct Lengths;
//!
//! impl Client for Lengths {
//!     type Request = String;
//!     type Response = usize;
//!     type Error = std::io::Error;
//!
//!     fn send(&self, request: &String) -> Result<usize, std::io::Error> {
//!         Ok(request.len())
//!     }
//! }
//!
//! /// Refuses empty requests without sending them.
//! struct NonEmpty;
//!
//! impl RequestTemplate<Lengths, usize> for NonEmpty {
//!     fn before_request(&self, _: &mut ExecutionContext, request: &String) -> TransitionFor<Lengths, usize> {
//!         if request.is_empty() {
//!             Transition::fail("empty request")
//!         } else {
//!             Transition::Continue
//!         }
//!     }
//! }
//!
//! let chain = Arc::new(TemplateChain::new().with(NonEmpty));
//! let mut execution: RequestExecution<Lengths> =
//!     RequestExecution::start(Arc::new(Lengths), chain, String::new());
//!
//! while !matches!(execution.step(), Step::Done) {}
//! assert_eq!(execution.into_result().map_err(|e| e.code()), Err(ErrorCode::User));
//! ```

pub mod chain;
pub mod client;
pub mod context;
pub mod error;
pub mod execution;
pub mod state;
pub mod template;
pub mod transition;

pub use chain::{SharedTemplate, TemplateChain};
pub use client::{AsyncClient, Client, ResponseStatus, Transport};
pub use context::{ExecutionContext, ExecutionId};
pub use error::{
    BoxError, ErrorCode, IllegalStateTransition, Operation, RequestError, StateName,
};
pub use execution::{Completion, ExecutionResult, Invocation, RequestExecution, Step};
pub use state::RequestState;
pub use template::{Hook, RequestTemplate};
pub use transition::{Transition, TransitionFor, TransitionKind};

// Re-export so drivers and callers share one cancellation type
pub use tokio_util::sync::CancellationToken;
