//! # Courier Runtime
//!
//! I/O strategies, the engine facade and bundled templates for courier.
//!
//! `courier-core` describes a request lifecycle as a pure state machine. This
//! crate performs its suspension points and ships the templates most
//! applications need.
//!
//! ## Core Components
//!
//! - **IoStrategy**: how sends and sleeps are performed
//!   ([`BlockingStrategy`] on the calling thread, [`TokioStrategy`] as
//!   suspended tasks; async clients are awaited directly through
//!   [`Engine::execute_async`])
//! - **Engine**: client + template chain + default strategy
//! - **Templates**: retry with backoff, attempt limit, deadline, response
//!   and error handlers
//! - **Metrics**: Prometheus counters and histograms for executions
//!
//! ## Example
//!
//! ```rust
//! use courier_core::Client;
//! use courier_runtime::{Engine, TokioStrategy, retry::{RetryPolicy, RetryTemplate}};
//!
//! struct Echo;
//! impl Client for Echo {
//!     type Request = String;
//!     type Response = String;
//!     type Error = std::io::Error;
//!     fn send(&self, request: &String) -> Result<String, std::io::Error> {
//!         Ok(request.clone())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine: Engine<Echo, TokioStrategy> = Engine::builder(Echo)
//!     .template(RetryTemplate::new(RetryPolicy::default()))
//!     .strategy(TokioStrategy)
//!     .build();
//!
//! let reply = engine.execute("ping".to_string()).await;
//! assert_eq!(reply.ok(), Some("ping".to_string()));
//! # }
//! ```

/// Thread-blocking strategy
pub mod blocking;

/// Engine facade and builder
pub mod engine;

/// Error types for the runtime and bundled templates
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// The I/O strategy abstraction
pub mod strategy;

/// Task-suspending strategy on tokio
pub mod suspending;

/// Attempt limit, deadline and handler templates
pub mod templates;

pub use blocking::BlockingStrategy;
pub use engine::{Engine, EngineBuilder};
pub use error::{Interrupted, PolicyError};
pub use retry::{Backoff, DelaySequence, RetryPolicy, RetryTemplate};
pub use strategy::IoStrategy;
pub use suspending::TokioStrategy;
pub use templates::{AttemptLimit, Deadline, ErrorHandler, Handler, ResponseHandler, Then};
