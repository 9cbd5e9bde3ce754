//! The seam between the pure lifecycle and real I/O scheduling.
//!
//! An [`IoStrategy`] decides what "waiting" means: blocking the calling
//! thread, or suspending a task on an async runtime. The execution itself only
//! reports suspension points ([`Step::Send`](courier_core::Step::Send),
//! [`Step::Sleep`](courier_core::Step::Sleep)); the strategy performs them and
//! resumes the execution.
//!
//! Every strategy exposes the same three operations through its own
//! `Pending<O>` type: the value itself for [`BlockingStrategy`], a boxed
//! future for [`TokioStrategy`].
//!
//! [`BlockingStrategy`]: crate::blocking::BlockingStrategy
//! [`TokioStrategy`]: crate::suspending::TokioStrategy

use crate::error::Interrupted;
use crate::metrics::ExecutionMetrics;
use courier_core::{Client, ExecutionResult, RequestExecution, Transport};
use std::time::Duration;

/// A way of performing the execution's suspension points.
///
/// Implementations must be stateless with respect to individual executions,
/// so one strategy value can drive any number of executions concurrently.
pub trait IoStrategy: Clone + Send + Sync + 'static {
    /// How the strategy hands back the outcome of an operation.
    type Pending<O: Send + 'static>;

    /// Run a (possibly blocking) client operation.
    ///
    /// Resolves to [`Interrupted`] when the strategy could not finish it.
    fn invoke<F, O>(&self, operation: F) -> Self::Pending<Result<O, Interrupted>>
    where
        F: FnOnce() -> O + Send + 'static,
        O: Send + 'static;

    /// Pause for `duration`.
    fn sleep(&self, duration: Duration) -> Self::Pending<()>;

    /// Drive `execution` of a synchronous client to a terminal state.
    fn drive<C, T>(&self, execution: RequestExecution<C, T>) -> Self::Pending<ExecutionResult<C, T>>
    where
        C: Client + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static;
}

/// Record metrics for a terminal execution and hand back its result.
pub(crate) fn conclude<C, T>(execution: RequestExecution<C, T>) -> ExecutionResult<C, T>
where
    C: Transport,
    T: From<C::Response>,
{
    let elapsed = execution.context().elapsed();
    let attempts = execution.context().attempts();
    let id = execution.id();
    let result = execution.into_result();

    ExecutionMetrics::record_outcome(&result, elapsed);
    if result.is_ok() && attempts > 1 {
        tracing::info!(
            execution_id = %id,
            attempts,
            elapsed_ms = elapsed.as_millis(),
            "Request succeeded after retry"
        );
    }
    result
}
