//! Thread-blocking I/O strategy.

use crate::error::Interrupted;
use crate::metrics::ExecutionMetrics;
use crate::strategy::{IoStrategy, conclude};
use courier_core::{Client, ExecutionResult, RequestExecution, Step};
use std::time::Duration;

/// Performs sends and sleeps on the calling thread.
///
/// `drive` returns only once the execution is terminal. Cancellation is
/// observed between suspension points: a token cancelled during a sleep fails
/// the execution when the sleep ends.
///
/// # Example
///
/// ```rust
/// use courier_runtime::{BlockingStrategy, IoStrategy};
/// use std::time::Duration;
///
/// let strategy = BlockingStrategy;
/// assert_eq!(strategy.invoke(|| 6 * 7), Ok(42));
/// strategy.sleep(Duration::from_millis(1));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingStrategy;

impl IoStrategy for BlockingStrategy {
    type Pending<O: Send + 'static> = O;

    fn invoke<F, O>(&self, operation: F) -> Result<O, Interrupted>
    where
        F: FnOnce() -> O + Send + 'static,
        O: Send + 'static,
    {
        Ok(operation())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    #[tracing::instrument(
        skip_all,
        name = "courier_drive",
        fields(execution_id = %execution.id(), strategy = "blocking")
    )]
    fn drive<C, T>(&self, mut execution: RequestExecution<C, T>) -> ExecutionResult<C, T>
    where
        C: Client + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static,
    {
        loop {
            match execution.step() {
                Step::Advanced => {},
                Step::Send(invocation) => {
                    ExecutionMetrics::record_send();
                    tracing::trace!(attempt = invocation.attempt(), "Sending request");
                    match self.invoke(move || invocation.invoke()) {
                        Ok(completion) => execution.complete(completion),
                        Err(Interrupted) => execution.cancel(),
                    }
                },
                Step::Sleep(duration) => {
                    ExecutionMetrics::record_sleep();
                    tracing::trace!(delay_ms = duration.as_millis(), "Sleeping");
                    self.sleep(duration);
                    execution.wake();
                },
                Step::Done => break,
            }
        }
        conclude(execution)
    }
}
