//! Task-suspending I/O strategy on the tokio runtime.

use crate::error::Interrupted;
use crate::metrics::ExecutionMetrics;
use crate::strategy::{IoStrategy, conclude};
use courier_core::{
    AsyncClient, Client, Completion, ExecutionResult, Invocation, RequestExecution, Step,
    Transport,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::Instrument;

/// Suspends the calling task instead of blocking a thread.
///
/// - Sends to an [`AsyncClient`] are awaited directly on the calling task
///   ([`TokioStrategy::drive_async`]).
/// - Sends to a synchronous [`Client`] run on tokio's blocking pool
///   (`spawn_blocking`), so a slow client never stalls a worker thread.
/// - Sleeps use `tokio::time::sleep`, so many executions can back off
///   concurrently on a handful of threads.
/// - Both race the execution's cancellation token: a cancelled execution
///   resolves promptly with [`RequestError::Cancelled`]. A send abandoned this
///   way keeps running on the blocking pool and its result is discarded.
///
/// All futures must be polled inside a tokio runtime.
///
/// [`RequestError::Cancelled`]: courier_core::RequestError::Cancelled
///
/// # Example
///
/// ```rust
/// use courier_runtime::{IoStrategy, TokioStrategy};
///
/// # #[tokio::main]
/// # async fn main() {
/// let strategy = TokioStrategy;
/// assert_eq!(strategy.invoke(|| 6 * 7).await, Ok(42));
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioStrategy;

impl IoStrategy for TokioStrategy {
    type Pending<O: Send + 'static> = BoxFuture<'static, O>;

    fn invoke<F, O>(&self, operation: F) -> BoxFuture<'static, Result<O, Interrupted>>
    where
        F: FnOnce() -> O + Send + 'static,
        O: Send + 'static,
    {
        async move {
            match tokio::task::spawn_blocking(operation).await {
                Ok(output) => Ok(output),
                Err(error) => match error.try_into_panic() {
                    // A panicking client panics the caller, as with BlockingStrategy
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(error) => {
                        tracing::warn!(error = %error, "Client invocation interrupted");
                        Err(Interrupted)
                    },
                },
            }
        }
        .boxed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn drive<C, T>(
        &self,
        execution: RequestExecution<C, T>,
    ) -> BoxFuture<'static, ExecutionResult<C, T>>
    where
        C: Client + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static,
    {
        let strategy = *self;
        strategy.run(execution, "sync", move |invocation: Invocation<C>| {
            strategy.invoke(move || invocation.invoke())
        })
    }
}

impl TokioStrategy {
    /// Drive an execution whose client is asynchronous.
    ///
    /// Each send is awaited on the calling task; no blocking-pool thread is
    /// held while a request is in flight. Cancellation drops the pending send.
    pub fn drive_async<C, T>(
        &self,
        execution: RequestExecution<C, T>,
    ) -> BoxFuture<'static, ExecutionResult<C, T>>
    where
        C: AsyncClient + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static,
    {
        self.run(execution, "async", |invocation: Invocation<C>| {
            invocation.invoke_async().map(Ok).boxed()
        })
    }

    fn run<C, T, F>(
        self,
        mut execution: RequestExecution<C, T>,
        client: &'static str,
        send: F,
    ) -> BoxFuture<'static, ExecutionResult<C, T>>
    where
        C: Transport + 'static,
        C::Request: Send + 'static,
        C::Response: Send + 'static,
        C::Error: Send + 'static,
        T: From<C::Response> + Send + 'static,
        F: Fn(Invocation<C>) -> BoxFuture<'static, Result<Completion<C>, Interrupted>>
            + Send
            + 'static,
    {
        let span = tracing::debug_span!(
            "courier_drive",
            execution_id = %execution.id(),
            strategy = "tokio",
            client
        );

        async move {
            let token = execution.cancellation_token();
            loop {
                match execution.step() {
                    Step::Advanced => {},
                    Step::Send(invocation) => {
                        ExecutionMetrics::record_send();
                        tracing::trace!(attempt = invocation.attempt(), "Sending request");
                        let call = send(invocation);
                        tokio::select! {
                            biased;
                            () = token.cancelled() => execution.cancel(),
                            result = call => match result {
                                Ok(completion) => execution.complete(completion),
                                Err(Interrupted) => execution.cancel(),
                            },
                        }
                    },
                    Step::Sleep(duration) => {
                        ExecutionMetrics::record_sleep();
                        tracing::trace!(delay_ms = duration.as_millis(), "Sleeping");
                        tokio::select! {
                            biased;
                            () = token.cancelled() => execution.cancel(),
                            () = self.sleep(duration) => execution.wake(),
                        }
                    },
                    Step::Done => break,
                }
            }
            conclude(execution)
        }
        .instrument(span)
        .boxed()
    }
}
