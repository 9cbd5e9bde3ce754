//! Retry Demo - one flaky service, two ways of waiting
//!
//! Runs the same template chain against a service that fails its first
//! calls: on a blocking-pool thread, as concurrent tokio tasks over a
//! synchronous client, and over an async client whose sends are awaited
//! directly. Prints the resulting Prometheus metrics.
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=courier=debug cargo run -p courier-retry-demo
//! ```

#![allow(missing_docs)]

use courier_core::{AsyncClient, CancellationToken, Client, ResponseStatus, Transport};
use courier_runtime::metrics::MetricsExporter;
use courier_runtime::retry::{RetryPolicy, RetryTemplate};
use courier_runtime::templates::{AttemptLimit, Deadline};
use courier_runtime::{BlockingStrategy, Engine, TokioStrategy};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// A user lookup against a service that is still warming up
#[derive(Clone, Debug)]
struct Lookup {
    user_id: u64,
}

#[derive(Clone, Debug)]
struct Profile {
    status: u16,
    name: String,
}

impl ResponseStatus for Profile {
    fn status(&self) -> u16 {
        self.status
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connection reset by peer (call {call})")]
struct ConnectionReset {
    call: usize,
}

/// Resets the first `resets` connections, then answers 503 once, then works.
struct WarmingService {
    calls: AtomicUsize,
    resets: usize,
}

impl WarmingService {
    const fn new(resets: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            resets,
        }
    }

    fn reply(&self, request: &Lookup) -> Result<Profile, ConnectionReset> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.resets {
            return Err(ConnectionReset { call });
        }
        let status = if call == self.resets + 1 { 503 } else { 200 };
        Ok(Profile {
            status,
            name: format!("user-{}", request.user_id),
        })
    }
}

const SEND_LATENCY: Duration = Duration::from_millis(5);

impl Client for WarmingService {
    type Request = Lookup;
    type Response = Profile;
    type Error = ConnectionReset;

    fn send(&self, request: &Lookup) -> Result<Profile, ConnectionReset> {
        std::thread::sleep(SEND_LATENCY);
        self.reply(request)
    }
}

/// The same service behind a non-blocking transport.
struct AsyncWarmingService(Arc<WarmingService>);

impl Transport for AsyncWarmingService {
    type Request = Lookup;
    type Response = Profile;
    type Error = ConnectionReset;
}

impl AsyncClient for AsyncWarmingService {
    fn send(&self, request: &Lookup) -> BoxFuture<'static, Result<Profile, ConnectionReset>> {
        let service = Arc::clone(&self.0);
        let request = request.clone();
        async move {
            tokio::time::sleep(SEND_LATENCY).await;
            service.reply(&request)
        }
        .boxed()
    }
}

fn retry<C>() -> RetryTemplate<C>
where
    C: Transport<Response = Profile>,
{
    RetryTemplate::new(
        RetryPolicy::builder()
            .max_retries(4)
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(200))
            .jitter(true)
            .build(),
    )
    .when_status_5xx()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courier_runtime=info,courier_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus recorder
    let exporter = MetricsExporter::install()?;

    // 3. Blocking: the calling thread sleeps through the backoff, so it runs
    //    on the blocking pool rather than on a runtime worker
    let engine: Engine<WarmingService> = Engine::builder(WarmingService::new(2))
        .template(Deadline::new(Duration::from_secs(2)))
        .template(AttemptLimit::new(6))
        .template(retry())
        .build();

    let (profile, elapsed) = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        engine
            .execute(Lookup { user_id: 7 })
            .map(|profile| (profile, started.elapsed()))
    })
    .await??;
    tracing::info!(
        name = %profile.name,
        elapsed_ms = elapsed.as_millis(),
        "Blocking lookup finished"
    );

    // 4. Tokio: many executions back off concurrently on one engine
    let engine: Engine<WarmingService, TokioStrategy> = Engine::builder(WarmingService::new(10))
        .template(AttemptLimit::new(6))
        .template(retry())
        .strategy(TokioStrategy)
        .build();
    let started = Instant::now();
    let lookups = (1..=20).map(|user_id| engine.execute(Lookup { user_id }));
    let results = futures::future::join_all(lookups).await;
    let finished = results.iter().filter(|result| result.is_ok()).count();
    tracing::info!(
        finished,
        failed = results.len() - finished,
        elapsed_ms = started.elapsed().as_millis(),
        "Concurrent lookups finished"
    );

    // 5. Async client: sends are awaited, no thread is held while in flight
    let engine: Engine<AsyncWarmingService, TokioStrategy> =
        Engine::builder(AsyncWarmingService(Arc::new(WarmingService::new(10))))
            .template(AttemptLimit::new(6))
            .template(retry())
            .strategy(TokioStrategy)
            .build();
    let started = Instant::now();
    let lookups = (1..=20).map(|user_id| engine.execute_async(Lookup { user_id }));
    let results = futures::future::join_all(lookups).await;
    let finished = results.iter().filter(|result| result.is_ok()).count();
    tracing::info!(
        finished,
        failed = results.len() - finished,
        elapsed_ms = started.elapsed().as_millis(),
        "Async lookups finished"
    );

    // 6. Cancellation: give up on a lookup that is still backing off
    let slow: Engine<WarmingService, TokioStrategy> = Engine::builder(WarmingService::new(100))
        .template(RetryTemplate::new(
            RetryPolicy::builder().initial_delay(Duration::from_secs(5)).build(),
        ))
        .strategy(TokioStrategy)
        .build();
    let token = CancellationToken::new();
    let pending = tokio::spawn(slow.execute_cancellable(Lookup { user_id: 99 }, token.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    match pending.await? {
        Ok(profile) => tracing::info!(name = %profile.name, "Lookup unexpectedly finished"),
        Err(error) => tracing::info!(code = %error.code(), "Lookup cancelled while backing off"),
    }

    // 7. A token cancelled up front stops the blocking strategy before any send
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let refused = tokio::task::spawn_blocking(move || {
        slow.with_strategy(BlockingStrategy)
            .execute_cancellable(Lookup { user_id: 1 }, cancelled)
    })
    .await?;
    tracing::info!(
        code = ?refused.err().map(|e| e.code()),
        "Pre-cancelled lookup never reached the service"
    );

    println!("{}", exporter.render());
    Ok(())
}
