//! The engine facade: a client, a template chain and a default strategy.

use crate::blocking::BlockingStrategy;
use crate::strategy::IoStrategy;
use crate::suspending::TokioStrategy;
use courier_core::{
    AsyncClient, CancellationToken, Client, ExecutionResult, RequestExecution, RequestTemplate,
    SharedTemplate, TemplateChain, Transport,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Entry point for executing requests.
///
/// Owns the shared client and template chain, and a default [`IoStrategy`].
/// Each call creates a fresh [`RequestExecution`]; the engine itself holds no
/// per-request state, so one engine serves any number of concurrent requests.
///
/// # Type Parameters
///
/// - `C`: the client
/// - `S`: the default strategy used by [`Engine::execute`]
/// - `T`: the caller-visible success value
///
/// # Example
///
/// ```rust
/// use courier_core::Client;
/// use courier_runtime::{Engine, retry::RetryTemplate, templates::AttemptLimit};
///
/// struct Echo;
/// impl Client for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
///     fn send(&self, request: &String) -> Result<String, std::io::Error> {
///         Ok(request.clone())
///     }
/// }
///
/// let engine: Engine<Echo> = Engine::builder(Echo)
///     .template(AttemptLimit::new(3))
///     .template(RetryTemplate::on_transport_error(2))
///     .build();
///
/// assert_eq!(engine.execute("ping".into()).ok(), Some("ping".to_string()));
/// ```
pub struct Engine<C: Transport, S = BlockingStrategy, T = <C as Transport>::Response> {
    client: Arc<C>,
    templates: Arc<TemplateChain<C, T>>,
    strategy: S,
}

impl<C, T> Engine<C, BlockingStrategy, T>
where
    C: Transport + 'static,
    T: 'static,
{
    /// Start building an engine around `client`.
    #[must_use]
    pub fn builder(client: C) -> EngineBuilder<C, BlockingStrategy, T> {
        EngineBuilder::new(client)
    }
}

impl<C, S, T> Engine<C, S, T>
where
    C: Transport + 'static,
    T: From<C::Response> + 'static,
{
    /// Create an engine from already shared parts.
    #[must_use]
    pub const fn new(client: Arc<C>, templates: Arc<TemplateChain<C, T>>, strategy: S) -> Self {
        Self {
            client,
            templates,
            strategy,
        }
    }

    /// Create an execution for `request` without driving it.
    #[must_use]
    pub fn start(&self, request: C::Request) -> RequestExecution<C, T> {
        RequestExecution::start(
            Arc::clone(&self.client),
            Arc::clone(&self.templates),
            request,
        )
    }

    /// Same engine, different default strategy.
    #[must_use]
    pub fn with_strategy<X: IoStrategy>(self, strategy: X) -> Engine<C, X, T> {
        Engine {
            client: self.client,
            templates: self.templates,
            strategy,
        }
    }

    /// The shared client.
    #[must_use]
    pub const fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// The shared template chain.
    #[must_use]
    pub const fn templates(&self) -> &Arc<TemplateChain<C, T>> {
        &self.templates
    }

    /// The default strategy.
    #[must_use]
    pub const fn strategy(&self) -> &S {
        &self.strategy
    }
}

impl<C, S, T> Engine<C, S, T>
where
    C: Client + 'static,
    C::Request: Send + 'static,
    C::Response: Send + 'static,
    C::Error: Send + 'static,
    S: IoStrategy,
    T: From<C::Response> + Send + 'static,
{
    /// Execute `request` with the default strategy.
    pub fn execute(&self, request: C::Request) -> S::Pending<ExecutionResult<C, T>> {
        self.strategy.drive(self.start(request))
    }

    /// Execute `request` with `strategy` instead of the default one.
    pub fn execute_with<X>(&self, strategy: &X, request: C::Request) -> X::Pending<ExecutionResult<C, T>>
    where
        X: IoStrategy,
    {
        strategy.drive(self.start(request))
    }

    /// Execute `request` with the default strategy, observing `token`.
    ///
    /// Cancelling the token fails the execution with
    /// [`RequestError::Cancelled`](courier_core::RequestError::Cancelled) at
    /// its next suspension point.
    pub fn execute_cancellable(
        &self,
        request: C::Request,
        token: CancellationToken,
    ) -> S::Pending<ExecutionResult<C, T>> {
        self.strategy
            .drive(self.start(request).with_cancellation(token))
    }
}

/// Engines over an [`AsyncClient`]: sends are awaited, never parked on a
/// thread.
///
/// # Example
///
/// ```rust
/// use courier_core::{AsyncClient, Transport};
/// use courier_runtime::{Engine, TokioStrategy, templates::AttemptLimit};
/// use futures::FutureExt;
/// use futures::future::BoxFuture;
///
/// struct Echo;
/// impl Transport for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
/// }
/// impl AsyncClient for Echo {
///     fn send(&self, request: &String) -> BoxFuture<'static, Result<String, std::io::Error>> {
///         let request = request.clone();
///         async move { Ok(request) }.boxed()
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let engine: Engine<Echo, TokioStrategy> = Engine::builder(Echo)
///     .template(AttemptLimit::new(3))
///     .strategy(TokioStrategy)
///     .build();
///
/// assert_eq!(engine.execute_async("ping".into()).await.ok(), Some("ping".to_string()));
/// # }
/// ```
impl<C, T> Engine<C, TokioStrategy, T>
where
    C: AsyncClient + 'static,
    C::Request: Send + 'static,
    C::Response: Send + 'static,
    C::Error: Send + 'static,
    T: From<C::Response> + Send + 'static,
{
    /// Execute `request`, awaiting the client's futures directly.
    pub fn execute_async(
        &self,
        request: C::Request,
    ) -> BoxFuture<'static, ExecutionResult<C, T>> {
        self.strategy.drive_async(self.start(request))
    }

    /// [`Engine::execute_async`], observing `token`.
    pub fn execute_async_cancellable(
        &self,
        request: C::Request,
        token: CancellationToken,
    ) -> BoxFuture<'static, ExecutionResult<C, T>> {
        self.strategy
            .drive_async(self.start(request).with_cancellation(token))
    }
}

impl<C: Transport, S: Clone, T> Clone for Engine<C, S, T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            templates: Arc::clone(&self.templates),
            strategy: self.strategy.clone(),
        }
    }
}

impl<C: Transport, S: fmt::Debug, T> fmt::Debug for Engine<C, S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("templates", &self.templates)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
///
/// Templates run in the order they are added.
pub struct EngineBuilder<C: Transport, S = BlockingStrategy, T = <C as Transport>::Response> {
    client: Arc<C>,
    templates: TemplateChain<C, T>,
    strategy: S,
}

impl<C, T> EngineBuilder<C, BlockingStrategy, T>
where
    C: Transport + 'static,
    T: 'static,
{
    /// Start from `client`, an empty chain and [`BlockingStrategy`].
    #[must_use]
    pub fn new(client: C) -> Self {
        Self::shared(Arc::new(client))
    }

    /// Start from an already shared client.
    #[must_use]
    pub fn shared(client: Arc<C>) -> Self {
        Self {
            client,
            templates: TemplateChain::new(),
            strategy: BlockingStrategy,
        }
    }
}

impl<C, S, T> EngineBuilder<C, S, T>
where
    C: Transport + 'static,
    T: 'static,
{
    /// Append a template.
    #[must_use]
    pub fn template<X>(mut self, template: X) -> Self
    where
        X: RequestTemplate<C, T> + 'static,
    {
        self.templates.push(template);
        self
    }

    /// Append an already shared template.
    #[must_use]
    pub fn shared_template(mut self, template: SharedTemplate<C, T>) -> Self {
        self.templates.push_shared(template);
        self
    }

    /// Append every template of `chain`, in order, as one nested template.
    #[must_use]
    pub fn templates(self, chain: TemplateChain<C, T>) -> Self {
        self.template(chain)
    }

    /// Use `strategy` as the engine's default.
    #[must_use]
    pub fn strategy<X: IoStrategy>(self, strategy: X) -> EngineBuilder<C, X, T> {
        EngineBuilder {
            client: self.client,
            templates: self.templates,
            strategy,
        }
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Engine<C, S, T> {
        tracing::debug!(templates = self.templates.len(), "Engine built");
        Engine {
            client: self.client,
            templates: Arc::new(self.templates),
            strategy: self.strategy,
        }
    }
}

impl<C: Transport, S: fmt::Debug, T> fmt::Debug for EngineBuilder<C, S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("templates", &self.templates)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
