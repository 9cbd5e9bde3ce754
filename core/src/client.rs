//! The transport capability consumed by executions.
//!
//! Executions and templates only need the request, response and error types,
//! which [`Transport`] names. How a request actually goes out is a separate
//! trait: [`Client`] sends synchronously, [`AsyncClient`] hands back a future.
//! Every `Client` is a `Transport`; async clients implement `Transport`
//! themselves.

use futures::future::BoxFuture;
use std::sync::Arc;

/// The request, response and error types of a transport.
pub trait Transport: Send + Sync {
    /// Fully bound outbound request.
    type Request;

    /// Transport result.
    type Response;

    /// Transport failure.
    type Error;
}

/// A transport able to send one request and produce one response.
///
/// Supplied by the embedding application; the engine never constructs one. A
/// client is shared by every execution created from it, so it must tolerate
/// concurrent `send` calls.
///
/// The request, response and error types are opaque to the engine: they are
/// only handed through to templates and to the caller.
///
/// # Example
///
/// ```
/// use courier_core::Client;
///
/// struct Echo;
///
/// impl Client for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
///
///     fn send(&self, request: &String) -> Result<String, std::io::Error> {
///         Ok(request.clone())
///     }
/// }
///
/// assert_eq!(Echo.send(&"ping".to_string()).ok(), Some("ping".to_string()));
/// ```
pub trait Client: Send + Sync {
    /// Fully bound outbound request (method, URL, headers, body, timeout).
    type Request;

    /// Transport result.
    type Response;

    /// Transport failure (network, protocol).
    type Error;

    /// Send the request.
    ///
    /// # Errors
    ///
    /// Returns the transport error on network or protocol failure.
    fn send(&self, request: &Self::Request) -> Result<Self::Response, Self::Error>;
}

impl<C: Client + ?Sized> Transport for C {
    type Request = C::Request;
    type Response = C::Response;
    type Error = C::Error;
}

impl<C: Client + ?Sized> Client for Arc<C> {
    type Request = C::Request;
    type Response = C::Response;
    type Error = C::Error;

    fn send(&self, request: &Self::Request) -> Result<Self::Response, Self::Error> {
        (**self).send(request)
    }
}

impl<C: Client + ?Sized> Client for &C {
    type Request = C::Request;
    type Response = C::Response;
    type Error = C::Error;

    fn send(&self, request: &Self::Request) -> Result<Self::Response, Self::Error> {
        (**self).send(request)
    }
}

/// A transport whose sends complete asynchronously.
///
/// The returned future must own everything it needs: clone the request (or
/// the parts of it the transport uses) before moving into it. Async strategies
/// await it directly, without parking a thread per in-flight send.
///
/// # Example
///
/// ```
/// use courier_core::{AsyncClient, Transport};
/// use futures::FutureExt;
/// use futures::future::BoxFuture;
///
/// struct Echo;
///
/// impl Transport for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
/// }
///
/// impl AsyncClient for Echo {
///     fn send(&self, request: &String) -> BoxFuture<'static, Result<String, std::io::Error>> {
///         let request = request.clone();
///         async move { Ok(request) }.boxed()
///     }
/// }
///
/// let reply = futures::executor::block_on(Echo.send(&"ping".to_string()));
/// assert_eq!(reply.ok(), Some("ping".to_string()));
/// ```
pub trait AsyncClient: Transport {
    /// Start sending the request.
    ///
    /// The future resolves to the response, or to the transport error on
    /// network or protocol failure.
    fn send(
        &self,
        request: &Self::Request,
    ) -> BoxFuture<'static, Result<Self::Response, Self::Error>>;
}

/// Responses that expose a numeric status code.
///
/// Only needed by status based templates (for example retrying on 5xx); the
/// engine itself never looks at responses.
pub trait ResponseStatus {
    /// The response status code.
    fn status(&self) -> u16;

    /// Whether the status is in the 5xx range.
    fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status())
    }
}
