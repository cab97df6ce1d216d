//! Route table and handler contract.
//!
//! Routes are registered once at startup into a plain `HashMap` and never
//! mutated afterwards; dispatch is a lookup, never reflection. Every
//! dispatched call receives the session of the connection it arrived on and
//! a [`Requester`] toward the peer, so handlers can open reverse streams
//! without re-authenticating.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connection::Requester;
use crate::error::Result;
use crate::session::Session;
use crate::stream::StreamHandle;

/// Element stream produced by a route handler.
pub type HandlerStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Boxed future returned by [`RouteHandler::handle`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerStream>> + Send>>;

/// Per-stream context handed to a route handler.
pub struct StreamContext {
    /// The session of the connection the request arrived on.
    pub session: Arc<Session>,
    /// Requester toward the peer that issued this request, for reverse
    /// streams over the same connection.
    pub peer: Requester,
    /// Lifecycle bookkeeping for this response stream.
    pub handle: Arc<StreamHandle>,
    /// Cancelled when the peer cancels the stream or the connection goes
    /// away; handlers must stop emitting once this fires.
    pub cancel: CancellationToken,
}

/// A named endpoint within a connection's protocol.
pub trait RouteHandler: Send + Sync + 'static {
    fn handle(&self, ctx: StreamContext, payload: Value) -> HandlerFuture;
}

// Plain async functions and closures are handlers.
impl<F, Fut> RouteHandler for F
where
    F: Fn(StreamContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerStream>> + Send + 'static,
{
    fn handle(&self, ctx: StreamContext, payload: Value) -> HandlerFuture {
        Box::pin(self(ctx, payload))
    }
}

/// Maps route names to handlers. Built once at startup, then shared
/// read-only across every connection.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(mut self, route: impl Into<String>, handler: H) -> Self
    where
        H: RouteHandler,
    {
        self.routes.insert(route.into(), Arc::new(handler));
        self
    }

    pub fn lookup(&self, route: &str) -> Option<Arc<dyn RouteHandler>> {
        self.routes.get(route).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn lookup_misses_unregistered_routes() {
        let router = Router::new();
        assert!(router.lookup("greetings").is_none());
    }

    #[test]
    fn closures_register_as_handlers() {
        let router = Router::new().register("echo", |_ctx: StreamContext, payload: Value| async move {
            Ok(Box::pin(stream::iter([Ok(payload)])) as HandlerStream)
        });
        assert!(router.lookup("echo").is_some());
        assert!(router.lookup("unknown").is_none());
    }
}
