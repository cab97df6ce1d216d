//! The `greetings` route.
//!
//! ## Structure
//!
//! - [`generator`] - greeting composition
//! - [`monitor`] - the reverse health subscription toward the caller
//! - [`race`] - couples the two: first unhealthy sample wins over the
//!   next scheduled element

mod generator;
mod monitor;
mod race;

use std::sync::Arc;
use std::time::Duration;

use hail_wire::{
    GREETINGS_ROUTE, GreetingRequest, HandlerStream, Router, StreamContext,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Stream-response handler for the `greetings` route.
pub struct GreetingService {
    cadence: Duration,
    cap: usize,
}

impl GreetingService {
    pub fn new(cadence: Duration, cap: usize) -> Self {
        Self { cadence, cap }
    }

    /// Registers the service on `router` under [`GREETINGS_ROUTE`].
    pub fn register(self, router: Router) -> Router {
        let service = Arc::new(self);
        router.register(GREETINGS_ROUTE, move |ctx: StreamContext, payload: Value| {
            let service = Arc::clone(&service);
            async move { service.greet(ctx, payload).await }
        })
    }

    async fn greet(&self, ctx: StreamContext, payload: Value) -> hail_wire::Result<HandlerStream> {
        let request = decode_request(&ctx, payload)?;
        tracing::info!(
            stream = ctx.handle.id(),
            principal = ctx.session.principal(),
            name = %request.name,
            "greeting stream opened"
        );

        let (tx, rx) = mpsc::channel(16);
        let unhealthy = monitor::first_unhealthy(ctx.peer.clone());
        tokio::spawn(race::run(
            request.name,
            self.cadence,
            self.cap,
            Arc::clone(&ctx.handle),
            ctx.cancel.clone(),
            unhealthy,
            tx,
        ));

        Ok(Box::pin(ReceiverStream::new(rx)) as HandlerStream)
    }
}

/// An empty request body falls back to greeting the authenticated
/// principal, so a bare call on the route greets the caller.
fn decode_request(ctx: &StreamContext, payload: Value) -> hail_wire::Result<GreetingRequest> {
    if payload.is_null() {
        return Ok(GreetingRequest::new(ctx.session.principal()));
    }
    Ok(serde_json::from_value(payload)?)
}
