//! Protocol core for the hail greeting service.
//!
//! A single duplex connection carries many logical streams in both
//! directions: either peer may open a stream-response request toward the
//! other. This crate owns everything both sides of that connection share:
//!
//! - [`frame`] - the wire frames and the length-delimited JSON codec
//! - [`message`] - credentials and the greeting/health payload types
//! - [`session`] - the handshake result and the [`Authenticate`] seam
//! - [`router`] - the static route table and the [`RouteHandler`] contract
//! - [`stream`] - per-stream lifecycle bookkeeping ([`StreamHandle`])
//! - [`connection`] - the connection driver: handshake, stream
//!   multiplexing, dispatch, and the [`Requester`] used to open outbound
//!   streams
//!
//! The server and client binaries build on this crate; neither reimplements
//! any protocol detail.

pub mod connection;
pub mod error;
pub mod frame;
pub mod message;
pub mod router;
pub mod session;
pub mod stream;

pub use connection::{Connection, Requester, ResponseStream};
pub use error::{Error, Result};
pub use frame::{ErrorCode, Frame, FrameCodec, InteractionMode};
pub use message::{Credentials, GreetingRequest, GreetingResponse, HealthSample};
pub use router::{HandlerStream, RouteHandler, Router, StreamContext};
pub use session::{Authenticate, Session};
pub use stream::{StreamHandle, StreamState};

/// Route served by the greeting server (client to server, stream-response).
pub const GREETINGS_ROUTE: &str = "greetings";

/// Route served by the client and requested by the server as the reverse
/// health monitor channel (server to client, stream-response).
pub const HEALTH_ROUTE: &str = "health";
