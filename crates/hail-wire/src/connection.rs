//! The duplex connection driver.
//!
//! One driver task per connection owns every piece of per-connection
//! mutable state: the framed transport, the stream-id allocator, the map of
//! outbound streams awaiting responses, and the map of inbound streams
//! being served. Handlers and requesters talk to the driver exclusively
//! through a command channel, so all stream state transitions for a
//! connection are serialized through one task and nothing needs a lock.
//!
//! Stream ids carry role parity - the connection initiator allocates odd
//! ids, the acceptor even ids - so either peer can open streams toward the
//! other without coordination.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::frame::{ErrorCode, Frame, FrameCodec, InteractionMode};
use crate::message::Credentials;
use crate::router::{Router, StreamContext};
use crate::session::{Authenticate, Session};
use crate::stream::StreamHandle;

/// Declared metadata encoding for setup frames.
const METADATA_MIME: &str = "application/json";

/// Bound on commands queued toward a driver and on elements buffered per
/// outbound stream.
const COMMAND_BUFFER: usize = 64;
const STREAM_BUFFER: usize = 16;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    fn first_stream_id(self) -> u64 {
        match self {
            Role::Initiator => 1,
            Role::Acceptor => 2,
        }
    }
}

enum Command {
    OpenStream {
        route: String,
        mode: InteractionMode,
        payload: Value,
        resp_tx: mpsc::Sender<Result<Value>>,
        opened: oneshot::Sender<u64>,
    },
    EmitData {
        stream: u64,
        payload: Value,
    },
    FinishStream {
        stream: u64,
        outcome: Result<()>,
    },
    CancelOutbound {
        stream: u64,
    },
}

/// Cheap handle for opening outbound streams over an established
/// connection. Clones share the connection.
#[derive(Clone)]
pub struct Requester {
    cmd_tx: mpsc::Sender<Command>,
}

impl Requester {
    /// Issues a stream-response request on `route` and returns the response
    /// stream. Dropping the stream before it completes cancels the remote
    /// stream.
    pub async fn request_stream<R>(&self, route: &str, request: &R) -> Result<ResponseStream>
    where
        R: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(request)?;
        let (resp_tx, resp_rx) = mpsc::channel(STREAM_BUFFER);
        let (opened_tx, opened_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::OpenStream {
                route: route.to_owned(),
                mode: InteractionMode::StreamResponse,
                payload,
                resp_tx,
                opened: opened_tx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        let stream = opened_rx.await.map_err(|_| Error::ConnectionClosed)?;
        Ok(ResponseStream {
            stream,
            rx: resp_rx,
            cmd_tx: self.cmd_tx.clone(),
            finished: false,
        })
    }
}

/// Response elements of one outbound stream, in emission order.
///
/// Ends after the peer's terminal frame: a normal end of stream on
/// `Complete`, one `Err` element on `Error`. Dropping it early sends a
/// cancel frame so the remote stream is torn down rather than orphaned.
pub struct ResponseStream {
    stream: u64,
    rx: mpsc::Receiver<Result<Value>>,
    cmd_tx: mpsc::Sender<Command>,
    finished: bool,
}

impl ResponseStream {
    pub fn stream_id(&self) -> u64 {
        self.stream
    }
}

impl Stream for ResponseStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = ready!(self.rx.poll_recv(cx));
        if next.is_none() {
            self.finished = true;
        }
        Poll::Ready(next)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cmd_tx.try_send(Command::CancelOutbound { stream: self.stream });
        }
    }
}

/// An established, authenticated duplex connection.
pub struct Connection {
    session: Arc<Session>,
    requester: Requester,
    driver: JoinHandle<Result<()>>,
}

impl Connection {
    /// Client side of the handshake: sends the setup frame and waits for
    /// the acceptor's verdict, then starts the connection driver.
    ///
    /// `router` serves the streams the peer initiates toward us, such as
    /// the reverse health channel.
    pub async fn initiate<T>(io: T, credentials: Credentials, router: Arc<Router>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = Framed::new(io, FrameCodec::new());
        framed
            .send(Frame::Setup {
                mime: METADATA_MIME.to_owned(),
                credentials: credentials.clone(),
            })
            .await?;

        match framed.next().await {
            Some(Ok(Frame::Accept { connection_id })) => {
                let session = Arc::new(Session::new(connection_id, credentials.username));
                Ok(Self::spawn(framed, session, router, Role::Initiator))
            }
            Some(Ok(Frame::Reject { reason })) => Err(Error::Auth { reason }),
            Some(Ok(other)) => Err(Error::Protocol {
                reason: format!("expected handshake verdict, got `{}` frame", other.name()),
            }),
            Some(Err(e)) => Err(e),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Server side of the handshake: authentication is all-or-nothing and
    /// happens exactly once, before any stream is routed. On rejection the
    /// connection is torn down without ever reaching the router.
    pub async fn accept<T>(
        io: T,
        authenticator: Arc<dyn Authenticate>,
        router: Arc<Router>,
    ) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = Framed::new(io, FrameCodec::new());
        match framed.next().await {
            Some(Ok(Frame::Setup { credentials, .. })) => {
                match authenticator.authenticate(&credentials) {
                    Ok(principal) => {
                        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
                        framed.send(Frame::Accept { connection_id }).await?;
                        let session = Arc::new(Session::new(connection_id, principal));
                        Ok(Self::spawn(framed, session, router, Role::Acceptor))
                    }
                    Err(e) => {
                        framed
                            .send(Frame::Reject {
                                reason: e.to_string(),
                            })
                            .await?;
                        Err(e)
                    }
                }
            }
            Some(Ok(other)) => Err(Error::Protocol {
                reason: format!("first frame must be setup, got `{}` frame", other.name()),
            }),
            Some(Err(e)) => Err(e),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn spawn<T>(
        framed: Framed<T, FrameCodec>,
        session: Arc<Session>,
        router: Arc<Router>,
        role: Role,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let requester = Requester { cmd_tx };
        let driver = ConnectionDriver {
            framed,
            session: Arc::clone(&session),
            router,
            requester: requester.clone(),
            cmd_rx,
            next_stream_id: role.first_stream_id(),
            outbound: HashMap::new(),
            inbound: HashMap::new(),
        };
        Self {
            session,
            requester,
            driver: tokio::spawn(driver.run()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn requester(&self) -> Requester {
        self.requester.clone()
    }

    /// Resolves once the peer closes the connection or the transport
    /// faults.
    pub async fn closed(self) -> Result<()> {
        match self.driver.await {
            Ok(result) => result,
            Err(e) => Err(Error::Channel {
                context: format!("connection driver aborted: {e}"),
            }),
        }
    }
}

struct InboundEntry {
    cancel: CancellationToken,
    mode: InteractionMode,
}

struct ConnectionDriver<T> {
    framed: Framed<T, FrameCodec>,
    session: Arc<Session>,
    router: Arc<Router>,
    requester: Requester,
    cmd_rx: mpsc::Receiver<Command>,
    next_stream_id: u64,
    outbound: HashMap<u64, mpsc::Sender<Result<Value>>>,
    inbound: HashMap<u64, InboundEntry>,
}

impl<T> ConnectionDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.teardown();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(frame).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        tracing::debug!(
                            connection = self.session.connection_id(),
                            "peer closed the connection"
                        );
                        return Ok(());
                    }
                },
                cmd = self.cmd_rx.recv() => {
                    // The driver holds its own requester clone, so the
                    // channel outlives every external handle.
                    if let Some(cmd) = cmd {
                        self.on_command(cmd).await?;
                    }
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Request {
                stream,
                route,
                mode,
                payload,
            } => self.dispatch(stream, route, mode, payload).await,
            Frame::Data { stream, payload } => {
                let Some(tx) = self.outbound.get(&stream) else {
                    // In-flight elements racing our cancel frame; expected.
                    tracing::trace!(stream, "dropping data frame for inactive stream");
                    return Ok(());
                };
                if tx.send(Ok(payload)).await.is_err() {
                    self.outbound.remove(&stream);
                    self.framed.send(Frame::Cancel { stream }).await?;
                }
                Ok(())
            }
            Frame::Complete { stream } => {
                self.outbound.remove(&stream);
                Ok(())
            }
            Frame::Error {
                stream,
                code,
                message,
            } => {
                if let Some(tx) = self.outbound.remove(&stream) {
                    let _ = tx.send(Err(Error::Remote { code, message })).await;
                }
                Ok(())
            }
            Frame::Cancel { stream } => {
                if let Some(entry) = self.inbound.remove(&stream) {
                    entry.cancel.cancel();
                }
                Ok(())
            }
            Frame::Setup { .. } | Frame::Accept { .. } | Frame::Reject { .. } => {
                Err(Error::Protocol {
                    reason: format!(
                        "`{}` frame after the handshake completed",
                        frame.name()
                    ),
                })
            }
        }
    }

    async fn dispatch(
        &mut self,
        stream: u64,
        route: String,
        mode: InteractionMode,
        payload: Value,
    ) -> Result<()> {
        let Some(handler) = self.router.lookup(&route) else {
            tracing::warn!(stream, %route, "request for unknown route");
            return self
                .framed
                .send(Frame::Error {
                    stream,
                    code: ErrorCode::RouteNotFound,
                    message: format!("no handler registered for route `{route}`"),
                })
                .await;
        };

        let cancel = CancellationToken::new();
        self.inbound.insert(
            stream,
            InboundEntry {
                cancel: cancel.clone(),
                mode,
            },
        );
        let ctx = StreamContext {
            session: Arc::clone(&self.session),
            peer: self.requester.clone(),
            handle: Arc::new(StreamHandle::new(stream)),
            cancel,
        };
        tokio::spawn(run_handler(
            handler,
            ctx,
            payload,
            mode,
            self.requester.cmd_tx.clone(),
        ));
        Ok(())
    }

    async fn on_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::OpenStream {
                route,
                mode,
                payload,
                resp_tx,
                opened,
            } => {
                let stream = self.next_stream_id;
                self.next_stream_id += 2;
                self.outbound.insert(stream, resp_tx);
                let _ = opened.send(stream);
                self.framed
                    .send(Frame::Request {
                        stream,
                        route,
                        mode,
                        payload,
                    })
                    .await
            }
            Command::EmitData { stream, payload } => {
                if self.inbound.contains_key(&stream) {
                    self.framed.send(Frame::Data { stream, payload }).await
                } else {
                    // Stream was cancelled between generation and emission;
                    // the element is discarded, never delivered late.
                    Ok(())
                }
            }
            Command::FinishStream { stream, outcome } => {
                let Some(entry) = self.inbound.remove(&stream) else {
                    return Ok(());
                };
                if entry.mode == InteractionMode::FireAndForget {
                    return Ok(());
                }
                match outcome {
                    Ok(()) => self.framed.send(Frame::Complete { stream }).await,
                    Err(e) => {
                        self.framed
                            .send(Frame::Error {
                                stream,
                                code: e.code(),
                                message: e.to_string(),
                            })
                            .await
                    }
                }
            }
            Command::CancelOutbound { stream } => {
                if self.outbound.remove(&stream).is_some() {
                    self.framed.send(Frame::Cancel { stream }).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Resolves every pending stream on connection loss, as one step:
    /// inbound handlers observe cancellation, outbound consumers observe
    /// `ConnectionClosed`.
    fn teardown(&mut self) {
        for (_, entry) in self.inbound.drain() {
            entry.cancel.cancel();
        }
        for (_, tx) in self.outbound.drain() {
            let _ = tx.try_send(Err(Error::ConnectionClosed));
        }
    }
}

/// Bridges one handler invocation onto the wire: forwards elements in
/// order, emits exactly one terminal frame, and keeps the stream handle's
/// state in step.
async fn run_handler(
    handler: Arc<dyn crate::router::RouteHandler>,
    ctx: StreamContext,
    payload: Value,
    mode: InteractionMode,
    cmd_tx: mpsc::Sender<Command>,
) {
    let stream = ctx.handle.id();
    let handle = Arc::clone(&ctx.handle);
    let cancel = ctx.cancel.clone();

    let mut output = match handler.handle(ctx, payload).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(stream, error = %e, "handler refused the request");
            handle.fail();
            let _ = cmd_tx
                .send(Command::FinishStream {
                    stream,
                    outcome: Err(e),
                })
                .await;
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // The peer cancelled (or the connection died); no terminal
                // frame is owed to anyone.
                handle.cancel();
                return;
            }
            item = output.next() => match item {
                Some(Ok(value)) => {
                    if mode == InteractionMode::FireAndForget {
                        continue;
                    }
                    if cmd_tx
                        .send(Command::EmitData { stream, payload: value })
                        .await
                        .is_err()
                    {
                        handle.fail();
                        return;
                    }
                    if mode == InteractionMode::SingleResponse {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(stream, error = %e, "handler stream failed");
                    handle.fail();
                    let _ = cmd_tx
                        .send(Command::FinishStream {
                            stream,
                            outcome: Err(e),
                        })
                        .await;
                    return;
                }
                None => break,
            },
        }
    }

    // A handle already cancelled by its producer stays cancelled; the
    // output toward the peer still completes normally either way.
    handle.complete();
    let _ = cmd_tx
        .send(Command::FinishStream {
            stream,
            outcome: Ok(()),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::HandlerStream;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticAuth;

    impl Authenticate for StaticAuth {
        fn authenticate(&self, credentials: &Credentials) -> Result<String> {
            if credentials.username == "jlong" && credentials.secret == "pw" {
                Ok(credentials.username.clone())
            } else {
                Err(Error::Auth {
                    reason: "bad credentials".into(),
                })
            }
        }
    }

    fn echo_router() -> Arc<Router> {
        Arc::new(Router::new().register(
            "echo",
            |ctx: StreamContext, payload: Value| async move {
                let principal = ctx.session.principal().to_owned();
                Ok(Box::pin(stream::iter([
                    Ok(payload),
                    Ok(json!({ "principal": principal })),
                ])) as HandlerStream)
            },
        ))
    }

    #[tokio::test]
    async fn handshake_then_stream_roundtrip() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(Connection::accept(
            server_io,
            Arc::new(StaticAuth),
            echo_router(),
        ));
        let client = Connection::initiate(
            client_io,
            Credentials::new("jlong", "pw"),
            Arc::new(Router::new()),
        )
        .await
        .unwrap();
        assert_eq!(client.session().principal(), "jlong");
        server.await.unwrap().unwrap();

        let mut responses = client
            .requester()
            .request_stream("echo", &json!({ "ping": 1 }))
            .await
            .unwrap();

        let first = responses.next().await.unwrap().unwrap();
        assert_eq!(first, json!({ "ping": 1 }));
        let second = responses.next().await.unwrap().unwrap();
        assert_eq!(second, json!({ "principal": "jlong" }));
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn rejected_handshake_never_dispatches() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dispatched);
        let router = Arc::new(Router::new().register(
            "greetings",
            move |_ctx: StreamContext, _payload: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Box::pin(stream::empty()) as HandlerStream) }
            },
        ));

        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(Connection::accept(server_io, Arc::new(StaticAuth), router));
        let client = Connection::initiate(
            client_io,
            Credentials::new("jlong", "wrong"),
            Arc::new(Router::new()),
        )
        .await;

        assert!(matches!(client, Err(Error::Auth { .. })));
        assert!(matches!(server.await.unwrap(), Err(Error::Auth { .. })));
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_route_yields_terminal_error_frame() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(Connection::accept(
            server_io,
            Arc::new(StaticAuth),
            echo_router(),
        ));
        let client = Connection::initiate(
            client_io,
            Credentials::new("jlong", "pw"),
            Arc::new(Router::new()),
        )
        .await
        .unwrap();
        server.await.unwrap().unwrap();

        let mut responses = client
            .requester()
            .request_stream("unknown", &Value::Null)
            .await
            .unwrap();

        match responses.next().await.unwrap() {
            Err(Error::Remote {
                code: ErrorCode::RouteNotFound,
                ..
            }) => {}
            other => panic!("expected route error, got {other:?}"),
        }
        assert!(responses.next().await.is_none());

        // The error was terminal for that stream only; the connection still
        // serves other routes.
        let mut ok = client
            .requester()
            .request_stream("echo", &json!("still alive"))
            .await
            .unwrap();
        assert_eq!(ok.next().await.unwrap().unwrap(), json!("still alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_response_stream_cancels_the_remote_handler() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&cancelled);
        let router = Arc::new(Router::new().register(
            "ticker",
            move |ctx: StreamContext, _payload: Value| {
                let observed = Arc::clone(&observed);
                async move {
                    let (tx, rx) = mpsc::channel(4);
                    tokio::spawn(async move {
                        let mut interval = tokio::time::interval(Duration::from_secs(10));
                        let mut n = 0u64;
                        loop {
                            tokio::select! {
                                biased;
                                () = ctx.cancel.cancelled() => {
                                    observed.fetch_add(1, Ordering::SeqCst);
                                    return;
                                }
                                _ = interval.tick() => {
                                    n += 1;
                                    if tx.send(Ok(json!(n))).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    });
                    Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
                        as HandlerStream)
                }
            },
        ));

        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(Connection::accept(server_io, Arc::new(StaticAuth), router));
        let client = Connection::initiate(
            client_io,
            Credentials::new("jlong", "pw"),
            Arc::new(Router::new()),
        )
        .await
        .unwrap();
        server.await.unwrap().unwrap();

        let mut responses = client
            .requester()
            .request_stream("ticker", &Value::Null)
            .await
            .unwrap();
        responses.next().await.unwrap().unwrap();
        responses.next().await.unwrap().unwrap();
        drop(responses);

        // Give the cancel frame time to cross the wire.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
