//! Wire frames and the transport codec.
//!
//! The transport substrate is an ordered, reliable byte stream; frame
//! boundaries come from [`LengthDelimitedCodec`]. Each transport frame
//! carries exactly one [`Frame`], serialized as an internally-tagged JSON
//! object. Multiplexing of logical streams happens above this layer via the
//! `stream` field on every post-handshake frame.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::Error;
use crate::message::Credentials;

/// Upper bound on a single encoded frame. Greeting and health payloads are
/// tiny; anything near this limit is a protocol violation, not real data.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Cardinality contract of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// One request, one response.
    SingleResponse,
    /// One request, many responses.
    StreamResponse,
    /// One request, no response frames at all.
    FireAndForget,
}

/// Error class carried by a terminal error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RouteNotFound,
    Serialization,
    Internal,
}

/// One protocol frame.
///
/// `Setup`/`Accept`/`Reject` appear exactly once per connection, before any
/// stream exists. Everything else is scoped to a logical stream id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on a connection: credentials plus the declared metadata
    /// encoding. Sent by the initiator only.
    Setup { mime: String, credentials: Credentials },
    /// Handshake accepted; the connection id names the new session.
    Accept { connection_id: u64 },
    /// Handshake rejected; the acceptor closes the connection after this.
    Reject { reason: String },
    /// Opens logical stream `stream` on the named route.
    Request {
        stream: u64,
        route: String,
        mode: InteractionMode,
        #[serde(default)]
        payload: Value,
    },
    /// One emitted element of stream `stream`.
    Data { stream: u64, payload: Value },
    /// Terminal marker: the stream completed normally.
    Complete { stream: u64 },
    /// Terminal marker: the stream failed.
    Error {
        stream: u64,
        code: ErrorCode,
        message: String,
    },
    /// The consumer side of `stream` is no longer interested.
    Cancel { stream: u64 },
}

impl Frame {
    /// Short frame name for diagnostics; never includes payload contents.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Setup { .. } => "setup",
            Frame::Accept { .. } => "accept",
            Frame::Reject { .. } => "reject",
            Frame::Request { .. } => "request",
            Frame::Data { .. } => "data",
            Frame::Complete { .. } => "complete",
            Frame::Error { .. } => "error",
            Frame::Cancel { .. } => "cancel",
        }
    }
}

/// [`Frame`] codec over a length-delimited byte transport.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let Some(buf) = self.inner.decode(src)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&buf)?))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        let buf = serde_json::to_vec(&frame)?;
        self.inner.encode(Bytes::from(buf), dst).map_err(Error::from)
    }
}
