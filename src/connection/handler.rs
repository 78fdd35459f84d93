//! Connection Handler Module
//!
//! This module drives one client connection through the request/reply
//! cycle. Each client gets its own local task; all of them share the
//! server state on a single thread, and none of them holds a borrow of
//! that state across an `.await`.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │        AwaitingLength        │◄─────────────┐
//!                │  need 4 bytes: i32 length    │              │
//!                └──────────────┬───────────────┘              │
//!                               │ 2 <= length <= max           │
//!                               ▼                              │
//!                ┌──────────────────────────────┐              │
//!                │         AwaitingBody         │              │
//!                │  need `length` bytes         │              │
//!                └──────────────┬───────────────┘              │
//!                               │ dispatch                     │
//!                               ▼                              │
//!                ┌──────────────────────────────┐   flushed    │
//!                │         SendingReply         │──────────────┘
//!                │  write status/enc/len/data   │
//!                └──────────────┬───────────────┘
//!                               │ after END
//!                               ▼
//!                            closed
//! ```
//!
//! A frame that cannot be delimited (bad length), an unknown opcode or an
//! oversize reply drops the connection without a reply.
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`; partial frames simply wait
//! for the next read, and several pipelined frames in one read are served
//! one after the other.

use crate::commands::{DispatchError, Request};
use crate::protocol::{hexdump, Opcode};
use crate::server::{ClientId, SharedState};
use crate::storage::unix_now;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Size of the request length prefix
const LENGTH_PREFIX: usize = 4;

/// Smallest valid request: the opcode alone
const MIN_REQUEST_SIZE: usize = 2;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Bytes of a rejected frame included in logs
const DUMP_BYTES: usize = 64;

/// Where a connection is in the request/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the 4-byte length prefix
    AwaitingLength,
    /// Waiting for `len` bytes of opcode and payload
    AwaitingBody { len: usize },
    /// Writing the serialized reply; `close` is set after END
    SendingReply { close: bool },
}

/// Per-connection size caps.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_request_size: usize,
    pub max_response_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_request_size: 4 * 1024 * 1024,
            max_response_size: 4 * 1024 * 1024,
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("request length {len} outside 2..={max}")]
    BadLength { len: i64, max: usize },

    #[error("dropping request: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("reply of {len} bytes exceeds the {max} byte limit")]
    ReplyTooLarge { len: usize, max: usize },

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    /// The client stream (TCP or unix socket)
    stream: S,

    /// Registry id of this client
    id: ClientId,

    /// Peer description (for logging)
    peer: String,

    /// Server state shared by all connections on this thread
    state: SharedState,

    /// Current position in the request/reply cycle
    phase: State,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Serialized reply being sent
    reply: BytesMut,

    limits: ConnectionLimits,

    /// Flips to `true` when the server is stopping
    shutdown: watch::Receiver<bool>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `id` - The id this client was registered under
    /// * `peer` - The client's address, for logs
    /// * `state` - Shared server state
    /// * `limits` - Request and reply size caps
    /// * `shutdown` - Server stop notification
    pub fn new(
        stream: S,
        id: ClientId,
        peer: String,
        state: SharedState,
        limits: ConnectionLimits,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            id,
            peer,
            state,
            phase: State::AwaitingLength,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            reply: BytesMut::new(),
            limits,
            shutdown,
        }
    }

    /// Runs the connection until the client leaves, sends END, breaks the
    /// protocol, or the server stops while the client is idle.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.peer, "Client disconnected"),
            Err(ConnectionError::IoError(e))
                if e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.phase {
                State::AwaitingLength => {
                    if self.buffer.len() >= LENGTH_PREFIX {
                        let len = self.buffer.get_i32_le() as i64;
                        self.phase = State::AwaitingBody {
                            len: self.check_length(len)?,
                        };
                    } else if !self.read_more().await? {
                        return Ok(());
                    }
                }
                State::AwaitingBody { len } => {
                    if self.buffer.len() >= len {
                        let body = self.buffer.split_to(len).freeze();
                        let close = self.process(body)?;
                        self.phase = State::SendingReply { close };
                    } else if !self.read_more().await? {
                        return Err(ConnectionError::UnexpectedEof);
                    }
                }
                State::SendingReply { close } => {
                    self.stream.write_all(&self.reply).await?;
                    self.stream.flush().await?;
                    trace!(client = %self.peer, bytes = self.reply.len(), "Sent reply");
                    self.reply.clear();
                    self.touch();

                    if close {
                        return Ok(());
                    }
                    self.phase = State::AwaitingLength;
                }
            }
        }
    }

    fn check_length(&self, len: i64) -> Result<usize, ConnectionError> {
        let max = self.limits.max_request_size;
        if len < MIN_REQUEST_SIZE as i64 || len > max as i64 {
            return Err(ConnectionError::BadLength { len, max });
        }
        Ok(len as usize)
    }

    /// Executes one request and stages its reply. Returns whether the
    /// connection closes after the reply is sent.
    fn process(&mut self, body: Bytes) -> Result<bool, ConnectionError> {
        let request = match Request::decode(body.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    client = %self.peer,
                    error = %e,
                    dump = %hexdump(&body, DUMP_BYTES),
                    "Malformed request"
                );
                return Err(e.into());
            }
        };

        let reply = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            state.engine.set_now(unix_now());
            state.handler.dispatch(&mut state.engine, &request)
        };

        let len = reply.encoded_len();
        if len > self.limits.max_response_size {
            return Err(ConnectionError::ReplyTooLarge {
                len,
                max: self.limits.max_response_size,
            });
        }
        reply.serialize_into(&mut self.reply);

        Ok(request.opcode == Opcode::End)
    }

    /// Reads more data into the buffer. Returns `false` on a clean close:
    /// the peer hung up, or the server is stopping and no request is pending.
    async fn read_more(&mut self) -> Result<bool, ConnectionError> {
        loop {
            let idle = self.phase == State::AwaitingLength && self.buffer.is_empty();
            if idle && *self.shutdown.borrow() {
                return Ok(false);
            }

            tokio::select! {
                n = self.stream.read_buf(&mut self.buffer) => {
                    let n = n?;
                    if n == 0 {
                        return Ok(false);
                    }
                    trace!(client = %self.peer, bytes = n, "Read data");
                    self.touch();
                    return Ok(true);
                }
                changed = self.shutdown.changed(), if idle => {
                    if changed.is_err() {
                        // Server state is gone; nothing left to serve
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn touch(&self) {
        self.state.borrow_mut().clients.touch(self.id, Instant::now());
    }
}

/// Serves a client until it disconnects, then unregisters it.
///
/// The client must already be registered under `id`. Unregistering also
/// happens if the task is aborted by the idle reaper.
pub async fn handle_connection<S>(
    stream: S,
    id: ClientId,
    peer: String,
    state: SharedState,
    limits: ConnectionLimits,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = ClientGuard {
        id,
        state: state.clone(),
    };
    let handler = ConnectionHandler::new(stream, id, peer, state, limits, shutdown);
    let _ = handler.run().await;
}

/// Removes the client from the registry when its task ends, however it ends.
struct ClientGuard {
    id: ClientId,
    state: SharedState,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.unregister(self.id);
        }
    }
}
