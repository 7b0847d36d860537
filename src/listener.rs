//! On-demand sampling over a local unix stream socket.
//!
//! Protocol: a client connects and sends any bytes (the content is
//! ignored). The listener asks the multiplexer for a fresh sample through a
//! one-shot reply channel, writes the value back as 8 bytes of
//! little-endian IEEE-754 and closes the connection.
//!
//! The listener never touches the sensor or the log.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::shutdown::ShutdownSignal;

/// Size of an encoded reply on the wire
pub const REPLY_LEN: usize = 8;

/// At most this many request bytes are read from a client
pub const REQUEST_BUF_LEN: usize = 128;

/// Permission bits applied to the socket file after bind
pub const SOCKET_MODE: u32 = 0o660;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// One-shot channel on which the multiplexer delivers a demanded sample.
pub type ReplySender = oneshot::Sender<f64>;

/// Sending half of the demand request channel.
pub type DemandSender = mpsc::Sender<ReplySender>;

/// Receiving half of the demand request channel.
pub type DemandReceiver = mpsc::Receiver<ReplySender>;

/// Encode a sample as it goes on the wire.
pub fn encode_reply(value: f64) -> [u8; REPLY_LEN] {
    value.to_le_bytes()
}

/// Decode a sample read from the wire.
pub fn decode_reply(bytes: [u8; REPLY_LEN]) -> f64 {
    f64::from_le_bytes(bytes)
}

/// Errors raised by the listener or by a single connection.
#[derive(Debug)]
pub enum ListenerError {
    /// The socket path could not be cleared or bound
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A read or write on a connection failed
    Io(std::io::Error),

    /// An operation on a connection did not finish in time
    Timeout(&'static str),

    /// The client closed the connection without sending a request
    EmptyRequest,

    /// The multiplexer stopped before answering
    Unavailable,

    /// The daemon closed the connection without a full reply
    NoReply,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { path, source } => {
                write!(f, "Failed to bind {}: {}", path.display(), source)
            }
            ListenerError::Io(e) => write!(f, "Connection I/O error: {}", e),
            ListenerError::Timeout(op) => write!(f, "Connection {} timed out", op),
            ListenerError::EmptyRequest => write!(f, "Client closed without a request"),
            ListenerError::Unavailable => write!(f, "Sampler is not available"),
            ListenerError::NoReply => write!(f, "Connection closed before a full reply"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } => Some(source),
            ListenerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ListenerError {
    fn from(err: std::io::Error) -> Self {
        ListenerError::Io(err)
    }
}

/// Run `fut` under `limit`, naming `op` if it expires.
async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, ListenerError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(ListenerError::from),
        Err(_) => Err(ListenerError::Timeout(op)),
    }
}

/// Removes the socket path when dropped, including when the serving task
/// is aborted.
struct SocketPathGuard {
    path: PathBuf,
}

impl Drop for SocketPathGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Socket removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "Failed to remove socket"),
        }
    }
}

/// Accepts "sample now" requests on a filesystem socket.
pub struct DemandListener {
    listener: UnixListener,
    guard: SocketPathGuard,
    io_timeout: Duration,
}

impl DemandListener {
    /// Bind the socket at `path`, unlinking a stale file there first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>, io_timeout: Duration) -> Result<Self, ListenerError> {
        let path = path.into();
        let bind_err = |path: &Path, source| ListenerError::Bind {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_err(path.as_path(), e)),
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(path.as_path(), e))?;
        // From here on the guard unlinks the path on any early return.
        let guard = SocketPathGuard { path };

        std::fs::set_permissions(&guard.path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(|e| bind_err(guard.path.as_path(), e))?;

        info!(path = %guard.path.display(), "Demand listener bound");

        Ok(Self {
            listener,
            guard,
            io_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Accept connections until `shutdown` fires, forwarding one demand per
    /// connection on `requests`.
    ///
    /// On return the listening socket is closed, in-flight connections are
    /// cancelled and the socket path is unlinked.
    pub async fn serve(self, requests: DemandSender, mut shutdown: ShutdownSignal) -> u64 {
        let DemandListener {
            listener,
            guard,
            io_timeout,
        } = self;
        let mut connections = JoinSet::new();
        let mut accepted: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Demand listener stopping");
                    break;
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            accepted += 1;
                            let requests = requests.clone();
                            connections.spawn(async move {
                                let request_id = Uuid::new_v4();
                                match serve_connection(stream, requests, io_timeout).await {
                                    Ok(value) => {
                                        debug!(%request_id, value, "Demand request answered");
                                    }
                                    Err(e) => {
                                        warn!(%request_id, error = %e, "Dropping demand connection");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        drop(guard);
        connections.shutdown().await;

        info!(accepted, "Demand listener stopped");
        accepted
    }
}

/// Service one client: read its request, obtain a sample, write the reply.
async fn serve_connection(
    mut stream: UnixStream,
    requests: DemandSender,
    io_timeout: Duration,
) -> Result<f64, ListenerError> {
    let mut buf = [0u8; REQUEST_BUF_LEN];
    let n = bounded(io_timeout, "read", stream.read(&mut buf)).await?;
    if n == 0 {
        return Err(ListenerError::EmptyRequest);
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    match timeout(io_timeout, requests.send(reply_tx)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Err(ListenerError::Unavailable),
        Err(_) => return Err(ListenerError::Timeout("request")),
    }

    let value = match timeout(io_timeout, reply_rx).await {
        Ok(Ok(value)) => value,
        Ok(Err(_)) => return Err(ListenerError::Unavailable),
        Err(_) => return Err(ListenerError::Timeout("reply")),
    };

    let reply = encode_reply(value);
    bounded(io_timeout, "write", stream.write_all(&reply)).await?;
    bounded(io_timeout, "shutdown", stream.shutdown()).await?;

    Ok(value)
}

/// Ask a running daemon for a sample.
///
/// Connects to `path`, sends a one byte request and decodes the 8 byte
/// reply. Every step is bounded by `io_timeout`.
pub async fn request_sample(path: impl AsRef<Path>, io_timeout: Duration) -> Result<f64, ListenerError> {
    let mut stream = bounded(io_timeout, "connect", UnixStream::connect(path.as_ref())).await?;
    bounded(io_timeout, "write", stream.write_all(b"?")).await?;

    let mut buf = [0u8; REPLY_LEN];
    match bounded(io_timeout, "read", stream.read_exact(&mut buf)).await {
        Ok(_) => Ok(decode_reply(buf)),
        Err(ListenerError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ListenerError::NoReply)
        }
        Err(e) => Err(e),
    }
}
