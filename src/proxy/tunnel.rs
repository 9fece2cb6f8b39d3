//! HTTP CONNECT tunneling.
//!
//! The flow for an authorized `CONNECT host:port` request is:
//!
//! 1. Check that the inbound transport can hand over its raw connection
//!    ([`Hijacker`]); otherwise answer `500` and create nothing.
//! 2. Dial the destination with a bounded timeout; on failure answer `503`
//!    with the dial error text.
//! 3. Answer `200` and, once the client connection has been taken over,
//!    splice it to the destination with [`relay`].
//!
//! Nothing is written to the client before step 3 succeeds, so a failed
//! tunnel always yields exactly one well-formed error response.
//!
//! The tunnel is a pass-through: the proxy never inspects tunneled bytes.

use super::error::{ProxyError, ProxyResult};
use super::{empty_body, ProxyBody};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Dial timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability to take exclusive raw control of an inbound connection.
///
/// The tunnel engine depends only on this trait, so tests can hand it an
/// in-memory stream instead of a real socket.
pub trait Hijacker: Send + 'static {
    /// The raw bidirectional byte stream handed over.
    type Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Resolve once the connection has been released by the HTTP layer.
    fn hijack(self) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

/// hyper releases the connection after the `200` response has been flushed.
impl Hijacker for OnUpgrade {
    type Conn = TokioIo<Upgraded>;

    async fn hijack(self) -> io::Result<Self::Conn> {
        self.await.map(TokioIo::new).map_err(io::Error::other)
    }
}

/// Establish a CONNECT tunnel to `authority`.
///
/// `hijacker` is `None` when the inbound transport cannot release its
/// connection. On success the returned `200` response must be sent before
/// the hijacker resolves; the relay runs on background tasks.
pub async fn open_tunnel<H: Hijacker>(
    hijacker: Option<H>,
    authority: &str,
    connect_timeout: Duration,
) -> ProxyResult<Response<ProxyBody>> {
    let hijacker = hijacker.ok_or(ProxyError::HijackUnsupported)?;
    let (host, port) = parse_host_port(authority)?;

    debug!("CONNECT request to {}:{}", host, port);

    let upstream = dial(&host, port, connect_timeout).await?;

    debug!("Connected to upstream {}:{}", host, port);

    tokio::spawn(async move {
        match hijacker.hijack().await {
            Ok(client) => {
                relay(client, upstream);
            }
            // `upstream` drops here, closing the dialed socket.
            Err(e) => warn!("HTTP upgrade failed for {}:{}: {}", host, port, e),
        }
    });

    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// Connect to `host:port`, giving up after `timeout`.
///
/// Dropping the timed-out connect future releases any half-open socket.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> ProxyResult<TcpStream> {
    let addr = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    connect_within(addr, timeout, TcpStream::connect((host, port))).await
}

async fn connect_within<S>(
    addr: String,
    timeout: Duration,
    connect: impl Future<Output = io::Result<S>>,
) -> ProxyResult<S> {
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            addr,
            message: e.to_string(),
        }),
        Err(_) => Err(ProxyError::Timeout { addr, timeout }),
    }
}

/// Splice two connections together.
///
/// Spawns one task per direction. Each task copies until its source reaches
/// end-of-stream or fails, then raises a shared close signal. The sibling
/// task stops copying as soon as it sees the signal, even if its own source
/// is still open. Both tasks shut down the destination they write to and drop
/// their halves, so once either side closes, both connections are released.
///
/// Returns the handles of the client→upstream and upstream→client tasks. A
/// task stopped by the close signal returns [`io::ErrorKind::ConnectionAborted`].
pub fn relay<C, U>(client: C, upstream: U) -> (JoinHandle<io::Result<u64>>, JoinHandle<io::Result<u64>>)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);
    let closed = Arc::new(watch::Sender::new(false));

    let outbound = tokio::spawn(transfer(
        client_read,
        upstream_write,
        closed.clone(),
        "client->upstream",
    ));
    let inbound = tokio::spawn(transfer(
        upstream_read,
        client_write,
        closed,
        "upstream->client",
    ));

    (outbound, inbound)
}

async fn transfer<R, W>(
    mut source: R,
    mut destination: W,
    closed: Arc<watch::Sender<bool>>,
    direction: &'static str,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut closed_rx = closed.subscribe();

    let result = tokio::select! {
        result = tokio::io::copy(&mut source, &mut destination) => result,
        _ = closed_rx.wait_for(|closed| *closed) => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "other direction closed",
        )),
    };

    closed.send_replace(true);

    // Either peer may already be gone.
    destination.shutdown().await.ok();
    drop(destination);
    drop(source);

    match &result {
        Ok(bytes) => trace!(bytes, "{} finished", direction),
        Err(e) => debug!("{} ended: {}", direction, e),
    }
    result
}

/// Parse host:port string from CONNECT authority.
///
/// Examples:
/// - `api.example.com:443` -> ("api.example.com", 443)
/// - `api.example.com` -> ("api.example.com", 443) (default port)
/// - `[::1]:8443` -> ("::1", 8443)
pub fn parse_host_port(authority: &str) -> ProxyResult<(String, u16)> {
    if authority.is_empty() {
        return Err(ProxyError::InvalidConnect(
            "Missing authority in CONNECT request".into(),
        ));
    }

    if let Some((host, port_str)) = authority.rsplit_once(':') {
        // Check if this is an IPv6 address like [::1]:443
        if host.starts_with('[') && host.ends_with(']') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ProxyError::InvalidConnect(format!("Invalid port: {}", port_str)))?;
            return Ok((host[1..host.len() - 1].to_string(), port));
        }

        let port = port_str
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidConnect(format!("Invalid port: {}", port_str)))?;
        Ok((host.to_string(), port))
    } else {
        Ok((authority.to_string(), 443))
    }
}
