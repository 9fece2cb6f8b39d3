//! Dual listener bootstrap and request dispatch.
//!
//! This module provides the proxy server that:
//! - Answers HTTP-01 challenges and redirects everything else on the
//!   plaintext listener
//! - Terminates TLS on the proxy listener with a per-handshake certificate
//! - Gates every proxy request through the authentication check
//! - Dispatches `CONNECT` to the tunnel engine and all other methods to the
//!   forwarder
//!
//! # Architecture
//!
//! Both listeners are bound up front by [`ProxyServer::bind`]; a bind failure
//! is returned to the caller and nothing is served. [`ProxyServer::run`] then
//! drives both accept loops until the shutdown signal fires. Each accepted
//! connection is handled in its own Tokio task using hyper's HTTP/1.1 server
//! (with upgrade support on the TLS side, needed for `CONNECT`).
//!
//! # Example
//!
//! ```ignore
//! use autocert_proxy::proxy::{ProxyConfig, ProxyServer};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::bind(ProxyConfig::from_config(&config), certs, shutdown_rx).await?;
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::auth::CredentialSet;
use super::error::{ProxyError, ProxyResult};
use super::forward::Forwarder;
use super::tls::{create_tls_acceptor, HostPolicy, PolicyResolver};
use super::tunnel::open_tunnel;
use super::{full_body, ProxyBody};
use crate::certs::{CertificateManager, HTTP01_CHALLENGE_PREFIX};
use crate::config::Config;
use http::header::{CONTENT_TYPE, HOST, LOCATION, PROXY_AUTHORIZATION};
use http::{HeaderValue, Method, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Plaintext listener address (challenges and redirects).
    pub http_addr: SocketAddr,
    /// TLS listener address (proxy traffic).
    pub https_addr: SocketAddr,
    /// The single hostname certificates are served for.
    pub host_policy: HostPolicy,
    /// Accepted proxy credentials; empty disables authentication.
    pub credentials: CredentialSet,
    /// Dial timeout for `CONNECT` destinations.
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    /// Derive the server configuration from a validated [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            http_addr: config.listen.http_addr,
            https_addr: config.listen.https_addr,
            host_policy: HostPolicy::new(config.acme.host.clone()),
            credentials: config.credential_set(),
            connect_timeout: config.tunnel.connect_timeout(),
        }
    }
}

/// Read-only state shared by every request on the TLS listener.
#[derive(Debug, Clone)]
pub struct ProxyState {
    credentials: Arc<CredentialSet>,
    forwarder: Forwarder,
    connect_timeout: Duration,
}

impl ProxyState {
    /// Build the shared state, including the outbound HTTP client.
    pub fn new(credentials: CredentialSet, connect_timeout: Duration) -> ProxyResult<Self> {
        Ok(Self {
            credentials: Arc::new(credentials),
            forwarder: Forwarder::new()?,
            connect_timeout,
        })
    }
}

/// Handler for the plaintext listener.
///
/// Serves pending HTTP-01 key authorizations for the allowed host and
/// redirects every other `GET`/`HEAD` to the TLS endpoint. Nothing received
/// here is ever proxied.
#[derive(Clone)]
pub struct ChallengeResponder {
    certs: Arc<dyn CertificateManager>,
    policy: HostPolicy,
    https_port: u16,
}

impl ChallengeResponder {
    /// Create a responder redirecting to `https_port`.
    pub fn new(certs: Arc<dyn CertificateManager>, policy: HostPolicy, https_port: u16) -> Self {
        Self {
            certs,
            policy,
            https_port,
        }
    }

    /// Produce the response for one plaintext request.
    pub fn respond<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        let host = request_host(req);

        if let Some(token) = req.uri().path().strip_prefix(HTTP01_CHALLENGE_PREFIX) {
            return self.challenge(host, token);
        }

        if req.method() != Method::GET && req.method() != Method::HEAD {
            return text_response(StatusCode::BAD_REQUEST, "Use HTTPS");
        }

        let host = host.unwrap_or_else(|| self.policy.allowed_host());
        let target = if self.https_port == 443 {
            format!("https://{}{}", host, path_and_query(req))
        } else {
            format!("https://{}:{}{}", host, self.https_port, path_and_query(req))
        };

        match HeaderValue::from_str(&target) {
            Ok(location) => {
                trace!("Redirecting to {}", target);
                let mut response = text_response(StatusCode::FOUND, "");
                response.headers_mut().insert(LOCATION, location);
                response
            }
            Err(_) => text_response(StatusCode::BAD_REQUEST, "Invalid Host"),
        }
    }

    fn challenge(&self, host: Option<&str>, token: &str) -> Response<ProxyBody> {
        let Some(host) = host else {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        };

        if let Err(e) = self.policy.check(host) {
            debug!("Ignoring HTTP-01 challenge: {}", e);
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }

        match self.certs.http01_key_authorization(token) {
            Some(key_auth) => {
                info!("Answering HTTP-01 challenge for {}", host);
                text_response(StatusCode::OK, key_auth)
            }
            None => {
                debug!("No pending HTTP-01 challenge for token {:?}", token);
                text_response(StatusCode::NOT_FOUND, "Not Found")
            }
        }
    }
}

impl std::fmt::Debug for ChallengeResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeResponder")
            .field("policy", &self.policy)
            .field("https_port", &self.https_port)
            .finish_non_exhaustive()
    }
}

/// The main proxy server, with both listeners bound.
pub struct ProxyServer {
    http_listener: TcpListener,
    https_listener: TcpListener,
    acceptor: TlsAcceptor,
    state: ProxyState,
    challenges: ChallengeResponder,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind both listeners and prepare TLS termination.
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy configuration.
    /// * `certs` - Certificate collaborator for handshakes and challenges.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if either address cannot be bound.
    pub async fn bind(
        config: ProxyConfig,
        certs: Arc<dyn CertificateManager>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ProxyResult<Self> {
        let http_listener = bind_listener(config.http_addr).await?;
        let https_listener = bind_listener(config.https_addr).await?;
        let https_port = https_listener.local_addr()?.port();

        let resolver = Arc::new(PolicyResolver::new(
            config.host_policy.clone(),
            certs.resolver(),
        ));
        let acceptor = create_tls_acceptor(resolver)?;
        let state = ProxyState::new(config.credentials, config.connect_timeout)?;
        let challenges = ChallengeResponder::new(certs, config.host_policy, https_port);

        Ok(Self {
            http_listener,
            https_listener,
            acceptor,
            state,
            challenges,
            shutdown_rx,
        })
    }

    /// Bound address of the plaintext listener.
    pub fn http_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    /// Bound address of the TLS listener.
    pub fn https_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.https_listener.local_addr()?)
    }

    /// Run both accept loops.
    ///
    /// Returns when the shutdown signal is received (or its sender is
    /// dropped). Connections already in progress keep running on their
    /// own tasks.
    pub async fn run(self) -> ProxyResult<()> {
        let Self {
            http_listener,
            https_listener,
            acceptor,
            state,
            challenges,
            shutdown_rx,
        } = self;

        tokio::join!(
            accept_tls(https_listener, acceptor, state, shutdown_rx.clone()),
            accept_plain(http_listener, challenges, shutdown_rx),
        );

        info!("Proxy shutting down");
        Ok(())
    }
}

async fn bind_listener(addr: SocketAddr) -> ProxyResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: ProxyState,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        trace!("Accepted TLS connection from {}", peer);
                        let acceptor = acceptor.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            let stream = match acceptor.accept(stream).await {
                                Ok(stream) => stream,
                                Err(e) => {
                                    debug!("TLS handshake with {} failed: {}", peer, e);
                                    return;
                                }
                            };
                            if let Err(e) = serve_proxy_connection(stream, state).await {
                                log_connection_error(&e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn accept_plain(
    listener: TcpListener,
    challenges: ChallengeResponder,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        trace!("Accepted plaintext connection from {}", peer);
                        let challenges = challenges.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_plain_connection(stream, challenges).await {
                                log_connection_error(&e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Serve proxy requests on an established (already decrypted) connection.
pub async fn serve_proxy_connection<I>(io: I, state: ProxyState) -> ProxyResult<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { proxy_request(req, state).await }
    });

    // Serve HTTP/1.1 with support for upgrades (needed for CONNECT)
    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Serve the plaintext listener's requests on one connection.
pub async fn serve_plain_connection<I>(io: I, challenges: ChallengeResponder) -> ProxyResult<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let response = challenges.respond(&req);
        async move { Ok::<_, Infallible>(response) }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
        .map_err(ProxyError::from)
}

/// Process a single proxy request.
///
/// Every failure is rendered as a response, so the connection stays usable
/// after a rejection.
pub async fn proxy_request(
    req: Request<Incoming>,
    state: ProxyState,
) -> Result<Response<ProxyBody>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    Ok(dispatch(req, &state).await.unwrap_or_else(|e| {
        debug!("{} {} failed: {}", method, uri, e);
        e.into_response()
    }))
}

async fn dispatch(mut req: Request<Incoming>, state: &ProxyState) -> ProxyResult<Response<ProxyBody>> {
    state
        .credentials
        .authorize(req.headers().get(PROXY_AUTHORIZATION))?;

    if req.method() == Method::CONNECT {
        // HTTPS tunneling via CONNECT
        let authority = req
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_string())
            .ok_or_else(|| ProxyError::InvalidConnect("missing host:port".to_string()))?;
        let hijacker = req.extensions_mut().remove::<OnUpgrade>();
        open_tunnel(hijacker, &authority, state.connect_timeout).await
    } else {
        // Plain HTTP proxying
        state.forwarder.forward(req).await
    }
}

fn log_connection_error(err: &ProxyError) {
    if err.is_disconnect() {
        debug!("Connection ended: {}", err);
    } else {
        warn!("Connection error: {}", err);
    }
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Host the request was addressed to, without any port.
fn request_host<B>(req: &Request<B>) -> Option<&str> {
    req.uri()
        .host()
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(strip_port)
        })
        .filter(|host| !host.is_empty())
}

fn path_and_query<B>(req: &Request<B>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| pq.starts_with('/'))
        .unwrap_or("/")
}

/// Strip a trailing `:port` from a `Host` header value.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rustls::server::{ClientHello, ResolvesServerCert};
    use rustls::sign::CertifiedKey;

    const HOST_NAME: &str = "proxy.example.com";

    #[derive(Debug)]
    struct NoCert;

    impl ResolvesServerCert for NoCert {
        fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
            None
        }
    }

    struct FakeCerts;

    impl CertificateManager for FakeCerts {
        fn resolver(&self) -> Arc<dyn ResolvesServerCert> {
            Arc::new(NoCert)
        }

        fn http01_key_authorization(&self, token: &str) -> Option<String> {
            (token == "tok123").then(|| "tok123.thumbprint".to_string())
        }
    }

    fn responder(https_port: u16) -> ChallengeResponder {
        ChallengeResponder::new(Arc::new(FakeCerts), HostPolicy::new(HOST_NAME), https_port)
    }

    fn request(method: Method, uri: &str, host: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        builder.body(()).unwrap()
    }

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_challenge_answered_for_allowed_host() {
        let req = request(
            Method::GET,
            "/.well-known/acme-challenge/tok123",
            Some("proxy.example.com:80"),
        );
        let response = responder(443).respond(&req);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "tok123.thumbprint");
    }

    #[test]
    fn test_challenge_unknown_token_is_not_found() {
        let req = request(
            Method::GET,
            "/.well-known/acme-challenge/other",
            Some(HOST_NAME),
        );
        assert_eq!(responder(443).respond(&req).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_challenge_for_other_host_is_not_found() {
        let req = request(
            Method::GET,
            "/.well-known/acme-challenge/tok123",
            Some("evil.example.com"),
        );
        assert_eq!(responder(443).respond(&req).status(), StatusCode::NOT_FOUND);

        let req = request(Method::GET, "/.well-known/acme-challenge/tok123", None);
        assert_eq!(responder(443).respond(&req).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_get_redirected_to_https() {
        let req = request(Method::GET, "/some/path?q=1", Some("proxy.example.com:80"));
        let response = responder(443).respond(&req);

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://proxy.example.com/some/path?q=1"
        );
    }

    #[test]
    fn test_redirect_keeps_non_default_port() {
        let req = request(Method::HEAD, "/", Some(HOST_NAME));
        let response = responder(8443).respond(&req);

        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://proxy.example.com:8443/"
        );
    }

    #[test]
    fn test_redirect_without_host_uses_allowed_host() {
        let req = request(Method::GET, "/index.html", None);
        let response = responder(443).respond(&req);

        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://proxy.example.com/index.html"
        );
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let req = request(Method::POST, "/submit", Some(HOST_NAME));
        let response = responder(443).respond(&req);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Use HTTPS");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn test_proxy_config_from_config() {
        let mut config = Config::default();
        config.acme.host = HOST_NAME.to_string();
        config.auth.credentials = Some("alice:secret;token".to_string());
        config.tunnel.connect_timeout_secs = 5;

        let proxy_config = ProxyConfig::from_config(&config);
        assert_eq!(proxy_config.host_policy.allowed_host(), HOST_NAME);
        assert_eq!(proxy_config.credentials.len(), 2);
        assert_eq!(proxy_config.connect_timeout, Duration::from_secs(5));
        assert_eq!(proxy_config.https_addr.port(), 443);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let config = ProxyConfig {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            https_addr: addr,
            host_policy: HostPolicy::new(HOST_NAME),
            credentials: CredentialSet::default(),
            connect_timeout: Duration::from_secs(1),
        };
        let (_tx, rx) = watch::channel(false);

        let result = ProxyServer::bind(config, Arc::new(FakeCerts), rx).await;
        assert!(matches!(result, Err(ProxyError::Bind { addr: a, .. }) if a == addr));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = ProxyConfig {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            https_addr: "127.0.0.1:0".parse().unwrap(),
            host_policy: HostPolicy::new(HOST_NAME),
            credentials: CredentialSet::default(),
            connect_timeout: Duration::from_secs(1),
        };
        let (tx, rx) = watch::channel(false);

        let server = ProxyServer::bind(config, Arc::new(FakeCerts), rx).await.unwrap();
        assert_ne!(server.http_addr().unwrap(), server.https_addr().unwrap());

        let handle = tokio::spawn(server.run());
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
