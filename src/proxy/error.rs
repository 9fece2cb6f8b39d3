//! Error types for proxy operations.
//!
//! This module defines structured error types for the proxy:
//! - Authentication rejections (407)
//! - Destination errors (dial failure, timeout, forward failure)
//! - Capability errors (connection hijacking unavailable)
//! - Server errors (binding, TLS setup)
//!
//! Request-scoped variants render into a plain-text response through
//! [`ProxyError::into_response`].

use super::auth::{AuthRejection, PROXY_AUTHENTICATE_CHALLENGE};
use super::{full_body, ProxyBody};
use http::header::{CONTENT_TYPE, PROXY_AUTHENTICATE};
use http::{HeaderValue, Response, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request failed the authentication gate.
    #[error("{0}")]
    Unauthorized(AuthRejection),

    /// Invalid CONNECT request.
    #[error("Invalid CONNECT request: {0}")]
    InvalidConnect(String),

    /// Dialing the CONNECT destination timed out.
    #[error("dial tcp {addr}: i/o timeout after {timeout:?}")]
    Timeout {
        /// The destination authority.
        addr: String,
        /// The configured dial timeout.
        timeout: Duration,
    },

    /// Failed to connect to the CONNECT destination.
    #[error("dial tcp {addr}: {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The outbound HTTP round trip failed.
    #[error("{0}")]
    Forward(String),

    /// The inbound transport cannot hand over its raw connection.
    #[error("Hijacking not supported")]
    HijackUnsupported,

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Failed to bind a listener socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl From<AuthRejection> for ProxyError {
    fn from(rejection: AuthRejection) -> Self {
        ProxyError::Unauthorized(rejection)
    }
}

impl ProxyError {
    /// Status code reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized(_) => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProxyError::InvalidConnect(_) => StatusCode::BAD_REQUEST,
            ProxyError::Timeout { .. }
            | ProxyError::UpstreamConnect { .. }
            | ProxyError::Forward(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as a plain-text response.
    ///
    /// Authentication rejections carry the `Proxy-Authenticate` challenge.
    pub fn into_response(self) -> Response<ProxyBody> {
        let mut response = Response::new(full_body(format!("{}\n", self)));
        *response.status_mut() = self.status();

        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if matches!(self, ProxyError::Unauthorized(_)) {
            headers.insert(
                PROXY_AUTHENTICATE,
                HeaderValue::from_static(PROXY_AUTHENTICATE_CHALLENGE),
            );
        }
        response
    }

    /// Whether this error is a routine peer disconnect rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
            ),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_canceled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::InvalidConnect("missing authority".to_string());
        assert!(err.to_string().contains("missing authority"));
    }

    #[test]
    fn test_upstream_connect_error() {
        let err = ProxyError::UpstreamConnect {
            addr: "api.example.com:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("api.example.com:443"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unauthorized_response_carries_challenge() {
        let response = ProxyError::from(AuthRejection::Required).into_response();
        assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(
            response.headers().get(PROXY_AUTHENTICATE).unwrap(),
            "Basic realm=proxy"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::HijackUnsupported.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Forward("refused".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::Timeout {
                addr: "10.255.255.1:443".into(),
                timeout: Duration::from_secs(10),
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::InvalidConnect("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_non_auth_response_has_no_challenge() {
        let response = ProxyError::Forward("boom".into()).into_response();
        assert!(response.headers().get(PROXY_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
        assert!(proxy_err.is_disconnect());
    }
}
