//! Plain HTTP request forwarding (non-CONNECT).
//!
//! Absolute-form requests (`GET http://host/path`) are relayed to their
//! destination with a shared outbound client; the destination's status,
//! headers and body come back verbatim. The body is streamed, never buffered.

use super::error::{ProxyError, ProxyResult};
use super::tls::client_tls_config;
use super::ProxyBody;
use http::header::PROXY_AUTHORIZATION;
use http::HeaderMap;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use tracing::debug;

/// Outbound HTTP(S) client shared by all forwarded requests.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
}

impl Forwarder {
    /// Build the outbound client, trusting the system root certificates.
    pub fn new() -> ProxyResult<Self> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(client_tls_config()?)
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .build(connector);

        Ok(Self { client })
    }

    /// Forward `req` to the destination named by its absolute URI.
    ///
    /// A failed round trip yields [`ProxyError::Forward`] carrying the
    /// underlying error text. No retry is attempted.
    pub async fn forward(&self, mut req: Request<Incoming>) -> ProxyResult<Response<ProxyBody>> {
        // Addressed to this proxy, not to the destination.
        req.headers_mut().remove(PROXY_AUTHORIZATION);

        debug!("HTTP proxy request {} {}", req.method(), req.uri());

        let upstream = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Forward(error_chain(&e)))?;

        let (parts, body) = upstream.into_parts();
        let mut response = Response::new(body.boxed());
        *response.status_mut() = parts.status;
        copy_headers(response.headers_mut(), &parts.headers);
        Ok(response)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder").finish_non_exhaustive()
    }
}

/// Append every value of every header in `src` to `dst`, in order.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name, value.clone());
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, SET_COOKIE};
    use http::HeaderValue;

    #[test]
    fn test_copy_headers_preserves_multiple_values() {
        let mut src = HeaderMap::new();
        src.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        src.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        src.append(SET_COOKIE, HeaderValue::from_static("c=3"));
        src.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let mut dst = HeaderMap::new();
        copy_headers(&mut dst, &src);

        let cookies: Vec<_> = dst.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2", "c=3"]);
        assert_eq!(dst.get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(dst.len(), src.len());
    }

    #[test]
    fn test_copy_headers_does_not_overwrite_existing() {
        let mut src = HeaderMap::new();
        src.append("x-trace", HeaderValue::from_static("upstream"));

        let mut dst = HeaderMap::new();
        dst.append("x-trace", HeaderValue::from_static("local"));
        copy_headers(&mut dst, &src);

        let values: Vec<_> = dst.get_all("x-trace").iter().collect();
        assert_eq!(values, vec!["local", "upstream"]);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = ProxyError::Io(inner);
        assert!(error_chain(&outer).contains("refused"));
    }

    #[tokio::test]
    async fn test_forwarder_creation() {
        assert!(Forwarder::new().is_ok());
    }
}
