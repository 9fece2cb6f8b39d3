//! Proxy authentication gate.
//!
//! Classifies the `Proxy-Authorization` header of an inbound request against
//! the configured [`CredentialSet`]. The gate performs no I/O: callers turn an
//! [`AuthRejection`] into a `407 Proxy Authentication Required` response (see
//! [`ProxyError::Unauthorized`](super::error::ProxyError::Unauthorized)).
//!
//! # Matching
//!
//! The header payload decodes into a [`LoginPair`]. An entry without a
//! username only matches a login without a username; an entry with a
//! username only matches a login carrying the same username. Secrets and
//! usernames are compared exactly (case-sensitive).
//!
//! # Example
//!
//! ```
//! use autocert_proxy::proxy::auth::{AuthRejection, CredentialSet};
//! use http::HeaderValue;
//!
//! let creds = CredentialSet::parse("alice:secret;sharedtoken");
//! // "alice:secret"
//! let header = HeaderValue::from_static("Basic YWxpY2U6c2VjcmV0");
//! assert!(creds.authorize(Some(&header)).is_ok());
//! assert_eq!(creds.authorize(None), Err(AuthRejection::Required));
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::HeaderValue;
use thiserror::Error;

/// Value of the `Proxy-Authenticate` challenge sent with every rejection.
pub const PROXY_AUTHENTICATE_CHALLENGE: &str = "Basic realm=proxy";

/// Reason a request failed the authentication gate.
///
/// The display text is sent to the client as the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    /// No header, or a scheme other than `Basic`.
    #[error("Basic authorization required")]
    Required,

    /// The `Basic` payload is not valid base64 / UTF-8.
    #[error("Invalid Proxy-Authorization header")]
    InvalidHeader,

    /// Well-formed credentials that match no configured entry.
    #[error("Login and/or password doesn't match")]
    Mismatch,
}

/// One configured credential: a bare shared secret or a username/secret pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    username: Option<String>,
    secret: String,
}

impl Credential {
    /// A bare shared secret with no username.
    pub fn token(secret: impl Into<String>) -> Self {
        Self {
            username: None,
            secret: secret.into(),
        }
    }

    /// A username/secret pair.
    pub fn user(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            secret: secret.into(),
        }
    }

    /// Parse a single `secret` or `user:secret` entry.
    ///
    /// The entry is split at the first `:`, so secrets may contain colons.
    fn parse(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((user, secret)) => Self::user(user, secret),
            None => Self::token(entry),
        }
    }

    fn matches(&self, login: &LoginPair) -> bool {
        match (&self.username, &login.username) {
            (None, None) => self.secret == login.secret,
            (Some(user), Some(login_user)) => user == login_user && self.secret == login.secret,
            _ => false,
        }
    }
}

/// Credentials decoded from a `Proxy-Authorization: Basic` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPair {
    /// Present when the payload contains a `:`.
    pub username: Option<String>,
    /// Everything after the first `:`, or the whole payload.
    pub secret: String,
}

impl LoginPair {
    /// Decode a `Proxy-Authorization` header value.
    pub fn from_header(value: &HeaderValue) -> Result<Self, AuthRejection> {
        let value = value.to_str().map_err(|_| AuthRejection::InvalidHeader)?;

        let (scheme, payload) = value.split_once(' ').ok_or(AuthRejection::Required)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthRejection::Required);
        }

        let decoded = STANDARD
            .decode(payload)
            .map_err(|_| AuthRejection::InvalidHeader)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthRejection::InvalidHeader)?;

        Ok(match decoded.split_once(':') {
            Some((user, secret)) => Self {
                username: Some(user.to_string()),
                secret: secret.to_string(),
            },
            None => Self {
                username: None,
                secret: decoded,
            },
        })
    }
}

/// Immutable set of accepted proxy credentials.
///
/// An empty set disables authentication entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    entries: Vec<Credential>,
}

impl CredentialSet {
    /// Parse the `entry(;entry)*` grammar, where `entry` is `secret` or
    /// `user:secret`. Empty entries are skipped.
    pub fn parse(spec: &str) -> Self {
        let entries = spec
            .split(';')
            .filter(|entry| !entry.is_empty())
            .map(Credential::parse)
            .collect();
        Self { entries }
    }

    /// Whether authentication is disabled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of configured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Classify a request's `Proxy-Authorization` header.
    pub fn authorize(&self, header: Option<&HeaderValue>) -> Result<(), AuthRejection> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let login = LoginPair::from_header(header.ok_or(AuthRejection::Required)?)?;

        if self.entries.iter().any(|entry| entry.matches(&login)) {
            Ok(())
        } else {
            Err(AuthRejection::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(payload: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(payload))).unwrap()
    }

    #[test]
    fn test_parse_mixed_entries() {
        let creds = CredentialSet::parse("alice:secret;token;bob:pa:ss");
        assert_eq!(creds.len(), 3);
        assert_eq!(
            creds.entries,
            vec![
                Credential::user("alice", "secret"),
                Credential::token("token"),
                Credential::user("bob", "pa:ss"),
            ]
        );
    }

    #[test]
    fn test_parse_skips_empty_entries() {
        let creds = CredentialSet::parse(";alice:secret;;");
        assert_eq!(creds.len(), 1);
        assert!(CredentialSet::parse("").is_empty());
    }

    #[test]
    fn test_empty_set_authorizes_everything() {
        let creds = CredentialSet::default();
        assert_eq!(creds.authorize(None), Ok(()));
        assert_eq!(creds.authorize(Some(&basic("anything"))), Ok(()));
    }

    #[test]
    fn test_user_pair_accepted() {
        let creds = CredentialSet::parse("alice:secret");
        assert_eq!(creds.authorize(Some(&basic("alice:secret"))), Ok(()));
    }

    #[test]
    fn test_wrong_password_rejected() {
        let creds = CredentialSet::parse("alice:secret");
        assert_eq!(
            creds.authorize(Some(&basic("alice:wrong"))),
            Err(AuthRejection::Mismatch)
        );
    }

    #[test]
    fn test_missing_header_rejected() {
        let creds = CredentialSet::parse("alice:secret");
        let err = creds.authorize(None).unwrap_err();
        assert_eq!(err, AuthRejection::Required);
        assert!(err.to_string().contains("authorization required"));
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        let creds = CredentialSet::parse("alice:secret");
        let bearer = HeaderValue::from_static("Bearer abc123");
        assert_eq!(creds.authorize(Some(&bearer)), Err(AuthRejection::Required));

        let no_payload = HeaderValue::from_static("Basic");
        assert_eq!(
            creds.authorize(Some(&no_payload)),
            Err(AuthRejection::Required)
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let creds = CredentialSet::parse("alice:secret");
        let header =
            HeaderValue::from_str(&format!("basic {}", STANDARD.encode("alice:secret"))).unwrap();
        assert_eq!(creds.authorize(Some(&header)), Ok(()));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let creds = CredentialSet::parse("alice:secret");
        let header = HeaderValue::from_static("Basic !!!not-base64!!!");
        assert_eq!(
            creds.authorize(Some(&header)),
            Err(AuthRejection::InvalidHeader)
        );
    }

    #[test]
    fn test_invalid_utf8_payload_rejected() {
        let creds = CredentialSet::parse("alice:secret");
        let header =
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode([0xff, 0xfe]))).unwrap();
        assert_eq!(
            creds.authorize(Some(&header)),
            Err(AuthRejection::InvalidHeader)
        );
    }

    #[test]
    fn test_bare_token_matches_only_bare_login() {
        let creds = CredentialSet::parse("sharedtoken");
        assert_eq!(creds.authorize(Some(&basic("sharedtoken"))), Ok(()));
        assert_eq!(
            creds.authorize(Some(&basic(":sharedtoken"))),
            Err(AuthRejection::Mismatch)
        );
        assert_eq!(
            creds.authorize(Some(&basic("anyone:sharedtoken"))),
            Err(AuthRejection::Mismatch)
        );
    }

    #[test]
    fn test_user_entry_does_not_match_bare_login() {
        let creds = CredentialSet::parse("alice:secret");
        assert_eq!(
            creds.authorize(Some(&basic("secret"))),
            Err(AuthRejection::Mismatch)
        );
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let creds = CredentialSet::parse("alice:secret");
        assert_eq!(
            creds.authorize(Some(&basic("Alice:secret"))),
            Err(AuthRejection::Mismatch)
        );
        assert_eq!(
            creds.authorize(Some(&basic("alice:SECRET"))),
            Err(AuthRejection::Mismatch)
        );
    }

    #[test]
    fn test_entry_order_irrelevant() {
        let a = CredentialSet::parse("alice:secret;token");
        let b = CredentialSet::parse("token;alice:secret");
        for payload in ["alice:secret", "token", "alice:token", "nope"] {
            assert_eq!(
                a.authorize(Some(&basic(payload))),
                b.authorize(Some(&basic(payload)))
            );
        }
    }

    #[test]
    fn test_login_pair_splits_at_first_colon() {
        let login = LoginPair::from_header(&basic("bob:pa:ss")).unwrap();
        assert_eq!(login.username.as_deref(), Some("bob"));
        assert_eq!(login.secret, "pa:ss");
    }
}
