use std::convert::Infallible;
use thiserror::Error;
use wpkit_http::ApiError;

/// Failure of the cookie + nonce login handshake.
///
/// Rendered messages never contain the password or a nonce.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The nonce page URL could not be derived from the admin URL
    #[error("invalid nonce URL: {0}")]
    InvalidNonceUrl(#[from] url::ParseError),

    /// The login request or the redirect to the nonce page failed
    #[error("login request failed: {0}")]
    Login(#[source] ApiError<Infallible>),

    /// The login form answered without redirecting, e.g. a wrong password
    #[error("login was rejected by {url}")]
    LoginRejected { url: String },

    /// The nonce page was served but held no nonce
    #[error("no nonce found in the response from {url}")]
    MissingNonce { url: String },

    /// The handshake task panicked or was aborted
    #[error("handshake task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use wpkit_http::TransportError;

    #[test]
    fn missing_nonce_renders() {
        let e = HandshakeError::MissingNonce {
            url: "https://example.com/wp-admin/post-new.php".into(),
        };
        assert_eq!(
            e.to_string(),
            "no nonce found in the response from https://example.com/wp-admin/post-new.php"
        );
    }

    #[test]
    fn login_rejection_names_the_page_only() {
        let e = HandshakeError::LoginRejected {
            url: "https://example.com/wp-login.php".into(),
        };
        assert_eq!(e.to_string(), "login was rejected by https://example.com/wp-login.php");
    }

    #[test]
    fn login_error_keeps_source() {
        let e = HandshakeError::Login(ApiError::Connection(TransportError::Overloaded));
        assert!(e.to_string().starts_with("login request failed"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
