//! Endpoint error domains of the two WordPress APIs.
//!
//! Each enumeration carries a stable domain string and integer codes so
//! errors can be reported to existing consumers that key on them.

use crate::response::HttpResponse;
use serde::Deserialize;
use thiserror::Error;

/// A family of endpoint errors with stable numeric codes.
pub trait ErrorDomain {
    const DOMAIN: &'static str;

    fn code(&self) -> i64;
}

/// Failure kinds of the WordPress.com REST API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestApiError {
    #[error("invalid input")]
    InvalidInput,
    #[error("invalid token")]
    InvalidToken,
    #[error("authorization required")]
    AuthorizationRequired,
    #[error("upload failed")]
    UploadFailed,
    #[error("request serialization failed")]
    RequestSerializationFailed,
    #[error("response serialization failed")]
    ResponseSerializationFailed,
    #[error("too many requests")]
    TooManyRequests,
    #[error("unknown error")]
    Unknown,
}

impl ErrorDomain for RestApiError {
    const DOMAIN: &'static str = "WordPressKit.WordPressComRestApiError";

    fn code(&self) -> i64 {
        match self {
            Self::InvalidInput => 0,
            Self::InvalidToken => 1,
            Self::AuthorizationRequired => 2,
            Self::UploadFailed => 3,
            Self::RequestSerializationFailed => 4,
            Self::ResponseSerializationFailed => 5,
            Self::TooManyRequests => 6,
            Self::Unknown => 7,
        }
    }
}

impl RestApiError {
    /// Kind for a server error code such as `invalid_token`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_input" => Self::InvalidInput,
            "invalid_token" => Self::InvalidToken,
            "authorization_required" | "unauthorized" => Self::AuthorizationRequired,
            "upload_error" => Self::UploadFailed,
            _ => Self::Unknown,
        }
    }
}

/// A REST error recognized in a response body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} ({code}): {message}")]
pub struct RestEndpointError {
    pub kind: RestApiError,
    /// Server error code, e.g. `invalid_token`; empty when the body had none
    pub code: String,
    /// Server message; empty when the body had none
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorEntry {
    error: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    List { errors: Vec<ErrorEntry> },
    Single(ErrorEntry),
}

impl RestEndpointError {
    const THROTTLE_MARKER: &'static str = "Limit reached";

    /// Recognize a REST error in a 400..=500 response.
    ///
    /// Accepts `{"error","message"}` and `{"errors":[{"error","message"}, ..]}`
    /// (first entry wins). A throttled request answers with an HTML page
    /// containing `Limit reached`. Any other body in range is `Unknown`.
    /// Statuses outside the range are not recognized.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Option<Self> {
        if !(400..=500).contains(&response.status().as_u16()) {
            return None;
        }

        let Ok(value) = serde_json::from_slice::<serde_json::Value>(response.body()) else {
            if response.text().contains(Self::THROTTLE_MARKER) {
                return Some(Self {
                    kind: RestApiError::TooManyRequests,
                    code: "too_many_requests".to_owned(),
                    message: Self::THROTTLE_MARKER.to_owned(),
                });
            }
            return Some(Self::unknown());
        };

        let entry = match serde_json::from_value::<ErrorBody>(value) {
            Ok(ErrorBody::List { errors }) => errors.into_iter().next(),
            Ok(ErrorBody::Single(entry)) => Some(entry),
            Err(_) => None,
        };
        Some(entry.map_or_else(Self::unknown, |entry| Self {
            kind: RestApiError::from_code(&entry.error),
            code: entry.error,
            message: entry.message,
        }))
    }

    fn unknown() -> Self {
        Self {
            kind: RestApiError::Unknown,
            code: String::new(),
            message: String::new(),
        }
    }
}

impl ErrorDomain for RestEndpointError {
    const DOMAIN: &'static str = RestApiError::DOMAIN;

    fn code(&self) -> i64 {
        self.kind.code()
    }
}

/// Failure kinds of the self-hosted XML-RPC API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmlRpcApiError {
    #[error("unacceptable HTTP status code")]
    HttpErrorStatusCode,
    #[error("request serialization failed")]
    RequestSerializationFailed,
    #[error("response serialization failed")]
    ResponseSerializationFailed,
    #[error("unknown error")]
    Unknown,
}

impl ErrorDomain for XmlRpcApiError {
    const DOMAIN: &'static str = "WordPressKit.WordPressOrgXMLRPCApiError";

    fn code(&self) -> i64 {
        match self {
            Self::HttpErrorStatusCode => 0,
            Self::RequestSerializationFailed => 1,
            Self::ResponseSerializationFailed => 2,
            Self::Unknown => 3,
        }
    }
}

impl XmlRpcApiError {
    /// XML-RPC faults travel with status 200, so any error status is a transport-level failure.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Option<Self> {
        let status = response.status();
        (status.is_client_error() || status.is_server_error()).then_some(Self::HttpErrorStatusCode)
    }
}
