use crate::response::HttpResponse;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used wherever an underlying cause is type-erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a request URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Not a URL at all
    ParseError,
    /// No host, e.g. `https:///wp-json`
    MissingAuthority,
    /// Relative URL with no scheme
    MissingScheme,
}

/// Failure of the transport round trip.
///
/// Carried by [`ApiError::Connection`]. Nothing in this enum implies that the
/// server processed the request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The caller cancelled the request through its [`Progress`](crate::Progress) handle
    #[error("request cancelled")]
    Cancelled,

    /// The exchange outlived the configured deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// DNS, connect, reset or HTTP protocol failure
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    #[error("TLS failure: {0}")]
    Tls(#[source] BoxError),

    /// The decompressed body grew past `max_body_size`
    #[error("response body of at least {actual} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Too many exchanges queued on this client
    #[error("request queue is full")]
    Overloaded,

    /// The queue worker is gone
    #[error("HTTP service has shut down")]
    ServiceClosed,
}

impl TransportError {
    /// Whether this failure was caused by caller cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<hyper::Error> for TransportError {
    fn from(source: hyper::Error) -> Self {
        Self::Transport(source.into())
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(source: hyper_util::client::legacy::Error) -> Self {
        Self::Transport(source.into())
    }
}

/// Failure to turn a [`RequestBuilder`](crate::RequestBuilder) into bytes on the wire.
///
/// Always raised before anything is sent.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncodingError {
    #[error("malformed request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form body: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// A caller-supplied body encoder returned an error
    #[error("custom body encoder: {0}")]
    Encoder(#[source] BoxError),

    /// The byte source of a multipart field could not be read
    #[error("multipart field '{name}' unreadable: {source}")]
    MultipartSource {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A body was attached to a method that does not carry one
    #[error("{method} requests cannot carry a body")]
    BodyNotAllowed { method: http::Method },

    /// The request URL was refused; match on `kind`, `reason` is for logs
    #[error("bad URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// The scheme is not allowed by the client's [`TransportSecurity`](crate::TransportSecurity)
    #[error("scheme '{scheme}' refused: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

/// Failure to construct an [`HttpClient`](crate::HttpClient).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// TLS roots or crypto provider could not be set up
    #[error("TLS initialization failed: {0}")]
    Tls(#[source] BoxError),

    /// A client-wide default header (including `User-Agent`) is invalid
    #[error("Invalid default header '{name}': {source}")]
    InvalidHeader {
        name: String,
        #[source]
        source: http::Error,
    },
}

/// Outcome of a failed API call.
///
/// The variant set is closed: callers match on it without a wildcard arm.
/// `E` is the endpoint-specific error type recovered from response bodies
/// via [`ApiResultExt::map_unacceptable_status_code_error`](crate::ApiResultExt::map_unacceptable_status_code_error).
#[derive(Error, Debug)]
pub enum ApiError<E> {
    /// The transport failed or the request was cancelled
    #[error("Connection failed: {0}")]
    Connection(#[from] TransportError),

    /// The server answered with a status outside the acceptable set
    #[error("Unacceptable status code {}", .response.status())]
    UnacceptableStatusCode {
        /// Full response, body untouched
        response: HttpResponse,
    },

    /// A response body recognized as an endpoint error
    #[error("Endpoint error: {0}")]
    EndpointError(E),

    /// The request could not be encoded; nothing was sent
    #[error("Request encoding failed: {0}")]
    RequestEncodingFailure(#[from] EncodingError),

    /// An accepted response body could not be decoded into the expected model
    #[error("Unparsable response (HTTP {}): {source}", .response.status())]
    UnparsableResponse {
        /// Full response, body untouched
        response: HttpResponse,
        /// Decoder failure
        #[source]
        source: BoxError,
    },
}

impl<E> ApiError<E> {
    /// The response attached to this error, if the server answered at all.
    #[must_use]
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::UnacceptableStatusCode { response } | Self::UnparsableResponse { response, .. } => {
                Some(response)
            }
            Self::Connection(_) | Self::EndpointError(_) | Self::RequestEncodingFailure(_) => None,
        }
    }

    /// Whether this is a `Connection` error caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Connection(err) if err.is_cancelled())
    }
}
