#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP execution core of the `wpkit` WordPress client
//!
//! This crate turns a [`RequestBuilder`] description into a buffered
//! [`HttpResponse`] or a typed [`ApiError`]:
//! - Deferred JSON, form, XML and multipart bodies, encoded at send time
//! - Acceptable status ranges (2xx by default)
//! - Progress reporting and cancellation through a shared [`Progress`] handle
//! - Pluggable authentication with a single transparent retry on 401/403
//! - Session cookies, secure redirects and transparent decompression
//! - Automatic TLS via rustls (HTTPS only by default)
//!
//! # Example
//!
//! ```ignore
//! use wpkit_http::{ApiResultExt, HttpClient, RequestBuilder, RestEndpointError, SendOptions};
//!
//! let client = HttpClient::builder().user_agent("my-app/1.0").build()?;
//!
//! let request = RequestBuilder::get("https://example.com/wp-json")
//!     .append_path("wp/v2/posts")
//!     .query("per_page", "10");
//! let posts: Vec<Post> = client
//!     .send(&request, &SendOptions::new())
//!     .await
//!     .map_unacceptable_status_code_error(RestEndpointError::from_response)
//!     .decode_success()?;
//! ```

mod auth;
mod body;
mod builder;
mod client;
mod combinators;
mod config;
mod domains;
mod error;
mod layers;
pub mod multipart;
mod progress;
mod request;
mod response;
mod status;
pub mod tls;

pub use auth::{Authenticator, Rejection, RequestAdapter, RequestRetrier, RetryDecision, is_rejection};
pub use body::RequestBody;
pub use builder::HttpClientBuilder;
pub use client::{HttpClient, SendOptions};
pub use combinators::ApiResultExt;
pub use config::{
    DEFAULT_USER_AGENT, HttpClientConfig, RedirectConfig, TlsRootConfig, TransportSecurity,
};
pub use domains::{ErrorDomain, RestApiError, RestEndpointError, XmlRpcApiError};
pub use error::{ApiError, BoxError, BuildError, EncodingError, InvalidUriKind, TransportError};
pub use layers::{
    CookieJar, CookieJarFuture, CookieJarLayer, CookieJarService, DefaultHeadersLayer,
    DefaultHeadersService, SecureRedirectPolicy,
};
pub use multipart::MultipartField;
pub use progress::{Progress, ProgressSnapshot, ProgressState};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};
pub use status::AcceptableStatus;
