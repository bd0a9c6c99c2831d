//! Authentication hooks of the execution pipeline.
//!
//! An [`Authenticator`] pairs a [`RequestAdapter`], which decorates every
//! outgoing request with credentials, with an optional [`RequestRetrier`],
//! which is consulted when the server rejects a request with 401 or 403 and
//! may refresh credentials before the request is sent again.
//!
//! A request lineage (the original send plus its retry) is retried at most
//! once; the second rejection is returned to the caller as-is.

use crate::client::HttpClient;
use crate::request::RequestBuilder;
use crate::response::HttpResponse;
use async_trait::async_trait;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Decorates outgoing requests with credentials.
pub trait RequestAdapter: Send + Sync {
    /// Return `request` with credentials attached.
    ///
    /// Called for every attempt, so a retry picks up refreshed credentials.
    fn adapt(&self, request: RequestBuilder) -> RequestBuilder;
}

/// Verdict of a [`RequestRetrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Adapt and send the request again
    Retry,
    /// Hand the rejection to the caller
    DoNotRetry,
}

/// A rejected exchange, as seen by a [`RequestRetrier`].
#[derive(Debug)]
pub struct Rejection<'a> {
    /// The request as it was sent, after adaptation
    pub request: &'a RequestBuilder,
    /// The 401/403 response
    pub response: &'a HttpResponse,
    /// Client sharing the transport and cookie jar, without the authenticator
    pub client: &'a HttpClient,
}

/// Decides whether a rejected request should be sent again.
#[async_trait]
pub trait RequestRetrier: Send + Sync {
    async fn retry(&self, rejection: Rejection<'_>) -> RetryDecision;
}

/// Adapter plus optional retrier attached to an [`HttpClient`].
#[derive(Clone)]
pub struct Authenticator {
    adapter: Arc<dyn RequestAdapter>,
    retrier: Option<Arc<dyn RequestRetrier>>,
}

impl Authenticator {
    /// Adapter only; rejections are never retried.
    #[must_use]
    pub fn new(adapter: impl RequestAdapter + 'static) -> Self {
        Self {
            adapter: Arc::new(adapter),
            retrier: None,
        }
    }

    /// Attach a retrier.
    #[must_use]
    pub fn with_retrier(mut self, retrier: impl RequestRetrier + 'static) -> Self {
        self.retrier = Some(Arc::new(retrier));
        self
    }

    /// One shared value acting as both adapter and retrier.
    #[must_use]
    pub fn shared<T>(auth: Arc<T>) -> Self
    where
        T: RequestAdapter + RequestRetrier + 'static,
    {
        Self {
            adapter: auth.clone(),
            retrier: Some(auth),
        }
    }

    pub(crate) fn adapt(&self, request: RequestBuilder) -> RequestBuilder {
        self.adapter.adapt(request)
    }

    pub(crate) fn retrier(&self) -> Option<&dyn RequestRetrier> {
        self.retrier.as_deref()
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("retrier", &self.retrier.is_some())
            .finish_non_exhaustive()
    }
}

/// Whether `status` means the credentials were not accepted.
#[must_use]
pub fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Single-use retry permit of one request lineage.
#[derive(Debug, Default)]
pub(crate) struct RetryGuard {
    used: bool,
}

impl RetryGuard {
    /// Take the permit. Returns `false` if it was already taken.
    pub(crate) fn try_consume(&mut self) -> bool {
        !std::mem::replace(&mut self.used, true)
    }
}
