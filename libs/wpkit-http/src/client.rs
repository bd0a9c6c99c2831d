use crate::auth::{Authenticator, Rejection, RetryDecision, RetryGuard, is_rejection};
use crate::body::RequestBody;
use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::{ApiError, TransportError};
use crate::layers::CookieJar;
use crate::progress::Progress;
use crate::request::RequestBuilder;
use crate::response::{HttpResponse, ResponseBody, collect_body};
use crate::status::AcceptableStatus;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

/// Future of one exchange through the middleware stack.
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, TransportError>> + Send>>;

/// Shared queue in front of the middleware stack; clones feed the same worker.
pub type BufferedService = Buffer<Request<RequestBody>, ServiceFuture>;

/// Per-call options of [`HttpClient::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    acceptable: AcceptableStatus,
    progress: Option<Progress>,
}

impl SendOptions {
    /// Accept 2xx, no progress reporting.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of statuses treated as success.
    #[must_use]
    pub fn acceptable(mut self, acceptable: impl Into<AcceptableStatus>) -> Self {
        self.acceptable = acceptable.into();
        self
    }

    /// Report transfer progress to, and honour cancellation of, `progress`.
    #[must_use]
    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Executes [`RequestBuilder`] descriptions against a WordPress site.
///
/// The pipeline of one call is: adapt (when an authenticator is set), encode,
/// send through the tower stack, collect the body, classify the status. A
/// 401/403 answer is offered to the authenticator's retrier once; when it
/// asks for a retry the request is adapted and sent again.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap (internal channel
/// clone); clones share the connection pool, the buffer and the cookie jar.
///
/// # Example
///
/// ```ignore
/// use wpkit_http::{HttpClient, RequestBuilder, SendOptions};
///
/// let client = HttpClient::new()?;
/// let response = client
///     .send::<()>(&RequestBuilder::get("https://example.com/wp-json"), &SendOptions::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) cookies: Option<CookieJar>,
    pub(crate) authenticator: Option<Authenticator>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .field("cookie_store", &self.cookies.is_some())
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Client with default settings: HTTPS only, cookies kept, no authentication.
    ///
    /// # Errors
    /// See [`HttpClientBuilder::build`].
    pub fn new() -> Result<Self, crate::error::BuildError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Session cookies, when the cookie store is enabled.
    #[must_use]
    pub fn cookie_jar(&self) -> Option<&CookieJar> {
        self.cookies.as_ref()
    }

    /// A clone sharing transport and cookies but sending requests unadapted.
    ///
    /// Used for authentication handshakes, which must not recurse into the
    /// authenticator that triggered them.
    #[must_use]
    pub fn without_authenticator(&self) -> Self {
        Self {
            authenticator: None,
            ..self.clone()
        }
    }

    /// Execute `request` and return the buffered response.
    ///
    /// # Errors
    /// - [`ApiError::RequestEncodingFailure`] if the request cannot be encoded (nothing is sent)
    /// - [`ApiError::Connection`] on transport failure, timeout or cancellation
    /// - [`ApiError::UnacceptableStatusCode`] if the final status is outside `options.acceptable`
    pub async fn send<E>(
        &self,
        request: &RequestBuilder,
        options: &SendOptions,
    ) -> Result<HttpResponse, ApiError<E>> {
        let progress = options.progress.as_ref();
        if progress.is_some_and(Progress::is_cancelled) {
            return Err(TransportError::Cancelled.into());
        }

        let response = match &self.authenticator {
            None => self.exchange(request, progress).await?,
            Some(auth) => self.exchange_authenticated(auth, request, progress).await?,
        };

        if let Some(progress) = progress {
            progress.finish();
            if progress.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
        }

        if options.acceptable.contains(response.status()) {
            Ok(response)
        } else {
            tracing::debug!(
                status = %response.status(),
                url = ?response.url(),
                "response status outside the acceptable set"
            );
            Err(ApiError::UnacceptableStatusCode { response })
        }
    }

    /// One encode-send-collect round trip, raced against cancellation.
    async fn exchange<E>(
        &self,
        request: &RequestBuilder,
        progress: Option<&Progress>,
    ) -> Result<HttpResponse, ApiError<E>> {
        let mut http_request = request.build(self.transport_security).await?;
        if let Some(progress) = progress {
            http_request.body_mut().report_to(progress.clone());
        }
        let transfer = self.transfer(http_request, progress);

        let result = match progress {
            Some(progress) => tokio::select! {
                biased;
                () = progress.cancelled() => Err(TransportError::Cancelled),
                result = transfer => result,
            },
            None => transfer.await,
        };
        result.map_err(ApiError::from)
    }

    async fn transfer(
        &self,
        request: Request<RequestBody>,
        progress: Option<&Progress>,
    ) -> Result<HttpResponse, TransportError> {
        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;
        let response = service.call(request).await.map_err(map_buffer_error)?;
        collect_body(response, self.max_body_size, progress).await
    }

    /// Adapt, send and give the retrier one chance to recover a rejection.
    ///
    /// Rejections (401/403) are detected before status classification, so a
    /// caller widening the acceptable set does not disable recovery.
    async fn exchange_authenticated<E>(
        &self,
        auth: &Authenticator,
        request: &RequestBuilder,
        progress: Option<&Progress>,
    ) -> Result<HttpResponse, ApiError<E>> {
        let mut guard = RetryGuard::default();
        loop {
            let adapted = auth.adapt(request.clone());
            let response = self.exchange(&adapted, progress).await?;

            if !is_rejection(response.status()) {
                return Ok(response);
            }
            let Some(retrier) = auth.retrier() else {
                return Ok(response);
            };
            if !guard.try_consume() {
                tracing::debug!(status = %response.status(), "request rejected again after retry");
                return Ok(response);
            }
            if progress.is_some_and(Progress::is_cancelled) {
                return Err(TransportError::Cancelled.into());
            }

            let bare = self.without_authenticator();
            let rejection = Rejection {
                request: &adapted,
                response: &response,
                client: &bare,
            };
            let decision = match progress {
                Some(progress) => tokio::select! {
                    biased;
                    () = progress.cancelled() => return Err(TransportError::Cancelled.into()),
                    decision = retrier.retry(rejection) => decision,
                },
                None => retrier.retry(rejection).await,
            };

            match decision {
                RetryDecision::Retry => {
                    tracing::debug!(status = %response.status(), "retrying rejected request");
                }
                RetryDecision::DoNotRetry => return Ok(response),
            }
        }
    }
}

/// Map buffer errors to `TransportError`
///
/// The buffer wraps inner service errors in `BoxError`. Typed errors are
/// recovered; anything else means the buffer worker is gone.
pub(crate) fn map_buffer_error(err: tower::BoxError) -> TransportError {
    match err.downcast::<TransportError>() {
        Ok(err) => *err,
        Err(err) => {
            // The worker panicked or its channel was dropped. Distinct from
            // Overloaded, which is a full buffer under normal operation.
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            TransportError::ServiceClosed
        }
    }
}

/// Reserve a place in the queue, or fail with [`TransportError::Overloaded`]
/// when it is full.
pub(crate) async fn try_acquire_buffer_slot(
    service: &mut BufferedService,
) -> Result<(), TransportError> {
    use std::task::Poll;

    // One poll only; a full queue is an error rather than a wait
    let slot = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match slot {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(TransportError::Overloaded),
    }
}
