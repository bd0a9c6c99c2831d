use crate::auth::{Authenticator, RequestAdapter};
use crate::body::RequestBody;
use crate::client::{BufferedService, HttpClient};
use crate::config::{HttpClientConfig, RedirectConfig, TlsRootConfig, TransportSecurity};
use crate::error::{BuildError, TransportError};
use crate::layers::{CookieJar, CookieJarLayer, DefaultHeadersLayer, SecureRedirectPolicy};
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

type HyperClient = Client<HttpsConnector<HttpConnector>, RequestBody>;

/// Assembles an [`HttpClient`].
///
/// Every setter overrides one field of the [`HttpClientConfig`] the builder
/// started from; [`build`](Self::build) turns the result into the shared
/// middleware stack.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    default_headers: Vec<(String, String)>,
    authenticator: Option<Authenticator>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Start from `config` instead of the defaults.
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            default_headers: Vec::new(),
            authenticator: None,
        }
    }

    /// Deadline of each exchange, retries and handshake requests included.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Header added to requests that do not carry it, e.g. `Accept-Language`.
    ///
    /// A header set on the [`RequestBuilder`](crate::RequestBuilder) wins.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Cap on the decompressed response body.
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Accept `http://` site URLs.
    ///
    /// Compiled only into debug builds or with the `allow-insecure-http`
    /// feature; release builds use [`transport`](Self::transport) explicitly.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "wpkit_http::security",
            "plain HTTP allowed; login credentials will be sent unencrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Exchanges that may wait in the shared queue. At least 1.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.redirect.max_redirects = max_redirects;
        self
    }

    /// Hand 3xx answers to the caller untouched.
    ///
    /// Cookie-nonce login relies on the redirect to the nonce page, so only
    /// use this with token authentication.
    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.config.redirect = RedirectConfig::disabled();
        self
    }

    #[must_use]
    pub fn redirect(mut self, config: RedirectConfig) -> Self {
        self.config.redirect = config;
        self
    }

    #[must_use]
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.config.cookie_store = enabled;
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Adapt every request with `authenticator`, and let its retrier, if any,
    /// answer a 401/403 once per request.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Adapt every request with `adapter`; rejections are never retried.
    #[must_use]
    pub fn adapter(self, adapter: impl RequestAdapter + 'static) -> Self {
        self.authenticator(Authenticator::new(adapter))
    }

    /// Build the client. Needs a running tokio runtime for the queue worker.
    ///
    /// Layers, outermost first:
    ///
    /// ```text
    /// Buffer > error mapping > Timeout > DefaultHeaders > Decompression
    ///        > FollowRedirect > CookieJar (optional) > hyper
    /// ```
    ///
    /// Every status comes back as a response; the acceptable range and the
    /// authentication retry are handled by [`HttpClient::send`] above the
    /// queue. The cookie jar sits under the redirect layer so that each hop
    /// of the login redirect stores and sends the session cookies.
    ///
    /// # Errors
    /// [`BuildError::Tls`] when the root store cannot be loaded,
    /// [`BuildError::InvalidHeader`] for a malformed user agent or default header.
    pub fn build(self) -> Result<HttpClient, BuildError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled; credentials and cookies may travel unencrypted"
            );
        }

        let headers = DefaultHeadersLayer::try_new(
            &self.config.user_agent,
            self.default_headers.iter().map(|(name, value)| (name, value)),
        )?;
        let cookies = self.config.cookie_store.then(CookieJar::new);
        let service = self.stack(hyper_client(&self.config)?, headers, cookies.clone());

        Ok(HttpClient {
            service,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
            cookies,
            authenticator: self.authenticator,
        })
    }

    fn stack(
        &self,
        inner: HyperClient,
        headers: DefaultHeadersLayer,
        cookies: Option<CookieJar>,
    ) -> BufferedService {
        let timeout = self.config.request_timeout;
        let redirects = SecureRedirectPolicy::new(self.config.redirect.clone());

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(headers)
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(redirects))
            .option_layer(cookies.map(CookieJarLayer::new))
            .service(inner)
            .map_response(box_body)
            .map_err(move |e: tower::BoxError| classify_failure(e, timeout))
            .boxed_clone();

        Buffer::new(service, self.config.buffer_capacity.max(1))
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pooled hyper client over the rustls connector.
fn hyper_client(config: &HttpClientConfig) -> Result<HyperClient, BuildError> {
    let connector = tls::https_connector(config.tls_roots, config.transport)?;

    let mut pool = Client::builder(TokioExecutor::new());
    // Idle expiry is driven by the timer
    pool.pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host);
    if let Some(idle) = config.pool_idle_timeout {
        pool.pool_idle_timeout(idle);
    }
    Ok(pool.build(connector))
}

/// Turn a boxed middleware failure back into a [`TransportError`].
fn classify_failure(err: tower::BoxError, timeout: Duration) -> TransportError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return TransportError::Timeout(timeout);
    }
    err.downcast::<TransportError>()
        .map_or_else(TransportError::Transport, |typed| *typed)
}

fn box_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}
