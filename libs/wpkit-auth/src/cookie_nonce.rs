//! Cookie + nonce authentication for self-hosted WordPress sites.
//!
//! The REST API of a self-hosted site accepts a logged-in session cookie only
//! together with a matching `X-WP-Nonce` header. The authenticator starts
//! without a nonce; the first rejection triggers a login handshake that
//! establishes the session cookies and reads a nonce, after which the
//! rejected request is retried once.

use crate::credentials::Credentials;
use crate::error::HandshakeError;
use crate::nonce::NonceRetrieval;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use url::{Position, Url};
use wpkit_http::{
    Authenticator, HttpClient, Rejection, RequestAdapter, RequestBuilder, RequestRetrier,
    RetryDecision, SendOptions,
};
use zeroize::Zeroizing;

/// Header carrying the REST nonce.
pub const NONCE_HEADER: &str = "X-WP-Nonce";

/// State shared by every clone of one authenticator.
#[derive(Default)]
struct NonceState {
    /// Last nonce obtained by a handshake; read lock-free by every adapt.
    nonce: ArcSwapOption<Zeroizing<String>>,
    /// Held for the whole handshake so concurrent rejections run it once.
    handshake: tokio::sync::Mutex<()>,
    /// Nonce carried by the request whose handshake failed (`Some(None)`: no nonce).
    failed_for: parking_lot::Mutex<Option<Option<String>>>,
}

/// Adapter and retrier implementing the cookie + nonce login flow.
///
/// Clones share the nonce and handshake state.
///
/// ```ignore
/// let auth = CookieNonceAuthenticator::new(
///     Credentials::new("admin", password),
///     Url::parse("https://example.com/wp-login.php")?,
///     Url::parse("https://example.com/wp-admin/")?,
/// )
/// .with_retrieval(NonceRetrieval::for_version("6.4"));
///
/// let client = HttpClient::builder().authenticator(auth.into()).build()?;
/// ```
#[derive(Clone)]
pub struct CookieNonceAuthenticator {
    credentials: Credentials,
    login_url: Url,
    admin_url: Url,
    retrieval: NonceRetrieval,
    header_name: String,
    state: Arc<NonceState>,
}

impl CookieNonceAuthenticator {
    #[must_use]
    pub fn new(credentials: Credentials, login_url: Url, admin_url: Url) -> Self {
        Self {
            credentials,
            login_url,
            admin_url,
            retrieval: NonceRetrieval::default(),
            header_name: NONCE_HEADER.to_owned(),
            state: Arc::new(NonceState::default()),
        }
    }

    /// Choose how the nonce is read after login.
    #[must_use]
    pub fn with_retrieval(mut self, retrieval: NonceRetrieval) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Send the nonce in `header_name` instead of `X-WP-Nonce`.
    #[must_use]
    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    /// Whether a nonce is currently known.
    #[must_use]
    pub fn has_nonce(&self) -> bool {
        self.state.nonce.load().is_some()
    }

    /// Forget the nonce and any recorded handshake failure.
    pub fn reset(&self) {
        self.state.nonce.store(None);
        *self.state.failed_for.lock() = None;
    }

    fn current_nonce(&self) -> Option<Arc<Zeroizing<String>>> {
        self.state.nonce.load_full()
    }

    fn is_current(&self, carried: Option<&str>) -> bool {
        self.current_nonce().as_deref().map(|n| n.as_str()) == carried
    }

    fn already_failed_for(&self, carried: Option<&str>) -> bool {
        self.state
            .failed_for
            .lock()
            .as_ref()
            .is_some_and(|failed| failed.as_deref() == carried)
    }

    /// Whether `url` is the login page itself (query ignored).
    fn is_login_page(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| {
            url[..Position::AfterPath] == self.login_url[..Position::AfterPath]
        })
    }

    fn is_login_request(&self, request: &RequestBuilder) -> bool {
        request
            .target_url()
            .is_ok_and(|target| self.is_login_page(&target))
    }

    /// Wait for the handshake lock, then refresh the nonce unless another
    /// request already did so, or already failed to, for the same credential.
    async fn refresh(&self, client: &HttpClient, carried: Option<String>) -> RetryDecision {
        let _handshake = self.state.handshake.lock().await;

        if !self.is_current(carried.as_deref()) {
            tracing::debug!("nonce refreshed by a concurrent handshake; retrying");
            return RetryDecision::Retry;
        }
        if self.already_failed_for(carried.as_deref()) {
            return RetryDecision::DoNotRetry;
        }

        tracing::info!(login_url = %self.login_url, "starting cookie nonce handshake");
        match self.handshake(client).await {
            Ok(nonce) => {
                self.state.nonce.store(Some(Arc::new(nonce)));
                *self.state.failed_for.lock() = None;
                tracing::info!(login_url = %self.login_url, "cookie nonce handshake completed");
                RetryDecision::Retry
            }
            Err(e) => {
                tracing::warn!(
                    login_url = %self.login_url,
                    error = %e,
                    "cookie nonce handshake failed; will not retry"
                );
                *self.state.failed_for.lock() = Some(carried);
                RetryDecision::DoNotRetry
            }
        }
    }

    /// Log in, follow the redirect to the nonce page and read the nonce.
    async fn handshake(&self, client: &HttpClient) -> Result<Zeroizing<String>, HandshakeError> {
        let nonce_url = self.retrieval.url(&self.admin_url)?;
        let form = vec![
            ("log", self.credentials.username().to_owned()),
            ("pwd", self.credentials.password().to_owned()),
            ("rememberme", "true".to_owned()),
            ("redirect_to", nonce_url.to_string()),
        ];
        let request = RequestBuilder::post(self.login_url.as_str()).body_form(form);

        let response = client
            .send::<Infallible>(&request, &SendOptions::new())
            .await
            .map_err(HandshakeError::Login)?;
        tracing::info!(
            login_url = %self.login_url,
            redirected_to = ?response.url(),
            "posted login form"
        );
        // A successful login redirects to `redirect_to`; staying on the form means it was refused
        if response.url().is_some_and(|url| self.is_login_page(&url.to_string())) {
            return Err(HandshakeError::LoginRejected {
                url: self.login_url.to_string(),
            });
        }

        self.retrieval
            .extract(&response.text())
            .map(Zeroizing::new)
            .ok_or_else(|| HandshakeError::MissingNonce {
                url: nonce_url.to_string(),
            })
    }
}

impl RequestAdapter for CookieNonceAuthenticator {
    fn adapt(&self, request: RequestBuilder) -> RequestBuilder {
        match self.current_nonce() {
            Some(nonce) => request.sensitive_header(self.header_name.as_str(), nonce.as_str()),
            None => request,
        }
    }
}

#[async_trait]
impl RequestRetrier for CookieNonceAuthenticator {
    async fn retry(&self, rejection: Rejection<'_>) -> RetryDecision {
        if self.is_login_request(rejection.request) {
            return RetryDecision::DoNotRetry;
        }

        let carried = rejection.request.header_value(&self.header_name).map(str::to_owned);
        if !self.is_current(carried.as_deref()) {
            return RetryDecision::Retry;
        }
        if self.already_failed_for(carried.as_deref()) {
            tracing::debug!("handshake already failed for this nonce; not retrying");
            return RetryDecision::DoNotRetry;
        }

        // Spawned so that cancelling the rejected request does not abort a
        // handshake other requests are waiting on.
        let auth = self.clone();
        let client = rejection.client.clone();
        let task = tokio::spawn(async move { auth.refresh(&client, carried).await });
        match task.await {
            Ok(decision) => decision,
            Err(e) => {
                let e = HandshakeError::from(e);
                tracing::error!(error = %e, "cookie nonce handshake did not complete");
                RetryDecision::DoNotRetry
            }
        }
    }
}

impl From<CookieNonceAuthenticator> for Authenticator {
    fn from(auth: CookieNonceAuthenticator) -> Self {
        Authenticator::shared(Arc::new(auth))
    }
}

impl fmt::Debug for CookieNonceAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieNonceAuthenticator")
            .field("credentials", &self.credentials)
            .field("login_url", &self.login_url.as_str())
            .field("admin_url", &self.admin_url.as_str())
            .field("retrieval", &self.retrieval)
            .field("has_nonce", &self.has_nonce())
            .finish_non_exhaustive()
    }
}
