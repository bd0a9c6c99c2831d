//! Session cookie store.
//!
//! WordPress keeps the logged-in session in cookies set by `wp-login.php`.
//! The jar sits below the redirect layer so every hop of a redirect chain
//! both receives and contributes cookies.

use cookie::Cookie;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use dashmap::DashMap;
use http::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use http::{Request, Response, Uri};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A stored cookie. Without a `Domain` attribute it is sent to its exact host only.
#[derive(Debug)]
struct StoredCookie {
    cookie: Cookie<'static>,
    host_only: bool,
}

impl StoredCookie {
    fn applies_to(&self, host: &str, domain: &str, path: &str, secure: bool) -> bool {
        let host_ok = if self.host_only {
            host == domain
        } else {
            domain_matches(host, domain)
        };
        host_ok
            && path_matches(path, self.cookie.path().unwrap_or("/"))
            && (secure || !self.cookie.secure().unwrap_or(false))
    }
}

/// Cookies shared by every clone of one client, keyed by domain.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    domains: Arc<DashMap<String, Vec<StoredCookie>>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the `Set-Cookie` headers of a response to `uri`.
    ///
    /// A cookie with `Max-Age=0` or an `Expires` in the past removes the
    /// stored cookie of the same name and path.
    pub fn store(&self, uri: &Uri, headers: &HeaderMap) {
        let Some(host) = uri.host().map(str::to_ascii_lowercase) else {
            return;
        };
        let now = OffsetDateTime::now_utc();

        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            let mut cookie = match Cookie::parse_encoded(raw.to_owned()) {
                Ok(cookie) => cookie,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed Set-Cookie header");
                    continue;
                }
            };

            let shared_domain = cookie
                .domain()
                .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| domain_matches(&host, d));
            let host_only = shared_domain.is_none();
            let domain = shared_domain.unwrap_or_else(|| host.clone());
            if cookie.path().is_none() {
                cookie.set_path(default_path(uri));
            }

            let expired = cookie.max_age().is_some_and(|age| age <= CookieDuration::ZERO)
                || cookie.expires_datetime().is_some_and(|at| at <= now);

            let mut entry = self.domains.entry(domain.clone()).or_default();
            entry.retain(|c| !(c.cookie.name() == cookie.name() && c.cookie.path() == cookie.path()));
            if expired {
                tracing::debug!(domain = %domain, name = cookie.name(), "cookie removed");
            } else {
                tracing::debug!(domain = %domain, host_only, name = cookie.name(), "cookie stored");
                entry.push(StoredCookie { cookie, host_only });
            }
        }
    }

    /// `Cookie` header value for a request to `uri`, if any cookie applies.
    #[must_use]
    pub fn header_for(&self, uri: &Uri) -> Option<HeaderValue> {
        let host = uri.host()?.to_ascii_lowercase();
        let path = uri.path();
        let secure = uri.scheme_str() == Some("https");

        let pairs: Vec<String> = self
            .domains
            .iter()
            .filter(|entry| domain_matches(&host, entry.key()))
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|c| c.applies_to(&host, entry.key(), path, secure))
                    .map(|c| c.cookie.encoded().stripped().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }

    /// Value of the cookie `name` stored for `domain`.
    #[must_use]
    pub fn get(&self, domain: &str, name: &str) -> Option<String> {
        self.domains.get(&domain.to_ascii_lowercase()).and_then(|cookies| {
            cookies
                .iter()
                .find(|c| c.cookie.name() == name)
                .map(|c| c.cookie.value().to_owned())
        })
    }

    /// Number of stored cookies across all domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored cookie.
    pub fn clear(&self) {
        self.domains.clear();
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

/// Directory of the request path, as used when `Set-Cookie` has no `Path`.
fn default_path(uri: &Uri) -> String {
    let path = uri.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
    }
}

/// Tower layer attaching and collecting cookies through a [`CookieJar`].
#[derive(Clone, Debug)]
pub struct CookieJarLayer {
    jar: CookieJar,
}

impl CookieJarLayer {
    #[must_use]
    pub fn new(jar: CookieJar) -> Self {
        Self { jar }
    }
}

impl<S> Layer<S> for CookieJarLayer {
    type Service = CookieJarService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieJarService {
            inner,
            jar: self.jar.clone(),
        }
    }
}

/// Service produced by [`CookieJarLayer`].
#[derive(Clone, Debug)]
pub struct CookieJarService<S> {
    inner: S,
    jar: CookieJar,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieJarService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = CookieJarFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // An explicit Cookie header on the request is left untouched
        if !req.headers().contains_key(COOKIE)
            && let Some(value) = self.jar.header_for(req.uri())
        {
            req.headers_mut().insert(COOKIE, value);
        }
        CookieJarFuture {
            uri: req.uri().clone(),
            jar: self.jar.clone(),
            inner: self.inner.call(req),
        }
    }
}

pin_project! {
    /// Response future of [`CookieJarService`].
    pub struct CookieJarFuture<F> {
        #[pin]
        inner: F,
        jar: CookieJar,
        uri: Uri,
    }
}

impl<F, ResBody, E> Future for CookieJarFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = std::task::ready!(this.inner.poll(cx));
        if let Ok(response) = &result {
            this.jar.store(this.uri, response.headers());
        }
        Poll::Ready(result)
    }
}
