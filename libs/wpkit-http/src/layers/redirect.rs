//! Redirect policy for the client stack.
//!
//! Redirects are followed within one origin by default. Crossing origins
//! strips credentials (`Authorization`, `Cookie`, `Proxy-Authorization`,
//! `X-WP-Nonce`) and HTTPS → HTTP downgrades are refused. The login handshake
//! relies on this: `wp-login.php` answers with a same-origin 302 to the page
//! carrying the REST nonce.

use crate::body::RequestBody;
use crate::config::RedirectConfig;
use http::{Request, Uri};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Lowercase names; a custom `HeaderName` cannot live in a const.
const CREDENTIAL_HEADERS: [&str; 4] = [
    "authorization",
    "cookie",
    "proxy-authorization",
    "x-wp-nonce",
];

/// Origin triple used for comparisons. A missing scheme counts as `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    fn of(uri: &Uri) -> Self {
        let scheme = uri.scheme_str().unwrap_or("https").to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or(match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => 0,
        });
        Self {
            host: uri.host().unwrap_or_default().to_ascii_lowercase(),
            scheme,
            port,
        }
    }
}

/// [`Policy`] implementing [`RedirectConfig`].
///
/// The policy is cloned per request by `FollowRedirect`, so the hop counter
/// and the cross-origin flag belong to one redirect chain.
#[derive(Debug, Clone)]
pub struct SecureRedirectPolicy {
    config: RedirectConfig,
    hops: usize,
    crossed_origin: bool,
}

impl SecureRedirectPolicy {
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            hops: 0,
            crossed_origin: false,
        }
    }

    fn decide(&mut self, from: &Uri, to: &Uri) -> Action {
        self.hops += 1;
        if self.hops > self.config.max_redirects {
            tracing::debug!(
                hops = self.hops,
                max = self.config.max_redirects,
                "redirect limit reached"
            );
            return Action::Stop;
        }

        let (from_origin, to_origin) = (Origin::of(from), Origin::of(to));

        if from_origin.scheme == "https"
            && to_origin.scheme == "http"
            && !self.config.allow_https_downgrade
        {
            tracing::warn!(from = %from, to = %to, "refusing HTTPS to HTTP redirect");
            return Action::Stop;
        }

        if from_origin != to_origin {
            let allowed = !self.config.same_origin_only
                || self.config.allowed_redirect_hosts.contains(&to_origin.host);
            if !allowed {
                tracing::warn!(from = %from, to = %to, "refusing cross-origin redirect");
                return Action::Stop;
            }
            self.crossed_origin = true;
        }

        tracing::debug!(from = %from, to = %to, "following redirect");
        Action::Follow
    }
}

impl<E> Policy<RequestBody, E> for SecureRedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        Ok(self.decide(attempt.previous(), attempt.location()))
    }

    fn on_request(&mut self, request: &mut Request<RequestBody>) {
        if !(self.crossed_origin && self.config.strip_sensitive_headers) {
            return;
        }
        let headers = request.headers_mut();
        for name in CREDENTIAL_HEADERS {
            if headers.remove(name).is_some() {
                tracing::debug!(header = %name, "dropped credential on cross-origin redirect");
            }
        }
    }

    /// Streamed uploads cannot be replayed; a redirect that needs the body
    /// again is then returned to the caller unfollowed.
    fn clone_body(&self, body: &RequestBody) -> Option<RequestBody> {
        body.try_clone()
    }
}
