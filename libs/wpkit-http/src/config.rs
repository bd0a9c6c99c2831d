use std::collections::HashSet;
use std::time::Duration;

/// `User-Agent` sent when the caller does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("wpkit-http/", env!("CARGO_PKG_VERSION"));

const MIB: usize = 1024 * 1024;

/// How 3xx answers are followed.
///
/// The login form of a self-hosted site answers with a redirect to the page
/// that carries the REST nonce, so redirects are followed by default. Hops
/// leaving the origin of the request are refused unless the target host is
/// listed in `allowed_redirect_hosts`, and a hop from `https` to `http` is
/// always refused unless `allow_https_downgrade` is set.
///
/// ```rust,ignore
/// use std::collections::HashSet;
/// use wpkit_http::RedirectConfig;
///
/// // wp-admin served from a separate host
/// let redirect = RedirectConfig {
///     allowed_redirect_hosts: HashSet::from(["admin.example.com".to_owned()]),
///     ..RedirectConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Hops followed before the exchange fails; `0` returns the 3xx as is.
    pub max_redirects: usize,

    /// Refuse hops to another host unless it is allow-listed.
    pub same_origin_only: bool,

    /// Bare host names (no scheme, no port) accepted as redirect targets.
    pub allowed_redirect_hosts: HashSet<String>,

    /// Drop credentials (`Authorization`, `Cookie`, `Proxy-Authorization`,
    /// `X-WP-Nonce`) once a hop has left the original origin.
    pub strip_sensitive_headers: bool,

    /// Follow `https` to `http` hops. Mock servers only.
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            same_origin_only: true,
            allowed_redirect_hosts: HashSet::new(),
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    /// Any host is a valid target; credentials are still dropped across origins.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            same_origin_only: false,
            ..Self::default()
        }
    }

    /// Never follow; the 3xx response reaches the caller.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Self::default()
        }
    }

    /// Permissive and downgrade-tolerant, for plain-HTTP mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            allow_https_downgrade: true,
            ..Self::permissive()
        }
    }
}

/// Trust anchors used to verify site certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Bundled Mozilla roots from `webpki-roots`.
    #[default]
    WebPki,
    /// The operating system store.
    Native,
}

/// Which URL schemes the client may connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// `https` only. Requests to `http` URLs fail before anything is sent.
    #[default]
    TlsOnly,
    /// `http` is accepted too, for sites on a LAN and for mock servers.
    ///
    /// Login credentials and session cookies then travel in clear text.
    AllowInsecureHttp,
}

/// Settings consumed by [`HttpClientBuilder`](crate::HttpClientBuilder).
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Deadline of one exchange (60 s).
    ///
    /// The authentication retry and each handshake request get a fresh one.
    pub request_timeout: Duration,

    /// Largest decompressed body accepted (10 MiB).
    pub max_body_size: usize,

    pub user_agent: String,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// Exchanges queued in the shared service before new ones fail with
    /// [`TransportError::Overloaded`](crate::TransportError::Overloaded) (1024).
    pub buffer_capacity: usize,

    pub redirect: RedirectConfig,

    /// Remember `Set-Cookie` across exchanges (on).
    ///
    /// Cookie-nonce login needs it; token-only clients may turn it off.
    pub cookie_store: bool,

    /// Idle pooled connections are closed after this long (90 s);
    /// `None` keeps hyper-util's default.
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (32); `0` disables reuse.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_body_size: 10 * MIB,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::default(),
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
            redirect: RedirectConfig::default(),
            cookie_store: true,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Short deadlines, small pool and no cookie store, for token-only use.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: MIB,
            buffer_capacity: 256,
            cookie_store: false,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 8,
            ..Self::default()
        }
    }

    /// Plain HTTP and permissive redirects, for mock servers. Never in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportSecurity::AllowInsecureHttp,
            redirect: RedirectConfig::for_testing(),
            cookie_store: true,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::minimal()
        }
    }
}
