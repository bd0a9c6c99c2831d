//! Tower layers used by the client stack.
//!
//! - [`DefaultHeadersLayer`] - fills in `User-Agent` and other client-wide headers
//! - [`SecureRedirectPolicy`] - redirect policy for `FollowRedirect`
//! - [`CookieJarLayer`] - session cookies shared by all clones of a client

mod cookie_jar;
mod default_headers;
mod redirect;

pub use cookie_jar::{CookieJar, CookieJarFuture, CookieJarLayer, CookieJarService};
pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use redirect::SecureRedirectPolicy;
