//! Where the REST nonce of a logged-in session is read from.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static NONCE_MIDDLEWARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"apiFetch\.createNonceMiddleware\(\s*['"](?<nonce>\w+)['"]\s*\)"#)
        .expect("static regex should not panic")
});

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static BARE_NONCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("static regex should not panic"));

/// Strategy for obtaining a nonce once the session cookies are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceRetrieval {
    /// Scrape the block editor bootstrap script of `post-new.php`
    #[default]
    NewPostScrape,
    /// Ask `admin-ajax.php?action=rest-nonce`, which answers with the bare nonce,
    /// or with an HTML error page when the session is not logged in
    AjaxRequest,
}

impl NonceRetrieval {
    /// The `rest-nonce` ajax action exists from WordPress 5.3.
    const AJAX_SINCE: (u32, u32) = (5, 3);

    /// Best strategy for a site running WordPress `version` (e.g. `"6.4.2"`).
    ///
    /// Unparsable versions fall back to scraping, which works everywhere.
    #[must_use]
    pub fn for_version(version: &str) -> Self {
        let mut parts = version.trim().split('.').map(str::parse::<u32>);
        let major = parts.next().and_then(Result::ok);
        let minor = parts.next().and_then(Result::ok).unwrap_or(0);
        match major {
            Some(major) if (major, minor) >= Self::AJAX_SINCE => Self::AjaxRequest,
            _ => Self::NewPostScrape,
        }
    }

    /// URL serving the nonce, relative to the admin URL.
    ///
    /// # Errors
    /// Returns the parse error if the joined URL is invalid.
    pub fn url(self, admin_url: &Url) -> Result<Url, url::ParseError> {
        match self {
            Self::NewPostScrape => admin_url.join("post-new.php"),
            Self::AjaxRequest => admin_url.join("admin-ajax.php?action=rest-nonce"),
        }
    }

    /// Read the nonce out of the body served at [`url`](Self::url).
    ///
    /// Both strategies accept word characters only, so an error page is
    /// never mistaken for a nonce.
    #[must_use]
    pub fn extract(self, body: &str) -> Option<String> {
        match self {
            Self::NewPostScrape => NONCE_MIDDLEWARE
                .captures(body)
                .and_then(|caps| caps.name("nonce"))
                .map(|m| m.as_str().to_owned()),
            Self::AjaxRequest => {
                let nonce = body.trim();
                // admin-ajax answers "0" when the action is not registered
                (nonce != "0" && BARE_NONCE.is_match(nonce)).then(|| nonce.to_owned())
            }
        }
    }
}
