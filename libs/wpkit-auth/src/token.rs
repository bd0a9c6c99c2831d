use http::header::AUTHORIZATION;
use std::fmt;
use std::sync::Arc;
use wpkit_http::{Authenticator, RequestAdapter, RequestBuilder};
use zeroize::Zeroizing;

type Predicate = Arc<dyn Fn(&RequestBuilder) -> bool + Send + Sync>;

/// Attaches `Authorization: Bearer <token>` to outgoing requests.
///
/// The header value is marked sensitive so it is redacted from debug output.
/// A predicate can restrict which requests carry the token, e.g. to keep it
/// away from third-party media hosts.
#[derive(Clone)]
pub struct TokenAdapter {
    token: Zeroizing<String>,
    header_name: String,
    should_authenticate: Option<Predicate>,
}

impl TokenAdapter {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            header_name: AUTHORIZATION.as_str().to_owned(),
            should_authenticate: None,
        }
    }

    /// Send the bearer value in `header_name` instead of `Authorization`.
    #[must_use]
    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    /// Only authenticate requests for which `predicate` returns `true`.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestBuilder) -> bool + Send + Sync + 'static,
    {
        self.should_authenticate = Some(Arc::new(predicate));
        self
    }
}

impl RequestAdapter for TokenAdapter {
    fn adapt(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(predicate) = &self.should_authenticate
            && !predicate(&request)
        {
            return request;
        }
        let value = Zeroizing::new(format!("Bearer {}", self.token.as_str()));
        request.sensitive_header(self.header_name.as_str(), value.as_str())
    }
}

impl From<TokenAdapter> for Authenticator {
    fn from(adapter: TokenAdapter) -> Self {
        Authenticator::new(adapter)
    }
}

impl fmt::Debug for TokenAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAdapter")
            .field("header_name", &self.header_name)
            .field("conditional", &self.should_authenticate.is_some())
            .finish_non_exhaustive()
    }
}
