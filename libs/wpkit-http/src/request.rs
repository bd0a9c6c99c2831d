use crate::body::RequestBody;
use crate::config::TransportSecurity;
use crate::error::{BoxError, EncodingError, InvalidUriKind};
use crate::multipart::{self, MultipartField};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Deferred body encoder, invoked once per send.
type Encoder = Arc<dyn Fn() -> Result<Bytes, EncodingError> + Send + Sync>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Clone)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    Json(Encoder),
    Form(Encoder),
    Xml(Encoder),
    Multipart(Vec<MultipartField>),
}

impl BodyKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Form(_) => "form",
            Self::Xml(_) => "xml",
            Self::Multipart(_) => "multipart",
        }
    }
}

#[derive(Clone)]
struct HeaderEntry {
    name: String,
    value: String,
    sensitive: bool,
}

/// Immutable description of one HTTP request.
///
/// Building never fails: invalid header names, body serialization errors and
/// malformed URLs are captured and reported as
/// [`ApiError::RequestEncodingFailure`](crate::ApiError::RequestEncodingFailure)
/// when the request is sent. Bodies are encoded at send time, so a configured
/// builder can be cloned and reused as a template.
///
/// # Example
///
/// ```ignore
/// use wpkit_http::RequestBuilder;
///
/// let request = RequestBuilder::post("https://example.com/wp-json")
///     .append_path("wp/v2/posts")
///     .query("context", "edit")
///     .body_json(NewPost { title: "Hello".into() });
///
/// let response = client.send::<RestApiError>(&request, &SendOptions::new()).await?;
/// ```
#[derive(Clone)]
#[must_use = "RequestBuilder does nothing until it is sent"]
pub struct RequestBuilder {
    method: Method,
    url: String,
    path: Vec<String>,
    query: Vec<(String, String)>,
    default_query: Vec<(String, String)>,
    headers: Vec<HeaderEntry>,
    body: BodyKind,
}

impl RequestBuilder {
    /// `GET` request for `url` with no headers and no body.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            path: Vec::new(),
            query: Vec::new(),
            default_query: Vec::new(),
            headers: Vec::new(),
            body: BodyKind::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(url).method(Method::POST)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(url).method(Method::PUT)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(url).method(Method::PATCH)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(url).method(Method::DELETE)
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Insert a header, replacing any existing header with the same name
    /// (compared case-insensitively).
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name.into(), value.into(), false)
    }

    /// Like [`header`](Self::header), but the value is marked sensitive and
    /// never printed by `Debug`.
    pub fn sensitive_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name.into(), value.into(), true)
    }

    /// Insert several headers with [`header`](Self::header) semantics.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.insert_header(name.into(), value.into(), false);
        }
        self
    }

    fn insert_header(mut self, name: String, value: String, sensitive: bool) -> Self {
        self.headers
            .retain(|entry| !entry.name.eq_ignore_ascii_case(&name));
        self.headers.push(HeaderEntry {
            name,
            value,
            sensitive,
        });
        self
    }

    /// Append a path segment to the URL.
    ///
    /// Segments are joined with exactly one `/`. A trailing slash on the last
    /// segment is kept.
    pub fn append_path(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    /// Append a query item. Repeated names are kept in order.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append query items, first removing earlier items with the same names.
    pub fn query_override<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let items: Vec<(String, String)> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.query
            .retain(|(name, _)| !items.iter().any(|(n, _)| n == name));
        self.query.extend(items);
        self
    }

    /// Query items added at send time only when no explicit item (from the
    /// base URL or [`query`](Self::query)) has the same name.
    pub fn query_defaults<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.default_query
            .extend(items.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Append a structured value as query items.
    ///
    /// Arrays flatten to `name[]`, objects to `name[key]` with keys in sorted
    /// order, booleans to `1`/`0` and `null` to an empty value.
    pub fn query_value(mut self, name: impl Into<String>, value: &serde_json::Value) -> Self {
        flatten_query(name.into(), value, &mut self.query);
        self
    }

    /// Use `body` verbatim.
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(body.into());
        self
    }

    /// JSON-encode `value` at send time (`Content-Type: application/json`
    /// unless set explicitly).
    pub fn body_json<T>(mut self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body = BodyKind::Json(Arc::new(move || {
            Ok(Bytes::from(serde_json::to_vec(&value)?))
        }));
        self
    }

    /// JSON-encode the value produced by `f` at send time.
    ///
    /// An error from `f` becomes [`EncodingError::Encoder`].
    pub fn body_json_with<F, T, E>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        self.body = BodyKind::Json(Arc::new(move || {
            let value = f().map_err(|e| EncodingError::Encoder(e.into()))?;
            Ok(Bytes::from(serde_json::to_vec(&value)?))
        }));
        self
    }

    /// URL-encode `value` as a form at send time.
    pub fn body_form<T>(mut self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body = BodyKind::Form(Arc::new(move || {
            Ok(Bytes::from(serde_urlencoded::to_string(&value)?))
        }));
        self
    }

    /// Produce an XML document with `f` at send time.
    pub fn body_xml_with<F, B, E>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<B, E> + Send + Sync + 'static,
        B: Into<Bytes>,
        E: Into<BoxError>,
    {
        self.body = BodyKind::Xml(Arc::new(move || {
            f().map(Into::into)
                .map_err(|e| EncodingError::Encoder(e.into()))
        }));
        self
    }

    /// Send `fields` as `multipart/form-data`.
    ///
    /// A fresh boundary is generated for every send, and the multipart
    /// `Content-Type` always replaces a caller-supplied one.
    pub fn body_multipart(mut self, fields: impl IntoIterator<Item = MultipartField>) -> Self {
        self.body = BodyKind::Multipart(fields.into_iter().collect());
        self
    }

    /// The HTTP method.
    #[must_use]
    pub fn http_method(&self) -> &Method {
        &self.method
    }

    /// The base URL, before appended path segments and query items.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Value of a configured header, looked up case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.value.as_str())
    }

    /// Whether a body has been attached.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !matches!(self.body, BodyKind::Empty)
    }

    /// Final URL with appended path segments and query items.
    ///
    /// # Errors
    /// Returns [`EncodingError::InvalidUri`] if the base URL does not parse.
    pub fn target_url(&self) -> Result<String, EncodingError> {
        let mut url = url::Url::parse(&self.url).map_err(|e| EncodingError::InvalidUri {
            url: self.url.clone(),
            kind: match e {
                url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::MissingScheme,
                url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
                _ => InvalidUriKind::ParseError,
            },
            reason: e.to_string(),
        })?;

        if !self.path.is_empty() {
            let mut path = url.path().trim_end_matches('/').to_owned();
            for segment in &self.path {
                let segment = segment.trim_start_matches('/');
                if segment.is_empty() {
                    continue;
                }
                path.push('/');
                path.push_str(segment);
            }
            url.set_path(&path);
        }

        let mut items: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        items.extend(self.query.iter().cloned());
        for (name, value) in &self.default_query {
            if !items.iter().any(|(n, _)| n == name) {
                items.push((name.clone(), value.clone()));
            }
        }

        if items.is_empty() {
            url.set_query(None);
        } else {
            let query = items
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }

        Ok(url.into())
    }

    /// Validate the final URL and its scheme against `transport`.
    fn validate_url(&self, transport: TransportSecurity) -> Result<http::Uri, EncodingError> {
        let url = self.target_url()?;
        let uri: http::Uri =
            url.parse()
                .map_err(|e: http::uri::InvalidUri| EncodingError::InvalidUri {
                    url: url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(EncodingError::InvalidUri {
                url,
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match transport {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(EncodingError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(EncodingError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(EncodingError::InvalidUri {
                url,
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Encode the body. Returns it with the default content type and
    /// whether that content type overrides a caller-supplied one.
    async fn encode_body(&self) -> Result<(RequestBody, Option<String>, bool), EncodingError> {
        Ok(match &self.body {
            BodyKind::Empty => (RequestBody::empty(), None, false),
            BodyKind::Bytes(bytes) => (RequestBody::full(bytes.clone()), None, false),
            BodyKind::Json(encode) => {
                let body = RequestBody::full(encode()?);
                (body, Some(mime::APPLICATION_JSON.to_string()), false)
            }
            BodyKind::Form(encode) => {
                let body = RequestBody::full(encode()?);
                (body, Some(FORM_CONTENT_TYPE.to_owned()), false)
            }
            BodyKind::Xml(encode) => {
                let body = RequestBody::full(encode()?);
                (body, Some(XML_CONTENT_TYPE.to_owned()), false)
            }
            BodyKind::Multipart(fields) => {
                let boundary = multipart::generate_boundary();
                let body = multipart::encode(fields, &boundary).await?;
                (body, Some(multipart::content_type(&boundary)), true)
            }
        })
    }

    /// Turn the description into an `http::Request`.
    ///
    /// Runs every deferred encoder; nothing here touches the network.
    pub(crate) async fn build(
        &self,
        transport: TransportSecurity,
    ) -> Result<Request<RequestBody>, EncodingError> {
        let uri = self.validate_url(transport)?;

        if self.has_body() && !body_allowed(&self.method) {
            return Err(EncodingError::BodyNotAllowed {
                method: self.method.clone(),
            });
        }

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        for entry in &self.headers {
            let name = HeaderName::try_from(entry.name.as_str())?;
            let mut value = HeaderValue::try_from(entry.value.as_str())?;
            value.set_sensitive(entry.sensitive);
            headers.insert(name, value);
        }

        let (body, content_type, force) = self.encode_body().await?;
        if let Some(content_type) = content_type
            && (force || !headers.contains_key(CONTENT_TYPE))
        {
            headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
        }

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(body)?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|entry| {
                let value = if entry.sensitive {
                    "[REDACTED]"
                } else {
                    entry.value.as_str()
                };
                (entry.name.as_str(), value)
            })
            .collect();
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &headers)
            .field("body", &self.body.label())
            .finish_non_exhaustive()
    }
}

fn body_allowed(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn flatten_query(name: String, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    use serde_json::Value;

    match value {
        Value::Null => out.push((name, String::new())),
        Value::Bool(b) => out.push((name, if *b { "1" } else { "0" }.to_owned())),
        Value::Number(n) => out.push((name, n.to_string())),
        Value::String(s) => out.push((name, s.clone())),
        Value::Array(items) => {
            for item in items {
                flatten_query(format!("{name}[]"), item, out);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(item) = map.get(key) {
                    flatten_query(format!("{name}[{key}]"), item, out);
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_of(request: Request<RequestBody>) -> Bytes {
        request.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_path_segments_join_with_single_slash() {
        let request = RequestBuilder::new("https://example.com/wp-json/")
            .append_path("/wp/v2")
            .append_path("posts/");
        assert_eq!(
            request.target_url().unwrap(),
            "https://example.com/wp-json/wp/v2/posts/"
        );
    }

    #[test]
    fn test_query_encoding_and_order() {
        let request = RequestBuilder::new("https://example.com/search?page=2")
            .query("search", "a b&c")
            .query("tags", "x")
            .query("tags", "y");
        assert_eq!(
            request.target_url().unwrap(),
            "https://example.com/search?page=2&search=a%20b%26c&tags=x&tags=y"
        );
    }

    #[test]
    fn test_query_defaults_do_not_override() {
        let request = RequestBuilder::new("https://example.com/posts?context=view")
            .query("per_page", "5")
            .query_defaults([("context", "edit"), ("locale", "user")]);
        assert_eq!(
            request.target_url().unwrap(),
            "https://example.com/posts?context=view&per_page=5&locale=user"
        );
    }

    #[test]
    fn test_query_override_replaces_earlier_items() {
        let request = RequestBuilder::new("https://example.com/posts")
            .query("status", "draft")
            .query("page", "1")
            .query_override([("status", "publish")]);
        assert_eq!(
            request.target_url().unwrap(),
            "https://example.com/posts?page=1&status=publish"
        );
    }

    #[test]
    fn test_query_value_flattens_nested_values() {
        let request = RequestBuilder::new("https://example.com/x").query_value(
            "filter",
            &json!({ "b": [1, 2], "a": true, "c": null }),
        );
        assert_eq!(
            request.target_url().unwrap(),
            "https://example.com/x?filter%5Ba%5D=1&filter%5Bb%5D%5B%5D=1&filter%5Bb%5D%5B%5D=2&filter%5Bc%5D="
        );
    }

    #[test]
    fn test_header_replaces_case_insensitively() {
        let request = RequestBuilder::new("https://example.com")
            .header("X-Thing", "one")
            .header("x-thing", "two");
        assert_eq!(request.header_value("X-THING"), Some("two"));
    }

    #[test]
    fn test_debug_redacts_sensitive_headers() {
        let request = RequestBuilder::new("https://example.com")
            .sensitive_header("Authorization", "Bearer secret")
            .header("Accept", "application/json");
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("application/json"));
    }

    #[tokio::test]
    async fn test_json_body_sets_default_content_type() {
        let request = RequestBuilder::post("https://example.com")
            .body_json(json!({ "title": "Hello" }))
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_of(request).await.as_ref(), br#"{"title":"Hello"}"#);
    }

    #[tokio::test]
    async fn test_caller_content_type_wins() {
        let request = RequestBuilder::post("https://example.com")
            .header("content-type", "application/vnd.custom+json")
            .body_json(json!([]))
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap();
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/vnd.custom+json"
        );
    }

    #[tokio::test]
    async fn test_form_body() {
        let request = RequestBuilder::post("https://example.com/wp-login.php")
            .body_form([("log", "admin"), ("pwd", "p&ss")])
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap();
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded; charset=utf-8"
        );
        assert_eq!(body_of(request).await.as_ref(), b"log=admin&pwd=p%26ss");
    }

    #[tokio::test]
    async fn test_xml_body() {
        let request = RequestBuilder::post("https://example.com/xmlrpc.php")
            .body_xml_with(|| Ok::<_, BoxError>("<methodCall/>"))
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap();
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/xml; charset=utf-8"
        );
        assert_eq!(body_of(request).await.as_ref(), b"<methodCall/>");
    }

    #[tokio::test]
    async fn test_multipart_content_type_always_overrides() {
        let request = RequestBuilder::post("https://example.com/media")
            .header("content-type", "text/plain")
            .body_multipart([MultipartField::text("a", "b")])
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap();
        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary=wpkit."));
    }

    #[tokio::test]
    async fn test_encoder_failure_is_deferred() {
        let request = RequestBuilder::post("https://example.com")
            .body_json_with(|| Err::<serde_json::Value, _>(BoxError::from("no document")));
        let err = request
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodingError::Encoder(_)));
    }

    #[tokio::test]
    async fn test_invalid_header_is_deferred() {
        let request = RequestBuilder::new("https://example.com").header("bad header", "x");
        let err = request
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodingError::InvalidHeaderName(_)));
    }

    #[tokio::test]
    async fn test_body_on_get_is_rejected() {
        let err = RequestBuilder::get("https://example.com")
            .body_bytes(Bytes::from_static(b"x"))
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EncodingError::BodyNotAllowed { method } if method == Method::GET
        ));
    }

    #[tokio::test]
    async fn test_http_rejected_when_tls_only() {
        let err = RequestBuilder::new("http://example.com")
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodingError::InvalidScheme { scheme, .. } if scheme == "http"));

        RequestBuilder::new("http://example.com")
            .build(TransportSecurity::AllowInsecureHttp)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_scheme_and_relative_url() {
        let err = RequestBuilder::new("ftp://example.com/file")
            .build(TransportSecurity::AllowInsecureHttp)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodingError::InvalidScheme { scheme, .. } if scheme == "ftp"));

        let err = RequestBuilder::new("/relative/path")
            .build(TransportSecurity::TlsOnly)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EncodingError::InvalidUri {
                kind: InvalidUriKind::MissingScheme,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_builder_is_reusable_template() {
        let template = RequestBuilder::post("https://example.com/media");
        let first = template
            .clone()
            .body_multipart([MultipartField::text("a", "1")]);
        let a = first.build(TransportSecurity::TlsOnly).await.unwrap();
        let b = first.build(TransportSecurity::TlsOnly).await.unwrap();
        // Fresh boundary per send
        assert_ne!(a.headers()[CONTENT_TYPE], b.headers()[CONTENT_TYPE]);
        assert!(!template.has_body());
    }
}
