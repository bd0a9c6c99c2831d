use crate::error::TransportError;
use crate::progress::Progress;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use tower_http::follow_redirect::RequestUri;

/// Streaming body handed up by the middleware stack, already decompressed.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Completed HTTP exchange: status, headers and the full body.
///
/// Produced by [`HttpClient::send`](crate::HttpClient::send) once the body has
/// been read. The body is already decompressed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: Option<Uri>,
}

impl HttpResponse {
    /// Create a response from its parts.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            url: None,
        }
    }

    #[must_use]
    pub(crate) fn with_url(mut self, url: Uri) -> Self {
        self.url = Some(url);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The URL that produced this response, after redirects were followed.
    #[must_use]
    pub fn url(&self) -> Option<&Uri> {
        self.url.as_ref()
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body bytes.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// `Content-Type` header value, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Body as text. Invalid UTF-8 sequences are replaced with U+FFFD.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    /// Returns the `serde_json` error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Read a response body to the end.
///
/// Enforces `limit` on decompressed bytes and reports every frame to
/// `progress`. Progress is expressed against `Content-Length` when the
/// server sent one.
pub(crate) async fn collect_body(
    response: Response<ResponseBody>,
    limit: usize,
    progress: Option<&Progress>,
) -> Result<HttpResponse, TransportError> {
    let url = response
        .extensions()
        .get::<RequestUri>()
        .map(|uri| uri.0.clone());
    let (parts, body) = response.into_parts();

    let expected = parts
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut collected = BytesMut::new();
    let mut received: u64 = 0;
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(TransportError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
            received += chunk.len() as u64;
            if let Some(progress) = progress {
                progress.record_transfer(received, expected);
            }
        }
    }

    let response = HttpResponse::new(parts.status, parts.headers, collected.freeze());
    Ok(match url {
        Some(url) => response.with_url(url),
        None => response,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn boxed(body: &'static [u8], content_length: Option<usize>) -> Response<ResponseBody> {
        let mut builder = Response::builder().status(StatusCode::OK);
        if let Some(len) = content_length {
            builder = builder.header(http::header::CONTENT_LENGTH, len);
        }
        let body: ResponseBody = Full::new(Bytes::from_static(body))
            .map_err(Into::into)
            .boxed();
        builder.body(body).unwrap()
    }

    #[tokio::test]
    async fn test_collect_body_reads_everything() {
        let response = collect_body(boxed(b"hello world", Some(11)), 1024, None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"hello world");
        assert!(response.url().is_none());
    }

    #[tokio::test]
    async fn test_collect_body_enforces_limit() {
        let result = collect_body(boxed(b"0123456789", None), 4, None).await;
        assert!(matches!(
            result,
            Err(TransportError::BodyTooLarge {
                limit: 4,
                actual: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_collect_body_reports_progress() {
        let progress = Progress::new(20);
        collect_body(boxed(b"abcd", Some(4)), 1024, Some(&progress))
            .await
            .unwrap();
        // Fully transferred, but completion is only marked by the pipeline.
        assert_eq!(progress.completed_unit_count(), 20);
        assert!(!progress.is_finished());
    }

    #[test]
    fn test_text_and_json_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        let response = HttpResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(br#"{"value":42}"#),
        );

        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.text(), r#"{"value":42}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["value"], 42);
    }
}
