//! End-to-end behavior of `HttpClient::send` against a mock server.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use httpmock::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wpkit_http::{
    AcceptableStatus, ApiError, ApiResultExt, Authenticator, HttpClient, HttpClientBuilder,
    MultipartField, Progress, Rejection, RequestAdapter, RequestBuilder, RequestRetrier,
    RestApiError, RestEndpointError, RetryDecision, SendOptions,
};

fn client() -> HttpClient {
    HttpClientBuilder::new().allow_insecure_http().build().unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct Post {
    id: u64,
    title: String,
}

#[tokio::test]
async fn not_found_outside_acceptable_range_keeps_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/wp-json/wp/v2/posts/9");
            then.status(404)
                .header("content-type", "application/json")
                .body(r#"{"code":"rest_post_invalid_id"}"#);
        })
        .await;

    let request = RequestBuilder::get(server.base_url()).append_path("/wp-json/wp/v2/posts/9");
    let err = client()
        .send::<()>(&request, &SendOptions::new())
        .await
        .unwrap_err();

    let response = err.response().unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.body().as_ref(), br#"{"code":"rest_post_invalid_id"}"#);
}

#[tokio::test]
async fn not_found_inside_widened_range_is_success() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/wp-json/wp/v2/posts/9");
            then.status(404).body("raw \x00 bytes");
        })
        .await;

    let request = RequestBuilder::get(server.url("/wp-json/wp/v2/posts/9"));
    let options = SendOptions::new().acceptable(AcceptableStatus::new([200..=299, 400..=499]));
    let response = client().send::<()>(&request, &options).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.body().as_ref(), b"raw \x00 bytes");
}

#[tokio::test]
async fn decode_and_recognize_endpoint_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1.1/posts/1");
            then.status(200).json_body(serde_json::json!({"id": 1, "title": "Hello"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1.1/me");
            then.status(403)
                .json_body(serde_json::json!({"error": "invalid_token", "message": "Expired"}));
        })
        .await;

    let client = client();
    let post: Post = client
        .send(&RequestBuilder::get(server.url("/rest/v1.1/posts/1")), &SendOptions::new())
        .await
        .map_unacceptable_status_code_error(RestEndpointError::from_response)
        .decode_success()
        .unwrap();
    assert_eq!(
        post,
        Post {
            id: 1,
            title: "Hello".into()
        }
    );

    let err = client
        .send(&RequestBuilder::get(server.url("/rest/v1.1/me")), &SendOptions::new())
        .await
        .map_unacceptable_status_code_error(RestEndpointError::from_response)
        .decode_success::<Post>()
        .unwrap_err();
    match err {
        ApiError::EndpointError(e) => {
            assert_eq!(e.kind, RestApiError::InvalidToken);
            assert_eq!(e.message, "Expired");
        }
        other => panic!("expected EndpointError, got {other:?}"),
    }
}

#[tokio::test]
async fn multipart_upload_reaches_server() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/wp-json/wp/v2/media")
                .body_includes("Content-Disposition: form-data; name=\"name\"\r\n\r\nvalue\r\n")
                .body_includes(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n",
                );
            then.status(201);
        })
        .await;

    let request = RequestBuilder::post(server.url("/wp-json/wp/v2/media"))
        .header("Content-Type", "application/json")
        .body_multipart([
            MultipartField::text("name", "value"),
            MultipartField::bytes("file", "a.txt", Bytes::from_static(b"hello"))
                .content_type("text/plain"),
        ]);
    let response = client()
        .send::<()>(&request, &SendOptions::new())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(mock.calls(), 1);
}

struct CountingRetrier {
    consulted: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestRetrier for CountingRetrier {
    async fn retry(&self, _: Rejection<'_>) -> RetryDecision {
        self.consulted.fetch_add(1, Ordering::SeqCst);
        RetryDecision::Retry
    }
}

struct NoopAdapter;

impl RequestAdapter for NoopAdapter {
    fn adapt(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}

#[tokio::test]
async fn cancellation_before_completion_skips_retry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/wp-json/wp/v2/users/me");
            then.status(401).delay(Duration::from_millis(500));
        })
        .await;

    let consulted = Arc::new(AtomicUsize::new(0));
    let client = HttpClientBuilder::new()
        .allow_insecure_http()
        .authenticator(Authenticator::new(NoopAdapter).with_retrier(CountingRetrier {
            consulted: consulted.clone(),
        }))
        .build()
        .unwrap();

    let progress = Progress::default();
    let canceller = progress.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let request = RequestBuilder::get(server.url("/wp-json/wp/v2/users/me"));
    let err = client
        .send::<()>(&request, &SendOptions::new().progress(progress))
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
    // Let the server finish the delayed response before counting
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(consulted.load(Ordering::SeqCst), 0);
    assert!(mock.calls() <= 1);
}

#[tokio::test]
async fn clones_share_cookies() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/wp-login.php");
            then.status(200).header("set-cookie", "wordpress_test_cookie=WP+Cookie+check; path=/");
        })
        .await;
    let check = server
        .mock_async(|when, then| {
            when.path("/wp-admin/").header_exists("cookie");
            then.status(200);
        })
        .await;

    let client = client();
    let clone = client.clone();
    client
        .send::<()>(&RequestBuilder::get(server.url("/wp-login.php")), &SendOptions::new())
        .await
        .unwrap();
    clone
        .send::<()>(&RequestBuilder::get(server.url("/wp-admin/")), &SendOptions::new())
        .await
        .unwrap();

    assert_eq!(check.calls(), 1);
}
