//! Post-processing of [`HttpClient::send`](crate::HttpClient::send) results.
//!
//! ```ignore
//! let post: Post = client
//!     .send(&request, &SendOptions::new())
//!     .await
//!     .map_unacceptable_status_code_error(RestEndpointError::from_response)
//!     .decode_success()?;
//! ```

use crate::error::{ApiError, BoxError};
use crate::response::HttpResponse;
use serde::de::DeserializeOwned;

/// Combinators on the raw outcome of a send.
pub trait ApiResultExt<E>: Sized {
    /// JSON-decode a successful body into `M`.
    ///
    /// # Errors
    /// [`ApiError::UnparsableResponse`] if decoding fails; errors pass through.
    fn decode_success<M: DeserializeOwned>(self) -> Result<M, ApiError<E>>;

    /// Decode a successful response with `decode`.
    ///
    /// # Errors
    /// [`ApiError::UnparsableResponse`] if `decode` fails; errors pass through.
    fn decode_success_with<M, F, D>(self, decode: F) -> Result<M, ApiError<E>>
    where
        F: FnOnce(&HttpResponse) -> Result<M, D>,
        D: Into<BoxError>;

    /// Offer an unacceptable response to `recognize`.
    ///
    /// `Some(err)` turns the failure into [`ApiError::EndpointError`]; `None`
    /// keeps the original error. Successes and other errors pass through.
    #[must_use]
    fn map_unacceptable_status_code_error<F>(self, recognize: F) -> Self
    where
        F: FnOnce(&HttpResponse) -> Option<E>;
}

impl<E> ApiResultExt<E> for Result<HttpResponse, ApiError<E>> {
    fn decode_success<M: DeserializeOwned>(self) -> Result<M, ApiError<E>> {
        self.decode_success_with(HttpResponse::json::<M>)
    }

    fn decode_success_with<M, F, D>(self, decode: F) -> Result<M, ApiError<E>>
    where
        F: FnOnce(&HttpResponse) -> Result<M, D>,
        D: Into<BoxError>,
    {
        let response = self?;
        match decode(&response) {
            Ok(model) => Ok(model),
            Err(err) => {
                let source = err.into();
                tracing::debug!(
                    status = %response.status(),
                    error = %source,
                    "response body could not be decoded"
                );
                Err(ApiError::UnparsableResponse { response, source })
            }
        }
    }

    fn map_unacceptable_status_code_error<F>(self, recognize: F) -> Self
    where
        F: FnOnce(&HttpResponse) -> Option<E>,
    {
        match self {
            Err(ApiError::UnacceptableStatusCode { response }) => match recognize(&response) {
                Some(err) => Err(ApiError::EndpointError(err)),
                None => Err(ApiError::UnacceptableStatusCode { response }),
            },
            other => other,
        }
    }
}
