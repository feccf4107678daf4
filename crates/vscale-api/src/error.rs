//! API error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::ServerConfig;
use vscale_media::MediaError;
use vscale_models::KeyError;
use vscale_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Media(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Plain-text body sent to the client.
    fn public_message(&self) -> String {
        match self {
            ApiError::Storage(e) if e.is_create_dir() => {
                "Could not create output directory".to_string()
            }
            ApiError::Media(_) => "Failed to start transcoding".to_string(),
            ApiError::Internal(_) | ApiError::Storage(_) => {
                if ServerConfig::is_production() {
                    "Internal Server Error".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::NoMatch => ApiError::not_found("Not Found"),
            KeyError::InvalidWidth(_) | KeyError::UnsafePath(_) => {
                ApiError::bad_request(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(status = %status, "Request failed: {}", self);
        } else {
            debug!(status = %status, "Request rejected: {}", self);
        }

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use axum::body::to_bytes;

    use super::*;

    async fn render(error: ApiError) -> (StatusCode, String) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_key_errors_map_to_client_errors() {
        assert_eq!(
            render(KeyError::NoMatch.into()).await,
            (StatusCode::NOT_FOUND, "Not Found".to_string())
        );
        assert_eq!(
            render(KeyError::InvalidWidth("360".into()).into()).await,
            (StatusCode::BAD_REQUEST, "Invalid Width".to_string())
        );
        assert_eq!(
            render(KeyError::UnsafePath("../x".into()).into()).await,
            (StatusCode::BAD_REQUEST, "Invalid file path".to_string())
        );
    }

    #[tokio::test]
    async fn test_server_errors_use_fixed_messages() {
        let storage = StorageError::create_dir("/out/480", io::Error::other("read-only"));
        assert_eq!(
            render(storage.into()).await,
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not create output directory".to_string()
            )
        );

        let media = MediaError::FfmpegNotFound("ffmpeg".into());
        assert_eq!(
            render(media.into()).await,
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to start transcoding".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_unavailable_sets_retry_after() {
        let response = ApiError::unavailable("Too many active transcodes").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
