use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

use imago_core::IiifError;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP-facing error: a status code plus a detail message. The response body
/// is plain text, `"{reason phrase}[: {detail}]"`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let reason = self
            .status
            .canonical_reason()
            .unwrap_or("Unknown error");

        let body = if self.message.is_empty() {
            reason.to_string()
        } else {
            format!("{}: {}", reason, self.message)
        };

        tracing::error!("request failed ({}): {}", reason, self.message);

        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain")],
            body,
        )
            .into_response()
    }
}

impl From<IiifError> for AppError {
    fn from(err: IiifError) -> Self {
        let status = match err {
            IiifError::BadRegion(_)
            | IiifError::BadSize(_)
            | IiifError::BadRotation(_)
            | IiifError::BadQualityFormat(_)
            | IiifError::BadIdentifier(_)
            | IiifError::UpscalingForbidden
            | IiifError::SizeTooLarge(_)
            | IiifError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            IiifError::Unauthorized => StatusCode::UNAUTHORIZED,
            IiifError::NotFound(_) => StatusCode::NOT_FOUND,
            IiifError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            IiifError::Decoder(_) | IiifError::Encoder(_) | IiifError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
