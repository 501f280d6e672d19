use crate::models::instance::FieldError;
use crate::services::{instance_service::InstanceError, repository::RepositoryError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        let status = match &err {
            RepositoryError::MissingCredential(_)
            | RepositoryError::Configuration(_)
            | RepositoryError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            RepositoryError::Communication { .. } => StatusCode::BAD_GATEWAY,
            RepositoryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<InstanceError> for AppError {
    fn from(err: InstanceError) -> Self {
        let status = match &err {
            InstanceError::NotFound(_) => StatusCode::NOT_FOUND,
            InstanceError::NameTaken(_) => StatusCode::CONFLICT,
            InstanceError::EmptyName => StatusCode::BAD_REQUEST,
            InstanceError::Corrupt { .. } | InstanceError::Sqlx(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

/// Form validation failures, returned rather than raised.
#[derive(Debug)]
pub struct ValidationFailed(pub Vec<FieldError>);

impl IntoResponse for ValidationFailed {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "errors": self.0,
            "status": StatusCode::UNPROCESSABLE_ENTITY.as_u16()
        }));
        (StatusCode::UNPROCESSABLE_ENTITY, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn repository_errors_map_to_statuses() {
        let cases = [
            (RepositoryError::MissingCredential("access key is required"), 400),
            (RepositoryError::InvalidPath("../x".into()), 400),
            (
                RepositoryError::Communication {
                    repository: "r".into(),
                    detail: "timeout".into(),
                },
                502,
            ),
        ];
        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status.as_u16(), status);
        }
    }

    #[test]
    fn communication_message_keeps_detail() {
        let app: AppError = RepositoryError::Communication {
            repository: "s3bucket 1".into(),
            detail: "NoSuchBucket".into(),
        }
        .into();
        assert_eq!(
            app.message,
            "error while communicating with s3bucket 1: NoSuchBucket"
        );
    }

    #[test]
    fn instance_errors_map_to_statuses() {
        let app: AppError = InstanceError::NotFound(Uuid::nil()).into();
        assert_eq!(app.status, StatusCode::NOT_FOUND);
        let app: AppError = InstanceError::NameTaken("a".into()).into();
        assert_eq!(app.status, StatusCode::CONFLICT);
    }
}
