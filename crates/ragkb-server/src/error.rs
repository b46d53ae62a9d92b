//! HTTP-facing error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::db::DbError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                ("INTERNAL_ERROR", "A database error occurred".to_string())
            },
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                ("INTERNAL_ERROR", "An internal error occurred".to_string())
            },
            AppError::ServiceUnavailable(ref message) => {
                tracing::warn!("Service unavailable: {}", message);
                ("SERVICE_UNAVAILABLE", message.clone())
            },
            AppError::NotFound(message) => ("NOT_FOUND", message),
            AppError::Validation(message) => ("VALIDATION_ERROR", message),
            AppError::BadRequest(message) => ("BAD_REQUEST", message),
            AppError::Unauthorized(message) => ("UNAUTHORIZED", message),
            AppError::Forbidden(message) => ("FORBIDDEN", message),
        };

        ErrorResponse::new(code, message).into_response_with(status)
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(message) => AppError::NotFound(message),
            DbError::Sqlx(e) if crate::db::is_transient(&e) => {
                AppError::ServiceUnavailable("database unavailable".to_string())
            },
            DbError::Sqlx(e) => AppError::Database(e),
            DbError::Corrupt(message) => AppError::Internal(message),
        }
    }
}

pub type ApiResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_db_error_mapping() {
        assert!(matches!(
            AppError::from(DbError::not_found("Document", 4)),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(DbError::Sqlx(sqlx::Error::PoolTimedOut)),
            AppError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            AppError::from(DbError::Sqlx(sqlx::Error::RowNotFound)),
            AppError::Database(_)
        ));
    }
}
