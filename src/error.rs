use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Student not found")]
    StudentNotFound,

    #[error("No active intervention found for this student")]
    NoActiveIntervention,

    #[error("Email already exists")]
    DuplicateEmail,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::StudentNotFound => StatusCode::NOT_FOUND,
            AppError::NoActiveIntervention => StatusCode::BAD_REQUEST,
            AppError::DuplicateEmail => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Store failures get logged in full but the caller only ever
        // sees a generic message.
        let message = match &self {
            AppError::Database(err) => {
                error!("database error: {err}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Postgres unique-violation (duplicate email on registration).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_expected_status_codes() {
        assert_eq!(
            AppError::Validation("student_id is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::StudentNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::NoActiveIntervention.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::DuplicateEmail.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Database(sqlx::Error::PoolClosed).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
