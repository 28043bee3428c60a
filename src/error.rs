use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("You do not have permission to access this instance")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container operation conflict: {0}")]
    OperationConflict(String),

    #[error("Failed to start container {0}")]
    StartFailed(String),

    #[error("Database connection failed")]
    ConnectionFailed(String),

    #[error("No free port in range {start}-{end}")]
    ResourceExhausted { start: u16, end: u16 },

    #[error("Catalog error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            Self::ContainerNotFound(_) => "CONTAINER_NOT_FOUND",
            Self::OperationConflict(_) => "OPERATION_CONFLICT",
            Self::StartFailed(_) => "START_FAILED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "UNKNOWN",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RuntimeUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ContainerNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OperationConflict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StartFailed(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionFailed(_) => StatusCode::BAD_REQUEST,
            Self::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the runtime-call failures of the container adapter.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::RuntimeUnavailable(_) | Self::ContainerNotFound(_) | Self::OperationConflict(_)
        )
    }
}

impl From<bollard::errors::Error> for AppError {
    fn from(e: bollard::errors::Error) -> Self {
        use bollard::errors::Error as DockerError;

        match e {
            DockerError::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::ContainerNotFound(message),
            DockerError::DockerResponseServerError {
                status_code: 304 | 409,
                message,
            } => Self::OperationConflict(message),
            other => Self::RuntimeUnavailable(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        Self::Validation(e.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(e: PathRejection) -> Self {
        Self::Validation(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        Self::Validation(e.body_text())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Self::Storage(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_runtime() {
            tracing::error!("Runtime call failed: {}", self);
        }

        // Connection errors carry driver text that may echo the connection string.
        let detail = match &self {
            Self::RuntimeUnavailable(msg)
            | Self::ContainerNotFound(msg)
            | Self::OperationConflict(msg)
            | Self::Storage(msg)
            | Self::Internal(msg) => Some(msg.clone()),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                detail,
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_status_codes_map_to_runtime_variants() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such container".into(),
        };
        assert!(matches!(AppError::from(not_found), AppError::ContainerNotFound(_)));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "already paused".into(),
        };
        assert!(matches!(AppError::from(conflict), AppError::OperationConflict(_)));

        let server = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(matches!(AppError::from(server), AppError::RuntimeUnavailable(_)));
    }

    #[test]
    fn forbidden_does_not_name_the_container() {
        let err = AppError::Forbidden;
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(!err.to_string().contains("exist"));
    }

    #[test]
    fn exhausted_range_reports_bounds() {
        let err = AppError::ResourceExhausted {
            start: 1100,
            end: 1200,
        };
        assert_eq!(err.code(), "RESOURCE_EXHAUSTED");
        assert!(err.to_string().contains("1100-1200"));
    }
}
