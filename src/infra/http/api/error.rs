use crate::application::blobs::BlobError;
use crate::application::error::ErrorReport;
use crate::application::tasks::TaskServiceError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const NOT_FOUND: &str = "not_found";
    pub const VALIDATION: &str = "validation_error";
    pub const STORAGE: &str = "storage_error";
    pub const PERSISTENCE: &str = "persistence_error";
    pub const TRANSPORT: &str = "transport_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    /// Internal failure whose full chain is logged but not exposed.
    fn internal(code: &'static str, message: &'static str, error: &dyn std::error::Error) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        Self {
            status,
            code,
            message,
            hint: None,
            report: Some(ErrorReport::from_error("infra::http::api", status, error)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

impl From<TaskServiceError> for ApiError {
    fn from(err: TaskServiceError) -> Self {
        match &err {
            TaskServiceError::Validation(inner) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::VALIDATION,
                "Invalid image upload",
                Some(inner.to_string()),
            ),
            TaskServiceError::NotFound => ApiError::not_found("task not found"),
            TaskServiceError::Storage(_) => {
                ApiError::internal(codes::STORAGE, "Failed to store image", &err)
            }
            TaskServiceError::Persistence(_) => {
                ApiError::internal(codes::PERSISTENCE, "Failed to persist task", &err)
            }
            TaskServiceError::Transport(_) => ApiError::internal(
                codes::TRANSPORT,
                "Failed to schedule image processing",
                &err,
            ),
        }
    }
}

pub(crate) fn blob_to_api(err: BlobError) -> ApiError {
    match err {
        BlobError::NotFound { .. } => ApiError::not_found("image not found"),
        BlobError::InvalidPath { path } => {
            ApiError::bad_request("invalid image path", Some(path))
        }
        other => ApiError::internal(codes::STORAGE, "Failed to read image", &other),
    }
}

pub(crate) fn multipart_to_api(message: &'static str, err: MultipartError) -> ApiError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        codes::PAYLOAD_TOO_LARGE
    } else {
        codes::BAD_REQUEST
    };
    ApiError::new(status, code, message, Some(err.body_text()))
}

pub(crate) fn path_to_api(err: PathRejection) -> ApiError {
    ApiError::bad_request("invalid task id", Some(err.body_text()))
}
