use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors a session request can end with
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Upload {0} not found")]
    UploadNotFound(usize),

    #[error("No merged video available")]
    NoOutput,

    #[error("At least {required} videos are required, got {actual}")]
    NotEnoughVideos { required: usize, actual: usize },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload name must be a plain file name: {0}")]
    InvalidUploadName(String),

    #[error("Upload body is empty")]
    EmptyUpload,

    #[error("Upload exceeds the limit of {0} bytes")]
    UploadTooLarge(usize),

    #[error("A merge is already running for this session")]
    MergeInProgress,

    #[error("{tool} exited with {status}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            MergeError::SessionNotFound | MergeError::UploadNotFound(_) | MergeError::NoOutput => {
                StatusCode::NOT_FOUND
            }
            MergeError::NotEnoughVideos { .. }
            | MergeError::InvalidSettings(_)
            | MergeError::InvalidUploadName(_)
            | MergeError::EmptyUpload => StatusCode::BAD_REQUEST,
            MergeError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            MergeError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            MergeError::MergeInProgress => StatusCode::CONFLICT,
            MergeError::ToolFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MergeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

impl IntoResponse for MergeError {
    fn into_response(self) -> Response {
        let status = self.to_status_code();
        let stderr = match &self {
            MergeError::ToolFailed { stderr, .. } => Some(stderr.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            stderr,
        };
        (status, Json(body)).into_response()
    }
}

pub type MergeResult<T> = Result<T, MergeError>;
