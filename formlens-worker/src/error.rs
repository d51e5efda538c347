use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;
use crate::store::StoreError;

/// Errors surfaced by the processor. Everything recoverable has already
/// been recovered inside the pipeline by the time one of these is raised.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("invalid document id: {0}")]
    InvalidInput(String),

    #[error("document not found: {document_id}")]
    NotFound { document_id: String },

    #[error("storage operation failed")]
    Storage(#[from] StorageError),

    #[error("detection pipeline failed")]
    Pipeline(#[source] anyhow::Error),

    #[error("database operation failed")]
    Persistence(#[from] StoreError),
}

impl ProcessError {
    /// Stable error-kind tag recorded into `documents.error_message`.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::InvalidInput(_) => "InvalidInput",
            ProcessError::NotFound { .. } => "NotFound",
            ProcessError::Storage(_) => "StorageFailure",
            ProcessError::Pipeline(_) => "RenderFailure",
            ProcessError::Persistence(_) => "PersistenceFailure",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ProcessError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProcessError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ProcessError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = format!("{}: {:#}", self.kind(), anyhow::Error::from(self));
        (status, Json(ErrorBody { detail })).into_response()
    }
}
