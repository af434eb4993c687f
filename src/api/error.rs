use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::links::LinkError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a domain error to its status and JSON body.
/// Storage failures are logged and their details kept out of the response.
pub fn api_error(err: LinkError) -> ApiError {
    let status = err.status_code();
    let message = match &err {
        LinkError::Storage(e) => {
            tracing::error!(error = %e, "storage operation failed");
            "Internal server error".to_string()
        }
        other => other.to_string(),
    };

    (status, Json(ErrorResponse { error: message }))
}
