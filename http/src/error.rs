use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};
use node_metrics_core::Error;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ingest(#[from] Error),
    #[error("request body is not valid JSON")]
    MalformedJson,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Ingest(Error::Unauthorized | Error::OracleFailure(_)) => StatusCode::FORBIDDEN,
            AppError::Ingest(Error::InvalidPayload(_)) | AppError::MalformedJson => StatusCode::BAD_REQUEST,
            AppError::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason; oracle failures are reported as plain
    /// authorization denials.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            AppError::Ingest(Error::OracleFailure(_)) => Error::Unauthorized.reason(),
            AppError::Ingest(err) => err.reason(),
            AppError::MalformedJson => "invalid_payload",
        }
    }

    /// What the caller gets to see. Internal failures stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Ingest(Error::OracleFailure(_)) => Error::Unauthorized.to_string(),
            AppError::Ingest(Error::SinkUnavailable(_) | Error::PersistenceFailure(_)) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status(),
            axum::Json(serde_json::json!({
                "error": self.public_message(),
                "reason": self.reason(),
            })),
        )
            .into_response()
    }
}
