//! Gateway error type and its HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use geo_core::AnalysisError;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// Errors returned by the gateway to HTTP clients.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request body is missing a field or a field is malformed.
    #[error("Parámetros inválidos: {0}")]
    Validation(String),

    /// The `funcion` discriminator names no procedure on this route.
    #[error("Función no válida: {0}")]
    UnknownFunction(String),

    /// A remote analysis failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The mail provider rejected or failed to deliver a message.
    #[error("Mail error: {0}")]
    Mail(String),
}

impl GatewayError {
    /// Builds a [`GatewayError::Validation`] from anything printable.
    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }

    /// HTTP status reported for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownFunction(_) => StatusCode::BAD_REQUEST,
            Self::Analysis(AnalysisError::InvalidParameter(_)) => StatusCode::BAD_REQUEST,
            Self::Analysis(AnalysisError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Analysis(AnalysisError::RateLimited { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Analysis(_) | Self::Mail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "Request failed");
        } else {
            debug!(%status, error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type alias using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;
