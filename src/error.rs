use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors produced while fetching candles, building datasets, training, or serving.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Exchange answered with a non-success status. Status and body are kept verbatim.
    #[error("upstream returned {status}: {body}")]
    UpstreamUnavailable { status: u16, body: String },

    #[error("Unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("Model is not available: {0}")]
    ModelUnavailable(String),

    /// Not enough contiguous history to fill one encoder window (plus horizon when training).
    #[error("insufficient data for {symbol}: need {required} rows, have {available}")]
    DataInsufficient {
        symbol: String,
        required: usize,
        available: usize,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("unusable model artifact: {0}")]
    Artifact(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ForecastError {
    fn from(e: serde_json::Error) -> Self {
        Self::Artifact(e.to_string())
    }
}

impl From<config::ConfigError> for ForecastError {
    fn from(e: config::ConfigError) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

impl From<csv::Error> for ForecastError {
    fn from(e: csv::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

impl IntoResponse for ForecastError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::UnsupportedToken(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Unsupported token" }),
            ),
            Self::UpstreamUnavailable { status, body } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                json!({
                    "error": "Failed to retrieve data from Binance API",
                    "details": body,
                }),
            ),
            Self::ModelUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Model is not available" }),
            ),
            Self::DataInsufficient { .. } | Self::Decode(_) => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": "Failed to retrieve data from Binance API",
                    "details": self.to_string(),
                }),
            ),
            Self::Transport(e) => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": "Failed to retrieve data from Binance API",
                    "details": e.to_string(),
                }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}
