//! Error type for the sessions service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use engine::{EngineError, MoveError, SessionError, StoreError};

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed request body or parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Engine(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
                EngineError::Session(SessionError::NotParticipant) => StatusCode::FORBIDDEN,
                EngineError::Session(_) => StatusCode::CONFLICT,
                EngineError::Move(MoveError::Illegal(_)) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Move(_) => StatusCode::CONFLICT,
                EngineError::Negotiation(_) => StatusCode::CONFLICT,
                EngineError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
                EngineError::Store(StoreError::Corrupt(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
