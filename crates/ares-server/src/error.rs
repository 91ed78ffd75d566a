use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::{CipherError, StoreError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("secret not found")]
    NotFound,
    #[error("secret has already been accessed")]
    AlreadyConsumed,
    #[error("secret has expired")]
    Expired,
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("storage operation `{0}` timed out")]
    StoreTimeout(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid<T: Into<String>>(message: T) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyConsumed | Self::Expired => StatusCode::GONE,
            Self::Cipher(_) | Self::Store(_) | Self::StoreTimeout(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
