//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by a stub handler. Rendered as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The requested transition is not legal from the lead's current status.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unprocessable: {0}")]
  Unprocessable(String),

  /// A failure queued with [`StubState::fail_next`](crate::StubState::fail_next).
  #[error("injected failure ({0})")]
  Injected(StatusCode),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Injected(status) => *status,
    };
    let detail = match self {
      ApiError::NotFound(m)
      | ApiError::BadRequest(m)
      | ApiError::Conflict(m)
      | ApiError::Unprocessable(m) => m,
      ApiError::Injected(_) => "injected failure".to_owned(),
    };
    (status, Json(json!({ "detail": detail }))).into_response()
  }
}
