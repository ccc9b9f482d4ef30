//! Request bookkeeping and fault injection, applied to every HTTP route.

use axum::{
  extract::{Request, State},
  http::StatusCode,
  middleware::Next,
  response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{ApiError, StubState};

pub(crate) async fn intercept(State(state): State<StubState>, req: Request, next: Next) -> Response {
  let route = format!("{} {}", req.method(), req.uri().path());
  *state.inner.hits.lock().entry(route.clone()).or_default() += 1;
  *state.inner.last_headers.lock() = Some(req.headers().clone());

  let delay = *state.inner.delay.lock();
  if let Some(delay) = delay {
    tokio::time::sleep(delay).await;
  }

  let injected = state
    .inner
    .faults
    .lock()
    .get_mut(&route)
    .and_then(|queue| queue.pop_front());
  if let Some(code) = injected {
    debug!(%route, code, "injecting failure");
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    return ApiError::Injected(status).into_response();
  }

  next.run(req).await
}
