use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use minigame_types::{
    api::{CompleteSessionRequest, ErrorBody, ErrorCode, StartSessionRequest},
    now_ms, SessionId,
};
use std::sync::Arc;

use crate::{Authority, AuthorityError};

pub(super) async fn healthz() -> &'static str {
    "ok"
}

pub(super) async fn limits(AxumState(authority): AxumState<Arc<Authority>>) -> Response {
    Json(authority.limits(now_ms())).into_response()
}

pub(super) async fn start_session(
    AxumState(authority): AxumState<Arc<Authority>>,
    Json(request): Json<StartSessionRequest>,
) -> Response {
    match authority.start(request, now_ms()) {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

pub(super) async fn complete_session(
    AxumState(authority): AxumState<Arc<Authority>>,
    Path(id): Path<String>,
    Json(request): Json<CompleteSessionRequest>,
) -> Response {
    let session_id = SessionId::new(id);
    match authority.complete(&session_id, request, now_ms()) {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

pub(super) fn error_response(err: AuthorityError) -> Response {
    let code = err.code();
    let status = match code {
        ErrorCode::QuotaExceeded => StatusCode::CONFLICT,
        ErrorCode::SessionExpired => StatusCode::GONE,
        ErrorCode::UnknownSession => StatusCode::NOT_FOUND,
        ErrorCode::InvalidMetrics => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ErrorBody::new(code, err.to_string()))).into_response()
}
