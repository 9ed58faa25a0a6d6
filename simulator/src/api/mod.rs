use axum::{
    extract::{Request, State as AxumState},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{Authority, AuthorityError};

mod http;

pub struct Api {
    authority: Arc<Authority>,
}

impl Api {
    pub fn new(authority: Arc<Authority>) -> Self {
        Self { authority }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(http::healthz))
            .route("/limits", get(http::limits))
            .route("/sessions", post(http::start_session))
            .route("/sessions/:id/complete", post(http::complete_session))
            .layer(middleware::from_fn_with_state(
                self.authority.clone(),
                reject_when_offline,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.authority.clone())
    }
}

async fn reject_when_offline(
    AxumState(authority): AxumState<Arc<Authority>>,
    req: Request,
    next: Next,
) -> Response {
    if authority.is_offline() {
        return http::error_response(AuthorityError::Unavailable);
    }
    next.run(req).await.into_response()
}
