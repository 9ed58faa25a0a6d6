use crate::Result;
use minigame_types::{
    api::{
        CompleteSessionRequest, CompleteSessionResponse, DailyLimitsResponse,
        StartSessionRequest, StartSessionResponse,
    },
    SessionId,
};
use std::future::Future;

/// The server-side source of truth for session validity, elapsed time and rewards.
///
/// [crate::Client] implements this over HTTP; [crate::mocks::MockAuthority] implements it in
/// memory for tests.
pub trait SessionAuthority: Send + Sync + 'static {
    fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> impl Future<Output = Result<StartSessionResponse>> + Send;

    /// `local_score` in the request is a hint; the authority computes the reward itself.
    fn complete_session(
        &self,
        session_id: &SessionId,
        request: CompleteSessionRequest,
    ) -> impl Future<Output = Result<CompleteSessionResponse>> + Send;

    fn daily_limits(&self) -> impl Future<Output = Result<DailyLimitsResponse>> + Send;
}
