//! Active time window routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::active_time::GateState;
use crate::api::error::ApiResult;
use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct ActiveTimeResponse {
    /// `HH:MM:SS-HH:MM:SS`
    pub window: String,
    pub gate: GateState,
}

#[derive(Debug, Deserialize)]
pub struct UpdateActiveTimeRequest {
    pub window: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_active_time).put(update_active_time))
}

fn response(state: &AppState) -> ActiveTimeResponse {
    ActiveTimeResponse {
        window: state.gate.window().to_string(),
        gate: state.gate.state(),
    }
}

pub async fn get_active_time(State(state): State<AppState>) -> Json<ActiveTimeResponse> {
    Json(response(&state))
}

/// Replace the window. The gate re-evaluates right away.
pub async fn update_active_time(
    State(state): State<AppState>,
    Json(request): Json<UpdateActiveTimeRequest>,
) -> ApiResult<Json<ActiveTimeResponse>> {
    state.gate.set_window(request.window.trim())?;
    Ok(Json(response(&state)))
}
