//! Logging API routes.
//!
//! View and replace the active log filter.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    /// Current filter directive
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

fn logging_config(state: &AppState) -> ApiResult<&LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

fn response(logging_config: &LoggingConfig) -> LoggingConfigResponse {
    let modules = available_modules()
        .into_iter()
        .map(|(name, desc)| ModuleInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    LoggingConfigResponse {
        filter: logging_config.get_filter(),
        available_modules: modules,
    }
}

pub async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    Ok(Json(response(logging_config(&state)?)))
}

pub async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = logging_config(&state)?;
    logging_config.set_filter(&request.filter)?;
    Ok(Json(response(logging_config)))
}

#[cfg(test)]
mod tests {
    use crate::api::routes::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn filter_can_be_read_and_replaced() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/logging", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("monitor_encoder=info"));

        let (status, body) = app
            .send("PUT", "/api/logging", Some(r#"{"filter":"monitor_encoder=debug"}"#))
            .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["filter"], "monitor_encoder=debug");
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected() {
        let app = TestApp::new();
        let (status, _) = app
            .send("PUT", "/api/logging", Some(r#"{"filter":"monitor_encoder=shouting"}"#))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
