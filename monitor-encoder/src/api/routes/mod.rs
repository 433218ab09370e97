//! API route modules.
//!
//! Organizes routes by resource type.

pub mod active_time;
pub mod health;
pub mod logging;
pub mod status;
pub mod tasks;

use axum::Router;
use axum::routing::{get, post};

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status::status_page))
        .route("/api/status", get(status::status_json))
        .route("/api/newtask", post(tasks::new_task))
        .nest("/api/activetime", active_time::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::active_time::{ActiveTimeGate, ActiveTimeWindow};
    use crate::api::server::AppState;
    use crate::logging::{DEFAULT_LOG_FILTER, LoggingConfig};
    use crate::status::StatusRegistry;

    pub struct TestApp {
        pub monitor: TempDir,
        pub state: AppState,
        pub token: CancellationToken,
    }

    impl TestApp {
        pub fn new() -> Self {
            let monitor = tempfile::tempdir().unwrap();
            let token = CancellationToken::new();
            let logging =
                LoggingConfig::detached(DEFAULT_LOG_FILTER, monitor.path().join("logs")).unwrap();
            let state = AppState::new(
                Arc::new(StatusRegistry::new()),
                ActiveTimeGate::spawn(ActiveTimeWindow::disabled(), token.clone()),
                monitor.path().to_path_buf(),
            )
            .with_logging_config(Arc::new(logging));
            Self {
                monitor,
                state,
                token,
            }
        }

        /// Send one request and return status plus body text.
        pub async fn send(&self, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
            let mut builder = Request::builder().method(method).uri(uri);
            if body.is_some() {
                builder = builder.header("content-type", "application/json");
            }
            let request = builder
                .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
                .unwrap();

            let response = super::create_router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, String::from_utf8(bytes.to_vec()).unwrap())
        }
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            self.token.cancel();
        }
    }
}
