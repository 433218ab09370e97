//! Task submission.

use std::path::Path;

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::task::Task;
use crate::utils::filename::artifact_file_name;
use crate::Error;

#[derive(Debug, Serialize)]
pub struct NewTaskResponse {
    pub src: String,
    /// Descriptor file written to the monitor directory
    pub file: String,
}

/// `POST /api/newtask`: validate a descriptor and drop it into the monitor
/// directory.
///
/// The body is written under a temporary name and linked into place, so
/// discovery never reads a partial file and a descriptor that is still
/// waiting is never replaced.
pub async fn new_task(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<NewTaskResponse>)> {
    let task = Task::from_json(&body, Path::new("request body"))?;
    if state.registry.is_live(task.src()) {
        return Err(ApiError::conflict(format!(
            "{} is already being processed",
            task.src()
        )));
    }

    let file = artifact_file_name(task.src(), "json", None, 0);
    let target = state.monitor_dir.join(&file);
    let partial = state.monitor_dir.join(format!("{file}.part"));

    tokio::fs::write(&partial, &body)
        .await
        .map_err(|e| Error::io_path("writing descriptor", &partial, e))?;
    // A hard link never replaces an existing file, unlike a rename.
    let published = tokio::fs::hard_link(&partial, &target).await;
    let _ = tokio::fs::remove_file(&partial).await;
    match published {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(ApiError::conflict(format!(
                "a descriptor for {} is already waiting",
                task.src()
            )));
        }
        Err(e) => return Err(Error::io_path("publishing descriptor", &target, e).into()),
    }

    info!(src = %task.src(), file = %file, "Task submitted");
    Ok((
        StatusCode::CREATED,
        Json(NewTaskResponse {
            src: task.src().to_string(),
            file,
        }),
    ))
}
