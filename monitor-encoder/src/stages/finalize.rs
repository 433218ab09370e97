use async_trait::async_trait;
use pipeline_common::{BoxError, CancellationToken, HandleOutcome, StageHandler};
use tracing::info;

use super::{StageServices, record_failure, require_dirs};
use crate::status::StatusCode;
use crate::task::Task;
use crate::utils::fs::{delete_artifact, move_artifact};
use crate::Error;

/// Moves the finished artifacts to the output directory. The last stage: the
/// task is consumed here.
pub struct FinalizeHandler {
    services: StageServices,
}

impl FinalizeHandler {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StageHandler<Task> for FinalizeHandler {
    type Error = Error;

    fn kind(&self) -> &'static str {
        "finalize"
    }

    fn check_ready(&self) -> Result<(), BoxError> {
        require_dirs(&[&self.services.dirs.work, &self.services.dirs.output])
    }

    async fn handle(
        &self,
        task: &mut Task,
        _token: &CancellationToken,
    ) -> Result<HandleOutcome, Error> {
        let registry = &self.services.registry;
        let output_dir = &self.services.dirs.output;

        registry.set_status(task.src(), StatusCode::Final, "copying output files");

        for file in [&task.script_file, &task.task_file].into_iter().flatten() {
            move_artifact(file, output_dir).await?;
        }

        match &task.muxed_file {
            Some(muxed) => {
                for result in task.results() {
                    delete_artifact(&result.path).await?;
                }
                move_artifact(muxed, output_dir).await?;
            }
            None => {
                for result in task.results() {
                    move_artifact(&result.path, output_dir).await?;
                }
            }
        }

        registry.set_status(task.src(), StatusCode::Done, "everything is finished");
        info!(src = %task.src(), output_dir = %output_dir.display(), "Task finished");
        Ok(HandleOutcome::Consumed)
    }

    fn on_failure(&self, task: &Task, error: &Error) {
        record_failure(&self.services.registry, self.kind(), task, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;
    use crate::task::TaskResult;
    use std::path::PathBuf;

    fn artifact(fixture: &Fixture, name: &str) -> PathBuf {
        let path = fixture.services.dirs.work.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[tokio::test]
    async fn moves_results_without_mux() {
        let fixture = Fixture::new();
        let handler = FinalizeHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        task.script_file = Some(artifact(&fixture, "a.mkv.vpy"));
        task.task_file = Some(artifact(&fixture, "job.json"));
        task.add_result(TaskResult::video(artifact(&fixture, "a.mkv.hevc")));

        let outcome = handler.handle(&mut task, &fixture.token).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Consumed);
        let out = &fixture.services.dirs.output;
        for name in ["a.mkv.vpy", "job.json", "a.mkv.hevc"] {
            assert!(out.join(name).is_file(), "{name}");
            assert!(!fixture.services.dirs.work.join(name).exists(), "{name}");
        }
        let status = fixture.status(&task).unwrap();
        assert_eq!((status.code, status.desc.as_str()), (StatusCode::Done, "everything is finished"));
    }

    #[tokio::test]
    async fn muxed_file_replaces_results() {
        let fixture = Fixture::new();
        let handler = FinalizeHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        task.add_result(TaskResult::video(artifact(&fixture, "a.mkv.hevc")));
        task.add_result(TaskResult::non_video(artifact(&fixture, "a.mkv.track2.flac"), "", 2));
        task.muxed_file = Some(artifact(&fixture, "a.mkv.mkv"));

        handler.handle(&mut task, &fixture.token).await.unwrap();
        let out = &fixture.services.dirs.output;
        assert!(out.join("a.mkv.mkv").is_file());
        assert!(!out.join("a.mkv.hevc").exists());
        assert!(!fixture.services.dirs.work.join("a.mkv.hevc").exists());
        assert!(!fixture.services.dirs.work.join("a.mkv.track2.flac").exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_a_move_error() {
        let fixture = Fixture::new();
        let handler = FinalizeHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        let gone = fixture.services.dirs.work.join("a.mkv.hevc");
        task.add_result(TaskResult::video(gone.clone()));

        let err = handler.handle(&mut task, &fixture.token).await.unwrap_err();
        assert_eq!(err.to_string(), format!("failed to move {}", gone.display()));
        handler.on_failure(&task, &err);
        assert_eq!(fixture.status(&task).unwrap().code, StatusCode::Error);
    }
}
