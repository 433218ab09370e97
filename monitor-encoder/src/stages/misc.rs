use async_trait::async_trait;
use pipeline_common::{BoxError, CancellationToken, HandleOutcome, StageHandler};
use tracing::info;

use super::{StageServices, record_failure, require_dirs, require_source};
use crate::status::StatusCode;
use crate::task::{Task, TaskResult};
use crate::Error;

/// Audio encoding followed by track demuxing. Any failure aborts the task and
/// leaves the artifacts produced so far in the work directory.
pub struct MiscHandler {
    services: StageServices,
}

impl MiscHandler {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StageHandler<Task> for MiscHandler {
    type Error = Error;

    fn kind(&self) -> &'static str {
        "misc"
    }

    fn check_ready(&self) -> Result<(), BoxError> {
        require_dirs(&[&self.services.dirs.work])
    }

    async fn handle(
        &self,
        task: &mut Task,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, Error> {
        let registry = &self.services.registry;
        let codecs = &self.services.codecs;
        let work_dir = &self.services.dirs.work;

        require_source(task).await?;

        registry.set_status(task.src(), StatusCode::Misc, "handling audio task");
        for track in task.audio.clone() {
            registry.set_status_desc(
                task.src(),
                format!("encoding audio track #{} to {}", track.track, track.codec),
            );
            let codec = codecs.audio(&track)?;
            let output = codec.encode(task, &track, work_dir, token).await?;
            info!(src = %task.src(), track = track.track, output = %output.display(), "Audio track encoded");
            task.add_result(TaskResult::non_video(output, &track.language, track.track));
        }

        registry.set_status_desc(task.src(), "handling demux task");
        for track in task.demux.clone() {
            registry.set_status_desc(
                task.src(),
                format!("demuxing track #{}, format {}", track.track, track.format),
            );
            let output = codecs
                .demuxer()
                .demux(task, &track, work_dir, token)
                .await?;
            info!(src = %task.src(), track = track.track, output = %output.display(), "Track demuxed");
            task.add_result(TaskResult::non_video(output, &track.language, track.track));
        }

        Ok(HandleOutcome::Forward)
    }

    fn on_failure(&self, task: &Task, error: &Error) {
        record_failure(&self.services.registry, self.kind(), task, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;
    use crate::task::{AudioTrack, DemuxTrack};

    fn audio(track: u32, codec: &str) -> AudioTrack {
        AudioTrack {
            track,
            codec: codec.into(),
            bitrate: 0,
            language: "jpn".into(),
        }
    }

    #[tokio::test]
    async fn audio_then_demux_results_in_order() {
        let fixture = Fixture::new();
        let handler = MiscHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        task.audio = vec![audio(2, "flac")];
        task.demux = vec![DemuxTrack {
            track: 4,
            format: "sup".into(),
            language: String::new(),
        }];

        handler.handle(&mut task, &fixture.token).await.unwrap();
        let results = task.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].track, 2);
        assert_eq!(results[0].language.as_deref(), Some("jpn"));
        assert!(results[1].path.to_string_lossy().ends_with(".track4.sup"));
        assert_eq!(fixture.status(&task).unwrap().code, StatusCode::Misc);
        assert_eq!(fixture.status(&task).unwrap().desc, "demuxing track #4, format sup");
    }

    #[tokio::test]
    async fn unknown_audio_codec_aborts_the_task() {
        let fixture = Fixture::new();
        let handler = MiscHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        task.audio = vec![audio(1, "flac"), audio(2, "mp3")];

        let err = handler.handle(&mut task, &fixture.token).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown audio codec for track 2: mp3");
        // first track stays in the work directory
        assert_eq!(task.results().len(), 1);
        assert!(task.results()[0].path.is_file());
    }

    #[tokio::test]
    async fn audio_errors_propagate() {
        let fixture = Fixture::new();
        let handler = MiscHandler::new(fixture.services.clone());
        let mut task = fixture.task("a.mkv");
        task.audio = vec![audio(1, "broken")];

        let err = handler.handle(&mut task, &fixture.token).await.unwrap_err();
        handler.on_failure(&task, &err);
        let status = fixture.status(&task).unwrap();
        assert_eq!(status.code, StatusCode::Error);
        assert_eq!(status.desc, "audio tool crashed");
    }
}
