use async_trait::async_trait;
use pipeline_common::{BoxError, CancellationToken, HandleOutcome, StageHandler};
use tracing::{debug, info};

use super::{StageServices, record_failure, require_dirs, require_source};
use crate::codecs::EncodeContext;
use crate::status::StatusCode;
use crate::task::{Task, TaskResult};
use crate::template::generate_script_file;
use crate::Error;

/// Renders the script, probes it and encodes the video stream.
pub struct TranscodeHandler {
    services: StageServices,
}

impl TranscodeHandler {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StageHandler<Task> for TranscodeHandler {
    type Error = Error;

    fn kind(&self) -> &'static str {
        "transcode"
    }

    fn check_ready(&self) -> Result<(), BoxError> {
        require_dirs(&[&self.services.dirs.work])
    }

    async fn handle(
        &self,
        task: &mut Task,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, Error> {
        let StageServices {
            registry,
            gate,
            codecs,
            dirs,
        } = &self.services;

        require_source(task).await?;
        let codec = codecs.video(&task.video)?;

        if !gate.state().admits() {
            registry.set_status_desc(task.src(), format!("waiting for active time ({})", gate.state()));
        }
        gate.wait_admission(token).await?;

        let script = generate_script_file(task, &dirs.work).await?;
        debug!(src = %task.src(), script = %script.display(), "Script generated");
        task.script_file = Some(script.clone());

        registry.set_status(task.src(), StatusCode::Video, "indexing");
        let info = codecs.prober().probe(&script, token).await?;
        task.total_frames = info.total_frames;
        task.fps_num = info.fps_num;
        task.fps_den = info.fps_den;
        info!(
            src = %task.src(),
            frames = info.total_frames,
            fps = %format!("{}/{}", info.fps_num, info.fps_den),
            "Indexing finished"
        );

        let ctx = EncodeContext {
            work_dir: &dirs.work,
            registry,
            gate,
            token,
        };
        let output = codec.encode(task, &ctx).await?;
        info!(src = %task.src(), output = %output.display(), "Video encoded");
        task.add_result(TaskResult::video(output));

        Ok(HandleOutcome::Forward)
    }

    fn on_failure(&self, task: &Task, error: &Error) {
        record_failure(&self.services.registry, self.kind(), task, error);
    }
}
