use async_trait::async_trait;
use pipeline_common::{BoxError, CancellationToken, HandleOutcome, StageHandler};
use tracing::{debug, info};

use super::{StageServices, record_failure, require_dirs};
use crate::status::StatusCode;
use crate::task::Task;
use crate::Error;

pub struct MuxHandler {
    services: StageServices,
}

impl MuxHandler {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StageHandler<Task> for MuxHandler {
    type Error = Error;

    fn kind(&self) -> &'static str {
        "mux"
    }

    fn check_ready(&self) -> Result<(), BoxError> {
        require_dirs(&[&self.services.dirs.work])
    }

    async fn handle(
        &self,
        task: &mut Task,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, Error> {
        let Some(format) = task.mux_format().map(str::to_string) else {
            debug!(src = %task.src(), "No container requested, skipping mux");
            return Ok(HandleOutcome::Forward);
        };

        self.services
            .registry
            .set_status(task.src(), StatusCode::Mux, format!("muxing {format}"));
        let muxer = self.services.codecs.mux(&format)?;
        let output = muxer.mux(task, &self.services.dirs.work, token).await?;
        info!(src = %task.src(), output = %output.display(), "Muxed");
        task.muxed_file = Some(output);

        Ok(HandleOutcome::Forward)
    }

    fn on_failure(&self, task: &Task, error: &Error) {
        record_failure(&self.services.registry, self.kind(), task, error);
    }
}
