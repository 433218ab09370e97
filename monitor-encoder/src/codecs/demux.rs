use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Demuxer, eac3to_extract, run_tool};
use crate::Result;
use crate::task::{DemuxTrack, Task};

/// Track extraction through eac3to; the requested format is the extension.
#[derive(Debug, Clone)]
pub struct Eac3toDemuxer {
    eac3to: PathBuf,
}

impl Eac3toDemuxer {
    pub fn new(eac3to: &Path) -> Self {
        Self {
            eac3to: eac3to.to_path_buf(),
        }
    }
}

#[async_trait]
impl Demuxer for Eac3toDemuxer {
    async fn demux(
        &self,
        task: &Task,
        track: &DemuxTrack,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let language = (!track.language.is_empty()).then_some(track.language.as_str());
        let output = task.artifact_path(work_dir, &track.format, language, track.track);
        run_tool(&eac3to_extract(&self.eac3to, task.src(), track.track, &output), token).await?;
        Ok(output)
    }
}
