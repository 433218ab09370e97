use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::CommandSpec;
use tokio_util::sync::CancellationToken;

use super::{MuxFormat, run_tool};
use crate::Result;
use crate::task::Task;

/// `-o <output> [--language 0:<lang>] <path> ...`
pub fn mkvmerge_args(task: &Task, output: &Path) -> Vec<String> {
    let mut args = vec!["-o".to_string(), output.to_string_lossy().into_owned()];
    for result in task.results() {
        if let Some(language) = &result.language {
            args.push("--language".into());
            args.push(format!("0:{language}"));
        }
        args.push(result.path.to_string_lossy().into_owned());
    }
    args
}

/// `-o <output> -i <video>?fps=<num>/<den> -i <path>[?language=<lang>] ...`
pub fn lsmash_args(task: &Task, output: &Path) -> Vec<String> {
    let mut args = vec!["-o".to_string(), output.to_string_lossy().into_owned()];
    for result in task.results() {
        let path = result.path.to_string_lossy();
        let input = if result.is_video() {
            format!("{path}?fps={}/{}", task.fps_num, task.fps_den)
        } else if let Some(language) = &result.language {
            format!("{path}?language={language}")
        } else {
            path.into_owned()
        };
        args.push("-i".into());
        args.push(input);
    }
    args
}

#[derive(Debug, Clone)]
pub struct Mkvmerge {
    mkvmerge: PathBuf,
}

impl Mkvmerge {
    pub fn new(mkvmerge: &Path) -> Self {
        Self {
            mkvmerge: mkvmerge.to_path_buf(),
        }
    }
}

#[async_trait]
impl MuxFormat for Mkvmerge {
    async fn mux(
        &self,
        task: &Task,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let output = task.artifact_path(work_dir, "mkv", None, 0);
        let spec = CommandSpec::new(&self.mkvmerge).args(mkvmerge_args(task, &output));
        run_tool(&spec, token).await?;
        Ok(output)
    }
}

#[derive(Debug, Clone)]
pub struct Lsmash {
    muxer: PathBuf,
}

impl Lsmash {
    pub fn new(muxer: &Path) -> Self {
        Self {
            muxer: muxer.to_path_buf(),
        }
    }
}

#[async_trait]
impl MuxFormat for Lsmash {
    async fn mux(
        &self,
        task: &Task,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let output = task.artifact_path(work_dir, "mp4", None, 0);
        let spec = CommandSpec::new(&self.muxer).args(lsmash_args(task, &output));
        run_tool(&spec, token).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskResult;

    fn muxable_task() -> Task {
        let mut task = Task::new("a.mkv");
        task.fps_num = 24000;
        task.fps_den = 1001;
        task.add_result(TaskResult::video(PathBuf::from("w/a.mkv.hevc")));
        task.add_result(TaskResult::non_video(PathBuf::from("w/a.mkv.track2.jpn.flac"), "jpn", 2));
        task.add_result(TaskResult::non_video(PathBuf::from("w/a.mkv.track3.sup"), "", 3));
        task
    }

    #[test]
    fn mkvmerge_tags_languages_per_track() {
        let args = mkvmerge_args(&muxable_task(), Path::new("w/a.mkv.mkv"));
        assert_eq!(
            args,
            vec![
                "-o",
                "w/a.mkv.mkv",
                "w/a.mkv.hevc",
                "--language",
                "0:jpn",
                "w/a.mkv.track2.jpn.flac",
                "w/a.mkv.track3.sup"
            ]
        );
    }

    #[test]
    fn lsmash_video_track_carries_frame_rate() {
        let args = lsmash_args(&muxable_task(), Path::new("w/a.mkv.mp4"));
        assert_eq!(
            args,
            vec![
                "-o",
                "w/a.mkv.mp4",
                "-i",
                "w/a.mkv.hevc?fps=24000/1001",
                "-i",
                "w/a.mkv.track2.jpn.flac?language=jpn",
                "-i",
                "w/a.mkv.track3.sup"
            ]
        );
    }
}
