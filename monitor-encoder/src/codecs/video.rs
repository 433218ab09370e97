use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use process_utils::{CommandSpec, SegmentReader, spawn_piped, wait_piped};
use regex::Regex;
use tracing::{debug, info};

use super::{EncodeContext, VideoCodec};
use crate::task::Task;
use crate::{Error, Result};

static PROGRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) frames:").unwrap());
static FINISHED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"encoded \d+ frames").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Hevc,
    Avc,
}

impl EncoderKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Hevc => "hevc",
            Self::Avc => "avc",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Hevc => "hevc",
            Self::Avc => "264",
        }
    }

    fn tool(self) -> &'static str {
        match self {
            Self::Hevc => "x265",
            Self::Avc => "x264",
        }
    }
}

/// One line of encoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Frame(u64),
    Finished,
}

pub fn parse_progress(line: &str) -> Option<Progress> {
    if FINISHED_REGEX.is_match(line) {
        return Some(Progress::Finished);
    }
    PROGRESS_REGEX
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
        .map(Progress::Frame)
}

/// Encoder arguments: fixed y4m input on stdin, then the task's own parameters.
pub fn encoder_args(kind: EncoderKind, output: &Path, param: &str) -> Vec<String> {
    let mut args: Vec<String> = match kind {
        EncoderKind::Hevc => vec!["-D".into(), "10".into(), "--y4m".into()],
        EncoderKind::Avc => vec!["--demuxer".into(), "y4m".into()],
    };
    args.push("--output".into());
    args.push(output.to_string_lossy().into_owned());
    args.push("-".into());
    args.extend(param.split(' ').filter(|p| !p.is_empty()).map(str::to_string));
    args
}

/// `vspipe -y <script> - | <encoder> ...`
#[derive(Debug, Clone)]
pub struct VapourSynthEncoder {
    kind: EncoderKind,
    vspipe: PathBuf,
    encoder: PathBuf,
}

impl VapourSynthEncoder {
    pub fn new(kind: EncoderKind, vspipe: &Path, encoder: &Path) -> Self {
        Self {
            kind,
            vspipe: vspipe.to_path_buf(),
            encoder: encoder.to_path_buf(),
        }
    }
}

#[async_trait]
impl VideoCodec for VapourSynthEncoder {
    async fn encode(&self, task: &Task, ctx: &EncodeContext<'_>) -> Result<PathBuf> {
        let script = task
            .script_file
            .as_deref()
            .ok_or_else(|| Error::encode("no script generated"))?;
        let label = self.kind.label();
        let output = task.artifact_path(ctx.work_dir, self.kind.extension(), None, 0);

        let producer = CommandSpec::new(&self.vspipe).arg("-y").arg(script).arg("-");
        let consumer =
            CommandSpec::new(&self.encoder).args(encoder_args(self.kind, &output, &task.param));

        info!(src = %task.src(), codec = label, "Starting video encode");
        let mut children = spawn_piped(&producer, &consumer)?;
        let stderr = children
            .take_consumer_stderr()
            .ok_or_else(|| Error::encode(format!("{} has no stderr", consumer.display_name())))?;

        let mut segments = SegmentReader::new(stderr);
        let mut finished = false;
        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return Err(Error::Cancelled),
                line = segments.next_segment() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(src = %task.src(), error = %e, "Encoder output unreadable");
                    break;
                }
            };

            match parse_progress(&line) {
                Some(Progress::Frame(n)) => {
                    ctx.registry.set_status_desc(
                        task.src(),
                        format!("{label} encoding frame: {n}/{}", task.total_frames),
                    );
                    // Holding the pipe here stalls the encoder until admitted.
                    ctx.gate.wait_admission(ctx.token).await?;
                }
                Some(Progress::Finished) => {
                    finished = true;
                    ctx.registry
                        .set_status_desc(task.src(), format!("{label} encoding done"));
                }
                None => debug!(src = %task.src(), "{line}"),
            }
        }

        let waited = wait_piped(children, ctx.token).await;
        if ctx.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !finished {
            return Err(Error::encode(format!(
                "{} encoding didn't finish",
                self.kind.tool()
            )));
        }
        waited?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines() {
        assert_eq!(
            parse_progress("1234 frames: 23.98 fps, 4567.89 kb/s"),
            Some(Progress::Frame(1234))
        );
        assert_eq!(
            parse_progress("[12.3%] 310/2500 frames, 20.1 fps"),
            None
        );
        assert_eq!(
            parse_progress("encoded 2500 frames in 120.00s (20.83 fps), 3000.00 kb/s"),
            Some(Progress::Finished)
        );
        assert_eq!(parse_progress("x265 [info]: HEVC encoder version 3.5"), None);
    }

    #[test]
    fn hevc_arguments() {
        let args = encoder_args(
            EncoderKind::Hevc,
            Path::new("w/a.mkv.hevc"),
            "--crf 18  --preset slow",
        );
        assert_eq!(
            args,
            vec![
                "-D", "10", "--y4m", "--output", "w/a.mkv.hevc", "-", "--crf", "18", "--preset",
                "slow"
            ]
        );
    }

    #[test]
    fn avc_arguments_without_params() {
        let args = encoder_args(EncoderKind::Avc, Path::new("w/a.mkv.264"), "");
        assert_eq!(args, vec!["--demuxer", "y4m", "--output", "w/a.mkv.264", "-"]);
        assert_eq!(EncoderKind::Avc.extension(), "264");
    }
}
