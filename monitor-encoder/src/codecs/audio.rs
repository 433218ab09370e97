use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::CommandSpec;
use tokio_util::sync::CancellationToken;

use super::{AudioCodec, eac3to_extract, run_tool, run_tool_pipe};
use crate::task::{AudioTrack, Task};
use crate::{Error, Result};

fn output_path(task: &Task, track: &AudioTrack, work_dir: &Path, ext: &str) -> PathBuf {
    let language = (!track.language.is_empty()).then_some(track.language.as_str());
    task.artifact_path(work_dir, ext, language, track.track)
}

/// Stream copy (or lossless re-encode for `flac`) done by eac3to alone. The
/// output extension selects the format.
#[derive(Debug, Clone)]
pub struct AudioCopy {
    ext: &'static str,
    eac3to: PathBuf,
}

impl AudioCopy {
    pub fn new(ext: &'static str, eac3to: &Path) -> Self {
        Self {
            ext,
            eac3to: eac3to.to_path_buf(),
        }
    }
}

#[async_trait]
impl AudioCodec for AudioCopy {
    async fn encode(
        &self,
        task: &Task,
        track: &AudioTrack,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let output = output_path(task, track, work_dir, self.ext);
        run_tool(&eac3to_extract(&self.eac3to, task.src(), track.track, &output), token).await?;
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LossyEncoder {
    Opus,
    Aac,
}

/// eac3to decodes the track to WAV on stdout, a lossy encoder reads it from
/// stdin.
#[derive(Debug, Clone)]
pub struct PipedAudioEncoder {
    encoder_kind: LossyEncoder,
    eac3to: PathBuf,
    encoder: PathBuf,
}

impl PipedAudioEncoder {
    pub fn opus(eac3to: &Path, opusenc: &Path) -> Self {
        Self {
            encoder_kind: LossyEncoder::Opus,
            eac3to: eac3to.to_path_buf(),
            encoder: opusenc.to_path_buf(),
        }
    }

    pub fn aac(eac3to: &Path, qaac: &Path) -> Self {
        Self {
            encoder_kind: LossyEncoder::Aac,
            eac3to: eac3to.to_path_buf(),
            encoder: qaac.to_path_buf(),
        }
    }

    fn ext(&self) -> &'static str {
        match self.encoder_kind {
            LossyEncoder::Opus => "opus",
            LossyEncoder::Aac => "aac",
        }
    }

    fn encoder_command(&self, bitrate: i32, output: &Path) -> CommandSpec {
        let bitrate = bitrate.to_string();
        let spec = CommandSpec::new(&self.encoder);
        match self.encoder_kind {
            LossyEncoder::Opus => spec
                .args(["--ignorelength", "--vbr", "--bitrate"])
                .arg(bitrate)
                .arg("-")
                .arg(output),
            LossyEncoder::Aac => spec
                .args(["-R", "--adts", "-v"])
                .arg(bitrate)
                .arg("-o")
                .arg(output)
                .arg("-"),
        }
    }
}

#[async_trait]
impl AudioCodec for PipedAudioEncoder {
    async fn encode(
        &self,
        task: &Task,
        track: &AudioTrack,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        if track.bitrate <= 0 {
            return Err(Error::encode(format!(
                "invalid bitrate setting for {} codec",
                self.ext()
            )));
        }
        let output = output_path(task, track, work_dir, self.ext());
        let decoder = eac3to_extract(&self.eac3to, task.src(), track.track, "stdout.wav");
        let encoder = self.encoder_command(track.bitrate, &output);
        run_tool_pipe(&decoder, &encoder, token).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(codec: &str, bitrate: i32, language: &str) -> AudioTrack {
        AudioTrack {
            track: 2,
            codec: codec.into(),
            bitrate,
            language: language.into(),
        }
    }

    #[tokio::test]
    async fn lossy_encoders_require_bitrate() {
        let task = Task::new("a.mkv");
        let opus = PipedAudioEncoder::opus(Path::new("eac3to"), Path::new("opusenc"));
        let err = opus
            .encode(&task, &track("opus", 0, ""), Path::new("w"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid bitrate setting for opus codec");

        let aac = PipedAudioEncoder::aac(Path::new("eac3to"), Path::new("qaac"));
        let err = aac
            .encode(&task, &track("aac", -1, ""), Path::new("w"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid bitrate setting for aac codec");
    }

    #[test]
    fn encoder_command_lines() {
        let output = Path::new("w/a.mkv.track2.jpn.opus");
        let opus = PipedAudioEncoder::opus(Path::new("eac3to"), Path::new("opusenc"));
        assert_eq!(
            opus.encoder_command(160, output).args_lossy(),
            vec!["--ignorelength", "--vbr", "--bitrate", "160", "-", "w/a.mkv.track2.jpn.opus"]
        );

        let output = Path::new("w/a.mkv.track2.aac");
        let aac = PipedAudioEncoder::aac(Path::new("eac3to"), Path::new("qaac"));
        assert_eq!(
            aac.encoder_command(256, output).args_lossy(),
            vec!["-R", "--adts", "-v", "256", "-o", "w/a.mkv.track2.aac", "-"]
        );
    }

    #[test]
    fn output_carries_track_and_language() {
        let task = Task::new("a.mkv");
        let path = output_path(&task, &track("flac", 0, "jpn"), Path::new("w"), "flac");
        assert_eq!(path, Path::new("w").join("a.mkv.track2.jpn.flac"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_is_reported() {
        let task = Task::new("a.mkv");
        let copy = AudioCopy::new("ac3", Path::new("false"));
        let err = copy
            .encode(&task, &track("ac3", 0, ""), Path::new("w"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)));
    }
}
