use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use process_utils::{CommandSpec, run_to_completion};
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Prober;
use crate::{Error, Result};

static FRAMES_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Frames:\s*(\d+)").unwrap());
static FPS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"FPS:\s*(\d+)/(\d+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeInfo {
    pub total_frames: u64,
    pub fps_num: u32,
    pub fps_den: u32,
}

/// Parse the clip information printed by `vspipe -i`.
pub fn parse_probe_output(output: &str) -> Result<ProbeInfo> {
    let total_frames = FRAMES_REGEX
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| Error::Indexing("frame count not found".into()))?;
    let (fps_num, fps_den) = FPS_REGEX
        .captures(output)
        .and_then(|caps| Some((caps[1].parse().ok()?, caps[2].parse().ok()?)))
        .ok_or_else(|| Error::Indexing("frame rate not found".into()))?;

    Ok(ProbeInfo {
        total_frames,
        fps_num,
        fps_den,
    })
}

#[derive(Debug, Clone)]
pub struct VspipeProber {
    vspipe: PathBuf,
}

impl VspipeProber {
    pub fn new(vspipe: &Path) -> Self {
        Self {
            vspipe: vspipe.to_path_buf(),
        }
    }
}

#[async_trait]
impl Prober for VspipeProber {
    async fn probe(&self, script: &Path, token: &CancellationToken) -> Result<ProbeInfo> {
        let spec = CommandSpec::new(&self.vspipe).arg("-i").arg(script).arg("-");
        let output = run_to_completion(&spec, token).await.map_err(|e| match Error::from(e) {
            Error::Cancelled => Error::Cancelled,
            other => Error::Indexing(other.to_string()),
        })?;
        parse_probe_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vspipe_info() {
        let output = "Width: 1920\nHeight: 1080\nFrames: 34046\nFPS: 24000/1001 (23.976 fps)\nFormat Name: YUV420P16\n";
        assert_eq!(
            parse_probe_output(output).unwrap(),
            ProbeInfo {
                total_frames: 34046,
                fps_num: 24000,
                fps_den: 1001
            }
        );
    }

    #[test]
    fn missing_fields_are_indexing_errors() {
        let err = parse_probe_output("Width: 1920\nFPS: 25/1\n").unwrap_err();
        assert_eq!(err.to_string(), "indexing failed: frame count not found");

        let err = parse_probe_output("Frames: 10\nFPS: variable\n").unwrap_err();
        assert!(matches!(err, Error::Indexing(_)));
    }
}
