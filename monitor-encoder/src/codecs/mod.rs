//! Codec, probe, demux and mux operations.
//!
//! Every operation is an async trait object looked up by name in a
//! [`CodecRegistry`]. The external implementations drive command-line tools;
//! tests register in-process fakes instead.

mod audio;
mod demux;
mod mux;
mod probe;
mod video;

pub use audio::{AudioCopy, PipedAudioEncoder};
pub use demux::Eac3toDemuxer;
pub use mux::{Lsmash, Mkvmerge, lsmash_args, mkvmerge_args};
pub use probe::{ProbeInfo, VspipeProber, parse_probe_output};
pub use video::{EncoderKind, Progress, VapourSynthEncoder, encoder_args, parse_progress};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use process_utils::{CommandSpec, SegmentReader, run_to_completion, spawn_piped, wait_piped};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::active_time::ActiveTimeGate;
use crate::status::StatusRegistry;
use crate::task::{AudioTrack, DemuxTrack, Task};
use crate::tools::ToolPaths;
use crate::{Error, Result};

/// What an encoder needs besides the task itself.
pub struct EncodeContext<'a> {
    pub work_dir: &'a Path,
    pub registry: &'a StatusRegistry,
    pub gate: &'a ActiveTimeGate,
    pub token: &'a CancellationToken,
}

/// Encodes the task's rendered script into an elementary video stream.
#[async_trait]
pub trait VideoCodec: Send + Sync {
    async fn encode(&self, task: &Task, ctx: &EncodeContext<'_>) -> Result<PathBuf>;
}

/// Reads frame count and frame rate from a rendered script.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, script: &Path, token: &CancellationToken) -> Result<ProbeInfo>;
}

#[async_trait]
pub trait AudioCodec: Send + Sync {
    async fn encode(
        &self,
        task: &Task,
        track: &AudioTrack,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf>;
}

#[async_trait]
pub trait Demuxer: Send + Sync {
    async fn demux(
        &self,
        task: &Task,
        track: &DemuxTrack,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Muxes every result accumulated on the task into one container.
#[async_trait]
pub trait MuxFormat: Send + Sync {
    async fn mux(&self, task: &Task, work_dir: &Path, token: &CancellationToken)
    -> Result<PathBuf>;
}

/// Name-indexed codec tables.
#[derive(Clone)]
pub struct CodecRegistry {
    video: HashMap<String, Arc<dyn VideoCodec>>,
    audio: HashMap<String, Arc<dyn AudioCodec>>,
    mux: HashMap<String, Arc<dyn MuxFormat>>,
    prober: Arc<dyn Prober>,
    demuxer: Arc<dyn Demuxer>,
}

impl CodecRegistry {
    /// Empty tables around the given prober and demuxer.
    pub fn new(prober: Arc<dyn Prober>, demuxer: Arc<dyn Demuxer>) -> Self {
        Self {
            video: HashMap::new(),
            audio: HashMap::new(),
            mux: HashMap::new(),
            prober,
            demuxer,
        }
    }

    /// Tables backed by the external tools.
    pub fn external(tools: &ToolPaths) -> Self {
        let mut registry = Self::new(
            Arc::new(VspipeProber::new(&tools.vspipe)),
            Arc::new(Eac3toDemuxer::new(&tools.eac3to)),
        )
        .with_video(
            "hevc",
            VapourSynthEncoder::new(EncoderKind::Hevc, &tools.vspipe, &tools.x265),
        )
        .with_video(
            "avc",
            VapourSynthEncoder::new(EncoderKind::Avc, &tools.vspipe, &tools.x264),
        )
        .with_audio(
            "opus",
            PipedAudioEncoder::opus(&tools.eac3to, &tools.opusenc),
        )
        .with_audio("aac", PipedAudioEncoder::aac(&tools.eac3to, &tools.qaac))
        .with_mux("mkv", Mkvmerge::new(&tools.mkvmerge))
        .with_mux("mp4", Lsmash::new(&tools.lsmashmuxer));

        for codec in ["flac", "ac3", "dts", "thd"] {
            registry = registry.with_audio(codec, AudioCopy::new(codec, &tools.eac3to));
        }
        registry
    }

    pub fn with_video(mut self, name: &str, codec: impl VideoCodec + 'static) -> Self {
        self.video.insert(name.to_string(), Arc::new(codec));
        self
    }

    pub fn with_audio(mut self, name: &str, codec: impl AudioCodec + 'static) -> Self {
        self.audio.insert(name.to_string(), Arc::new(codec));
        self
    }

    pub fn with_mux(mut self, name: &str, format: impl MuxFormat + 'static) -> Self {
        self.mux.insert(name.to_string(), Arc::new(format));
        self
    }

    pub fn video(&self, name: &str) -> Result<Arc<dyn VideoCodec>> {
        self.video
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownVideoCodec(name.to_string()))
    }

    pub fn audio(&self, track: &AudioTrack) -> Result<Arc<dyn AudioCodec>> {
        self.audio
            .get(&track.codec)
            .cloned()
            .ok_or_else(|| Error::UnknownAudioCodec {
                track: track.track,
                codec: track.codec.clone(),
            })
    }

    pub fn mux(&self, format: &str) -> Result<Arc<dyn MuxFormat>> {
        self.mux
            .get(format)
            .cloned()
            .ok_or_else(|| Error::UnknownMuxFormat(format.to_string()))
    }

    pub fn prober(&self) -> &Arc<dyn Prober> {
        &self.prober
    }

    pub fn demuxer(&self) -> &Arc<dyn Demuxer> {
        &self.demuxer
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut video: Vec<_> = self.video.keys().collect();
        let mut audio: Vec<_> = self.audio.keys().collect();
        let mut mux: Vec<_> = self.mux.keys().collect();
        video.sort();
        audio.sort();
        mux.sort();
        f.debug_struct("CodecRegistry")
            .field("video", &video)
            .field("audio", &audio)
            .field("mux", &mux)
            .finish_non_exhaustive()
    }
}

/// `eac3to <src> <track>: <output> -log=NUL`
fn eac3to_extract(eac3to: &Path, src: &str, track: u32, output: impl AsRef<Path>) -> CommandSpec {
    CommandSpec::new(eac3to)
        .arg(src)
        .arg(format!("{track}:"))
        .arg(output.as_ref())
        .arg("-log=NUL")
}

async fn run_tool(spec: &CommandSpec, token: &CancellationToken) -> Result<()> {
    run_to_completion(spec, token).await?;
    Ok(())
}

/// Run `producer | consumer`, logging the consumer's stderr at debug level.
async fn run_tool_pipe(
    producer: &CommandSpec,
    consumer: &CommandSpec,
    token: &CancellationToken,
) -> Result<()> {
    let mut children = spawn_piped(producer, consumer)?;
    let stderr = children.take_consumer_stderr();
    let tool = consumer.display_name();

    let drain = async {
        if let Some(stderr) = stderr {
            let mut segments = SegmentReader::new(stderr);
            while let Ok(Some(line)) = segments.next_segment().await {
                debug!(tool = %tool, "{line}");
            }
        }
    };
    let (_, waited) = tokio::join!(drain, wait_piped(children, token));
    waited?;
    Ok(())
}
