//! Job model.
//!
//! A [`Task`] is parsed from a JSON descriptor dropped into the monitored
//! directory. The declarative fields come from the descriptor; the derived
//! fields are filled in by the stages as the task moves through the pipeline.
//! A task is owned by exactly one stage at a time.

use std::path::{Path, PathBuf};

use pipeline_common::PipelineItem;
use serde::{Deserialize, Serialize};

use crate::utils::filename::artifact_file_path;
use crate::{Error, Result};

/// One audio sub-task: encode `track` of the source with `codec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTrack {
    pub track: u32,
    pub codec: String,
    /// Target bitrate in kbps. Required by the lossy codecs.
    pub bitrate: i32,
    pub language: String,
}

/// One demux sub-task: extract `track` of the source as `format`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxTrack {
    pub track: u32,
    pub format: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCategory {
    Video,
    NonVideo,
}

/// An artifact produced for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub path: PathBuf,
    pub category: ResultCategory,
    pub language: Option<String>,
    /// Source track number, 0 when not applicable.
    pub track: u32,
}

impl TaskResult {
    pub fn video(path: PathBuf) -> Self {
        Self {
            path,
            category: ResultCategory::Video,
            language: None,
            track: 0,
        }
    }

    pub fn non_video(path: PathBuf, language: &str, track: u32) -> Self {
        Self {
            path,
            category: ResultCategory::NonVideo,
            language: (!language.is_empty()).then(|| language.to_string()),
            track,
        }
    }

    pub fn is_video(&self) -> bool {
        self.category == ResultCategory::Video
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    src: String,
    pub template: String,
    pub param: String,
    pub video: String,
    pub audio: Vec<AudioTrack>,
    pub demux: Vec<DemuxTrack>,
    pub hardsub: String,
    pub mux: String,

    #[serde(skip)]
    pub total_frames: u64,
    #[serde(skip)]
    pub fps_num: u32,
    #[serde(skip)]
    pub fps_den: u32,
    #[serde(skip)]
    pub script_file: Option<PathBuf>,
    #[serde(skip)]
    pub task_file: Option<PathBuf>,
    #[serde(skip)]
    pub muxed_file: Option<PathBuf>,
    #[serde(skip)]
    results: Vec<TaskResult>,
}

impl Task {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    /// Parse a descriptor. `origin` is only used for error messages.
    pub fn from_json(bytes: &[u8], origin: &Path) -> Result<Self> {
        let task: Task =
            serde_json::from_slice(bytes).map_err(|e| Error::descriptor(origin, e.to_string()))?;
        if task.src.trim().is_empty() {
            return Err(Error::descriptor(origin, "src is empty"));
        }
        Ok(task)
    }

    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::descriptor(path, e.to_string()))?;
        Self::from_json(&bytes, path)
    }

    /// Primary input path, which is also the task's identity.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Container to mux into, if any.
    pub fn mux_format(&self) -> Option<&str> {
        non_empty(&self.mux)
    }

    /// Hard-subtitle file to burn in, if any.
    pub fn hard_sub(&self) -> Option<&str> {
        non_empty(&self.hardsub)
    }

    pub fn add_result(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    /// Artifacts in the order they were produced.
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    /// Path of an artifact derived from this task's source.
    pub fn artifact_path(&self, dir: &Path, ext: &str, language: Option<&str>, track: u32) -> PathBuf {
        artifact_file_path(&self.src, dir, ext, language, track)
    }
}

impl PipelineItem for Task {
    fn key(&self) -> &str {
        &self.src
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
