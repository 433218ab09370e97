//! Locations of the external tools.
//!
//! Tools live under one base directory given by `MONITOR_ENCODER_BIN_PATH`,
//! each at a fixed relative path. Without a base directory the bare names are
//! looked up on `PATH`.

use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result};

pub const BIN_PATH_ENV: &str = "MONITOR_ENCODER_BIN_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub eac3to: PathBuf,
    pub vspipe: PathBuf,
    pub x265: PathBuf,
    pub x264: PathBuf,
    pub opusenc: PathBuf,
    pub qaac: PathBuf,
    pub mkvmerge: PathBuf,
    pub lsmashmuxer: PathBuf,
}

fn tool(base: Option<&Path>, relative: &str) -> PathBuf {
    let file = format!("{relative}{EXE_SUFFIX}");
    match base {
        Some(base) => base.join(file),
        None => PathBuf::from(file),
    }
}

impl ToolPaths {
    pub fn from_base(base: Option<&Path>) -> Self {
        Self {
            eac3to: tool(base, "eac3to/eac3to"),
            vspipe: tool(base, "vspipe"),
            x265: tool(base, "x265-10b"),
            x264: tool(base, "x264_64"),
            opusenc: tool(base, "opusenc"),
            qaac: tool(base, "qaac"),
            mkvmerge: tool(base, "mkvtoolnix/mkvmerge"),
            lsmashmuxer: tool(base, "lsmashmuxer"),
        }
    }

    /// Read the base directory from `MONITOR_ENCODER_BIN_PATH`.
    pub fn from_env() -> Self {
        let base = std::env::var_os(BIN_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        debug!(base = ?base, "Resolving external tool paths");
        Self::from_base(base.as_deref())
    }

    pub fn all(&self) -> [(&'static str, &Path); 8] {
        [
            ("eac3to", &self.eac3to),
            ("vspipe", &self.vspipe),
            ("x265", &self.x265),
            ("x264", &self.x264),
            ("opusenc", &self.opusenc),
            ("qaac", &self.qaac),
            ("mkvmerge", &self.mkvmerge),
            ("lsmashmuxer", &self.lsmashmuxer),
        ]
    }

    /// Fail with the list of tools that cannot be found.
    pub fn check_availability(&self) -> Result<()> {
        let missing: Vec<String> = self
            .all()
            .into_iter()
            .filter(|(_, path)| !is_available(path))
            .map(|(name, path)| {
                warn!(tool = name, path = %path.display(), "External tool not found");
                format!("{name} ({})", path.display())
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "external tools not found: {}",
                missing.join(", ")
            )))
        }
    }
}

fn is_available(path: &Path) -> bool {
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(path).is_file()))
        .unwrap_or(false)
}
