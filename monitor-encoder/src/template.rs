//! VapourSynth script generation.
//!
//! A template is a regular script with marker lines. The line following a
//! marker must be an assignment (`name = value`); its value is replaced and
//! the marker line itself is dropped:
//!
//! | marker             | replacement                  |
//! |--------------------|------------------------------|
//! | `###INPUTFILE###`  | `name = r"<src>"`            |
//! | `###DEBUG###`      | `name = False`               |
//! | `###SUBTITLE###`   | `name = r"<hard subtitle>"`  |
//!
//! All other lines are copied unchanged.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::task::Task;
use crate::{Error, Result};

static ASSIGNMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*=\s*\S+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Input,
    Debug,
    Subtitle,
}

impl Marker {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "###INPUTFILE###" => Some(Self::Input),
            "###DEBUG###" => Some(Self::Debug),
            "###SUBTITLE###" => Some(Self::Subtitle),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Input => "src",
            Self::Debug => "debug",
            Self::Subtitle => "subtitle",
        }
    }

    fn substitute(self, line: &str, task: &Task) -> Result<String> {
        let var = ASSIGNMENT_REGEX
            .captures(line)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                Error::Template(format!(
                    "failed to match template's {} variable",
                    self.label()
                ))
            })?;
        Ok(match self {
            Self::Input => format!("{var} = r\"{}\"", task.src()),
            Self::Debug => format!("{var} = False"),
            Self::Subtitle => format!("{var} = r\"{}\"", task.hard_sub().unwrap_or_default()),
        })
    }
}

/// Render a template for `task`.
pub fn render_script(template: &str, task: &Task) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 64);
    let mut pending: Option<Marker> = None;

    for line in template.lines() {
        if let Some(marker) = Marker::parse(line) {
            pending = Some(marker);
            continue;
        }
        match pending.take() {
            Some(marker) => out.push_str(&marker.substitute(line, task)?),
            None => out.push_str(line),
        }
        out.push('\n');
    }

    Ok(out)
}

/// Render the task's template into `work_dir` and return the script path.
pub async fn generate_script_file(task: &Task, work_dir: &Path) -> Result<PathBuf> {
    let template_path = Path::new(&task.template);
    let template = tokio::fs::read_to_string(template_path)
        .await
        .map_err(|e| {
            Error::Template(format!(
                "cannot read template {}: {e}",
                template_path.display()
            ))
        })?;

    let script = render_script(&template, task)?;
    let script_path = task.artifact_path(work_dir, "vpy", None, 0);
    tokio::fs::write(&script_path, script)
        .await
        .map_err(|e| Error::io_path("writing script", &script_path, e))?;
    Ok(script_path)
}
