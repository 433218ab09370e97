//! Panic reporting through `tracing`, so panics in worker tasks reach the
//! log file as well as stderr.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::error;

use crate::logging::LOG_FILE_PREFIX;

/// What is known about a panic at the moment it happens.
#[derive(Debug)]
struct PanicReport {
    thread: String,
    location: String,
    message: String,
}

impl PanicReport {
    fn new(thread: Option<&str>, location: Option<String>, payload: &(dyn Any + Send)) -> Self {
        Self {
            thread: thread.unwrap_or("<unnamed>").to_string(),
            location: location.unwrap_or_else(|| "<unknown>".to_string()),
            message: payload_text(payload),
        }
    }

    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let location = info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));
        Self::new(std::thread::current().name(), location, info.payload())
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "panic in thread '{}' at {}: {}",
            self.thread, self.location, self.message
        )
    }
}

/// Text of a panic payload. `panic!` produces either a `&str` or a `String`.
fn payload_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn daily_log_file(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_PREFIX}.{}", date.format("%Y-%m-%d")))
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()
}

/// Report panics as `tracing` errors, then run the previous hook.
///
/// When the binary aborts on panic the buffered log writer never flushes,
/// so the report is also appended to today's log file directly.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let report = PanicReport::capture(info);
            error!(
                target: "monitor_encoder::panic",
                thread = %report.thread,
                location = %report.location,
                backtrace = %Backtrace::force_capture(),
                "{}",
                report.message
            );

            if cfg!(panic = "abort") {
                let path = daily_log_file(&log_dir, Local::now().date_naive());
                let _ = append_line(&path, &format!("{} {report}", Local::now().to_rfc3339()));
            }
        }));

        previous(info);
    }));
}
