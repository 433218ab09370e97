//! Spawning external tools with cancellation support.
//!
//! Every command is spawned with `kill_on_drop`, so dropping a pending wait
//! (for example because the surrounding `select!` picked the cancellation
//! branch) also kills the child.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tokio_command;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exited { program: String, status: ExitStatus },

    #[error("{program} has no {stream} pipe")]
    MissingPipe {
        program: String,
        stream: &'static str,
    },

    #[error("process cancelled")]
    Cancelled,
}

/// Program plus arguments, kept as data until spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments as UTF-8 (lossy), mostly for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Short program name for log records and error messages.
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio_command(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: self.display_name(),
            source,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit status is an error. On cancellation the child is killed.
pub async fn run_to_completion(
    spec: &CommandSpec,
    token: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = spec.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command = %spec, "Spawning process");
    let child = cmd.spawn().map_err(|e| spec.spawn_error(e))?;

    let output = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(ProcessError::Cancelled),
        output = child.wait_with_output() => output.map_err(|source| ProcessError::Wait {
            program: spec.display_name(),
            source,
        })?,
    };

    if !output.status.success() {
        warn!(command = %spec, status = %output.status, "Process failed");
        return Err(ProcessError::Exited {
            program: spec.display_name(),
            status: output.status,
        });
    }

    Ok(ProcessOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// A producer whose stdout feeds a consumer's stdin.
#[derive(Debug)]
pub struct PipedChildren {
    producer: Child,
    consumer: Child,
    producer_name: String,
    consumer_name: String,
}

impl PipedChildren {
    /// Take the consumer's stderr, where encoders print their progress.
    pub fn take_consumer_stderr(&mut self) -> Option<ChildStderr> {
        self.consumer.stderr.take()
    }
}

/// Spawn `producer | consumer`.
///
/// The consumer's stdout is discarded and its stderr is piped.
pub fn spawn_piped(
    producer: &CommandSpec,
    consumer: &CommandSpec,
) -> Result<PipedChildren, ProcessError> {
    let mut first = producer.command();
    first
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    debug!(producer = %producer, consumer = %consumer, "Spawning piped processes");
    let mut first = first.spawn().map_err(|e| producer.spawn_error(e))?;

    let pipe = first
        .stdout
        .take()
        .ok_or_else(|| ProcessError::MissingPipe {
            program: producer.display_name(),
            stream: "stdout",
        })?;
    let pipe: Stdio = pipe.try_into().map_err(|e| producer.spawn_error(e))?;

    let mut second = consumer.command();
    second
        .stdin(pipe)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let second = second.spawn().map_err(|e| consumer.spawn_error(e))?;

    Ok(PipedChildren {
        producer: first,
        consumer: second,
        producer_name: producer.display_name(),
        consumer_name: consumer.display_name(),
    })
}

/// Wait for both ends of a pipe. Both are killed on cancellation.
///
/// The consumer's status is checked first since a failing consumer usually
/// takes the producer down with a broken pipe.
pub async fn wait_piped(
    children: PipedChildren,
    token: &CancellationToken,
) -> Result<(), ProcessError> {
    let PipedChildren {
        mut producer,
        mut consumer,
        producer_name,
        consumer_name,
    } = children;

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            let _ = producer.kill().await;
            let _ = consumer.kill().await;
            Err(ProcessError::Cancelled)
        }
        (first, second) = async {
            let first = producer.wait().await;
            let second = consumer.wait().await;
            (first, second)
        } => {
            let second = second.map_err(|source| ProcessError::Wait {
                program: consumer_name.clone(),
                source,
            })?;
            if !second.success() {
                return Err(ProcessError::Exited { program: consumer_name, status: second });
            }
            let first = first.map_err(|source| ProcessError::Wait {
                program: producer_name.clone(),
                source,
            })?;
            if !first.success() {
                return Err(ProcessError::Exited { program: producer_name, status: first });
            }
            Ok(())
        }
    }
}

/// Splits a byte stream into segments terminated by `\r` or `\n`.
///
/// Encoders redraw their progress line with carriage returns, so splitting on
/// newlines alone would only yield the final line. Empty segments are skipped.
pub struct SegmentReader<R> {
    reader: R,
    buf: Box<[u8]>,
    filled: usize,
    pos: usize,
    pending: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> SegmentReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; 4096].into_boxed_slice(),
            filled: 0,
            pos: 0,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Next non-empty segment, or `None` once the stream is exhausted.
    pub async fn next_segment(&mut self) -> std::io::Result<Option<String>> {
        loop {
            while self.pos < self.filled {
                let byte = self.buf[self.pos];
                self.pos += 1;
                if byte == b'\r' || byte == b'\n' {
                    if !self.pending.is_empty() {
                        return Ok(Some(self.take_pending()));
                    }
                } else {
                    self.pending.push(byte);
                }
            }

            if self.eof {
                return Ok((!self.pending.is_empty()).then(|| self.take_pending()));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
            }
            self.filled = n;
            self.pos = 0;
        }
    }

    fn take_pending(&mut self) -> String {
        let segment = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        segment
    }
}

/// Read `reader` to the end, calling `f` for every segment.
pub async fn for_each_segment<R, F>(reader: R, mut f: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut segments = SegmentReader::new(reader);
    while let Some(segment) = segments.next_segment().await? {
        f(&segment);
    }
    Ok(())
}
