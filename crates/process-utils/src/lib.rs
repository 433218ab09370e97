//! Small process-related helpers shared across the workspace.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;

#[cfg(feature = "tokio")]
mod runner;
#[cfg(feature = "tokio")]
pub use runner::{
    CommandSpec, PipedChildren, ProcessError, ProcessOutput, SegmentReader, for_each_segment,
    run_to_completion, spawn_piped, wait_piped,
};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to spawned tools.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}
