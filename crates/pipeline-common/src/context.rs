//! Pipeline lifecycle context
//!
//! Every stage receives a `PipelineContext` when it is started. It carries the
//! shared cancellation token and the task tracker the orchestrator waits on to
//! confirm that every stage loop has exited.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared context for stage execution loops
///
/// Cloning is cheap: the token and the tracker are reference counted, so all
/// clones observe the same cancellation and report to the same tracker.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Name used in log records
    pub name: String,
    /// The cancellation token
    pub token: CancellationToken,
    /// Tracks every spawned stage loop and forwarder
    pub tracker: TaskTracker,
}

impl PipelineContext {
    /// Create a new context around the given token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            name: "pipeline".to_string(),
            token,
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            ..Self::new(token)
        }
    }

    /// Derive a context whose token is a child of this one.
    ///
    /// Cancelling the child leaves the parent untouched; cancelling the parent
    /// cancels the child. Tasks are still tracked by the parent tracker.
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: self.token.child_token(),
            tracker: self.tracker.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
