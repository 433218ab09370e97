use tokio_util::sync::CancellationToken;

use crate::PipelineContext;

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Create a test pipeline context with a fresh token
#[inline]
pub fn create_test_context() -> PipelineContext {
    PipelineContext::with_name("test", CancellationToken::new())
}
