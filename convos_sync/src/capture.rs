use convos_common::{fmt::ShortHex, RetryableError};

use crate::error::SyncError;

/// Sink for recoverable errors. Nothing routed here is retried inline; the
/// next reconciliation pass is the retry.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait ErrorCapture: Send + Sync {
    fn capture(&self, inbox_id: &str, error: &SyncError);
}

/// Reports captured errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorCapture;

impl ErrorCapture for TracingErrorCapture {
    fn capture(&self, inbox_id: &str, error: &SyncError) {
        if error.is_retryable() {
            tracing::warn!(inbox_id = %inbox_id.short_hex(), %error, "transient sync failure");
        } else {
            tracing::error!(inbox_id = %inbox_id.short_hex(), %error, "sync failure");
        }
    }
}
