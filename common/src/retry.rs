//! Classification of errors by whether a later attempt may succeed.
//!
//! The sync engine never retries inline. A retryable error is one that the next
//! natural reconciliation pass is expected to heal (a dropped connection, a
//! timed out request), and it is reported at a lower severity than errors that
//! point at a bug or a permanently rejected request.

/// Specifies which errors are retryable.
/// All Errors are not retryable by-default.
pub trait RetryableError: std::error::Error {
    fn is_retryable(&self) -> bool;
}

impl<T: RetryableError + ?Sized> RetryableError for std::sync::Arc<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}

#[macro_export]
macro_rules! retryable {
    ($error: ident) => {{
        #[allow(unused)]
        use $crate::retry::RetryableError;
        $error.is_retryable()
    }};
    ($error: expr) => {{
        use $crate::retry::RetryableError;
        $error.is_retryable()
    }};
}
