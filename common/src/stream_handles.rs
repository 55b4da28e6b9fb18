//! Handles to background tasks spawned on the tokio runtime.
//!
//! Tasks are ended cooperatively: `end` trips a [`CancellationToken`] the task is
//! expected to select on, so work already in progress (a network call, a
//! notification request) runs to completion instead of being dropped mid-flight.
use futures::{Future, FutureExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum StreamHandleError {
    #[error(transparent)]
    JoinHandleError(#[from] tokio::task::JoinError),
}

/// A handle to a spawned Stream
/// the spawned stream can be 'joined` by awaiting its Future implementation.
/// All spawned tasks are detached, so waiting the handle is not required.
#[allow(async_fn_in_trait)]
pub trait StreamHandle:
    Future<Output = Result<<Self as StreamHandle>::Output, StreamHandleError>>
{
    /// The Output type for the stream
    type Output;
    /// Signal the stream to end
    /// Does not wait for the stream to end, so will not receive the result of stream.
    fn end(&self);
    /// End the stream and asyncronously wait for it to shutdown, getting the result of its
    /// execution.
    async fn end_and_wait(self) -> Result<<Self as StreamHandle>::Output, StreamHandleError>
    where
        Self: Sized,
    {
        self.end();
        self.await
    }
}

pub struct TokioStreamHandle<T> {
    inner: JoinHandle<T>,
    token: CancellationToken,
}

impl<T> TokioStreamHandle<T> {
    /// Whether the task has returned, either because it was ended or on its own.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for TokioStreamHandle<T> {
    type Output = Result<T, StreamHandleError>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.inner.poll_unpin(cx).map_err(StreamHandleError::from)
    }
}

impl<T> StreamHandle for TokioStreamHandle<T> {
    type Output = T;

    fn end(&self) {
        self.token.cancel();
    }
}

/// Spawn a cancellable future on the tokio runtime.
/// The closure receives the token that [`StreamHandle::end`] trips.
pub fn spawn<F, Fut>(f: F) -> TokioStreamHandle<Fut::Output>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let token = CancellationToken::new();
    TokioStreamHandle {
        inner: tokio::task::spawn(f(token.clone())),
        token,
    }
}
