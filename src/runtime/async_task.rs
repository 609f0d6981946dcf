//! Blocking work off the async executor.
//!
//! gix repository reads and file scans are synchronous; they run on the
//! blocking pool and hand their result back over a oneshot channel.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

/// The task was dropped or panicked before producing a value.
#[derive(Debug, Error)]
#[error("background task ended without a result")]
pub struct TaskError;

impl From<oneshot::error::RecvError> for TaskError {
    fn from(_: oneshot::error::RecvError) -> Self {
        TaskError
    }
}

/// Handle to a background task producing a single result.
pub struct AsyncTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> AsyncTask<T>
where
    T: Send + 'static,
{
    /// Run `f` on the blocking thread pool.
    #[inline]
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(f());
        });
        Self { rx }
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = Result<T, TaskError>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map_err(TaskError::from)
    }
}
