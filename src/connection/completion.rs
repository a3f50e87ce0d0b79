//! Completion handles returned by orchestrator operations

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};

use crate::error::OrchestratorError;

type BoxedResult<T> = Pin<Box<dyn Future<Output = Result<T, OrchestratorError>> + Send + 'static>>;

/// Resolves once an operation has finished
///
/// Operations take effect when called; awaiting the handle is optional and
/// only observes the outcome. A handle whose producer disappears resolves
/// to `OrchestratorError::Cancelled`.
#[must_use = "completion handles do nothing unless awaited or dropped deliberately"]
pub struct Completion<T> {
    inner: BoxedResult<T>,
}

impl<T: Send + 'static> Completion<T> {
    /// A handle that is already resolved
    pub fn resolved(result: Result<T, OrchestratorError>) -> Self {
        Self {
            inner: Box::pin(std::future::ready(result)),
        }
    }

    /// A handle resolved through a oneshot channel
    pub fn from_receiver(rx: oneshot::Receiver<Result<T, OrchestratorError>>) -> Self {
        Self {
            inner: Box::pin(async move { rx.await.unwrap_or(Err(OrchestratorError::Cancelled)) }),
        }
    }
}

impl Completion<()> {
    /// A handle resolved when a watch flag turns true
    pub fn from_flag(mut rx: watch::Receiver<bool>) -> Self {
        Self {
            inner: Box::pin(async move {
                match rx.wait_for(|done| *done).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(OrchestratorError::Cancelled),
                }
            }),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, OrchestratorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
