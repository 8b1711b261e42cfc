//! Task spawning for analyses and debugger notifications.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{EncError, EncResult};
use crate::fault::FaultReporter;

/// Handle to a task spawned by [`Worker`].
pub struct AsyncTask<T> {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<EncResult<T>>,
}

impl<T> AsyncTask<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(mut self) -> EncResult<T> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.handle.abort();
                Err(EncError::Cancelled)
            }
            result = &mut self.handle => flatten(result),
        }
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = EncResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            self.handle.abort();
            return Poll::Ready(Err(EncError::Cancelled));
        }
        Pin::new(&mut self.handle).poll(cx).map(flatten)
    }
}

fn flatten<T>(result: Result<EncResult<T>, tokio::task::JoinError>) -> EncResult<T> {
    match result {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(EncError::Cancelled),
        Err(err) => {
            let message = panic_message(err.into_panic());
            tracing::error!(target: "nova.enc", panic = %message, "task panicked");
            Err(EncError::TaskPanicked(message))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Spawns session work onto a tokio runtime.
///
/// Analyses may be capped by `max_concurrent`; `0` leaves fan-out unbounded.
#[derive(Clone)]
pub struct Worker {
    handle: Handle,
    limit: Option<Arc<Semaphore>>,
}

impl Worker {
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        Self {
            handle,
            limit: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
        }
    }

    /// Worker on the runtime the caller is running on.
    pub fn current(max_concurrent: usize) -> Self {
        Self::new(Handle::current(), max_concurrent)
    }

    pub fn spawn_with_token<T, F, Fut>(&self, token: CancellationToken, f: F) -> AsyncTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = EncResult<T>> + Send + 'static,
    {
        if token.is_cancelled() {
            let handle = self.handle.spawn(async { Err(EncError::Cancelled) });
            return AsyncTask { token, handle };
        }

        let token_for_fut = token.clone();
        let limit = self.limit.clone();
        let handle = self.handle.spawn(async move {
            let _permit = acquire(limit, &token_for_fut).await?;
            f(token_for_fut).await
        });
        AsyncTask { token, handle }
    }

    /// Fire-once notification: the task is detached and any failure, panics
    /// included, is published on `faults`.
    pub fn spawn_notification<Fut>(&self, operation: &'static str, faults: FaultReporter, fut: Fut)
    where
        Fut: Future<Output = EncResult<()>> + Send + 'static,
    {
        let inner = self.handle.spawn(fut);
        self.handle.spawn(async move {
            if let Err(err) = flatten(inner.await) {
                faults.report(operation, &err);
            }
        });
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("limited", &self.limit.is_some())
            .finish()
    }
}

async fn acquire(
    limit: Option<Arc<Semaphore>>,
    token: &CancellationToken,
) -> EncResult<Option<OwnedSemaphorePermit>> {
    let Some(limit) = limit else {
        return Ok(None);
    };
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(EncError::Cancelled),
        permit = limit.acquire_owned() => permit
            .map(Some)
            .map_err(|_| EncError::Cancelled),
    }
}
