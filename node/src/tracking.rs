use futures::FutureExt;
use std::future::Future;
use tokio::task::JoinError;

/// Like JoinHandle, but aborts the task when this object is dropped.
pub struct AutoAbortTask<R> {
    handle: tokio::task::JoinHandle<R>,
}

impl<R> Drop for AutoAbortTask<R> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<R> From<tokio::task::JoinHandle<R>> for AutoAbortTask<R> {
    fn from(handle: tokio::task::JoinHandle<R>) -> Self {
        Self { handle }
    }
}

/// Mimics the same Future semantics as the underlying JoinHandle.
impl<R> Future for AutoAbortTask<R> {
    type Output = Result<R, JoinError>;
    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}

/// Spawns a task that is aborted once the returned handle is dropped, so the
/// caller decides how long the task lives.
pub fn spawn<F, R>(description: &str, f: F) -> AutoAbortTask<R>
where
    F: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    tracing::debug!(task = description, "spawning");
    tokio::spawn(f).into()
}

/// Like `spawn`, but if the task resolves to an error result, logs the result.
/// This swallows the result, so it should only be used for spawns whose results
/// are not handled.
pub fn spawn_checked<F, R>(description: &str, f: F) -> AutoAbortTask<()>
where
    F: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let description = description.to_string();
    spawn(&description.clone(), async move {
        if let Err(err) = f.await {
            tracing::error!(task = %description, "task failed: {:?}", err);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dropping_handle_aborts_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let task = spawn("sleeper", async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        });
        drop(task);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_awaiting_returns_result() {
        let task = spawn("adder", async { 1 + 2 });
        assert_eq!(task.await.unwrap(), 3);
        let checked = spawn_checked("failing", async { Err::<(), _>(anyhow::anyhow!("boom")) });
        assert!(checked.await.is_ok());
    }
}
