//! Cancellable background tasks.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned task with its own cancellation token. Dropping it cancels.
pub(crate) struct BackgroundTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `f` with a fresh token.
    pub(crate) fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(f(token.clone()));
        Self { token, handle }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drop_cancels_task() {
        let (tx, mut rx) = tokio::sync::oneshot::channel::<()>();
        let task = BackgroundTask::spawn(|token| async move {
            token.cancelled().await;
            let _ = tx.send(());
        });
        assert!(!task.is_finished());
        drop(task);
        tokio::time::timeout(Duration::from_secs(1), &mut rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_finishes_task() {
        let task = BackgroundTask::spawn(|token| async move { token.cancelled().await });
        task.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
    }
}
