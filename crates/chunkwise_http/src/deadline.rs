use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels a request's token once its time budget runs out.
///
/// The timer is aborted when the `Deadline` is dropped, including when axum drops the handler
/// future because the client went away.
pub(crate) struct Deadline {
    cancel: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub(crate) fn start(timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "request deadline exceeded");
            token.cancel();
        });
        Self { cancel, timer }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn expiry_cancels_token() {
        let deadline = Deadline::start(Duration::from_millis(5));
        tokio::time::timeout(Duration::from_secs(5), deadline.token().cancelled())
            .await
            .expect("deadline should have fired");
    }

    #[tokio::test]
    async fn drop_disarms_timer() {
        let deadline = Deadline::start(Duration::from_millis(5));
        let token = deadline.token().clone();
        drop(deadline);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!token.is_cancelled());
    }
}
