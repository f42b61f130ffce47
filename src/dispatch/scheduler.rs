//! Pacing clock between batches.

use std::time::Duration;

use async_trait::async_trait;

/// Something that can be told "resume after D".
///
/// The dispatcher waits on this between batch starts, so tests can swap in a
/// recording or virtual clock.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Waits on tokio's timer. Honours `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
