// Data source trait for pre-materialized batch profiles
use async_trait::async_trait;

use crate::domain::batch::{BatchId, BatchProfile};

#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Produce the full series for a batch; called once per batch, on its first tick
    async fn load_profile(&self, batch_id: BatchId) -> anyhow::Result<BatchProfile>;
}
