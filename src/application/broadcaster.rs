// Broadcaster trait - Fan-out of tick results to subscribers
use async_trait::async_trait;

use crate::domain::report::ResultEnvelope;

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Push one tick's envelopes to every subscriber.
    ///
    /// Implementations must not wait on individual subscribers; a subscriber
    /// that cannot keep up is dropped.
    async fn publish(&self, envelopes: &[ResultEnvelope]);
}
