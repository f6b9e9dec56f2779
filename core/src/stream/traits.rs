use async_trait::async_trait;
use futures::stream::BoxStream;

use super::types::EventRecord;

/// Ordered, long-lived stream of normalized events.
///
/// An `Err` item is a transport failure; the stream is not expected to yield
/// anything after it.
pub type EventStream = BoxStream<'static, anyhow::Result<EventRecord>>;

/// Source of the single global event subscription.
#[async_trait]
pub trait EventFeed: Send {
    fn name(&self) -> &str;

    /// Open the subscription. Called exactly once per run.
    async fn subscribe(self: Box<Self>) -> anyhow::Result<EventStream>;
}
