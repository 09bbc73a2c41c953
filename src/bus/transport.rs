use async_trait::async_trait;

/// Publish/subscribe over a named channel shared by every process.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Open a dedicated subscription. Each call is a fresh connection.
    async fn subscribe(&self, channel: &str) -> anyhow::Result<Box<dyn BusSubscription>>;

    /// Fire-and-forget: success means the message was handed to the channel,
    /// not that anyone received it.
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait BusSubscription: Send {
    /// Next raw payload. An error means the subscription is dead and must be
    /// dropped; it is never retried in place.
    async fn recv(&mut self) -> anyhow::Result<String>;
}
