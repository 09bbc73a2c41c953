//! In-process stand-in for the database's notify channel.
//!
//! Every clone shares one hub, so several `NotificationBus` instances built on
//! clones behave like separate server processes talking to the same database.
//! `sever()` kills every live subscription as a dropped connection would, and
//! `fail_next_subscribes(n)` makes connection attempts fail.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use super::transport::{BusSubscription, BusTransport};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Hub>,
}

struct Hub {
    channels: DashMap<String, broadcast::Sender<String>>,
    /// bumped by `sever()`; subscriptions opened in an older epoch die
    epoch: watch::Sender<u64>,
    failing_subscribes: AtomicU32,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(Hub {
                channels: DashMap::new(),
                epoch,
                failing_subscribes: AtomicU32::new(0),
            }),
        }
    }

    /// Drop every live subscription.
    pub fn sever(&self) {
        self.inner.epoch.send_modify(|e| *e += 1);
    }

    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn subscribe(&self, channel: &str) -> anyhow::Result<Box<dyn BusSubscription>> {
        let failing = &self.inner.failing_subscribes;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("connection refused");
        }

        Ok(Box::new(MemorySubscription {
            rx: self.sender(channel).subscribe(),
            epoch: self.inner.epoch.subscribe(),
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        // no receivers is not an error: NOTIFY with no listeners succeeds too
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<String>,
    epoch: watch::Receiver<u64>,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn recv(&mut self) -> anyhow::Result<String> {
        loop {
            tokio::select! {
                _ = self.epoch.changed() => anyhow::bail!("connection reset"),
                msg = self.rx.recv() => match msg {
                    Ok(payload) => return Ok(payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => anyhow::bail!("channel closed"),
                },
            }
        }
    }
}
