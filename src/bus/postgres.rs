//! LISTEN/NOTIFY transport.
//!
//! The listener holds its own single-connection pool created from the URL;
//! it never borrows from the query pool, whose connections get recycled.
//! Publishing goes through the query pool with `pg_notify`.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use super::transport::{BusSubscription, BusTransport};

/// Postgres rejects NOTIFY payloads of 8000 bytes or more.
pub const MAX_PAYLOAD_BYTES: usize = 7999;

#[derive(Clone)]
pub struct PgTransport {
    database_url: String,
    pool: PgPool,
}

impl PgTransport {
    pub fn new(database_url: impl Into<String>, pool: PgPool) -> Self {
        Self {
            database_url: database_url.into(),
            pool,
        }
    }
}

#[async_trait]
impl BusTransport for PgTransport {
    async fn subscribe(&self, channel: &str) -> anyhow::Result<Box<dyn BusSubscription>> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .context("failed to open listener connection")?;
        listener
            .listen(channel)
            .await
            .with_context(|| format!("LISTEN {} failed", channel))?;
        Ok(Box::new(PgSubscription { listener }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            anyhow::bail!(
                "bus payload of {} bytes exceeds NOTIFY limit of {}",
                payload.len(),
                MAX_PAYLOAD_BYTES
            );
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .context("pg_notify failed")?;
        Ok(())
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl BusSubscription for PgSubscription {
    async fn recv(&mut self) -> anyhow::Result<String> {
        // try_recv reports a lost connection as Ok(None) instead of silently
        // reconnecting, so the supervisor owns the retry policy.
        match self.listener.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => anyhow::bail!("listener connection lost"),
        }
    }
}
