//! Notification persistence.
//!
//! The dispatcher only needs create + the read-side queries below; anything
//! richer belongs to the dashboard's CRUD layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::notification::{NewNotification, Notification};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Persist a new unread notification stamped with the current time.
    async fn create(&self, new: NewNotification) -> anyhow::Result<Notification>;

    /// Most recent notifications for `user_id`, newest first.
    async fn list(&self, user_id: &str, limit: i64) -> anyhow::Result<Vec<Notification>>;

    /// Unread notifications for `user_id`, newest first.
    async fn list_unread(&self, user_id: &str) -> anyhow::Result<Vec<Notification>>;

    async fn count_unread(&self, user_id: &str) -> anyhow::Result<i64>;

    /// Returns false if no notification `id` belongs to `user_id`.
    async fn mark_read(&self, user_id: &str, id: Uuid) -> anyhow::Result<bool>;

    /// Returns the number of rows flipped to read.
    async fn mark_all_read(&self, user_id: &str) -> anyhow::Result<u64>;

    /// Delete read notifications created before `cutoff`.
    async fn purge_read_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}
