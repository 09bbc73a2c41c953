//! In-process notification store.
//!
//! Backs single-process dev mode (no `DATABASE_URL`) and the test suite.
//! `set_available(false)` makes every call fail the way a lost database would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::NotificationStore;
use crate::models::notification::{NewNotification, Notification};

#[derive(Clone)]
pub struct MemoryStore {
    rows: Arc<DashMap<Uuid, Notification>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.rows.get(&id).map(|r| r.value().clone())
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("notification store unavailable")
        }
    }

    fn for_user(&self, user_id: &str, unread_only: bool) -> Vec<Notification> {
        let mut rows: Vec<Notification> = self
            .rows
            .iter()
            .filter(|r| r.user_id == user_id && (!unread_only || !r.read))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, new: NewNotification) -> anyhow::Result<Notification> {
        self.check()?;
        let row = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            r#type: new.kind.as_str().to_string(),
            content: new.content,
            read: false,
            created_at: Utc::now(),
        };
        self.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list(&self, user_id: &str, limit: i64) -> anyhow::Result<Vec<Notification>> {
        self.check()?;
        let mut rows = self.for_user(user_id, false);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_unread(&self, user_id: &str) -> anyhow::Result<Vec<Notification>> {
        self.check()?;
        Ok(self.for_user(user_id, true))
    }

    async fn count_unread(&self, user_id: &str) -> anyhow::Result<i64> {
        self.check()?;
        Ok(self
            .rows
            .iter()
            .filter(|r| r.user_id == user_id && !r.read)
            .count() as i64)
    }

    async fn mark_read(&self, user_id: &str, id: Uuid) -> anyhow::Result<bool> {
        self.check()?;
        match self.rows.get_mut(&id) {
            Some(mut row) if row.user_id == user_id => {
                row.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: &str) -> anyhow::Result<u64> {
        self.check()?;
        let mut flipped = 0;
        for mut row in self.rows.iter_mut() {
            if row.user_id == user_id && !row.read {
                row.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn purge_read_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        self.check()?;
        let before = self.rows.len();
        self.rows.retain(|_, row| !(row.read && row.created_at < cutoff));
        Ok((before - self.rows.len()) as u64)
    }
}
