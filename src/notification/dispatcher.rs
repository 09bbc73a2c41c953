//! Single entry point for notification producers.
//!
//! `create_and_send`:
//!   1. persist (the only hard failure; nothing is delivered without a row)
//!   2. format the stored row
//!   3. push to sockets on this process (best effort)
//!   4. publish on the bus for sockets on other processes (best effort)
//!
//! There is no deduplication: two calls create two notifications.

use std::sync::Arc;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::format::{format_notification, FormattedNotification};
use crate::bus::NotificationBus;
use crate::metrics::METRICS;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::realtime::server::{Delivery, RealtimeServer};
use crate::store::NotificationStore;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to persist notification: {0}")]
    Persist(#[source] anyhow::Error),
}

/// Result of one dispatch as reported to producers:
/// `{success: true, notification}` or `{success: false, error}`.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sent(FormattedNotification),
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Sent(_))
    }
}

impl Serialize for DispatchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("DispatchOutcome", 2)?;
        out.serialize_field("success", &self.is_success())?;
        match self {
            DispatchOutcome::Sent(notification) => {
                out.serialize_field("notification", notification)?
            }
            DispatchOutcome::Failed(error) => out.serialize_field("error", error)?,
        }
        out.end()
    }
}

impl From<Result<FormattedNotification, DispatchError>> for DispatchOutcome {
    fn from(result: Result<FormattedNotification, DispatchError>) -> Self {
        match result {
            Ok(notification) => DispatchOutcome::Sent(notification),
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    server: Arc<RealtimeServer>,
    bus: Option<Arc<NotificationBus>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        server: Arc<RealtimeServer>,
        bus: Option<Arc<NotificationBus>>,
    ) -> Self {
        Self { store, server, bus }
    }

    /// Persist, format and deliver one notification to `user_id`.
    ///
    /// Returns `Ok` once the row is durable, whatever happened to delivery.
    pub async fn create_and_send(
        &self,
        user_id: &str,
        kind: NotificationKind,
        content: serde_json::Value,
    ) -> Result<FormattedNotification, DispatchError> {
        let stored = self
            .store
            .create(NewNotification {
                user_id: user_id.to_string(),
                kind,
                content,
            })
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "dispatch: failed to persist notification");
                DispatchError::Persist(e)
            })?;
        METRICS.notifications_created.inc();

        let formatted = format_notification(&stored);

        match self.server.push_to_user(user_id, &formatted) {
            Delivery::Delivered(n) => {
                METRICS
                    .deliveries
                    .with_label_values(&["local"])
                    .inc_by(n as u64);
            }
            Delivery::NotDelivered => {
                debug!(user_id, notification_id = %stored.id, "dispatch: no local sockets");
            }
        }

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(user_id, &formatted).await {
                warn!(
                    user_id,
                    notification_id = %stored.id,
                    error = %e,
                    "dispatch: bus publish failed, other processes will not see this notification live"
                );
            }
        }

        info!(
            user_id,
            notification_id = %stored.id,
            r#type = %stored.r#type,
            "dispatch: notification sent"
        );
        Ok(formatted)
    }
}
