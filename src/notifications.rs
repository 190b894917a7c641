//! Toast notifications raised by the order synchronizer.
//!
//! Notifications are ephemeral: the synchronizer builds them from change
//! events (or receives them ready-made on the push channel) and hands them to
//! a [`NotificationSink`]. Nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::orders::OrderStatus;
use crate::sync::diff::ChangeEvent;

/// How long a toast stays on screen unless the sender says otherwise.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(5);

/// Toasts kept by [`ToastQueue`] before the oldest is evicted.
const TOAST_QUEUE_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn status_message(status: &OrderStatus) -> String {
    match status {
        OrderStatus::Pending => "Order is now pending".to_string(),
        OrderStatus::Approved => "Order has been approved and is being prepared".to_string(),
        OrderStatus::Completed => "Order has been completed".to_string(),
        OrderStatus::Cancelled => "Order has been cancelled".to_string(),
        OrderStatus::Other(s) => format!("Status changed to {s}"),
    }
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            message: message.into(),
            duration: DEFAULT_TOAST_DURATION,
            created_at: Utc::now(),
        }
    }

    /// Human-readable toast for a detected change.
    pub fn from_change(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::Added { order } => Self::new(
                Severity::Info,
                "New Order Received",
                format!(
                    "Order #{} from {} - ${:.2}",
                    order.id,
                    order.customer.display_name(),
                    order.total_amount
                ),
            ),
            ChangeEvent::StatusChanged { order, to, .. } => Self::new(
                Severity::Success,
                format!("Order #{} Status Update", order.id),
                status_message(to),
            ),
        }
    }

    /// Decode a ready-made notification from the push channel
    /// (`{type, message, orderId}`). Returns `None` without a message.
    pub fn from_push(payload: &Value) -> Option<Self> {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())?;
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let severity = if kind.contains("error") || kind.contains("fail") {
            Severity::Error
        } else if kind.contains("success") || kind.contains("completed") || kind.contains("approved")
        {
            Severity::Success
        } else {
            Severity::Info
        };
        let order_id = match payload.get("orderId") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let title = match order_id {
            Some(id) => format!("Order #{id}"),
            None => "Notification".to_string(),
        };
        let mut notification = Self::new(severity, title, message);
        if let Some(ms) = payload.get("duration").and_then(Value::as_u64) {
            notification.duration = Duration::from_millis(ms);
        }
        Some(notification)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let millis = self.duration.as_millis().min(i64::MAX as u128) as i64;
        let duration = chrono::Duration::milliseconds(millis);
        self.created_at
            .checked_add_signed(duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Presentation surface the synchronizer pushes toasts into.
pub trait NotificationSink: Send + Sync {
    fn push(&self, notification: Notification);
}

/// Bounded in-memory toast stack, newest last.
pub struct ToastQueue {
    toasts: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::with_capacity(TOAST_QUEUE_CAPACITY)
    }
}

impl ToastQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            toasts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Toasts still on screen at `now`, oldest first. Expired ones are
    /// dropped as a side effect.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let Ok(mut toasts) = self.toasts.lock() else {
            return Vec::new();
        };
        toasts.retain(|t| !t.is_expired(now));
        toasts.iter().cloned().collect()
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        let Ok(mut toasts) = self.toasts.lock() else {
            return false;
        };
        let before = toasts.len();
        toasts.retain(|t| t.id != id);
        toasts.len() != before
    }

    pub fn len(&self) -> usize {
        self.toasts.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for ToastQueue {
    fn push(&self, notification: Notification) {
        if let Ok(mut toasts) = self.toasts.lock() {
            while toasts.len() >= self.capacity {
                toasts.pop_front();
            }
            toasts.push_back(notification);
        }
    }
}

/// Writes every toast to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn push(&self, notification: Notification) {
        match notification.severity {
            Severity::Error => error!(
                title = %notification.title,
                message = %notification.message,
                "notification"
            ),
            _ => info!(
                severity = ?notification.severity,
                title = %notification.title,
                message = %notification.message,
                "notification"
            ),
        }
    }
}
