use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tl_core::error::Recoverable;

pub const EVENT_AUTO_REVIEW_HUMAN: &str = "auto_review_human";
pub const EVENT_AUDITOR_NEEDS_HUMAN: &str = "auditor_needs_human";

/// A request for a human to look at a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanAlert {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub task_id: Uuid,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl HumanAlert {
    pub fn new(
        user_id: Option<String>,
        task_id: Uuid,
        event_type: &str,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            task_id,
            event_type: event_type.to_string(),
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    fn dedup_key(&self) -> (String, Uuid, String) {
        (
            self.user_id.clone().unwrap_or_default(),
            self.task_id,
            self.event_type.clone(),
        )
    }
}

/// Create the alert unless one already exists for the same
/// (user, task, event type). Returns whether a new alert was created.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_once(&self, alert: HumanAlert) -> Recoverable<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    alerts: DashMap<(String, Uuid, String), HumanAlert>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn for_task(&self, task_id: Uuid) -> Vec<HumanAlert> {
        self.alerts
            .iter()
            .filter(|e| e.value().task_id == task_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify_once(&self, alert: HumanAlert) -> Recoverable<bool> {
        let mut created = false;
        self.alerts.entry(alert.dedup_key()).or_insert_with(|| {
            created = true;
            alert
        });
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedups_by_user_task_and_event() {
        let sink = InMemoryNotificationSink::new();
        let task = Uuid::new_v4();
        let alert = |user: &str, event: &str| {
            HumanAlert::new(Some(user.into()), task, event, "Review needed", "score 40")
        };

        assert!(sink.notify_once(alert("u1", EVENT_AUDITOR_NEEDS_HUMAN)).await.unwrap());
        assert!(!sink.notify_once(alert("u1", EVENT_AUDITOR_NEEDS_HUMAN)).await.unwrap());
        assert!(sink.notify_once(alert("u1", EVENT_AUTO_REVIEW_HUMAN)).await.unwrap());
        assert!(sink.notify_once(alert("u2", EVENT_AUDITOR_NEEDS_HUMAN)).await.unwrap());
        assert_eq!(sink.for_task(task).len(), 3);
    }
}
