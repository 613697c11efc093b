//! Alert Notifications
//!
//! Delivers fired alerts to external receivers. Delivery is best effort:
//! failures are logged and counted here and never reach the write path.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alerts::rules::AlertRule;
use crate::chain::{LogEntry, Severity};
use crate::error::{LedgerError, LedgerResult};

/// The committed entry as sent to receivers. `details` is left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: i64,
    pub timestamp: i64,
    pub module: String,
    pub action: String,
    pub user: String,
    pub success: bool,
    pub severity: Severity,
    pub ip: String,
    pub user_agent: String,
}

impl From<&LogEntry> for AlertEvent {
    fn from(entry: &LogEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
            module: entry.module.clone(),
            action: entry.action.clone(),
            user: entry.user.clone(),
            success: entry.success,
            severity: entry.severity,
            ip: entry.ip.clone(),
            user_agent: entry.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStats {
    pub count: u64,
    pub matches: u64,
}

/// Payload handed to every notifier when a rule fires on write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub rule: AlertRule,
    pub event: AlertEvent,
    pub stats: AlertStats,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &AlertNotification) -> LedgerResult<()>;
}

/// POSTs the notification as JSON.
pub struct WebhookNotifier {
    url: String,
    http_client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> LedgerResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &AlertNotification) -> LedgerResult<()> {
        debug!(
            "Posting alert for rule {} to {}",
            notification.rule.id, self.url
        );

        let response = self
            .http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| LedgerError::Notification(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Notification(format!(
                "Webhook returned {}",
                status
            )));
        }
        Ok(())
    }
}

/// Fans a notification out to every registered notifier.
#[derive(Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver to all notifiers. Never fails; the outcome is counted.
    pub async fn dispatch(&self, notification: &AlertNotification) {
        for notifier in &self.notifiers {
            match notifier.notify(notification).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Alert rule {} fired for entry {} ({} delivered)",
                        notification.rule.id,
                        notification.event.id,
                        notifier.name()
                    );
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Alert rule {} notification via {} failed: {}",
                        notification.rule.id,
                        notifier.name(),
                        e
                    );
                }
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_deliveries(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::rules::RuleDraft;
    use crate::chain::NewLogEntry;

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _: &AlertNotification) -> LedgerResult<()> {
            Err(LedgerError::Notification("receiver down".to_string()))
        }
    }

    fn notification() -> AlertNotification {
        let entry = NewLogEntry::new("Auth", "login")
            .user("alice")
            .details("secret context")
            .into_entry(9, 1_700_000_000, String::new());
        AlertNotification {
            rule: AlertRule {
                id: 1,
                spec: RuleDraft::threshold(1, 60).validate().unwrap(),
            },
            event: AlertEvent::from(&entry),
            stats: AlertStats {
                count: 1,
                matches: 0,
            },
        }
    }

    #[test]
    fn test_payload_omits_details() {
        let json = serde_json::to_value(notification()).unwrap();
        assert_eq!(json["event"]["user"], "alice");
        assert!(json["event"].get("details").is_none());
        assert_eq!(json["rule"]["kind"], "threshold");
        assert_eq!(json["stats"]["count"], 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let dispatcher = NotificationDispatcher::new().with_notifier(Arc::new(Failing));
        dispatcher.dispatch(&notification()).await;
        dispatcher.dispatch(&notification()).await;
        assert_eq!(dispatcher.failed_deliveries(), 2);
        assert_eq!(dispatcher.delivered(), 0);
    }
}
