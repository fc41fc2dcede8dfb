//! Receiver integrations and the notifications handed to them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::GlobalConfig;
use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::LabelSet;
use crate::receiver::{IntegrationKind, Receiver, ReceiverIntegration};
use crate::types::Alert;

/// A flushed aggregation group on its way to one receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Receiver name.
    pub receiver: String,
    /// Aggregation group key.
    pub group_key: String,
    /// Labels shared by the group.
    pub group_labels: LabelSet,
    /// Firing if any alert is firing.
    pub status: NotificationStatus,
    /// The alerts of the group.
    pub alerts: Vec<Alert>,
    /// Link back to the alerting UI.
    pub external_url: Option<String>,
    /// Alerts left out of this notification.
    pub truncated_alerts: usize,
}

impl Notification {
    /// Creates a notification, deriving its status at `now`.
    #[must_use]
    pub fn new(
        receiver: impl Into<String>,
        group_key: impl Into<String>,
        group_labels: LabelSet,
        alerts: Vec<Alert>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if alerts.iter().any(|a| !a.resolved_at(now)) {
            NotificationStatus::Firing
        } else {
            NotificationStatus::Resolved
        };
        Self {
            receiver: receiver.into(),
            group_key: group_key.into(),
            group_labels,
            status,
            alerts,
            external_url: None,
            truncated_alerts: 0,
        }
    }

    /// Sets the external URL.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }
}

/// The status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// At least one alert is firing.
    Firing,
    /// All alerts are resolved.
    Resolved,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firing => write!(f, "firing"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone)]
pub struct NotificationResult {
    /// Whether the notification was delivered.
    pub success: bool,
    /// The integration that handled it.
    pub integration: String,
    /// Optional detail.
    pub message: Option<String>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(integration: impl Into<String>) -> Self {
        Self {
            success: true,
            integration: integration.into(),
            message: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            integration: integration.into(),
            message: Some(message.into()),
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// A delivery mechanism attached to a receiver.
pub trait Integration: Send + Sync + fmt::Debug {
    /// Unique name, `<receiver>/<kind>/<index>`.
    fn name(&self) -> &str;

    /// Integration kind.
    fn kind(&self) -> IntegrationKind;

    /// Whether resolved alerts are delivered.
    fn send_resolved(&self) -> bool;

    /// Delivers a notification.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error with code `notification_failed` if the
    /// notification cannot be delivered.
    fn notify(&self, notification: &Notification) -> Result<NotificationResult>;
}

/// Builds the integrations of a receiver.
pub trait IntegrationFactory: Send + Sync {
    /// Builds one integration per configured integration of `receiver`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if an integration is missing a required field.
    fn build(&self, receiver: &Receiver, global: &GlobalConfig) -> Result<Vec<Arc<dyn Integration>>>;
}

/// Alertmanager-compatible webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload version.
    pub version: String,
    /// Group key.
    pub group_key: String,
    /// Alerts left out.
    pub truncated_alerts: usize,
    /// Notification status.
    pub status: NotificationStatus,
    /// Receiver name.
    pub receiver: String,
    /// Labels the group was formed by.
    pub group_labels: BTreeMap<String, String>,
    /// Labels shared by every alert.
    pub common_labels: BTreeMap<String, String>,
    /// Annotations shared by every alert.
    pub common_annotations: BTreeMap<String, String>,
    /// External URL.
    pub external_url: String,
    /// The alerts.
    pub alerts: Vec<WebhookAlert>,
}

impl WebhookPayload {
    /// Creates a payload from a notification.
    #[must_use]
    pub fn from_notification(notification: &Notification, now: DateTime<Utc>) -> Self {
        Self {
            version: "4".to_string(),
            group_key: notification.group_key.clone(),
            truncated_alerts: notification.truncated_alerts,
            status: notification.status,
            receiver: notification.receiver.clone(),
            group_labels: notification.group_labels.clone(),
            common_labels: common(notification.alerts.iter().map(|a| &a.labels)),
            common_annotations: common(notification.alerts.iter().map(|a| &a.annotations)),
            external_url: notification.external_url.clone().unwrap_or_default(),
            alerts: notification
                .alerts
                .iter()
                .map(|a| WebhookAlert::from_alert(a, now))
                .collect(),
        }
    }
}

fn common<'a>(mut sets: impl Iterator<Item = &'a LabelSet>) -> BTreeMap<String, String> {
    let Some(first) = sets.next() else {
        return BTreeMap::new();
    };
    let mut shared = first.clone();
    for set in sets {
        shared.retain(|k, v| set.get(k) == Some(v));
    }
    shared
}

/// Alert format in webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// `firing` or `resolved`.
    pub status: NotificationStatus,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
    /// Start, RFC 3339.
    pub starts_at: String,
    /// End, RFC 3339; absent while firing.
    pub ends_at: Option<String>,
    /// Source URL.
    pub generator_url: String,
    /// Fingerprint.
    pub fingerprint: String,
}

impl WebhookAlert {
    /// Creates a webhook alert.
    #[must_use]
    pub fn from_alert(alert: &Alert, now: DateTime<Utc>) -> Self {
        let resolved = alert.resolved_at(now);
        Self {
            status: if resolved {
                NotificationStatus::Resolved
            } else {
                NotificationStatus::Firing
            },
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.to_rfc3339(),
            ends_at: resolved.then(|| alert.ends_at.to_rfc3339()),
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint().to_string(),
        }
    }
}

/// An integration that writes notifications to the log instead of
/// calling the remote service.
#[derive(Debug, Clone)]
pub struct LogIntegration {
    name: String,
    kind: IntegrationKind,
    send_resolved: bool,
}

impl LogIntegration {
    /// Creates a log integration.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: IntegrationKind, send_resolved: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            send_resolved,
        }
    }
}

impl Integration for LogIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IntegrationKind {
        self.kind
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }

    fn notify(&self, notification: &Notification) -> Result<NotificationResult> {
        let payload = serde_json::to_string(&WebhookPayload::from_notification(notification, Utc::now()))?;
        match notification.status {
            NotificationStatus::Firing => error!(
                integration = %self.name,
                receiver = %notification.receiver,
                group_key = %notification.group_key,
                alerts = notification.alerts.len(),
                "ALERT"
            ),
            NotificationStatus::Resolved => info!(
                integration = %self.name,
                receiver = %notification.receiver,
                group_key = %notification.group_key,
                alerts = notification.alerts.len(),
                "RESOLVED"
            ),
        }
        debug!(payload = %payload, "notification payload");
        Ok(NotificationResult::success(&self.name).with_message("logged to tracing"))
    }
}

/// Builds a [`LogIntegration`] for every integration of a receiver after
/// checking that the fields a real delivery needs are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogIntegrationFactory;

impl LogIntegrationFactory {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn missing(receiver: &str, kind: IntegrationKind, field: &str) -> RouterError {
    RouterError::invalid_input(
        ErrorCode::CHANNEL_INVALID,
        format!("receiver {receiver}: {kind} integration requires {field}"),
    )
}

fn check(receiver: &str, integration: &ReceiverIntegration, global: &GlobalConfig) -> Result<()> {
    let kind = integration.kind();
    match integration {
        ReceiverIntegration::Slack(c) if c.api_url.is_empty() && global.slack_api_url.is_empty() => {
            Err(missing(receiver, kind, "api_url"))
        }
        ReceiverIntegration::Email(c) if c.to.trim().is_empty() => Err(missing(receiver, kind, "to")),
        ReceiverIntegration::Email(c) if c.smarthost.is_empty() && global.smtp_smarthost.is_empty() => {
            Err(missing(receiver, kind, "smarthost"))
        }
        ReceiverIntegration::Email(c) if c.from.is_empty() && global.smtp_from.is_empty() => {
            Err(missing(receiver, kind, "from"))
        }
        ReceiverIntegration::Webhook(c) if c.url.is_empty() => Err(missing(receiver, kind, "url")),
        ReceiverIntegration::Pagerduty(c) if c.routing_key.is_empty() => Err(missing(receiver, kind, "routing_key")),
        ReceiverIntegration::Opsgenie(c) if c.api_key.is_empty() => Err(missing(receiver, kind, "api_key")),
        ReceiverIntegration::Msteams(c) if c.webhook_url.is_empty() => Err(missing(receiver, kind, "webhook_url")),
        _ => Ok(()),
    }
}

impl IntegrationFactory for LogIntegrationFactory {
    fn build(&self, receiver: &Receiver, global: &GlobalConfig) -> Result<Vec<Arc<dyn Integration>>> {
        receiver
            .integrations
            .iter()
            .enumerate()
            .map(|(idx, integration)| {
                check(&receiver.name, integration, global)?;
                let kind = integration.kind();
                Ok(Arc::new(LogIntegration::new(
                    format!("{}/{kind}/{idx}", receiver.name),
                    kind,
                    integration.send_resolved(),
                )) as Arc<dyn Integration>)
            })
            .collect()
    }
}
