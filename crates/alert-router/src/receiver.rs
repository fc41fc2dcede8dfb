//! Receivers and their integration configurations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder written in place of secret values in exported receivers.
pub const REDACTED: &str = "<secret>";

/// A secret configuration value such as an API key or webhook URL.
///
/// Stored and serialized verbatim; `Debug` never prints the value.
/// Use [`Receiver::redacted`] for an export view with secrets masked.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn redact(&mut self) {
        if !self.0.is_empty() {
            self.0 = REDACTED.to_string();
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Known integration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    /// Slack incoming webhook.
    Slack,
    /// SMTP email.
    Email,
    /// Generic HTTP webhook.
    Webhook,
    /// `PagerDuty` events API.
    Pagerduty,
    /// Opsgenie alerts API.
    Opsgenie,
    /// Microsoft Teams webhook.
    Msteams,
}

impl IntegrationKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Pagerduty => "pagerduty",
            Self::Opsgenie => "opsgenie",
            Self::Msteams => "msteams",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Slack integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// Incoming webhook URL.
    #[serde(default)]
    pub api_url: Secret,
    /// Target channel.
    #[serde(default)]
    pub channel: String,
    /// Message title template.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Message text template.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Email integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// Recipient addresses, comma separated.
    pub to: String,
    /// Sender address; falls back to the global SMTP sender.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// SMTP server `host:port`; falls back to the global smarthost.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smarthost: String,
    /// SMTP password.
    #[serde(default)]
    pub auth_password: Secret,
}

/// Webhook integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// Target URL.
    pub url: Secret,
    /// Maximum alerts per payload, 0 for unlimited.
    #[serde(default)]
    pub max_alerts: u64,
}

/// `PagerDuty` integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagerdutyConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// Events API v2 routing key.
    #[serde(default)]
    pub routing_key: Secret,
    /// Incident severity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,
}

/// Opsgenie integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsgenieConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// API key.
    #[serde(default)]
    pub api_key: Secret,
    /// Alert priority (`P1`..`P5`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
}

/// Microsoft Teams integration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsTeamsConfig {
    /// Send a notification when alerts resolve.
    #[serde(default)]
    pub send_resolved: bool,
    /// Incoming webhook URL.
    pub webhook_url: Secret,
}

/// One integration attached to a receiver, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiverIntegration {
    /// Slack.
    Slack(SlackConfig),
    /// Email.
    Email(EmailConfig),
    /// Webhook.
    Webhook(WebhookConfig),
    /// `PagerDuty`.
    Pagerduty(PagerdutyConfig),
    /// Opsgenie.
    Opsgenie(OpsgenieConfig),
    /// Microsoft Teams.
    Msteams(MsTeamsConfig),
}

impl ReceiverIntegration {
    /// Returns the integration kind.
    #[must_use]
    pub const fn kind(&self) -> IntegrationKind {
        match self {
            Self::Slack(_) => IntegrationKind::Slack,
            Self::Email(_) => IntegrationKind::Email,
            Self::Webhook(_) => IntegrationKind::Webhook,
            Self::Pagerduty(_) => IntegrationKind::Pagerduty,
            Self::Opsgenie(_) => IntegrationKind::Opsgenie,
            Self::Msteams(_) => IntegrationKind::Msteams,
        }
    }

    /// Whether resolved notifications are delivered.
    #[must_use]
    pub const fn send_resolved(&self) -> bool {
        match self {
            Self::Slack(c) => c.send_resolved,
            Self::Email(c) => c.send_resolved,
            Self::Webhook(c) => c.send_resolved,
            Self::Pagerduty(c) => c.send_resolved,
            Self::Opsgenie(c) => c.send_resolved,
            Self::Msteams(c) => c.send_resolved,
        }
    }

    fn redact(&mut self) {
        match self {
            Self::Slack(c) => c.api_url.redact(),
            Self::Email(c) => c.auth_password.redact(),
            Self::Webhook(c) => c.url.redact(),
            Self::Pagerduty(c) => c.routing_key.redact(),
            Self::Opsgenie(c) => c.api_key.redact(),
            Self::Msteams(c) => c.webhook_url.redact(),
        }
    }
}

/// A named notification destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    /// Unique name within an organization.
    pub name: String,
    /// Attached integrations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<ReceiverIntegration>,
}

impl Receiver {
    /// Creates a receiver with no integrations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            integrations: Vec::new(),
        }
    }

    /// Adds an integration.
    #[must_use]
    pub fn with_integration(mut self, integration: ReceiverIntegration) -> Self {
        self.integrations.push(integration);
        self
    }

    /// Kind of the first integration, used as the channel type.
    #[must_use]
    pub fn kind(&self) -> Option<IntegrationKind> {
        self.integrations.first().map(ReceiverIntegration::kind)
    }

    /// Returns a copy with every secret value masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for integration in &mut copy.integrations {
            integration.redact();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slack_receiver() -> Receiver {
        Receiver::new("slack-alerts").with_integration(ReceiverIntegration::Slack(SlackConfig {
            send_resolved: true,
            api_url: Secret::new("https://hooks.slack.com/services/T000/B000/XXX"),
            channel: "#alerts".to_string(),
            ..SlackConfig::default()
        }))
    }

    #[test]
    fn integration_serializes_with_type_tag() {
        let json = serde_json::to_value(slack_receiver()).unwrap();
        assert_eq!(json["integrations"][0]["type"], "slack");
        assert_eq!(json["integrations"][0]["channel"], "#alerts");
        assert_eq!(
            json["integrations"][0]["api_url"],
            "https://hooks.slack.com/services/T000/B000/XXX"
        );
    }

    #[test]
    fn integration_deserializes_from_tag() {
        let receiver: Receiver = serde_json::from_str(
            r#"{"name":"hook","integrations":[{"type":"webhook","url":"http://example.com/alerts","send_resolved":true}]}"#,
        )
        .unwrap();
        assert_eq!(receiver.kind(), Some(IntegrationKind::Webhook));
        assert!(receiver.integrations[0].send_resolved());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<Receiver>(
            r#"{"name":"x","integrations":[{"type":"carrier_pigeon"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn redacted_masks_secrets_only() {
        let receiver = slack_receiver();
        let redacted = receiver.redacted();
        let ReceiverIntegration::Slack(cfg) = &redacted.integrations[0] else {
            panic!("expected slack");
        };
        assert_eq!(cfg.api_url.expose(), REDACTED);
        assert_eq!(cfg.channel, "#alerts");
        // the original is untouched
        let ReceiverIntegration::Slack(orig) = &receiver.integrations[0] else {
            panic!("expected slack");
        };
        assert!(orig.api_url.expose().starts_with("https://"));
    }

    #[test]
    fn empty_secret_stays_empty_when_redacted() {
        let receiver = Receiver::new("mail").with_integration(ReceiverIntegration::Email(EmailConfig {
            to: "ops@example.com".to_string(),
            ..EmailConfig::default()
        }));
        let ReceiverIntegration::Email(cfg) = &receiver.redacted().integrations[0] else {
            panic!("expected email");
        };
        assert!(cfg.auth_password.is_empty());
    }

    #[test]
    fn secret_debug_hides_value() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(..)");
    }

    #[test]
    fn receiver_without_integrations_has_no_kind() {
        assert_eq!(Receiver::new("default-receiver").kind(), None);
    }
}
