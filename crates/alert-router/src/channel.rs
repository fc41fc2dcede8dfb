//! Persisted notification channels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, Result, RouterError};
use crate::receiver::{IntegrationKind, Receiver};

/// A receiver as stored for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub id: Uuid,
    /// Receiver name, unique per organization.
    pub name: String,
    /// Kind of the receiver's first integration.
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    /// Serialized [`Receiver`].
    pub data: String,
    /// Owning organization.
    pub org_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Creates a channel from a receiver.
    pub fn from_receiver(receiver: &Receiver, org_id: impl Into<String>) -> Result<Self> {
        let kind = kind_of(receiver)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: receiver.name.clone(),
            kind,
            data: serde_json::to_string(receiver)?,
            org_id: org_id.into(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Decodes the stored receiver.
    pub fn to_receiver(&self) -> Result<Receiver> {
        Ok(serde_json::from_str(&self.data)?)
    }

    /// Replaces the stored receiver. Renaming a channel is not allowed.
    pub fn update(&mut self, receiver: &Receiver) -> Result<()> {
        if receiver.name != self.name {
            return Err(RouterError::invalid_input(
                ErrorCode::CHANNEL_INVALID,
                "cannot update channel name",
            ));
        }
        self.kind = kind_of(receiver)?;
        self.data = serde_json::to_string(receiver)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns a copy whose stored receiver has its secrets masked.
    pub fn redacted(&self) -> Result<Self> {
        let receiver = self.to_receiver()?.redacted();
        Ok(Self {
            data: serde_json::to_string(&receiver)?,
            ..self.clone()
        })
    }
}

fn kind_of(receiver: &Receiver) -> Result<IntegrationKind> {
    receiver.kind().ok_or_else(|| {
        RouterError::invalid_input(
            ErrorCode::CHANNEL_INVALID,
            format!("channel {:?} must configure at least one integration", receiver.name),
        )
    })
}

/// Counts channels per integration kind.
#[must_use]
pub fn channel_stats(channels: &[Channel]) -> BTreeMap<IntegrationKind, u64> {
    let mut stats = BTreeMap::new();
    for channel in channels {
        *stats.entry(channel.kind).or_insert(0) += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::{EmailConfig, ReceiverIntegration, Secret, SlackConfig};

    fn slack(name: &str) -> Receiver {
        Receiver::new(name).with_integration(ReceiverIntegration::Slack(SlackConfig {
            api_url: Secret::new("https://hooks.slack.com/x"),
            channel: "#ops".to_string(),
            ..SlackConfig::default()
        }))
    }

    #[test]
    fn from_receiver_records_kind() {
        let channel = Channel::from_receiver(&slack("ops"), "org-1").unwrap();
        assert_eq!(channel.kind, IntegrationKind::Slack);
        assert_eq!(channel.name, "ops");
        assert_eq!(channel.to_receiver().unwrap(), slack("ops"));
    }

    #[test]
    fn from_receiver_requires_integration() {
        let err = Channel::from_receiver(&Receiver::new("empty"), "org-1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CHANNEL_INVALID);
    }

    #[test]
    fn update_rejects_rename() {
        let mut channel = Channel::from_receiver(&slack("ops"), "org-1").unwrap();
        assert!(channel.update(&slack("other")).is_err());
    }

    #[test]
    fn update_changes_kind() {
        let mut channel = Channel::from_receiver(&slack("ops"), "org-1").unwrap();
        let email = Receiver::new("ops").with_integration(ReceiverIntegration::Email(EmailConfig {
            to: "ops@example.com".to_string(),
            ..EmailConfig::default()
        }));
        channel.update(&email).unwrap();
        assert_eq!(channel.kind, IntegrationKind::Email);
    }

    #[test]
    fn redacted_masks_stored_secret() {
        let channel = Channel::from_receiver(&slack("ops"), "org-1").unwrap();
        let redacted = channel.redacted().unwrap();
        assert!(!redacted.data.contains("hooks.slack.com"));
        assert!(channel.data.contains("hooks.slack.com"));
    }

    #[test]
    fn stats_count_by_kind() {
        let channels = vec![
            Channel::from_receiver(&slack("a"), "org-1").unwrap(),
            Channel::from_receiver(&slack("b"), "org-1").unwrap(),
        ];
        let stats = channel_stats(&channels);
        assert_eq!(stats.get(&IntegrationKind::Slack), Some(&2));
        assert_eq!(stats.get(&IntegrationKind::Email), None);
    }
}
