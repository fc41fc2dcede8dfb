//! Notification log: what was last sent to each receiver for each group.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorCode, Result, RouterError};

/// The last notification sent for a group to a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Aggregation group key.
    pub group_key: String,
    /// Receiver name.
    pub receiver: String,
    /// Fingerprints that were firing.
    pub firing_alerts: BTreeSet<u64>,
    /// Fingerprints that were resolved.
    pub resolved_alerts: BTreeSet<u64>,
    /// When the notification was sent.
    pub timestamp: DateTime<Utc>,
    /// When the entry may be garbage collected.
    pub expires_at: DateTime<Utc>,
}

impl Entry {
    /// True if every fingerprint in `firing` was already notified as firing.
    #[must_use]
    pub fn is_firing_subset(&self, firing: &BTreeSet<u64>) -> bool {
        firing.is_subset(&self.firing_alerts)
    }

    /// True if every fingerprint in `resolved` was already notified as resolved.
    #[must_use]
    pub fn is_resolved_subset(&self, resolved: &BTreeSet<u64>) -> bool {
        resolved.is_subset(&self.resolved_alerts)
    }
}

/// Notification log of one organization.
#[derive(Debug)]
pub struct NotificationLog {
    entries: RwLock<HashMap<(String, String), Entry>>,
    retention: Duration,
}

impl NotificationLog {
    /// Creates an empty log whose entries live for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn retention(&self) -> Result<TimeDelta> {
        TimeDelta::from_std(self.retention)
            .map_err(|e| RouterError::internal(ErrorCode::INTERNAL, format!("invalid nflog retention: {e}")))
    }

    /// Records a notification.
    pub fn log(
        &self,
        receiver: &str,
        group_key: &str,
        firing_alerts: BTreeSet<u64>,
        resolved_alerts: BTreeSet<u64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = Entry {
            group_key: group_key.to_string(),
            receiver: receiver.to_string(),
            firing_alerts,
            resolved_alerts,
            timestamp: now,
            expires_at: now + self.retention()?,
        };
        self.entries
            .write()
            .insert((receiver.to_string(), group_key.to_string()), entry);
        Ok(())
    }

    /// Returns the last entry for a receiver and group.
    #[must_use]
    pub fn query(&self, receiver: &str, group_key: &str) -> Option<Entry> {
        self.entries
            .read()
            .get(&(receiver.to_string(), group_key.to_string()))
            .cloned()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops expired entries.
    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "garbage collected notification log entries");
        }
        removed
    }

    /// Serializes every entry.
    pub fn snapshot(&self) -> Result<String> {
        let mut entries: Vec<Entry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| (&a.receiver, &a.group_key).cmp(&(&b.receiver, &b.group_key)));
        Ok(serde_json::to_string(&entries)?)
    }

    /// Replaces the log with a snapshot. An empty snapshot clears it.
    pub fn load_snapshot(&self, snapshot: &str) -> Result<()> {
        let loaded: Vec<Entry> = if snapshot.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(snapshot)?
        };
        *self.entries.write() = loaded
            .into_iter()
            .map(|e| ((e.receiver.clone(), e.group_key.clone()), e))
            .collect();
        Ok(())
    }
}
