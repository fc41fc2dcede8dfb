//! In-memory alert store with change subscriptions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::labels::Fingerprint;
use crate::types::Alert;

/// Stream of alert updates handed to a subscriber.
pub type AlertSubscription = mpsc::UnboundedReceiver<Alert>;

/// Holds the latest version of every alert and fans updates out to
/// subscribers.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: RwLock<HashMap<Fingerprint, Alert>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Alert>>>,
}

impl AlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores alerts, merging each with a previous sighting it overlaps,
    /// and forwards the stored versions to every subscriber.
    pub fn put(&self, alerts: Vec<Alert>) {
        let mut stored = Vec::with_capacity(alerts.len());
        {
            let mut current = self.alerts.write();
            for alert in alerts {
                let fingerprint = alert.fingerprint();
                let alert = match current.get(&fingerprint) {
                    // only merge if the two sightings overlap in time
                    Some(old) if old.ends_at >= alert.starts_at && alert.ends_at >= old.starts_at => old.merge(&alert),
                    _ => alert,
                };
                current.insert(fingerprint, alert.clone());
                stored.push(alert);
            }
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| stored.iter().all(|a| tx.send(a.clone()).is_ok()));
    }

    /// Returns an alert by fingerprint.
    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.alerts.read().get(&fingerprint).cloned()
    }

    /// Returns every alert.
    #[must_use]
    pub fn list(&self) -> Vec<Alert> {
        self.alerts.read().values().cloned().collect()
    }

    /// Number of stored alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// True if no alert is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    /// Subscribes to updates. The stream starts with every stored alert.
    pub fn subscribe(&self) -> AlertSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // hold the subscriber lock so no update is sent between the
        // snapshot and the registration
        let mut subscribers = self.subscribers.lock();
        for alert in self.alerts.read().values() {
            let _ = tx.send(alert.clone());
        }
        subscribers.push(tx);
        rx
    }

    /// Drops resolved alerts and returns their fingerprints.
    pub fn gc(&self, now: DateTime<Utc>) -> Vec<Fingerprint> {
        let mut removed = Vec::new();
        self.alerts.write().retain(|fp, alert| {
            let keep = !alert.resolved_at(now);
            if !keep {
                removed.push(*fp);
            }
            keep
        });
        if !removed.is_empty() {
            debug!(count = removed.len(), "garbage collected resolved alerts");
        }
        removed
    }

    /// Closes every subscription.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }
}
