//! Notification stages run on every aggregation-group flush.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error};

use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::LabelSet;
use crate::muter::MaintenanceExprMuter;
use crate::pipeline::inhibit::Inhibitor;
use crate::pipeline::integration::{Integration, Notification};
use crate::pipeline::nflog::{Entry, NotificationLog};
use crate::pipeline::silence::Silencer;
use crate::route::TimeInterval;
use crate::types::Alert;

/// One flushed aggregation group.
#[derive(Debug, Clone)]
pub struct Flush<'a> {
    /// Receiver of the group's route.
    pub receiver: &'a str,
    /// Aggregation group key.
    pub group_key: &'a str,
    /// Labels the group was formed by.
    pub group_labels: &'a LabelSet,
    /// Repeat interval of the group.
    pub repeat_interval: Duration,
    /// Mute time intervals of the group's route.
    pub mute_time_intervals: &'a [String],
    /// The group's alerts.
    pub alerts: Vec<Alert>,
}

/// The notification pipeline of one configuration.
pub struct NotifyPipeline {
    inhibitor: Inhibitor,
    silencer: Silencer,
    muter: Arc<MaintenanceExprMuter>,
    time_intervals: HashMap<String, Vec<TimeInterval>>,
    nflog: Arc<NotificationLog>,
    integrations: HashMap<String, Vec<Arc<dyn Integration>>>,
    external_url: Option<String>,
}

impl fmt::Debug for NotifyPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyPipeline")
            .field("receivers", &self.integrations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl NotifyPipeline {
    /// Assembles a pipeline.
    #[must_use]
    pub const fn new(
        inhibitor: Inhibitor,
        silencer: Silencer,
        muter: Arc<MaintenanceExprMuter>,
        time_intervals: HashMap<String, Vec<TimeInterval>>,
        nflog: Arc<NotificationLog>,
        integrations: HashMap<String, Vec<Arc<dyn Integration>>>,
    ) -> Self {
        Self {
            inhibitor,
            silencer,
            muter,
            time_intervals,
            nflog,
            integrations,
            external_url: None,
        }
    }

    /// Links every notification back to `url`.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }

    fn notification(&self, flush: &Flush<'_>, alerts: Vec<Alert>, now: DateTime<Utc>) -> Notification {
        let notification = Notification::new(flush.receiver, flush.group_key, flush.group_labels.clone(), alerts, now);
        match &self.external_url {
            Some(url) => notification.with_external_url(url.clone()),
            None => notification,
        }
    }

    /// Integrations of a receiver.
    #[must_use]
    pub fn integrations(&self, receiver: &str) -> &[Arc<dyn Integration>] {
        self.integrations.get(receiver).map_or(&[], Vec::as_slice)
    }

    fn time_muted(&self, names: &[String], now: DateTime<Utc>) -> bool {
        names.iter().any(|name| {
            self.time_intervals
                .get(name)
                .is_some_and(|intervals| intervals.iter().any(|i| i.contains(now)))
        })
    }

    /// Runs a flush through every stage. Muted and deduplicated flushes
    /// succeed without notifying.
    ///
    /// # Errors
    ///
    /// Returns the joined errors of the integrations that failed.
    pub fn exec(&self, mut flush: Flush<'_>, now: DateTime<Utc>) -> Result<()> {
        let alerts: Vec<Alert> = std::mem::take(&mut flush.alerts)
            .into_iter()
            .filter(|a| !self.inhibitor.mutes(&a.labels, now))
            .filter(|a| !self.silencer.mutes(&a.labels, now))
            .filter(|a| !self.muter.mutes(&a.labels))
            .collect();
        if alerts.is_empty() {
            debug!(group_key = %flush.group_key, "all alerts muted");
            return Ok(());
        }
        if self.time_muted(flush.mute_time_intervals, now) {
            debug!(group_key = %flush.group_key, "route muted by time interval");
            return Ok(());
        }

        let Some(integrations) = self.integrations.get(flush.receiver) else {
            debug!(receiver = %flush.receiver, "receiver has no integrations");
            return Ok(());
        };

        let mut errors = Vec::new();
        for integration in integrations {
            let (firing, resolved): (Vec<&Alert>, Vec<&Alert>) = alerts.iter().partition(|a| !a.resolved_at(now));
            let firing_set: BTreeSet<u64> = firing.iter().map(|a| a.fingerprint().0).collect();
            let resolved_set: BTreeSet<u64> = resolved.iter().map(|a| a.fingerprint().0).collect();

            let entry = self.nflog.query(integration.name(), flush.group_key);
            if !needs_update(
                entry.as_ref(),
                &firing_set,
                &resolved_set,
                integration.send_resolved(),
                flush.repeat_interval,
                now,
            ) {
                debug!(integration = %integration.name(), group_key = %flush.group_key, "notification deduplicated");
                continue;
            }

            let mut sent: Vec<Alert> = firing.into_iter().cloned().collect();
            if integration.send_resolved() {
                sent.extend(resolved.into_iter().cloned());
            }
            if !sent.is_empty() {
                let notification = self.notification(&flush, sent, now);
                if let Err(e) = notify(integration.as_ref(), &notification) {
                    errors.push(e);
                    continue;
                }
            }
            self.nflog
                .log(integration.name(), flush.group_key, firing_set, resolved_set, now)?;
        }
        RouterError::join(errors)
    }

    /// Delivers a flush to every integration of its receiver, skipping
    /// the muting and deduplication stages. Used for test alerts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the receiver has no integrations in this
    /// configuration, or the joined errors of the integrations that failed.
    pub fn exec_test(&self, mut flush: Flush<'_>, now: DateTime<Utc>) -> Result<()> {
        let Some(integrations) = self.integrations.get(flush.receiver) else {
            return Err(RouterError::not_found(
                ErrorCode::CHANNEL_NOT_FOUND,
                format!("receiver {} has no integrations", flush.receiver),
            ));
        };
        let alerts = std::mem::take(&mut flush.alerts);
        let notification = self.notification(&flush, alerts, now);
        let errors: Vec<RouterError> = integrations
            .iter()
            .filter_map(|integration| notify(integration.as_ref(), &notification).err())
            .collect();
        RouterError::join(errors)
    }
}

fn notify(integration: &dyn Integration, notification: &Notification) -> Result<()> {
    match integration.notify(notification) {
        Ok(result) if result.success => Ok(()),
        Ok(result) => {
            let message = result.message.unwrap_or_default();
            error!(integration = %integration.name(), error = %message, "notify failed");
            Err(RouterError::internal(
                ErrorCode::NOTIFICATION_FAILED,
                format!("{}: {message}", integration.name()),
            ))
        }
        Err(e) => {
            error!(integration = %integration.name(), error = %e, "notify failed");
            Err(e)
        }
    }
}

/// Decides whether a group must be notified again.
fn needs_update(
    entry: Option<&Entry>,
    firing: &BTreeSet<u64>,
    resolved: &BTreeSet<u64>,
    send_resolved: bool,
    repeat: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(entry) = entry else {
        return !firing.is_empty();
    };
    if !entry.is_firing_subset(firing) {
        return true;
    }
    if firing.is_empty() && !entry.firing_alerts.is_empty() {
        return true;
    }
    if send_resolved && !entry.is_resolved_subset(resolved) {
        return true;
    }
    let repeat = TimeDelta::from_std(repeat).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(repeat).is_some_and(|cutoff| entry.timestamp <= cutoff)
}
