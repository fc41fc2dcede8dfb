//! Alert types.
//!
//! This module provides the alert shapes that flow through the engine:
//! - [`PostableAlert`]: an alert as received from a rule evaluator
//! - [`Alert`]: a validated alert with resolved timestamps
//! - [`GettableAlert`]: an alert as reported back, with its suppression status
//! - [`AlertMarker`]: per-fingerprint silence and inhibition bookkeeping

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::{ALERT_NAME_LABEL, Fingerprint, LabelSet, Matcher, RULE_ID_LABEL, matches_all};

/// Annotation carrying the evaluated metric value.
pub const VALUE_ANNOTATION: &str = "value";

/// An alert as posted by a rule evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostableAlert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive annotations.
    #[serde(default)]
    pub annotations: LabelSet,
    /// When the alert started firing; defaults to the receive time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// When the alert resolves; absent while firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the generating rule.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
}

impl PostableAlert {
    /// Creates a firing alert with the given labels.
    pub fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            ..Self::default()
        }
    }

    /// Validates and completes the alert as received at `now`.
    ///
    /// A missing start falls back to the end (or `now`); a missing end
    /// becomes `now + resolve_timeout` and marks the alert as timing out.
    pub fn normalize(self, now: DateTime<Utc>, resolve_timeout: Duration) -> Result<Alert> {
        let starts_at = self.starts_at.or(self.ends_at).unwrap_or(now);
        let (ends_at, timeout) = match self.ends_at {
            Some(ends_at) => (ends_at, false),
            None => (now + TimeDelta::from_std(resolve_timeout).unwrap_or(TimeDelta::zero()), true),
        };
        let alert = Alert {
            labels: self.labels,
            annotations: self.annotations,
            starts_at,
            ends_at,
            generator_url: self.generator_url,
            updated_at: now,
            timeout,
        };
        alert.validate()?;
        Ok(alert)
    }
}

/// A validated alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive annotations.
    pub annotations: LabelSet,
    /// Start of the firing period.
    pub starts_at: DateTime<Utc>,
    /// End of the firing period; may lie in the future.
    pub ends_at: DateTime<Utc>,
    /// Link back to the generating rule.
    pub generator_url: String,
    /// Last time the alert was received.
    pub updated_at: DateTime<Utc>,
    /// True if `ends_at` was derived from the resolve timeout.
    pub timeout: bool,
}

impl Alert {
    /// Checks label names and timestamps.
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(invalid_alert("at least one label pair required"));
        }
        if let Some(name) = self.labels.keys().find(|name| !is_valid_label_name(name)) {
            return Err(invalid_alert(format!("invalid label name {name:?}")));
        }
        if self.ends_at < self.starts_at {
            return Err(invalid_alert("start time must be before end time"));
        }
        Ok(())
    }

    /// Fingerprint of the label set.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.labels)
    }

    /// The `alertname` label, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.labels.get(ALERT_NAME_LABEL).map(String::as_str)
    }

    /// The `ruleId` label, if any.
    #[must_use]
    pub fn rule_id(&self) -> Option<&str> {
        self.labels.get(RULE_ID_LABEL).map(String::as_str)
    }

    /// True if the alert had resolved by `now`.
    #[must_use]
    pub fn resolved_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }

    /// True if the alert has resolved.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolved_at(Utc::now())
    }

    /// Value from the `value` annotation, or 0.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.annotations
            .get(VALUE_ANNOTATION)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0)
    }

    /// Combines two sightings of the same alert.
    ///
    /// The more recently updated alert provides labels and annotations;
    /// the earliest start is kept. For a firing alert, a later end that
    /// was explicitly set wins over a timeout. For a resolved alert, the
    /// later of two resolved ends wins.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.updated_at < self.updated_at {
            return other.merge(self);
        }
        let now = Utc::now();
        let mut merged = other.clone();
        if self.starts_at < other.starts_at {
            merged.starts_at = self.starts_at;
        }
        if other.resolved_at(now) {
            if self.resolved_at(now) && self.ends_at > other.ends_at {
                merged.ends_at = self.ends_at;
            }
        } else if self.ends_at > other.ends_at && !self.timeout {
            merged.ends_at = self.ends_at;
        }
        merged
    }
}

fn invalid_alert(message: impl Into<String>) -> RouterError {
    RouterError::invalid_input(ErrorCode::ALERT_INVALID, message)
}

/// Label names start with a letter or underscore, followed by letters,
/// digits, underscores or dots.
#[must_use]
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Suppression state of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Not yet seen by the notification pipeline.
    #[default]
    Unprocessed,
    /// Eligible for notification.
    Active,
    /// Silenced or inhibited.
    Suppressed,
}

impl AlertState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Active => "active",
            Self::Suppressed => "suppressed",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an alert is or is not notified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStatus {
    /// Overall state.
    pub state: AlertState,
    /// Ids of the silences muting the alert.
    #[serde(default)]
    pub silenced_by: Vec<String>,
    /// Fingerprints of the alerts inhibiting the alert.
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

impl AlertStatus {
    fn refresh_state(&mut self) {
        self.state = if self.silenced_by.is_empty() && self.inhibited_by.is_empty() {
            AlertState::Active
        } else {
            AlertState::Suppressed
        };
    }
}

/// Tracks the suppression status of every alert the pipeline has seen.
#[derive(Debug, Default)]
pub struct AlertMarker {
    statuses: RwLock<HashMap<Fingerprint, AlertStatus>>,
}

impl AlertMarker {
    /// Creates an empty marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the silences currently muting an alert.
    pub fn set_silenced(&self, fingerprint: Fingerprint, silence_ids: Vec<String>) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(fingerprint).or_default();
        status.silenced_by = silence_ids;
        status.refresh_state();
    }

    /// Records the alerts currently inhibiting an alert.
    pub fn set_inhibited(&self, fingerprint: Fingerprint, inhibited_by: Vec<String>) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(fingerprint).or_default();
        status.inhibited_by = inhibited_by;
        status.refresh_state();
    }

    /// Returns the status of an alert.
    #[must_use]
    pub fn status(&self, fingerprint: Fingerprint) -> AlertStatus {
        self.statuses.read().get(&fingerprint).cloned().unwrap_or_default()
    }

    /// Forgets an alert.
    pub fn delete(&self, fingerprint: Fingerprint) {
        self.statuses.write().remove(&fingerprint);
    }
}

/// An alert as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GettableAlert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive annotations.
    pub annotations: LabelSet,
    /// Start of the firing period.
    pub starts_at: DateTime<Utc>,
    /// End of the firing period.
    pub ends_at: DateTime<Utc>,
    /// Last time the alert was received.
    pub updated_at: DateTime<Utc>,
    /// Link back to the generating rule.
    pub generator_url: String,
    /// Fingerprint in hex.
    pub fingerprint: String,
    /// Receivers the alert routes to.
    pub receivers: Vec<String>,
    /// Suppression status.
    pub status: AlertStatus,
}

impl GettableAlert {
    /// Builds the view of `alert`.
    #[must_use]
    pub fn new(alert: &Alert, receivers: Vec<String>, status: AlertStatus) -> Self {
        Self {
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            updated_at: alert.updated_at,
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint().to_string(),
            receivers,
            status,
        }
    }
}

/// Filters for listing alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GettableAlertsParams {
    /// Include active alerts.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Include silenced alerts.
    #[serde(default = "default_true")]
    pub silenced: bool,
    /// Include inhibited alerts.
    #[serde(default = "default_true")]
    pub inhibited: bool,
    /// Include alerts the pipeline has not processed yet.
    #[serde(default = "default_true")]
    pub unprocessed: bool,
    /// Anchored regex over receiver names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Label matchers every returned alert satisfies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Matcher>,
}

const fn default_true() -> bool {
    true
}

impl Default for GettableAlertsParams {
    fn default() -> Self {
        Self {
            active: true,
            silenced: true,
            inhibited: true,
            unprocessed: true,
            receiver: None,
            filter: Vec::new(),
        }
    }
}

impl GettableAlertsParams {
    /// Compiles the receiver filter.
    pub fn receiver_regex(&self) -> Result<Option<Regex>> {
        self.receiver
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    RouterError::invalid_input(
                        ErrorCode::MATCHER_INVALID,
                        format!("failed to parse receiver param: {e}"),
                    )
                })
            })
            .transpose()
    }

    /// True if an alert with these labels and status passes the filters.
    #[must_use]
    pub fn accepts(&self, labels: &LabelSet, status: &AlertStatus) -> bool {
        if !matches_all(&self.filter, labels) {
            return false;
        }
        match status.state {
            AlertState::Unprocessed => self.unprocessed,
            AlertState::Active => self.active,
            AlertState::Suppressed => {
                (self.silenced || status.silenced_by.is_empty())
                    && (self.inhibited || status.inhibited_by.is_empty())
            }
        }
    }
}
