//! Silences: matcher-scoped, time-bounded notification suppression.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::{Fingerprint, LabelSet, Matcher, matches_all};
use crate::types::AlertMarker;

/// Lifecycle state of a silence at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    /// Starts in the future.
    Pending,
    /// Currently suppressing.
    Active,
    /// Ended.
    Expired,
}

/// A silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Silence {
    /// Identifier, assigned on creation.
    #[serde(default)]
    pub id: String,
    /// All must match for an alert to be silenced.
    pub matchers: Vec<Matcher>,
    /// Start of the silence.
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    pub ends_at: DateTime<Utc>,
    /// Author.
    #[serde(default)]
    pub created_by: String,
    /// Reason.
    #[serde(default)]
    pub comment: String,
    /// Last modification.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    /// State at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SilenceState {
        if now < self.starts_at {
            SilenceState::Pending
        } else if now < self.ends_at {
            SilenceState::Active
        } else {
            SilenceState::Expired
        }
    }

    fn validate(&self) -> Result<()> {
        if self.matchers.is_empty() {
            return Err(invalid("at least one matcher required"));
        }
        if self.ends_at < self.starts_at {
            return Err(invalid("end time must not be before start time"));
        }
        // a silence whose matchers all accept "" would match every alert
        if matches_all(&self.matchers, &LabelSet::new()) {
            return Err(invalid("at least one matcher must not match the empty string"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RouterError {
    RouterError::invalid_input(ErrorCode::MATCHER_INVALID, format!("invalid silence: {message}"))
}

/// The silences of one organization.
#[derive(Debug)]
pub struct Silences {
    silences: RwLock<HashMap<String, Silence>>,
    retention: Duration,
}

impl Silences {
    /// Creates an empty set keeping expired silences for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            silences: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Creates or updates a silence and returns its id.
    ///
    /// Updating an expired silence, or one whose matchers changed while
    /// active, creates a new silence instead and expires the old one.
    pub fn set(&self, mut silence: Silence, now: DateTime<Utc>) -> Result<String> {
        silence.validate()?;
        let mut silences = self.silences.write();
        if let Some(existing) = silences.get_mut(&silence.id) {
            let editable = existing.state(now) != SilenceState::Expired
                && (existing.state(now) == SilenceState::Pending
                    || existing.matchers.iter().map(ToString::to_string).eq(silence.matchers.iter().map(ToString::to_string)));
            if editable {
                silence.updated_at = now;
                *existing = silence.clone();
                return Ok(silence.id);
            }
            if existing.state(now) == SilenceState::Active {
                existing.ends_at = now;
                existing.updated_at = now;
            }
        }
        silence.id = Uuid::new_v4().to_string();
        silence.updated_at = now;
        if silence.starts_at < now {
            silence.starts_at = now;
        }
        let id = silence.id.clone();
        silences.insert(id.clone(), silence);
        Ok(id)
    }

    /// Ends a silence now.
    pub fn expire(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut silences = self.silences.write();
        let silence = silences.get_mut(id).ok_or_else(|| {
            RouterError::not_found(ErrorCode::SILENCE_NOT_FOUND, format!("silence {id} not found"))
        })?;
        match silence.state(now) {
            SilenceState::Expired => {
                return Err(RouterError::invalid_input(
                    ErrorCode::MATCHER_INVALID,
                    format!("silence {id} already expired"),
                ));
            }
            SilenceState::Pending => silence.starts_at = now,
            SilenceState::Active => {}
        }
        silence.ends_at = now;
        silence.updated_at = now;
        Ok(())
    }

    /// Returns a silence by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Silence> {
        self.silences.read().get(id).cloned()
    }

    /// Returns every silence.
    #[must_use]
    pub fn list(&self) -> Vec<Silence> {
        self.silences.read().values().cloned().collect()
    }

    /// Ids of active silences matching the label set, sorted.
    #[must_use]
    pub fn matching(&self, labels: &LabelSet, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .silences
            .read()
            .values()
            .filter(|s| s.state(now) == SilenceState::Active && matches_all(&s.matchers, labels))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops silences expired for longer than the retention period.
    pub fn gc(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = TimeDelta::from_std(self.retention).map_err(|e| {
            RouterError::internal(ErrorCode::INTERNAL, format!("invalid silence retention: {e}"))
        })?;
        let mut silences = self.silences.write();
        let before = silences.len();
        silences.retain(|_, s| s.ends_at + retention > now);
        let removed = before - silences.len();
        if removed > 0 {
            debug!(removed, "garbage collected silences");
        }
        Ok(removed)
    }

    /// Serializes every silence.
    pub fn snapshot(&self) -> Result<String> {
        let mut silences = self.list();
        silences.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_string(&silences)?)
    }

    /// Replaces the silences with a snapshot. An empty snapshot clears them.
    pub fn load_snapshot(&self, snapshot: &str) -> Result<()> {
        let loaded: Vec<Silence> = if snapshot.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(snapshot)?
        };
        *self.silences.write() = loaded.into_iter().map(|s| (s.id.clone(), s)).collect();
        Ok(())
    }
}

/// Marks and reports alerts covered by an active silence.
#[derive(Debug, Clone)]
pub struct Silencer {
    silences: Arc<Silences>,
    marker: Arc<AlertMarker>,
}

impl Silencer {
    /// Creates a silencer over a silence set.
    #[must_use]
    pub const fn new(silences: Arc<Silences>, marker: Arc<AlertMarker>) -> Self {
        Self { silences, marker }
    }

    /// True if an active silence matches. Records the result on the marker.
    pub fn mutes(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        let ids = self.silences.matching(labels, now);
        let muted = !ids.is_empty();
        self.marker.set_silenced(Fingerprint::of(labels), ids);
        muted
    }
}
