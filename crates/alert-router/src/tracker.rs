//! Rule state tracking.
//!
//! The tracker remembers the last state of every alert series per
//! `(org, rule, fingerprint)` and turns alert batches into
//! [`RuleStateHistory`] rows, one per transition. It also maintains the
//! overall state of each rule: firing while any of its series fire.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::history::{RuleState, RuleStateHistory};
use crate::labels::{Fingerprint, LabelSet};
use crate::types::Alert;

type RuleKey = (String, String);

#[derive(Debug, Clone)]
struct TrackedAlert {
    state: RuleState,
    labels: String,
    rule_name: String,
    value: f64,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerState {
    series: HashMap<RuleKey, HashMap<Fingerprint, TrackedAlert>>,
    overall: HashMap<RuleKey, RuleState>,
}

impl TrackerState {
    fn overall_of(&self, key: &RuleKey) -> RuleState {
        let firing = self
            .series
            .get(key)
            .is_some_and(|series| series.values().any(|a| a.state == RuleState::Firing));
        if firing { RuleState::Firing } else { RuleState::Inactive }
    }

    // Recomputes the overall state of each touched rule and stamps it on
    // the rows emitted for that rule.
    fn apply_overall(&mut self, touched: &BTreeSet<RuleKey>, rows: &mut [RuleStateHistory]) {
        for key in touched {
            let state = self.overall_of(key);
            let changed = self.overall.insert(key.clone(), state) != Some(state);
            for row in rows
                .iter_mut()
                .filter(|r| r.org_id == key.0 && r.rule_id == key.1)
            {
                row.overall_state = state;
                row.overall_state_changed = changed;
            }
        }
    }
}

/// Detects per-series and per-rule state transitions.
#[derive(Debug, Default)]
pub struct RuleStateTracker {
    state: Mutex<TrackerState>,
}

fn labels_json(labels: &LabelSet) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

fn row(org_id: &str, rule_id: &str, fingerprint: Fingerprint, tracked: &TrackedAlert, at: DateTime<Utc>) -> RuleStateHistory {
    RuleStateHistory {
        org_id: org_id.to_string(),
        rule_id: rule_id.to_string(),
        rule_name: tracked.rule_name.clone(),
        overall_state: tracked.state,
        overall_state_changed: false,
        state: tracked.state,
        state_changed: true,
        unix_milli: at.timestamp_millis(),
        labels: tracked.labels.clone(),
        fingerprint: fingerprint.0,
        value: tracked.value,
    }
}

impl RuleStateTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked series.
    #[must_use]
    pub fn tracked_series(&self) -> usize {
        self.state.lock().series.values().map(HashMap::len).sum()
    }

    /// Records a batch of alerts for `org_id` and returns the transitions.
    ///
    /// Alerts without a rule id are ignored. A series seen for the first
    /// time only produces a row if it is firing.
    pub fn process_alerts(&self, org_id: &str, alerts: &[Alert], now: DateTime<Utc>) -> Vec<RuleStateHistory> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut rows = Vec::new();
        let mut touched = BTreeSet::new();

        for alert in alerts {
            let Some(rule_id) = alert.rule_id() else {
                continue;
            };
            let key = (org_id.to_string(), rule_id.to_string());
            let fingerprint = alert.fingerprint();
            let current = if alert.resolved_at(now) { RuleState::Inactive } else { RuleState::Firing };
            let sighting = TrackedAlert {
                state: current,
                labels: labels_json(&alert.labels),
                rule_name: alert.name().unwrap_or_default().to_string(),
                value: alert.value(),
                last_seen: now,
            };

            let series = state.series.entry(key.clone()).or_default();
            match series.get_mut(&fingerprint) {
                None => {
                    if current == RuleState::Firing {
                        rows.push(row(org_id, rule_id, fingerprint, &sighting, now));
                    }
                    series.insert(fingerprint, sighting);
                }
                Some(tracked) => {
                    let previous = tracked.state;
                    *tracked = sighting;
                    if previous != current {
                        rows.push(row(org_id, rule_id, fingerprint, tracked, now));
                    }
                }
            }
            touched.insert(key);
        }

        state.apply_overall(&touched, &mut rows);
        if !rows.is_empty() {
            debug!(org_id, transitions = rows.len(), "rule state transitions");
        }
        rows
    }

    /// Resolves firing series not seen for longer than `stale_timeout`.
    ///
    /// Returns the resulting transitions grouped by organization.
    pub fn sweep_stale(&self, stale_timeout: Duration, now: DateTime<Utc>) -> HashMap<String, Vec<RuleStateHistory>> {
        let cutoff = TimeDelta::from_std(stale_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut rows = Vec::new();
        let mut touched = BTreeSet::new();

        for (key, series) in &mut state.series {
            for (fingerprint, tracked) in series.iter_mut() {
                if tracked.state == RuleState::Firing && tracked.last_seen < cutoff {
                    tracked.state = RuleState::Inactive;
                    rows.push(row(&key.0, &key.1, *fingerprint, tracked, now));
                    touched.insert(key.clone());
                }
            }
        }
        state.apply_overall(&touched, &mut rows);

        let mut by_org: HashMap<String, Vec<RuleStateHistory>> = HashMap::new();
        for row in rows {
            by_org.entry(row.org_id.clone()).or_default().push(row);
        }
        if !by_org.is_empty() {
            debug!(orgs = by_org.len(), "swept stale rule series");
        }
        by_org
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::label_set;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn minutes(m: i64) -> TimeDelta {
        TimeDelta::minutes(m)
    }

    fn alert(rule: &str, host: &str, ends_at: DateTime<Utc>) -> Alert {
        Alert {
            labels: label_set([("ruleId", rule), ("alertname", "High CPU"), ("host", host)]),
            annotations: label_set([("value", "92.5")]),
            starts_at: t0(),
            ends_at,
            generator_url: String::new(),
            updated_at: t0(),
            timeout: false,
        }
    }

    fn firing(rule: &str, host: &str) -> Alert {
        alert(rule, host, t0() + TimeDelta::days(1))
    }

    mod process_tests {
        use super::*;

        #[test]
        fn fire_then_resolve() {
            let tracker = RuleStateTracker::new();
            let rows = tracker.process_alerts("org-1", &[firing("rule-1", "server-1")], t0());
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].state, RuleState::Firing);
            assert_eq!(rows[0].overall_state, RuleState::Firing);
            assert!(rows[0].overall_state_changed);
            assert_eq!(rows[0].rule_name, "High CPU");
            assert!((rows[0].value - 92.5).abs() < f64::EPSILON);
            assert_eq!(rows[0].labels, r#"{"alertname":"High CPU","host":"server-1","ruleId":"rule-1"}"#);

            let resolved = alert("rule-1", "server-1", t0() + minutes(5));
            let rows = tracker.process_alerts("org-1", &[resolved], t0() + minutes(5));
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].state, RuleState::Inactive);
            assert_eq!(rows[0].overall_state, RuleState::Inactive);
            assert!(rows[0].overall_state_changed);
        }

        #[test]
        fn unchanged_state_emits_nothing() {
            let tracker = RuleStateTracker::new();
            assert_eq!(tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0()).len(), 1);
            assert!(tracker
                .process_alerts("org-1", &[firing("rule-1", "a")], t0() + minutes(1))
                .is_empty());
        }

        #[test]
        fn first_sighting_resolved_is_silent() {
            let tracker = RuleStateTracker::new();
            let rows = tracker.process_alerts("org-1", &[alert("rule-1", "a", t0())], t0());
            assert!(rows.is_empty());
            assert_eq!(tracker.tracked_series(), 1);
        }

        #[test]
        fn alerts_without_rule_id_are_ignored() {
            let tracker = RuleStateTracker::new();
            let mut a = firing("rule-1", "a");
            a.labels.remove("ruleId");
            assert!(tracker.process_alerts("org-1", &[a], t0()).is_empty());
            assert_eq!(tracker.tracked_series(), 0);
        }

        #[test]
        fn overall_state_waits_for_last_series() {
            let tracker = RuleStateTracker::new();
            let rows = tracker.process_alerts("org-1", &[firing("rule-1", "a"), firing("rule-1", "b")], t0());
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|r| r.overall_state == RuleState::Firing && r.overall_state_changed));

            let rows = tracker.process_alerts("org-1", &[alert("rule-1", "a", t0())], t0() + minutes(1));
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].overall_state, RuleState::Firing);
            assert!(!rows[0].overall_state_changed);

            let rows = tracker.process_alerts("org-1", &[alert("rule-1", "b", t0())], t0() + minutes(2));
            assert_eq!(rows[0].overall_state, RuleState::Inactive);
            assert!(rows[0].overall_state_changed);
        }

        #[test]
        fn flapping_series_yields_three_rows() {
            let tracker = RuleStateTracker::new();
            let mut all = tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            all.extend(tracker.process_alerts("org-1", &[alert("rule-1", "a", t0())], t0() + minutes(1)));
            all.extend(tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0() + minutes(2)));
            assert_eq!(all.len(), 3);
            assert!(all.iter().all(|r| r.state_changed && r.overall_state_changed));
            assert_eq!(all[1].overall_state, RuleState::Inactive);
        }

        #[test]
        fn orgs_are_isolated() {
            let tracker = RuleStateTracker::new();
            tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            let rows = tracker.process_alerts("org-2", &[firing("rule-1", "a")], t0());
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].org_id, "org-2");
            assert!(rows[0].overall_state_changed);
        }
    }

    mod sweep_tests {
        use super::*;

        #[test]
        fn stale_firing_series_resolve() {
            let tracker = RuleStateTracker::new();
            tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            let now = t0() + minutes(10);
            let swept = tracker.sweep_stale(Duration::from_secs(300), now);
            let rows = &swept["org-1"];
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].state, RuleState::Inactive);
            assert_eq!(rows[0].overall_state, RuleState::Inactive);
            assert!(rows[0].overall_state_changed);
            assert_eq!(rows[0].unix_milli, now.timestamp_millis());

            assert!(tracker.sweep_stale(Duration::from_secs(300), now).is_empty());
        }

        #[test]
        fn recent_series_survive() {
            let tracker = RuleStateTracker::new();
            tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            assert!(tracker
                .sweep_stale(Duration::from_secs(300), t0() + minutes(4))
                .is_empty());
        }

        #[test]
        fn sweep_keeps_rule_firing_while_others_fire() {
            let tracker = RuleStateTracker::new();
            tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            tracker.process_alerts("org-1", &[firing("rule-1", "b")], t0() + minutes(8));
            let swept = tracker.sweep_stale(Duration::from_secs(300), t0() + minutes(10));
            let rows = &swept["org-1"];
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].overall_state, RuleState::Firing);
            assert!(!rows[0].overall_state_changed);
        }

        #[test]
        fn resolved_series_refire_after_sweep() {
            let tracker = RuleStateTracker::new();
            tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0());
            tracker.sweep_stale(Duration::from_secs(60), t0() + minutes(5));
            let rows = tracker.process_alerts("org-1", &[firing("rule-1", "a")], t0() + minutes(6));
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].state, RuleState::Firing);
        }
    }
}
