//! Rule state history records and analytics.
//!
//! [`RuleStateHistory`] rows are appended whenever a rule's series change
//! state. [`StateHistoryStore`] persists them and answers the analytics
//! queries (timelines, top contributors, trigger counts, resolution
//! times) that rule detail pages are built from.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labels::LabelSet;

const MAX_POINTS_IN_SERIES: i64 = 300;
const MIN_STEP_SECS: i64 = 60;
const DAY_MILLIS: i64 = 86_400_000;

/// State of a rule series, or of the rule overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    /// At least one series is firing.
    Firing,
    /// Nothing is firing.
    Inactive,
    /// Firing during an active maintenance window.
    Muted,
}

impl RuleState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Inactive => "inactive",
            Self::Muted => "muted",
        }
    }
}

impl std::fmt::Display for RuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One state transition of a rule series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStateHistory {
    /// Owning organization.
    pub org_id: String,
    /// Rule identifier.
    pub rule_id: String,
    /// Rule name.
    pub rule_name: String,
    /// Aggregate state of the rule after this transition.
    pub overall_state: RuleState,
    /// True if this transition changed the aggregate state.
    pub overall_state_changed: bool,
    /// State of the series.
    pub state: RuleState,
    /// True if the series changed state.
    pub state_changed: bool,
    /// Transition time in Unix milliseconds.
    pub unix_milli: i64,
    /// Series labels as a JSON object.
    pub labels: String,
    /// Series fingerprint.
    pub fingerprint: u64,
    /// Last observed value.
    pub value: f64,
}

impl RuleStateHistory {
    /// Parses the JSON labels; `None` if they are empty or malformed.
    #[must_use]
    pub fn label_set(&self) -> Option<LabelSet> {
        if self.labels.is_empty() {
            return None;
        }
        serde_json::from_str(&self.labels).ok()
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Window, filter and pagination for history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRuleStateHistory {
    /// Window start, Unix milliseconds.
    pub start: i64,
    /// Window end, Unix milliseconds.
    pub end: i64,
    /// Only rows in this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RuleState>,
    /// Row ordering for timelines.
    #[serde(default)]
    pub order: SortOrder,
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Rows skipped.
    #[serde(default)]
    pub offset: usize,
    /// Requested series step in seconds; raised to the minimum for the window.
    #[serde(default)]
    pub step: i64,
}

const fn default_limit() -> usize {
    50
}

impl QueryRuleStateHistory {
    /// Creates a query over `[start, end]`.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            state: None,
            order: SortOrder::default(),
            limit: default_limit(),
            offset: 0,
            step: 0,
        }
    }

    /// Series step in seconds: the requested step, but at least one
    /// minute and coarse enough to keep a series under 300 points.
    #[must_use]
    pub fn step_secs(&self) -> i64 {
        let step = self.end.saturating_sub(self.start) / MAX_POINTS_IN_SERIES / 1000;
        let min = if step < MIN_STEP_SECS { MIN_STEP_SECS } else { step - step % MIN_STEP_SECS };
        self.step.max(min)
    }

    /// The same window moved back by its length rounded up to whole days,
    /// or by one day for windows shorter than a day.
    #[must_use]
    pub fn previous_period(&self) -> Self {
        let length = self.end.saturating_sub(self.start);
        let shift = if length >= DAY_MILLIS {
            length.saturating_add(DAY_MILLIS - 1) / DAY_MILLIS * DAY_MILLIS
        } else {
            DAY_MILLIS
        };
        Self {
            start: self.start.saturating_sub(shift),
            end: self.end.saturating_sub(shift),
            ..self.clone()
        }
    }

    fn contains(&self, unix_milli: i64) -> bool {
        self.start <= unix_milli && unix_milli <= self.end
    }
}

/// A page of history rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStateTimeline {
    /// Rows on this page.
    pub items: Vec<RuleStateHistory>,
    /// Rows matching the query.
    pub total: u64,
    /// Every label value seen for the rule, by label name.
    pub labels: BTreeMap<String, Vec<String>>,
}

/// A series ranked by how often it fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStateHistoryContributor {
    /// Series fingerprint.
    pub fingerprint: u64,
    /// Series labels as JSON.
    pub labels: String,
    /// Number of firing transitions.
    pub count: u64,
}

/// A period during which the rule held one overall state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStateTransition {
    /// State held.
    pub state: RuleState,
    /// Period start, Unix milliseconds.
    pub start: i64,
    /// Period end, Unix milliseconds.
    pub end: i64,
}

/// A time series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Bucket start, Unix milliseconds.
    pub timestamp: i64,
    /// Value.
    pub value: f64,
}

/// A labelled time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Series labels.
    pub labels: LabelSet,
    /// Points in time order.
    pub points: Vec<Point>,
}

/// Trigger and resolution statistics for the current and previous period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    /// Firing transitions in the current period.
    pub total_current_triggers: u64,
    /// Firing transitions in the previous period.
    pub total_past_triggers: u64,
    /// Current triggers per interval.
    pub current_triggers_series: Option<Series>,
    /// Previous triggers per interval.
    pub past_triggers_series: Option<Series>,
    /// Mean seconds from firing to resolution, current period.
    pub current_avg_resolution_time: f64,
    /// Mean seconds from firing to resolution, previous period.
    pub past_avg_resolution_time: f64,
    /// Current mean resolution time per interval.
    pub current_avg_resolution_time_series: Option<Series>,
    /// Previous mean resolution time per interval.
    pub past_avg_resolution_time_series: Option<Series>,
}

/// Persistence and analytics for rule state history.
pub trait StateHistoryStore: Send + Sync {
    /// Appends rows.
    fn write_rule_state_history(&self, entries: &[RuleStateHistory]) -> Result<()>;

    /// Latest state-changing row per series of a rule.
    fn last_saved_rule_state_history(&self, rule_id: &str) -> Result<Vec<RuleStateHistory>>;

    /// Paginated rows in `[start, end)`, optionally filtered by state.
    fn timeline(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<RuleStateTimeline>;

    /// Series ordered by firing count, most frequent first.
    fn top_contributors(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateHistoryContributor>>;

    /// Alternating firing and inactive periods covering the window.
    fn overall_state_transitions(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateTransition>>;

    /// Number of firing transitions.
    fn total_triggers(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<u64>;

    /// Firing transitions per interval; `None` when there are none.
    fn triggers_by_interval(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<Option<Series>>;

    /// Mean seconds from the rule firing to resolving; NaN without data.
    fn avg_resolution_time(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<f64>;

    /// Mean resolution time per interval of the firing time.
    fn avg_resolution_time_by_interval(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Option<Series>>;
}

/// In-memory [`StateHistoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateHistoryStore {
    rows: RwLock<Vec<RuleStateHistory>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Resolution {
    firing_time: i64,
    state: RuleState,
    resolution_time: i64,
}

impl InMemoryStateHistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every row.
    #[must_use]
    pub fn rows(&self) -> Vec<RuleStateHistory> {
        self.rows.read().clone()
    }

    fn rule_rows(&self, org_id: &str, rule_id: &str) -> Vec<RuleStateHistory> {
        self.rows
            .read()
            .iter()
            .filter(|h| h.org_id == org_id && h.rule_id == rule_id)
            .cloned()
            .collect()
    }

    fn triggers(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Vec<RuleStateHistory> {
        self.rule_rows(org_id, rule_id)
            .into_iter()
            .filter(|h| h.state_changed && h.state == RuleState::Firing && params.contains(h.unix_milli))
            .collect()
    }

    // Each overall firing transition paired with the first overall
    // resolution after it. Firings that never resolved are dropped.
    fn resolutions(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Vec<Resolution> {
        let rows = self.rule_rows(org_id, rule_id);
        let in_window = |h: &&RuleStateHistory, state: RuleState| {
            h.overall_state == state && h.overall_state_changed && params.contains(h.unix_milli)
        };
        let resolved: Vec<i64> = rows
            .iter()
            .filter(|h| in_window(h, RuleState::Inactive))
            .map(|h| h.unix_milli)
            .collect();
        let matched: BTreeSet<Resolution> = rows
            .iter()
            .filter(|h| in_window(h, RuleState::Firing))
            .filter_map(|h| {
                resolved
                    .iter()
                    .filter(|&&r| r > h.unix_milli)
                    .min()
                    .map(|&resolution_time| Resolution {
                        firing_time: h.unix_milli,
                        state: h.state,
                        resolution_time,
                    })
            })
            .collect();
        matched.into_iter().collect()
    }
}

fn bucket(unix_milli: i64, step_secs: i64) -> i64 {
    let step = step_secs.saturating_mul(1000);
    unix_milli.div_euclid(step) * step
}

fn series(points: BTreeMap<i64, f64>) -> Option<Series> {
    if points.is_empty() {
        return None;
    }
    Some(Series {
        labels: LabelSet::new(),
        points: points
            .into_iter()
            .map(|(timestamp, value)| Point { timestamp, value })
            .collect(),
    })
}

fn mean_secs(durations: &[i64]) -> f64 {
    if durations.is_empty() {
        return f64::NAN;
    }
    durations.iter().map(|&d| d as f64).sum::<f64>() / durations.len() as f64 / 1000.0
}

impl StateHistoryStore for InMemoryStateHistoryStore {
    fn write_rule_state_history(&self, entries: &[RuleStateHistory]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.rows.write().extend_from_slice(entries);
        Ok(())
    }

    fn last_saved_rule_state_history(&self, rule_id: &str) -> Result<Vec<RuleStateHistory>> {
        let mut latest: HashMap<u64, RuleStateHistory> = HashMap::new();
        for row in self.rows.read().iter().filter(|h| h.rule_id == rule_id && h.state_changed) {
            match latest.get(&row.fingerprint) {
                Some(existing) if existing.unix_milli > row.unix_milli => {}
                _ => {
                    latest.insert(row.fingerprint, row.clone());
                }
            }
        }
        let mut rows: Vec<_> = latest.into_values().collect();
        rows.sort_by(|a, b| b.unix_milli.cmp(&a.unix_milli));
        Ok(rows)
    }

    fn timeline(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<RuleStateTimeline> {
        let all = self.rule_rows(org_id, rule_id);

        let mut labels: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for set in all.iter().filter_map(RuleStateHistory::label_set) {
            for (name, value) in set {
                labels.entry(name).or_default().insert(value);
            }
        }

        let mut matching: Vec<_> = all
            .into_iter()
            .filter(|h| params.start <= h.unix_milli && h.unix_milli < params.end)
            .filter(|h| params.state.is_none_or(|s| h.state == s))
            .collect();
        matching.sort_by_key(|h| h.unix_milli);
        if params.order == SortOrder::Desc {
            matching.reverse();
        }
        let total = matching.len() as u64;
        let items = matching.into_iter().skip(params.offset).take(params.limit).collect();

        Ok(RuleStateTimeline {
            items,
            total,
            labels: labels
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().collect()))
                .collect(),
        })
    }

    fn top_contributors(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateHistoryContributor>> {
        let mut by_fingerprint: BTreeMap<u64, RuleStateHistoryContributor> = BTreeMap::new();
        for row in self.triggers(org_id, rule_id, params) {
            let entry = by_fingerprint
                .entry(row.fingerprint)
                .or_insert_with(|| RuleStateHistoryContributor {
                    fingerprint: row.fingerprint,
                    labels: row.labels.clone(),
                    count: 0,
                });
            entry.count += 1;
        }
        let mut contributors: Vec<_> = by_fingerprint
            .into_values()
            .filter(|c| c.labels != "{}")
            .collect();
        contributors.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(contributors)
    }

    fn overall_state_transitions(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateTransition>> {
        let resolutions = self.resolutions(org_id, rule_id, params);
        let rows = self.rule_rows(org_id, rule_id);

        let mut transitions = Vec::new();
        for (idx, r) in resolutions.iter().enumerate() {
            transitions.push(RuleStateTransition {
                state: r.state,
                start: r.firing_time,
                end: r.resolution_time,
            });
            if let Some(next) = resolutions.get(idx + 1) {
                if next.firing_time > r.resolution_time {
                    transitions.push(RuleStateTransition {
                        state: RuleState::Inactive,
                        start: r.resolution_time,
                        end: next.firing_time,
                    });
                }
            }
        }

        let last_state = rows
            .iter()
            .filter(|h| h.unix_milli <= params.end)
            .max_by_key(|h| h.unix_milli)
            .map_or(RuleState::Inactive, |h| h.state);

        let Some(last) = resolutions.last() else {
            transitions.push(RuleStateTransition {
                state: last_state,
                start: params.start,
                end: params.end,
            });
            return Ok(transitions);
        };

        if last_state == RuleState::Inactive {
            transitions.push(RuleStateTransition {
                state: RuleState::Inactive,
                start: last.resolution_time,
                end: params.end,
            });
        } else {
            let firing_time = rows
                .iter()
                .filter(|h| {
                    h.overall_state_changed && h.overall_state == RuleState::Firing && h.unix_milli <= params.end
                })
                .map(|h| h.unix_milli)
                .max()
                .unwrap_or(last.resolution_time);
            transitions.push(RuleStateTransition {
                state: RuleState::Inactive,
                start: last.resolution_time,
                end: firing_time,
            });
            transitions.push(RuleStateTransition {
                state: RuleState::Firing,
                start: firing_time,
                end: params.end,
            });
        }
        Ok(transitions)
    }

    fn total_triggers(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<u64> {
        Ok(self.triggers(org_id, rule_id, params).len() as u64)
    }

    fn triggers_by_interval(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<Option<Series>> {
        let step = params.step_secs();
        let mut points = BTreeMap::new();
        for row in self.triggers(org_id, rule_id, params) {
            *points.entry(bucket(row.unix_milli, step)).or_insert(0.0) += 1.0;
        }
        Ok(series(points))
    }

    fn avg_resolution_time(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<f64> {
        let durations: Vec<i64> = self
            .resolutions(org_id, rule_id, params)
            .iter()
            .map(|r| r.resolution_time - r.firing_time)
            .collect();
        Ok(mean_secs(&durations))
    }

    fn avg_resolution_time_by_interval(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Option<Series>> {
        let step = params.step_secs();
        let mut buckets: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for r in self.resolutions(org_id, rule_id, params) {
            buckets
                .entry(bucket(r.firing_time, step))
                .or_default()
                .push(r.resolution_time - r.firing_time);
        }
        Ok(series(
            buckets
                .into_iter()
                .map(|(ts, durations)| (ts, mean_secs(&durations)))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn row(fingerprint: u64, state: RuleState, overall: RuleState, overall_changed: bool, at: i64) -> RuleStateHistory {
        RuleStateHistory {
            org_id: "org-1".to_string(),
            rule_id: "rule-1".to_string(),
            rule_name: "High CPU".to_string(),
            overall_state: overall,
            overall_state_changed: overall_changed,
            state,
            state_changed: true,
            unix_milli: at,
            labels: format!("{{\"host\":\"server-{fingerprint}\"}}"),
            fingerprint,
            value: 1.0,
        }
    }

    // Two firing episodes: [0, 10m] and [20m, 25m], then firing again at 40m.
    fn store() -> InMemoryStateHistoryStore {
        use RuleState::{Firing, Inactive};
        let store = InMemoryStateHistoryStore::new();
        store
            .write_rule_state_history(&[
                row(1, Firing, Firing, true, 0),
                row(2, Firing, Firing, false, 2 * MIN),
                row(1, Inactive, Firing, false, 5 * MIN),
                row(2, Inactive, Inactive, true, 10 * MIN),
                row(1, Firing, Firing, true, 20 * MIN),
                row(1, Inactive, Inactive, true, 25 * MIN),
                row(1, Firing, Firing, true, 40 * MIN),
            ])
            .unwrap();
        store
    }

    fn window() -> QueryRuleStateHistory {
        QueryRuleStateHistory::new(0, 60 * MIN)
    }

    mod query_tests {
        use super::*;

        #[test]
        fn step_has_one_minute_floor() {
            assert_eq!(QueryRuleStateHistory::new(0, 60 * MIN).step_secs(), 60);
        }

        #[test]
        fn step_keeps_points_bounded() {
            // 30 days / 300 points = 8640s, already a whole minute
            let q = QueryRuleStateHistory::new(0, 30 * DAY_MILLIS);
            assert_eq!(q.step_secs(), 8640);
            let q = QueryRuleStateHistory { step: 10_000, ..q };
            assert_eq!(q.step_secs(), 10_000);
        }

        #[test]
        fn previous_period_shifts_by_whole_days() {
            let q = QueryRuleStateHistory::new(DAY_MILLIS * 10, DAY_MILLIS * 10 + DAY_MILLIS + 1);
            let past = q.previous_period();
            assert_eq!(q.start - past.start, 2 * DAY_MILLIS);

            let short = QueryRuleStateHistory::new(DAY_MILLIS * 10, DAY_MILLIS * 10 + MIN);
            assert_eq!(short.start - short.previous_period().start, DAY_MILLIS);
        }

        #[test]
        fn extreme_windows_saturate() {
            let q = QueryRuleStateHistory::new(i64::MIN, i64::MAX);
            let step = q.step_secs();
            assert!(step >= 60);
            assert_eq!(step % 60, 0);
            let past = q.previous_period();
            assert_eq!(past.start, i64::MIN);
            assert!(past.end < q.end);

            let reversed = QueryRuleStateHistory::new(i64::MAX, i64::MIN);
            assert_eq!(reversed.step_secs(), 60);
            assert_eq!(reversed.previous_period().start, i64::MAX - DAY_MILLIS);

            assert_eq!(bucket(i64::MAX, i64::MAX), i64::MAX);
        }
    }

    mod store_tests {
        use super::*;

        #[test]
        fn timeline_paginates_newest_first() {
            let page = store()
                .timeline("org-1", "rule-1", &QueryRuleStateHistory { limit: 2, ..window() })
                .unwrap();
            assert_eq!(page.total, 7);
            assert_eq!(page.items.len(), 2);
            assert_eq!(page.items[0].unix_milli, 40 * MIN);
            assert_eq!(page.labels["host"], vec!["server-1".to_string(), "server-2".to_string()]);
        }

        #[test]
        fn timeline_filters_state_and_org() {
            let s = store();
            let firing = s
                .timeline(
                    "org-1",
                    "rule-1",
                    &QueryRuleStateHistory {
                        state: Some(RuleState::Firing),
                        order: SortOrder::Asc,
                        ..window()
                    },
                )
                .unwrap();
            assert_eq!(firing.total, 4);
            assert_eq!(firing.items[0].unix_milli, 0);
            assert_eq!(s.timeline("org-2", "rule-1", &window()).unwrap().total, 0);
        }

        #[test]
        fn triggers_count_firing_transitions() {
            let s = store();
            assert_eq!(s.total_triggers("org-1", "rule-1", &window()).unwrap(), 4);
            let series = s.triggers_by_interval("org-1", "rule-1", &window()).unwrap().unwrap();
            assert_eq!(series.points.len(), 4);
            assert!(s
                .triggers_by_interval("org-1", "rule-9", &window())
                .unwrap()
                .is_none());
        }

        #[test]
        fn top_contributors_rank_by_count() {
            let contributors = store().top_contributors("org-1", "rule-1", &window()).unwrap();
            assert_eq!(contributors[0].fingerprint, 1);
            assert_eq!(contributors[0].count, 3);
            assert_eq!(contributors[1].count, 1);
        }

        #[test]
        fn avg_resolution_time_pairs_episodes() {
            let s = store();
            // (10m + 5m) / 2 in seconds
            let avg = s.avg_resolution_time("org-1", "rule-1", &window()).unwrap();
            assert!((avg - 450.0).abs() < 1e-9);
            assert!(s.avg_resolution_time("org-1", "rule-9", &window()).unwrap().is_nan());
        }

        #[test]
        fn overall_transitions_cover_window() {
            let transitions = store()
                .overall_state_transitions("org-1", "rule-1", &window())
                .unwrap();
            let shape: Vec<_> = transitions.iter().map(|t| (t.state, t.start, t.end)).collect();
            assert_eq!(
                shape,
                vec![
                    (RuleState::Firing, 0, 10 * MIN),
                    (RuleState::Inactive, 10 * MIN, 20 * MIN),
                    (RuleState::Firing, 20 * MIN, 25 * MIN),
                    (RuleState::Inactive, 25 * MIN, 40 * MIN),
                    (RuleState::Firing, 40 * MIN, 60 * MIN),
                ]
            );
        }

        #[test]
        fn overall_transitions_without_episodes() {
            let transitions = InMemoryStateHistoryStore::new()
                .overall_state_transitions("org-1", "rule-1", &window())
                .unwrap();
            assert_eq!(
                transitions,
                vec![RuleStateTransition {
                    state: RuleState::Inactive,
                    start: 0,
                    end: 60 * MIN,
                }]
            );
        }

        #[test]
        fn last_saved_is_latest_per_series() {
            let rows = store().last_saved_rule_state_history("rule-1").unwrap();
            assert_eq!(rows.len(), 2);
            let one = rows.iter().find(|h| h.fingerprint == 1).unwrap();
            assert_eq!(one.unix_milli, 40 * MIN);
        }

        #[test]
        fn label_set_parses_json() {
            let r = row(1, RuleState::Firing, RuleState::Firing, true, 0);
            assert_eq!(r.label_set().unwrap()["host"], "server-1");
            assert!(RuleStateHistory { labels: String::new(), ..r }.label_set().is_none());
        }
    }
}
