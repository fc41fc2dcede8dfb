//! Inhibition: firing source alerts suppress matching target alerts.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::InhibitRule;
use crate::labels::{Fingerprint, LabelSet, matches_all};
use crate::pipeline::alerts::AlertStore;
use crate::types::{Alert, AlertMarker};

/// Evaluates inhibit rules against the alerts currently in the store.
#[derive(Debug, Clone)]
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
    alerts: Arc<AlertStore>,
    marker: Arc<AlertMarker>,
}

impl Inhibitor {
    /// Creates an inhibitor for a rule set.
    #[must_use]
    pub const fn new(rules: Vec<InhibitRule>, alerts: Arc<AlertStore>, marker: Arc<AlertMarker>) -> Self {
        Self { rules, alerts, marker }
    }

    /// True if some firing source alert inhibits the label set. Records
    /// the inhibiting fingerprints on the marker.
    pub fn mutes(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        let target = Fingerprint::of(labels);
        let mut inhibited_by = Vec::new();
        let sources: Vec<Alert> = self.alerts.list();
        for rule in &self.rules {
            if !matches_all(&rule.target_matchers, labels) {
                continue;
            }
            // an alert matching both sides must not be inhibited by another
            // alert that also matches both sides
            let two_sided = matches_all(&rule.source_matchers, labels);
            let source = sources.iter().find(|source| {
                source.fingerprint() != target
                    && !source.resolved_at(now)
                    && matches_all(&rule.source_matchers, &source.labels)
                    && !(two_sided && matches_all(&rule.target_matchers, &source.labels))
                    && rule.equal.iter().all(|name| source.labels.get(name) == labels.get(name))
            });
            if let Some(source) = source {
                inhibited_by.push(source.fingerprint().to_string());
                break;
            }
        }
        let muted = !inhibited_by.is_empty();
        self.marker.set_inhibited(target, inhibited_by);
        muted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{Matcher, label_set};
    use chrono::TimeDelta;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn alert(labels: LabelSet, resolved: bool) -> Alert {
        Alert {
            labels,
            annotations: LabelSet::new(),
            starts_at: now() - TimeDelta::minutes(10),
            ends_at: if resolved { now() - TimeDelta::minutes(1) } else { now() + TimeDelta::minutes(5) },
            generator_url: String::new(),
            updated_at: now(),
            timeout: false,
        }
    }

    fn critical_inhibits_warning() -> InhibitRule {
        InhibitRule {
            source_matchers: vec![Matcher::equal("severity", "critical").unwrap()],
            target_matchers: vec![Matcher::equal("severity", "warning").unwrap()],
            equal: vec!["cluster".to_string()],
        }
    }

    fn inhibitor(alerts: Vec<Alert>) -> (Inhibitor, Arc<AlertMarker>) {
        let store = Arc::new(AlertStore::new());
        store.put(alerts);
        let marker = Arc::new(AlertMarker::new());
        (
            Inhibitor::new(vec![critical_inhibits_warning()], store, Arc::clone(&marker)),
            marker,
        )
    }

    #[test]
    fn firing_source_inhibits_target_with_equal_labels() {
        let source = alert(label_set([("severity", "critical"), ("cluster", "eu-1")]), false);
        let (inhibitor, marker) = inhibitor(vec![source.clone()]);
        let target = label_set([("severity", "warning"), ("cluster", "eu-1")]);
        assert!(inhibitor.mutes(&target, now()));
        assert_eq!(
            marker.status(Fingerprint::of(&target)).inhibited_by,
            vec![source.fingerprint().to_string()]
        );
    }

    #[test]
    fn differing_equal_label_does_not_inhibit() {
        let (inhibitor, _) = inhibitor(vec![alert(label_set([("severity", "critical"), ("cluster", "eu-1")]), false)]);
        assert!(!inhibitor.mutes(&label_set([("severity", "warning"), ("cluster", "us-1")]), now()));
    }

    #[test]
    fn resolved_source_does_not_inhibit() {
        let (inhibitor, marker) = inhibitor(vec![alert(label_set([("severity", "critical"), ("cluster", "eu-1")]), true)]);
        let target = label_set([("severity", "warning"), ("cluster", "eu-1")]);
        assert!(!inhibitor.mutes(&target, now()));
        assert!(marker.status(Fingerprint::of(&target)).inhibited_by.is_empty());
    }

    #[test]
    fn non_target_is_untouched() {
        let (inhibitor, _) = inhibitor(vec![alert(label_set([("severity", "critical"), ("cluster", "eu-1")]), false)]);
        assert!(!inhibitor.mutes(&label_set([("severity", "critical"), ("cluster", "eu-1")]), now()));
    }
}
