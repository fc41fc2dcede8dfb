//! Per-rule notification grouping and re-notification settings.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::labels::{LabelSet, NO_DATA_LABEL, RULE_ID_LABEL};

/// Group-by entry meaning "group by every label".
pub const GROUP_BY_ALL: &str = "__all__";

const DEFAULT_RENOTIFY: Duration = Duration::from_secs(4 * 60 * 60);

/// How notifications for one rule are grouped and repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Labels forming the group key.
    pub notification_group: BTreeSet<String>,
    /// Repeat interval for firing notifications.
    #[serde(with = "humantime_serde")]
    pub renotify_interval: Duration,
    /// Repeat interval for no-data notifications.
    #[serde(with = "humantime_serde")]
    pub no_data_interval: Duration,
    /// Route through notification policies instead of direct rule routes.
    #[serde(default)]
    pub use_policy: bool,
    /// Group by every label.
    #[serde(default)]
    pub group_by_all: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            notification_group: BTreeSet::from([RULE_ID_LABEL.to_string()]),
            renotify_interval: DEFAULT_RENOTIFY,
            no_data_interval: DEFAULT_RENOTIFY,
            use_policy: false,
            group_by_all: false,
        }
    }
}

impl NotificationConfig {
    /// Builds a config on top of the defaults. Zero intervals keep the
    /// default; `__all__` among the groups enables grouping by all labels.
    #[must_use]
    pub fn new(groups: &[String], renotify: Duration, no_data: Duration, use_policy: bool) -> Self {
        let mut config = Self::default();
        if !renotify.is_zero() {
            config.renotify_interval = renotify;
        }
        if !no_data.is_zero() {
            config.no_data_interval = no_data;
        }
        for group in groups {
            config.notification_group.insert(group.clone());
            if group == GROUP_BY_ALL {
                config.group_by_all = true;
            }
        }
        config.use_policy = use_policy;
        config
    }

    /// Labels of `alert_labels` that form the alert's group key.
    ///
    /// No-data alerts always carry the no-data label so they group apart.
    #[must_use]
    pub fn group_labels(&self, alert_labels: &LabelSet) -> LabelSet {
        let mut labels: LabelSet = alert_labels
            .iter()
            .filter(|(name, _)| self.group_by_all || self.notification_group.contains(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(value) = alert_labels.get(NO_DATA_LABEL) {
            labels.insert(NO_DATA_LABEL.to_string(), value.clone());
        }
        labels
    }

    /// Repeat interval for an alert with these labels.
    #[must_use]
    pub fn repeat_interval(&self, alert_labels: &LabelSet) -> Duration {
        if is_no_data(alert_labels) {
            self.no_data_interval
        } else {
            self.renotify_interval
        }
    }
}

/// True for alerts raised because a rule's query returned no data.
#[must_use]
pub fn is_no_data(labels: &LabelSet) -> bool {
    labels.get(NO_DATA_LABEL).is_some_and(|v| v == "true")
}

/// Notification configs of every rule, keyed by organization and rule.
#[derive(Debug, Default)]
pub struct NotificationConfigs {
    configs: RwLock<HashMap<(String, String), NotificationConfig>>,
}

impl NotificationConfigs {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a rule's config.
    pub fn set(&self, org_id: &str, rule_id: &str, config: NotificationConfig) {
        self.configs
            .write()
            .insert((org_id.to_string(), rule_id.to_string()), config);
    }

    /// Returns a rule's config, or the defaults if none was set.
    #[must_use]
    pub fn get(&self, org_id: &str, rule_id: &str) -> NotificationConfig {
        self.configs
            .read()
            .get(&(org_id.to_string(), rule_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a rule's config if one was set.
    #[must_use]
    pub fn find(&self, org_id: &str, rule_id: &str) -> Option<NotificationConfig> {
        self.configs
            .read()
            .get(&(org_id.to_string(), rule_id.to_string()))
            .cloned()
    }

    /// Removes a rule's config. Returns true if one existed.
    pub fn delete(&self, org_id: &str, rule_id: &str) -> bool {
        self.configs
            .write()
            .remove(&(org_id.to_string(), rule_id.to_string()))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::label_set;

    fn labels() -> LabelSet {
        label_set([("ruleId", "r1"), ("host", "a"), ("env", "prod")])
    }

    #[test]
    fn defaults_group_by_rule_id() {
        let config = NotificationConfig::default();
        assert_eq!(config.group_labels(&labels()), label_set([("ruleId", "r1")]));
        assert_eq!(config.repeat_interval(&labels()), DEFAULT_RENOTIFY);
    }

    #[test]
    fn zero_intervals_keep_defaults() {
        let config = NotificationConfig::new(&["host".to_string()], Duration::ZERO, Duration::from_secs(60), true);
        assert_eq!(config.renotify_interval, DEFAULT_RENOTIFY);
        assert_eq!(config.no_data_interval, Duration::from_secs(60));
        assert!(config.use_policy);
        assert_eq!(config.group_labels(&labels()), label_set([("ruleId", "r1"), ("host", "a")]));
    }

    #[test]
    fn group_by_all() {
        let config = NotificationConfig::new(&[GROUP_BY_ALL.to_string()], Duration::ZERO, Duration::ZERO, false);
        assert!(config.group_by_all);
        assert_eq!(config.group_labels(&labels()), labels());
    }

    #[test]
    fn no_data_alerts_group_apart() {
        let config = NotificationConfig::new(&[], Duration::from_secs(600), Duration::from_secs(60), false);
        let mut no_data = labels();
        no_data.insert(NO_DATA_LABEL.to_string(), "true".to_string());
        assert_eq!(config.group_labels(&no_data), label_set([("ruleId", "r1"), ("nodata", "true")]));
        assert_eq!(config.repeat_interval(&no_data), Duration::from_secs(60));
        assert_eq!(config.repeat_interval(&labels()), Duration::from_secs(600));
    }

    #[test]
    fn registry_falls_back_to_defaults() {
        let configs = NotificationConfigs::new();
        assert_eq!(configs.get("org-1", "r1"), NotificationConfig::default());
        assert!(configs.find("org-1", "r1").is_none());

        let custom = NotificationConfig::new(&[], Duration::from_secs(60), Duration::ZERO, true);
        configs.set("org-1", "r1", custom.clone());
        assert_eq!(configs.get("org-1", "r1"), custom);
        assert_eq!(configs.get("org-2", "r1"), NotificationConfig::default());
        assert!(configs.delete("org-1", "r1"));
        assert!(!configs.delete("org-1", "r1"));
    }
}
