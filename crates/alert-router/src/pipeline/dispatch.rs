//! Dispatcher: sorts alerts into aggregation groups and flushes them
//! through the notification pipeline.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::labels::{Fingerprint, LabelSet, NO_DATA_LABEL};
use crate::notification_config::NotificationConfigs;
use crate::pipeline::alerts::AlertSubscription;
use crate::pipeline::notify::{Flush, NotifyPipeline};
use crate::pipeline::route::CompiledRoute;
use crate::types::Alert;

/// Renders a label set as `{a="1", b="2"}`.
#[must_use]
pub fn format_labels(labels: &LabelSet) -> String {
    let mut out = String::from("{");
    for (idx, (name, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{name}={value:?}");
    }
    out.push('}');
    out
}

/// A snapshot of one aggregation group.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertGroup {
    /// Labels the group was formed by.
    pub labels: LabelSet,
    /// Receiver of the group's route.
    pub receiver: String,
    /// Group key.
    pub group_key: String,
    /// Id of the group's route.
    pub route_id: String,
    /// Repeat interval.
    pub renotify: Duration,
    /// Alerts, sorted by fingerprint.
    pub alerts: Vec<Alert>,
}

type GroupId = (String, Fingerprint);

#[derive(Debug)]
struct AggrGroup {
    route_id: String,
    receiver: String,
    group_key: String,
    labels: LabelSet,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
    mute_time_intervals: Vec<String>,
    alerts: HashMap<Fingerprint, Alert>,
    next_flush: DateTime<Utc>,
    has_flushed: bool,
}

#[derive(Debug)]
struct PendingFlush {
    id: GroupId,
    receiver: String,
    group_key: String,
    labels: LabelSet,
    repeat_interval: Duration,
    mute_time_intervals: Vec<String>,
    alerts: Vec<Alert>,
}

fn after(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Grouping state shared by the dispatch task and readers.
#[derive(Debug)]
struct Aggregator {
    org_id: String,
    route: CompiledRoute,
    configs: Arc<NotificationConfigs>,
    groups: Mutex<HashMap<GroupId, AggrGroup>>,
}

impl Aggregator {
    /// Grouping labels and repeat interval for an alert on a route. A
    /// rule's own notification config takes precedence over the route
    /// unless it defers to notification policies.
    fn grouping(&self, alert: &Alert, route: &CompiledRoute) -> (LabelSet, Duration) {
        let config = alert
            .rule_id()
            .and_then(|rule_id| self.configs.find(&self.org_id, rule_id))
            .filter(|c| !c.use_policy);
        if let Some(config) = config {
            return (config.group_labels(&alert.labels), config.repeat_interval(&alert.labels));
        }
        let opts = route.opts();
        let mut labels = opts.group_labels(&alert.labels);
        if let Some(value) = alert.labels.get(NO_DATA_LABEL) {
            labels.insert(NO_DATA_LABEL.to_string(), value.clone());
        }
        (labels, opts.repeat_interval)
    }

    fn insert(&self, alert: &Alert, now: DateTime<Utc>) {
        let routes = self.route.matches(&alert.labels);
        let mut groups = self.groups.lock();
        for route in routes {
            let (labels, repeat_interval) = self.grouping(alert, route);
            let opts = route.opts();
            let id = (route.id().to_string(), Fingerprint::of(&labels));
            let group = groups.entry(id).or_insert_with(|| {
                debug!(route = %route.id(), labels = %format_labels(&labels), "new aggregation group");
                AggrGroup {
                    route_id: route.id().to_string(),
                    receiver: opts.receiver.clone(),
                    group_key: format!("{}:{}", route.id(), format_labels(&labels)),
                    labels,
                    group_wait: opts.group_wait,
                    group_interval: opts.group_interval,
                    repeat_interval,
                    mute_time_intervals: opts.mute_time_intervals.clone(),
                    alerts: HashMap::new(),
                    next_flush: after(now, opts.group_wait),
                    has_flushed: false,
                }
            });
            group.alerts.insert(alert.fingerprint(), alert.clone());
            // an alert that has waited long enough triggers the first flush
            if !group.has_flushed && after(alert.starts_at, group.group_wait) <= now {
                group.next_flush = now;
            }
        }
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<PendingFlush> {
        let mut groups = self.groups.lock();
        groups.retain(|_, g| !g.alerts.is_empty());
        let mut due: Vec<PendingFlush> = groups
            .iter_mut()
            .filter(|(_, g)| g.next_flush <= now)
            .map(|(id, g)| {
                g.next_flush = after(now, g.group_interval);
                g.has_flushed = true;
                let mut alerts: Vec<Alert> = g.alerts.values().cloned().collect();
                alerts.sort_by_key(Alert::fingerprint);
                PendingFlush {
                    id: id.clone(),
                    receiver: g.receiver.clone(),
                    group_key: g.group_key.clone(),
                    labels: g.labels.clone(),
                    repeat_interval: g.repeat_interval,
                    mute_time_intervals: g.mute_time_intervals.clone(),
                    alerts,
                }
            })
            .collect();
        due.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        due
    }

    /// Drops the resolved alerts that were just notified, unless they
    /// were updated during the flush.
    fn complete(&self, flush: &PendingFlush, now: DateTime<Utc>) {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(&flush.id) else {
            return;
        };
        for sent in flush.alerts.iter().filter(|a| a.resolved_at(now)) {
            let fingerprint = sent.fingerprint();
            if group
                .alerts
                .get(&fingerprint)
                .is_some_and(|current| current.updated_at == sent.updated_at)
            {
                group.alerts.remove(&fingerprint);
            }
        }
    }

    fn flush_due(&self, pipeline: &NotifyPipeline, now: DateTime<Utc>) {
        for pending in self.take_due(now) {
            let flush = Flush {
                receiver: &pending.receiver,
                group_key: &pending.group_key,
                group_labels: &pending.labels,
                repeat_interval: pending.repeat_interval,
                mute_time_intervals: &pending.mute_time_intervals,
                alerts: pending.alerts.clone(),
            };
            match pipeline.exec(flush, now) {
                Ok(()) => self.complete(&pending, now),
                Err(e) => error!(org_id = %self.org_id, group_key = %pending.group_key, error = %e, "flush failed"),
            }
        }
    }

    fn snapshot(&self) -> (Vec<AlertGroup>, HashMap<Fingerprint, Vec<String>>) {
        let groups = self.groups.lock();
        let mut receivers: HashMap<Fingerprint, Vec<String>> = HashMap::new();
        let mut out: Vec<AlertGroup> = groups
            .values()
            .filter(|g| !g.alerts.is_empty())
            .map(|g| {
                let mut alerts: Vec<Alert> = g.alerts.values().cloned().collect();
                alerts.sort_by_key(Alert::fingerprint);
                for alert in &alerts {
                    receivers.entry(alert.fingerprint()).or_default().push(g.receiver.clone());
                }
                AlertGroup {
                    labels: g.labels.clone(),
                    receiver: g.receiver.clone(),
                    group_key: g.group_key.clone(),
                    route_id: g.route_id.clone(),
                    renotify: g.repeat_interval,
                    alerts,
                }
            })
            .collect();
        out.sort_by(|a, b| (&a.receiver, &a.group_key).cmp(&(&b.receiver, &b.group_key)));
        for names in receivers.values_mut() {
            names.sort();
            names.dedup();
        }
        (out, receivers)
    }
}

/// A running dispatcher of one configuration.
#[derive(Debug)]
pub struct Dispatcher {
    aggregator: Arc<Aggregator>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns the dispatch loop. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        org_id: impl Into<String>,
        route: CompiledRoute,
        configs: Arc<NotificationConfigs>,
        pipeline: Arc<NotifyPipeline>,
        alerts: AlertSubscription,
        tick: Duration,
    ) -> Self {
        let aggregator = Arc::new(Aggregator {
            org_id: org_id.into(),
            route,
            configs,
            groups: Mutex::new(HashMap::new()),
        });
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run(Arc::clone(&aggregator), pipeline, alerts, rx, tick));
        Self {
            aggregator,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Current aggregation groups and, per alert, the receivers it was
    /// routed to.
    #[must_use]
    pub fn groups(&self) -> (Vec<AlertGroup>, HashMap<Fingerprint, Vec<String>>) {
        self.aggregator.snapshot()
    }

    /// Stops the loop and waits for it to exit. Later calls return at once.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(org_id = %self.aggregator.org_id, error = %e, "dispatcher task failed");
            }
        }
    }
}

async fn run(
    aggregator: Arc<Aggregator>,
    pipeline: Arc<NotifyPipeline>,
    mut alerts: AlertSubscription,
    mut shutdown: watch::Receiver<bool>,
    tick: Duration,
) {
    info!(org_id = %aggregator.org_id, "dispatcher started");
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            alert = alerts.recv() => match alert {
                Some(alert) => {
                    debug!(org_id = %aggregator.org_id, fingerprint = %alert.fingerprint(), "received alert");
                    aggregator.insert(&alert, Utc::now());
                }
                None => break,
            },
            _ = ticker.tick() => aggregator.flush_due(&pipeline, Utc::now()),
            _ = shutdown.changed() => break,
        }
    }
    info!(org_id = %aggregator.org_id, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::error::Result;
    use crate::labels::{Matcher, label_set};
    use crate::muter::MaintenanceExprMuter;
    use crate::notification_config::NotificationConfig;
    use crate::pipeline::alerts::AlertStore;
    use crate::pipeline::inhibit::Inhibitor;
    use crate::pipeline::integration::{Integration, Notification, NotificationResult};
    use crate::pipeline::nflog::NotificationLog;
    use crate::pipeline::silence::{Silencer, Silences};
    use crate::receiver::IntegrationKind;
    use crate::route::Route;
    use crate::types::AlertMarker;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn alert(labels: &[(&str, &str)], resolved: bool) -> Alert {
        Alert {
            labels: label_set(labels.iter().copied()),
            annotations: LabelSet::new(),
            starts_at: now() - TimeDelta::seconds(5),
            ends_at: if resolved { now() - TimeDelta::seconds(1) } else { now() + TimeDelta::minutes(5) },
            generator_url: String::new(),
            updated_at: now(),
            timeout: false,
        }
    }

    fn tree() -> Route {
        Route {
            receiver: "default".to_string(),
            group_by: vec!["alertname".to_string()],
            group_wait: Some(Duration::from_secs(30)),
            group_interval: Some(Duration::from_secs(300)),
            routes: vec![Route::new("db").with_matchers(vec![Matcher::equal("service", "db").unwrap()])],
            ..Route::default()
        }
    }

    fn aggregator(configs: Arc<NotificationConfigs>) -> Aggregator {
        Aggregator {
            org_id: "org-1".to_string(),
            route: CompiledRoute::compile(&tree(), &RouteConfig::default()),
            configs,
            groups: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn formats_labels() {
        assert_eq!(format_labels(&label_set([("a", "1"), ("b", "x\"y")])), "{a=\"1\", b=\"x\\\"y\"}");
        assert_eq!(format_labels(&LabelSet::new()), "{}");
    }

    mod grouping_tests {
        use super::*;

        #[test]
        fn alerts_group_by_route_labels() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            agg.insert(&alert(&[("alertname", "A"), ("host", "1")], false), now());
            agg.insert(&alert(&[("alertname", "A"), ("host", "2")], false), now());
            agg.insert(&alert(&[("alertname", "B"), ("service", "db")], false), now());
            let (groups, receivers) = agg.snapshot();
            assert_eq!(groups.len(), 2);
            assert_eq!(groups[0].receiver, "db");
            assert_eq!(groups[1].group_key, "{}:{alertname=\"A\"}");
            assert_eq!(groups[1].alerts.len(), 2);
            let fp = alert(&[("alertname", "B"), ("service", "db")], false).fingerprint();
            assert_eq!(receivers[&fp], vec!["db"]);
        }

        #[test]
        fn rule_notification_config_overrides_route_grouping() {
            let configs = Arc::new(NotificationConfigs::new());
            configs.set(
                "org-1",
                "r1",
                NotificationConfig::new(&["host".to_string()], Duration::from_secs(600), Duration::ZERO, false),
            );
            let agg = aggregator(configs);
            agg.insert(&alert(&[("alertname", "A"), ("host", "1"), ("ruleId", "r1")], false), now());
            agg.insert(&alert(&[("alertname", "B"), ("host", "1"), ("ruleId", "r1")], false), now());
            let (groups, _) = agg.snapshot();
            assert_eq!(groups.len(), 1);
            assert_eq!(groups[0].labels, label_set([("host", "1"), ("ruleId", "r1")]));
            assert_eq!(groups[0].renotify, Duration::from_secs(600));
        }

        #[test]
        fn no_data_alerts_get_their_own_group() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            agg.insert(&alert(&[("alertname", "A"), ("host", "1")], false), now());
            agg.insert(&alert(&[("alertname", "A"), ("nodata", "true")], false), now());
            assert_eq!(agg.snapshot().0.len(), 2);
        }
    }

    mod flush_tests {
        use super::*;

        #[test]
        fn first_flush_waits_for_group_wait() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            let mut fresh = alert(&[("alertname", "A")], false);
            fresh.starts_at = now();
            agg.insert(&fresh, now());
            assert!(agg.take_due(now() + TimeDelta::seconds(10)).is_empty());
            assert_eq!(agg.take_due(now() + TimeDelta::seconds(30)).len(), 1);
            // then every group interval
            assert!(agg.take_due(now() + TimeDelta::seconds(60)).is_empty());
            assert_eq!(agg.take_due(now() + TimeDelta::seconds(330)).len(), 1);
        }

        #[test]
        fn old_alert_flushes_immediately() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            let mut old = alert(&[("alertname", "A")], false);
            old.starts_at = now() - TimeDelta::minutes(5);
            agg.insert(&old, now());
            assert_eq!(agg.take_due(now()).len(), 1);
        }

        #[test]
        fn completed_flush_drops_resolved_alerts() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            agg.insert(&alert(&[("alertname", "A"), ("host", "1")], true), now());
            agg.insert(&alert(&[("alertname", "A"), ("host", "2")], false), now());
            let due = agg.take_due(now() + TimeDelta::minutes(1));
            agg.complete(&due[0], now());
            let (groups, _) = agg.snapshot();
            assert_eq!(groups[0].alerts.len(), 1);
            assert_eq!(groups[0].alerts[0].labels["host"], "2");
        }

        #[test]
        fn resolved_alert_updated_during_flush_is_kept() {
            let agg = aggregator(Arc::new(NotificationConfigs::new()));
            agg.insert(&alert(&[("alertname", "A")], true), now());
            let due = agg.take_due(now() + TimeDelta::minutes(1));
            let mut refired = alert(&[("alertname", "A")], false);
            refired.updated_at = now() + TimeDelta::seconds(1);
            agg.insert(&refired, now());
            agg.complete(&due[0], now());
            assert_eq!(agg.snapshot().0.len(), 1);
        }
    }

    #[derive(Debug, Default)]
    struct Recording {
        sent: Mutex<Vec<Notification>>,
    }

    #[derive(Debug)]
    struct RecordingIntegration(Arc<Recording>);

    impl Integration for RecordingIntegration {
        fn name(&self) -> &str {
            "default/webhook/0"
        }

        fn kind(&self) -> IntegrationKind {
            IntegrationKind::Webhook
        }

        fn send_resolved(&self) -> bool {
            true
        }

        fn notify(&self, notification: &Notification) -> Result<NotificationResult> {
            self.0.sent.lock().push(notification.clone());
            Ok(NotificationResult::success(self.name()))
        }
    }

    #[tokio::test]
    async fn dispatch_loop_notifies_and_stops() {
        let store = Arc::new(AlertStore::new());
        let marker = Arc::new(AlertMarker::new());
        let recording = Arc::new(Recording::default());
        let integration: Arc<dyn Integration> = Arc::new(RecordingIntegration(Arc::clone(&recording)));
        let pipeline = Arc::new(NotifyPipeline::new(
            Inhibitor::new(Vec::new(), Arc::clone(&store), Arc::clone(&marker)),
            Silencer::new(Arc::new(Silences::new(Duration::from_secs(60))), marker),
            Arc::new(MaintenanceExprMuter::new()),
            HashMap::new(),
            Arc::new(NotificationLog::new(Duration::from_secs(60))),
            HashMap::from([("default".to_string(), vec![integration])]),
        ));
        let route = Route {
            receiver: "default".to_string(),
            group_wait: Some(Duration::ZERO),
            ..Route::default()
        };
        let dispatcher = Dispatcher::start(
            "org-1",
            CompiledRoute::compile(&route, &RouteConfig::default()),
            Arc::new(NotificationConfigs::new()),
            pipeline,
            store.subscribe(),
            Duration::from_millis(10),
        );

        let mut firing = alert(&[("alertname", "A")], false);
        firing.ends_at = Utc::now() + TimeDelta::minutes(5);
        store.put(vec![firing]);

        for _ in 0..200 {
            if !recording.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recording.sent.lock().len(), 1);
        assert_eq!(dispatcher.groups().0.len(), 1);

        dispatcher.stop().await;
        dispatcher.stop().await;
    }
}
