//! Per-organization alerting server.
//!
//! A [`Server`] owns one organization's alert store, silences and
//! notification log, and the dispatcher built from its current
//! configuration. Silences and the notification log are restored from the
//! [`StateStore`] on construction and periodically garbage collected and
//! persisted back until [`Server::stop`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RouteConfig};
use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::{ALERT_NAME_LABEL, Fingerprint, LabelSet};
use crate::muter::MaintenanceExprMuter;
use crate::notification_config::{NotificationConfig, NotificationConfigs};
use crate::pipeline::alerts::AlertStore;
use crate::pipeline::dispatch::{Dispatcher, format_labels};
use crate::pipeline::inhibit::Inhibitor;
use crate::pipeline::integration::{Integration, IntegrationFactory, Notification};
use crate::pipeline::nflog::NotificationLog;
use crate::pipeline::notify::{Flush, NotifyPipeline};
use crate::pipeline::route::CompiledRoute;
use crate::pipeline::silence::{Silencer, Silences};
use crate::receiver::Receiver;
use crate::route::TimeInterval;
use crate::settings::{RetentionSettings, RouterSettings};
use crate::store::{NFLOG_STATE, SILENCE_STATE, StateStore};
use crate::types::{Alert, AlertMarker, GettableAlert, GettableAlertsParams, PostableAlert};

/// Collaborators shared by every server of a service.
#[derive(Clone)]
pub struct ServerDeps {
    /// Silence and notification-log snapshots.
    pub state_store: Arc<dyn StateStore>,
    /// Builds receiver integrations.
    pub integrations: Arc<dyn IntegrationFactory>,
    /// Per-rule notification configs.
    pub notification_configs: Arc<NotificationConfigs>,
}

impl std::fmt::Debug for ServerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDeps").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Active {
    dispatcher: Dispatcher,
    pipeline: Arc<NotifyPipeline>,
    inhibitor: Inhibitor,
    silencer: Silencer,
}

/// The alerting server of one organization.
#[derive(Debug)]
pub struct Server {
    org_id: String,
    deps: ServerDeps,
    route_defaults: RouteConfig,
    dispatch_tick: Duration,
    external_url: String,
    muter: Arc<MaintenanceExprMuter>,
    alerts: Arc<AlertStore>,
    marker: Arc<AlertMarker>,
    silences: Arc<Silences>,
    nflog: Arc<NotificationLog>,
    resolve_timeout: RwLock<Duration>,
    hash: RwLock<String>,
    active: Mutex<Option<Arc<Active>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn load_state(store: &dyn StateStore, org_id: &str, name: &str) -> Result<String> {
    match store.get(org_id, name) {
        Ok(state) => Ok(state),
        Err(e) if e.is_not_found() => {
            debug!(org_id, state = name, "no persisted state, starting empty");
            Ok(String::new())
        }
        Err(e) => Err(e),
    }
}

impl Server {
    /// Creates a server, restores its persisted state and starts its
    /// maintenance loops. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted snapshot cannot be read or parsed.
    pub fn new(
        org_id: impl Into<String>,
        settings: &RouterSettings,
        deps: ServerDeps,
        muter: Arc<MaintenanceExprMuter>,
    ) -> Result<Self> {
        let org_id = org_id.into();
        let silences = Arc::new(Silences::new(settings.silences.retention));
        silences.load_snapshot(&load_state(deps.state_store.as_ref(), &org_id, SILENCE_STATE)?)?;
        let nflog = Arc::new(NotificationLog::new(settings.nflog.retention));
        nflog.load_snapshot(&load_state(deps.state_store.as_ref(), &org_id, NFLOG_STATE)?)?;

        let (shutdown, _) = watch::channel(false);
        let server = Self {
            org_id,
            route_defaults: settings.route.clone(),
            dispatch_tick: settings.dispatch_tick,
            external_url: settings.external_url.clone(),
            muter,
            alerts: Arc::new(AlertStore::new()),
            marker: Arc::new(AlertMarker::new()),
            silences,
            nflog,
            resolve_timeout: RwLock::new(settings.global.resolve_timeout),
            hash: RwLock::new(String::new()),
            active: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            deps,
        };
        server.spawn_maintenance(&settings.silences, &settings.nflog);
        info!(org_id = %server.org_id, "alertmanager server started");
        Ok(server)
    }

    fn spawn_maintenance(&self, silence_settings: &RetentionSettings, nflog_settings: &RetentionSettings) {
        let silences = Arc::clone(&self.silences);
        let snapshot_silences = Arc::clone(&self.silences);
        let silence_loop = maintenance(
            self.org_id.clone(),
            SILENCE_STATE,
            silence_settings.maintenance_interval,
            Arc::clone(&self.deps.state_store),
            self.shutdown.subscribe(),
            move |now| silences.gc(now),
            move || snapshot_silences.snapshot(),
        );

        let nflog = Arc::clone(&self.nflog);
        let snapshot_nflog = Arc::clone(&self.nflog);
        let nflog_loop = maintenance(
            self.org_id.clone(),
            NFLOG_STATE,
            nflog_settings.maintenance_interval,
            Arc::clone(&self.deps.state_store),
            self.shutdown.subscribe(),
            move |now| Ok(nflog.gc(now)),
            move || snapshot_nflog.snapshot(),
        );

        let alert_loop = alert_gc(
            Arc::clone(&self.alerts),
            Arc::clone(&self.marker),
            nflog_settings.maintenance_interval,
            self.shutdown.subscribe(),
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(silence_loop));
        tasks.push(tokio::spawn(nflog_loop));
        tasks.push(tokio::spawn(alert_loop));
    }

    /// Organization served.
    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Hash of the configuration currently applied, empty before the
    /// first [`Server::set_config`].
    #[must_use]
    pub fn hash(&self) -> String {
        self.hash.read().clone()
    }

    /// The server's silences.
    #[must_use]
    pub fn silences(&self) -> &Arc<Silences> {
        &self.silences
    }

    /// Applies a configuration: rebuilds the receivers' integrations, the
    /// inhibitor, the silencer and the dispatcher, replacing the previous
    /// ones. Receivers no route references are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has no root route or a
    /// receiver's integrations cannot be built. The running pipeline is
    /// left untouched in that case.
    pub async fn set_config(&self, config: &Config) -> Result<()> {
        let am = config.alertmanager_config();
        let root = am.root()?;

        let mut integrations: HashMap<String, Vec<Arc<dyn Integration>>> = HashMap::new();
        for receiver in &am.receivers {
            if !root.references(&receiver.name) {
                warn!(org_id = %self.org_id, receiver = %receiver.name, "skipping creation of receiver not referenced by any route");
                continue;
            }
            integrations.insert(receiver.name.clone(), self.deps.integrations.build(receiver, &am.global)?);
        }
        let time_intervals: HashMap<String, Vec<TimeInterval>> = am
            .mute_time_intervals
            .iter()
            .map(|m| (m.name.clone(), m.time_intervals.clone()))
            .collect();

        let inhibitor = Inhibitor::new(am.inhibit_rules.clone(), Arc::clone(&self.alerts), Arc::clone(&self.marker));
        let silencer = Silencer::new(Arc::clone(&self.silences), Arc::clone(&self.marker));
        let mut pipeline = NotifyPipeline::new(
            inhibitor.clone(),
            silencer.clone(),
            Arc::clone(&self.muter),
            time_intervals,
            Arc::clone(&self.nflog),
            integrations,
        );
        if !self.external_url.is_empty() {
            pipeline = pipeline.with_external_url(self.external_url.as_str());
        }
        let pipeline = Arc::new(pipeline);
        let route = CompiledRoute::compile(root, &self.route_defaults);

        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            previous.dispatcher.stop().await;
        }
        let dispatcher = Dispatcher::start(
            self.org_id.clone(),
            route,
            Arc::clone(&self.deps.notification_configs),
            Arc::clone(&pipeline),
            self.alerts.subscribe(),
            self.dispatch_tick,
        );
        *self.active.lock() = Some(Arc::new(Active {
            dispatcher,
            pipeline,
            inhibitor,
            silencer,
        }));
        *self.resolve_timeout.write() = am.global.resolve_timeout;
        *self.hash.write() = config.hash().to_string();
        info!(org_id = %self.org_id, hash = %config.hash(), "applied alertmanager config");
        Ok(())
    }

    /// Validates alerts received at `now` and stores the valid ones.
    ///
    /// Returns the normalized alerts that were stored, and the joined
    /// validation errors of the rejected ones. A rejected alert never
    /// keeps the rest of the batch out.
    pub fn put_alerts(&self, alerts: Vec<PostableAlert>, now: DateTime<Utc>) -> (Vec<Alert>, Result<()>) {
        let resolve_timeout = *self.resolve_timeout.read();
        let mut valid = Vec::with_capacity(alerts.len());
        let mut errors = Vec::new();
        for alert in alerts {
            match alert.normalize(now, resolve_timeout) {
                Ok(alert) => valid.push(alert),
                Err(e) => {
                    debug!(org_id = %self.org_id, error = %e, "rejected alert");
                    errors.push(e);
                }
            }
        }
        if !valid.is_empty() {
            self.alerts.put(valid.clone());
        }
        (valid, RouterError::join(errors))
    }

    /// Lists the unresolved alerts passing the filters, with the receivers
    /// they route to and their suppression status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the receiver filter is not a valid regex.
    pub fn get_alerts(&self, params: &GettableAlertsParams) -> Result<Vec<GettableAlert>> {
        let receiver_filter = params.receiver_regex()?;
        let now = Utc::now();
        let active = self.active.lock().clone();
        let receivers = active
            .as_ref()
            .map(|a| a.dispatcher.groups().1)
            .unwrap_or_default();

        let mut out: Vec<GettableAlert> = Vec::new();
        for alert in self.alerts.list() {
            if alert.resolved_at(now) {
                continue;
            }
            let fingerprint = alert.fingerprint();
            let routed = receivers.get(&fingerprint).cloned().unwrap_or_default();
            if let Some(filter) = &receiver_filter {
                if !routed.iter().any(|r| filter.is_match(r)) {
                    continue;
                }
            }
            if let Some(active) = &active {
                active.inhibitor.mutes(&alert.labels, now);
                active.silencer.mutes(&alert.labels, now);
            }
            let status = self.marker.status(fingerprint);
            if !params.accepts(&alert.labels, &status) {
                continue;
            }
            out.push(GettableAlert::new(&alert, routed, status));
        }
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(out)
    }

    /// Sends a synthetic alert through every integration of a receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the integrations cannot be built, or the joined
    /// errors of the integrations that failed.
    pub fn test_receiver(&self, receiver: &Receiver, global: &crate::config::GlobalConfig) -> Result<()> {
        let integrations = self.deps.integrations.build(receiver, global)?;
        let now = Utc::now();
        let alert = test_alert(&receiver.name, now);
        let group_labels: LabelSet = alert.labels.clone();
        let notification = Notification::new(
            receiver.name.clone(),
            format!("{{}}/test:{}", Fingerprint::of(&group_labels)),
            group_labels,
            vec![alert],
            now,
        );
        let mut errors = Vec::new();
        for integration in integrations {
            match integration.notify(&notification) {
                Ok(result) if result.success => {
                    info!(org_id = %self.org_id, integration = %integration.name(), "test notification sent");
                }
                Ok(result) => errors.push(RouterError::internal(
                    ErrorCode::NOTIFICATION_FAILED,
                    format!("{}: {}", integration.name(), result.message.unwrap_or_default()),
                )),
                Err(e) => errors.push(e),
            }
        }
        RouterError::join(errors)
    }

    /// Sends test alerts to the receivers listed for each of them.
    ///
    /// Alerts are grouped per receiver by the labels `config` groups on
    /// and delivered through the current pipeline's integrations, without
    /// muting or deduplication and without touching the alert store.
    ///
    /// # Errors
    ///
    /// Returns `SERVER_STATE` if no configuration was applied yet, or the
    /// joined errors of invalid alerts, unknown receivers and failed
    /// integrations.
    pub fn test_alert(
        &self,
        receivers_by_alert: Vec<(PostableAlert, Vec<String>)>,
        config: &NotificationConfig,
    ) -> Result<()> {
        let Some(active) = self.active.lock().clone() else {
            return Err(RouterError::internal(
                ErrorCode::SERVER_STATE,
                format!("alertmanager for org {} has no configuration", self.org_id),
            ));
        };
        let now = Utc::now();
        let resolve_timeout = *self.resolve_timeout.read();

        let mut errors = Vec::new();
        let mut groups: BTreeMap<(String, String), (LabelSet, Vec<Alert>)> = BTreeMap::new();
        for (alert, receivers) in receivers_by_alert {
            let alert = match alert.normalize(now, resolve_timeout) {
                Ok(alert) => alert,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let group_labels = config.group_labels(&alert.labels);
            let group_key = format!("{{}}/test:{}", format_labels(&group_labels));
            for receiver in receivers {
                groups
                    .entry((receiver, group_key.clone()))
                    .or_insert_with(|| (group_labels.clone(), Vec::new()))
                    .1
                    .push(alert.clone());
            }
        }

        for ((receiver, group_key), (group_labels, alerts)) in groups {
            let flush = Flush {
                receiver: &receiver,
                group_key: &group_key,
                group_labels: &group_labels,
                repeat_interval: config.repeat_interval(&group_labels),
                mute_time_intervals: &[],
                alerts,
            };
            match active.pipeline.exec_test(flush, now) {
                Ok(()) => info!(org_id = %self.org_id, receiver = %receiver, "test alert sent"),
                Err(e) => errors.push(e),
            }
        }
        RouterError::join(errors)
    }

    /// Stops the dispatcher and maintenance loops and waits for them,
    /// persisting silences and the notification log a last time. Calling
    /// it again has no effect.
    pub async fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.dispatcher.stop().await;
        }
        self.alerts.close();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(org_id = %self.org_id, error = %e, "maintenance task failed");
            }
        }
        info!(org_id = %self.org_id, "alertmanager server stopped");
    }
}

fn test_alert(receiver: &str, now: DateTime<Utc>) -> Alert {
    let mut labels = LabelSet::new();
    labels.insert(ALERT_NAME_LABEL.to_string(), "TestAlert".to_string());
    labels.insert("receiver".to_string(), receiver.to_string());
    let mut annotations = LabelSet::new();
    annotations.insert("summary".to_string(), "Test notification".to_string());
    Alert {
        labels,
        annotations,
        starts_at: now,
        ends_at: now + TimeDelta::minutes(5),
        generator_url: String::new(),
        updated_at: now,
        timeout: false,
    }
}

fn persist(store: &dyn StateStore, org_id: &str, name: &str, snapshot: Result<String>) {
    match snapshot.and_then(|state| store.set(org_id, name, &state)) {
        Ok(bytes) => debug!(org_id, state = name, bytes, "persisted state"),
        Err(e) => error!(org_id, state = name, error = %e, "failed to persist state"),
    }
}

/// GC then persist on every tick; persist once more on shutdown.
fn maintenance<G, S>(
    org_id: String,
    name: &'static str,
    every: Duration,
    store: Arc<dyn StateStore>,
    mut shutdown: watch::Receiver<bool>,
    gc: G,
    snapshot: S,
) -> impl Future<Output = ()> + Send + 'static
where
    G: Fn(DateTime<Utc>) -> Result<usize> + Send + 'static,
    S: Fn() -> Result<String> + Send + 'static,
{
    async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    persist(store.as_ref(), &org_id, name, snapshot());
                    return;
                }
            }
            match gc(Utc::now()) {
                Ok(removed) => debug!(org_id = %org_id, state = name, removed, "maintenance gc done"),
                Err(e) => warn!(org_id = %org_id, state = name, error = %e, "maintenance gc failed"),
            }
            persist(store.as_ref(), &org_id, name, snapshot());
        }
    }
}

async fn alert_gc(
    alerts: Arc<AlertStore>,
    marker: Arc<AlertMarker>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for fingerprint in alerts.gc(Utc::now()) {
                    marker.delete(fingerprint);
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::labels::{Matcher, label_set};
    use crate::pipeline::integration::LogIntegrationFactory;
    use crate::pipeline::silence::Silence;
    use crate::receiver::{ReceiverIntegration, Secret, WebhookConfig};
    use crate::store::InMemoryStateStore;
    use crate::types::AlertState;

    fn deps(state_store: Arc<dyn StateStore>) -> ServerDeps {
        ServerDeps {
            state_store,
            integrations: Arc::new(LogIntegrationFactory::new()),
            notification_configs: Arc::new(NotificationConfigs::new()),
        }
    }

    fn settings() -> RouterSettings {
        RouterSettings {
            dispatch_tick: Duration::from_millis(10),
            ..RouterSettings::default()
        }
    }

    fn server(state_store: Arc<dyn StateStore>) -> Server {
        Server::new("org-1", &settings(), deps(state_store), Arc::new(MaintenanceExprMuter::new())).unwrap()
    }

    fn default_config() -> Config {
        Config::new_default(GlobalConfig::default(), &RouteConfig::default(), "org-1")
    }

    fn webhook_receiver(name: &str) -> Receiver {
        Receiver::new(name).with_integration(ReceiverIntegration::Webhook(WebhookConfig {
            url: Secret::new("http://hook"),
            ..WebhookConfig::default()
        }))
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn set_config_records_hash() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            assert!(server.hash().is_empty());
            let config = default_config();
            server.set_config(&config).await.unwrap();
            assert_eq!(server.hash(), config.hash());
            // reapplying swaps the dispatcher
            server.set_config(&config).await.unwrap();
            server.stop().await;
        }

        #[tokio::test]
        async fn set_config_skips_unreferenced_receivers() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            let mut config = default_config();
            // an unreferenced receiver with a broken integration is never built
            config.alertmanager_config_mut().receivers.push(
                Receiver::new("orphan").with_integration(ReceiverIntegration::Webhook(WebhookConfig::default())),
            );
            config.update_storeable_config();
            server.set_config(&config).await.unwrap();
            server.stop().await;
        }

        #[tokio::test]
        async fn stop_persists_state_and_is_idempotent() {
            let store = Arc::new(InMemoryStateStore::new());
            let server = server(Arc::clone(&store) as Arc<dyn StateStore>);
            let now = Utc::now();
            server
                .silences()
                .set(
                    Silence {
                        id: String::new(),
                        matchers: vec![Matcher::equal("service", "api").unwrap()],
                        starts_at: now,
                        ends_at: now + TimeDelta::hours(1),
                        created_by: "oncall".to_string(),
                        comment: String::new(),
                        updated_at: now,
                    },
                    now,
                )
                .unwrap();
            server.stop().await;
            server.stop().await;

            let snapshot = store.get("org-1", SILENCE_STATE).unwrap();
            assert!(snapshot.contains("service"));
            assert!(store.get("org-1", NFLOG_STATE).is_ok());

            // a new server restores the silences
            let restored = Server::new(
                "org-1",
                &settings(),
                deps(store as Arc<dyn StateStore>),
                Arc::new(MaintenanceExprMuter::new()),
            )
            .unwrap();
            assert_eq!(restored.silences().list().len(), 1);
            restored.stop().await;
        }

        #[tokio::test]
        async fn corrupt_snapshot_fails_construction() {
            let store = Arc::new(InMemoryStateStore::new());
            store.set("org-1", SILENCE_STATE, "{not json").unwrap();
            let result = Server::new(
                "org-1",
                &settings(),
                deps(store as Arc<dyn StateStore>),
                Arc::new(MaintenanceExprMuter::new()),
            );
            assert!(result.is_err());
        }
    }

    mod alert_tests {
        use super::*;

        #[tokio::test]
        async fn invalid_alerts_do_not_block_valid_ones() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            let (accepted, result) = server.put_alerts(
                vec![
                    PostableAlert::new(label_set([("alertname", "HighCPU")])),
                    PostableAlert::new(LabelSet::new()),
                    PostableAlert::new(label_set([("1bad", "x")])),
                ],
                Utc::now(),
            );
            let err = result.unwrap_err();
            assert!(matches!(err, RouterError::Multiple(ref errors) if errors.len() == 2));
            assert_eq!(accepted.len(), 1);
            assert!(accepted[0].timeout);
            let alerts = server.get_alerts(&GettableAlertsParams::default()).unwrap();
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].status.state, AlertState::Unprocessed);
            server.stop().await;
        }

        #[tokio::test]
        async fn get_alerts_reports_silenced_status_and_receivers() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            server.set_config(&default_config()).await.unwrap();
            let now = Utc::now();
            server
                .silences()
                .set(
                    Silence {
                        id: String::new(),
                        matchers: vec![Matcher::equal("service", "api").unwrap()],
                        starts_at: now,
                        ends_at: now + TimeDelta::hours(1),
                        created_by: "oncall".to_string(),
                        comment: String::new(),
                        updated_at: now,
                    },
                    now,
                )
                .unwrap();
            server
                .put_alerts(
                    vec![
                        PostableAlert::new(label_set([("alertname", "A"), ("service", "api")])),
                        PostableAlert::new(label_set([("alertname", "B"), ("service", "db")])),
                    ],
                    now,
                )
                .1
                .unwrap();

            let mut routed = Vec::new();
            for _ in 0..200 {
                routed = server.get_alerts(&GettableAlertsParams::default()).unwrap();
                if routed.iter().all(|a| !a.receivers.is_empty()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(routed.len(), 2);
            assert!(routed.iter().all(|a| a.receivers == vec!["default-receiver".to_string()]));

            let unsilenced = server
                .get_alerts(&GettableAlertsParams {
                    silenced: false,
                    ..GettableAlertsParams::default()
                })
                .unwrap();
            assert_eq!(unsilenced.len(), 1);
            assert_eq!(unsilenced[0].labels["service"], "db");

            let none = server
                .get_alerts(&GettableAlertsParams {
                    receiver: Some("other".to_string()),
                    ..GettableAlertsParams::default()
                })
                .unwrap();
            assert!(none.is_empty());
            server.stop().await;
        }
    }

    #[tokio::test]
    async fn test_receiver_validates_integrations() {
        let server = server(Arc::new(InMemoryStateStore::new()));
        server
            .test_receiver(&webhook_receiver("ops"), &GlobalConfig::default())
            .unwrap();
        let broken = Receiver::new("broken").with_integration(ReceiverIntegration::Webhook(WebhookConfig::default()));
        assert_eq!(
            server
                .test_receiver(&broken, &GlobalConfig::default())
                .unwrap_err()
                .code(),
            ErrorCode::CHANNEL_INVALID
        );
        server.stop().await;
    }

    mod test_alert_tests {
        use super::*;

        fn rule_alert() -> PostableAlert {
            PostableAlert::new(label_set([("alertname", "HighCPU"), ("ruleId", "r1"), ("host", "a")]))
        }

        #[tokio::test]
        async fn requires_applied_config() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            let err = server
                .test_alert(vec![(rule_alert(), vec!["ops".to_string()])], &NotificationConfig::default())
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::SERVER_STATE);
            server.stop().await;
        }

        #[tokio::test]
        async fn delivers_to_known_receivers_and_reports_the_rest() {
            let server = server(Arc::new(InMemoryStateStore::new()));
            let mut config = default_config();
            config.create_receiver(webhook_receiver("ops")).unwrap();
            server.set_config(&config).await.unwrap();

            server
                .test_alert(vec![(rule_alert(), vec!["ops".to_string()])], &NotificationConfig::default())
                .unwrap();

            let err = server
                .test_alert(
                    vec![
                        (rule_alert(), vec!["ops".to_string(), "pager".to_string()]),
                        (PostableAlert::new(LabelSet::new()), vec!["ops".to_string()]),
                    ],
                    &NotificationConfig::default(),
                )
                .unwrap_err();
            let RouterError::Multiple(errors) = err else {
                panic!("expected joined errors");
            };
            let codes: Vec<ErrorCode> = errors.iter().map(RouterError::code).collect();
            assert_eq!(codes, vec![ErrorCode::ALERT_INVALID, ErrorCode::CHANNEL_NOT_FOUND]);

            // test alerts stay out of the alert store
            assert!(server.get_alerts(&GettableAlertsParams::default()).unwrap().is_empty());
            server.stop().await;
        }
    }
}
