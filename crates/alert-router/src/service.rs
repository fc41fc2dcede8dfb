//! Multi-organization alerting service.
//!
//! [`Service`] is the entry point the rest of the platform talks to. It
//! keeps one [`Server`] per organization in sync with the configuration
//! store, forwards alerts to them, records rule state history, and owns
//! the structural edits of every organization's routing tree.
//!
//! Configuration edits follow a copy-edit-persist discipline: the stored
//! configuration is loaded, mutated locally, validated and written back
//! while the service's edit lock is held. Running servers pick the change
//! up on the next sync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock as AsyncRwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::channel::{Channel, channel_stats};
use crate::config::{Config, InhibitRule};
use crate::error::{ErrorCode, Result, RouterError};
use crate::history::{
    InMemoryStateHistoryStore, QueryRuleStateHistory, RuleState, RuleStateHistory, RuleStateHistoryContributor,
    RuleStateTimeline, RuleStateTransition, RuleStats, StateHistoryStore,
};
use crate::labels::RULE_ID_LABEL;
use crate::maintenance::{PlannedMaintenance, active_maintenance_exprs};
use crate::muter::MaintenanceExprMuter;
use crate::notification_config::{NotificationConfig, NotificationConfigs};
use crate::pipeline::integration::{IntegrationFactory, LogIntegrationFactory};
use crate::receiver::{IntegrationKind, Receiver};
use crate::routing::{ChannelRoutingStrategy, NotificationPolicy, PostableRule, RoutingStrategy, notification_policies};
use crate::server::{Server, ServerDeps};
use crate::settings::{RouterSettings, StateHistorySettings};
use crate::store::{
    ConfigStore, InMemoryConfigStore, InMemoryMaintenanceStore, InMemoryStateStore, MaintenanceStore, StateStore,
};
use crate::tracker::RuleStateTracker;
use crate::types::{GettableAlert, GettableAlertsParams, PostableAlert};

/// Storage backends used by the service.
#[derive(Clone)]
pub struct Stores {
    /// Routing configurations and channels.
    pub config: Arc<dyn ConfigStore>,
    /// Silence and notification-log snapshots.
    pub state: Arc<dyn StateStore>,
    /// Planned maintenances.
    pub maintenance: Arc<dyn MaintenanceStore>,
    /// Rule state history.
    pub state_history: Arc<dyn StateHistoryStore>,
}

impl Stores {
    /// In-memory stores for every concern.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            config: Arc::new(InMemoryConfigStore::new()),
            state: Arc::new(InMemoryStateStore::new()),
            maintenance: Arc::new(InMemoryMaintenanceStore::new()),
            state_history: Arc::new(InMemoryStateHistoryStore::new()),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// A notification policy to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostableNotificationPolicy {
    /// Matcher expression, e.g. `env="prod" & team="core"`.
    pub expression: String,
    /// Channels the policy notifies.
    pub channels: Vec<String>,
    /// Rules scoped under each channel.
    pub rules: BTreeMap<String, PostableRule>,
}

/// The multi-organization alerting service.
pub struct Service {
    settings: RouterSettings,
    stores: Stores,
    integrations: Arc<dyn IntegrationFactory>,
    routing: Arc<dyn RoutingStrategy>,
    notification_configs: Arc<NotificationConfigs>,
    tracker: RuleStateTracker,
    muters: RwLock<HashMap<String, Arc<MaintenanceExprMuter>>>,
    servers: AsyncRwLock<HashMap<String, Arc<Server>>>,
    edits: Mutex<()>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("settings", &self.settings)
            .field("tracked_series", &self.tracker.tracked_series())
            .finish_non_exhaustive()
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Service {
    /// Creates a service with log-only integrations and the channel
    /// routing strategy.
    #[must_use]
    pub fn new(settings: RouterSettings, stores: Stores) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            settings,
            stores,
            integrations: Arc::new(LogIntegrationFactory::new()),
            routing: Arc::new(ChannelRoutingStrategy::new()),
            notification_configs: Arc::new(NotificationConfigs::new()),
            tracker: RuleStateTracker::new(),
            muters: RwLock::new(HashMap::new()),
            servers: AsyncRwLock::new(HashMap::new()),
            edits: Mutex::new(()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the factory building receiver integrations.
    #[must_use]
    pub fn with_integration_factory(mut self, integrations: Arc<dyn IntegrationFactory>) -> Self {
        self.integrations = integrations;
        self
    }

    /// Replaces the routing strategy.
    #[must_use]
    pub fn with_routing_strategy(mut self, routing: Arc<dyn RoutingStrategy>) -> Self {
        self.routing = routing;
        self
    }

    /// Settings the service runs with.
    #[must_use]
    pub const fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    fn muter(&self, org_id: &str) -> Arc<MaintenanceExprMuter> {
        if let Some(muter) = self.muters.read().get(org_id) {
            return Arc::clone(muter);
        }
        Arc::clone(
            self.muters
                .write()
                .entry(org_id.to_string())
                .or_insert_with(|| Arc::new(MaintenanceExprMuter::new())),
        )
    }

    fn server_deps(&self) -> ServerDeps {
        ServerDeps {
            state_store: Arc::clone(&self.stores.state),
            integrations: Arc::clone(&self.integrations),
            notification_configs: Arc::clone(&self.notification_configs),
        }
    }

    // ============ Lifecycle ============

    /// Loads an organization's configuration with the service-wide global
    /// and route settings applied. Falls back to the default configuration
    /// when none is stored; the flag tells whether that happened.
    fn load_config(&self, org_id: &str) -> Result<(Config, bool)> {
        let (mut config, is_default) = match self.stores.config.get(org_id) {
            Ok(config) => (config, false),
            Err(e) if e.is_not_found() => (
                Config::new_default(self.settings.global.clone(), &self.settings.route, org_id),
                true,
            ),
            Err(e) => return Err(e),
        };
        config.set_global_config(self.settings.global.clone());
        config.set_route_config(&self.settings.route)?;
        Ok((config, is_default))
    }

    /// Brings every organization's server in line with its stored
    /// configuration, creating servers for new organizations. Failures are
    /// logged per organization and never abort the pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the organizations cannot be listed.
    pub async fn sync_servers(&self) -> Result<()> {
        let orgs = self.stores.config.list_orgs()?;
        let mut servers = self.servers.write().await;
        for org_id in orgs {
            let (config, is_default) = match self.load_config(&org_id) {
                Ok(loaded) => loaded,
                Err(e) => {
                    error!(org_id = %org_id, error = %e, "failed to get alertmanager config for org");
                    continue;
                }
            };

            if !servers.contains_key(&org_id) {
                let server = match Server::new(org_id.clone(), &self.settings, self.server_deps(), self.muter(&org_id)) {
                    Ok(server) => server,
                    Err(e) => {
                        error!(org_id = %org_id, error = %e, "failed to create alertmanager server");
                        continue;
                    }
                };
                if is_default {
                    if let Err(e) = self.stores.config.set(&config) {
                        error!(org_id = %org_id, error = %e, "failed to store default alertmanager config");
                    }
                }
                servers.insert(org_id.clone(), Arc::new(server));
            }

            let Some(server) = servers.get(&org_id) else {
                continue;
            };
            if server.hash() == config.hash() {
                debug!(org_id = %org_id, hash = %config.hash(), "skipping alertmanager sync for org");
                continue;
            }
            if let Err(e) = server.set_config(&config).await {
                error!(org_id = %org_id, error = %e, "failed to set config for alertmanager server");
            }
        }
        Ok(())
    }

    /// Syncs servers and refreshes maintenances once, then starts the
    /// poll, stale-sweep and maintenance-refresh loops.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial sync cannot list organizations.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.refresh_maintenance() {
            warn!(error = %e, "failed to load planned maintenances");
        }
        self.sync_servers().await?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(self).poll_loop(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(Arc::clone(self).sweep_loop(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(Arc::clone(self).maintenance_loop(self.shutdown.subscribe())));
        info!(
            poll_interval = ?self.settings.poll_interval,
            sweep_interval = ?self.settings.state_history.sweep_interval,
            "alertmanager service started"
        );
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = ticker(self.settings.poll_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_servers().await {
                        error!(error = %e, "failed to sync alertmanager servers");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = ticker(self.settings.state_history.sweep_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_state_history(Utc::now());
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = ticker(self.settings.maintenance_refresh_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_maintenance() {
                        warn!(error = %e, "failed to refresh planned maintenances");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Stops the background loops and every server, waiting for all of
    /// them. Later calls return at once.
    pub async fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "alertmanager service task failed");
            }
        }
        let servers: Vec<Arc<Server>> = self.servers.write().await.drain().map(|(_, s)| s).collect();
        for server in servers {
            server.stop().await;
        }
        info!("alertmanager service stopped");
    }

    /// Organizations with a running server.
    pub async fn orgs(&self) -> Vec<String> {
        let mut orgs: Vec<String> = self.servers.read().await.keys().cloned().collect();
        orgs.sort();
        orgs
    }

    // ============ Alerts ============

    fn server_of<'a>(servers: &'a HashMap<String, Arc<Server>>, org_id: &str) -> Result<&'a Arc<Server>> {
        servers.get(org_id).ok_or_else(|| {
            RouterError::not_found(
                ErrorCode::ALERTMANAGER_NOT_FOUND,
                format!("alertmanager not found for org {org_id}"),
            )
        })
    }

    /// Lists an organization's alerts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the organization has no server yet.
    pub async fn get_alerts(&self, org_id: &str, params: &GettableAlertsParams) -> Result<Vec<GettableAlert>> {
        let servers = self.servers.read().await;
        Self::server_of(&servers, org_id)?.get_alerts(params)
    }

    /// Hands alerts to an organization's server and records the state
    /// transitions they cause. Valid alerts are admitted even when others
    /// in the batch are rejected.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the organization has no server yet, or the
    /// joined validation errors of the rejected alerts.
    pub async fn put_alerts(&self, org_id: &str, alerts: Vec<PostableAlert>) -> Result<()> {
        let servers = self.servers.read().await;
        let server = Self::server_of(&servers, org_id)?;

        let now = Utc::now();
        let (accepted, result) = server.put_alerts(alerts, now);
        let rows = self.tracker.process_alerts(org_id, &accepted, now);
        if !rows.is_empty() {
            if let Err(e) = self.record_rule_state_history(org_id, rows) {
                error!(org_id, error = %e, "failed to record state history");
            }
        }
        result
    }

    /// Sends a test notification through a receiver.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the organization has no server yet, or the
    /// delivery errors.
    pub async fn test_receiver(&self, org_id: &str, receiver: &Receiver) -> Result<()> {
        let servers = self.servers.read().await;
        Self::server_of(&servers, org_id)?.test_receiver(receiver, &self.settings.global)
    }

    /// Sends test alerts, each to its listed receivers, grouped the way
    /// `config` groups a rule's notifications.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the organization has no server yet, or the
    /// joined delivery errors.
    pub async fn test_alert(
        &self,
        org_id: &str,
        receivers_by_alert: Vec<(PostableAlert, Vec<String>)>,
        config: &NotificationConfig,
    ) -> Result<()> {
        let servers = self.servers.read().await;
        Self::server_of(&servers, org_id)?.test_alert(receivers_by_alert, config)
    }

    // ============ State History ============

    /// Stamps rows with the organization, marks firing rows muted by an
    /// active maintenance, and writes them.
    pub fn record_rule_state_history(&self, org_id: &str, mut rows: Vec<RuleStateHistory>) -> Result<()> {
        let muter = self.muter(org_id);
        for row in &mut rows {
            row.org_id = org_id.to_string();
            if row.state != RuleState::Firing {
                continue;
            }
            let Some(mut labels) = row.label_set() else {
                continue;
            };
            labels.insert(RULE_ID_LABEL.to_string(), row.rule_id.clone());
            if muter.mutes(&labels) {
                row.state = RuleState::Muted;
            }
        }
        self.stores.state_history.write_rule_state_history(&rows)
    }

    /// Resolves series that stopped reporting and records the resulting
    /// transitions. Returns the number of rows recorded.
    pub fn sweep_state_history(&self, now: DateTime<Utc>) -> usize {
        let stale_timeout = StateHistorySettings::stale_timeout(self.settings.global.resolve_timeout);
        let mut recorded = 0;
        for (org_id, rows) in self.tracker.sweep_stale(stale_timeout, now) {
            let count = rows.len();
            match self.record_rule_state_history(&org_id, rows) {
                Ok(()) => recorded += count,
                Err(e) => error!(org_id = %org_id, error = %e, "failed to record stale state history"),
            }
        }
        if recorded > 0 {
            debug!(recorded, "recorded stale series as inactive");
        }
        recorded
    }

    /// Latest state-changing row of each series of a rule.
    pub fn last_saved_rule_state_history(&self, rule_id: &str) -> Result<Vec<RuleStateHistory>> {
        self.stores.state_history.last_saved_rule_state_history(rule_id)
    }

    /// Paginated history of a rule.
    pub fn rule_state_timeline(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<RuleStateTimeline> {
        self.stores.state_history.timeline(org_id, rule_id, params)
    }

    /// Series of a rule ranked by firing count.
    pub fn rule_state_top_contributors(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateHistoryContributor>> {
        self.stores.state_history.top_contributors(org_id, rule_id, params)
    }

    /// Overall firing and inactive periods of a rule.
    pub fn overall_state_transitions(
        &self,
        org_id: &str,
        rule_id: &str,
        params: &QueryRuleStateHistory,
    ) -> Result<Vec<RuleStateTransition>> {
        self.stores.state_history.overall_state_transitions(org_id, rule_id, params)
    }

    /// Trigger and resolution statistics for the window and the period
    /// before it.
    pub fn rule_stats(&self, org_id: &str, rule_id: &str, params: &QueryRuleStateHistory) -> Result<RuleStats> {
        let store = &self.stores.state_history;
        let past = params.previous_period();
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        Ok(RuleStats {
            total_current_triggers: store.total_triggers(org_id, rule_id, params)?,
            total_past_triggers: store.total_triggers(org_id, rule_id, &past)?,
            current_triggers_series: store.triggers_by_interval(org_id, rule_id, params)?,
            past_triggers_series: store.triggers_by_interval(org_id, rule_id, &past)?,
            current_avg_resolution_time: finite(store.avg_resolution_time(org_id, rule_id, params)?),
            past_avg_resolution_time: finite(store.avg_resolution_time(org_id, rule_id, &past)?),
            current_avg_resolution_time_series: store.avg_resolution_time_by_interval(org_id, rule_id, params)?,
            past_avg_resolution_time_series: store.avg_resolution_time_by_interval(org_id, rule_id, &past)?,
        })
    }

    // ============ Configuration ============

    /// Loads, edits, validates and stores an organization's configuration.
    fn edit_config(&self, org_id: &str, edit: impl FnOnce(&mut Config) -> Result<()>) -> Result<()> {
        let _guard = self.edits.lock();
        let mut config = self.stores.config.get(org_id)?;
        edit(&mut config)?;
        config.update_storeable_config();
        config.validate()?;
        self.stores.config.set(&config)
    }

    /// Stores a configuration.
    pub fn set_config(&self, config: &Config) -> Result<()> {
        config.validate()?;
        self.stores.config.set(config)?;
        info!(org_id = %config.org_id(), hash = %config.hash(), "stored alertmanager config");
        Ok(())
    }

    /// Returns an organization's stored configuration.
    pub fn get_config(&self, org_id: &str) -> Result<Config> {
        self.stores.config.get(org_id)
    }

    /// Replaces an organization's configuration with the default one.
    pub fn set_default_config(&self, org_id: &str) -> Result<()> {
        let config = Config::new_default(self.settings.global.clone(), &self.settings.route, org_id);
        self.set_config(&config)
    }

    /// Adds inhibition rules.
    pub fn create_inhibit_rules(&self, org_id: &str, rules: Vec<InhibitRule>) -> Result<()> {
        self.edit_config(org_id, |config| {
            config.add_inhibit_rules(rules);
            Ok(())
        })
    }

    /// Drops every inhibition rule referring to a rule.
    pub fn delete_all_inhibit_rules_by_rule_id(&self, org_id: &str, rule_id: &str) -> Result<()> {
        self.edit_config(org_id, |config| {
            config.delete_rule_id_inhibitor(rule_id);
            Ok(())
        })
    }

    // ============ Channels ============

    /// Lists an organization's channels.
    pub fn list_channels(&self, org_id: &str) -> Result<Vec<Channel>> {
        self.stores.config.list_channels(org_id)
    }

    /// Listing channels across organizations is not supported.
    pub fn list_all_channels(&self) -> Result<Vec<Channel>> {
        Err(RouterError::unsupported(
            ErrorCode::UNSUPPORTED,
            "listing channels of all organizations is not supported",
        ))
    }

    /// Returns a channel.
    pub fn get_channel_by_id(&self, org_id: &str, id: Uuid) -> Result<Channel> {
        self.stores.config.get_channel_by_id(org_id, id)
    }

    /// Creates a channel and its receiver. The configuration is stored in
    /// the same commit as the channel.
    pub fn create_channel(&self, org_id: &str, receiver: Receiver) -> Result<Channel> {
        let _guard = self.edits.lock();
        let mut config = self.stores.config.get(org_id)?;
        let channel = Channel::from_receiver(&receiver, org_id)?;
        config.create_receiver(receiver)?;
        let commit = |_: &str| self.stores.config.set(&config);
        self.stores.config.create_channel(&channel, Some(&commit))?;
        info!(org_id, channel = %channel.name, kind = %channel.kind, "created channel");
        Ok(channel)
    }

    /// Replaces a channel's receiver. The name cannot change.
    pub fn update_channel_by_receiver_and_id(&self, org_id: &str, receiver: Receiver, id: Uuid) -> Result<Channel> {
        let _guard = self.edits.lock();
        let mut channel = self.stores.config.get_channel_by_id(org_id, id)?;
        channel.update(&receiver)?;
        let mut config = self.stores.config.get(org_id)?;
        config.update_receiver(receiver)?;
        let commit = |_: &str| self.stores.config.set(&config);
        self.stores.config.update_channel(org_id, &channel, Some(&commit))?;
        info!(org_id, channel = %channel.name, "updated channel");
        Ok(channel)
    }

    /// Deletes a channel, its receiver and every route pointing at it.
    pub fn delete_channel_by_id(&self, org_id: &str, id: Uuid) -> Result<()> {
        let _guard = self.edits.lock();
        let channel = self.stores.config.get_channel_by_id(org_id, id)?;
        let mut config = self.stores.config.get(org_id)?;
        self.routing.delete_channel(&mut config, &channel.name)?;
        config.delete_receiver(&channel.name)?;
        let commit = |_: &str| self.stores.config.set(&config);
        self.stores.config.delete_channel_by_id(org_id, id, Some(&commit))?;
        info!(org_id, channel = %channel.name, "deleted channel");
        Ok(())
    }

    /// Channel counts per integration kind.
    pub fn collect(&self, org_id: &str) -> Result<BTreeMap<IntegrationKind, u64>> {
        Ok(channel_stats(&self.stores.config.list_channels(org_id)?))
    }

    // ============ Notification Configs ============

    /// Sets a rule's grouping and re-notification settings.
    pub fn set_notification_config(&self, org_id: &str, rule_id: &str, config: NotificationConfig) {
        debug!(org_id, rule_id, "set notification config");
        self.notification_configs.set(org_id, rule_id, config);
    }

    /// Returns a rule's notification settings, or the defaults.
    pub fn get_notification_config(&self, org_id: &str, rule_id: &str) -> NotificationConfig {
        self.notification_configs.get(org_id, rule_id)
    }

    /// Removes a rule's notification settings.
    pub fn delete_notification_config(&self, org_id: &str, rule_id: &str) {
        if self.notification_configs.delete(org_id, rule_id) {
            debug!(org_id, rule_id, "deleted notification config");
        }
    }

    // ============ Rule Routes & Notification Policies ============

    /// Routes a rule: a direct-rule route for its thresholds plus a scoped
    /// child under every notification policy channel.
    pub fn add_rule_routes(&self, claims: Option<&Claims>, rule_id: &str, rule: &PostableRule) -> Result<()> {
        let claims = Claims::require(claims)?;
        self.edit_config(&claims.org_id, |config| {
            self.routing.add_direct_rules(config, rule_id, rule)?;
            self.routing.add_notification_policy_rules(config, rule_id, rule)
        })?;
        info!(org_id = %claims.org_id, rule_id, by = %claims.email, "added rule routes");
        Ok(())
    }

    /// Removes every route of a rule.
    pub fn delete_rule_routes(&self, claims: Option<&Claims>, rule_id: &str) -> Result<()> {
        let claims = Claims::require(claims)?;
        self.edit_config(&claims.org_id, |config| {
            self.routing.delete_direct_rules(config, rule_id)?;
            self.routing.delete_notification_policy_rules(config, rule_id)
        })?;
        info!(org_id = %claims.org_id, rule_id, by = %claims.email, "deleted rule routes");
        Ok(())
    }

    /// Creates a notification policy with the highest priority.
    pub fn create_notification_policy(
        &self,
        claims: Option<&Claims>,
        policy: &PostableNotificationPolicy,
    ) -> Result<NotificationPolicy> {
        let claims = Claims::require(claims)?;
        let route_id = Uuid::new_v4().to_string();
        self.edit_config(&claims.org_id, |config| {
            self.routing.add_notification_policy(
                config,
                &policy.expression,
                &policy.channels,
                &policy.rules,
                &route_id,
            )
        })?;
        info!(org_id = %claims.org_id, route_id = %route_id, by = %claims.email, "created notification policy");
        self.get_notification_policy(Some(claims), &route_id)
    }

    /// Lists notification policies in priority order.
    pub fn list_notification_policies(&self, claims: Option<&Claims>) -> Result<Vec<NotificationPolicy>> {
        let claims = Claims::require(claims)?;
        let config = self.stores.config.get(&claims.org_id)?;
        Ok(notification_policies(config.alertmanager_config()))
    }

    /// Returns a notification policy.
    pub fn get_notification_policy(&self, claims: Option<&Claims>, route_id: &str) -> Result<NotificationPolicy> {
        self.list_notification_policies(claims)?
            .into_iter()
            .find(|p| p.id == route_id)
            .ok_or_else(|| {
                RouterError::not_found(
                    ErrorCode::ROUTE_NOT_FOUND,
                    format!("notification policy {route_id} not found"),
                )
            })
    }

    /// Deletes a notification policy.
    pub fn delete_notification_policy(&self, claims: Option<&Claims>, route_id: &str) -> Result<()> {
        let claims = Claims::require(claims)?;
        if route_id.is_empty() {
            return Err(RouterError::invalid_input(
                ErrorCode::ROUTE_INVALID,
                "route id cannot be empty",
            ));
        }
        self.edit_config(&claims.org_id, |config| {
            self.routing.delete_notification_policy(config, route_id)
        })?;
        info!(org_id = %claims.org_id, route_id, by = %claims.email, "deleted notification policy");
        Ok(())
    }

    // ============ Planned Maintenance ============

    /// Recomputes the active maintenance scopes of every organization.
    pub fn refresh_maintenance(&self) -> Result<()> {
        let now = Utc::now();
        let all = self.stores.maintenance.list_all()?;
        for (org_id, maintenances) in &all {
            self.muter(org_id)
                .set_active_expressions(active_maintenance_exprs(maintenances, now));
        }
        for (org_id, muter) in self.muters.read().iter() {
            if !all.contains_key(org_id) {
                muter.set_active_expressions(Vec::new());
            }
        }
        Ok(())
    }

    fn refresh_org_maintenance(&self, org_id: &str) -> Result<()> {
        let maintenances = self.stores.maintenance.list(org_id)?;
        self.muter(org_id)
            .set_active_expressions(active_maintenance_exprs(&maintenances, Utc::now()));
        Ok(())
    }

    /// Validates and stores a new maintenance, authored by the caller.
    pub fn create_maintenance(
        &self,
        claims: Option<&Claims>,
        mut maintenance: PlannedMaintenance,
    ) -> Result<PlannedMaintenance> {
        let claims = Claims::require(claims)?;
        maintenance.validate()?;
        let now = Utc::now();
        maintenance.id = Uuid::new_v4();
        maintenance.created_at = now;
        maintenance.updated_at = now;
        maintenance.created_by.clone_from(&claims.email);
        maintenance.updated_by.clone_from(&claims.email);
        self.stores.maintenance.create(&claims.org_id, &maintenance)?;
        self.refresh_org_maintenance(&claims.org_id)?;
        info!(org_id = %claims.org_id, maintenance = %maintenance.id, "created planned maintenance");
        Ok(maintenance)
    }

    /// Returns a maintenance.
    pub fn get_maintenance(&self, org_id: &str, id: Uuid) -> Result<PlannedMaintenance> {
        self.stores.maintenance.get(org_id, id)
    }

    /// Lists an organization's maintenances.
    pub fn list_maintenances(&self, org_id: &str) -> Result<Vec<PlannedMaintenance>> {
        self.stores.maintenance.list(org_id)
    }

    /// Replaces a maintenance, keeping its identity and creation record.
    pub fn update_maintenance(
        &self,
        claims: Option<&Claims>,
        id: Uuid,
        mut maintenance: PlannedMaintenance,
    ) -> Result<PlannedMaintenance> {
        let claims = Claims::require(claims)?;
        maintenance.validate()?;
        let existing = self.stores.maintenance.get(&claims.org_id, id)?;
        maintenance.id = existing.id;
        maintenance.created_at = existing.created_at;
        maintenance.created_by = existing.created_by;
        maintenance.updated_at = Utc::now();
        maintenance.updated_by.clone_from(&claims.email);
        self.stores.maintenance.update(&claims.org_id, &maintenance)?;
        self.refresh_org_maintenance(&claims.org_id)?;
        info!(org_id = %claims.org_id, maintenance = %id, "updated planned maintenance");
        Ok(maintenance)
    }

    /// Deletes a maintenance of the caller's organization.
    pub fn delete_maintenance(&self, claims: Option<&Claims>, id: Uuid) -> Result<()> {
        let claims = Claims::require(claims)?;
        self.stores.maintenance.delete(&claims.org_id, id)?;
        self.refresh_org_maintenance(&claims.org_id)?;
        info!(org_id = %claims.org_id, maintenance = %id, "deleted planned maintenance");
        Ok(())
    }
}
