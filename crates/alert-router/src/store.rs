//! Storage traits consumed by the router and their in-memory backends.
//!
//! The router persists three kinds of data: opaque per-organization state
//! snapshots (silences, notification log), the routing configuration with
//! its channels, and planned maintenances. Durable backends live outside
//! this crate; the in-memory stores here back tests and single-node use.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::{Config, StoreableConfig};
use crate::error::{ErrorCode, Result, RouterError};
use crate::maintenance::PlannedMaintenance;

/// State name of the silences snapshot.
pub const SILENCE_STATE: &str = "silence";
/// State name of the notification log snapshot.
pub const NFLOG_STATE: &str = "nflog";

/// Callback run after a store write and before it is committed.
///
/// An error from the callback rolls the write back.
pub type CommitCallback<'a> = &'a (dyn Fn(&str) -> Result<()> + Send + Sync);

/// Opaque per-organization state snapshots.
pub trait StateStore: Send + Sync {
    /// Returns the snapshot stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if nothing was stored yet.
    fn get(&self, org_id: &str, name: &str) -> Result<String>;

    /// Replaces the snapshot under `name`, returning the bytes written.
    fn set(&self, org_id: &str, name: &str, state: &str) -> Result<u64>;
}

/// Routing configuration and channel persistence.
pub trait ConfigStore: Send + Sync {
    /// Creates or replaces an organization's configuration.
    fn set(&self, config: &Config) -> Result<()>;

    /// Returns an organization's configuration.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the organization has none.
    fn get(&self, org_id: &str) -> Result<Config>;

    /// Lists every organization known to the store.
    fn list_orgs(&self) -> Result<Vec<String>>;

    /// Creates a channel.
    fn create_channel(&self, channel: &Channel, cb: Option<CommitCallback<'_>>) -> Result<()>;

    /// Returns a channel by id.
    fn get_channel_by_id(&self, org_id: &str, id: Uuid) -> Result<Channel>;

    /// Replaces a channel.
    fn update_channel(&self, org_id: &str, channel: &Channel, cb: Option<CommitCallback<'_>>) -> Result<()>;

    /// Deletes a channel by id.
    fn delete_channel_by_id(&self, org_id: &str, id: Uuid, cb: Option<CommitCallback<'_>>) -> Result<()>;

    /// Lists an organization's channels ordered by name.
    fn list_channels(&self, org_id: &str) -> Result<Vec<Channel>>;
}

/// Planned maintenance persistence.
pub trait MaintenanceStore: Send + Sync {
    /// Stores a new maintenance.
    fn create(&self, org_id: &str, maintenance: &PlannedMaintenance) -> Result<()>;

    /// Returns a maintenance by id.
    fn get(&self, org_id: &str, id: Uuid) -> Result<PlannedMaintenance>;

    /// Replaces a maintenance.
    fn update(&self, org_id: &str, maintenance: &PlannedMaintenance) -> Result<()>;

    /// Deletes a maintenance.
    fn delete(&self, org_id: &str, id: Uuid) -> Result<()>;

    /// Lists an organization's maintenances.
    fn list(&self, org_id: &str) -> Result<Vec<PlannedMaintenance>>;

    /// Lists the maintenances of every organization, keyed by organization.
    fn list_all(&self) -> Result<BTreeMap<String, Vec<PlannedMaintenance>>>;
}

fn run_callback(org_id: &str, cb: Option<CommitCallback<'_>>) -> Result<()> {
    cb.map_or(Ok(()), |cb| cb(org_id))
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, org_id: &str, name: &str) -> Result<String> {
        self.states
            .read()
            .get(&(org_id.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                RouterError::not_found(
                    ErrorCode::STATE_NOT_FOUND,
                    format!("cannot find state {name:?} for org {org_id}"),
                )
            })
    }

    fn set(&self, org_id: &str, name: &str, state: &str) -> Result<u64> {
        self.states
            .write()
            .insert((org_id.to_string(), name.to_string()), state.to_string());
        Ok(state.len() as u64)
    }
}

/// In-memory [`ConfigStore`].
///
/// Configurations are kept in their storeable form and parsed on read.
/// Commit callbacks run without any store lock held, so they may call
/// back into the store.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    orgs: RwLock<BTreeSet<String>>,
    configs: RwLock<BTreeMap<String, StoreableConfig>>,
    channels: RwLock<BTreeMap<Uuid, Channel>>,
}

impl InMemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an organization without a configuration.
    pub fn add_org(&self, org_id: &str) {
        self.orgs.write().insert(org_id.to_string());
    }

    fn channel_not_found(id: Uuid) -> RouterError {
        RouterError::not_found(ErrorCode::CHANNEL_NOT_FOUND, format!("cannot find channel with id {id}"))
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn set(&self, config: &Config) -> Result<()> {
        let mut storeable = config.storeable_config().clone();
        self.orgs.write().insert(config.org_id().to_string());
        let mut configs = self.configs.write();
        if let Some(existing) = configs.get(config.org_id()) {
            storeable.id = existing.id;
            storeable.created_at = existing.created_at;
        }
        configs.insert(config.org_id().to_string(), storeable);
        Ok(())
    }

    fn get(&self, org_id: &str) -> Result<Config> {
        let storeable = self
            .configs
            .read()
            .get(org_id)
            .cloned()
            .ok_or_else(|| {
                RouterError::not_found(
                    ErrorCode::CONFIG_NOT_FOUND,
                    format!("cannot find alertmanager config for org {org_id}"),
                )
            })?;
        Config::from_storeable(storeable)
    }

    fn list_orgs(&self) -> Result<Vec<String>> {
        Ok(self.orgs.read().iter().cloned().collect())
    }

    fn create_channel(&self, channel: &Channel, cb: Option<CommitCallback<'_>>) -> Result<()> {
        {
            let mut channels = self.channels.write();
            if channels
                .values()
                .any(|c| c.org_id == channel.org_id && c.name == channel.name)
            {
                return Err(RouterError::conflict(
                    ErrorCode::CONFIG_CONFLICT,
                    format!("channel with name {:?} already exists", channel.name),
                ));
            }
            channels.insert(channel.id, channel.clone());
        }
        if let Err(e) = run_callback(&channel.org_id, cb) {
            self.channels.write().remove(&channel.id);
            return Err(e);
        }
        Ok(())
    }

    fn get_channel_by_id(&self, org_id: &str, id: Uuid) -> Result<Channel> {
        self.channels
            .read()
            .get(&id)
            .filter(|c| c.org_id == org_id)
            .cloned()
            .ok_or_else(|| Self::channel_not_found(id))
    }

    fn update_channel(&self, org_id: &str, channel: &Channel, cb: Option<CommitCallback<'_>>) -> Result<()> {
        let previous = {
            let mut channels = self.channels.write();
            match channels.get_mut(&channel.id).filter(|c| c.org_id == org_id) {
                Some(existing) => std::mem::replace(existing, channel.clone()),
                None => return Err(Self::channel_not_found(channel.id)),
            }
        };
        if let Err(e) = run_callback(org_id, cb) {
            self.channels.write().insert(previous.id, previous);
            return Err(e);
        }
        Ok(())
    }

    fn delete_channel_by_id(&self, org_id: &str, id: Uuid, cb: Option<CommitCallback<'_>>) -> Result<()> {
        let removed = {
            let mut channels = self.channels.write();
            if !channels.get(&id).is_some_and(|c| c.org_id == org_id) {
                return Err(Self::channel_not_found(id));
            }
            channels.remove(&id)
        };
        if let Err(e) = run_callback(org_id, cb) {
            if let Some(channel) = removed {
                self.channels.write().insert(id, channel);
            }
            return Err(e);
        }
        Ok(())
    }

    fn list_channels(&self, org_id: &str) -> Result<Vec<Channel>> {
        let mut channels: Vec<_> = self
            .channels
            .read()
            .values()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }
}

/// In-memory [`MaintenanceStore`].
#[derive(Debug, Default)]
pub struct InMemoryMaintenanceStore {
    maintenances: RwLock<BTreeMap<String, BTreeMap<Uuid, PlannedMaintenance>>>,
}

impl InMemoryMaintenanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: Uuid) -> RouterError {
        RouterError::not_found(
            ErrorCode::MAINTENANCE_NOT_FOUND,
            format!("planned maintenance with id {id} not found"),
        )
    }
}

impl MaintenanceStore for InMemoryMaintenanceStore {
    fn create(&self, org_id: &str, maintenance: &PlannedMaintenance) -> Result<()> {
        let mut all = self.maintenances.write();
        let org = all.entry(org_id.to_string()).or_default();
        if org.contains_key(&maintenance.id) {
            return Err(RouterError::conflict(
                ErrorCode::CONFIG_CONFLICT,
                format!("planned maintenance with id {} already exists", maintenance.id),
            ));
        }
        org.insert(maintenance.id, maintenance.clone());
        Ok(())
    }

    fn get(&self, org_id: &str, id: Uuid) -> Result<PlannedMaintenance> {
        self.maintenances
            .read()
            .get(org_id)
            .and_then(|org| org.get(&id))
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    fn update(&self, org_id: &str, maintenance: &PlannedMaintenance) -> Result<()> {
        let mut all = self.maintenances.write();
        let existing = all
            .get_mut(org_id)
            .and_then(|org| org.get_mut(&maintenance.id))
            .ok_or_else(|| Self::not_found(maintenance.id))?;
        *existing = maintenance.clone();
        Ok(())
    }

    fn delete(&self, org_id: &str, id: Uuid) -> Result<()> {
        self.maintenances
            .write()
            .get_mut(org_id)
            .and_then(|org| org.remove(&id))
            .map(drop)
            .ok_or_else(|| Self::not_found(id))
    }

    fn list(&self, org_id: &str) -> Result<Vec<PlannedMaintenance>> {
        Ok(self
            .maintenances
            .read()
            .get(org_id)
            .map(|org| org.values().cloned().collect())
            .unwrap_or_default())
    }

    fn list_all(&self) -> Result<BTreeMap<String, Vec<PlannedMaintenance>>> {
        Ok(self
            .maintenances
            .read()
            .iter()
            .map(|(org, entries)| (org.clone(), entries.values().cloned().collect()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, RouteConfig};
    use crate::maintenance::Schedule;
    use crate::receiver::{Receiver, ReceiverIntegration, Secret, WebhookConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn default_config(org: &str) -> Config {
        Config::new_default(GlobalConfig::default(), &RouteConfig::default(), org)
    }

    fn channel(org: &str, name: &str) -> Channel {
        let receiver = Receiver::new(name).with_integration(ReceiverIntegration::Webhook(WebhookConfig {
            url: Secret::new("http://hooks.internal/alert"),
            ..WebhookConfig::default()
        }));
        Channel::from_receiver(&receiver, org).unwrap()
    }

    mod state_store_tests {
        use super::*;

        #[test]
        fn missing_state_is_not_found() {
            let store = InMemoryStateStore::new();
            assert!(store.get("org-1", SILENCE_STATE).unwrap_err().is_not_found());
        }

        #[test]
        fn set_then_get() {
            let store = InMemoryStateStore::new();
            assert_eq!(store.set("org-1", NFLOG_STATE, "[]").unwrap(), 2);
            assert_eq!(store.get("org-1", NFLOG_STATE).unwrap(), "[]");
            assert!(store.get("org-2", NFLOG_STATE).is_err());
        }
    }

    mod config_store_tests {
        use super::*;

        #[test]
        fn config_round_trips_through_storeable_form() {
            let store = InMemoryConfigStore::new();
            let config = default_config("org-1");
            store.set(&config).unwrap();
            let loaded = store.get("org-1").unwrap();
            assert_eq!(loaded.hash(), config.hash());
            assert_eq!(loaded.alertmanager_config(), config.alertmanager_config());
        }

        #[test]
        fn registered_org_without_config_is_listed_but_missing() {
            let store = InMemoryConfigStore::new();
            store.add_org("org-2");
            assert_eq!(store.list_orgs().unwrap(), vec!["org-2".to_string()]);
            assert!(store.get("org-2").unwrap_err().is_not_found());
        }

        #[test]
        fn channels_are_scoped_by_org() {
            let store = InMemoryConfigStore::new();
            let c = channel("org-1", "ops-webhook");
            store.create_channel(&c, None).unwrap();
            assert_eq!(store.get_channel_by_id("org-1", c.id).unwrap(), c);
            assert!(store.get_channel_by_id("org-2", c.id).unwrap_err().is_not_found());
            assert!(store.list_channels("org-2").unwrap().is_empty());
        }

        #[test]
        fn duplicate_channel_name_conflicts() {
            let store = InMemoryConfigStore::new();
            store.create_channel(&channel("org-1", "ops"), None).unwrap();
            let err = store.create_channel(&channel("org-1", "ops"), None).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CONFIG_CONFLICT);
        }

        #[test]
        fn callback_runs_and_may_reenter_store() {
            let store = InMemoryConfigStore::new();
            let calls = AtomicUsize::new(0);
            let config = default_config("org-1");
            let cb = |org: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(org, "org-1");
                store.set(&config)
            };
            store.create_channel(&channel("org-1", "ops"), Some(&cb)).unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(store.get("org-1").is_ok());
        }

        #[test]
        fn failing_callback_rolls_back() {
            let store = InMemoryConfigStore::new();
            let fail = |_: &str| -> Result<()> { Err(RouterError::internal(ErrorCode::INTERNAL, "boom")) };

            let c = channel("org-1", "ops");
            assert!(store.create_channel(&c, Some(&fail)).is_err());
            assert!(store.list_channels("org-1").unwrap().is_empty());

            store.create_channel(&c, None).unwrap();
            assert!(store.delete_channel_by_id("org-1", c.id, Some(&fail)).is_err());
            assert_eq!(store.list_channels("org-1").unwrap().len(), 1);

            let mut renamed = c.clone();
            renamed.data = "{}".to_string();
            assert!(store.update_channel("org-1", &renamed, Some(&fail)).is_err());
            assert_eq!(store.get_channel_by_id("org-1", c.id).unwrap().data, c.data);
        }

        #[test]
        fn delete_unknown_channel_is_not_found() {
            let store = InMemoryConfigStore::new();
            assert!(store
                .delete_channel_by_id("org-1", Uuid::new_v4(), None)
                .unwrap_err()
                .is_not_found());
        }
    }

    mod maintenance_store_tests {
        use super::*;

        fn maintenance(name: &str) -> PlannedMaintenance {
            PlannedMaintenance::new(
                name,
                Schedule {
                    timezone: "UTC".to_string(),
                    ..Schedule::default()
                },
            )
        }

        #[test]
        fn crud() {
            let store = InMemoryMaintenanceStore::new();
            let mut m = maintenance("db upgrade");
            store.create("org-1", &m).unwrap();
            assert_eq!(store.get("org-1", m.id).unwrap().name, "db upgrade");
            assert!(store.get("org-2", m.id).unwrap_err().is_not_found());

            m.description = "postgres 16".to_string();
            store.update("org-1", &m).unwrap();
            assert_eq!(store.list("org-1").unwrap()[0].description, "postgres 16");
            assert_eq!(store.list_all().unwrap().len(), 1);

            store.delete("org-1", m.id).unwrap();
            assert!(store.delete("org-1", m.id).unwrap_err().is_not_found());
            assert!(store.list("org-1").unwrap().is_empty());
        }

        #[test]
        fn duplicate_id_conflicts() {
            let store = InMemoryMaintenanceStore::new();
            let m = maintenance("a");
            store.create("org-1", &m).unwrap();
            assert_eq!(store.create("org-1", &m).unwrap_err().code(), ErrorCode::CONFIG_CONFLICT);
        }
    }
}
