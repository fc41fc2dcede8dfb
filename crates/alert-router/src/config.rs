//! Per-organization notification configuration.
//!
//! [`Config`] pairs the structured [`AlertManagerConfig`] with its
//! [`StoreableConfig`] representation: the serialized blob, a content
//! hash used for change detection, and audit timestamps. Operations that
//! mutate the configuration through `Config` refresh the storeable side;
//! callers editing [`Config::alertmanager_config_mut`] directly must call
//! [`Config::update_storeable_config`] once they are done.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::{MatchType, Matcher, RULE_ID_LABEL};
use crate::receiver::{Receiver, Secret};
use crate::route::{MuteTimeInterval, Route};

/// Name of the receiver every new configuration starts with.
pub const DEFAULT_RECEIVER_NAME: &str = "default-receiver";

const RULE_ID_SEPARATOR: char = '|';
// Never equals a real rule id, so a fresh channel route matches nothing.
const NO_RULE_ID: &str = "-1";

/// Settings shared by every receiver of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Alerts without an end time resolve after this long without updates.
    #[serde(default = "default_resolve_timeout", with = "humantime_serde")]
    pub resolve_timeout: Duration,
    /// Default sender address for email integrations.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smtp_from: String,
    /// Default SMTP server for email integrations.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smtp_smarthost: String,
    /// Hostname announced to the SMTP server.
    #[serde(default = "default_smtp_hello")]
    pub smtp_hello: String,
    /// Require STARTTLS for SMTP.
    #[serde(default = "default_true")]
    pub smtp_require_tls: bool,
    /// Default Slack webhook URL.
    #[serde(default, skip_serializing_if = "Secret::is_empty")]
    pub slack_api_url: Secret,
    /// `PagerDuty` events endpoint.
    #[serde(default = "default_pagerduty_url")]
    pub pagerduty_url: String,
    /// Opsgenie API endpoint.
    #[serde(default = "default_opsgenie_url")]
    pub opsgenie_api_url: String,
}

fn default_resolve_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_smtp_hello() -> String {
    "localhost".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_pagerduty_url() -> String {
    "https://events.pagerduty.com/v2/enqueue".to_string()
}

fn default_opsgenie_url() -> String {
    "https://api.opsgenie.com/".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: default_resolve_timeout(),
            smtp_from: String::new(),
            smtp_smarthost: String::new(),
            smtp_hello: default_smtp_hello(),
            smtp_require_tls: true,
            slack_api_url: Secret::default(),
            pagerduty_url: default_pagerduty_url(),
            opsgenie_api_url: default_opsgenie_url(),
        }
    }
}

/// Grouping and timing defaults applied to the root route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Root grouping labels.
    #[serde(default = "default_group_by")]
    pub group_by: Vec<String>,
    /// Wait before the first notification of a group.
    #[serde(default = "default_group_wait", with = "humantime_serde")]
    pub group_wait: Duration,
    /// Wait between notifications about new alerts in a group.
    #[serde(default = "default_group_interval", with = "humantime_serde")]
    pub group_interval: Duration,
    /// Wait before re-sending an unchanged notification.
    #[serde(default = "default_repeat_interval", with = "humantime_serde")]
    pub repeat_interval: Duration,
}

fn default_group_by() -> Vec<String> {
    vec!["alertname".to_string()]
}

fn default_group_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_group_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_repeat_interval() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            group_by: default_group_by(),
            group_wait: default_group_wait(),
            group_interval: default_group_interval(),
            repeat_interval: default_repeat_interval(),
        }
    }
}

/// Suppresses target alerts while a matching source alert fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitRule {
    /// Matchers selecting the inhibiting alerts.
    #[serde(default)]
    pub source_matchers: Vec<Matcher>,
    /// Matchers selecting the inhibited alerts.
    #[serde(default)]
    pub target_matchers: Vec<Matcher>,
    /// Labels that must be equal on source and target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equal: Vec<String>,
}

/// The full notification configuration of one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertManagerConfig {
    /// Global settings.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Root of the routing tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    /// Named receivers.
    #[serde(default)]
    pub receivers: Vec<Receiver>,
    /// Inhibition rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inhibit_rules: Vec<InhibitRule>,
    /// Named mute time intervals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mute_time_intervals: Vec<MuteTimeInterval>,
}

impl AlertManagerConfig {
    /// Returns the root route or an invalid-input error.
    pub fn root(&self) -> Result<&Route> {
        self.route.as_ref().ok_or_else(nil_route)
    }

    /// Returns the root route mutably or an invalid-input error.
    pub fn root_mut(&mut self) -> Result<&mut Route> {
        self.route.as_mut().ok_or_else(nil_route)
    }

    /// Returns true if a receiver with this name exists.
    #[must_use]
    pub fn has_receiver(&self, name: &str) -> bool {
        self.receivers.iter().any(|r| r.name == name)
    }

    /// Adds a receiver unless one with the same name exists.
    pub fn ensure_receiver(&mut self, name: &str) {
        if !self.has_receiver(name) {
            self.receivers.push(Receiver::new(name));
        }
    }

    /// Removes the receiver with this name, returning true if one existed.
    pub fn remove_receiver(&mut self, name: &str) -> bool {
        let before = self.receivers.len();
        self.receivers.retain(|r| r.name != name);
        self.receivers.len() != before
    }

    /// Checks structural invariants.
    ///
    /// The root route must exist and name a receiver, receiver names must
    /// be unique, every route's receiver must exist, and every referenced
    /// mute time interval must be defined.
    pub fn validate(&self) -> Result<()> {
        let root = self.root()?;
        if root.receiver.is_empty() {
            return Err(invalid_config("root route must specify a default receiver"));
        }

        let mut seen = std::collections::HashSet::new();
        for receiver in &self.receivers {
            if receiver.name.is_empty() {
                return Err(invalid_config("receiver name cannot be empty"));
            }
            if !seen.insert(receiver.name.as_str()) {
                return Err(invalid_config(format!(
                    "notification config name {:?} is not unique",
                    receiver.name
                )));
            }
        }

        let mut missing = None;
        let mut missing_interval = None;
        root.walk(&mut |route| {
            if !route.receiver.is_empty() && !seen.contains(route.receiver.as_str()) && missing.is_none() {
                missing = Some(route.receiver.clone());
            }
            for name in &route.mute_time_intervals {
                if missing_interval.is_none() && !self.mute_time_intervals.iter().any(|m| &m.name == name) {
                    missing_interval = Some(name.clone());
                }
            }
        });
        if let Some(name) = missing {
            return Err(invalid_config(format!("undefined receiver {name:?} used in route")));
        }
        if let Some(name) = missing_interval {
            return Err(invalid_config(format!("undefined mute time interval {name:?} used in route")));
        }
        Ok(())
    }
}

fn nil_route() -> RouterError {
    RouterError::invalid_input(ErrorCode::CONFIG_INVALID, "route is nil")
}

fn invalid_config(message: impl Into<String>) -> RouterError {
    RouterError::invalid_input(ErrorCode::CONFIG_INVALID, message)
}

/// The persisted representation of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreableConfig {
    /// Row identifier.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Serialized [`AlertManagerConfig`].
    pub config: String,
    /// Content hash of `config`.
    pub hash: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// An organization's configuration together with its storeable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    alertmanager_config: AlertManagerConfig,
    storeable: StoreableConfig,
}

impl Config {
    /// Wraps a configuration for an organization.
    pub fn new(alertmanager_config: AlertManagerConfig, org_id: impl Into<String>) -> Self {
        let raw = raw_from_config(&alertmanager_config);
        let now = Utc::now();
        Self {
            storeable: StoreableConfig {
                id: Uuid::new_v4(),
                org_id: org_id.into(),
                hash: config_hash(&raw),
                config: raw,
                created_at: now,
                updated_at: now,
            },
            alertmanager_config,
        }
    }

    /// Builds the configuration every organization starts with: a root
    /// route to `default-receiver` and that receiver alone.
    pub fn new_default(global: GlobalConfig, route: &RouteConfig, org_id: impl Into<String>) -> Self {
        let mut root = Route::new(DEFAULT_RECEIVER_NAME);
        apply_route_config(&mut root, route);
        Self::new(
            AlertManagerConfig {
                global,
                route: Some(root),
                receivers: vec![Receiver::new(DEFAULT_RECEIVER_NAME)],
                ..AlertManagerConfig::default()
            },
            org_id,
        )
    }

    /// Parses a stored configuration.
    pub fn from_storeable(storeable: StoreableConfig) -> Result<Self> {
        let alertmanager_config: AlertManagerConfig = serde_json::from_str(&storeable.config)?;
        Ok(Self {
            alertmanager_config,
            storeable,
        })
    }

    /// A fresh default configuration carrying over the global settings and
    /// root route timings but none of the receivers or child routes.
    pub fn copy_with_reset(&self) -> Result<Self> {
        let root = self.alertmanager_config.root()?;
        let defaults = RouteConfig::default();
        let route = RouteConfig {
            group_by: root.group_by.clone(),
            group_wait: root.group_wait.unwrap_or(defaults.group_wait),
            group_interval: root.group_interval.unwrap_or(defaults.group_interval),
            repeat_interval: root.repeat_interval.unwrap_or(defaults.repeat_interval),
        };
        Ok(Self::new_default(
            self.alertmanager_config.global.clone(),
            &route,
            self.storeable.org_id.clone(),
        ))
    }

    /// The structured configuration.
    #[must_use]
    pub fn alertmanager_config(&self) -> &AlertManagerConfig {
        &self.alertmanager_config
    }

    /// Mutable access for structural edits; call
    /// [`Config::update_storeable_config`] afterwards.
    pub fn alertmanager_config_mut(&mut self) -> &mut AlertManagerConfig {
        &mut self.alertmanager_config
    }

    /// The persisted representation.
    #[must_use]
    pub fn storeable_config(&self) -> &StoreableConfig {
        &self.storeable
    }

    /// Owning organization.
    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.storeable.org_id
    }

    /// Content hash of the serialized configuration.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.storeable.hash
    }

    /// Re-serializes the configuration and refreshes hash and update time.
    pub fn update_storeable_config(&mut self) {
        self.storeable.config = raw_from_config(&self.alertmanager_config);
        self.storeable.hash = config_hash(&self.storeable.config);
        self.storeable.updated_at = Utc::now();
    }

    /// Replaces the global settings.
    pub fn set_global_config(&mut self, global: GlobalConfig) {
        self.alertmanager_config.global = global;
        self.update_storeable_config();
    }

    /// Applies grouping and timing defaults to the root route, keeping its
    /// receiver and children.
    pub fn set_route_config(&mut self, route: &RouteConfig) -> Result<()> {
        apply_route_config(self.alertmanager_config.root_mut()?, route);
        self.update_storeable_config();
        Ok(())
    }

    /// Appends inhibition rules.
    pub fn add_inhibit_rules(&mut self, rules: Vec<InhibitRule>) {
        self.alertmanager_config.inhibit_rules.extend(rules);
        self.update_storeable_config();
    }

    /// Adds a receiver and a top-level route for it.
    ///
    /// The route starts with a `ruleId=~"-1"` matcher so it receives
    /// nothing until rules are attached with
    /// [`Config::create_rule_id_matcher`].
    pub fn create_receiver(&mut self, receiver: Receiver) -> Result<()> {
        if receiver.name.is_empty() {
            return Err(RouterError::invalid_input(
                ErrorCode::CHANNEL_INVALID,
                "receiver name cannot be empty",
            ));
        }
        if self.alertmanager_config.has_receiver(&receiver.name) {
            return Err(RouterError::conflict(
                ErrorCode::CONFIG_CONFLICT,
                "the receiver name has to be unique, please choose a different name",
            ));
        }
        let route = Route::new(receiver.name.clone())
            .with_continue(true)
            .with_matchers(vec![Matcher::new(MatchType::Regexp, RULE_ID_LABEL, NO_RULE_ID)?]);
        self.alertmanager_config.root_mut()?.routes.push(route);
        self.alertmanager_config.receivers.push(receiver);
        self.update_storeable_config();
        Ok(())
    }

    /// Looks up a receiver by name.
    pub fn get_receiver(&self, name: &str) -> Result<&Receiver> {
        self.alertmanager_config
            .receivers
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                RouterError::not_found(
                    ErrorCode::CHANNEL_NOT_FOUND,
                    format!("channel with name {name:?} not found"),
                )
            })
    }

    /// Replaces the receiver of the same name.
    pub fn update_receiver(&mut self, receiver: Receiver) -> Result<()> {
        let slot = self
            .alertmanager_config
            .receivers
            .iter_mut()
            .find(|r| r.name == receiver.name)
            .ok_or_else(|| {
                RouterError::not_found(
                    ErrorCode::CHANNEL_NOT_FOUND,
                    format!("channel with name {:?} not found", receiver.name),
                )
            })?;
        *slot = receiver;
        self.update_storeable_config();
        Ok(())
    }

    /// Removes a receiver and the first top-level route pointing at it.
    pub fn delete_receiver(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(invalid_config("delete receiver requires the receiver name"));
        }
        if let Some(root) = self.alertmanager_config.route.as_mut() {
            if let Some(idx) = root.routes.iter().position(|r| r.receiver == name) {
                root.routes.remove(idx);
            }
        }
        self.alertmanager_config.remove_receiver(name);
        self.update_storeable_config();
        Ok(())
    }

    /// Adds `rule_id` to the `ruleId=~` matcher of each top-level route
    /// whose receiver is listed.
    pub fn create_rule_id_matcher(&mut self, rule_id: &str, receiver_names: &[String]) -> Result<()> {
        let root = self.alertmanager_config.root_mut()?;
        for route in &mut root.routes {
            if receiver_names.contains(&route.receiver) {
                add_rule_id_to_route(route, rule_id)?;
            }
        }
        self.update_storeable_config();
        Ok(())
    }

    /// Removes `rule_id` from every top-level route's `ruleId=~` matcher.
    pub fn delete_rule_id_matcher(&mut self, rule_id: &str) -> Result<()> {
        let root = self.alertmanager_config.root_mut()?;
        for route in &mut root.routes {
            remove_rule_id_from_route(route, rule_id)?;
        }
        self.update_storeable_config();
        Ok(())
    }

    /// Re-points `rule_id` at exactly the listed receivers.
    pub fn update_rule_id_matcher(&mut self, rule_id: &str, receiver_names: &[String]) -> Result<()> {
        self.delete_rule_id_matcher(rule_id)?;
        self.create_rule_id_matcher(rule_id, receiver_names)
    }

    /// Receivers of the top-level routes whose `ruleId` matcher accepts `rule_id`.
    #[must_use]
    pub fn receiver_names_from_rule_id(&self, rule_id: &str) -> Vec<String> {
        let Some(root) = self.alertmanager_config.route.as_ref() else {
            return Vec::new();
        };
        root.routes
            .iter()
            .filter(|r| matchers_contain_rule_id(&r.matchers, rule_id))
            .map(|r| r.receiver.clone())
            .collect()
    }

    /// Drops every inhibition rule whose source or target matchers accept `rule_id`.
    pub fn delete_rule_id_inhibitor(&mut self, rule_id: &str) {
        self.alertmanager_config.inhibit_rules.retain(|rule| {
            !matchers_contain_rule_id(&rule.source_matchers, rule_id)
                && !matchers_contain_rule_id(&rule.target_matchers, rule_id)
        });
        self.update_storeable_config();
    }

    /// Checks structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.alertmanager_config.validate()
    }
}

fn apply_route_config(route: &mut Route, config: &RouteConfig) {
    route.group_by.clone_from(&config.group_by);
    route.group_wait = Some(config.group_wait);
    route.group_interval = Some(config.group_interval);
    route.repeat_interval = Some(config.repeat_interval);
}

fn raw_from_config(config: &AlertManagerConfig) -> String {
    serde_json::to_string(config).unwrap_or_else(|e| format!("<error creating config string: {e}>"))
}

fn config_hash(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

fn add_rule_id_to_route(route: &mut Route, rule_id: &str) -> Result<()> {
    let Some(idx) = route.matchers.iter().position(|m| m.name() == RULE_ID_LABEL) else {
        route
            .matchers
            .push(Matcher::new(MatchType::Regexp, RULE_ID_LABEL, rule_id)?);
        return Ok(());
    };
    let mut ids: Vec<&str> = route.matchers[idx].value().split(RULE_ID_SEPARATOR).collect();
    if ids.contains(&rule_id) {
        return Ok(());
    }
    ids.push(rule_id);
    let joined = ids.join("|");
    route.matchers[idx] = Matcher::new(MatchType::Regexp, RULE_ID_LABEL, joined)?;
    Ok(())
}

fn remove_rule_id_from_route(route: &mut Route, rule_id: &str) -> Result<()> {
    let Some(idx) = route.matchers.iter().position(|m| m.name() == RULE_ID_LABEL) else {
        return Ok(());
    };
    let ids: Vec<&str> = route.matchers[idx].value().split(RULE_ID_SEPARATOR).collect();
    if !ids.contains(&rule_id) {
        return Ok(());
    }
    let remaining: Vec<&str> = ids.into_iter().filter(|id| *id != rule_id).collect();
    if remaining.is_empty() {
        route.matchers.remove(idx);
        return Ok(());
    }
    let joined = remaining.join("|");
    route.matchers[idx] = Matcher::new(MatchType::Regexp, RULE_ID_LABEL, joined)?;
    Ok(())
}

fn matchers_contain_rule_id(matchers: &[Matcher], rule_id: &str) -> bool {
    matchers
        .iter()
        .any(|m| m.name() == RULE_ID_LABEL && m.matches(rule_id))
}
