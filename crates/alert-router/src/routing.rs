//! Structural edits of the routing tree.
//!
//! The tree the [`ChannelRoutingStrategy`] maintains under the root route
//! has three kinds of top-level children, told apart by their receiver:
//!
//! ```text
//! root (default-receiver)
//! ├── default-notification-policy_<routeID>   policy matchers + notification_policy="true"
//! │   └── <channel>                            continue
//! │       └── <channel>  ruleId="<rule>"       per-rule grouping / repeat interval
//! ├── <channel>  ruleId=~"-1|..."              catch-all channel routes
//! └── default-rule-receiver                    direct-rule section
//!     └── default-rule-receiver_<rule>  ruleId="<rule>", notification_policy="false"
//!         └── <channel>  threshold.name="<tier>"
//! ```
//!
//! New policies are inserted first so they take priority; the direct-rule
//! section is appended once and removed again when its last rule goes.
//! None of the operations refresh the storeable form of the config; the
//! caller does that once the logical change is complete and persists it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AlertManagerConfig, Config};
use crate::error::{ErrorCode, Result, RouterError};
use crate::labels::{Matcher, NOTIFICATION_POLICY_LABEL, RULE_ID_LABEL, THRESHOLD_LABEL};
use crate::route::Route;

/// Receiver of the section holding direct-rule routes.
pub const DEFAULT_RULE_RECEIVER: &str = "default-rule-receiver";
/// Receiver-name prefix of notification-policy routes.
pub const NOTIFICATION_POLICY_RECEIVER: &str = "default-notification-policy";

/// Synthetic receiver name of a direct-rule route.
#[must_use]
pub fn rule_receiver_name(rule_id: &str) -> String {
    format!("{DEFAULT_RULE_RECEIVER}_{rule_id}")
}

/// Synthetic receiver name of a notification-policy route.
#[must_use]
pub fn policy_receiver_name(route_id: &str) -> String {
    format!("{NOTIFICATION_POLICY_RECEIVER}_{route_id}")
}

fn is_policy_route(route: &Route) -> bool {
    route
        .receiver
        .strip_prefix(NOTIFICATION_POLICY_RECEIVER)
        .is_some_and(|rest| rest.starts_with('_'))
}

fn is_rule_section(route: &Route) -> bool {
    route.receiver == DEFAULT_RULE_RECEIVER
}

/// Notification settings of an alert rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostableRule {
    /// Threshold tier name to the channels it notifies.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Grouping labels for this rule's notifications.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Repeat interval for unchanged notifications.
    #[serde(default, with = "humantime_serde")]
    pub renotify: Duration,
}

impl PostableRule {
    fn repeat_interval(&self) -> Option<Duration> {
        (!self.renotify.is_zero()).then_some(self.renotify)
    }
}

/// Mutates a configuration's routing tree in place.
///
/// Implementations validate before touching the tree, so a failed call
/// leaves the configuration unchanged.
pub trait RoutingStrategy: Send + Sync {
    /// Adds a direct-rule route with one child per threshold receiver.
    fn add_direct_rules(&self, config: &mut Config, rule_id: &str, rule: &PostableRule) -> Result<()>;

    /// Adds a rule-scoped child under every channel of every policy.
    fn add_notification_policy_rules(&self, config: &mut Config, rule_id: &str, rule: &PostableRule) -> Result<()>;

    /// Inserts a new highest-priority notification policy.
    fn add_notification_policy(
        &self,
        config: &mut Config,
        policy_matchers: &str,
        receivers: &[String],
        rules: &BTreeMap<String, PostableRule>,
        route_id: &str,
    ) -> Result<()>;

    /// Adds a channel route under every notification policy.
    fn add_channel(&self, config: &mut Config, channel_name: &str) -> Result<()>;

    /// Removes a rule's direct route and synthetic receiver.
    fn delete_direct_rules(&self, config: &mut Config, rule_id: &str) -> Result<()>;

    /// Removes a rule's children from every policy channel.
    fn delete_notification_policy_rules(&self, config: &mut Config, rule_id: &str) -> Result<()>;

    /// Removes a notification policy and its receiver. An empty id is a no-op.
    fn delete_notification_policy(&self, config: &mut Config, route_id: &str) -> Result<()>;

    /// Removes a channel from all routes below the root and drops policies
    /// left without channels.
    fn delete_channel(&self, config: &mut Config, channel_name: &str) -> Result<()>;
}

/// The routing strategy used for every organization.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelRoutingStrategy;

impl ChannelRoutingStrategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn invalid(message: impl Into<String>) -> RouterError {
    RouterError::invalid_input(ErrorCode::ROUTE_INVALID, message)
}

fn require_rule_id(rule_id: &str) -> Result<()> {
    if rule_id.is_empty() {
        return Err(invalid("rule id cannot be empty"));
    }
    Ok(())
}

fn rule_specific_route(receiver: &str, rule_id: &str, rule: &PostableRule) -> Result<Route> {
    Ok(Route {
        receiver: receiver.to_string(),
        matchers: vec![Matcher::equal(RULE_ID_LABEL, rule_id)?],
        continue_matching: true,
        group_by: rule.group_by.clone(),
        repeat_interval: rule.repeat_interval(),
        ..Route::default()
    })
}

fn direct_rule_route(rule_id: &str, rule: &PostableRule) -> Result<Route> {
    let mut route = Route::new(rule_receiver_name(rule_id))
        .with_continue(true)
        .with_matchers(vec![
            Matcher::equal(RULE_ID_LABEL, rule_id)?,
            Matcher::equal(NOTIFICATION_POLICY_LABEL, "false")?,
        ]);
    for (threshold, receivers) in &rule.thresholds {
        let matcher = Matcher::equal(THRESHOLD_LABEL, threshold.as_str())?;
        for receiver in receivers {
            route.routes.push(Route {
                receiver: receiver.clone(),
                matchers: vec![matcher.clone()],
                continue_matching: false,
                group_by: rule.group_by.clone(),
                repeat_interval: rule.repeat_interval(),
                ..Route::default()
            });
        }
    }
    Ok(route)
}

/// Splits a policy expression such as `env="prod" & (team="core")` into
/// matchers. Both `&` and `|` separate terms.
pub fn parse_policy_matchers(expression: &str) -> Result<Vec<Matcher>> {
    expression
        .split(['&', '|'])
        .map(|part| part.trim().trim_matches(|c| c == '(' || c == ')').trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            Matcher::parse(part).map_err(|e| invalid(format!("invalid matcher {part}: {e}")))
        })
        .collect()
}

fn remove_rule_section_routes(am: &mut AlertManagerConfig, rule_id: &str) -> Result<()> {
    let rule_receiver = rule_receiver_name(rule_id);
    let root = am.root_mut()?;
    let mut section_emptied = false;
    if let Some(section) = root.routes.iter_mut().find(|r| is_rule_section(r)) {
        section
            .routes
            .retain(|r| !(r.receiver == rule_receiver && r.is_rule_route(rule_id)));
        section_emptied = section.routes.is_empty();
    }
    if section_emptied {
        root.routes.retain(|r| !is_rule_section(r));
    }
    let section_referenced = root.references(DEFAULT_RULE_RECEIVER);
    am.remove_receiver(&rule_receiver);
    if section_emptied && !section_referenced {
        am.remove_receiver(DEFAULT_RULE_RECEIVER);
    }
    Ok(())
}

fn remove_receiver_below(routes: &mut Vec<Route>, receiver: &str) {
    routes.retain(|r| r.receiver != receiver);
    for route in routes {
        remove_receiver_below(&mut route.routes, receiver);
    }
}

impl RoutingStrategy for ChannelRoutingStrategy {
    fn add_direct_rules(&self, config: &mut Config, rule_id: &str, rule: &PostableRule) -> Result<()> {
        config.alertmanager_config().root()?;
        require_rule_id(rule_id)?;
        let route = direct_rule_route(rule_id, rule)?;

        let am = config.alertmanager_config_mut();
        // re-adding a rule replaces its previous route
        remove_rule_section_routes(am, rule_id)?;

        let root = am.root_mut()?;
        let idx = if let Some(idx) = root.routes.iter().position(is_rule_section) {
            idx
        } else {
            root.routes
                .push(Route::new(DEFAULT_RULE_RECEIVER).with_continue(true));
            root.routes.len() - 1
        };
        root.routes[idx].routes.push(route);
        am.ensure_receiver(DEFAULT_RULE_RECEIVER);
        am.ensure_receiver(&rule_receiver_name(rule_id));

        debug!(rule_id, thresholds = rule.thresholds.len(), "added direct rule route");
        Ok(())
    }

    fn add_notification_policy_rules(&self, config: &mut Config, rule_id: &str, rule: &PostableRule) -> Result<()> {
        require_rule_id(rule_id)?;
        let root = config.alertmanager_config_mut().root_mut()?;
        for policy in root.routes.iter_mut().filter(|r| is_policy_route(r)) {
            for channel in &mut policy.routes {
                if channel.routes.iter().any(|r| r.is_rule_route(rule_id)) {
                    continue;
                }
                let route = rule_specific_route(&channel.receiver, rule_id, rule)?;
                channel.routes.push(route);
            }
        }
        Ok(())
    }

    fn add_notification_policy(
        &self,
        config: &mut Config,
        policy_matchers: &str,
        receivers: &[String],
        rules: &BTreeMap<String, PostableRule>,
        route_id: &str,
    ) -> Result<()> {
        config.alertmanager_config().root()?;
        if receivers.is_empty() {
            return Err(invalid("no receivers found in route"));
        }
        if rules.is_empty() {
            return Err(invalid("no rule ids found in route"));
        }
        if route_id.is_empty() {
            return Err(invalid("notification policy id cannot be empty"));
        }
        let receiver_name = policy_receiver_name(route_id);
        if config.alertmanager_config().has_receiver(&receiver_name) {
            return Err(RouterError::conflict(
                ErrorCode::CONFIG_CONFLICT,
                format!("notification policy {route_id} already exists"),
            ));
        }

        let mut matchers = parse_policy_matchers(policy_matchers)?;
        matchers.push(Matcher::equal(NOTIFICATION_POLICY_LABEL, "true")?);

        let mut policy = Route::new(receiver_name.clone())
            .with_continue(true)
            .with_matchers(matchers);
        for receiver in receivers {
            let mut channel = Route::new(receiver.clone()).with_continue(true);
            for (rule_id, rule) in rules {
                channel.routes.push(rule_specific_route(receiver, rule_id, rule)?);
            }
            policy.routes.push(channel);
        }

        let am = config.alertmanager_config_mut();
        am.root_mut()?.routes.insert(0, policy);
        am.ensure_receiver(&receiver_name);
        debug!(route_id, channels = receivers.len(), rules = rules.len(), "added notification policy");
        Ok(())
    }

    fn add_channel(&self, config: &mut Config, channel_name: &str) -> Result<()> {
        config.alertmanager_config().root()?;
        if channel_name.is_empty() {
            return Err(invalid("channel name cannot be empty"));
        }
        let root = config.alertmanager_config_mut().root_mut()?;
        let mut policies = root.routes.iter_mut().filter(|r| is_policy_route(r)).peekable();
        if policies.peek().is_none() {
            return Err(invalid("config has no notification policy routes"));
        }
        for policy in policies {
            policy
                .routes
                .push(Route::new(channel_name).with_continue(true));
        }
        Ok(())
    }

    fn delete_direct_rules(&self, config: &mut Config, rule_id: &str) -> Result<()> {
        require_rule_id(rule_id)?;
        remove_rule_section_routes(config.alertmanager_config_mut(), rule_id)?;
        debug!(rule_id, "deleted direct rule route");
        Ok(())
    }

    fn delete_notification_policy_rules(&self, config: &mut Config, rule_id: &str) -> Result<()> {
        require_rule_id(rule_id)?;
        let root = config.alertmanager_config_mut().root_mut()?;
        for policy in root.routes.iter_mut().filter(|r| is_policy_route(r)) {
            for channel in &mut policy.routes {
                channel.routes.retain(|r| !r.is_rule_route(rule_id));
            }
        }
        Ok(())
    }

    fn delete_notification_policy(&self, config: &mut Config, route_id: &str) -> Result<()> {
        if route_id.is_empty() {
            return Ok(());
        }
        let receiver_name = policy_receiver_name(route_id);
        let am = config.alertmanager_config_mut();
        am.root_mut()?.routes.retain(|r| r.receiver != receiver_name);
        am.remove_receiver(&receiver_name);
        debug!(route_id, "deleted notification policy");
        Ok(())
    }

    fn delete_channel(&self, config: &mut Config, channel_name: &str) -> Result<()> {
        if channel_name.is_empty() {
            return Err(invalid("channel name cannot be empty"));
        }
        let root = config.alertmanager_config_mut().root_mut()?;
        for route in &mut root.routes {
            remove_receiver_below(&mut route.routes, channel_name);
        }
        root.routes
            .retain(|r| !(is_policy_route(r) && r.routes.is_empty()));
        Ok(())
    }
}

/// A notification policy as read back from the routing tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    /// Policy route id.
    pub id: String,
    /// Policy matchers, without the system `notification_policy` marker.
    pub matchers: Vec<Matcher>,
    /// Channels notified by the policy.
    pub channels: Vec<String>,
    /// Rules scoped under the policy's channels.
    pub rule_ids: Vec<String>,
}

/// Lists the notification policies present in a configuration, in priority order.
#[must_use]
pub fn notification_policies(config: &AlertManagerConfig) -> Vec<NotificationPolicy> {
    let Some(root) = config.route.as_ref() else {
        return Vec::new();
    };
    let prefix = format!("{NOTIFICATION_POLICY_RECEIVER}_");
    root.routes
        .iter()
        .filter(|r| is_policy_route(r))
        .map(|policy| {
            let mut rule_ids: Vec<String> = policy
                .routes
                .iter()
                .flat_map(|c| c.routes.iter())
                .filter_map(|r| r.matcher(RULE_ID_LABEL).map(|m| m.value().to_string()))
                .collect();
            rule_ids.sort();
            rule_ids.dedup();
            NotificationPolicy {
                id: policy.receiver.trim_start_matches(prefix.as_str()).to_string(),
                matchers: policy
                    .matchers
                    .iter()
                    .filter(|m| m.name() != NOTIFICATION_POLICY_LABEL)
                    .cloned()
                    .collect(),
                channels: policy.routes.iter().map(|c| c.receiver.clone()).collect(),
                rule_ids,
            }
        })
        .collect()
}
