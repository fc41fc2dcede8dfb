//! Multi-tenant alert notification routing.
//!
//! `alert-router` receives fired and resolved alerts per organization,
//! groups and deduplicates them, applies silences, inhibition rules and
//! planned maintenance windows, and hands the resulting notifications to
//! receiver integrations. Alongside delivery it records every rule state
//! transition for analytics.
//!
//! # Features
//!
//! - **Routing trees**: direct rule routes, notification policies and
//!   channel routes edited structurally through a [`RoutingStrategy`]
//! - **Per-organization servers**: dispatcher, inhibitor, silences and
//!   notification log rebuilt on every configuration change
//! - **Planned maintenance**: fixed and recurring windows muting alerts by
//!   rule and label expression
//! - **State history**: firing/inactive transitions per series with an
//!   aggregate state per rule
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use alert_router::config::{Config, GlobalConfig, RouteConfig};
//! use alert_router::receiver::{Receiver, ReceiverIntegration, Secret, WebhookConfig};
//! use alert_router::routing::{ChannelRoutingStrategy, PostableRule, RoutingStrategy};
//!
//! let mut config = Config::new_default(GlobalConfig::default(), &RouteConfig::default(), "org-1");
//!
//! // A channel: a named receiver with one integration
//! config.create_receiver(Receiver::new("ops").with_integration(ReceiverIntegration::Webhook(
//!     WebhookConfig {
//!         url: Secret::new("https://hooks.example.com/ops"),
//!         ..WebhookConfig::default()
//!     },
//! )))?;
//!
//! // Route critical alerts of rule-1 to it
//! let rule = PostableRule {
//!     thresholds: BTreeMap::from([("critical".to_string(), vec!["ops".to_string()])]),
//!     ..PostableRule::default()
//! };
//! ChannelRoutingStrategy::new().add_direct_rules(&mut config, "rule-1", &rule)?;
//! config.update_storeable_config();
//! config.validate()?;
//! # Ok::<(), alert_router::RouterError>(())
//! ```
//!
//! # Maintenance muting
//!
//! ```rust
//! use alert_router::labels::label_set;
//! use alert_router::muter::{ActiveMaintenanceExpr, MaintenanceExprMuter};
//!
//! let muter = MaintenanceExprMuter::new();
//! muter.set_active_expressions(vec![ActiveMaintenanceExpr {
//!     rule_ids: vec!["r1".to_string()],
//!     expression: r#"severity == "critical""#.to_string(),
//! }]);
//!
//! assert!(muter.mutes(&label_set([("ruleId", "r1"), ("severity", "critical")])));
//! assert!(!muter.mutes(&label_set([("ruleId", "r1"), ("severity", "warning")])));
//! assert!(!muter.mutes(&label_set([("ruleId", "r2"), ("severity", "critical")])));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod labels;
pub mod maintenance;
pub mod muter;
pub mod notification_config;
pub mod pipeline;
pub mod receiver;
pub mod route;
pub mod routing;
pub mod server;
pub mod service;
pub mod settings;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export main types at crate root
pub use auth::Claims;
pub use channel::Channel;
pub use config::{AlertManagerConfig, Config, GlobalConfig, InhibitRule, RouteConfig};
pub use error::{ErrorCode, ErrorKind, Result, RouterError};
pub use history::{RuleState, RuleStateHistory, StateHistoryStore};
pub use labels::{Fingerprint, LabelSet, Matcher};
pub use maintenance::{PlannedMaintenance, Schedule};
pub use muter::MaintenanceExprMuter;
pub use notification_config::NotificationConfig;
pub use receiver::{IntegrationKind, Receiver, ReceiverIntegration};
pub use route::Route;
pub use routing::{ChannelRoutingStrategy, PostableRule, RoutingStrategy};
pub use server::Server;
pub use service::{PostableNotificationPolicy, Service, Stores};
pub use settings::RouterSettings;
pub use store::{ConfigStore, MaintenanceStore, StateStore};
pub use tracker::RuleStateTracker;
pub use types::{Alert, GettableAlert, GettableAlertsParams, PostableAlert};
