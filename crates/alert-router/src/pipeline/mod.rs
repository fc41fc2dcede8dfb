//! Minimal alert notification pipeline: routing, grouping, suppression,
//! deduplication and delivery.

pub mod alerts;
pub mod dispatch;
pub mod inhibit;
pub mod integration;
pub mod nflog;
pub mod notify;
pub mod route;
pub mod silence;

pub use alerts::{AlertStore, AlertSubscription};
pub use dispatch::{AlertGroup, Dispatcher};
pub use inhibit::Inhibitor;
pub use integration::{
    Integration, IntegrationFactory, LogIntegration, LogIntegrationFactory, Notification, NotificationResult,
    NotificationStatus,
};
pub use nflog::NotificationLog;
pub use notify::NotifyPipeline;
pub use route::{CompiledRoute, RouteOpts};
pub use silence::{Silence, SilenceState, Silencer, Silences};
