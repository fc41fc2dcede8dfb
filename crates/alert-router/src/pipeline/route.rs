//! Compiled routing tree used by the dispatcher.

use std::time::Duration;

use crate::config::RouteConfig;
use crate::labels::{LabelSet, Matcher, matches_all};
use crate::route::Route;

const GROUP_BY_ALL: &str = "...";

/// Options an alert inherits from the route it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOpts {
    /// Receiver to notify.
    pub receiver: String,
    /// Grouping labels.
    pub group_by: Vec<String>,
    /// Group by every label.
    pub group_by_all: bool,
    /// Wait before the first flush of a group.
    pub group_wait: Duration,
    /// Wait between flushes.
    pub group_interval: Duration,
    /// Wait before repeating an unchanged notification.
    pub repeat_interval: Duration,
    /// Mute time intervals applying to this route.
    pub mute_time_intervals: Vec<String>,
}

impl RouteOpts {
    /// Selects the grouping labels of `labels`.
    #[must_use]
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        labels
            .iter()
            .filter(|(name, _)| self.group_by_all || self.group_by.iter().any(|g| g == *name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A routing-tree node with every option resolved.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    id: String,
    matchers: Vec<Matcher>,
    continue_matching: bool,
    opts: RouteOpts,
    routes: Vec<CompiledRoute>,
}

impl CompiledRoute {
    /// Compiles a tree. Unset options of the root come from `defaults`;
    /// every child inherits unset options from its parent.
    #[must_use]
    pub fn compile(root: &Route, defaults: &RouteConfig) -> Self {
        let base = RouteOpts {
            receiver: String::new(),
            group_by: defaults.group_by.clone(),
            group_by_all: false,
            group_wait: defaults.group_wait,
            group_interval: defaults.group_interval,
            repeat_interval: defaults.repeat_interval,
            mute_time_intervals: Vec::new(),
        };
        Self::build(root, &base, "{}".to_string())
    }

    fn build(route: &Route, parent: &RouteOpts, id: String) -> Self {
        let mut opts = parent.clone();
        if !route.receiver.is_empty() {
            opts.receiver.clone_from(&route.receiver);
        }
        if !route.group_by.is_empty() {
            opts.group_by_all = route.group_by.iter().any(|g| g == GROUP_BY_ALL);
            opts.group_by = route.group_by.iter().filter(|g| *g != GROUP_BY_ALL).cloned().collect();
        }
        opts.group_wait = route.group_wait.unwrap_or(parent.group_wait);
        opts.group_interval = route.group_interval.unwrap_or(parent.group_interval);
        opts.repeat_interval = route.repeat_interval.unwrap_or(parent.repeat_interval);
        opts.mute_time_intervals.clone_from(&route.mute_time_intervals);

        let routes = route
            .routes
            .iter()
            .enumerate()
            .map(|(idx, child)| Self::build(child, &opts, format!("{id}/{idx}")))
            .collect();
        Self {
            id,
            matchers: route.matchers.clone(),
            continue_matching: route.continue_matching,
            opts,
            routes,
        }
    }

    /// Stable identifier of this node within its tree.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved options.
    #[must_use]
    pub const fn opts(&self) -> &RouteOpts {
        &self.opts
    }

    /// Returns the deepest matching routes for a label set.
    ///
    /// Children are tried in order; a matching child without `continue`
    /// stops the search. When no child matches, the node itself matches.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> Vec<&Self> {
        if !matches_all(&self.matchers, labels) {
            return Vec::new();
        }
        let mut all = Vec::new();
        for child in &self.routes {
            let matched = child.matches(labels);
            let found = !matched.is_empty();
            all.extend(matched);
            if found && !child.continue_matching {
                break;
            }
        }
        if all.is_empty() {
            all.push(self);
        }
        all
    }

    /// Visits this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        for child in &self.routes {
            child.walk(visit);
        }
    }
}
