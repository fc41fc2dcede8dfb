//! Routing-tree nodes and mute time intervals.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::labels::{Matcher, RULE_ID_LABEL};

/// A node in the alert-routing tree.
///
/// An empty `receiver` inherits the parent's receiver, as do unset
/// timing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Receiver notified when this route is the deepest match.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub receiver: String,
    /// Labels used to aggregate alerts; `...` groups by all labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// All of these must match for the route to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<Matcher>,
    /// Keep evaluating siblings after this route matched.
    #[serde(default, rename = "continue", skip_serializing_if = "std::ops::Not::not")]
    pub continue_matching: bool,
    /// Initial wait before the first notification of a group.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub group_wait: Option<Duration>,
    /// Wait between notifications about new alerts in a group.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub group_interval: Option<Duration>,
    /// Wait before re-sending an unchanged notification.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub repeat_interval: Option<Duration>,
    /// Names of mute time intervals silencing this route.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mute_time_intervals: Vec<String>,
    /// Child routes, evaluated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

impl Route {
    /// Creates a route for a receiver.
    pub fn new(receiver: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            ..Self::default()
        }
    }

    /// Sets the matchers.
    #[must_use]
    pub fn with_matchers(mut self, matchers: Vec<Matcher>) -> Self {
        self.matchers = matchers;
        self
    }

    /// Sets the continue flag.
    #[must_use]
    pub fn with_continue(mut self, continue_matching: bool) -> Self {
        self.continue_matching = continue_matching;
        self
    }

    /// Returns the matcher on `name`, if any.
    #[must_use]
    pub fn matcher(&self, name: &str) -> Option<&Matcher> {
        self.matchers.iter().find(|m| m.name() == name)
    }

    /// True if this route carries an equality matcher `ruleId=<rule_id>`.
    #[must_use]
    pub fn is_rule_route(&self, rule_id: &str) -> bool {
        self.matcher(RULE_ID_LABEL)
            .is_some_and(|m| m.match_type() == crate::labels::MatchType::Equal && m.value() == rule_id)
    }

    /// Visits this route and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Route)) {
        visit(self);
        for child in &self.routes {
            child.walk(visit);
        }
    }

    /// True if this route or a descendant names `receiver`.
    #[must_use]
    pub fn references(&self, receiver: &str) -> bool {
        let mut found = false;
        self.walk(&mut |r| found |= r.receiver == receiver);
        found
    }
}

/// Minute-of-day range, `[start_minute, end_minute)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start, minutes after midnight.
    pub start_minute: u32,
    /// Exclusive end, minutes after midnight.
    pub end_minute: u32,
}

/// A recurring set of times during which a route is muted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Times of day; empty means all day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<TimeRange>,
    /// Days of week; empty means every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<Weekday>,
    /// IANA timezone the times are expressed in; UTC when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TimeInterval {
    /// Returns true if `now` falls inside the interval.
    ///
    /// An unparseable location never matches.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let tz: Tz = match self.location.as_deref() {
            None => Tz::UTC,
            Some(name) => match name.parse() {
                Ok(tz) => tz,
                Err(_) => return false,
            },
        };
        let local = now.with_timezone(&tz);
        if !self.weekdays.is_empty() && !self.weekdays.contains(&local.weekday()) {
            return false;
        }
        if self.times.is_empty() {
            return true;
        }
        let minute = local.hour() * 60 + local.minute();
        self.times
            .iter()
            .any(|t| t.start_minute <= minute && minute < t.end_minute)
    }
}

/// Named list of time intervals referenced by routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteTimeInterval {
    /// Name referenced from [`Route::mute_time_intervals`].
    pub name: String,
    /// Intervals; any one matching mutes.
    #[serde(default)]
    pub time_intervals: Vec<TimeInterval>,
}
