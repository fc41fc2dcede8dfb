//! Planned maintenance windows.
//!
//! A window is either fixed (absolute start and end) or recurring (a
//! time of day plus a duration, repeated daily, weekly or monthly). All
//! calendar arithmetic happens in the schedule's IANA timezone, so a
//! "22:00 every Monday" window stays at 22:00 local time across DST
//! changes.

use std::fmt;
use std::time::Duration;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc,
    Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, Result, RouterError};
use crate::muter::{self, ActiveMaintenanceExpr};

/// How a recurring window repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatType {
    /// Every day.
    Daily,
    /// On selected weekdays.
    Weekly,
    /// On the start time's day of month.
    Monthly,
}

/// A weekday a weekly window repeats on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum RepeatOn {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl RepeatOn {
    /// Returns the chrono weekday.
    #[must_use]
    pub const fn weekday(self) -> Weekday {
        match self {
            Self::Sunday => Weekday::Sun,
            Self::Monday => Weekday::Mon,
            Self::Tuesday => Weekday::Tue,
            Self::Wednesday => Weekday::Wed,
            Self::Thursday => Weekday::Thu,
            Self::Friday => Weekday::Fri,
            Self::Saturday => Weekday::Sat,
        }
    }
}

/// Repetition of a maintenance window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// First occurrence. Its time of day (and day of month, for monthly
    /// windows) anchors every later occurrence.
    pub start_time: DateTime<FixedOffset>,
    /// Last instant any occurrence may cover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<FixedOffset>>,
    /// Length of each occurrence.
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
    /// Repetition kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_type: Option<RepeatType>,
    /// Weekdays for weekly windows; empty repeats every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeat_on: Vec<RepeatOn>,
}

/// When a maintenance window applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// IANA timezone name.
    pub timezone: String,
    /// Fixed window start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<FixedOffset>>,
    /// Fixed window end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<FixedOffset>>,
    /// Repetition, for recurring windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
}

impl Schedule {
    fn location(&self) -> Option<Tz> {
        self.timezone.parse().ok()
    }

    fn fixed_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((start.to_utc(), end.to_utc())),
            _ => None,
        }
    }

    /// End of the window containing `now`, or `None` outside any window.
    #[must_use]
    pub fn current_window_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let tz = self.location()?;
        if let Some((start, end)) = self.fixed_window() {
            if start <= now && now <= end {
                return Some(end);
            }
        }
        self.recurrence
            .as_ref()?
            .window_end(now.with_timezone(&tz))
    }

    /// True if `now` falls in a window. Both boundaries are inclusive.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.current_window_end(now).is_some()
    }
}

impl Recurrence {
    fn window_end(&self, current: DateTime<Tz>) -> Option<DateTime<Utc>> {
        let now = current.to_utc();
        if now < self.start_time.to_utc() {
            return None;
        }
        if self.end_time.is_some_and(|end| now > end.to_utc()) {
            return None;
        }

        let tz = current.timezone();
        let candidates: Vec<DateTime<Tz>> = match self.repeat_type? {
            RepeatType::Weekly if !self.repeat_on.is_empty() => self
                .repeat_on
                .iter()
                .filter_map(|day| self.weekly_candidate(&tz, current, day.weekday()))
                .collect(),
            RepeatType::Daily | RepeatType::Weekly => self.daily_candidate(&tz, current).into_iter().collect(),
            RepeatType::Monthly => self.monthly_candidate(&tz, current).into_iter().collect(),
        };

        let length = TimeDelta::from_std(self.duration).ok()?;
        candidates
            .into_iter()
            .filter_map(|start| start.checked_add_signed(length))
            .filter(|end| current <= *end)
            .max()
            .map(|end| end.to_utc())
    }

    fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.start_time.hour(), self.start_time.minute(), 0)
    }

    // Today's occurrence, or yesterday's if today's has not started yet.
    fn daily_candidate(&self, tz: &Tz, current: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let time = self.time_of_day()?;
        let today = current.date_naive();
        let candidate = localize(tz, today, time)?;
        if candidate > current {
            return localize(tz, today.pred_opt()?, time);
        }
        Some(candidate)
    }

    fn weekly_candidate(&self, tz: &Tz, current: DateTime<Tz>, day: Weekday) -> Option<DateTime<Tz>> {
        let time = self.time_of_day()?;
        let delta = i64::from(day.num_days_from_sunday()) - i64::from(current.weekday().num_days_from_sunday());
        let date = current.date_naive().checked_add_signed(TimeDelta::days(delta))?;
        let candidate = localize(tz, date, time)?;
        if candidate > current {
            return localize(tz, date.checked_sub_signed(TimeDelta::days(7))?, time);
        }
        Some(candidate)
    }

    // The anchor day in this month, clamped to the month length, or the
    // clamped anchor day of the previous month.
    fn monthly_candidate(&self, tz: &Tz, current: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let anchor = self.start_time.day();
        let time = self.start_time.time();
        let (year, month) = (current.year(), current.month());
        let candidate = localize(tz, clamped_date(year, month, anchor)?, time)?;
        if candidate <= current {
            return Some(candidate);
        }
        let (year, month) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
        localize(tz, clamped_date(year, month, anchor)?, time)
    }
}

fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?.day();
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

// Local wall-clock time to an instant. Ambiguous times take the earlier
// instant; times skipped by a DST jump move forward an hour.
fn localize(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
}

/// Lifecycle status of a maintenance window at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceStatus {
    /// A window is in progress.
    Active,
    /// The first window has not started.
    Upcoming,
    /// Neither active nor upcoming.
    Expired,
}

impl fmt::Display for MaintenanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Upcoming => "upcoming",
            Self::Expired => "expired",
        })
    }
}

/// Shape of a maintenance schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceKind {
    /// One absolute window.
    Fixed,
    /// A repeating window.
    Recurring,
}

/// A planned maintenance entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMaintenance {
    /// Identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// When the window applies.
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Rules the window applies to; empty means all rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_ids: Vec<String>,
    /// Label expression narrowing the muted alerts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expression: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creator.
    #[serde(default)]
    pub created_by: String,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Last updater.
    #[serde(default)]
    pub updated_by: String,
}

impl PlannedMaintenance {
    /// Creates an entry with a fresh id.
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            schedule: Some(schedule),
            rule_ids: Vec::new(),
            expression: String::new(),
            created_at: now,
            created_by: String::new(),
            updated_at: now,
            updated_by: String::new(),
        }
    }

    /// True if `now` falls inside a window.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.is_active(now))
    }

    /// End of the window containing `now`.
    #[must_use]
    pub fn current_window_end_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.as_ref()?.current_window_end(now)
    }

    /// True if the first window starts after `now`.
    #[must_use]
    pub fn is_upcoming_at(&self, now: DateTime<Utc>) -> bool {
        let Some(schedule) = &self.schedule else {
            return false;
        };
        if schedule.location().is_none() {
            return false;
        }
        if let Some((start, _)) = schedule.fixed_window() {
            return now < start;
        }
        schedule
            .recurrence
            .as_ref()
            .is_some_and(|r| now < r.start_time.to_utc())
    }

    /// True if the first window has not started yet.
    #[must_use]
    pub fn is_upcoming(&self) -> bool {
        self.is_upcoming_at(Utc::now())
    }

    /// True if the schedule repeats.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.recurrence.is_some())
    }

    /// Status at `now`.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> MaintenanceStatus {
        if self.is_active(now) {
            MaintenanceStatus::Active
        } else if self.is_upcoming_at(now) {
            MaintenanceStatus::Upcoming
        } else {
            MaintenanceStatus::Expired
        }
    }

    /// Fixed when both bounds are set and ordered, recurring otherwise.
    #[must_use]
    pub fn kind(&self) -> MaintenanceKind {
        match self.schedule.as_ref().and_then(Schedule::fixed_window) {
            Some((start, end)) if end > start => MaintenanceKind::Fixed,
            _ => MaintenanceKind::Recurring,
        }
    }

    /// Checks the payload.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("missing name in the payload"));
        }
        let Some(schedule) = &self.schedule else {
            return Err(invalid("missing schedule in the payload"));
        };
        if schedule.timezone.is_empty() {
            return Err(invalid("missing timezone in the payload"));
        }
        if schedule.location().is_none() {
            return Err(invalid("invalid timezone in the payload"));
        }
        if schedule.fixed_window().is_some_and(|(start, end)| start > end) {
            return Err(invalid("start time cannot be after end time"));
        }
        if let Some(recurrence) = &schedule.recurrence {
            if recurrence.repeat_type.is_none() {
                return Err(invalid("missing repeat type in the payload"));
            }
            if recurrence.duration.is_zero() {
                return Err(invalid("missing duration in the payload"));
            }
            if recurrence.end_time.is_some_and(|end| end < recurrence.start_time) {
                return Err(invalid("end time cannot be before start time"));
            }
        }
        if !self.expression.is_empty() {
            muter::validate_expression(&self.expression)
                .map_err(|e| invalid(format!("invalid expression: {e}")))?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RouterError {
    RouterError::invalid_input(ErrorCode::MAINTENANCE_INVALID, message)
}

/// Scopes of the entries active at `now`.
#[must_use]
pub fn active_maintenance_exprs(
    maintenances: &[PlannedMaintenance],
    now: DateTime<Utc>,
) -> Vec<ActiveMaintenanceExpr> {
    maintenances
        .iter()
        .filter(|m| m.is_active(now))
        .map(|m| ActiveMaintenanceExpr {
            rule_ids: m.rule_ids.clone(),
            expression: m.expression.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        at(s).to_utc()
    }

    fn recurring(
        timezone: &str,
        start: &str,
        hours: u64,
        repeat_type: RepeatType,
        repeat_on: Vec<RepeatOn>,
    ) -> PlannedMaintenance {
        PlannedMaintenance::new(
            "maintenance",
            Schedule {
                timezone: timezone.to_string(),
                recurrence: Some(Recurrence {
                    start_time: at(start),
                    end_time: None,
                    duration: Duration::from_secs(hours * 3600),
                    repeat_type: Some(repeat_type),
                    repeat_on,
                }),
                ..Schedule::default()
            },
        )
    }

    fn fixed(timezone: &str, start: &str, end: &str) -> PlannedMaintenance {
        PlannedMaintenance::new(
            "maintenance",
            Schedule {
                timezone: timezone.to_string(),
                start_time: Some(at(start)),
                end_time: Some(at(end)),
                recurrence: None,
            },
        )
    }

    mod recurring_windows {
        use super::*;
        use test_case::test_case;
        use RepeatOn::{Friday, Monday, Sunday, Thursday, Tuesday, Wednesday};

        #[test_case(
            recurring("Europe/London", "2025-03-17T00:00:00Z", 24, RepeatType::Weekly,
                vec![Monday, Tuesday, Wednesday, Thursday, Friday, Sunday]),
            "2025-03-20T12:00:00Z", true; "weekly workdays and sunday on thursday")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Weekly, vec![Monday]),
            "2024-04-02T01:30:00Z", true; "weekly window crossing midnight")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Weekly, vec![Monday]),
            "2024-04-23T01:30:00Z", true; "weekly window three weeks later")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 52, RepeatType::Weekly, vec![Monday]),
            "2024-04-25T01:30:00Z", true; "weekly multi day duration")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Weekly, vec![Monday]),
            "2024-04-03T01:30:00Z", false; "weekly outside window")]
        #[test_case(
            recurring("UTC", "2024-04-01T23:00:00Z", 2, RepeatType::Daily, vec![]),
            "2024-04-05T00:30:00Z", true; "daily crossing midnight")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Daily, vec![]),
            "2024-04-05T01:00:00Z", true; "daily late window")]
        #[test_case(
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Daily, vec![]),
            "2024-04-05T02:01:00Z", false; "daily just after window")]
        #[test_case(
            recurring("UTC", "2024-03-31T22:00:00Z", 6, RepeatType::Monthly, vec![]),
            "2024-04-01T02:00:00Z", true; "monthly crossing month end")]
        #[test_case(
            recurring("UTC", "2024-03-03T10:00:00Z", 2, RepeatType::Weekly, vec![]),
            "2024-03-10T11:00:00Z", true; "weekly without days acts daily")]
        #[test_case(
            recurring("UTC", "2024-01-31T12:00:00Z", 2, RepeatType::Monthly, vec![]),
            "2024-02-28T12:30:00Z", false; "monthly 31st not active before clamped day")]
        #[test_case(
            recurring("UTC", "2024-01-31T12:00:00Z", 2, RepeatType::Monthly, vec![]),
            "2024-02-29T12:30:00Z", true; "monthly 31st clamps to leap day")]
        #[test_case(
            recurring("UTC", "2023-01-31T12:00:00Z", 2, RepeatType::Monthly, vec![]),
            "2023-02-28T12:30:00Z", true; "monthly 31st clamps to february 28th")]
        #[test_case(
            recurring("UTC", "2024-01-31T12:00:00Z", 2, RepeatType::Monthly, vec![]),
            "2024-04-30T12:30:00Z", true; "monthly 31st clamps to thirty day month")]
        #[test_case(
            recurring("UTC", "2024-01-30T12:00:00Z", 48, RepeatType::Monthly, vec![]),
            "2024-02-01T11:00:00Z", true; "monthly duration spills into next month")]
        #[test_case(
            recurring("UTC", "2024-03-31T12:00:00Z", 48, RepeatType::Monthly, vec![]),
            "2024-05-01T11:00:00Z", true; "monthly previous month is clamped")]
        fn is_active(maintenance: PlannedMaintenance, now: &str, expected: bool) {
            assert_eq!(maintenance.is_active(utc(now)), expected);
        }

        #[test]
        fn inactive_before_recurrence_start() {
            let m = recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Daily, vec![]);
            assert!(!m.is_active(utc("2024-03-30T23:00:00Z")));
        }

        #[test]
        fn inactive_after_recurrence_end() {
            let mut m = recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Daily, vec![]);
            if let Some(r) = m.schedule.as_mut().and_then(|s| s.recurrence.as_mut()) {
                r.end_time = Some(at("2024-04-03T00:00:00Z"));
            }
            assert!(m.is_active(utc("2024-04-02T23:00:00Z")));
            assert!(!m.is_active(utc("2024-04-04T23:00:00Z")));
        }

        #[test]
        fn time_of_day_follows_local_clock() {
            // 22:00 in New York is 02:00 or 03:00 UTC depending on DST
            let m = recurring("America/New_York", "2024-01-01T22:00:00-05:00", 1, RepeatType::Daily, vec![]);
            assert!(m.is_active(utc("2024-01-10T03:30:00Z")));
            assert!(m.is_active(utc("2024-07-10T02:30:00Z")));
            assert!(!m.is_active(utc("2024-07-10T03:30:00Z")));
        }

        #[test]
        fn window_end_for_daily() {
            let m = recurring("UTC", "2024-04-01T23:00:00Z", 2, RepeatType::Daily, vec![]);
            assert_eq!(
                m.current_window_end_time(utc("2024-04-05T00:30:00Z")),
                Some(utc("2024-04-05T01:00:00Z"))
            );
            assert_eq!(m.current_window_end_time(utc("2024-04-05T02:00:00Z")), None);
        }

        #[test]
        fn window_end_for_overlapping_weekly_takes_latest() {
            let m = recurring("UTC", "2024-04-01T00:00:00Z", 48, RepeatType::Weekly, vec![Monday, Tuesday]);
            // wednesday 12:00 is inside the tuesday window only
            assert_eq!(
                m.current_window_end_time(utc("2024-04-03T12:00:00Z")),
                Some(utc("2024-04-04T00:00:00Z"))
            );
        }
    }

    mod fixed_windows {
        use super::*;
        use test_case::test_case;

        #[test_case("2024-06-01T12:00:00Z", true; "inside")]
        #[test_case("2024-06-01T08:00:00Z", false; "before")]
        #[test_case("2024-06-01T15:00:00Z", false; "after")]
        #[test_case("2024-06-01T10:00:00Z", true; "start boundary")]
        #[test_case("2024-06-01T14:00:00Z", true; "end boundary")]
        fn is_active(now: &str, expected: bool) {
            let m = fixed("UTC", "2024-06-01T10:00:00Z", "2024-06-01T14:00:00Z");
            assert_eq!(m.is_active(utc(now)), expected);
        }

        #[test]
        fn invalid_timezone_is_never_active() {
            let m = fixed("Nowhere/City", "2024-06-01T10:00:00Z", "2024-06-01T14:00:00Z");
            assert!(!m.is_active(utc("2024-06-01T12:00:00Z")));
            assert!(!m.is_upcoming_at(utc("2024-01-01T00:00:00Z")));
        }

        #[test]
        fn window_end_is_fixed_end() {
            let m = fixed("UTC", "2024-06-01T10:00:00Z", "2024-06-01T14:00:00Z");
            assert_eq!(
                m.current_window_end_time(utc("2024-06-01T11:00:00Z")),
                Some(utc("2024-06-01T14:00:00Z"))
            );
        }

        #[test]
        fn status_and_kind() {
            let m = fixed("UTC", "2024-06-01T10:00:00Z", "2024-06-01T14:00:00Z");
            assert_eq!(m.kind(), MaintenanceKind::Fixed);
            assert_eq!(m.status(utc("2024-06-01T09:00:00Z")), MaintenanceStatus::Upcoming);
            assert_eq!(m.status(utc("2024-06-01T11:00:00Z")), MaintenanceStatus::Active);
            assert_eq!(m.status(utc("2024-06-02T11:00:00Z")), MaintenanceStatus::Expired);
            assert!(!m.is_recurring());
        }

        proptest! {
            #[test]
            fn boundaries_are_inclusive(start in 0i64..2_000_000_000, len in 1i64..1_000_000) {
                let start = DateTime::from_timestamp(start, 0).unwrap();
                let end = start + TimeDelta::seconds(len);
                let m = PlannedMaintenance::new("m", Schedule {
                    timezone: "UTC".to_string(),
                    start_time: Some(start.fixed_offset()),
                    end_time: Some(end.fixed_offset()),
                    recurrence: None,
                });
                prop_assert!(m.is_active(start));
                prop_assert!(m.is_active(end));
                prop_assert!(!m.is_active(start - TimeDelta::seconds(1)));
                prop_assert!(!m.is_active(end + TimeDelta::seconds(1)));
            }
        }
    }

    mod validation {
        use super::*;
        use test_case::test_case;

        fn valid() -> PlannedMaintenance {
            recurring("UTC", "2024-04-01T22:00:00Z", 4, RepeatType::Daily, vec![])
        }

        #[test]
        fn accepts_valid_payload() {
            assert!(valid().validate().is_ok());
        }

        #[test_case(|m: &mut PlannedMaintenance| m.name.clear(), "missing name in the payload"; "name")]
        #[test_case(|m: &mut PlannedMaintenance| m.schedule = None, "missing schedule in the payload"; "schedule")]
        #[test_case(|m: &mut PlannedMaintenance| {
            if let Some(s) = m.schedule.as_mut() { s.timezone.clear(); }
        }, "missing timezone in the payload"; "timezone")]
        #[test_case(|m: &mut PlannedMaintenance| {
            if let Some(s) = m.schedule.as_mut() { s.timezone = "Mars/Base".to_string(); }
        }, "invalid timezone in the payload"; "bad timezone")]
        #[test_case(|m: &mut PlannedMaintenance| {
            if let Some(r) = m.schedule.as_mut().and_then(|s| s.recurrence.as_mut()) { r.repeat_type = None; }
        }, "missing repeat type in the payload"; "repeat type")]
        #[test_case(|m: &mut PlannedMaintenance| {
            if let Some(r) = m.schedule.as_mut().and_then(|s| s.recurrence.as_mut()) { r.duration = Duration::ZERO; }
        }, "missing duration in the payload"; "duration")]
        #[test_case(|m: &mut PlannedMaintenance| {
            if let Some(r) = m.schedule.as_mut().and_then(|s| s.recurrence.as_mut()) {
                r.end_time = Some(at("2024-03-01T00:00:00Z"));
            }
        }, "end time cannot be before start time"; "recurrence end")]
        fn rejects(mutate: fn(&mut PlannedMaintenance), message: &str) {
            let mut m = valid();
            mutate(&mut m);
            let err = m.validate().unwrap_err();
            assert_eq!(err.to_string(), message);
            assert_eq!(err.code(), ErrorCode::MAINTENANCE_INVALID);
        }

        #[test]
        fn rejects_inverted_fixed_window() {
            let m = fixed("UTC", "2024-06-01T14:00:00Z", "2024-06-01T10:00:00Z");
            assert_eq!(m.validate().unwrap_err().to_string(), "start time cannot be after end time");
            assert_eq!(m.kind(), MaintenanceKind::Recurring);
        }

        #[test_case("env == \"prod\"", true; "equality")]
        #[test_case("env == \"prod\" && service == \"api\"", true; "and")]
        #[test_case("env == \"prod\" || env == \"staging\"", true; "or")]
        #[test_case("env ==== \"prod\"", false; "bad operator")]
        #[test_case("env == \"prod", false; "unclosed string")]
        fn expression(expression: &str, ok: bool) {
            let mut m = valid();
            m.expression = expression.to_string();
            let result = m.validate();
            assert_eq!(result.is_ok(), ok, "{result:?}");
            if let Err(err) = result {
                assert!(err.to_string().starts_with("invalid expression: "));
            }
        }
    }

    #[test]
    fn active_exprs_skip_inactive_entries() {
        let mut active = fixed("UTC", "2024-06-01T10:00:00Z", "2024-06-01T14:00:00Z");
        active.rule_ids = vec!["r1".to_string()];
        active.expression = "env == \"prod\"".to_string();
        let inactive = fixed("UTC", "2024-07-01T10:00:00Z", "2024-07-01T14:00:00Z");

        let exprs = active_maintenance_exprs(&[active, inactive], utc("2024-06-01T12:00:00Z"));
        assert_eq!(
            exprs,
            vec![ActiveMaintenanceExpr {
                rule_ids: vec!["r1".to_string()],
                expression: "env == \"prod\"".to_string(),
            }]
        );
    }
}
