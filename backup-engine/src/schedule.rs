//! Next-due computation for day/time schedules.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many days ahead to look for an eligible weekday.
const SCAN_DAYS: i64 = 14;

/// Run time-of-day plus eligible weekdays. An empty `days` set means every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default)]
    pub days: Vec<Weekday>,
}

fn default_time() -> String {
    "02:00".to_string()
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            time: default_time(),
            days: Vec::new(),
        }
    }
}

impl Schedule {
    /// Parsed time of day, or `None` when `time` is not `HH:mm` / `H:mm`.
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        parse_time_of_day(&self.time)
    }

    fn is_eligible(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let (hour, minute) = raw.trim().split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
}

/// First scheduled instant strictly after `now + 1s`, in UTC.
///
/// Unparsable times fall back to 02:00. If no eligible day turns up within
/// the scan window the result is `now + 24h`, logged at `warn`.
pub fn compute_next_due<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> DateTime<Utc> {
    let time = schedule.time_of_day().unwrap_or_else(|| {
        warn!(time = %schedule.time, "Unparsable schedule time, falling back to 02:00");
        NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN)
    });

    let tz = now.timezone();
    let threshold = now.with_timezone(&Utc) + Duration::seconds(1);
    let today = now.date_naive();

    for offset in 0..SCAN_DAYS {
        let day = today + Duration::days(offset);
        if !schedule.is_eligible(day.weekday()) {
            continue;
        }
        // DST gaps have no local instant; that day is skipped.
        let Some(candidate) = tz.from_local_datetime(&day.and_time(time)).earliest() else {
            continue;
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > threshold {
            return candidate;
        }
    }

    let fallback = now.with_timezone(&Utc) + Duration::hours(24);
    warn!(
        days = ?schedule.days,
        next = %fallback,
        "No eligible schedule day found within {} days, falling back to 24h",
        SCAN_DAYS
    );
    fallback
}

/// `now >= planned`, non-strict so a late poll still fires the run.
pub fn is_due<Tz: TimeZone>(now: &DateTime<Tz>, planned: DateTime<Utc>) -> bool {
    now.with_timezone(&Utc) >= planned
}

/// Tracks one plan's next due instant across polls.
#[derive(Debug, Clone)]
pub struct DueTracker {
    schedule: Schedule,
    next_due: DateTime<Utc>,
}

impl DueTracker {
    pub fn new<Tz: TimeZone>(schedule: Schedule, now: &DateTime<Tz>) -> Self {
        let next_due = compute_next_due(&schedule, now);
        Self { schedule, next_due }
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    /// True once per due instant; advances to the following occurrence.
    pub fn poll<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> bool {
        if !is_due(now, self.next_due) {
            return false;
        }
        self.next_due = compute_next_due(&self.schedule, now);
        true
    }
}
