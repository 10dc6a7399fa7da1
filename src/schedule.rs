use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_DAYS: u8 = 5;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Format the admin tools write schedule entries in.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Start times for the (up to) five test days, as the backend stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day5: Option<String>,
}

impl Schedule {
    pub fn get(&self, day: u8) -> Option<&str> {
        match day {
            1 => self.day1.as_deref(),
            2 => self.day2.as_deref(),
            3 => self.day3.as_deref(),
            4 => self.day4.as_deref(),
            5 => self.day5.as_deref(),
            _ => None,
        }
    }

    pub fn set(&mut self, day: u8, value: Option<String>) {
        let slot = match day {
            1 => &mut self.day1,
            2 => &mut self.day2,
            3 => &mut self.day3,
            4 => &mut self.day4,
            5 => &mut self.day5,
            _ => return,
        };
        *slot = value.filter(|v| !v.trim().is_empty());
    }

    /// Parsed start times indexed by day; blank or unreadable entries are `None`.
    pub fn starts(&self) -> [Option<DateTime<Utc>>; MAX_DAYS as usize] {
        std::array::from_fn(|i| self.get(i as u8 + 1).and_then(parse_schedule_time))
    }

    pub fn resolve_active_day(&self, now: DateTime<Utc>) -> Option<u8> {
        resolve_active_day(&self.starts(), now)
    }
}

/// Picks the day whose window contains `now`.
///
/// A day runs from its own start until the start of the next *defined* day,
/// so absent days in between never end a window early and never open one.
pub fn resolve_active_day(starts: &[Option<DateTime<Utc>>], now: DateTime<Utc>) -> Option<u8> {
    let defined: Vec<(u8, DateTime<Utc>)> = starts
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|t| (i as u8 + 1, t)))
        .collect();

    defined
        .iter()
        .enumerate()
        .rev()
        .find(|(idx, (_, start))| {
            let next = defined.get(idx + 1).map(|(_, t)| *t);
            now >= *start && next.map_or(true, |n| now < n)
        })
        .map(|(_, (day, _))| *day)
}

/// Parses the loose timestamp shapes the schedule sheet ends up holding.
///
/// Offsets are honoured when present; naive values are read as local time.
pub fn parse_schedule_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalizes admin input into the storage format, keeping local wall time.
pub fn to_storage_format(raw: &str) -> Option<String> {
    parse_schedule_time(raw).map(|dt| dt.with_timezone(&Local).format(STORAGE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_schedule_time(raw).unwrap()
    }

    fn schedule(days: &[(u8, &str)]) -> Schedule {
        let mut s = Schedule::default();
        for (day, raw) in days {
            s.set(*day, Some(raw.to_string()));
        }
        s
    }

    #[test]
    fn single_past_day_is_active() {
        let s = schedule(&[(1, "2024-01-01T00:00")]);
        assert_eq!(s.resolve_active_day(at("2024-01-02")), Some(1));
    }

    #[test]
    fn later_only_day_is_active_once_started() {
        for day in 1..=MAX_DAYS {
            let s = schedule(&[(day, "2024-03-10 08:00:00")]);
            assert_eq!(s.resolve_active_day(at("2024-03-11")), Some(day));
        }
    }

    #[test]
    fn before_every_day_resolves_to_none() {
        let s = schedule(&[(1, "2024-01-05"), (2, "2024-01-06"), (4, "2024-01-08")]);
        assert_eq!(s.resolve_active_day(at("2024-01-04T23:59")), None);
    }

    #[test]
    fn next_day_ends_previous_window() {
        let s = schedule(&[(1, "2024-01-01"), (2, "2024-01-02")]);
        assert_eq!(s.resolve_active_day(at("2024-01-01T12:00")), Some(1));
        assert_eq!(s.resolve_active_day(at("2024-01-02T00:00")), Some(2));
        assert_eq!(s.resolve_active_day(at("2024-02-01")), Some(2));
    }

    #[test]
    fn gaps_are_bounded_by_next_defined_day() {
        let s = schedule(&[(1, "2024-01-01"), (3, "2024-01-03")]);
        assert_eq!(s.resolve_active_day(at("2024-01-02")), Some(1));
        assert_eq!(s.resolve_active_day(at("2024-01-04")), Some(3));
    }

    #[test]
    fn empty_schedule_has_no_day() {
        assert_eq!(Schedule::default().resolve_active_day(Utc::now()), None);
    }

    #[test]
    fn unparseable_entries_count_as_absent() {
        let s = schedule(&[(1, "2024-01-01"), (2, "next tuesday")]);
        assert_eq!(s.resolve_active_day(at("2024-06-01")), Some(1));
    }

    #[test]
    fn offsets_are_honoured() {
        let a = at("2024-01-01T10:00:00+02:00");
        let b = at("2024-01-01T08:00:00Z");
        assert_eq!(a, b);
    }

    #[test]
    fn blank_values_are_cleared_on_set() {
        let mut s = schedule(&[(2, "2024-01-01")]);
        s.set(2, Some("   ".into()));
        assert_eq!(s.day2, None);
    }

    #[test]
    fn deserializes_missing_days() {
        let s: Schedule = serde_json::from_str(r#"{"day1":"2024-01-01 09:00:00"}"#).unwrap();
        assert_eq!(s.day1.as_deref(), Some("2024-01-01 09:00:00"));
        assert!(s.day2.is_none() && s.day5.is_none());
    }

    #[test]
    fn storage_format_round_trips_local_time() {
        assert_eq!(
            to_storage_format("2024-05-06T07:08").as_deref(),
            Some("2024-05-06 07:08:00")
        );
        assert_eq!(to_storage_format("garbage"), None);
    }
}
