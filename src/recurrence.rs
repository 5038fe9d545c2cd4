//! Recurrence rules resolving "now" to the next time a subject is due.
//!
//! Rules use the artist list's timer format:
//!
//! ```json
//! {"type": "daily",   "time": "02:00"}
//! {"type": "weekly",  "time": "02:00", "day": 0}
//! {"type": "monthly", "time": "02:00", "day": 15}
//! ```
//!
//! Weekly `day` counts from Monday = 0. Monthly `day` runs 1..=31 and is clamped
//! to the length of shorter months.
//!
//! # Example
//!
//! ```rust
//! use kemono_sync::recurrence::RecurrenceRule;
//! use chrono::{NaiveDate, NaiveTime};
//!
//! let rule = RecurrenceRule::Daily { time: NaiveTime::from_hms_opt(2, 0, 0).unwrap() };
//! let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(3, 0, 0).unwrap();
//! let next = rule.next_after(now);
//! assert_eq!(next, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(2, 0, 0).unwrap());
//! ```

use crate::error::{Error, Result};
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// When a subject should be checked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every day at `time`
    Daily {
        /// Local time of day (HH:MM)
        #[serde(with = "time_format")]
        time: NaiveTime,
    },
    /// Every week on `day` at `time`
    Weekly {
        /// Local time of day (HH:MM)
        #[serde(with = "time_format")]
        time: NaiveTime,
        /// Day of week
        day: Weekday,
    },
    /// Every month on `day` at `time`
    Monthly {
        /// Local time of day (HH:MM)
        #[serde(with = "time_format")]
        time: NaiveTime,
        /// Day of month, 1..=31
        day: u32,
    },
}

impl RecurrenceRule {
    /// Time of day the rule fires at
    pub fn time(&self) -> NaiveTime {
        match self {
            RecurrenceRule::Daily { time }
            | RecurrenceRule::Weekly { time, .. }
            | RecurrenceRule::Monthly { time, .. } => *time,
        }
    }

    /// Reject out-of-range fields
    pub fn validate(&self) -> Result<()> {
        match self {
            RecurrenceRule::Monthly { day, .. } if !(1..=31).contains(day) => Err(
                Error::InvalidRule(format!("monthly day must be 1..=31, got {day}")),
            ),
            _ => Ok(()),
        }
    }

    /// Next instant strictly after `now` at which the rule fires
    ///
    /// The naive candidate in the current period is used when it lies in the
    /// future; otherwise the rule advances by exactly one period.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match *self {
            RecurrenceRule::Daily { time } => {
                let candidate = now.date().and_time(time);
                if candidate > now {
                    candidate
                } else {
                    add_days(candidate, 1)
                }
            }
            RecurrenceRule::Weekly { time, day } => {
                let today = now.date().weekday().num_days_from_monday();
                let target = day.to_chrono().num_days_from_monday();
                let days_ahead = (target + 7 - today) % 7;
                let candidate = add_days(now.date().and_time(time), u64::from(days_ahead));
                if candidate > now {
                    candidate
                } else {
                    add_days(candidate, 7)
                }
            }
            RecurrenceRule::Monthly { time, day } => {
                let this_month = clamped_date(now.year(), now.month(), day).and_time(time);
                if this_month > now {
                    return this_month;
                }
                let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
                    .and_then(|d| d.checked_add_months(Months::new(1)))
                    .unwrap_or(NaiveDate::MAX);
                clamped_date(first.year(), first.month(), day).and_time(time)
            }
        }
    }
}

fn add_days(dt: NaiveDateTime, days: u64) -> NaiveDateTime {
    dt.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDateTime::MAX)
}

// Day 31 in a 30-day month lands on the 30th, day 30 in February on the 28th/29th.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let mut d = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, d) {
            return date;
        }
        if d <= 28 {
            return NaiveDate::MAX;
        }
        d -= 1;
    }
}

/// Days of the week, stored on disk as 0 (Monday) through 6 (Sunday)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Weekday {
    /// Monday
    Monday,
    /// Tuesday
    Tuesday,
    /// Wednesday
    Wednesday,
    /// Thursday
    Thursday,
    /// Friday
    Friday,
    /// Saturday
    Saturday,
    /// Sunday
    Sunday,
}

impl Weekday {
    /// Convert from chrono::Weekday to our Weekday
    pub fn from_chrono(wd: chrono::Weekday) -> Self {
        use chrono::Weekday as ChronoWd;
        match wd {
            ChronoWd::Mon => Weekday::Monday,
            ChronoWd::Tue => Weekday::Tuesday,
            ChronoWd::Wed => Weekday::Wednesday,
            ChronoWd::Thu => Weekday::Thursday,
            ChronoWd::Fri => Weekday::Friday,
            ChronoWd::Sat => Weekday::Saturday,
            ChronoWd::Sun => Weekday::Sunday,
        }
    }

    /// Convert to chrono::Weekday
    pub fn to_chrono(self) -> chrono::Weekday {
        use chrono::Weekday as ChronoWd;
        match self {
            Weekday::Monday => ChronoWd::Mon,
            Weekday::Tuesday => ChronoWd::Tue,
            Weekday::Wednesday => ChronoWd::Wed,
            Weekday::Thursday => ChronoWd::Thu,
            Weekday::Friday => ChronoWd::Fri,
            Weekday::Saturday => ChronoWd::Sat,
            Weekday::Sunday => ChronoWd::Sun,
        }
    }
}

impl TryFrom<u8> for Weekday {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Weekday::Monday),
            1 => Ok(Weekday::Tuesday),
            2 => Ok(Weekday::Wednesday),
            3 => Ok(Weekday::Thursday),
            4 => Ok(Weekday::Friday),
            5 => Ok(Weekday::Saturday),
            6 => Ok(Weekday::Sunday),
            other => Err(format!("weekday must be 0..=6 (Monday = 0), got {other}")),
        }
    }
}

impl From<Weekday> for u8 {
    fn from(day: Weekday) -> Self {
        day.to_chrono().num_days_from_monday() as u8
    }
}

/// Serde module for NaiveTime as HH:MM (seconds accepted on input)
mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = time.format("%H:%M").to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_time(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time {s:?}, expected HH:MM")))
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl RecurrenceRule {
    /// Read a hand-edited timer object without failing.
    ///
    /// Unknown or missing `type` runs daily, a missing or unreadable `time`
    /// falls back to 02:00, a bad weekly day to Monday and a monthly day is
    /// clamped to 1..=31 (default 1). Null and non-object values yield None.
    pub fn from_value_lenient(value: &Value) -> Option<Self> {
        let obj = match value {
            Value::Null => return None,
            Value::Object(obj) => obj,
            other => {
                tracing::warn!(timer = %other, "Ignoring timer that is not an object");
                return None;
            }
        };

        let time = match obj.get("time") {
            None | Some(Value::Null) => default_time(),
            Some(raw) => raw.as_str().and_then(parse_time).unwrap_or_else(|| {
                tracing::warn!(time = %raw, "Invalid timer time, using 02:00");
                default_time()
            }),
        };

        let day = obj.get("day").filter(|v| !v.is_null()).map(|raw| {
            raw.as_i64()
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or(raw)
        });

        match obj.get("type").and_then(Value::as_str).unwrap_or("daily") {
            "daily" => Some(RecurrenceRule::Daily { time }),
            "weekly" => {
                let day = match day {
                    None => Weekday::Monday,
                    Some(parsed) => parsed
                        .ok()
                        .and_then(|d| u8::try_from(d).ok())
                        .and_then(|d| Weekday::try_from(d).ok())
                        .unwrap_or_else(|| {
                            tracing::warn!(day = ?obj.get("day"), "Invalid weekly day, using Monday");
                            Weekday::Monday
                        }),
                };
                Some(RecurrenceRule::Weekly { time, day })
            }
            "monthly" => {
                let day = match day {
                    None => 1,
                    Some(Ok(d)) => d.clamp(1, 31) as u32,
                    Some(Err(raw)) => {
                        tracing::warn!(day = %raw, "Invalid monthly day, using 1");
                        1
                    }
                };
                Some(RecurrenceRule::Monthly { time, day })
            }
            other => {
                tracing::warn!(kind = other, "Unknown timer type, running daily");
                Some(RecurrenceRule::Daily { time })
            }
        }
    }
}

/// Serde adapter for an optional timer that never rejects the surrounding record
pub(crate) fn lenient_option<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<RecurrenceRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(RecurrenceRule::from_value_lenient(&value))
}
