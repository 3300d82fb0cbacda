use std::collections::BTreeSet;

use anyhow::anyhow;
use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound on the day-by-day search for a custom day set. A non-empty
/// set of valid weekdays always matches within 7 days; the window only runs
/// out when the set is empty or contains no valid weekday numbers.
pub const CUSTOM_SEARCH_LIMIT: u32 = 14;

/// How often a task repeats. Each variant carries only the fields it needs;
/// `days` holds weekday numbers 0-6 with Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "lowercase")]
pub enum Recurrence {
    Daily { interval: u32 },
    Weekly { interval: u32 },
    Monthly { interval: u32 },
    Yearly { interval: u32 },
    Weekdays,
    Weekends,
    Custom { days: BTreeSet<u8> },
}

/// When a series stops producing occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "end", rename_all = "lowercase")]
pub enum SeriesEnd {
    Never,
    After { count: u32 },
    Until { date: NaiveDate },
}

impl SeriesEnd {
    pub fn describe(&self) -> String {
        match self {
            Self::Never => "never ends".to_string(),
            Self::After { count } => format!("ends after {count} occurrence(s)"),
            Self::Until { date } => {
                format!("until {}", crate::datetime::format_calendar_date(*date))
            }
        }
    }
}

/// A complete recurrence rule: the repeat pattern plus the end policy.
/// Immutable once attached to a task; all date computation is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recur {
    #[serde(flatten)]
    pub pattern: Recurrence,
    #[serde(flatten)]
    pub end: SeriesEnd,
}

impl Recur {
    pub fn new(pattern: Recurrence) -> Self {
        Self {
            pattern,
            end: SeriesEnd::Never,
        }
    }

    /// Whether the series produces another occurrence after `reference`,
    /// given that `emitted` occurrences exist already.
    ///
    /// `Until` compares the candidate *next* date against the end date, so
    /// an occurrence whose successor would overshoot is the last one
    /// emitted. `After` counts occurrences in the engine itself rather than
    /// leaving the bound to the caller.
    pub fn continues_after(&self, reference: NaiveDate, emitted: u32) -> bool {
        match &self.end {
            SeriesEnd::Never => true,
            SeriesEnd::After { count } => emitted < *count,
            SeriesEnd::Until { date } => next_due_date(&self.pattern, reference) <= *date,
        }
    }
}

/// Next qualifying calendar date strictly after `reference`.
///
/// The interval variants advance by their unit; `Monthly`/`Yearly` use
/// calendar month arithmetic, so an end-of-month reference clamps the way
/// `checked_add_months` clamps (Jan 31 + 1 month = Feb 29/28). The walking
/// variants step one day at a time, never landing on `reference` itself.
/// Total over all inputs: a custom set that matches nothing within
/// [`CUSTOM_SEARCH_LIMIT`] days yields `reference` unchanged.
pub fn next_due_date(pattern: &Recurrence, reference: NaiveDate) -> NaiveDate {
    match pattern {
        Recurrence::Daily { interval } => add_days(reference, i64::from((*interval).max(1))),
        Recurrence::Weekly { interval } => add_days(reference, 7 * i64::from((*interval).max(1))),
        Recurrence::Monthly { interval } => reference
            .checked_add_months(Months::new((*interval).max(1)))
            .unwrap_or(reference),
        Recurrence::Yearly { interval } => reference
            .checked_add_months(Months::new((*interval).max(1).saturating_mul(12)))
            .unwrap_or(reference),
        Recurrence::Weekdays => next_matching_day(reference, is_weekday),
        Recurrence::Weekends => next_matching_day(reference, is_weekend),
        Recurrence::Custom { days } => next_custom_day(reference, days),
    }
}

/// First occurrence of a series starting at `start`.
///
/// Unlike [`next_due_date`] the walking variants treat `start` itself as
/// eligible: a recurring task created on a Saturday with a weekend pattern
/// is due that same Saturday. The interval variants begin at `start`
/// unconditionally. Subsequent occurrences always move forward.
pub fn first_due_date(pattern: &Recurrence, start: NaiveDate) -> NaiveDate {
    match pattern {
        Recurrence::Weekdays if is_weekday(start) => start,
        Recurrence::Weekends if is_weekend(start) => start,
        Recurrence::Custom { days } if days.contains(&weekday_index(start.weekday())) => start,
        Recurrence::Weekdays | Recurrence::Weekends | Recurrence::Custom { .. } => {
            next_due_date(pattern, start)
        }
        _ => start,
    }
}

impl Recurrence {
    /// Parse the CLI rule syntax: named patterns (`daily`, `weekly`,
    /// `monthly`, `yearly`, `weekdays`, `weekends`), interval shorthand
    /// (`3d`, `2w`, `6m`, `1y`), or a comma-separated weekday list
    /// (`mon,wed,fri`).
    pub fn parse(token: &str) -> anyhow::Result<Self> {
        let lower = token.trim().to_ascii_lowercase();

        match lower.as_str() {
            "daily" | "day" => return Ok(Self::Daily { interval: 1 }),
            "weekly" | "week" => return Ok(Self::Weekly { interval: 1 }),
            "monthly" | "month" => return Ok(Self::Monthly { interval: 1 }),
            "yearly" | "annually" | "year" => return Ok(Self::Yearly { interval: 1 }),
            "weekdays" => return Ok(Self::Weekdays),
            "weekends" => return Ok(Self::Weekends),
            "" => return Err(anyhow!("recurrence pattern cannot be empty")),
            _ => {}
        }

        let shorthand = Regex::new(r"^(?P<num>\d+)(?P<unit>[dwmy])$")
            .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

        if let Some(caps) = shorthand.captures(&lower) {
            let interval: u32 = caps
                .name("num")
                .map(|m| m.as_str())
                .ok_or_else(|| anyhow!("missing interval"))?
                .parse()
                .map_err(|_| anyhow!("interval out of range in: {token}"))?;
            if interval == 0 {
                return Err(anyhow!("recurrence interval must be at least 1"));
            }

            let unit = caps
                .name("unit")
                .map(|m| m.as_str())
                .ok_or_else(|| anyhow!("missing interval unit"))?;
            return match unit {
                "d" => Ok(Self::Daily { interval }),
                "w" => Ok(Self::Weekly { interval }),
                "m" => Ok(Self::Monthly { interval }),
                "y" => Ok(Self::Yearly { interval }),
                other => Err(anyhow!("unknown interval unit: {other}")),
            };
        }

        let mut days = BTreeSet::new();
        for part in lower.split(',') {
            let day = parse_day_name(part.trim())
                .ok_or_else(|| anyhow!("unrecognized recurrence token: {token}"))?;
            days.insert(day);
        }
        if days.is_empty() {
            return Err(anyhow!("recurrence day list cannot be empty"));
        }

        Ok(Self::Custom { days })
    }

    /// Short display string for the pattern: "Every day", "Every 3 days",
    /// "Every weekday (Monday to Friday)", "Every Mon, Wed, Fri". A custom
    /// pattern with no renderable days degrades to "Every " with an empty
    /// day list.
    pub fn describe(&self) -> String {
        match self {
            Self::Daily { interval } => every_n("day", "days", *interval),
            Self::Weekly { interval } => every_n("week", "weeks", *interval),
            Self::Monthly { interval } => every_n("month", "months", *interval),
            Self::Yearly { interval } => every_n("year", "years", *interval),
            Self::Weekdays => "Every weekday (Monday to Friday)".to_string(),
            Self::Weekends => "Every weekend (Saturday and Sunday)".to_string(),
            Self::Custom { days } => {
                let names: Vec<&str> = days.iter().filter_map(|day| day_short_name(*day)).collect();
                format!("Every {}", names.join(", "))
            }
        }
    }
}

fn every_n(singular: &str, plural: &str, interval: u32) -> String {
    if interval <= 1 {
        format!("Every {singular}")
    } else {
        format!("Every {interval} {plural}")
    }
}

/// Weekday number with Sunday = 0 through Saturday = 6.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

fn is_weekday(date: NaiveDate) -> bool {
    !is_weekend(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

fn next_matching_day(reference: NaiveDate, eligible: impl Fn(NaiveDate) -> bool) -> NaiveDate {
    let mut candidate = add_days(reference, 1);
    while !eligible(candidate) {
        candidate = add_days(candidate, 1);
    }
    candidate
}

fn next_custom_day(reference: NaiveDate, days: &BTreeSet<u8>) -> NaiveDate {
    if days.is_empty() {
        warn!(reference = %reference, "custom recurrence has no days; keeping reference date");
        return reference;
    }

    let mut candidate = reference;
    for _ in 0..CUSTOM_SEARCH_LIMIT {
        candidate = add_days(candidate, 1);
        if days.contains(&weekday_index(candidate.weekday())) {
            return candidate;
        }
    }

    warn!(
        reference = %reference,
        ?days,
        "no matching day within search window; keeping reference date"
    );
    reference
}

fn parse_day_name(token: &str) -> Option<u8> {
    match token {
        "sunday" | "sun" => Some(0),
        "monday" | "mon" => Some(1),
        "tuesday" | "tue" | "tues" => Some(2),
        "wednesday" | "wed" => Some(3),
        "thursday" | "thu" | "thur" | "thurs" => Some(4),
        "friday" | "fri" => Some(5),
        "saturday" | "sat" => Some(6),
        _ => None,
    }
}

fn day_short_name(day: u8) -> Option<&'static str> {
    match day {
        0 => Some("Sun"),
        1 => Some("Mon"),
        2 => Some("Tue"),
        3 => Some("Wed"),
        4 => Some("Thu"),
        5 => Some("Fri"),
        6 => Some("Sat"),
        _ => None,
    }
}
