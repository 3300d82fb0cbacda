use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str = "cadence-time.toml";
const TIMEZONE_ENV_VAR: &str = "CADENCE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "CADENCE_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
}

/// The timezone used to turn "now" into a calendar day. Everything past
/// this boundary works in plain `NaiveDate` values.
pub fn project_timezone() -> &'static Tz {
    static PROJECT_TZ: OnceLock<Tz> = OnceLock::new();
    PROJECT_TZ.get_or_init(resolve_project_timezone)
}

#[must_use]
pub fn today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(project_timezone()).date_naive()
}

/// `YYYY-MM-DD` built from the calendar components themselves, never from a
/// UTC-serializing conversion that could shift the day.
#[must_use]
pub fn format_calendar_date(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

fn resolve_project_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    tracing::info!("no timezone configured; using UTC");
    chrono_tz::UTC
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().map(|home| home.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &PathBuf) -> Option<Tz> {
    if !path.exists() {
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(file = %path.display(), error = %err, "failed reading timezone config");
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(file = %path.display(), error = %err, "failed parsing timezone config");
            return None;
        }
    };

    let timezone = parsed.timezone?;
    parse_timezone(timezone.as_str(), &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured project timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(source, timezone = %trimmed, error = %err, "failed to parse timezone id");
            None
        }
    }
}

/// Parse a calendar-date expression relative to `today`. Supported forms:
/// `today`/`tomorrow`/`yesterday`, weekday names (the next such weekday,
/// strictly after today), `+Nd`/`-Nd` day offsets, and `YYYY-MM-DD`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(input: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(add_days_or(today, 1)),
        "yesterday" => return Ok(add_days_or(today, -1)),
        _ => {}
    }

    if let Some(target) = parse_weekday_name(&lower) {
        return Ok(next_weekday_date(today, target));
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)d$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    if let Some(caps) = rel_re.captures(&lower) {
        let amount: i64 = caps
            .name("num")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative amount"))?
            .parse()
            .context("invalid relative day count")?;
        let signed = if caps.name("sign").map(|m| m.as_str()) == Some("-") {
            -amount
        } else {
            amount
        };
        return today
            .checked_add_signed(Duration::days(signed))
            .ok_or_else(|| anyhow!("relative date out of range: {input}"));
    }

    NaiveDate::parse_from_str(token, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "unrecognized date expression: {input} (supported: today/tomorrow/yesterday, \
             weekday names, +Nd/-Nd, YYYY-MM-DD)"
        )
    })
}

fn add_days_or(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

pub(crate) fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = from.weekday().num_days_from_monday() as i64;
    let target_idx = target.num_days_from_monday() as i64;
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    add_days_or(from, delta)
}

/// Compact `%Y%m%dT%H%M%SZ` stamps for audit timestamps, interoperable
/// with common task-export tooling.
pub mod utc_stamp_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(STAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, STAMP_FORMAT)
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, NaiveDateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let opt = Option::<String>::deserialize(deserializer)?;
            match opt {
                Some(raw) => NaiveDateTime::parse_from_str(&raw, super::STAMP_FORMAT)
                    .map(|ndt| Some(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc)))
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{format_calendar_date, parse_date_expr};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn formats_from_calendar_components() {
        assert_eq!(format_calendar_date(date(2024, 3, 7)), "2024-03-07");
        assert_eq!(format_calendar_date(date(812, 11, 30)), "0812-11-30");
    }

    #[test]
    fn parses_relative_keywords() {
        let today = date(2026, 2, 17);
        assert_eq!(parse_date_expr("today", today).expect("parse"), today);
        assert_eq!(parse_date_expr("tomorrow", today).expect("parse"), date(2026, 2, 18));
        assert_eq!(parse_date_expr("yesterday", today).expect("parse"), date(2026, 2, 16));
    }

    #[test]
    fn parses_weekday_names_strictly_forward() {
        // 2026-02-17 is a Tuesday.
        let today = date(2026, 2, 17);
        assert_eq!(parse_date_expr("wednesday", today).expect("parse"), date(2026, 2, 18));
        assert_eq!(parse_date_expr("tuesday", today).expect("parse"), date(2026, 2, 24));
    }

    #[test]
    fn parses_day_offsets_and_iso_dates() {
        let today = date(2026, 2, 17);
        assert_eq!(parse_date_expr("+10d", today).expect("parse"), date(2026, 2, 27));
        assert_eq!(parse_date_expr("-2d", today).expect("parse"), date(2026, 2, 15));
        assert_eq!(
            parse_date_expr("2024-01-06", today).expect("parse"),
            date(2024, 1, 6)
        );
    }

    #[test]
    fn rejects_unknown_expressions() {
        assert!(parse_date_expr("someday", date(2026, 2, 17)).is_err());
        assert!(parse_date_expr("2024-13-01", date(2026, 2, 17)).is_err());
    }
}
