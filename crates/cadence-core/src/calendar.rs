use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::task::Task;

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekStart {
    Monday,
    Sunday,
}

impl WeekStart {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Some(Self::Monday),
            "sunday" | "sun" => Some(Self::Sunday),
            _ => None,
        }
    }

    pub fn labels(self) -> [&'static str; 7] {
        match self {
            Self::Monday => ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"],
            Self::Sunday => ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"],
        }
    }

    /// Column of `weekday` in a week row starting at this day.
    fn column(self, weekday: Weekday) -> usize {
        match self {
            Self::Monday => weekday.num_days_from_monday() as usize,
            Self::Sunday => weekday.num_days_from_sunday() as usize,
        }
    }
}

pub fn first_of_month(year: i32, month: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| anyhow!("invalid month: {year}-{month:02}"))
}

pub fn days_in_month(year: i32, month: u32) -> anyhow::Result<u32> {
    let first = first_of_month(year, month)?;
    let next = if month == 12 {
        first_of_month(year + 1, 1)?
    } else {
        first_of_month(year, month + 1)?
    };
    Ok((next - first).num_days() as u32)
}

pub fn month_title(year: i32, month: u32) -> String {
    let name = MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("?");
    format!("{name} {year}")
}

/// Parse a `YYYY-MM` month argument.
pub fn parse_month_arg(token: &str) -> anyhow::Result<(i32, u32)> {
    let (y, m) = token
        .trim()
        .split_once('-')
        .ok_or_else(|| anyhow!("expected YYYY-MM, got: {token}"))?;
    let year: i32 = y.parse().map_err(|_| anyhow!("invalid year in: {token}"))?;
    let month: u32 = m.parse().map_err(|_| anyhow!("invalid month in: {token}"))?;
    first_of_month(year, month)?;
    Ok((year, month))
}

/// Lay a month out as week rows; cells outside the month are `None`.
pub fn month_grid(
    year: i32,
    month: u32,
    week_start: WeekStart,
) -> anyhow::Result<Vec<[Option<NaiveDate>; 7]>> {
    let first = first_of_month(year, month)?;
    let length = days_in_month(year, month)?;

    let mut weeks: Vec<[Option<NaiveDate>; 7]> = vec![[None; 7]];
    for offset in 0..length {
        let day = first + Duration::days(i64::from(offset));
        let column = week_start.column(day.weekday());
        if column == 0 && offset > 0 {
            weeks.push([None; 7]);
        }
        if let Some(week) = weeks.last_mut() {
            week[column] = Some(day);
        }
    }

    Ok(weeks)
}

/// Group tasks by calendar due day; undated tasks are skipped.
pub fn bucket_by_due<'a, I>(tasks: I) -> BTreeMap<NaiveDate, Vec<&'a Task>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut buckets: BTreeMap<NaiveDate, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        if let Some(due) = task.due {
            buckets.entry(due).or_default().push(task);
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{WeekStart, bucket_by_due, days_in_month, month_grid, month_title, parse_month_arg};
    use crate::task::Task;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn month_lengths_respect_leap_years() {
        assert_eq!(days_in_month(2024, 2).expect("length"), 29);
        assert_eq!(days_in_month(2023, 2).expect("length"), 28);
        assert_eq!(days_in_month(2024, 12).expect("length"), 31);
    }

    #[test]
    fn grid_aligns_first_day_to_its_weekday() {
        // January 2024 starts on a Monday.
        let weeks = month_grid(2024, 1, WeekStart::Monday).expect("grid");
        assert_eq!(weeks[0][0], Some(date(2024, 1, 1)));
        assert_eq!(weeks.len(), 5);
        assert_eq!(weeks[4][2], Some(date(2024, 1, 31)));

        let sunday_weeks = month_grid(2024, 1, WeekStart::Sunday).expect("grid");
        assert_eq!(sunday_weeks[0][0], None);
        assert_eq!(sunday_weeks[0][1], Some(date(2024, 1, 1)));
    }

    #[test]
    fn buckets_group_by_due_day_and_skip_undated() {
        let now = Utc::now();
        let mut one = Task::new_pending("one".to_string(), now, 1);
        one.due = Some(date(2024, 1, 6));
        let mut two = Task::new_pending("two".to_string(), now, 2);
        two.due = Some(date(2024, 1, 6));
        let undated = Task::new_pending("undated".to_string(), now, 3);

        let tasks = vec![one, two, undated];
        let buckets = bucket_by_due(tasks.iter());

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[&date(2024, 1, 6)].len(), 2);
    }

    #[test]
    fn parses_month_arguments() {
        assert_eq!(parse_month_arg("2024-02").expect("parse"), (2024, 2));
        assert!(parse_month_arg("2024-13").is_err());
        assert!(parse_month_arg("never").is_err());
        assert_eq!(month_title(2024, 2), "February 2024");
    }
}
