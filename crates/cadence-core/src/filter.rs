use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::trace;
use uuid::Uuid;

use crate::datetime::parse_date_expr;
use crate::task::{Status, Task};

#[derive(Debug, Clone)]
pub enum Pred {
    Id(u64),
    Uuid(Uuid),
    TagInclude(String),
    TagExclude(String),
    ProjectEq(String),
    StatusEq(Status),
    Recurring(bool),
    DueOn(NaiveDate),
    DueBefore(NaiveDate),
    DueAfter(NaiveDate),
    TextContains(String),
}

/// Conjunction of predicates, except that identity selectors (ids, uuids)
/// form a disjunction among themselves: `cadence 1 3 done` completes both.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    identity: Vec<Pred>,
    preds: Vec<Pred>,
}

impl Filter {
    #[tracing::instrument(skip(terms, today))]
    pub fn parse(terms: &[String], today: NaiveDate) -> anyhow::Result<Self> {
        let mut filter = Self::default();

        for term in terms {
            for pred in parse_term(term, today)? {
                trace!(?pred, "parsed filter predicate");
                match pred {
                    Pred::Id(_) | Pred::Uuid(_) => filter.identity.push(pred),
                    other => filter.preds.push(other),
                }
            }
        }

        Ok(filter)
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.identity.is_empty() && !self.identity.iter().any(|pred| eval(pred, task)) {
            return false;
        }
        self.preds.iter().all(|pred| eval(pred, task))
    }

    pub fn has_explicit_status_filter(&self) -> bool {
        self.preds
            .iter()
            .any(|pred| matches!(pred, Pred::StatusEq(_)))
    }

    pub fn has_identity_selector(&self) -> bool {
        !self.identity.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty() && self.preds.is_empty()
    }
}

fn parse_term(term: &str, today: NaiveDate) -> anyhow::Result<Vec<Pred>> {
    let token = term.trim();
    if token.is_empty() {
        return Ok(vec![]);
    }

    if let Some(tag) = token.strip_prefix('+') {
        return Ok(vec![Pred::TagInclude(tag.to_string())]);
    }
    if let Some(tag) = token.strip_prefix('-') {
        return Ok(vec![Pred::TagExclude(tag.to_string())]);
    }

    if let Some(ids) = parse_id_list(token) {
        return Ok(ids.into_iter().map(Pred::Id).collect());
    }

    if let Ok(uuid) = Uuid::parse_str(token) {
        return Ok(vec![Pred::Uuid(uuid)]);
    }

    if let Some((key, value)) = token.split_once(':') {
        return parse_attribute(key, value, today).map(|pred| vec![pred]);
    }

    Ok(vec![Pred::TextContains(token.to_ascii_lowercase())])
}

fn parse_attribute(key: &str, value: &str, today: NaiveDate) -> anyhow::Result<Pred> {
    match key.to_ascii_lowercase().as_str() {
        "project" => Ok(Pred::ProjectEq(value.to_string())),
        "status" => match value.to_ascii_lowercase().as_str() {
            "pending" => Ok(Pred::StatusEq(Status::Pending)),
            "completed" => Ok(Pred::StatusEq(Status::Completed)),
            "deleted" => Ok(Pred::StatusEq(Status::Deleted)),
            other => Err(anyhow!("unknown status: {other}")),
        },
        "recur" => match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(Pred::Recurring(true)),
            "no" | "false" | "off" | "0" => Ok(Pred::Recurring(false)),
            other => Err(anyhow!("recur filter expects yes/no, got: {other}")),
        },
        "due" => Ok(Pred::DueOn(parse_date_expr(value, today)?)),
        "due.before" => Ok(Pred::DueBefore(parse_date_expr(value, today)?)),
        "due.after" => Ok(Pred::DueAfter(parse_date_expr(value, today)?)),
        "uuid" => Ok(Pred::Uuid(
            Uuid::parse_str(value).map_err(|_| anyhow!("invalid uuid: {value}"))?,
        )),
        other => Err(anyhow!("unknown filter attribute: {other}")),
    }
}

/// `3`, `1,4,9`, `2-5`, or combinations like `1,3-5`.
fn parse_id_list(token: &str) -> Option<Vec<u64>> {
    let mut ids = Vec::new();

    for part in token.split(',') {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u64 = lo.parse().ok()?;
            let hi: u64 = hi.parse().ok()?;
            if lo > hi {
                return None;
            }
            ids.extend(lo..=hi);
        } else {
            ids.push(part.parse().ok()?);
        }
    }

    if ids.is_empty() { None } else { Some(ids) }
}

fn eval(pred: &Pred, task: &Task) -> bool {
    match pred {
        Pred::Id(id) => task.id == Some(*id),
        Pred::Uuid(uuid) => task.uuid == *uuid,
        Pred::TagInclude(tag) => task.tags.iter().any(|existing| existing == tag),
        Pred::TagExclude(tag) => task.tags.iter().all(|existing| existing != tag),
        Pred::ProjectEq(project) => task.project.as_deref() == Some(project.as_str()),
        Pred::StatusEq(status) => task.status == *status,
        Pred::Recurring(wanted) => task.is_recurring() == *wanted,
        Pred::DueOn(date) => task.due == Some(*date),
        Pred::DueBefore(date) => task.due.is_some_and(|due| due < *date),
        Pred::DueAfter(date) => task.due.is_some_and(|due| due > *date),
        Pred::TextContains(needle) => task.description.to_ascii_lowercase().contains(needle),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::Filter;
    use crate::recur::{Recur, Recurrence};
    use crate::task::Task;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn terms(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn id_lists_select_any_listed_task() {
        let today = date(2024, 1, 1);
        let filter = Filter::parse(&terms(&["1,3"]), today).expect("parse");

        let now = Utc::now();
        let one = Task::new_pending("one".to_string(), now, 1);
        let two = Task::new_pending("two".to_string(), now, 2);
        let three = Task::new_pending("three".to_string(), now, 3);

        assert!(filter.matches(&one));
        assert!(!filter.matches(&two));
        assert!(filter.matches(&three));
        assert!(filter.has_identity_selector());
    }

    #[test]
    fn attribute_and_tag_predicates_conjoin() {
        let today = date(2024, 1, 1);
        let filter =
            Filter::parse(&terms(&["project:home", "+chore", "recur:yes"]), today).expect("parse");

        let now = Utc::now();
        let mut task = Task::new_pending("water plants".to_string(), now, 1);
        task.project = Some("home".to_string());
        task.tags = vec!["chore".to_string()];
        assert!(!filter.matches(&task));

        task.recur = Some(Recur::new(Recurrence::Daily { interval: 1 }));
        assert!(filter.matches(&task));
    }

    #[test]
    fn due_windows_compare_calendar_days() {
        let today = date(2024, 1, 10);
        let filter = Filter::parse(&terms(&["due.before:2024-02-01"]), today).expect("parse");

        let now = Utc::now();
        let mut task = Task::new_pending("dated".to_string(), now, 1);
        task.due = Some(date(2024, 1, 20));
        assert!(filter.matches(&task));

        task.due = Some(date(2024, 2, 20));
        assert!(!filter.matches(&task));

        task.due = None;
        assert!(!filter.matches(&task));
    }

    #[test]
    fn bare_words_search_descriptions() {
        let today = date(2024, 1, 1);
        let filter = Filter::parse(&terms(&["plants"]), today).expect("parse");

        let now = Utc::now();
        let task = Task::new_pending("Water the PLANTS".to_string(), now, 1);
        assert!(filter.matches(&task));
    }

    #[test]
    fn rejects_unknown_attributes() {
        let today = date(2024, 1, 1);
        assert!(Filter::parse(&terms(&["priority:H"]), today).is_err());
    }
}
