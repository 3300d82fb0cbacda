use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::utc_stamp_serde;
use crate::recur::Recur;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Deleted,
}

/// A to-do item. Due dates are plain calendar days; `entry`/`modified`/`end`
/// are audit stamps. A recurring task carries its rule in `recur`, its
/// 1-based position within the series in `occurrence`, and a back-reference
/// to the series origin in `parent` once a successor has been spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,

    #[serde(default)]
    pub id: Option<u64>,

    pub description: String,

    pub status: Status,

    #[serde(with = "utc_stamp_serde")]
    pub entry: DateTime<Utc>,

    #[serde(with = "utc_stamp_serde")]
    pub modified: DateTime<Utc>,

    #[serde(default, with = "utc_stamp_serde::option")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub due: Option<NaiveDate>,

    #[serde(default)]
    pub recur: Option<Recur>,

    #[serde(default)]
    pub occurrence: Option<u32>,

    #[serde(default)]
    pub parent: Option<Uuid>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new_pending(description: String, now: DateTime<Utc>, id: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            description,
            status: Status::Pending,
            entry: now,
            modified: now,
            end: None,
            project: None,
            tags: vec![],
            due: None,
            recur: None,
            occurrence: None,
            parent: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recur.is_some()
    }

    /// Which occurrence of its series this task is; standalone tasks and
    /// series heads both count as the first.
    pub fn occurrence_index(&self) -> u32 {
        self.occurrence.unwrap_or(1)
    }

    pub fn recurrence_summary(&self) -> String {
        self.recur
            .as_ref()
            .map(|recur| recur.pattern.describe())
            .unwrap_or_else(|| "No recurrence".to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::Task;
    use crate::recur::{Recur, Recurrence};

    #[test]
    fn recurring_task_round_trips_through_json() {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
            .single()
            .expect("valid now");
        let mut task = Task::new_pending("Water the plants".to_string(), now, 1);
        task.due = NaiveDate::from_ymd_opt(2024, 1, 1);
        task.recur = Some(Recur::new(Recurrence::Daily { interval: 3 }));
        task.occurrence = Some(1);

        let raw = serde_json::to_string(&task).expect("serialize");
        assert!(raw.contains("\"due\":\"2024-01-01\""));
        assert!(raw.contains("\"entry\":\"20240101T080000Z\""));

        let back: Task = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back.uuid, task.uuid);
        assert_eq!(back.due, task.due);
        assert_eq!(back.recur, task.recur);
    }

    #[test]
    fn summary_for_plain_task_reads_no_recurrence() {
        let task = Task::new_pending("One-off".to_string(), Utc::now(), 1);
        assert_eq!(task.recurrence_summary(), "No recurrence");
    }
}
