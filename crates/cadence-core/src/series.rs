use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::recur::{Recur, first_due_date, next_due_date};

/// Instances produced per generation call unless the caller asks otherwise.
pub const DEFAULT_INSTANCE_COUNT: usize = 10;

/// One concrete occurrence materialized from a recurrence rule. Derived
/// data: the host decides whether and how to persist it. Instance ids are
/// unique within a single generation call only; repeated calls for the same
/// parent produce the same ids, so callers replace a previous batch rather
/// than merging into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: String,
    pub due: NaiveDate,
    pub is_recurring_instance: bool,
    pub parent: Uuid,
    pub completed: bool,
}

/// Materialize a bounded, ordered run of instances for `recur`, starting
/// from `start` and stopping at the series end policy or after `max`
/// instances, whichever comes first.
///
/// The first occurrence goes through [`first_due_date`], so a start date
/// that already satisfies the pattern is emitted as-is. Pure function of
/// its inputs: the same rule, parent, start, and max always produce the
/// same sequence.
pub fn generate_instances(
    recur: &Recur,
    parent: Uuid,
    start: NaiveDate,
    max: usize,
) -> Vec<TaskInstance> {
    let mut out = Vec::new();
    let mut current = first_due_date(&recur.pattern, start);

    while out.len() < max {
        if !recur.continues_after(current, out.len() as u32) {
            break;
        }

        out.push(TaskInstance {
            id: format!("{parent}:{}", out.len()),
            due: current,
            is_recurring_instance: true,
            parent,
            completed: false,
        });

        let next = next_due_date(&recur.pattern, current);
        if next <= current {
            // Degenerate rule (e.g. custom set with no usable days): the
            // date engine fell back to the reference, so stop instead of
            // emitting duplicates.
            debug!(parent = %parent, due = %current, "date engine stopped advancing; ending run");
            break;
        }
        current = next;
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Datelike, NaiveDate};
    use uuid::Uuid;

    use super::{DEFAULT_INSTANCE_COUNT, generate_instances};
    use crate::recur::{Recur, Recurrence, SeriesEnd};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn unbounded_series_fills_the_requested_count() {
        let recur = Recur::new(Recurrence::Daily { interval: 2 });
        let parent = Uuid::new_v4();
        let run = generate_instances(&recur, parent, date(2024, 1, 1), DEFAULT_INSTANCE_COUNT);

        assert_eq!(run.len(), 10);
        for (idx, instance) in run.iter().enumerate() {
            assert_eq!(instance.id, format!("{parent}:{idx}"));
            assert_eq!(instance.parent, parent);
            assert!(instance.is_recurring_instance);
            assert!(!instance.completed);
        }
        for pair in run.windows(2) {
            assert!(pair[0].due < pair[1].due);
        }
    }

    #[test]
    fn biweekly_run_from_a_monday() {
        let recur = Recur::new(Recurrence::Weekly { interval: 2 });
        let run = generate_instances(&recur, Uuid::new_v4(), date(2024, 1, 1), 4);

        let dues: Vec<NaiveDate> = run.iter().map(|instance| instance.due).collect();
        assert_eq!(
            dues,
            vec![date(2024, 1, 1), date(2024, 1, 15), date(2024, 1, 29), date(2024, 2, 12)]
        );
    }

    #[test]
    fn until_policy_bounds_the_run() {
        // Weekend pattern starting on a Monday: the first occurrence is
        // Saturday Jan 6. Its successor (Sunday Jan 7) is still inside the
        // window, so Jan 6 is emitted; Jan 7's successor (Jan 13) is not,
        // which makes Jan 6 the last instance.
        let recur = Recur {
            pattern: Recurrence::Custom { days: [0, 6].into_iter().collect() },
            end: SeriesEnd::Until { date: date(2024, 1, 10) },
        };
        let run = generate_instances(&recur, Uuid::new_v4(), date(2024, 1, 1), 10);

        assert_eq!(run.len(), 1);
        for instance in &run {
            assert!(instance.due <= date(2024, 1, 10));
            assert!([0, 6].contains(&crate::recur::weekday_index(instance.due.weekday())));
        }
        assert_eq!(run[0].due, date(2024, 1, 6));
    }

    #[test]
    fn until_before_start_yields_nothing() {
        let recur = Recur {
            pattern: Recurrence::Daily { interval: 1 },
            end: SeriesEnd::Until { date: date(2023, 12, 31) },
        };
        let run = generate_instances(&recur, Uuid::new_v4(), date(2024, 1, 1), 10);
        assert!(run.is_empty());
    }

    #[test]
    fn after_policy_caps_the_series_in_the_engine() {
        let recur = Recur {
            pattern: Recurrence::Daily { interval: 1 },
            end: SeriesEnd::After { count: 3 },
        };
        let run = generate_instances(&recur, Uuid::new_v4(), date(2024, 1, 1), 10);

        assert_eq!(run.len(), 3);
        assert_eq!(run[2].due, date(2024, 1, 3));
    }

    #[test]
    fn degenerate_custom_rule_emits_once_and_stops() {
        let recur = Recur::new(Recurrence::Custom { days: BTreeSet::new() });
        let run = generate_instances(&recur, Uuid::new_v4(), date(2024, 1, 1), 10);

        assert_eq!(run.len(), 1);
        assert_eq!(run[0].due, date(2024, 1, 1));
    }

    #[test]
    fn regeneration_is_deterministic() {
        let recur = Recur::new(Recurrence::Weekdays);
        let parent = Uuid::new_v4();
        let first = generate_instances(&recur, parent, date(2024, 1, 1), 5);
        let second = generate_instances(&recur, parent, date(2024, 1, 1), 5);
        assert_eq!(first, second);
    }
}
