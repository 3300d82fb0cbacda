use cadence_core::datastore::DataStore;
use cadence_core::filter::Filter;
use cadence_core::recur::{Recur, Recurrence, SeriesEnd, next_due_date};
use cadence_core::series::generate_instances;
use cadence_core::task::{Status, Task};
use chrono::{NaiveDate, Utc};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn recurring_task_survives_store_roundtrip_and_filters() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let mut task = Task::new_pending("Weekly review".to_string(), now, 1);
    task.tags = vec!["ritual".to_string()];
    task.project = Some("ops".to_string());
    task.due = Some(date(2024, 1, 1));
    task.recur = Some(Recur {
        pattern: Recurrence::Weekly { interval: 2 },
        end: SeriesEnd::Never,
    });
    task.occurrence = Some(1);

    store
        .add_task(vec![], task.clone())
        .expect("add task should succeed");

    let pending = store.load_pending().expect("load pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recur, task.recur);
    assert_eq!(pending[0].due, Some(date(2024, 1, 1)));

    let filter = Filter::parse(&["recur:yes".to_string()], date(2024, 1, 1)).expect("parse filter");
    assert!(filter.matches(&pending[0]));

    let filter = Filter::parse(&["recur:no".to_string()], date(2024, 1, 1)).expect("parse filter");
    assert!(!filter.matches(&pending[0]));
}

#[test]
fn generated_instances_line_up_with_the_done_chain() {
    // Advancing one due date at a time must visit exactly the dates the
    // batch generator materializes up front.
    let recur = Recur {
        pattern: Recurrence::Weekly { interval: 2 },
        end: SeriesEnd::Never,
    };
    let parent = uuid::Uuid::new_v4();
    let run = generate_instances(&recur, parent, date(2024, 1, 1), 4);

    let mut chained = vec![date(2024, 1, 1)];
    while chained.len() < 4 {
        let last = *chained.last().expect("non-empty");
        chained.push(next_due_date(&recur.pattern, last));
    }

    let generated: Vec<NaiveDate> = run.iter().map(|instance| instance.due).collect();
    assert_eq!(generated, chained);
    assert_eq!(
        generated,
        vec![date(2024, 1, 1), date(2024, 1, 15), date(2024, 1, 29), date(2024, 2, 12)]
    );
}

#[test]
fn completed_tasks_move_aside_without_losing_the_series() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let mut head = Task::new_pending("Water the plants".to_string(), now, 1);
    head.due = Some(date(2024, 1, 1));
    head.recur = Some(Recur {
        pattern: Recurrence::Daily { interval: 3 },
        end: SeriesEnd::After { count: 2 },
    });
    head.occurrence = Some(1);

    let pending = store.add_task(vec![], head.clone()).expect("add");
    store
        .push_undo_snapshot(&[], &[])
        .expect("snapshot before completion");

    // Complete the head; its series still has one occurrence to go.
    let recur = head.recur.clone().expect("rule");
    assert!(recur.continues_after(date(2024, 1, 1), 1));

    let mut done = pending[0].clone();
    done.status = Status::Completed;
    done.end = Some(now);

    let mut successor = Task::new_pending(head.description.clone(), now, 2);
    successor.recur = Some(recur.clone());
    successor.due = Some(next_due_date(&recur.pattern, date(2024, 1, 1)));
    successor.occurrence = Some(2);
    successor.parent = Some(head.uuid);

    store.save_pending(&[successor.clone()]).expect("save pending");
    store.save_completed(&[done]).expect("save completed");

    let reloaded = store.load_pending().expect("reload pending");
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].due, Some(date(2024, 1, 4)));
    assert_eq!(reloaded[0].parent, Some(head.uuid));

    // The second occurrence is the last: nothing continues past it.
    assert!(!recur.continues_after(date(2024, 1, 4), 2));

    let (undo_pending, undo_completed) = store
        .pop_undo_snapshot()
        .expect("pop undo")
        .expect("snapshot present");
    assert!(undo_pending.is_empty());
    assert!(undo_completed.is_empty());
}
