use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::calendar::{self, WeekStart};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{self, parse_date_expr};
use crate::filter::Filter;
use crate::recur::{Recur, Recurrence, SeriesEnd, first_due_date, next_due_date};
use crate::render::Renderer;
use crate::series::{DEFAULT_INSTANCE_COUNT, generate_instances};
use crate::task::{Status, Task};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "upcoming",
        "info",
        "modify",
        "done",
        "delete",
        "undo",
        "preview",
        "calendar",
        "export",
        "projects",
        "tags",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let today = datetime::today(now);
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(store, &inv.command_args, now, today),
        "list" | "upcoming" => cmd_list(store, renderer, &inv.filter_terms, today),
        "info" => cmd_info(store, renderer, &inv.filter_terms, today),
        "modify" => cmd_modify(store, &inv.filter_terms, &inv.command_args, now, today),
        "done" => cmd_done(store, &inv.filter_terms, now, today),
        "delete" => cmd_delete(store, &inv.filter_terms, now, today),
        "undo" => cmd_undo(store),
        "preview" => cmd_preview(store, cfg, renderer, &inv.filter_terms, &inv.command_args, today),
        "calendar" => cmd_calendar(store, cfg, renderer, &inv.command_args, today),
        "export" => cmd_export(store, &inv.filter_terms, today),
        "projects" => cmd_projects(store),
        "tags" => cmd_tags(store),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(store, args, now, today))]
fn cmd_add(
    store: &mut DataStore,
    args: &[String],
    now: chrono::DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command add");

    let mut pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let pending_before = pending.clone();

    let next_id = store.next_id(&pending);
    let (description, mods) = parse_desc_and_mods(args, today)?;
    let mut task = Task::new_pending(description, now, next_id);
    apply_mods(&mut task, &mods)?;

    if let Some(recur) = &task.recur {
        // The first occurrence may legitimately fall on the chosen start
        // date; later occurrences always move forward.
        let seed = task.due.unwrap_or(today);
        task.due = Some(first_due_date(&recur.pattern, seed));
        task.occurrence = Some(1);
    }

    pending = store.add_task(pending, task.clone())?;
    store.push_undo_snapshot(&pending_before, &completed)?;

    debug!(pending_count = pending.len(), "task added");
    match (&task.recur, task.due) {
        (Some(recur), Some(due)) => println!(
            "Created task {} ({}, first due {}).",
            task.id.unwrap_or(next_id),
            recur.pattern.describe(),
            datetime::format_calendar_date(due)
        ),
        _ => println!("Created task {}.", task.id.unwrap_or(next_id)),
    }
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, today))]
fn cmd_list(
    store: &mut DataStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command list/upcoming");

    let filter = Filter::parse(filter_terms, today)?;
    let include_non_pending = filter.has_explicit_status_filter() || filter.has_identity_selector();

    let pending = store.load_pending()?;
    let mut rows: Vec<Task> = if include_non_pending {
        pending.into_iter().chain(store.load_completed()?).collect()
    } else {
        pending
            .into_iter()
            .filter(|task| task.status == Status::Pending)
            .collect()
    };
    rows.retain(|task| filter.matches(task));

    rows.sort_by_key(|task| (task.due, task.id));
    renderer.print_task_table(&rows, today)?;
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, today))]
fn cmd_info(
    store: &mut DataStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command info");

    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let filter = Filter::parse(filter_terms, today)?;

    let mut rows: Vec<Task> = pending
        .into_iter()
        .chain(completed)
        .filter(|task| filter.matches(task))
        .collect();

    rows.sort_by_key(|task| task.id.unwrap_or(u64::MAX));

    if rows.is_empty() {
        return Err(anyhow!("no matching tasks"));
    }

    for task in rows {
        renderer.print_task_info(&task)?;
        println!();
    }

    Ok(())
}

#[instrument(skip(store, filter_terms, args, now, today))]
fn cmd_modify(
    store: &mut DataStore,
    filter_terms: &[String],
    args: &[String],
    now: chrono::DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command modify");

    let mut pending = store.load_pending()?;
    let mut completed = store.load_completed()?;
    let pending_before = pending.clone();
    let completed_before = completed.clone();

    let filter = Filter::parse(filter_terms, today)?;
    let include_non_pending = filter.has_explicit_status_filter() || filter.has_identity_selector();
    let mods = parse_mods(args, today)?;

    let mut changed = 0_u64;
    for task in &mut pending {
        if !include_non_pending && task.status != Status::Pending {
            continue;
        }
        if filter.matches(task) {
            apply_mods(task, &mods)?;
            task.modified = now;
            changed += 1;
        }
    }

    if include_non_pending {
        for task in &mut completed {
            if filter.matches(task) {
                apply_mods(task, &mods)?;
                task.modified = now;
                changed += 1;
            }
        }
    }

    if changed > 0 {
        store.push_undo_snapshot(&pending_before, &completed_before)?;
        store.save_pending(&pending)?;
        if include_non_pending {
            store.save_completed(&completed)?;
        }
    }

    println!("Modified {changed} task(s).");
    Ok(())
}

#[instrument(skip(store, filter_terms, now, today))]
fn cmd_done(
    store: &mut DataStore,
    filter_terms: &[String],
    now: chrono::DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command done");

    let mut pending = store.load_pending()?;
    let mut completed = store.load_completed()?;
    let pending_before = pending.clone();
    let completed_before = completed.clone();

    let filter = Filter::parse(filter_terms, today)?;

    let mut moved = 0_u64;
    let mut keep = Vec::with_capacity(pending.len());
    let mut successors: Vec<Task> = Vec::new();
    let mut next_id = store.next_id(&pending);

    for mut task in pending.drain(..) {
        if task.status != Status::Pending || !filter.matches(&task) {
            keep.push(task);
            continue;
        }

        if let Some(successor) = spawn_successor(&task, now, next_id) {
            next_id += 1;
            successors.push(successor);
        }

        task.status = Status::Completed;
        task.end = Some(now);
        task.modified = now;
        completed.push(task);
        moved += 1;
    }

    let spawned = successors.len() as u64;
    if moved > 0 {
        keep.extend(successors);
        keep.sort_by_key(|task| task.id.unwrap_or(u64::MAX));
        store.push_undo_snapshot(&pending_before, &completed_before)?;
        store.save_pending(&keep)?;
        store.save_completed(&completed)?;
    }

    println!("Completed {moved} task(s).");
    if spawned > 0 {
        println!("Created {spawned} follow-up task(s).");
    }
    Ok(())
}

/// Next occurrence of a recurring task being completed, if its series
/// continues past the current due date.
fn spawn_successor(task: &Task, now: chrono::DateTime<Utc>, next_id: u64) -> Option<Task> {
    let recur = task.recur.as_ref()?;
    let Some(due) = task.due else {
        warn!(uuid = %task.uuid, "recurring task has no due date; series cannot advance");
        return None;
    };

    let emitted = task.occurrence_index();
    if !recur.continues_after(due, emitted) {
        debug!(uuid = %task.uuid, occurrence = emitted, "series ended");
        return None;
    }

    let mut successor = Task::new_pending(task.description.clone(), now, next_id);
    successor.project = task.project.clone();
    successor.tags = task.tags.clone();
    successor.recur = Some(recur.clone());
    successor.due = Some(next_due_date(&recur.pattern, due));
    successor.occurrence = Some(emitted + 1);
    successor.parent = task.parent.or(Some(task.uuid));
    Some(successor)
}

#[instrument(skip(store, filter_terms, now, today))]
fn cmd_delete(
    store: &mut DataStore,
    filter_terms: &[String],
    now: chrono::DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command delete");

    let mut pending = store.load_pending()?;
    let pending_before = pending.clone();
    let filter = Filter::parse(filter_terms, today)?;

    let mut deleted = 0_u64;
    for task in &mut pending {
        if task.status == Status::Pending && filter.matches(task) {
            task.status = Status::Deleted;
            task.end = Some(now);
            task.modified = now;
            deleted += 1;
        }
    }

    if deleted > 0 {
        let completed = store.load_completed()?;
        store.push_undo_snapshot(&pending_before, &completed)?;
        store.save_pending(&pending)?;
    }

    println!("Deleted {deleted} task(s) (soft-delete).");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_undo(store: &mut DataStore) -> anyhow::Result<()> {
    info!("command undo");

    let Some((pending, completed)) = store.pop_undo_snapshot()? else {
        println!("No undo transactions available.");
        return Ok(());
    };

    store.save_pending(&pending)?;
    store.save_completed(&completed)?;

    println!("Undo completed.");
    Ok(())
}

#[instrument(skip(store, cfg, renderer, filter_terms, args, today))]
fn cmd_preview(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    filter_terms: &[String],
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command preview");

    let max = args
        .first()
        .and_then(|raw| raw.parse::<usize>().ok())
        .or_else(|| cfg.get_usize("preview.count"))
        .unwrap_or(DEFAULT_INSTANCE_COUNT);

    let filter = Filter::parse(filter_terms, today)?;
    let pending = store.load_pending()?;
    let targets: Vec<&Task> = pending
        .iter()
        .filter(|task| {
            task.status == Status::Pending && task.is_recurring() && filter.matches(task)
        })
        .collect();

    if targets.is_empty() {
        println!("No matching recurring tasks.");
        return Ok(());
    }

    for task in targets {
        let Some(recur) = &task.recur else {
            continue;
        };
        println!(
            "{} {} ({}, {})",
            task.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            task.description,
            recur.pattern.describe(),
            recur.end.describe()
        );

        let start = task.due.unwrap_or(today);
        let run = generate_instances(recur, task.uuid, start, max);
        if run.is_empty() {
            println!("(series already ended)");
        } else {
            renderer.print_instance_table(&run)?;
        }
        println!();
    }

    Ok(())
}

#[instrument(skip(store, cfg, renderer, args, today))]
fn cmd_calendar(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command calendar");

    let (year, month) = match args.first() {
        Some(raw) => calendar::parse_month_arg(raw)?,
        None => (today.year(), today.month()),
    };

    let week_start = cfg
        .get("calendar.weekstart")
        .and_then(|raw| {
            let parsed = WeekStart::parse(&raw);
            if parsed.is_none() {
                warn!(value = %raw, "unknown calendar.weekstart; falling back to monday");
            }
            parsed
        })
        .unwrap_or(WeekStart::Monday);

    let horizon = cfg.get_usize("preview.count").unwrap_or(DEFAULT_INSTANCE_COUNT);
    let first = calendar::first_of_month(year, month)?;
    let length = calendar::days_in_month(year, month)?;
    let in_month = |date: NaiveDate| {
        date >= first && (date - first).num_days() < i64::from(length)
    };

    let pending = store.load_pending()?;
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    let plain = pending
        .iter()
        .filter(|task| task.status == Status::Pending && !task.is_recurring());
    for (day, bucket) in calendar::bucket_by_due(plain) {
        if in_month(day) {
            *counts.entry(day).or_default() += bucket.len();
        }
    }

    let recurring = pending
        .iter()
        .filter(|task| task.status == Status::Pending && task.is_recurring());
    for task in recurring {
        let Some(recur) = &task.recur else {
            continue;
        };
        // Project the series instead of the single stored due date so
        // later occurrences show up in the month as well.
        let start = task.due.unwrap_or(today);
        for instance in generate_instances(recur, task.uuid, start, horizon) {
            if in_month(instance.due) {
                *counts.entry(instance.due).or_default() += 1;
            }
        }
    }

    let weeks = calendar::month_grid(year, month, week_start)?;
    renderer.print_month(&calendar::month_title(year, month), week_start, &weeks, &counts)?;
    Ok(())
}

#[instrument(skip(store, filter_terms, today))]
fn cmd_export(
    store: &mut DataStore,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command export");

    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let filter = Filter::parse(filter_terms, today)?;

    let rows: Vec<Task> = pending
        .into_iter()
        .chain(completed)
        .filter(|task| filter.matches(task))
        .collect();

    let out = serde_json::to_string(&rows)?;
    println!("{out}");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_projects(store: &mut DataStore) -> anyhow::Result<()> {
    let pending = store.load_pending()?;
    let mut set = BTreeSet::new();
    for task in pending {
        if let Some(project) = task.project {
            set.insert(project);
        }
    }

    for project in set {
        println!("{project}");
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_tags(store: &mut DataStore) -> anyhow::Result<()> {
    let pending = store.load_pending()?;
    let mut set = BTreeSet::new();
    for task in pending {
        for tag in task.tags {
            set.insert(tag);
        }
    }

    for tag in set {
        println!("{tag}");
    }
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (k, v) in cfg.iter() {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Implemented commands: add, list/upcoming, info, modify, done, delete, undo, preview, calendar, export, projects, tags"
    );
    Ok(())
}

#[derive(Debug, Clone)]
enum Mod {
    TagAdd(String),
    TagRemove(String),
    Project(String),
    Due(NaiveDate),
    Recur(Recurrence),
    Until(NaiveDate),
    Count(u32),
}

#[instrument(skip(args, today))]
fn parse_desc_and_mods(args: &[String], today: NaiveDate) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut desc_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, today)? {
            mods.push(one_mod);
            continue;
        }

        desc_parts.push(arg.clone());
    }

    if desc_parts.is_empty() {
        return Err(anyhow!("add: description is required"));
    }

    Ok((desc_parts.join(" "), mods))
}

#[instrument(skip(args, today))]
fn parse_mods(args: &[String], today: NaiveDate) -> anyhow::Result<Vec<Mod>> {
    let mut mods = Vec::new();
    for arg in args {
        if let Some(one_mod) = parse_one_mod(arg, today)? {
            mods.push(one_mod);
        } else {
            warn!(arg = %arg, "unrecognized modifier token ignored");
        }
    }
    Ok(mods)
}

fn parse_one_mod(tok: &str, today: NaiveDate) -> anyhow::Result<Option<Mod>> {
    if let Some(tag) = tok.strip_prefix('+') {
        return Ok(Some(Mod::TagAdd(tag.to_string())));
    }
    if let Some(tag) = tok.strip_prefix('-') {
        return Ok(Some(Mod::TagRemove(tag.to_string())));
    }

    let (key, value) = if let Some((k, v)) = tok.split_once(':') {
        (k, v)
    } else if let Some((k, v)) = tok.split_once('=') {
        (k, v)
    } else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "project" => Ok(Some(Mod::Project(value.to_string()))),
        "due" => Ok(Some(Mod::Due(parse_date_expr(value, today)?))),
        "recur" => Ok(Some(Mod::Recur(Recurrence::parse(value)?))),
        "until" => Ok(Some(Mod::Until(parse_date_expr(value, today)?))),
        "count" => {
            let count: u32 = value
                .parse()
                .map_err(|_| anyhow!("count must be a number, got: {value}"))?;
            if count == 0 {
                return Err(anyhow!("count must be at least 1"));
            }
            Ok(Some(Mod::Count(count)))
        }
        _ => Ok(None),
    }
}

fn apply_mods(task: &mut Task, mods: &[Mod]) -> anyhow::Result<()> {
    let mut pattern = task.recur.as_ref().map(|recur| recur.pattern.clone());
    let mut until: Option<NaiveDate> = None;
    let mut count: Option<u32> = None;

    for one_mod in mods {
        match one_mod {
            Mod::TagAdd(tag) => {
                if task.tags.iter().all(|existing| existing != tag) {
                    task.tags.push(tag.clone());
                }
            }
            Mod::TagRemove(tag) => {
                task.tags.retain(|existing| existing != tag);
            }
            Mod::Project(project) => {
                task.project = Some(project.clone());
            }
            Mod::Due(date) => {
                task.due = Some(*date);
            }
            Mod::Recur(new_pattern) => {
                pattern = Some(new_pattern.clone());
            }
            Mod::Until(date) => {
                until = Some(*date);
            }
            Mod::Count(value) => {
                count = Some(*value);
            }
        }
    }

    let end = match (until, count) {
        (Some(_), Some(_)) => {
            return Err(anyhow!("until: and count: are mutually exclusive"));
        }
        (Some(date), None) => Some(SeriesEnd::Until { date }),
        (None, Some(value)) => Some(SeriesEnd::After { count: value }),
        (None, None) => None,
    };

    match (pattern, end) {
        (Some(pattern), end) => {
            let previous_end = task.recur.as_ref().map(|recur| recur.end.clone());
            task.recur = Some(Recur {
                pattern,
                end: end.or(previous_end).unwrap_or(SeriesEnd::Never),
            });
            if task.occurrence.is_none() {
                task.occurrence = Some(1);
            }
        }
        (None, Some(_)) => {
            return Err(anyhow!("until:/count: require a recur: pattern"));
        }
        (None, None) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{apply_mods, parse_desc_and_mods, spawn_successor};
    use crate::recur::{Recur, Recurrence, SeriesEnd};
    use crate::task::Task;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn terms(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn mods_assemble_a_recurrence_rule() {
        let today = date(2024, 1, 1);
        let (description, mods) = parse_desc_and_mods(
            &terms(&["Take", "out", "bins", "recur:weekly", "until:2024-03-01", "+home"]),
            today,
        )
        .expect("parse");
        assert_eq!(description, "Take out bins");

        let mut task = Task::new_pending(description, Utc::now(), 1);
        apply_mods(&mut task, &mods).expect("apply");

        assert_eq!(
            task.recur,
            Some(Recur {
                pattern: Recurrence::Weekly { interval: 1 },
                end: SeriesEnd::Until { date: date(2024, 3, 1) },
            })
        );
        assert_eq!(task.occurrence, Some(1));
        assert_eq!(task.tags, vec!["home".to_string()]);
    }

    #[test]
    fn end_policy_without_pattern_is_rejected() {
        let today = date(2024, 1, 1);
        let (_, mods) =
            parse_desc_and_mods(&terms(&["Oops", "count:5"]), today).expect("parse");

        let mut task = Task::new_pending("Oops".to_string(), Utc::now(), 1);
        assert!(apply_mods(&mut task, &mods).is_err());
    }

    #[test]
    fn completing_a_recurring_task_spawns_the_next_occurrence() {
        let now = Utc::now();
        let mut task = Task::new_pending("Stand-up notes".to_string(), now, 1);
        task.due = Some(date(2024, 1, 1));
        task.recur = Some(Recur::new(Recurrence::Weekly { interval: 2 }));
        task.occurrence = Some(1);

        let successor = spawn_successor(&task, now, 2).expect("successor");
        assert_eq!(successor.due, Some(date(2024, 1, 15)));
        assert_eq!(successor.occurrence, Some(2));
        assert_eq!(successor.parent, Some(task.uuid));
        assert_eq!(successor.recur, task.recur);
    }

    #[test]
    fn a_finished_series_spawns_nothing() {
        let now = Utc::now();
        let mut task = Task::new_pending("Limited run".to_string(), now, 1);
        task.due = Some(date(2024, 1, 3));
        task.recur = Some(Recur {
            pattern: Recurrence::Daily { interval: 1 },
            end: SeriesEnd::After { count: 3 },
        });
        task.occurrence = Some(3);

        assert!(spawn_successor(&task, now, 2).is_none());
    }
}
