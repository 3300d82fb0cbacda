use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::calendar::WeekStart;
use crate::config::Config;
use crate::datetime::format_calendar_date;
use crate::series::TaskInstance;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks, today))]
    pub fn print_task_table(&mut self, tasks: &[Task], today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Due", "Recur", "Project", "Description", "Tags"];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = task
                .id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string());
            let id = self.paint(&id, "33");

            let due = match task.due {
                Some(due) if due < today => self.paint(&format_calendar_date(due), "31"),
                Some(due) => format_calendar_date(due),
                None => String::new(),
            };

            let recur = task
                .recur
                .as_ref()
                .map(|recur| recur.pattern.describe())
                .unwrap_or_default();

            let tags = task
                .tags
                .iter()
                .map(|tag| format!("+{tag}"))
                .collect::<Vec<_>>()
                .join(" ");

            rows.push(vec![
                id,
                due,
                recur,
                task.project.clone().unwrap_or_default(),
                task.description.clone(),
                tags,
            ]);
        }

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, instances))]
    pub fn print_instance_table(&mut self, instances: &[TaskInstance]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["#", "Due", "Day"];

        let rows = instances
            .iter()
            .enumerate()
            .map(|(idx, instance)| {
                vec![
                    (idx + 1).to_string(),
                    format_calendar_date(instance.due),
                    instance.due.format("%a").to_string(),
                ]
            })
            .collect();

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(
            out,
            "id          {}",
            task.id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(out, "uuid        {}", task.uuid)?;
        writeln!(out, "status      {:?}", task.status)?;
        writeln!(out, "desc        {}", task.description)?;
        writeln!(out, "project     {}", task.project.clone().unwrap_or_default())?;
        writeln!(out, "tags        {}", task.tags.join(", "))?;
        writeln!(out, "recurrence  {}", task.recurrence_summary())?;

        if let Some(recur) = &task.recur {
            writeln!(out, "series      {}", recur.end.describe())?;
            writeln!(out, "occurrence  {}", task.occurrence_index())?;
        }
        if let Some(parent) = task.parent {
            writeln!(out, "parent      {parent}")?;
        }
        if let Some(due) = task.due {
            writeln!(out, "due         {}", format_calendar_date(due))?;
        }

        writeln!(out, "entry       {}", task.entry.format("%Y%m%dT%H%M%SZ"))?;
        writeln!(out, "modified    {}", task.modified.format("%Y%m%dT%H%M%SZ"))?;
        if let Some(end) = task.end {
            writeln!(out, "end         {}", end.format("%Y%m%dT%H%M%SZ"))?;
        }

        Ok(())
    }

    /// Month grid with a marker on days that have something due, followed
    /// by per-day counts.
    #[tracing::instrument(skip(self, weeks, buckets))]
    pub fn print_month(
        &mut self,
        title: &str,
        week_start: WeekStart,
        weeks: &[[Option<NaiveDate>; 7]],
        buckets: &BTreeMap<NaiveDate, usize>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "{title}")?;
        writeln!(out, "{}", week_start.labels().join("  "))?;

        for week in weeks {
            let mut cells = Vec::with_capacity(7);
            for slot in week {
                match slot {
                    Some(day) => {
                        let marker = if buckets.contains_key(day) { "*" } else { " " };
                        let cell = format!("{:>2}{marker}", day.day());
                        if buckets.contains_key(day) {
                            cells.push(self.paint(&cell, "36"));
                        } else {
                            cells.push(cell);
                        }
                    }
                    None => cells.push("   ".to_string()),
                }
            }
            writeln!(out, "{}", cells.join(" "))?;
        }

        if !buckets.is_empty() {
            writeln!(out)?;
            for (day, count) in buckets {
                writeln!(out, "{}  {} due", format_calendar_date(*day), count)?;
            }
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| UnicodeWidthStr::width(*h)).collect();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(visible_width(cell));
            }
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, &width)| format!("{header:<width$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" "))?;

    let rule_line: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule_line.join(" "))?;

    for row in rows {
        let mut line = String::new();
        for (idx, cell) in row.iter().enumerate() {
            let width = widths.get(idx).copied().unwrap_or(0);
            let padding = width.saturating_sub(visible_width(cell));
            line.push_str(cell);
            line.push_str(&" ".repeat(padding));
            line.push(' ');
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

/// Display width excluding ANSI color sequences.
fn visible_width(text: &str) -> usize {
    let mut width = 0;
    let mut rest = text;

    while let Some(start) = rest.find('\x1b') {
        width += UnicodeWidthStr::width(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('m') {
            Some(end) => rest = &tail[end + 1..],
            None => return width,
        }
    }

    width + UnicodeWidthStr::width(rest)
}
