//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use console::style;

use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::task_store::TaskStats;

fn status_cell(status: TaskStatus) -> Cell {
    let text = status.as_str();
    let styled = match status {
        TaskStatus::Completed => style(text).green(),
        TaskStatus::Failed => style(text).red(),
        TaskStatus::InProgress | TaskStatus::Claimed => style(text).yellow(),
        TaskStatus::Blocked => style(text).magenta(),
        TaskStatus::Ready | TaskStatus::Pending => style(text).dim(),
    };
    Cell::new(styled.to_string())
}

/// Render a task list.
pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["id", "title", "status", "priority", "retries", "agent"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(short_id(&task.id.to_string())),
            Cell::new(&task.title),
            status_cell(task.status),
            Cell::new(task.priority.as_str()),
            Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
            Cell::new(
                task.assigned_agent
                    .map(|a| short_id(&a.to_string()))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table
}

/// Render one task in detail.
pub fn task_detail(task: &Task) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.add_row(vec!["id".to_string(), task.id.to_string()]);
    table.add_row(vec!["title".to_string(), task.title.clone()]);
    table.add_row(vec!["description".to_string(), task.description.clone()]);
    table.add_row(vec!["status".to_string(), task.status.as_str().to_string()]);
    table.add_row(vec!["priority".to_string(), task.priority.as_str().to_string()]);
    table.add_row(vec![
        "skills".to_string(),
        task.required_skills.iter().cloned().collect::<Vec<_>>().join(", "),
    ]);
    table.add_row(vec![
        "dependencies".to_string(),
        task.dependencies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    ]);
    table.add_row(vec![
        "retries".to_string(),
        format!("{}/{}", task.retry_count, task.max_retries),
    ]);
    if let Some(error) = &task.last_error {
        table.add_row(vec!["last error".to_string(), error.clone()]);
    }
    if let Some(kind) = task.failure_type {
        table.add_row(vec!["failure type".to_string(), kind.as_str().to_string()]);
    }
    if let Some(minutes) = task.actual_minutes {
        table.add_row(vec!["actual minutes".to_string(), minutes.to_string()]);
    }
    table
}

/// Render queue statistics.
pub fn stats_table(stats: &TaskStats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_header(vec!["status", "count"]);
    for status in [
        TaskStatus::Pending,
        TaskStatus::Ready,
        TaskStatus::Blocked,
        TaskStatus::Claimed,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        table.add_row(vec![
            Cell::new(status.as_str()),
            Cell::new(stats.count(status).to_string()),
        ]);
    }
    table.add_row(vec![Cell::new("total"), Cell::new(stats.total.to_string())]);
    table
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
