//! Command handlers for the task and status subcommands.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::cli::display;
use crate::cli::TaskCommands;
use crate::domain::models::{Task, TaskFilter, TaskPriority, TaskStatus};
use crate::domain::ports::task_store::TaskStore;

pub async fn handle_task(command: TaskCommands, store: Arc<dyn TaskStore>) -> Result<()> {
    match command {
        TaskCommands::Add {
            title,
            description,
            priority,
            skills,
            depends_on,
            estimate,
        } => {
            let priority = TaskPriority::parse_str(&priority)
                .with_context(|| format!("unknown priority: {priority}"))?;
            let mut task = Task::new(title, description).with_priority(priority);
            for skill in skills {
                task.required_skills.insert(skill);
            }
            for dep in depends_on {
                let id = Uuid::parse_str(&dep)
                    .with_context(|| format!("dependency is not a task id: {dep}"))?;
                task = task.with_dependency(id);
            }
            task.estimated_minutes = estimate;

            let task = store.create(task).await?;
            println!("created task {}", task.id);
            Ok(())
        }
        TaskCommands::List { status } => {
            let filter = match status {
                Some(raw) => {
                    let status = TaskStatus::parse_str(&raw)
                        .with_context(|| format!("unknown status: {raw}"))?;
                    TaskFilter::by_status(status)
                }
                None => TaskFilter::default(),
            };
            let tasks = store.list(filter).await?;
            println!("{}", display::task_table(&tasks));
            Ok(())
        }
        TaskCommands::Show { id } => {
            let id = Uuid::parse_str(&id).context("invalid task id")?;
            match store.get(id).await? {
                Some(task) => {
                    println!("{}", display::task_detail(&task));
                    Ok(())
                }
                None => bail!("task {id} not found"),
            }
        }
    }
}

pub async fn handle_status(store: Arc<dyn TaskStore>) -> Result<()> {
    let stats = store.stats().await?;
    println!("{}", display::stats_table(&stats));
    Ok(())
}
