use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;

use crate::datetime::format_display;
use crate::task::{Priority, Task};

pub const EMPTY_PLACEHOLDER: &str = "No tasks found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
}

impl Filter {
    pub fn as_str(self) -> &'static str {
        match self {
            Filter::All => "all",
            Filter::Active => "active",
            Filter::Completed => "completed",
        }
    }

    pub fn matches(self, task: &Task) -> bool {
        match self {
            Filter::All => true,
            Filter::Active => !task.completed,
            Filter::Completed => task.completed,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Filter::All),
            "active" => Ok(Filter::Active),
            "completed" | "done" => Ok(Filter::Completed),
            other => Err(anyhow!("invalid filter: {other} (expected all, active or completed)")),
        }
    }
}

/// One visible row, in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub priority: Priority,
    pub deadline: Option<NaiveDateTime>,
}

impl RowView {
    pub fn priority_badge(&self) -> String {
        format!("({})", self.priority)
    }

    pub fn due_label(&self, layout: &str) -> Option<String> {
        self.deadline
            .as_ref()
            .map(|dt| format!("Due: {}", format_display(dt, layout)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub remaining: usize,
    pub total: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} active • {} total", self.remaining, self.total)
    }
}

/// Everything a surface needs for one full re-render. An empty `rows`
/// means the placeholder row is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewModel {
    pub filter: Filter,
    pub query: String,
    pub rows: Vec<RowView>,
    pub summary: Summary,
}

impl ViewModel {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.id.clone()).collect()
    }
}

/// Case-insensitive substring match on the task text. A blank query
/// matches every task.
pub fn matches_query(task: &Task, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    task.text.to_lowercase().contains(&query.to_lowercase())
}

#[tracing::instrument(skip(tasks), fields(tasks = tasks.len()))]
pub fn project(tasks: &[Task], filter: Filter, query: &str) -> ViewModel {
    let rows = tasks
        .iter()
        .filter(|t| filter.matches(t) && matches_query(t, query))
        .map(|t| RowView {
            id: t.id.clone(),
            text: t.text.clone(),
            completed: t.completed,
            priority: t.priority,
            deadline: t.deadline,
        })
        .collect::<Vec<_>>();

    let summary = Summary {
        remaining: tasks.iter().filter(|t| !t.completed).count(),
        total: tasks.len(),
    };
    tracing::trace!(visible = rows.len(), %summary, "projected view");

    ViewModel {
        filter,
        query: query.trim().to_string(),
        rows,
        summary,
    }
}
