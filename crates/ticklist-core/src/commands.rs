use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::cli::TickCommand;
use crate::config::Config;
use crate::datetime::{local_now, parse_date_expr};
use crate::reminder::ReminderScanner;
use crate::render::{HtmlSurface, Surface, TableSurface, color_enabled};
use crate::storage::KeyValueStore;
use crate::store::{Notice, Outcome, Prompter, TaskStore};
use crate::task::Priority;
use crate::view::{Filter, project};

/// Asks on a writer and reads answers line by line. End of input declines
/// or cancels.
pub struct StdioPrompter<R: BufRead, W: Write> {
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> StdioPrompter<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    fn ask_line(&mut self, prompt: &str) -> Option<String> {
        if let Err(err) = write!(self.out, "{prompt} ").and_then(|()| self.out.flush()) {
            warn!(error = %err, "failed writing prompt");
            return None;
        }

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(err) => {
                warn!(error = %err, "failed reading answer");
                None
            }
        }
    }
}

impl<R: BufRead, W: Write> Prompter for StdioPrompter<R, W> {
    fn confirm(&mut self, message: &str) -> bool {
        self.ask_line(&format!("{message} [y/N]"))
            .is_some_and(|a| matches!(a.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    /// An empty line keeps `initial`; a lone `.` cancels.
    fn input(&mut self, message: &str, initial: &str) -> Option<String> {
        match self.ask_line(&format!("{message} [{initial}]"))? {
            answer if answer.is_empty() => Some(initial.to_string()),
            answer if answer.trim() == "." => None,
            answer => Some(answer),
        }
    }
}

/// Stands in for the user when `--yes` was given.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&mut self, _message: &str) -> bool {
        true
    }

    fn input(&mut self, _message: &str, _initial: &str) -> Option<String> {
        None
    }
}

#[instrument(skip(store, cfg, out, prompter))]
pub fn dispatch<S, W, P>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    command: TickCommand,
    out: &mut W,
    prompter: &mut P,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
    P: Prompter,
{
    debug!(?command, "dispatching command");

    match command {
        TickCommand::Add {
            text,
            priority,
            due,
        } => cmd_add(store, out, &text.join(" "), priority, due.as_deref()),
        TickCommand::List {
            filter,
            search,
            html,
        } => cmd_list(store, cfg, out, filter, search.as_deref().unwrap_or(""), html),
        TickCommand::Toggle { id } => cmd_toggle(store, out, &id),
        TickCommand::Delete { id, yes } => {
            let id = store.resolve_id(&id)?;
            let outcome = if yes {
                store.delete(&id, &mut AssumeYes)?
            } else {
                store.delete(&id, prompter)?
            };
            report(out, &outcome, &format!("Deleted task {}.", short(&id)))
        }
        TickCommand::Edit { id, text } => {
            let id = store.resolve_id(&id)?;
            let outcome = if text.is_empty() {
                store.edit(&id, prompter)?
            } else {
                store.replace_text(&id, &text.join(" "))?
            };
            report(out, &outcome, &format!("Modified task {}.", short(&id)))
        }
        TickCommand::Clear { yes } => {
            let outcome = if yes {
                store.clear_completed(&mut AssumeYes)?
            } else {
                store.clear_completed(prompter)?
            };
            report(out, &outcome, "Cleared completed tasks.")
        }
        TickCommand::Reorder { ids } => cmd_reorder(store, cfg, out, &ids),
        TickCommand::Remind { at } => cmd_remind(store, cfg, out, at.as_deref()),
        TickCommand::Shell => Err(anyhow!("the shell needs an interactive session")),
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Prints the outcome's notice, or `done` when the list changed. Error
/// notices fail the command.
fn report<W: Write>(out: &mut W, outcome: &Outcome, done: &str) -> anyhow::Result<()> {
    match &outcome.notice {
        Some(Notice::Error(message)) => return Err(anyhow!("{message}")),
        Some(notice) => writeln!(out, "{}", notice.message())?,
        None => {}
    }
    if outcome.changed {
        writeln!(out, "{done}")?;
    }
    Ok(())
}

#[instrument(skip(store, out, text))]
fn cmd_add<S: KeyValueStore, W: Write>(
    store: &mut TaskStore<S>,
    out: &mut W,
    text: &str,
    priority: Priority,
    due: Option<&str>,
) -> anyhow::Result<()> {
    info!("command add");

    let deadline = due
        .map(|expr| parse_date_expr(expr, local_now()))
        .transpose()?;

    match store.add(text, priority, deadline)? {
        Some(id) => writeln!(out, "Added task {}.", short(&id))?,
        None => debug!("blank text; nothing added"),
    }
    Ok(())
}

#[instrument(skip(store, cfg, out))]
fn cmd_list<S: KeyValueStore, W: Write>(
    store: &TaskStore<S>,
    cfg: &Config,
    out: &mut W,
    filter: Filter,
    search: &str,
    html: bool,
) -> anyhow::Result<()> {
    info!("command list");
    let view = project(store.tasks(), filter, search);

    if html {
        let mut surface = HtmlSurface::new(&cfg.date_format());
        surface.render(&view)?;
        write!(out, "{}", surface.list_html())?;
        writeln!(out, "<span id=\"count\">{}</span>", surface.count_text())?;
    } else {
        let color = color_enabled(cfg)? && io::stdout().is_terminal();
        TableSurface::new(&mut *out, color, &cfg.date_format()).render(&view)?;
    }
    Ok(())
}

#[instrument(skip(store, out))]
fn cmd_toggle<S: KeyValueStore, W: Write>(
    store: &mut TaskStore<S>,
    out: &mut W,
    id: &str,
) -> anyhow::Result<()> {
    info!("command toggle");
    let id = store.resolve_id(id)?;
    let outcome = store.toggle_complete(&id)?;

    let completed = store.get(&id).is_some_and(|t| t.completed);
    let done = if completed {
        format!("Completed task {}.", short(&id))
    } else {
        format!("Reopened task {}.", short(&id))
    };
    writeln!(out, "{done}")?;
    if let Some(notice) = &outcome.notice {
        writeln!(out, "{}", notice.message())?;
    }
    Ok(())
}

#[instrument(skip(store, cfg, out, ids))]
fn cmd_reorder<S: KeyValueStore, W: Write>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    out: &mut W,
    ids: &[String],
) -> anyhow::Result<()> {
    info!("command reorder");

    let mut resolved = Vec::with_capacity(ids.len());
    for prefix in ids {
        match store.resolve_id(prefix) {
            Ok(id) => resolved.push(id),
            Err(err) => warn!(error = %err, "skipping id"),
        }
    }

    store.reorder(&resolved)?;
    cmd_list(store, cfg, out, Filter::All, "", false)
}

#[instrument(skip(store, cfg, out))]
fn cmd_remind<S: KeyValueStore, W: Write>(
    store: &TaskStore<S>,
    cfg: &Config,
    out: &mut W,
    at: Option<&str>,
) -> anyhow::Result<()> {
    info!("command remind");

    let now = match at {
        Some(expr) => parse_date_expr(expr, local_now())?,
        None => local_now(),
    };
    let mut scanner = ReminderScanner::from_config(cfg)?;
    for message in scanner.scan(store.tasks(), now) {
        writeln!(out, "{message}")?;
    }
    Ok(())
}
