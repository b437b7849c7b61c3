use std::io::{BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::datetime::{local_now, parse_date_expr};
use crate::render::{HtmlSurface, Surface};
use crate::session::{Event, Feedback, Session};
use crate::storage::KeyValueStore;
use crate::store::{Answer, Notice, Request};
use crate::task::Priority;
use crate::view::Filter;

const MAX_TICK_WAIT: Duration = Duration::from_secs(86_400);

pub const HELP: &str = "\
commands:
  add <text> [p:low|medium|high] [due:<when>]
  toggle <id>            mark done / not done
  delete <id>            asks for confirmation
  edit <id>              asks for the new text (empty keeps it, '.' cancels)
  clear                  remove completed tasks
  filter all|active|completed
  search [text]          empty text clears the search
  drag <id> <row>        move a visible task to row <row> (1-based)
  list                   redraw the list
  html                   print the list as HTML
  help
  quit";

/// One parsed shell line. Ids are still the raw prefixes typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        text: String,
        priority: Priority,
        due: Option<String>,
    },
    Toggle(String),
    Delete(String),
    Edit(String),
    Clear,
    Filter(Filter),
    Search(String),
    Drag { id: String, row: usize },
    List,
    Html,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let needs_id = |name: &str| -> anyhow::Result<String> {
        let id = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| anyhow!("usage: {name} <id>"))?;
        Ok(id.to_string())
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "add" | "a" => parse_add(rest)?,
        "toggle" | "t" | "done" => Command::Toggle(needs_id("toggle")?),
        "delete" | "del" | "rm" => Command::Delete(needs_id("delete")?),
        "edit" | "e" => Command::Edit(needs_id("edit")?),
        "clear" => Command::Clear,
        "filter" | "f" => Command::Filter(if rest.is_empty() {
            Filter::All
        } else {
            rest.parse()?
        }),
        "search" | "s" | "/" => Command::Search(rest.to_string()),
        "drag" | "mv" => {
            let mut parts = rest.split_whitespace();
            let (Some(id), Some(row)) = (parts.next(), parts.next()) else {
                return Err(anyhow!("usage: drag <id> <row>"));
            };
            let row = row
                .parse::<usize>()
                .ok()
                .filter(|r| *r > 0)
                .ok_or_else(|| anyhow!("row must be a positive number, got: {row}"))?;
            Command::Drag {
                id: id.to_string(),
                row,
            }
        }
        "list" | "ls" => Command::List,
        "html" => Command::Html,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(anyhow!("unknown command: {other} (try 'help')")),
    };

    Ok(Some(command))
}

fn parse_add(rest: &str) -> anyhow::Result<Command> {
    let mut words = Vec::new();
    let mut priority = Priority::Low;
    let mut due = None;

    for word in rest.split_whitespace() {
        if let Some(value) = word
            .strip_prefix("p:")
            .or_else(|| word.strip_prefix("priority:"))
        {
            priority = value.parse()?;
        } else if let Some(value) = word.strip_prefix("due:") {
            due = Some(value.to_string());
        } else {
            words.push(word);
        }
    }

    Ok(Command::Add {
        text: words.join(" "),
        priority,
        due,
    })
}

/// Interprets a line typed while a request is outstanding.
pub fn answer_for(request: &Request, line: &str) -> Answer {
    match request {
        Request::Confirm { .. } => {
            if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                Answer::Confirmed
            } else {
                Answer::Declined
            }
        }
        Request::Input { .. } => {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                Answer::Confirmed
            } else if line.trim() == "." {
                Answer::Cancelled
            } else {
                Answer::Text(line.to_string())
            }
        }
    }
}

fn prompt_text(request: &Request) -> String {
    match request {
        Request::Confirm { message } => format!("{message} [y/N]"),
        Request::Input { message, initial } => format!("{message} [{initial}]"),
    }
}

/// Lines from the input stream, read on a helper thread so the loop can
/// wait on them and the reminder timer at once.
struct InputLines {
    rx: mpsc::Receiver<String>,
}

impl InputLines {
    fn start<R>(input: R) -> anyhow::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("ticklist-input".to_string())
            .spawn(move || {
                for line in input.lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "failed reading input");
                            break;
                        }
                    }
                }
            })
            .context("failed to start input thread")?;
        Ok(Self { rx })
    }

    fn next_before(&self, deadline: Instant) -> Result<String, RecvTimeoutError> {
        self.rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
    }
}

/// Runs the interactive loop until `quit` or end of input. Reminder sweeps
/// happen every scanner interval, including while a request is waiting
/// for its answer.
#[tracing::instrument(skip_all)]
pub fn run_shell<S, U, R, W>(
    session: &mut Session<S, U>,
    input: R,
    out: &mut W,
    date_format: &str,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    U: Surface,
    R: BufRead + Send + 'static,
    W: Write,
{
    let interval = session.scanner().interval();
    let lines = InputLines::start(input)?;
    let mut next_tick = tick_after(Instant::now(), interval);

    session.start()?;
    info!(interval_secs = interval.as_secs(), "shell started");

    loop {
        match lines.next_before(next_tick) {
            Ok(line) => {
                if !handle_line(session, &line, out, date_format)? {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let feedback = session.handle(Event::Tick { now: local_now() })?;
                print_feedback(out, &feedback)?;
                next_tick = advance(next_tick, interval);
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("input closed");
                break;
            }
        }
    }

    Ok(())
}

fn advance(previous: Instant, interval: Duration) -> Instant {
    let next = tick_after(previous, interval);
    let now = Instant::now();
    if next < now { tick_after(now, interval) } else { next }
}

/// `from + interval`, capped at a day when the sum does not fit.
fn tick_after(from: Instant, interval: Duration) -> Instant {
    from.checked_add(interval)
        .or_else(|| from.checked_add(MAX_TICK_WAIT))
        .unwrap_or(from)
}

/// Returns `false` once the user asked to quit.
pub fn handle_line<S, U, W>(
    session: &mut Session<S, U>,
    line: &str,
    out: &mut W,
    date_format: &str,
) -> anyhow::Result<bool>
where
    S: KeyValueStore,
    U: Surface,
    W: Write,
{
    if let Some(request) = session.pending_request() {
        let answer = answer_for(request, line);
        let feedback = session.handle(Event::Answer(answer))?;
        print_feedback(out, &feedback)?;
        return Ok(true);
    }

    let command = match parse_command(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(true),
        Err(err) => {
            writeln!(out, "error: {err:#}")?;
            return Ok(true);
        }
    };

    match to_event(session, command) {
        Ok(Some(event)) => {
            let feedback = session.handle(event)?;
            print_feedback(out, &feedback)?;
        }
        Ok(None) => {}
        Err(Action::Quit) => return Ok(false),
        Err(Action::List) => session.refresh()?,
        Err(Action::Help) => writeln!(out, "{HELP}")?,
        Err(Action::Html) => {
            let mut html = HtmlSurface::new(date_format);
            html.render(&session.view())?;
            write!(out, "{}", html.list_html())?;
            writeln!(out, "<span id=\"count\">{}</span>", html.count_text())?;
        }
        Err(Action::Failed(err)) => writeln!(out, "error: {err:#}")?,
    }
    out.flush()?;

    Ok(true)
}

/// Shell commands that do not become session events.
enum Action {
    Quit,
    List,
    Help,
    Html,
    Failed(anyhow::Error),
}

fn to_event<S, U>(session: &mut Session<S, U>, command: Command) -> Result<Option<Event>, Action>
where
    S: KeyValueStore,
    U: Surface,
{
    let event = match command {
        Command::Add {
            text,
            priority,
            due,
        } => {
            let deadline = match due {
                Some(expr) => Some(parse_date_expr(&expr, local_now()).map_err(Action::Failed)?),
                None => None,
            };
            Event::Add {
                text,
                priority,
                deadline,
            }
        }
        Command::Toggle(id) => Event::Toggle {
            id: session.resolve_id(&id).map_err(Action::Failed)?,
        },
        Command::Delete(id) => Event::Delete {
            id: session.resolve_id(&id).map_err(Action::Failed)?,
        },
        Command::Edit(id) => Event::Edit {
            id: session.resolve_id(&id).map_err(Action::Failed)?,
        },
        Command::Clear => Event::ClearCompleted,
        Command::Filter(filter) => Event::SetFilter(filter),
        Command::Search(query) => Event::SetSearch(query),
        Command::Drag { id, row } => {
            let id = session.resolve_id(&id).map_err(Action::Failed)?;
            if !session.arrangement().contains(&id) {
                return Err(Action::Failed(anyhow!("task {id} is not visible")));
            }
            for event in [
                Event::DragStart { id },
                Event::DragTo { index: row - 1 },
            ] {
                session
                    .handle(event)
                    .map_err(Action::Failed)?;
            }
            Event::DragEnd
        }
        Command::List => return Err(Action::List),
        Command::Html => return Err(Action::Html),
        Command::Help => return Err(Action::Help),
        Command::Quit => return Err(Action::Quit),
    };

    Ok(Some(event))
}

fn print_feedback<W: Write>(out: &mut W, feedback: &[Feedback]) -> anyhow::Result<()> {
    for item in feedback {
        match item {
            Feedback::Notice(Notice::Error(message)) => writeln!(out, "error: {message}")?,
            Feedback::Notice(notice) => writeln!(out, "{}", notice.message())?,
            Feedback::Ask(request) => writeln!(out, "{}", prompt_text(request))?,
            Feedback::Reminder(message) => writeln!(out, "{message}")?,
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    use super::{Command, advance, answer_for, handle_line, parse_command, run_shell, tick_after};
    use crate::reminder::ReminderScanner;
    use crate::render::HtmlSurface;
    use crate::session::Session;
    use crate::storage::MemoryKvStore;
    use crate::store::{Answer, Request, TaskStore};
    use crate::task::Priority;
    use crate::view::Filter;

    const FORMAT: &str = "%Y-%m-%d %H:%M";

    fn session() -> Session<MemoryKvStore, HtmlSurface> {
        let store = TaskStore::open(MemoryKvStore::new(), "todo.tasks.v2").with_seed(3);
        Session::new(
            store,
            HtmlSurface::new(FORMAT),
            ReminderScanner::new(Duration::from_secs(3600), 5, false),
        )
    }

    fn run_lines(session: &mut Session<MemoryKvStore, HtmlSurface>, lines: &[&str]) -> String {
        let mut out = Vec::new();
        for line in lines {
            handle_line(session, line, &mut out, FORMAT).expect("handle line");
        }
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn parses_add_with_priority_and_due() {
        assert_eq!(
            parse_command("add Buy milk p:high due:tomorrow").expect("parse"),
            Some(Command::Add {
                text: "Buy milk".to_string(),
                priority: Priority::High,
                due: Some("tomorrow".to_string()),
            })
        );
        assert_eq!(parse_command("   ").expect("blank"), None);
        assert_eq!(
            parse_command("filter Completed").expect("filter"),
            Some(Command::Filter(Filter::Completed))
        );
        assert!(parse_command("drag abc 0").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn answers_follow_request_kind() {
        let confirm = Request::Confirm {
            message: "Delete this task?".to_string(),
        };
        assert_eq!(answer_for(&confirm, "Y"), Answer::Confirmed);
        assert_eq!(answer_for(&confirm, ""), Answer::Declined);

        let input = Request::Input {
            message: "Edit task:".to_string(),
            initial: "x".to_string(),
        };
        assert_eq!(answer_for(&input, "."), Answer::Cancelled);
        assert_eq!(answer_for(&input, ""), Answer::Confirmed);
        assert_eq!(answer_for(&input, "\n"), Answer::Confirmed);
        assert_eq!(answer_for(&input, "new"), Answer::Text("new".to_string()));
    }

    #[test]
    fn delete_waits_for_the_next_line() {
        let mut session = session();
        let out = run_lines(&mut session, &["add Buy milk"]);
        assert!(out.is_empty());
        let id = session.store().tasks()[0].id.clone();

        let out = run_lines(&mut session, &[&format!("delete {}", &id[..6])]);
        assert_eq!(out, "Delete this task? [y/N]\n");
        assert_eq!(session.store().tasks().len(), 1);

        run_lines(&mut session, &["yes"]);
        assert!(session.store().tasks().is_empty());
    }

    #[test]
    fn blank_edit_reports_error() {
        let mut session = session();
        run_lines(&mut session, &["add Buy milk"]);
        let id = session.store().tasks()[0].id.clone();

        let out = run_lines(&mut session, &[&format!("edit {id}"), "   "]);
        assert_eq!(out, "Edit task: [Buy milk]\nerror: Task cannot be empty.\n");
        assert_eq!(session.store().tasks()[0].text, "Buy milk");
    }

    #[test]
    fn empty_edit_answer_keeps_text() {
        let mut session = session();
        run_lines(&mut session, &["add Buy milk"]);
        let id = session.store().tasks()[0].id.clone();

        let out = run_lines(&mut session, &[&format!("edit {id}"), ""]);
        assert_eq!(out, "Edit task: [Buy milk]\n");
        assert!(session.pending_request().is_none());
        assert_eq!(session.store().tasks()[0].text, "Buy milk");
    }

    #[test]
    fn oversized_tick_interval_does_not_overflow() {
        let start = Instant::now();
        let next = tick_after(start, Duration::MAX);
        assert!(next > start);
        assert!(advance(start, Duration::MAX) > start);

        let store = TaskStore::open(MemoryKvStore::new(), "todo.tasks.v2");
        let mut session = Session::new(
            store,
            HtmlSurface::new(FORMAT),
            ReminderScanner::new(Duration::MAX, 5, false),
        );
        let mut out = Vec::new();
        run_shell(&mut session, Cursor::new("add one\nquit\n"), &mut out, FORMAT)
            .expect("shell");
        assert_eq!(session.store().tasks().len(), 1);
    }

    #[test]
    fn clear_with_nothing_completed_informs() {
        let mut session = session();
        let out = run_lines(&mut session, &["add a", "clear"]);
        assert_eq!(out, "No completed tasks.\n");
    }

    #[test]
    fn unknown_id_is_reported_not_fatal() {
        let mut session = session();
        let out = run_lines(&mut session, &["toggle nope"]);
        assert!(out.starts_with("error: no task matches id nope"));
    }

    #[test]
    fn drag_moves_row_and_persists() {
        let mut session = session();
        run_lines(&mut session, &["add C", "add B", "add A"]);
        let c = session.store().tasks()[2].id.clone();

        run_lines(&mut session, &[&format!("drag {c} 1")]);
        let texts: Vec<&str> = session
            .store()
            .tasks()
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["C", "A", "B"]);
    }

    #[test]
    fn run_shell_stops_at_quit() {
        let mut session = session();
        let input = Cursor::new("add one\nadd two\nquit\nadd three\n");
        let mut out = Vec::new();

        run_shell(&mut session, input, &mut out, FORMAT).expect("shell");
        assert_eq!(session.store().tasks().len(), 2);
    }

    #[test]
    fn html_command_prints_markup() {
        let mut session = session();
        let out = run_lines(&mut session, &["add <b>bold</b>", "html"]);
        assert!(out.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(out.contains("<span id=\"count\">1 active • 1 total</span>"));
    }
}
