use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::Priority;
use crate::view::Filter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tick",
    version,
    about = "Ticklist: a task list with priorities, deadlines and reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    /// rc file to read instead of $TICKLISTRC / ~/.ticklistrc
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<TickCommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum TickCommand {
    /// Add a task to the top of the list
    Add {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        #[arg(
            short = 'p',
            long = "priority",
            default_value = "low",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>())
        )]
        priority: Priority,

        /// Deadline: a date/time, now, today, tomorrow, a weekday, 15:30, 3pm, +2h ...
        #[arg(short = 'd', long = "due")]
        due: Option<String>,
    },

    /// Show the task list
    List {
        #[arg(
            short = 'f',
            long = "filter",
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Filter>())
        )]
        filter: Filter,

        #[arg(short = 's', long = "search")]
        search: Option<String>,

        /// Print HTML markup instead of a table
        #[arg(long = "html")]
        html: bool,
    },

    /// Mark a task done, or not done again
    Toggle { id: String },

    Delete {
        id: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Replace a task's text; prompts when no text is given
    Edit { id: String, text: Vec<String> },

    /// Remove every completed task
    Clear {
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Put tasks in the given order
    Reorder {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },

    /// Print reminders for tasks due soon
    Remind {
        /// Evaluate at this time instead of now
        #[arg(long = "at")]
        at: Option<String>,
    },

    /// Interactive session with periodic reminders (default)
    Shell,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{GlobalCli, TickCommand, preprocess_args};
    use crate::task::Priority;
    use crate::view::Filter;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn captures_positional_rc_overrides() {
        let pre = preprocess_args(&os(&["tick", "rc.color=off", "list", "rc.reminder.window:10"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["tick", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.reminder.window".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn parses_add_with_options() {
        let cli = GlobalCli::try_parse_from([
            "tick", "-v", "add", "Call", "Mom", "--priority", "High", "--due", "tomorrow",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 1);
        assert_eq!(
            cli.command,
            Some(TickCommand::Add {
                text: vec!["Call".to_string(), "Mom".to_string()],
                priority: Priority::High,
                due: Some("tomorrow".to_string()),
            })
        );
    }

    #[test]
    fn list_defaults_to_all() {
        let cli = GlobalCli::try_parse_from(["tick", "--rc", "color=off", "list"]).expect("parse");
        assert_eq!(cli.rc_overrides[0].key, "color");
        assert_eq!(
            cli.command,
            Some(TickCommand::List {
                filter: Filter::All,
                search: None,
                html: false,
            })
        );
    }

    #[test]
    fn no_subcommand_means_shell() {
        let cli = GlobalCli::try_parse_from(["tick"]).expect("parse");
        assert_eq!(cli.command, None);
        assert!(GlobalCli::try_parse_from(["tick", "add"]).is_err());
        assert!(GlobalCli::try_parse_from(["tick", "list", "--filter", "later"]).is_err());
    }
}
