pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod reminder;
pub mod render;
pub mod reorder;
pub mod session;
pub mod shell;
pub mod storage;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;
use std::io::{
  self,
  BufReader
};

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting ticklist"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let kv =
    storage::FileKvStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at {}",
        data_dir.display()
      )
    })?;
  let mut store = store::TaskStore::open(
    kv,
    &cfg.storage_key()
  );

  let command = cli
    .command
    .unwrap_or(cli::TickCommand::Shell);
  let mut out = io::stdout();

  if command == cli::TickCommand::Shell
  {
    let surface =
      render::TableSurface::stdout(
        &cfg
      )?;
    let scanner =
      reminder::ReminderScanner::from_config(
        &cfg
      )?;
    let mut session =
      session::Session::new(
        store, surface, scanner
      );
    shell::run_shell(
      &mut session,
      BufReader::new(io::stdin()),
      &mut out,
      &cfg.date_format()
    )?;
  } else {
    let mut prompter =
      commands::StdioPrompter::new(
        BufReader::new(io::stdin()),
        io::stderr()
      );
    commands::dispatch(
      &mut store,
      &cfg,
      command,
      &mut out,
      &mut prompter
    )?;
  }

  info!("done");
  Ok(())
}
