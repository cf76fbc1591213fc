pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod event;
pub mod filter;
pub mod format;
pub mod grid;
pub mod render;
pub mod storage;

use std::ffi::OsString;

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
    "starting kalendo"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.kalendorc.as_deref()
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

  let storage =
    storage::FileStorage::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at {}",
        data_dir.display()
      )
    })?;

  let timezone =
    datetime::resolve_calendar_timezone(
      cfg.get("timezone").as_deref()
    );
  let fallback_theme =
    cfg.default_theme()?;

  let mut session =
    commands::Session {
      events: datastore::EventStore::open(
        storage.clone()
      ),
      theme: datastore::ThemeStore::open(
        storage,
        fallback_theme
      ),
      clock: datetime::SystemClock::new(
        timezone
      ),
      cfg
    };

  commands::dispatch(
    &mut session,
    cli.command
  )?;

  info!("done");
  Ok(())
}
