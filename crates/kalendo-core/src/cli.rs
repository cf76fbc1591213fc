use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::event::{Category, Priority};
use crate::filter::CategoryFilter;

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
    name = "kalendo",
    version,
    about = "Kalendo: month, week and day calendar in the terminal",
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

    #[arg(long = "kalendorc")]
    pub kalendorc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render the 6x7 month grid
    Month(ViewArgs),
    /// Render the Monday-start week
    Week(ViewArgs),
    /// Render the hour timeline of one day
    Day(ViewArgs),
    /// List today's events
    Today {
        /// Category name, or "all"
        #[arg(
            long,
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<CategoryFilter>())
        )]
        category: CategoryFilter,
    },
    /// Table of all events, or of one day's events
    List {
        #[arg(long)]
        date: Option<String>,
    },
    /// Create an event
    Add {
        title: String,

        /// Start slot, e.g. "tomorrow 3pm" or "2025-03-20 15:00"; the event
        /// starts at the top of that hour
        #[arg(long)]
        at: Option<String>,

        #[command(flatten)]
        fields: EventFields,
    },
    /// Change fields of an existing event
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[command(flatten)]
        fields: EventFields,

        #[arg(long = "no-task", conflicts_with = "task")]
        no_task: bool,

        #[arg(long = "no-repeat", conflicts_with = "repeat")]
        no_repeat: bool,
    },
    /// Print every field of one event
    Show { id: String },
    Delete { id: String },
    /// Remove all events
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show or change the colour theme
    Theme {
        #[command(subcommand)]
        action: Option<ThemeAction>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
    /// Focus date, e.g. "today", "friday", "2025-03" or "2025-03-09"
    #[arg(long)]
    pub date: Option<String>,

    /// Move the focus by this many months, weeks or days
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub shift: i32,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EventFields {
    #[arg(long)]
    pub end: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Category>())
    )]
    pub category: Option<Category>,

    #[arg(long)]
    pub task: bool,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>())
    )]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub repeat: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeAction {
    Show,
    Toggle,
    Dark,
    Light,
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
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

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
