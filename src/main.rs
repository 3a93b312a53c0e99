//! worktree / wt - jump between Git worktrees from the shell
//!
//! `cd "$(wt)"` opens the picker; `wt list`, `wt switch <name>` and
//! `wt clone <url>` cover the non-interactive cases.
//!
//! Worktree names complete after `source <(COMPLETE=bash wt)` (or zsh, fish).

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::engine::{ArgValueCandidates, CompletionCandidate};
use clap_complete::CompleteEnv;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use worktree::commands::{self, ListArgs};
use worktree::config::{self, Settings};
use worktree::GitCli;

/// Exit status when the picker is dismissed, as for a shell interrupted by ^C
const EXIT_CANCELLED: u8 = 130;

/// Git worktree CLI utility
#[derive(Parser)]
#[command(name = "wt", version)]
#[command(
    about = "Git worktree CLI utility",
    long_about = "CLI utility to easily navigate between Git worktrees, list them, clone a multiple-worktrees-enabled repo, etc."
)]
struct Cli {
    /// Write the resulting path to FILE instead of stdout (shell integration)
    #[arg(long, global = true, value_name = "FILE")]
    cwd_file: Option<PathBuf>,

    /// Worktree to switch to; opens the picker when omitted
    #[arg(add = ArgValueCandidates::new(worktree_candidates))]
    name: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List worktrees
    #[command(alias = "ls")]
    List {
        /// Prefix each line with its index
        #[arg(short, long)]
        index: bool,

        /// Show paths without abbreviating the home directory
        #[arg(long)]
        full_path: bool,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move to a worktree (`-` goes back to the previous one)
    #[command(visible_aliases = ["s", "cd"])]
    Switch {
        /// Worktree name, its trailing path components
        #[arg(add = ArgValueCandidates::new(worktree_candidates))]
        name: String,
    },

    /// Clone a repository (as bare) and its branches as local worktrees
    Clone {
        /// Repository URL
        url: String,

        /// Target directory (defaults to the last URL component)
        path: Option<PathBuf>,

        /// Create local worktrees for all branches
        #[arg(short, long)]
        all: bool,
    },
}

fn worktree_candidates() -> Vec<CompletionCandidate> {
    commands::worktree_names(&GitCli::new())
        .into_iter()
        .map(CompletionCandidate::new)
        .collect()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct JustTime;

impl tracing_subscriber::fmt::time::FormatTime for JustTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S"))
    }
}

/// File logging only: the terminal carries the picker and the chosen path
fn init_logging(settings: &Settings) -> Result<WorkerGuard> {
    if let Some(dir) = settings.log_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.log_file)
        .with_context(|| format!("Failed to open log file {}", settings.log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact()
                .with_timer(JustTime)
                .with_span_events(fmt::format::FmtSpan::CLOSE),
        )
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Answers the shell and exits when invoked with `COMPLETE=<shell>`
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let _guard = match init_logging(&settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("worktree: Logging disabled: {e:#}");
            None
        }
    };

    info!("Starting worktree");

    match run(cli, &settings).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("worktree: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: &Settings) -> Result<ExitCode> {
    let git = GitCli::new();
    let cwd_file = cli.cwd_file.as_deref();

    match (cli.command, cli.name) {
        (
            Some(Commands::List {
                index,
                full_path,
                json,
            }),
            _,
        ) => {
            let args = ListArgs {
                with_index: index,
                full_path,
                json,
            };
            let mut stdout = io::stdout().lock();
            commands::list(&git, settings, args, &mut stdout)?;
            stdout.flush()?;
        }

        (Some(Commands::Switch { name }), _) | (None, Some(name)) => {
            let path = commands::switch(&git, &name)?;
            finish_switch(&git, &path, cwd_file)?;
        }

        (Some(Commands::Clone { url, path, all }), _) => {
            let path = commands::clone(&git, &url, path, all)?;
            info!(path = %path.display(), "Clone finished");
        }

        (None, None) => match commands::select(&git, settings).await? {
            Some(path) => finish_switch(&git, &path, cwd_file)?,
            None => {
                info!("Selection cancelled");
                return Ok(ExitCode::from(EXIT_CANCELLED));
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn finish_switch(git: &GitCli, path: &Path, cwd_file: Option<&Path>) -> Result<()> {
    config::remember_current_dir(git);
    commands::emit_path(path, cwd_file, &mut io::stdout().lock())
}
