//! What each subcommand does, kept apart from argument parsing

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, info_span};

use crate::config::{self, Settings};
use crate::error::Error;
use crate::format::{format_lines, format_list, ListOptions};
use crate::git::{self, GitRunner};
use crate::model::Worktree;
use crate::picker::{self, PickerOptions};

/// Commits shown in the picker's preview pane
const PREVIEW_COMMITS: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct ListArgs {
    pub with_index: bool,
    pub full_path: bool,
    pub json: bool,
}

fn snapshot(git: &dyn GitRunner) -> Result<Vec<Worktree>> {
    git::list_worktrees(git).context("Could not get Git worktrees")
}

/// Print the worktree list, home abbreviated to `~` unless `full_path`
pub fn list(
    git: &dyn GitRunner,
    settings: &Settings,
    args: ListArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let worktrees = snapshot(git)?;

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &worktrees)?;
        writeln!(out)?;
        return Ok(());
    }

    let options = ListOptions {
        with_index: args.with_index,
        home: if args.full_path {
            None
        } else {
            settings.home_abbreviation("~")
        },
    };
    out.write_all(format_list(&worktrees, &options).as_bytes())?;
    Ok(())
}

/// Path of the worktree called `name`; `-` is the remembered last worktree
pub fn switch(git: &dyn GitRunner, name: &str) -> Result<PathBuf> {
    let _span = info_span!("switch", name).entered();

    if name == "-" {
        let last = config::last_worktree(git)
            .context("Could not read last worktree")?
            .ok_or(Error::NoLastWorktree)?;
        info!(path = %last.display(), "Switching back to last worktree");
        return Ok(last);
    }

    let worktrees = snapshot(git)?;
    let found = git::find_by_name(&worktrees, name)?;
    info!(path = %found.path.display(), "Worktree found");
    Ok(found.path.clone())
}

/// Last path component of every worktree, for shell completion of
/// `switch <name>`. Completion stays silent, so failures yield no names.
pub fn worktree_names(git: &dyn GitRunner) -> Vec<String> {
    match git::list_worktrees(git) {
        Ok(worktrees) => worktrees.iter().map(Worktree::name).collect(),
        Err(e) => {
            debug!(error = %e, "No worktree names to complete");
            Vec::new()
        }
    }
}

/// Let the user pick a worktree interactively. `None` when cancelled.
pub async fn select(git: &dyn GitRunner, settings: &Settings) -> Result<Option<PathBuf>> {
    let worktrees = snapshot(git)?;

    let options = ListOptions {
        with_index: true,
        home: settings.home_abbreviation("$HOME"),
    };
    let lines = format_lines(&worktrees, &options);

    let chosen = picker::pick(lines, &PickerOptions::default(), |i| {
        preview(git, &worktrees, i)
    })
    .await?;

    Ok(chosen
        .and_then(|i| git::path_at(&worktrees, i))
        .map(Path::to_path_buf))
}

fn preview(git: &dyn GitRunner, worktrees: &[Worktree], index: usize) -> Vec<String> {
    let Some(path) = git::path_at(worktrees, index) else {
        return Vec::new();
    };
    git::recent_log(git, path, PREVIEW_COMMITS).unwrap_or_else(|e| vec![e.to_string()])
}

/// Directory a clone of `url` lands in when none is given
pub fn clone_dir_from_url(url: &str) -> Result<PathBuf> {
    url.trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .filter(|name| !name.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("Invalid repository URL: {url}"))
}

/// Clone `url` without a checkout, mark it bare and add worktrees for the
/// default branch, or for every remote branch with `all`.
pub fn clone(git: &dyn GitRunner, url: &str, path: Option<PathBuf>, all: bool) -> Result<PathBuf> {
    let _span = info_span!("clone", url).entered();

    let path = match path {
        Some(path) => path,
        None => clone_dir_from_url(url)?,
    };

    git::clone_no_checkout(git, url, &path)?;

    let repo = git::in_dir(git, &path);
    git::set_core_bare(&repo)?;

    let branches = if all {
        git::remote_branches(&repo)?
    } else {
        vec![git::default_branch(&repo).context("Could not determine default branch")?]
    };

    for branch in &branches {
        info!(branch, "Adding worktree");
        git::add_tracking_worktree(&repo, branch)?;
    }

    Ok(path)
}

/// Hand a path to the invoking shell: into `cwd_file` if given, else stdout.
/// The path is written as raw bytes so non-UTF-8 names still `cd`.
pub fn emit_path(path: &Path, cwd_file: Option<&Path>, out: &mut dyn Write) -> Result<()> {
    match cwd_file {
        Some(file_path) => {
            let mut file = File::create(file_path)
                .with_context(|| format!("Could not write {}", file_path.display()))?;
            write_path_line(&mut file, path)?;
        }
        None => write_path_line(out, path)?,
    }
    Ok(())
}

fn write_path_line(out: &mut dyn Write, path: &Path) -> std::io::Result<()> {
    out.write_all(path.as_os_str().as_encoded_bytes())?;
    out.write_all(b"\n")
}
