//! Per-invocation settings and the last visited worktree, kept in git config

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::format::HomeAbbreviation;
use crate::git::GitRunner;

/// git config key holding the directory the user switched away from.
/// Lives in its own section, `worktree.*` belongs to git.
pub const LAST_WORKTREE_KEY: &str = "wt.lastworktree";

/// Overrides the log file location
pub const LOG_FILE_ENV: &str = "WT_LOG_FILE";

/// `git config --get` exit code for a key that is not set
const UNSET_KEY_CODE: i32 = 1;

const APP_DIR: &str = "worktree";
const LOG_FILE_NAME: &str = "wt.log";

#[derive(Debug, Clone)]
pub struct Settings {
    pub home: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        let log_file = std::env::var_os(LOG_FILE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_log_file);

        Self {
            home: dirs::home_dir(),
            log_file,
        }
    }

    /// Home substitution for listings, if a home directory is known
    pub fn home_abbreviation(&self, replacement: &str) -> Option<HomeAbbreviation> {
        self.home
            .as_ref()
            .map(|h| HomeAbbreviation::new(h.to_string_lossy(), replacement))
    }
}

fn default_log_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(LOG_FILE_NAME)
}

/// Read the remembered worktree. A missing key is `Ok(None)`.
pub fn last_worktree(git: &dyn GitRunner) -> Result<Option<PathBuf>> {
    match git.output(&["config", "--get", LAST_WORKTREE_KEY]) {
        Ok(raw) => {
            let value = String::from_utf8_lossy(&raw).trim().to_string();
            Ok((!value.is_empty()).then(|| PathBuf::from(value)))
        }
        Err(Error::ExternalTool {
            code: Some(UNSET_KEY_CODE),
            ..
        }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn save_last_worktree(git: &dyn GitRunner, dir: &Path) -> Result<()> {
    let value = dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let value = value.to_string_lossy();
    git.output(&["config", LAST_WORKTREE_KEY, &value])?;
    info!(last_worktree = %value, "Saved last worktree");
    Ok(())
}

/// Remember the current directory so `switch -` can come back to it.
/// Failures only produce a warning.
pub fn remember_current_dir(git: &dyn GitRunner) {
    let saved = std::env::current_dir()
        .map_err(Error::from)
        .and_then(|cwd| save_last_worktree(git, &cwd));

    if let Err(e) = saved {
        warn!(error = %e, "Could not save last worktree");
        eprintln!("worktree: Could not save last worktree (wt switch -): {e}");
    }
}
