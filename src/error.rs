//! Error type shared by the reader, the formatter callers and the commands

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// git could not be started or exited non-zero.
    /// `code` is the exit code, `None` when git never ran or was killed.
    #[error("failed to run git command `{command}`: {diagnostic}")]
    ExternalTool {
        command: String,
        code: Option<i32>,
        diagnostic: String,
    },

    /// The porcelain listing broke its framing contract
    #[error("malformed worktree listing: {0}")]
    Parse(String),

    #[error("could not find Git worktree: {0}")]
    NotFound(String),

    #[error("no last worktree recorded yet")]
    NoLastWorktree,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
