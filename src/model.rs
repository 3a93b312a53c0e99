//! Worktree data model

use serde::Serialize;
use std::path::PathBuf;

/// Length of the abbreviated commit hash shown in listings
pub const SHORT_HEAD_LEN: usize = 7;

const BRANCH_PREFIX: &str = "refs/heads/";

/// One checkout as reported by `git worktree list --porcelain -z`.
///
/// Records are built once by the reader and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Worktree {
    pub path: PathBuf,
    /// Fully qualified ref, e.g. `refs/heads/main`. `None` when bare or detached.
    pub branch: Option<String>,
    /// Full commit hash. Empty for the bare root entry.
    pub head: String,
    pub is_bare: bool,
    pub is_detached: bool,
    pub is_locked: bool,
    /// Free text after `locked`, possibly empty
    pub lock_reason: String,
}

impl Worktree {
    /// First seven characters of `head`, or all of it when shorter
    pub fn short_head(&self) -> &str {
        match self.head.char_indices().nth(SHORT_HEAD_LEN) {
            Some((idx, _)) => &self.head[..idx],
            None => &self.head,
        }
    }

    /// Branch name with the `refs/heads/` prefix stripped
    pub fn branch_name(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .map(|b| b.strip_prefix(BRANCH_PREFIX).unwrap_or(b))
    }

    /// Last path component, the name users type to switch
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}
