//! Enumerate, format and jump between Git worktrees.
//!
//! The snapshot comes from `git worktree list --porcelain -z` and is rendered
//! as an aligned, optionally indexed list, either printed or handed to the
//! interactive picker.

pub mod commands;
pub mod config;
pub mod error;
pub mod format;
pub mod git;
pub mod model;
pub mod picker;

pub use error::{Error, Result};
pub use format::{format_lines, format_list, HomeAbbreviation, ListOptions};
pub use git::{list_worktrees, parse_worktrees, GitCli, GitRunner};
pub use model::Worktree;
