//! Reading the worktree snapshot from git.
//!
//! All process spawning goes through [`GitRunner`], so the parser can be fed
//! literal porcelain fixtures in tests without a repository on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, info_span};

use crate::error::{Error, Result};
use crate::model::Worktree;

/// Capability to run git with a fixed argument list
pub trait GitRunner {
    /// Run git and capture stdout. Fails on spawn errors or a non-zero exit.
    fn output(&self, args: &[&str]) -> Result<Vec<u8>>;

    /// Run git with stdout/stderr attached to the terminal.
    fn run(&self, args: &[&str]) -> Result<()>;
}

/// Runs the real `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    program: OsString,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: OsString::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another executable in place of `git`
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn display(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }
}

impl GitRunner for GitCli {
    fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        let command = self.display(args);
        debug!(%command, "Running git");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ExternalTool {
                command: command.clone(),
                code: None,
                diagnostic: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let diagnostic = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            debug!(%command, %diagnostic, "git failed");
            return Err(Error::ExternalTool {
                command,
                code: output.status.code(),
                diagnostic,
            });
        }

        Ok(output.stdout)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let command = self.display(args);
        debug!(%command, "Running git (attached)");

        let status = Command::new(&self.program)
            .args(args)
            .status()
            .map_err(|e| Error::ExternalTool {
                command: command.clone(),
                code: None,
                diagnostic: e.to_string(),
            })?;

        if !status.success() {
            return Err(Error::ExternalTool {
                command,
                code: status.code(),
                diagnostic: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Runs every command of the wrapped runner as `git -C <dir> ...`
pub struct InDir<'a> {
    git: &'a dyn GitRunner,
    dir: String,
}

pub fn in_dir<'a>(git: &'a dyn GitRunner, dir: &Path) -> InDir<'a> {
    InDir {
        git,
        dir: dir.to_string_lossy().to_string(),
    }
}

impl InDir<'_> {
    fn prefixed<'s>(&'s self, args: &[&'s str]) -> Vec<&'s str> {
        let mut full = vec!["-C", self.dir.as_str()];
        full.extend_from_slice(args);
        full
    }
}

impl GitRunner for InDir<'_> {
    fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.git.output(&self.prefixed(args))
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        self.git.run(&self.prefixed(args))
    }
}

// ============================================================================
// Porcelain parsing
// ============================================================================

const NUL: u8 = 0;

/// Parse the output of `git worktree list --porcelain -z`.
///
/// Groups are separated by a double NUL and attribute lines by a single NUL.
/// Unknown attribute lines are skipped. The snapshot keeps git's order.
/// Paths are taken byte for byte, so non-UTF-8 paths survive on Unix.
pub fn parse_worktrees(input: impl AsRef<[u8]>) -> Result<Vec<Worktree>> {
    let mut worktrees = Vec::new();
    let mut group: Vec<&[u8]> = Vec::new();

    // An empty line ends a group; the trailing one flushes the last group
    let lines = input.as_ref().split(|b| *b == NUL).chain(std::iter::once(&[][..]));
    for line in lines {
        if !line.is_empty() {
            group.push(line);
            continue;
        }
        if group.is_empty() {
            continue;
        }

        let worktree = parse_group(&group)?;
        group.clear();
        if worktree.is_bare && !worktrees.is_empty() {
            return Err(Error::Parse(format!(
                "bare entry {} is not the first worktree",
                worktree.path.display()
            )));
        }
        worktrees.push(worktree);
    }

    Ok(worktrees)
}

fn parse_group(lines: &[&[u8]]) -> Result<Worktree> {
    let (first, rest) = lines
        .split_first()
        .ok_or_else(|| Error::Parse("empty worktree group".to_string()))?;
    if !first.starts_with(b"worktree") {
        return Err(Error::Parse(format!(
            "worktree group starts with {:?} instead of a worktree line",
            String::from_utf8_lossy(first)
        )));
    }

    let mut worktree = Worktree {
        path: worktree_path(first)?,
        ..Default::default()
    };

    for &line in rest {
        if line.starts_with(b"worktree") {
            return Err(Error::Parse(format!(
                "second worktree line {:?} in the group of {}",
                String::from_utf8_lossy(line),
                worktree.path.display()
            )));
        } else if line == b"bare" {
            worktree.is_bare = true;
        } else if line == b"detached" {
            worktree.is_detached = true;
        } else if let Some(reason) = line.strip_prefix(b"locked") {
            worktree.is_locked = true;
            worktree.lock_reason = text(reason.strip_prefix(b" ").unwrap_or(reason));
        } else if let Some(head) = line.strip_prefix(b"HEAD ") {
            worktree.head = text(head);
        } else if let Some(branch) = line.strip_prefix(b"branch ") {
            worktree.branch = Some(text(branch));
        }
    }

    let states = [
        worktree.is_bare,
        worktree.is_detached,
        worktree.branch.is_some(),
    ];
    if states.iter().filter(|s| **s).count() > 1 {
        return Err(Error::Parse(format!(
            "worktree {} mixes bare, detached and branch states",
            worktree.path.display()
        )));
    }

    Ok(worktree)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn worktree_path(line: &[u8]) -> Result<PathBuf> {
    match line.iter().position(|b| *b == b' ') {
        Some(space) if space + 1 < line.len() => path_from_bytes(&line[space + 1..]),
        _ => Err(Error::Parse(format!(
            "worktree line {:?} has no path",
            String::from_utf8_lossy(line)
        ))),
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    Ok(PathBuf::from(OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf> {
    std::str::from_utf8(bytes).map(PathBuf::from).map_err(|_| {
        Error::Parse(format!(
            "worktree path {:?} is not valid UTF-8",
            String::from_utf8_lossy(bytes)
        ))
    })
}

// ============================================================================
// Snapshot queries
// ============================================================================

/// Run `git worktree list --porcelain -z` and parse the result.
pub fn list_worktrees(git: &dyn GitRunner) -> Result<Vec<Worktree>> {
    let _span = info_span!("list_worktrees").entered();

    let raw = git.output(&["worktree", "list", "--porcelain", "-z"])?;
    let worktrees = parse_worktrees(&raw)?;

    info!(count = worktrees.len(), "Worktree snapshot read");
    Ok(worktrees)
}

/// Path of the worktree at `index`, the position shown in indexed listings
pub fn path_at(worktrees: &[Worktree], index: usize) -> Option<&Path> {
    worktrees.get(index).map(|wt| wt.path.as_path())
}

/// First worktree, in snapshot order, whose path ends with the components
/// of `name`: `main`, `app/main` and a full path all select `/src/app/main`.
pub fn find_by_name<'a>(worktrees: &'a [Worktree], name: &str) -> Result<&'a Worktree> {
    if name.is_empty() {
        return Err(Error::NotFound(name.to_string()));
    }
    worktrees
        .iter()
        .find(|wt| wt.path.ends_with(name))
        .ok_or_else(|| Error::NotFound(name.to_string()))
}

/// Recent history of a worktree as shown in the picker's preview pane
pub fn recent_log(git: &dyn GitRunner, path: &Path, count: usize) -> Result<Vec<String>> {
    let limit = format!("-n{count}");
    let raw = in_dir(git, path).output(&[
        "log",
        "--oneline",
        "--graph",
        "--decorate",
        "--all",
        "--color=never",
        &limit,
    ])?;
    Ok(String::from_utf8_lossy(&raw)
        .lines()
        .map(str::to_string)
        .collect())
}

// ============================================================================
// Clone helpers
// ============================================================================

/// `git clone --no-checkout <url> <path>`
pub fn clone_no_checkout(git: &dyn GitRunner, url: &str, path: &Path) -> Result<()> {
    let path = path.to_string_lossy();
    git.run(&["clone", "--no-checkout", url, &path])
}

/// Mark the repository as bare so only linked worktrees carry checkouts
pub fn set_core_bare(git: &dyn GitRunner) -> Result<()> {
    git.run(&["config", "core.bare", "true"])
}

/// Branch names under `refs/remotes/origin`, without the `origin/` prefix
pub fn remote_branches(git: &dyn GitRunner) -> Result<Vec<String>> {
    let raw = git.output(&[
        "for-each-ref",
        "--format=%(refname:short)",
        "refs/remotes/origin",
    ])?;

    Ok(String::from_utf8_lossy(&raw)
        .lines()
        .filter_map(|line| line.trim().split_once("origin/"))
        .map(|(_, branch)| branch.to_string())
        .filter(|branch| !branch.is_empty() && branch != "HEAD")
        .collect())
}

/// Default branch of `origin`, read from `git remote show origin`
pub fn default_branch(git: &dyn GitRunner) -> Result<String> {
    let raw = git.output(&["remote", "show", "origin"])?;
    String::from_utf8_lossy(&raw)
        .lines()
        .find_map(|line| line.trim().strip_prefix("HEAD branch: "))
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::NotFound("default branch of origin".to_string()))
}

/// `git worktree add <branch> -B <branch> origin/<branch>`
pub fn add_tracking_worktree(git: &dyn GitRunner, branch: &str) -> Result<()> {
    let upstream = format!("origin/{branch}");
    git.run(&["worktree", "add", branch, "-B", branch, &upstream])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves canned stdout per command line and records every call
    #[derive(Default)]
    pub(crate) struct FakeGit {
        responses: HashMap<String, std::result::Result<Vec<u8>, (i32, String)>>,
        pub(crate) calls: RefCell<Vec<String>>,
    }

    impl FakeGit {
        pub(crate) fn with(mut self, args: &str, stdout: &str) -> Self {
            self.responses
                .insert(args.to_string(), Ok(stdout.as_bytes().to_vec()));
            self
        }

        pub(crate) fn with_bytes(mut self, args: &str, stdout: &[u8]) -> Self {
            self.responses.insert(args.to_string(), Ok(stdout.to_vec()));
            self
        }

        /// git exits 128 with `stderr`, as it does for fatal errors
        pub(crate) fn failing(self, args: &str, stderr: &str) -> Self {
            self.exiting(args, 128, stderr)
        }

        pub(crate) fn exiting(mut self, args: &str, code: i32, stderr: &str) -> Self {
            self.responses
                .insert(args.to_string(), Err((code, stderr.to_string())));
            self
        }

        fn respond(&self, args: &[&str]) -> Result<Vec<u8>> {
            let key = args.join(" ");
            self.calls.borrow_mut().push(key.clone());
            match self.responses.get(&key) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err((code, diagnostic))) => Err(Error::ExternalTool {
                    command: format!("git {key}"),
                    code: Some(*code),
                    diagnostic: diagnostic.clone(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    impl GitRunner for FakeGit {
        fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
            self.respond(args)
        }

        fn run(&self, args: &[&str]) -> Result<()> {
            self.respond(args).map(|_| ())
        }
    }

    const LIST_ARGS: &str = "worktree list --porcelain -z";

    const FIXTURE: &str = "worktree /repo\0bare\0\0\
        worktree /repo/main\0HEAD abc1234567\0branch refs/heads/main\0\0\
        worktree /repo/hotfix\0HEAD 0123456789abcdef0123456789abcdef01234567\0detached\0locked\0\0\
        worktree /repo/feature\0HEAD fedcba9876\0branch refs/heads/feature/x\0locked on usb drive\0\0";

    #[test]
    fn test_parse_scenario_two_groups() {
        let input = "worktree /repo\0bare\0\0worktree /repo/main\0HEAD abc1234567\0branch refs/heads/main\0\0";
        let worktrees = parse_worktrees(input).unwrap();

        assert_eq!(
            worktrees,
            vec![
                Worktree {
                    path: PathBuf::from("/repo"),
                    is_bare: true,
                    ..Default::default()
                },
                Worktree {
                    path: PathBuf::from("/repo/main"),
                    head: "abc1234567".to_string(),
                    branch: Some("refs/heads/main".to_string()),
                    ..Default::default()
                },
            ]
        );
    }

    #[test]
    fn test_parse_keeps_order_and_count() {
        let worktrees = parse_worktrees(FIXTURE).unwrap();
        let paths: Vec<_> = worktrees.iter().map(|w| w.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/repo"),
                PathBuf::from("/repo/main"),
                PathBuf::from("/repo/hotfix"),
                PathBuf::from("/repo/feature"),
            ]
        );
        assert!(worktrees[0].is_bare);
        assert!(worktrees.iter().skip(1).all(|w| !w.is_bare));
    }

    #[test]
    fn test_parse_locked_with_and_without_reason() {
        let worktrees = parse_worktrees(FIXTURE).unwrap();

        let hotfix = &worktrees[2];
        assert!(hotfix.is_detached);
        assert!(hotfix.is_locked);
        assert_eq!(hotfix.lock_reason, "");
        assert_eq!(hotfix.branch, None);

        let feature = &worktrees[3];
        assert!(feature.is_locked);
        assert_eq!(feature.lock_reason, "on usb drive");
        assert_eq!(feature.branch.as_deref(), Some("refs/heads/feature/x"));
    }

    #[test]
    fn test_parse_attributes_in_any_order() {
        let input = "worktree /r/a\0branch refs/heads/a\0HEAD 1111111111\0\0";
        let worktrees = parse_worktrees(input).unwrap();
        assert_eq!(worktrees[0].head, "1111111111");
        assert_eq!(worktrees[0].branch.as_deref(), Some("refs/heads/a"));
    }

    #[test]
    fn test_parse_ignores_unknown_lines() {
        let input = "worktree /r/a\0HEAD 1111111\0branch refs/heads/a\0prunable gitdir file points to non-existent location\0\0";
        let worktrees = parse_worktrees(input).unwrap();
        assert_eq!(worktrees.len(), 1);
        assert!(!worktrees[0].is_locked);
        assert!(!worktrees[0].is_detached);
    }

    #[test]
    fn test_parse_path_with_spaces() {
        let input = "worktree /home/me/my project/main\0HEAD 1111111\0branch refs/heads/main\0\0";
        let worktrees = parse_worktrees(input).unwrap();
        assert_eq!(worktrees[0].path, PathBuf::from("/home/me/my project/main"));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse_worktrees("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_single_bare_root() {
        let worktrees = parse_worktrees("worktree /repo.git\0bare\0\0").unwrap();
        assert_eq!(worktrees.len(), 1);
        assert!(worktrees[0].is_bare);
    }

    #[test]
    fn test_parse_group_without_worktree_line() {
        let err = parse_worktrees("HEAD 1111111\0branch refs/heads/a\0\0").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_worktree_line_without_path() {
        let err = parse_worktrees("worktree\0HEAD 1111111\0\0").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_conflicting_states() {
        let err = parse_worktrees("worktree /repo\0bare\0branch refs/heads/main\0\0").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_bare_after_first() {
        let input = "worktree /repo/main\0HEAD 1111111\0branch refs/heads/main\0\0worktree /repo\0bare\0\0";
        assert!(matches!(parse_worktrees(input), Err(Error::Parse(_))));
    }

    #[test]
    fn test_list_worktrees_uses_porcelain_z() {
        let git = FakeGit::default().with(LIST_ARGS, FIXTURE);
        let worktrees = list_worktrees(&git).unwrap();
        assert_eq!(worktrees.len(), 4);
        assert_eq!(git.calls.borrow().as_slice(), [LIST_ARGS.to_string()]);
    }

    #[test]
    fn test_list_worktrees_propagates_tool_error() {
        let git = FakeGit::default().failing(
            LIST_ARGS,
            "fatal: not a git repository (or any of the parent directories): .git",
        );
        match list_worktrees(&git) {
            Err(Error::ExternalTool {
                command,
                code,
                diagnostic,
            }) => {
                assert_eq!(command, format!("git {LIST_ARGS}"));
                assert_eq!(code, Some(128));
                assert!(diagnostic.contains("not a git repository"));
            }
            other => panic!("expected ExternalTool error, got {other:?}"),
        }
    }

    #[test]
    fn test_path_at_and_find_by_name() {
        let worktrees = parse_worktrees(FIXTURE).unwrap();
        assert_eq!(path_at(&worktrees, 1), Some(Path::new("/repo/main")));
        assert_eq!(path_at(&worktrees, 9), None);

        let found = find_by_name(&worktrees, "hotfix").unwrap();
        assert_eq!(found.path, PathBuf::from("/repo/hotfix"));
        assert!(matches!(
            find_by_name(&worktrees, "missing"),
            Err(Error::NotFound(_))
        ));
        // partial names never match
        assert!(find_by_name(&worktrees, "ain").is_err());
        assert!(find_by_name(&worktrees, "").is_err());
    }

    #[test]
    fn test_find_by_name_matches_path_suffix() {
        let input = "worktree /src/app\0bare\0\0\
            worktree /src/app/main\0HEAD 1111111\0branch refs/heads/main\0\0\
            worktree /src/lib/main\0HEAD 2222222\0branch refs/heads/main\0\0";
        let worktrees = parse_worktrees(input).unwrap();

        let found = find_by_name(&worktrees, "lib/main").unwrap();
        assert_eq!(found.path, PathBuf::from("/src/lib/main"));
        // snapshot order decides between equal last components
        let found = find_by_name(&worktrees, "main").unwrap();
        assert_eq!(found.path, PathBuf::from("/src/app/main"));
        let found = find_by_name(&worktrees, "/src/app").unwrap();
        assert!(found.is_bare);
        // a suffix must cover whole components
        assert!(find_by_name(&worktrees, "b/main").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_list_worktrees_keeps_non_utf8_path_bytes() {
        use std::os::unix::ffi::OsStrExt;

        let git = FakeGit::default().with_bytes(
            LIST_ARGS,
            b"worktree /r/caf\xE9\0HEAD 1111111\0branch refs/heads/main\0\0",
        );
        let worktrees = list_worktrees(&git).unwrap();
        assert_eq!(worktrees[0].path.as_os_str().as_bytes(), b"/r/caf\xE9");
        assert_eq!(worktrees[0].branch.as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn test_parse_extra_separators_between_groups() {
        let input = "worktree /r/a\0HEAD 1111111\0\0\0worktree /r/b\0HEAD 2222222\0\0";
        let worktrees = parse_worktrees(input).unwrap();
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[1].path, PathBuf::from("/r/b"));
    }

    #[test]
    fn test_remote_branches_skips_head() {
        let git = FakeGit::default().with(
            "for-each-ref --format=%(refname:short) refs/remotes/origin",
            "origin\norigin/HEAD\norigin/main\norigin/feature/x\n",
        );
        assert_eq!(
            remote_branches(&git).unwrap(),
            vec!["main".to_string(), "feature/x".to_string()]
        );
    }

    #[test]
    fn test_default_branch_from_remote_show() {
        let git = FakeGit::default().with(
            "remote show origin",
            "* remote origin\n  Fetch URL: git@example.com:me/repo.git\n  HEAD branch: trunk\n  Remote branches:\n",
        );
        assert_eq!(default_branch(&git).unwrap(), "trunk");

        let empty = FakeGit::default().with("remote show origin", "* remote origin\n");
        assert!(matches!(default_branch(&empty), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_add_tracking_worktree_args() {
        let git = FakeGit::default();
        add_tracking_worktree(&git, "dev").unwrap();
        assert_eq!(
            git.calls.borrow().as_slice(),
            ["worktree add dev -B dev origin/dev".to_string()]
        );
    }

    #[test]
    fn test_recent_log_lines() {
        let git = FakeGit::default().with(
            "-C /repo/main log --oneline --graph --decorate --all --color=never -n20",
            "* abc1234 (HEAD -> main) Fix parser\n* 0123456 Initial commit\n",
        );
        let lines = recent_log(&git, Path::new("/repo/main"), 20).unwrap();
        assert_eq!(
            lines,
            vec!["* abc1234 (HEAD -> main) Fix parser", "* 0123456 Initial commit"]
        );
    }

    #[test]
    fn test_git_cli_missing_program_is_tool_error() {
        let git = GitCli::with_program("definitely-not-a-real-git-binary");
        match git.output(&["worktree", "list"]) {
            Err(Error::ExternalTool { command, code, .. }) => {
                assert_eq!(command, "definitely-not-a-real-git-binary worktree list");
                assert_eq!(code, None);
            }
            other => panic!("expected ExternalTool error, got {other:?}"),
        }
    }
}
