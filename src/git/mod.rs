//! Repository operations used by the monitor.
//!
//! [`Repository`] is the seam between the monitor and git: production code
//! uses [`GitCli`], which shells out to `git` with a timeout on every call,
//! and tests substitute an in-memory fake.

pub mod conflict;
pub mod pull_request;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub use conflict::{ConflictStrategy, has_conflict_markers, merge_conflict_lines};
pub use pull_request::{ForgeTokens, PullRequest};

use crate::process::{CommandOutput, run_with_timeout};

pub trait Repository: Send {
    fn repo_root(&self) -> Result<PathBuf>;
    /// Author time of `HEAD`, or `None` before the first commit.
    fn last_commit_time(&self) -> Result<Option<DateTime<Utc>>>;
    /// Paths with staged, unstaged or untracked changes.
    fn uncommitted_changes(&self) -> Result<Vec<String>>;
    /// Stage everything and commit.
    fn auto_commit(&self, message: &str) -> Result<()>;
    fn has_merge_conflicts(&self) -> Result<bool> {
        Ok(!self.conflict_files()?.is_empty())
    }
    fn conflict_files(&self) -> Result<Vec<String>>;
    /// Resolve one conflicted file and mark it resolved.
    fn resolve_conflict(&self, file: &str, strategy: ConflictStrategy) -> Result<()>;
    /// Open a pull / merge request for the current branch and return its URL.
    fn create_pull_request(&self, request: &PullRequest) -> Result<String>;
}

/// `git` subprocess implementation of [`Repository`].
#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
    timeout: Duration,
    tokens: ForgeTokens,
}

impl GitCli {
    pub fn new(work_dir: &Path, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            timeout,
            tokens: ForgeTokens::default(),
        }
    }

    pub fn with_tokens(mut self, tokens: ForgeTokens) -> Self {
        self.tokens = tokens;
        self
    }

    /// Open the repository containing `path`, rooted at its top level.
    pub fn discover(path: &Path, timeout: Duration) -> Result<Self> {
        let probe = Self::new(path, timeout);
        let root = probe
            .repo_root()
            .with_context(|| format!("{} is not inside a git repository", path.display()))?;
        Ok(Self::new(&root, timeout))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn tokens(&self) -> &ForgeTokens {
        &self.tokens
    }

    fn output(&self, args: &[&str]) -> Result<CommandOutput> {
        debug!(args = ?args, dir = %self.work_dir.display(), "git");
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.work_dir);
        run_with_timeout(&mut cmd, self.timeout)
            .with_context(|| format!("git {} failed to run", args.join(" ")))
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;
        if !output.success() {
            bail!("git {} failed: {}", args.join(" "), output.error_text());
        }
        Ok(output.stdout)
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.run(&["branch", "--show-current"])?.trim().to_string())
    }
}

impl Repository for GitCli {
    fn repo_root(&self) -> Result<PathBuf> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    fn last_commit_time(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.output(&["rev-parse", "--verify", "--quiet", "HEAD"])?.success() {
            return Ok(None);
        }
        let out = self.run(&["log", "-1", "--format=%aI"])?;
        let stamp = out.trim();
        if stamp.is_empty() {
            return Ok(None);
        }
        let parsed = DateTime::parse_from_rfc3339(stamp)
            .with_context(|| format!("unexpected commit timestamp '{stamp}'"))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    fn uncommitted_changes(&self) -> Result<Vec<String>> {
        let out = self.run(&["status", "--porcelain", "--untracked-files=all"])?;
        Ok(parse_porcelain(&out))
    }

    fn auto_commit(&self, message: &str) -> Result<()> {
        self.run(&["add", "--all"])?;
        self.run(&["commit", "--quiet", "-m", message])?;
        info!(message = %message, "auto-commit created");
        Ok(())
    }

    fn conflict_files(&self) -> Result<Vec<String>> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn resolve_conflict(&self, file: &str, strategy: ConflictStrategy) -> Result<()> {
        match strategy {
            ConflictStrategy::Ours => {
                self.run(&["checkout", "--ours", "--", file])?;
            }
            ConflictStrategy::Theirs => {
                self.run(&["checkout", "--theirs", "--", file])?;
            }
            ConflictStrategy::LineMerge => {
                let path = self.work_dir.join(file);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let merged = merge_conflict_lines(&content)
                    .with_context(|| format!("cannot line-merge {file}"))?;
                std::fs::write(&path, merged)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        self.run(&["add", "--", file])?;
        info!(file = %file, strategy = %strategy, "conflict resolved");
        Ok(())
    }

    fn create_pull_request(&self, request: &PullRequest) -> Result<String> {
        let head = self.current_branch()?;
        let url = self.run(&["remote", "get-url", "origin"])?;
        let remote = pull_request::parse_remote(&url)
            .with_context(|| format!("unsupported remote '{}'", url.trim()))?;
        pull_request::submit(&remote, &head, request, self.tokens.for_forge(remote.forge))
    }
}

/// File paths from `git status --porcelain` output. Renames report the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.split_once(" -> ").map_or(path, |(_, to)| to);
            path.trim().trim_matches('"').to_string()
        })
        .filter(|path| !path.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "dev@example.com"]);
        git(dir, &["config", "user.name", "Dev"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
    }

    fn cli(dir: &Path) -> GitCli {
        GitCli::new(dir, Duration::from_secs(10))
    }

    /// Two branches that both rewrite `file.txt`, merged into a conflict.
    fn conflicted_repo(dir: &Path) {
        init_repo(dir);
        fs::write(dir.join("file.txt"), "base\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", "base"]);
        git(dir, &["checkout", "-q", "-b", "feature"]);
        fs::write(dir.join("file.txt"), "theirs\n").unwrap();
        git(dir, &["commit", "-q", "-am", "feature"]);
        git(dir, &["checkout", "-q", "main"]);
        fs::write(dir.join("file.txt"), "ours\n").unwrap();
        git(dir, &["commit", "-q", "-am", "main"]);
        let status = Command::new("git")
            .args(["merge", "feature"])
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(!status.status.success());
    }

    #[test]
    fn porcelain_parsing() {
        let out = " M src/lib.rs\n?? new file.txt\nR  old.rs -> new.rs\nA  \"quoted.rs\"\n";
        assert_eq!(
            parse_porcelain(out),
            vec!["src/lib.rs", "new file.txt", "new.rs", "quoted.rs"]
        );
        assert!(parse_porcelain("").is_empty());
    }

    #[test]
    fn fresh_repo_has_no_commit_time() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert_eq!(cli(tmp.path()).last_commit_time().unwrap(), None);
    }

    #[test]
    fn auto_commit_clears_changes() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = cli(tmp.path());

        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(tmp.path().join("dir")).unwrap();
        fs::write(tmp.path().join("dir/b.txt"), "b").unwrap();
        let changes = repo.uncommitted_changes().unwrap();
        assert_eq!(changes.len(), 2);

        repo.auto_commit("auto-commit: 2 files [intervention]").unwrap();
        assert!(repo.uncommitted_changes().unwrap().is_empty());
        assert!(repo.last_commit_time().unwrap().is_some());
        let log = git(tmp.path(), &["log", "-1", "--format=%s"]);
        assert_eq!(log.trim(), "auto-commit: 2 files [intervention]");
    }

    #[test]
    fn auto_commit_with_nothing_to_commit_fails() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(cli(tmp.path()).auto_commit("empty").is_err());
    }

    #[test]
    fn discover_finds_top_level() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let nested = tmp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        let repo = GitCli::discover(&nested, Duration::from_secs(10)).unwrap();
        assert_eq!(
            repo.work_dir().canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn discover_outside_repo_fails() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        assert!(GitCli::discover(tmp.path(), Duration::from_secs(10)).is_err());
    }

    #[test]
    fn resolve_conflict_with_each_strategy() {
        if !git_available() {
            return;
        }
        for (strategy, expected) in [
            (ConflictStrategy::Ours, "ours\n"),
            (ConflictStrategy::Theirs, "theirs\n"),
            (ConflictStrategy::LineMerge, "ours\ntheirs\n"),
        ] {
            let tmp = tempfile::tempdir().unwrap();
            conflicted_repo(tmp.path());
            let repo = cli(tmp.path());

            assert!(repo.has_merge_conflicts().unwrap());
            assert_eq!(repo.conflict_files().unwrap(), vec!["file.txt"]);

            repo.resolve_conflict("file.txt", strategy).unwrap();
            assert!(!repo.has_merge_conflicts().unwrap(), "{strategy}");
            let content = fs::read_to_string(tmp.path().join("file.txt")).unwrap();
            assert_eq!(content, expected, "{strategy}");
        }
    }

    #[test]
    fn pull_request_without_supported_remote_fails() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["remote", "add", "origin", "https://example.com/a/b.git"]);
        let request = PullRequest {
            title: "t".to_string(),
            body: "b".to_string(),
            reviewer: "r".to_string(),
            base_branch: "main".to_string(),
        };
        let err = cli(tmp.path()).create_pull_request(&request).unwrap_err();
        assert!(err.to_string().contains("unsupported remote"));
    }

    #[test]
    fn pull_request_without_token_returns_compare_url() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        git(tmp.path(), &["add", "."]);
        git(tmp.path(), &["commit", "-q", "-m", "init"]);
        git(tmp.path(), &["checkout", "-q", "-b", "topic"]);
        git(tmp.path(), &["remote", "add", "origin", "git@github.com:octo/widgets.git"]);

        let request = PullRequest {
            title: "t".to_string(),
            body: "b".to_string(),
            reviewer: "r".to_string(),
            base_branch: "main".to_string(),
        };
        let url = cli(tmp.path()).create_pull_request(&request).unwrap();
        assert_eq!(url, "https://github.com/octo/widgets/compare/main...topic?expand=1");
    }
}
