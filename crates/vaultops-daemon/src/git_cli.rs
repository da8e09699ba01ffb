//! Repository source backed by the system `git` binary.
//!
//! Every invocation runs with a scrubbed environment: no inherited git
//! configuration, no credential prompts, no repo-override variables.
//! Basic-auth credentials and the CA bundle travel through `GIT_CONFIG_*`
//! environment variables rather than argv, so secrets never show up in a
//! process listing.
//!
//! A fetch clones the configured branch into a temporary directory that
//! lives as long as the returned repository handle.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::ExposeSecret;
use tempfile::TempDir;
use tracing::debug;
use vaultops_core::source::{
    CommitInfo, FetchOptions, RepoSource, SourceError, WorktreeEntry, WorktreeRepo,
    WorktreeVisitor,
};
use walkdir::WalkDir;

/// [`RepoSource`] that shells out to `git`.
#[derive(Debug, Default)]
pub struct GitCliSource;

impl GitCliSource {
    /// Creates the source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RepoSource for GitCliSource {
    fn fetch(&self, options: &FetchOptions) -> Result<Box<dyn WorktreeRepo>, SourceError> {
        let dir = TempDir::new()?;
        let workdir = dir.path().join("repo");

        let mut config_pairs: Vec<(String, String)> = Vec::new();
        if let Some(auth) = &options.auth {
            let credentials = format!("{}:{}", auth.username, auth.password.expose_secret());
            config_pairs.push((
                "http.extraHeader".to_string(),
                format!("Authorization: Basic {}", BASE64.encode(credentials)),
            ));
        }
        if let Some(bundle) = &options.ca_bundle {
            let ca_path = dir.path().join("ca.pem");
            std::fs::write(&ca_path, bundle)?;
            config_pairs.push(("http.sslCAInfo".to_string(), ca_path.display().to_string()));
        }

        let mut cmd = git_command(None);
        cmd.env("GIT_CONFIG_COUNT", config_pairs.len().to_string());
        for (i, (key, value)) in config_pairs.iter().enumerate() {
            cmd.env(format!("GIT_CONFIG_KEY_{i}"), key);
            cmd.env(format!("GIT_CONFIG_VALUE_{i}"), value);
        }
        cmd.args(["clone", "--branch", &options.branch, "--single-branch"])
            .args(["--no-tags", "--quiet"])
            .arg(&options.url)
            .arg(&workdir);
        run(cmd).map_err(|err| match err {
            SourceError::Repo(message) => SourceError::Fetch(message),
            other => other,
        })?;

        if options.max_clone_size_bytes > 0 {
            let size = directory_size(&workdir)?;
            if size > options.max_clone_size_bytes {
                return Err(SourceError::CloneTooLarge {
                    size,
                    limit: options.max_clone_size_bytes,
                });
            }
        }

        debug!(branch = %options.branch, workdir = %workdir.display(), "cloned repository");
        Ok(Box::new(GitCliRepo {
            _dir: dir,
            workdir,
        }))
    }
}

/// A clone produced by [`GitCliSource`]. The backing temporary directory
/// is removed when the handle drops.
pub struct GitCliRepo {
    _dir: TempDir,
    workdir: PathBuf,
}

impl WorktreeRepo for GitCliRepo {
    fn head(&self) -> Result<CommitInfo, SourceError> {
        let output = run(git_args(
            &self.workdir,
            &["log", "-1", "--format=%H %ct", "HEAD"],
        ))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_commit_line(stdout.trim())
    }

    fn log_first_parent(&self, from: &str) -> Result<Vec<CommitInfo>, SourceError> {
        let output = run(git_args(
            &self.workdir,
            &["log", "--first-parent", "--format=%H %ct", from],
        ))?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_commit_line)
            .collect()
    }

    fn checkout(&mut self, hash: &str) -> Result<(), SourceError> {
        run(git_args(
            &self.workdir,
            &["checkout", "--quiet", "--detach", hash],
        ))?;
        Ok(())
    }

    fn for_each_file(&self, visit: &mut WorktreeVisitor<'_>) -> Result<(), SourceError> {
        let walker = WalkDir::new(&self.workdir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");

        for entry in walker {
            let entry = entry.map_err(|err| SourceError::Repo(err.to_string()))?;
            let Ok(relative) = entry.path().strip_prefix(&self.workdir) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let path = relative.to_string_lossy().replace('\\', "/");

            if entry.path_is_symlink() {
                let target = std::fs::read_link(entry.path())?;
                let target = target.to_string_lossy().to_string();
                visit(WorktreeEntry {
                    path: &path,
                    symlink_target: Some(&target),
                    reader: None,
                    is_dir: false,
                })?;
            } else if entry.file_type().is_dir() {
                visit(WorktreeEntry {
                    path: &path,
                    symlink_target: None,
                    reader: None,
                    is_dir: true,
                })?;
            } else {
                let mut file = File::open(entry.path())?;
                visit(WorktreeEntry {
                    path: &path,
                    symlink_target: None,
                    reader: Some(&mut file),
                    is_dir: false,
                })?;
            }
        }
        Ok(())
    }

    fn workdir(&self) -> Option<&Path> {
        Some(&self.workdir)
    }
}

/// Builds a `git` command with a scrubbed environment.
pub(crate) fn git_command(workdir: Option<&Path>) -> Command {
    let mut cmd = Command::new("git");
    cmd.env_clear();
    if let Some(path) = std::env::var_os("PATH") {
        cmd.env("PATH", path);
    }
    if let Some(home) = std::env::var_os("HOME") {
        cmd.env("HOME", home);
    }
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = workdir {
        cmd.arg("-C").arg(dir);
    }
    cmd
}

fn git_args(workdir: &Path, args: &[&str]) -> Command {
    let mut cmd = git_command(Some(workdir));
    cmd.args(args);
    cmd
}

/// Runs the command and fails on a non-zero exit with trimmed stderr.
pub(crate) fn run(mut cmd: Command) -> Result<Output, SourceError> {
    cmd.stdin(Stdio::null());
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(SourceError::Repo(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output)
}

/// Parses one `--format=%H %ct` log line.
fn parse_commit_line(line: &str) -> Result<CommitInfo, SourceError> {
    let mut parts = line.split_whitespace();
    let (Some(hash), Some(timestamp)) = (parts.next(), parts.next()) else {
        return Err(SourceError::Repo(format!("malformed log line {line:?}")));
    };
    let seconds: i64 = timestamp
        .parse()
        .map_err(|_| SourceError::Repo(format!("malformed commit timestamp {timestamp:?}")))?;
    let committer_time: DateTime<Utc> = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| SourceError::Repo(format!("commit timestamp {seconds} out of range")))?;
    Ok(CommitInfo {
        hash: hash.to_string(),
        committer_time,
    })
}

fn directory_size(dir: &Path) -> Result<u64, SourceError> {
    let mut total = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|err| SourceError::Repo(err.to_string()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_commit_line() {
        let info =
            parse_commit_line("9c3f1a2b4d5e6f708192a3b4c5d6e7f8091a2b3c 1751371200").unwrap();
        assert_eq!(info.hash, "9c3f1a2b4d5e6f708192a3b4c5d6e7f8091a2b3c");
        assert_eq!(info.committer_time.timestamp(), 1_751_371_200);
    }

    #[test]
    fn test_parse_commit_line_rejects_garbage() {
        assert!(parse_commit_line("").is_err());
        assert!(parse_commit_line("onlyhash").is_err());
        assert!(parse_commit_line("hash notanumber").is_err());
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    fn run_git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Fixture")
            .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
            .env("GIT_COMMITTER_NAME", "Fixture")
            .env("GIT_COMMITTER_EMAIL", "fixture@example.com")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .status()
            .expect("git command");
        assert!(status.success(), "git {args:?} failed");
    }

    fn fixture_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("origin");
        std::fs::create_dir_all(&root).unwrap();
        let status = Command::new("git")
            .arg("init")
            .arg("--quiet")
            .arg(&root)
            .status()
            .expect("git init");
        assert!(status.success());
        run_git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(root.join("first.yaml"), "path: kv1/first\ndata: {}\n").unwrap();
        run_git(&root, &["add", "."]);
        run_git(&root, &["commit", "-q", "-m", "first"]);
        std::fs::write(root.join("second.yaml"), "path: kv1/second\ndata: {}\n").unwrap();
        run_git(&root, &["add", "."]);
        run_git(&root, &["commit", "-q", "-m", "second"]);
        (dir, root)
    }

    #[test]
    fn test_fetch_log_checkout_and_walk() {
        if !git_available() {
            eprintln!("skipping: git binary not available");
            return;
        }
        let (_dir, origin) = fixture_repo();

        let source = GitCliSource::new();
        let options = FetchOptions {
            url: origin.display().to_string(),
            branch: "main".to_string(),
            auth: None,
            ca_bundle: None,
            max_clone_size_bytes: 0,
        };
        let mut repo = source.fetch(&options).unwrap();

        let head = repo.head().unwrap();
        let log = repo.log_first_parent(&head.hash).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], head);
        // Newest first; committer times never decrease going forward.
        assert!(log[0].committer_time >= log[1].committer_time);

        let mut paths = Vec::new();
        repo.for_each_file(&mut |entry| {
            if !entry.is_dir {
                paths.push(entry.path.to_string());
            }
            Ok(())
        })
        .unwrap();
        paths.sort();
        assert_eq!(paths, vec!["first.yaml", "second.yaml"]);

        // Checking out the first commit removes the second file.
        repo.checkout(&log[1].hash).unwrap();
        let mut paths = Vec::new();
        repo.for_each_file(&mut |entry| {
            if !entry.is_dir {
                paths.push(entry.path.to_string());
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(paths, vec!["first.yaml"]);
    }

    #[test]
    fn test_clone_size_bound() {
        if !git_available() {
            eprintln!("skipping: git binary not available");
            return;
        }
        let (_dir, origin) = fixture_repo();

        let source = GitCliSource::new();
        let options = FetchOptions {
            url: origin.display().to_string(),
            branch: "main".to_string(),
            auth: None,
            ca_bundle: None,
            max_clone_size_bytes: 1,
        };
        let err = match source.fetch(&options) {
            Ok(_) => panic!("expected fetch to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, SourceError::CloneTooLarge { .. }), "{err}");
    }

    #[test]
    fn test_fetch_unknown_branch_fails() {
        if !git_available() {
            eprintln!("skipping: git binary not available");
            return;
        }
        let (_dir, origin) = fixture_repo();

        let source = GitCliSource::new();
        let options = FetchOptions {
            url: origin.display().to_string(),
            branch: "does-not-exist".to_string(),
            auth: None,
            ca_bundle: None,
            max_clone_size_bytes: 0,
        };
        assert!(matches!(
            source.fetch(&options),
            Err(SourceError::Fetch(_))
        ));
    }
}
