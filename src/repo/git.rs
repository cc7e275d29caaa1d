//! [`Repository`] backed by the `git` command line.

use super::symbols::SymbolIndex;
use super::{ApplyError, RepoError, Repository};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// A git working tree driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepository {
    dir: PathBuf,
}

impl GitRepository {
    /// Open the working tree at `dir`, failing if it is not a git repository.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let repo = Self { dir: dir.into() };
        repo.git(&["rev-parse", "--git-dir"])?;
        Ok(repo)
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output, RepoError> {
        let command = format!("{program} {}", args.join(" "));
        debug!(dir = %self.dir.display(), "{command}");
        Command::new(program)
            .current_dir(&self.dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RepoError::Spawn { command, source })
    }

    /// Run git and return stdout, treating a non-zero exit as an error.
    fn git(&self, args: &[&str]) -> Result<String, RepoError> {
        let output = self.run("git", args)?;
        if !output.status.success() {
            return Err(RepoError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(ToString::to_string)
        .collect()
}

/// Map `git apply` stderr onto the closed [`ApplyError`] set.
pub(crate) fn classify_apply_failure(stderr: &str) -> ApplyError {
    let detail = stderr.trim().to_string();
    if stderr.contains("No such file") || stderr.contains("does not exist in index") {
        ApplyError::MissingFile { detail }
    } else if stderr.contains("corrupt patch")
        || stderr.contains("No valid patches in input")
        || stderr.contains("patch fragment without header")
    {
        ApplyError::CorruptFormat { detail }
    } else {
        ApplyError::ContextMismatch { detail }
    }
}

/// Find the target-side path of `path` in `--name-status` rename output.
fn parse_rename(name_status: &str, path: &str) -> Option<String> {
    name_status.lines().find_map(|line| {
        let mut fields = line.split('\t');
        let status = fields.next()?;
        let before = fields.next()?;
        let after = fields.next()?;
        (status.starts_with('R') && after == path).then(|| before.to_string())
    })
}

impl Repository for GitRepository {
    fn workdir(&self) -> &Path {
        &self.dir
    }

    fn checkout_clean(&self, rev: &str) -> Result<(), RepoError> {
        self.reset_clean()?;
        self.git(&["checkout", "--quiet", "--force", rev])?;
        Ok(())
    }

    fn reset_clean(&self) -> Result<(), RepoError> {
        self.git(&["reset", "--hard", "--quiet"])?;
        self.git(&["clean", "-fdq"])?;
        Ok(())
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<Vec<String>>, RepoError> {
        let object = format!("{rev}:{path}");
        if !self.run("git", &["cat-file", "-e", &object])?.status.success() {
            return Ok(None);
        }
        let output = self.run("git", &["show", &object])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(to_lines(&output.stdout)))
    }

    fn read_worktree_file(&self, path: &str) -> Result<Option<Vec<String>>, RepoError> {
        match fs::read(self.dir.join(path)) {
            Ok(bytes) => Ok(Some(to_lines(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_patch(&self, patch: &str) -> Result<(), ApplyError> {
        let mut file = tempfile::Builder::new()
            .prefix("hunk-")
            .suffix(".patch")
            .tempfile()
            .map_err(RepoError::from)?;
        file.write_all(patch.as_bytes()).map_err(RepoError::from)?;
        file.flush().map_err(RepoError::from)?;

        let path = file.path().to_string_lossy().into_owned();
        let output = self.run("git", &["apply", "-v", &path])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("git apply failed: {}", stderr.trim());
        Err(classify_apply_failure(&stderr))
    }

    fn find_renamed_path(
        &self,
        target: &str,
        origin: &str,
        path: &str,
    ) -> Result<Option<String>, RepoError> {
        let name_status =
            self.git(&["diff", "--diff-filter=R", "--name-status", "-M", target, origin])?;
        Ok(parse_rename(&name_status, path))
    }

    fn symbol_index(&self, rev: &str) -> Result<SymbolIndex, RepoError> {
        self.checkout_clean(rev)?;
        let args = ["--excmd=number", "-R", "-f", "-", "."];
        let output = self.run("ctags", &args)?;
        if !output.status.success() {
            return Err(RepoError::Command {
                command: format!("ctags {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(SymbolIndex::from_ctags(&String::from_utf8_lossy(&output.stdout)))
    }

    fn resolve_ref(&self, rev: &str) -> Result<String, RepoError> {
        let commitish = format!("{rev}^{{commit}}");
        let output = self.run("git", &["rev-parse", "--verify", "--quiet", &commitish])?;
        if !output.status.success() {
            return Err(RepoError::UnknownRevision(rev.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String, RepoError> {
        Ok(self.git(&["merge-base", a, b])?.trim().to_string())
    }

    fn line_log(
        &self,
        range: &str,
        path: &str,
        start: usize,
        end: usize,
    ) -> Result<String, RepoError> {
        let span = format!("-L{start},{end}:{path}");
        self.git(&["log", "--oneline", &span, range])
    }

    fn show(&self, rev: &str) -> Result<String, RepoError> {
        self.git(&["show", rev])
    }

    fn show_stat(&self, rev: &str) -> Result<String, RepoError> {
        self.git(&["show", "--stat", rev])
    }

    fn commit_patch(&self, commit: &str) -> Result<String, RepoError> {
        self.git(&["show", &format!("{commit}^..{commit}")])
    }
}
