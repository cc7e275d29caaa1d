//! A whole job against a throwaway git repository.

use patch_backport::repo::Repository;
use patch_backport::{ApplyError, Backporter, GitRepository, HunkStatus, JobRefs, Pipeline};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

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
        .env("GIT_AUTHOR_NAME", "Backport Test")
        .env("GIT_AUTHOR_EMAIL", "backport@example.com")
        .env("GIT_COMMITTER_NAME", "Backport Test")
        .env("GIT_COMMITTER_EMAIL", "backport@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

fn lines(extra_head: &[&str], seventh: &str) -> String {
    let mut out: Vec<String> = extra_head.iter().map(ToString::to_string).collect();
    for n in 1..=12 {
        if n == 7 {
            out.push(seventh.to_string());
        } else {
            out.push(format!("line {n}"));
        }
    }
    out.join("\n") + "\n"
}

/// `v1` holds twelve lines. Upstream then prepends two lines and the fix
/// rewrites `line 7`, so the fix's hunk header is off by two at `v1`. The fix
/// also touches `README.md`, which splitting drops.
fn setup_repository() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    git(root, &["init", "-q"]);
    fs::write(root.join("notes.c"), lines(&[], "line 7")).unwrap();
    fs::write(root.join("README.md"), "notes\n").unwrap();
    git(root, &["add", "notes.c", "README.md"]);
    git(root, &["commit", "-q", "-m", "initial"]);
    git(root, &["tag", "v1"]);

    fs::write(root.join("notes.c"), lines(&["header a", "header b"], "line 7")).unwrap();
    git(root, &["commit", "-q", "-am", "add header"]);

    fs::write(root.join("notes.c"), lines(&["header a", "header b"], "line seven")).unwrap();
    fs::write(root.join("README.md"), "notes, with line seven fixed\n").unwrap();
    git(root, &["commit", "-q", "-am", "fix line seven"]);
    let fix = git(root, &["rev-parse", "HEAD"]);
    (dir, fix)
}

#[test]
fn test_job_on_drifted_release() {
    if !git_available() {
        return;
    }
    let (dir, fix) = setup_repository();
    let repo = GitRepository::open(dir.path()).unwrap();
    let refs = JobRefs {
        commit: fix.clone(),
        origin: format!("{fix}^"),
        target: "v1".to_string(),
    };
    let mut backporter = Backporter::new(repo, refs, Pipeline::default());
    backporter.resolve_refs().unwrap();

    let pass = backporter.run_initial_pass().unwrap();
    assert_eq!(backporter.units().len(), 1);
    assert!(!backporter.units()[0].contains("README.md"));
    assert_eq!(pass.statuses, vec![HunkStatus::Applied]);
    assert!(backporter.session().is_finished());

    let patch = backporter.session().complete_patch();
    assert!(patch.contains("@@ -4,7 +4,7 @@"), "{patch}");
    assert!(patch.contains("+line seven"));

    // The tree is left clean at the target.
    let content = backporter
        .repo()
        .read_worktree_file("notes.c")
        .unwrap()
        .unwrap();
    assert_eq!(content[6], "line 7");
}

#[test]
fn test_git_adapter_reads_and_classifies() {
    if !git_available() {
        return;
    }
    let (dir, fix) = setup_repository();
    let repo = GitRepository::open(dir.path()).unwrap();

    let at_v1 = repo.read_file("v1", "notes.c").unwrap().unwrap();
    assert_eq!(at_v1.len(), 12);
    assert!(repo.read_file("v1", "missing.c").unwrap().is_none());
    assert!(repo.resolve_ref("no-such-branch").is_err());
    assert_eq!(repo.resolve_ref(&fix).unwrap(), fix);

    repo.checkout_clean("v1").unwrap();
    let missing = "--- a/missing.c\n+++ b/missing.c\n@@ -1,1 +1,1 @@\n-a\n+b\n";
    assert!(matches!(
        repo.apply_patch(missing),
        Err(ApplyError::MissingFile { .. })
    ));
    let mismatch = "--- a/notes.c\n+++ b/notes.c\n@@ -1,3 +1,3 @@\n nope 1\n-nope 2\n+yes 2\n nope 3\n";
    assert!(matches!(
        repo.apply_patch(mismatch),
        Err(ApplyError::ContextMismatch { .. })
    ));
    repo.reset_clean().unwrap();
}
