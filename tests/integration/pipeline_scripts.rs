//! Pipeline stages backed by real shell scripts.

use patch_backport::{
    JobAborted, MemoryRepository, Pipeline, PipelineSettings, Procedure, Session,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const FILE: &str = "a\nb\nc\nd\ne\nf\ng\n";
const PATCH: &str = "--- a/x.c\n+++ b/x.c\n@@ -2,5 +2,5 @@\n b\n c\n-d\n+D\n e\n f\n";

fn bash_available() -> bool {
    Command::new("bash")
        .args(["-c", "true"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/bash\n{body}\n")).unwrap();
    path
}

fn procedure(dir: &Path, name: &str, body: &str) -> Option<Procedure> {
    Some(Procedure::new(script(dir, name, body), Duration::from_secs(20)))
}

fn repo(dir: &Path) -> MemoryRepository {
    MemoryRepository::new()
        .with_workdir(dir)
        .with_file("v1", "x.c", FILE)
}

#[test]
fn test_compile_failure_reports_error_lines() {
    if !bash_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(PipelineSettings {
        build: procedure(
            dir.path(),
            "build.sh",
            "echo 'CC x.o'\necho 'x.c:4:1: error: expected declaration'\nexit 2",
        ),
        ..PipelineSettings::default()
    });
    let repo = repo(dir.path());
    let mut session = Session::new();

    let out = pipeline.validate(&repo, &mut session, "v1", PATCH).unwrap();
    assert!(out.contains("did not COMPILE"), "{out}");
    assert!(out.contains("x.c:4:1: error: expected declaration"));
    assert!(!out.contains("CC x.o"));
    assert!(!session.compiled);
}

#[test]
fn test_compile_timeout_aborts_job() {
    if !bash_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let build = Procedure::new(
        script(dir.path(), "build.sh", "echo CC x.o\nsleep 5\necho LD vmlinux"),
        Duration::from_millis(300),
    );
    let pipeline = Pipeline::new(PipelineSettings {
        build: Some(build),
        ..PipelineSettings::default()
    });
    let repo = repo(dir.path());
    let mut session = Session::new();
    session.record_success(PATCH);

    let started = Instant::now();
    match pipeline.validate(&repo, &mut session, "v1", PATCH) {
        Err(JobAborted::CompileTimeout { succeeded, .. }) => {
            assert_eq!(succeeded, vec![PATCH.to_string()]);
        }
        other => panic!("expected compile timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    assert!(!session.compiled);
}

#[test]
fn test_failed_testcase_forces_recompile() {
    if !bash_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(PipelineSettings {
        build: procedure(dir.path(), "build.sh", "exit 0"),
        test: procedure(dir.path(), "test.sh", "echo 'not ok 3 - overflow'\nexit 1"),
        ..PipelineSettings::default()
    });
    let repo = repo(dir.path());
    let mut session = Session::new();

    let out = pipeline.validate(&repo, &mut session, "v1", PATCH).unwrap();
    assert!(out.contains("COMPILED"));
    assert!(out.contains("failed the TESTCASE"));
    assert!(out.contains("not ok 3 - overflow"));
    assert!(!session.compiled);
    assert!(!session.tested);
}

#[test]
fn test_poc_signature_decides_fix() {
    if !bash_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let settings = PipelineSettings {
        build: procedure(dir.path(), "build.sh", "exit 0"),
        test: procedure(dir.path(), "test.sh", "exit 0"),
        poc: procedure(dir.path(), "poc.sh", "echo done"),
        error_signature: Some("KASAN: slab-out-of-bounds".to_string()),
        ..PipelineSettings::default()
    };

    // The signature shows up: compiled and tested are both reset.
    let triggering = PipelineSettings {
        poc: procedure(
            dir.path(),
            "poc_bad.sh",
            "echo 'BUG: KASAN: slab-out-of-bounds in smb2_open'",
        ),
        ..settings.clone()
    };
    let repo = repo(dir.path());
    let mut session = Session::new();
    let out = Pipeline::new(triggering)
        .validate(&repo, &mut session, "v1", PATCH)
        .unwrap();
    assert!(out.contains("still TRIGGERS"), "{out}");
    assert!(!session.compiled && !session.tested && !session.poc_validated);

    let out = Pipeline::new(settings)
        .validate(&repo, &mut session, "v1", PATCH)
        .unwrap();
    assert!(out.contains("no longer TRIGGERS"), "{out}");
    assert!(session.is_finished());
    assert_eq!(session.succeeded_patches, vec![PATCH.to_string()]);
}
