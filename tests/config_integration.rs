//! Integration tests for job configuration loading.

use chrono::{Local, TimeZone};
use patch_backport::config::{
    load_from_path, load_from_str, ConfigError, Stage, ValidationIssue,
};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const JOB: &str = r#"
[project]
name = "linux"
url = "https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git"
dir = "/src/linux"
tag = "CVE-2024-26592"

[patch]
commit = "38c8a9a52082579090e34c033d439ed2cd1a462d"
parent = "38c8a9a52082579090e34c033d439ed2cd1a462d^"
target = "v5.15"
error_signature = "KASAN: slab-use-after-free"

[pipeline]
container_image = "backport-build:latest"

[pipeline.build]
timeout_secs = 7200

[pipeline.poc]
timeout_secs = 120

[log]
dir = "/var/log/backport"
"#;

#[test]
fn test_load_full_job() {
    let scripts = TempDir::new().unwrap();
    let script = scripts.path().join("build_kernel.sh");
    fs::write(&script, "make -j8\n").unwrap();
    let input = JOB.replace(
        "timeout_secs = 7200",
        &format!("script = {:?}\ntimeout_secs = 7200", script.display().to_string()),
    );

    let config = load_from_str(&input).unwrap();
    assert_eq!(config.project.name, "linux");
    assert_eq!(config.patch.target, "v5.15");
    assert_eq!(
        config.patch.error_signature.as_deref(),
        Some("KASAN: slab-use-after-free")
    );

    let build = config.resolve_stage(Stage::Build).unwrap();
    assert_eq!(build.script, script);
    assert_eq!(build.timeout, Duration::from_secs(7200));

    let settings = config.pipeline_settings();
    assert_eq!(settings.container_image.as_deref(), Some("backport-build:latest"));
    assert!(settings.test.is_none());
}

#[test]
fn test_missing_scripts_are_invalid() {
    let input = JOB
        .replace("timeout_secs = 7200", "script = \"/nonexistent/build.sh\"")
        .replace(
            "[pipeline]\n",
            "[pipeline]\nscripts_dir = \"/nonexistent/scripts\"\n",
        );
    let err = load_from_str(&input).unwrap_err();
    let source = match err {
        ConfigError::Validation { source, .. } => source,
        other => panic!("expected validation error, got {other}"),
    };
    let fields: Vec<_> = source
        .issues
        .iter()
        .filter_map(|issue| match issue {
            ValidationIssue::InvalidValue { field, .. } => Some(*field),
            _ => None,
        })
        .collect();
    assert_eq!(fields, vec!["pipeline.scripts_dir", "pipeline.build.script"]);
}

#[test]
fn test_missing_fields_are_collected() {
    let err = load_from_str("[project]\nname = \"x\"\n").unwrap_err();
    let source = match err {
        ConfigError::Validation { source, .. } => source,
        other => panic!("expected validation error, got {other}"),
    };
    let fields: Vec<_> = source
        .issues
        .iter()
        .filter_map(|issue| match issue {
            ValidationIssue::MissingField { field } => Some(*field),
            _ => None,
        })
        .collect();
    assert_eq!(
        fields,
        vec!["project.dir", "patch.commit", "patch.parent", "patch.target"]
    );
}

#[test]
fn test_zero_timeout_is_invalid() {
    let input = JOB.replace("timeout_secs = 120", "timeout_secs = 0");
    let err = load_from_str(&input).unwrap_err();
    assert!(err.to_string().contains("pipeline.poc.timeout_secs"));
}

#[test]
fn test_toml_error_carries_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job.toml");
    fs::write(&path, "[project\nname = 1").unwrap();
    let err = load_from_path(&path).unwrap_err();
    assert!(!load_from_str("[project\nname = 1").unwrap_err().to_string().contains(".toml"));
    assert!(matches!(err, ConfigError::Toml { path: Some(_), .. }));
    assert!(err.to_string().contains("job.toml"));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_from_path("/nonexistent/job.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_stage_scripts_are_discovered() {
    let scripts = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    fs::write(scripts.path().join("build.sh"), "exit 0\n").unwrap();
    fs::write(project.path().join("build.sh"), "exit 1\n").unwrap();
    fs::write(project.path().join("test.sh"), "exit 0\n").unwrap();

    let input = format!(
        "[project]\ndir = {:?}\n[patch]\ncommit = \"a\"\nparent = \"a^\"\ntarget = \"v1\"\n\
         [pipeline]\nscripts_dir = {:?}\n",
        project.path().display().to_string(),
        scripts.path().display().to_string()
    );
    let config = load_from_str(&input).unwrap();

    let build = config.resolve_stage(Stage::Build).unwrap();
    assert_eq!(build.script, scripts.path().join("build.sh"));
    assert_eq!(build.timeout, Stage::Build.default_timeout());

    let test = config.resolve_stage(Stage::Test).unwrap();
    assert_eq!(test.script, project.path().join("test.sh"));
    assert_eq!(test.timeout, Duration::from_secs(1800));

    assert!(config.resolve_stage(Stage::Poc).is_none());
}

#[test]
fn test_log_path_names_project_and_tag() {
    let config = load_from_str(JOB).unwrap();
    let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
    let path = config.log_path(now);
    assert_eq!(
        path.to_str(),
        Some("/var/log/backport/linux-CVE-2024-26592-03070905.jsonl")
    );
}
