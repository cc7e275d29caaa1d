use crate::pipeline::{PipelineSettings, Procedure};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct JobConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub patch: PatchSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Working tree of the repository; `~` is expanded.
    #[serde(default)]
    pub dir: String,
    /// Free-form label used in log file names.
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSection {
    /// The fix commit on the new branch.
    #[serde(default)]
    pub commit: String,
    /// Parent of `commit`: the revision the fix was written against.
    #[serde(default)]
    pub parent: String,
    /// Release the fix is ported to.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub error_signature: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PipelineSection {
    #[serde(default)]
    pub scripts_dir: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub build: Option<StageSection>,
    #[serde(default)]
    pub test: Option<StageSection>,
    #[serde(default)]
    pub poc: Option<StageSection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StageSection {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSection {
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Test,
    Poc,
}

impl Stage {
    pub fn script_name(self) -> &'static str {
        match self {
            Stage::Build => "build.sh",
            Stage::Test => "test.sh",
            Stage::Poc => "poc.sh",
        }
    }

    pub fn default_timeout(self) -> Duration {
        match self {
            Stage::Build => Duration::from_secs(60 * 60),
            Stage::Test => Duration::from_secs(30 * 60),
            Stage::Poc => Duration::from_secs(10 * 60),
        }
    }

    fn timeout_key(self) -> &'static str {
        match self {
            Stage::Build => "pipeline.build.timeout_secs",
            Stage::Test => "pipeline.test.timeout_secs",
            Stage::Poc => "pipeline.poc.timeout_secs",
        }
    }

    fn script_key(self) -> &'static str {
        match self {
            Stage::Build => "pipeline.build.script",
            Stage::Test => "pipeline.test.script",
            Stage::Poc => "pipeline.poc.script",
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let home = || home::home_dir().unwrap_or_default();
    if path == "~" {
        return home();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        let required = [
            ("project.dir", &self.project.dir),
            ("patch.commit", &self.patch.commit),
            ("patch.parent", &self.patch.parent),
            ("patch.target", &self.patch.target),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::MissingField { field });
            }
        }

        if let Some(dir) = self.scripts_dir().filter(|dir| !dir.is_dir()) {
            issues.push(ValidationIssue::InvalidValue {
                field: "pipeline.scripts_dir",
                message: format!("{} is not a directory", dir.display()),
            });
        }

        for stage in [Stage::Build, Stage::Test, Stage::Poc] {
            let Some(section) = self.stage_section(stage) else {
                continue;
            };
            if section.timeout_secs == Some(0) {
                issues.push(ValidationIssue::InvalidValue {
                    field: stage.timeout_key(),
                    message: "timeout must be at least one second".to_string(),
                });
            }
            if let Some(script) = self.explicit_script(section).filter(|p| !p.is_file()) {
                issues.push(ValidationIssue::InvalidValue {
                    field: stage.script_key(),
                    message: format!("{} does not exist", script.display()),
                });
            }
        }

        if self
            .patch
            .error_signature
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            issues.push(ValidationIssue::InvalidValue {
                field: "patch.error_signature",
                message: "signature must not be blank; omit it instead".to_string(),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        expand_home(&self.project.dir)
    }

    pub fn scripts_dir(&self) -> Option<PathBuf> {
        self.pipeline.scripts_dir.as_deref().map(expand_home)
    }

    fn stage_section(&self, stage: Stage) -> Option<&StageSection> {
        match stage {
            Stage::Build => self.pipeline.build.as_ref(),
            Stage::Test => self.pipeline.test.as_ref(),
            Stage::Poc => self.pipeline.poc.as_ref(),
        }
    }

    /// A configured script path; relative paths are taken from `scripts_dir`,
    /// or the project directory if there is none.
    fn explicit_script(&self, section: &StageSection) -> Option<PathBuf> {
        let script = expand_home(section.script.as_deref()?);
        if script.is_absolute() {
            return Some(script);
        }
        Some(
            self.scripts_dir()
                .unwrap_or_else(|| self.project_dir())
                .join(script),
        )
    }

        /// The procedure for `stage`: the configured script, or the stage's
    /// default script name found in `scripts_dir` and then in the project
    /// directory. `None` means the stage has no procedure.
    pub fn resolve_stage(&self, stage: Stage) -> Option<Procedure> {
        let section = self.stage_section(stage);
        let timeout = section
            .and_then(|s| s.timeout_secs)
            .map_or(stage.default_timeout(), Duration::from_secs);

        if let Some(script) = section.and_then(|s| self.explicit_script(s)) {
            return Some(Procedure::new(script, timeout));
        }

        self.scripts_dir()
            .into_iter()
            .chain(std::iter::once(self.project_dir()))
            .map(|dir| dir.join(stage.script_name()))
            .find(|path| path.is_file())
            .map(|script| Procedure::new(script, timeout))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            build: self.resolve_stage(Stage::Build),
            test: self.resolve_stage(Stage::Test),
            poc: self.resolve_stage(Stage::Poc),
            container_image: self.pipeline.container_image.clone(),
            error_signature: self.patch.error_signature.clone(),
        }
    }

    /// `<log.dir>/<project>-<tag>-<MMDDHHMM>.jsonl`
    pub fn log_path(&self, now: DateTime<Local>) -> PathBuf {
        let project = if self.project.name.is_empty() {
            "backport"
        } else {
            self.project.name.as_str()
        };
        let mut name = project.to_string();
        if let Some(tag) = self.project.tag.as_deref().filter(|t| !t.is_empty()) {
            name.push('-');
            name.push_str(tag);
        }
        let file = format!("{name}-{}.jsonl", now.format("%m%d%H%M"));
        Path::new(&expand_home(&self.log.dir)).join(file)
    }
}

/// Every problem found in a job config, not just the first.
#[derive(Error, Debug, Clone)]
#[error("{}", join_issues(issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("job config missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("job config field '{field}' is invalid: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}
