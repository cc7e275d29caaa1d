use crate::config::schema::{JobConfig, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read job config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job config{}: {source}", origin(path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid job config{}: {source}", origin(path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

fn parse(input: &str, path: Option<&Path>) -> Result<JobConfig, ConfigError> {
    let config: JobConfig = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        path: path.map(Path::to_path_buf),
        source,
    })?;
    config.validate().map_err(|source| ConfigError::Validation {
        path: path.map(Path::to_path_buf),
        source,
    })?;

    if config.patch.error_signature.is_none() {
        warn!("no patch.error_signature configured; PoC output will not be checked");
    }
    debug!(
        project = %config.project.name,
        target = %config.patch.target,
        "loaded job config"
    );
    Ok(config)
}

/// Parse and validate a job config held in memory.
pub fn load_from_str(input: &str) -> Result<JobConfig, ConfigError> {
    parse(input, None)
}

/// Read, parse and validate the job config at `path`. Errors name the file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<JobConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, Some(path))
}
