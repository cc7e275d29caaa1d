//! Whole-patch validation: apply, compile, test, proof-of-concept.
//!
//! Stages run in order and each one is skipped once its flag in the
//! [`Session`] is set. Every stage answers with text for the caller; the only
//! error that escapes is [`JobAborted`], raised when the build times out.

pub mod runner;

pub use runner::{run_with_timeout, CommandOutput, Procedure, RunnerError};

use crate::diagnostic::context_mismatch;
use crate::diff::split_patch;
use crate::repair::repair;
use crate::repo::Repository;
use crate::session::Session;
use std::fmt::Write as _;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const COMPILED: &str = "The patched source code COMPILED successfully.\n";
const TESTED: &str = "The patched source code passed the TESTCASE.\n";
const FIXED: &str = "The PoC no longer TRIGGERS the bug, so the patch fixes it.\n";
const REVISE: &str = "Revise the patch using the output above, or re-check the related code with \
                      the view and locate tools. Do not submit the same patch again.\n";

/// The job cannot continue.
#[derive(Error, Debug)]
pub enum JobAborted {
    #[error(
        "build timed out after {}s; check the {} applied hunk(s) manually",
        timeout.as_secs(),
        succeeded.len()
    )]
    CompileTimeout {
        timeout: Duration,
        succeeded: Vec<String>,
    },
}

/// Stage procedures of one job. A stage without a procedure passes.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub build: Option<Procedure>,
    pub test: Option<Procedure>,
    pub poc: Option<Procedure>,
    /// Run the build inside this container image instead of on the host.
    pub container_image: Option<String>,
    /// Text whose presence in PoC output means the bug still triggers.
    pub error_signature: Option<String>,
}

/// Lines of compiler output that carry an error marker.
pub fn error_lines(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.to_lowercase().contains("error:"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn reset<R: Repository + ?Sized>(repo: &R) {
    if let Err(e) = repo.reset_clean() {
        warn!("failed to reset working tree: {e}");
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every stage that has not passed yet against `patch` on `rev`.
    ///
    /// Each compile attempt counts as a mismatch round; from the second one
    /// on, hunks are repaired with forced context rewriting.
    pub fn validate<R: Repository + ?Sized>(
        &self,
        repo: &R,
        session: &mut Session,
        rev: &str,
        patch: &str,
    ) -> Result<String, JobAborted> {
        let mut out = String::new();
        if !session.compiled {
            let force = session.mismatch_count >= 1;
            session.mismatch_count += 1;
            out.push_str(&self.compile(repo, session, rev, patch, force)?);
        }
        if session.compiled && !session.tested {
            out.push_str(&self.run_tests(repo, session));
        }
        if session.compiled && session.tested && !session.poc_validated {
            out.push_str(&self.run_poc(repo, session, patch));
        }
        // Any later call that needs the patched tree recompiles from a fresh checkout.
        reset(repo);
        Ok(out)
    }

    /// Apply every hunk of `patch` to a fresh checkout of `rev`. On failure
    /// the tree is reset and the feedback names the failing hunk.
    pub fn apply_all<R: Repository + ?Sized>(
        &self,
        repo: &R,
        rev: &str,
        patch: &str,
        force: bool,
    ) -> Result<usize, String> {
        repo.checkout_clean(rev)
            .map_err(|e| format!("The repository could not be prepared: {e}\n"))?;

        let mut applied = 0;
        for (idx, unit) in split_patch(patch, false).enumerate() {
            let read_worktree = |path: &str| repo.read_worktree_file(path).ok().flatten();
            let repaired = repair(&unit, read_worktree, force);
            if let Err(e) = repo.apply_patch(&repaired.text) {
                debug!("hunk {idx} of the assembled patch failed: {e}");
                let mut msg = format!(
                    "The assembled patch failed to APPLY: hunk {idx} does not apply ({e}).\n"
                );
                if let Some(report) = context_mismatch(repo, rev, &repaired.text) {
                    msg.push_str(&report.snippet());
                    msg.push_str(
                        "A correct hunk context looks exactly like the source code above. \
                         Below are the lines where your context differs from it (line numbers \
                         are counted within the hunk, not the whole patch).\n",
                    );
                    msg.push_str(&report.comparison());
                }
                let _ = writeln!(
                    msg,
                    "Change only hunk {idx} so that its context matches the source exactly, and \
                     leave the other hunks untouched."
                );
                reset(repo);
                return Err(msg);
            }
            debug!("hunk {idx} of the assembled patch applied");
            applied += 1;
        }

        if applied == 0 {
            return Err("The patch contains no hunks to apply.\n".to_string());
        }
        Ok(applied)
    }

    fn build_command(&self, build: &Procedure, repo_dir: &std::path::Path) -> Command {
        match &self.settings.container_image {
            Some(image) => build.container_command(repo_dir, image),
            None => build.command(repo_dir),
        }
    }

    fn compile<R: Repository + ?Sized>(
        &self,
        repo: &R,
        session: &mut Session,
        rev: &str,
        patch: &str,
        force: bool,
    ) -> Result<String, JobAborted> {
        let applied = match self.apply_all(repo, rev, patch, force) {
            Ok(applied) => applied,
            Err(feedback) => return Ok(feedback),
        };
        info!("all {applied} hunk(s) of the assembled patch apply");

        let Some(build) = &self.settings.build else {
            debug!("no build procedure configured");
            session.compiled = true;
            return Ok(COMPILED.to_string());
        };

        info!("building with {}", build.script.display());
        let mut command = self.build_command(build, repo.workdir());
        let output = match run_with_timeout(&mut command, build.timeout) {
            Ok(output) => output,
            Err(e) => {
                reset(repo);
                return Ok(format!("The build could not be started: {e}\n"));
            }
        };

        if output.timed_out {
            reset(repo);
            warn!("build timed out, check the patch manually");
            for patch in &session.succeeded_patches {
                info!("applied hunk:\n{patch}");
            }
            return Err(JobAborted::CompileTimeout {
                timeout: build.timeout,
                succeeded: session.succeeded_patches.clone(),
            });
        }

        if !output.success() {
            info!("compilation FAILED");
            let errors = error_lines(&output.combined());
            debug!("{errors}");
            reset(repo);
            return Ok(format!(
                "The patched source code did not COMPILE.\nCompiler errors:\n{errors}\n{REVISE}"
            ));
        }

        info!("compilation PASS");
        session.compiled = true;
        Ok(COMPILED.to_string())
    }

    fn run_tests<R: Repository + ?Sized>(&self, repo: &R, session: &mut Session) -> String {
        let Some(test) = &self.settings.test else {
            debug!("no test procedure configured, treating as passed");
            session.tested = true;
            return TESTED.to_string();
        };

        let output = match run_with_timeout(&mut test.command(repo.workdir()), test.timeout) {
            Ok(output) => output,
            Err(e) => {
                session.compiled = false;
                return format!("The TESTCASE could not be started: {e}\n");
            }
        };

        if output.timed_out {
            info!("testsuite TIMEOUT");
            session.compiled = false;
            return format!(
                "The TESTCASE timed out after {}s.\nTest output:\n{}\n{REVISE}",
                test.timeout.as_secs(),
                output.combined()
            );
        }
        if !output.success() {
            info!("testsuite FAILED");
            session.compiled = false;
            return format!(
                "The patched program failed the TESTCASE.\nTest output:\n{}\n{REVISE}",
                output.combined()
            );
        }

        info!("testsuite PASS");
        session.tested = true;
        TESTED.to_string()
    }

    fn run_poc<R: Repository + ?Sized>(
        &self,
        repo: &R,
        session: &mut Session,
        patch: &str,
    ) -> String {
        let Some(poc) = &self.settings.poc else {
            debug!("no PoC procedure configured, treating as passed");
            session.finalize(patch);
            return FIXED.to_string();
        };

        let output = match run_with_timeout(&mut poc.command(repo.workdir()), poc.timeout) {
            Ok(output) => output,
            Err(e) => {
                session.compiled = false;
                session.tested = false;
                return format!("The PoC could not be started: {e}\n");
            }
        };

        if output.timed_out {
            info!("PoC TIMEOUT");
            session.compiled = false;
            session.tested = false;
            return format!("The PoC timed out after {}s.\n", poc.timeout.as_secs());
        }

        let log = output.combined();
        let Some(signature) = &self.settings.error_signature else {
            warn!("no error signature configured, PoC output cannot show the bug");
            session.finalize(patch);
            return FIXED.to_string();
        };

        if log.contains(signature.as_str()) {
            info!("PoC FAILED");
            debug!(status = ?output.status, "{log}");
            session.compiled = false;
            session.tested = false;
            return format!(
                "The PoC still TRIGGERS the bug, so the patch does not fix it.\nPoC output:\n{log}\n{REVISE}"
            );
        }

        info!("PoC PASS");
        session.finalize(patch);
        FIXED.to_string()
    }
}
