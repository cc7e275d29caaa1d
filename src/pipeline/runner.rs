//! Running stage scripts with a wall-clock limit.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the output pipes to close once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture {0} of child process")]
    Capture(&'static str),

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Debug)]
pub struct CommandOutput {
    /// `None` if the process could not be reaped after a kill.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R>(pipe: R, stream: Stream, tx: mpsc::Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = BufReader::new(pipe).read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

/// SIGKILL every process in the child's process group. The child was
/// spawned as the group leader, so this reaches whatever it forked.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid names a process group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Run `command`, killing it and everything it forked once `timeout` has
/// elapsed.
///
/// Output pipes are drained on background threads so a chatty child cannot
/// block on a full pipe while we poll for exit. Processes the child leaves
/// behind in its process group are killed when it exits, so they cannot hold
/// the pipes open.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, RunnerError> {
    let program = command.get_program().to_string_lossy().into_owned();
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;

    let (tx, rx) = mpsc::channel();
    let stdout = child.stdout.take().ok_or(RunnerError::Capture("stdout"))?;
    let stderr = child.stderr.take().ok_or(RunnerError::Capture("stderr"))?;
    drain(stdout, Stream::Stdout, tx.clone());
    drain(stderr, Stream::Stderr, tx);

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    debug!("{program} exceeded {}s, killing", timeout.as_secs());
                    timed_out = true;
                    kill_process_group(&child);
                    let _ = child.kill();
                    break child.wait().ok();
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_group(&child);
                return Err(RunnerError::Wait(e));
            }
        }
    };
    if !timed_out {
        kill_process_group(&child);
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let deadline = Instant::now() + DRAIN_GRACE;
    for _ in 0..2 {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok((Stream::Stdout, buf)) => stdout = buf,
            Ok((Stream::Stderr, buf)) => stderr = buf,
            Err(_) => {
                warn!("{program} left its output pipes open, dropping the rest of its output");
                break;
            }
        }
    }

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    })
}

/// A stage script and its time limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub script: PathBuf,
    pub timeout: Duration,
}

impl Procedure {
    pub fn new(script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
        }
    }

    /// `bash <script>` with `workdir` as the current directory.
    pub fn command(&self, workdir: &Path) -> Command {
        let mut command = Command::new("bash");
        command.arg(&self.script).current_dir(workdir);
        command
    }

    /// The same script run inside a throwaway container that mounts the
    /// working tree (and the script's directory) at identical paths.
    pub fn container_command(&self, workdir: &Path, image: &str) -> Command {
        let dir = workdir.display().to_string();
        let mount = format!("{dir}:{dir}");
        let mut command = Command::new("docker");
        command.args(["run", "--rm", "-v", mount.as_str()]);
        if let Some(script_dir) = self.script.parent().filter(|p| !p.starts_with(workdir)) {
            let script_dir = script_dir.display().to_string();
            if !script_dir.is_empty() {
                let mount = format!("{script_dir}:{script_dir}");
                command.args(["-v", mount.as_str()]);
            }
        }
        let inner = format!("cd {dir}; bash {}", self.script.display());
        command.args([image, "/bin/bash", "-c", inner.as_str()]);
        command.current_dir(workdir);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash_available() -> bool {
        Command::new("bash").arg("-c").arg("true").status().is_ok()
    }

    #[test]
    fn test_run_captures_output_and_status() {
        if !bash_available() {
            return;
        }
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert!(!output.timed_out);
        assert!(!output.success());
        assert_eq!(output.status.and_then(|s| s.code()), Some(3));
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[test]
    fn test_run_kills_on_timeout() {
        if !bash_available() {
            return;
        }
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "exec sleep 5"]);
        let started = Instant::now();
        let output = run_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_run_kills_forked_children_on_timeout() {
        if !bash_available() {
            return;
        }
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "sleep 6; echo done"]);
        let started = Instant::now();
        let output = run_with_timeout(&mut cmd, Duration::from_millis(300)).unwrap();
        assert!(output.timed_out);
        assert!(!output.stdout.contains("done"));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn test_run_does_not_wait_for_background_leftovers() {
        if !bash_available() {
            return;
        }
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "(sleep 6 &); echo built"]);
        let started = Instant::now();
        let output = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "built\n");
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn test_spawn_failure() {
        let mut cmd = Command::new("definitely-not-a-real-program-4242");
        assert!(matches!(
            run_with_timeout(&mut cmd, Duration::from_secs(1)),
            Err(RunnerError::Spawn { .. })
        ));
    }

    #[test]
    fn test_container_command_mounts_workdir() {
        let proc = Procedure::new("/jobs/cve-1/build.sh", Duration::from_secs(60));
        let cmd = proc.container_command(Path::new("/src/linux"), "builder:16.04");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "docker");
        assert!(args.contains(&"/src/linux:/src/linux".to_string()));
        assert!(args.contains(&"/jobs/cve-1:/jobs/cve-1".to_string()));
        assert_eq!(args.last().unwrap(), "cd /src/linux; bash /jobs/cve-1/build.sh");
    }
}
