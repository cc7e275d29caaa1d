use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use patch_backport::log::{init_tracing, SessionLog};
use patch_backport::repo::Repository;
use patch_backport::{
    load_from_path, repair, split_patch, Backporter, GitRepository, HunkStatus, InitialPass,
    JobRefs, Pipeline, ToolRequest, ToolResponse,
};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "patch-backport")]
#[command(about = "Port a fix commit back to an older release", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the single-hunk units of a patch file
    Split {
        patch: PathBuf,

        /// Keep the commit message in front of every unit
        #[arg(long)]
        with_message: bool,
    },

    /// Repair every hunk of a patch file against a revision
    Repair {
        patch: PathBuf,

        /// Repository working tree
        #[arg(long)]
        repo: PathBuf,

        /// Revision to repair against
        #[arg(long)]
        rev: String,

        /// Replace context with the real file content
        #[arg(short, long)]
        force: bool,

        /// Show a diff between each input hunk and its repair
        #[arg(short, long)]
        diff: bool,
    },

    /// Try every hunk of the job's fix commit against its target
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Serve tool calls as JSON lines on stdin and stdout
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show lines of a file at a revision
    View {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(value_name = "REF")]
        rev: String,
        path: String,
        start: usize,
        end: usize,
    },

    /// Find where a symbol is defined at a revision
    Locate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(value_name = "REF")]
        rev: String,
        symbol: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Split {
            patch,
            with_message,
        } => cmd_split(&patch, with_message),

        Commands::Repair {
            patch,
            repo,
            rev,
            force,
            diff,
        } => cmd_repair(&patch, &repo, &rev, force, diff),

        Commands::Run { config } => cmd_run(&config),

        Commands::Serve { config } => cmd_serve(&config),

        Commands::View {
            config,
            rev,
            path,
            start,
            end,
        } => {
            let backporter = open_job(&config, false)?;
            print!("{}", backporter.view_file(&rev, &path, start, end));
            Ok(())
        }

        Commands::Locate {
            config,
            rev,
            symbol,
        } => {
            let mut backporter = open_job(&config, false)?;
            print!("{}", backporter.locate_symbol(&rev, &symbol));
            Ok(())
        }
    }
}

fn read_patch(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read patch {}", path.display()))
}

/// Load the job config, open its repository and resolve its revisions.
fn open_job(config_path: &Path, with_log: bool) -> Result<Backporter<GitRepository>> {
    let config = load_from_path(config_path)?;
    let dir = config.project_dir();
    let repo = GitRepository::open(&dir)
        .with_context(|| format!("{} is not a git repository", dir.display()))?;

    let mut backporter = Backporter::new(
        repo,
        JobRefs::from_config(&config),
        Pipeline::new(config.pipeline_settings()),
    );
    backporter
        .resolve_refs()
        .context("the job config names a revision the repository does not have")?;

    if with_log {
        let path = config.log_path(Local::now());
        let log = SessionLog::open(&path)
            .with_context(|| format!("failed to open session log {}", path.display()))?;
        info!("session log: {}", path.display());
        backporter = backporter.with_log(log);
    }
    Ok(backporter)
}

fn cmd_split(patch: &Path, with_message: bool) -> Result<()> {
    let text = read_patch(patch)?;
    let mut count = 0;
    for (idx, unit) in split_patch(&text, with_message).enumerate() {
        println!("{}", format!("# hunk {idx}").bold());
        print!("{unit}");
        count += 1;
    }
    if count == 0 {
        anyhow::bail!("no hunks found in {}", patch.display());
    }
    Ok(())
}

fn cmd_repair(patch: &Path, repo_dir: &Path, rev: &str, force: bool, diff: bool) -> Result<()> {
    let text = read_patch(patch)?;
    let repo = GitRepository::open(repo_dir)
        .with_context(|| format!("{} is not a git repository", repo_dir.display()))?;
    let rev = repo.resolve_ref(rev)?;

    for (idx, unit) in split_patch(&text, false).enumerate() {
        let repaired = repair(&unit, |path| repo.read_file(&rev, path).ok().flatten(), force);
        if diff {
            let status = if repaired.modified {
                "modified".yellow()
            } else {
                "unchanged".green()
            };
            println!("{} ({status})", format!("# hunk {idx}").bold());
            show_diff(&unit, &repaired.text);
        } else {
            print!("{}", repaired.text);
        }
    }
    Ok(())
}

fn show_diff(original: &str, modified: &str) {
    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn describe_pass(pass: &InitialPass) -> String {
    let mut out = String::new();
    for (idx, status) in pass.statuses.iter().enumerate() {
        match status {
            HunkStatus::Applied => out.push_str(&format!("hunk {idx}: applied\n")),
            HunkStatus::Pending { feedback } => {
                out.push_str(&format!("hunk {idx}: needs revision\n{feedback}\n"))
            }
        }
    }
    if let Some(validation) = &pass.validation {
        out.push_str(validation);
    }
    out
}

fn cmd_run(config: &Path) -> Result<()> {
    let mut backporter = open_job(config, true)?;
    let pass = backporter.run_initial_pass()?;

    if pass.statuses.is_empty() {
        anyhow::bail!("commit {} has no hunks to port", backporter.refs().commit);
    }
    print!("{}", describe_pass(&pass));

    let applied = pass
        .statuses
        .iter()
        .filter(|s| **s == HunkStatus::Applied)
        .count();
    let pending = pass.statuses.len() - applied;
    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", applied).green());
    println!("  {} need revision", format!("{}", pending).yellow());

    if backporter.session().is_finished() {
        println!("{}", "Backport complete:".green().bold());
        print!("{}", backporter.session().complete_patch());
    } else if pending > 0 {
        println!("Use `patch-backport serve` to revise the remaining hunks.");
    }
    Ok(())
}

fn write_response(out: &mut impl Write, response: &ToolResponse) -> Result<()> {
    serde_json::to_writer(&mut *out, response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn cmd_serve(config: &Path) -> Result<()> {
    let mut backporter = open_job(config, true)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let first = match backporter.run_initial_pass() {
        Ok(pass) => ToolResponse {
            ok: true,
            text: describe_pass(&pass),
            finished: backporter.session().is_finished(),
        },
        Err(aborted) => ToolResponse {
            ok: false,
            text: aborted.to_string(),
            finished: true,
        },
    };
    let done = first.finished;
    write_response(&mut out, &first)?;
    if done {
        return Ok(());
    }

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => backporter.respond(request),
            Err(e) => {
                warn!("malformed request: {e}");
                ToolResponse {
                    ok: false,
                    text: format!("Malformed request: {e}\n"),
                    finished: false,
                }
            }
        };
        let done = response.finished;
        write_response(&mut out, &response)?;
        if done {
            break;
        }
    }
    Ok(())
}
