//! Process Sandbox
//!
//! Each task instance runs inside its own fingerprint-keyed directory:
//! declared input files are staged in by symlink, the rendered command is
//! written to `.command.sh`, stdout/stderr are captured to `.command.out`
//! and `.command.err`, and the exit status lands in `.exitcode`. Declared
//! output patterns are then verified against the directory.
//!
//! The execution backend is swappable behind [`SandboxBackend`]; the crate
//! ships [`LocalBackend`], which runs the script through bash (overridable
//! via the `FLOWRUNNER_SHELL` environment variable).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;

use crate::channel::Item;
use crate::error::{EngineError, Result};
use crate::workflow::{OutputArity, PublishMode, PublishSpec, TaskDescriptor};

/// Script, capture and status file names inside a work directory.
pub const SCRIPT_FILE: &str = ".command.sh";
pub const STDOUT_FILE: &str = ".command.out";
pub const STDERR_FILE: &str = ".command.err";
pub const EXITCODE_FILE: &str = ".exitcode";

/// How many trailing stderr lines are attached to failure reports.
const STDERR_TAIL_LINES: usize = 10;

/// Lazily-resolved shell used by the local backend.
pub static SHELL_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(shell) = std::env::var("FLOWRUNNER_SHELL") {
        let shell = shell.trim().to_string();
        if !shell.is_empty() {
            info!("Using shell from FLOWRUNNER_SHELL: {}", shell);
            return PathBuf::from(shell);
        }
    }
    PathBuf::from("bash")
});

/// Executes a prepared script inside a work directory.
///
/// Implementations cover local processes; container or remote executors
/// plug in behind the same seam.
pub trait SandboxBackend: Send + Sync {
    /// Runs the script with the given environment, capturing output.
    fn run(&self, script: &Path, work_dir: &Path, env: &[(String, String)])
        -> std::io::Result<Output>;
}

/// Runs scripts through the local shell.
pub struct LocalBackend;

impl SandboxBackend for LocalBackend {
    fn run(
        &self,
        script: &Path,
        work_dir: &Path,
        env: &[(String, String)],
    ) -> std::io::Result<Output> {
        let mut cmd = Command::new(&*SHELL_PATH);
        cmd.arg(script).current_dir(work_dir);
        for (key, value) in env {
            cmd.env(key, value);
        }
        debug!("Executing {} in {}", script.display(), work_dir.display());
        cmd.output()
    }
}

/// Sandbox IO failures are environmental, so they land in the retryable
/// class rather than aborting the run.
fn stage_error(task: &str, action: &str, err: std::io::Error) -> EngineError {
    EngineError::Execution {
        task: task.to_string(),
        message: format!("failed to {}: {}", action, err),
    }
}

/// Everything a successful sandbox run reports back to the engine.
#[derive(Debug)]
pub struct TaskOutputs {
    /// Exit code of the command (always zero on this path).
    pub exit_code: i32,
    /// Matched files per output port, relative to the work directory,
    /// sorted for determinism.
    pub ports: Vec<(String, Vec<PathBuf>)>,
    /// The rendered command, recorded in the cache manifest.
    pub command: String,
}

/// Runs one task instance inside `work_dir`.
///
/// The directory is wiped before the first attempt of a run (clearing
/// stale failed state from prior runs); retried attempts reuse it as-is.
pub fn run_instance(
    descriptor: &TaskDescriptor,
    inputs: &[Item],
    work_dir: &Path,
    attempt: u32,
    tag: Option<&str>,
    backend: &dyn SandboxBackend,
) -> Result<TaskOutputs> {
    let task = descriptor.name.as_str();

    if attempt <= 1 && work_dir.exists() {
        fs::remove_dir_all(work_dir).map_err(|e| stage_error(task, "wipe work dir", e))?;
    }
    fs::create_dir_all(work_dir).map_err(|e| stage_error(task, "create work dir", e))?;

    stage_inputs(task, inputs, work_dir)?;

    let bindings = descriptor.bind_inputs(inputs);
    let command = descriptor.template.render(&bindings)?;
    let script_path = write_script(work_dir, &command).map_err(|e| stage_error(task, "write script", e))?;

    let mut env = vec![
        ("FLOWRUNNER_TASK".to_string(), task.to_string()),
        ("FLOWRUNNER_ATTEMPT".to_string(), attempt.to_string()),
        ("FLOWRUNNER_CPUS".to_string(), descriptor.cpus.to_string()),
    ];
    if let Some(tag) = tag {
        env.push(("FLOWRUNNER_TAG".to_string(), tag.to_string()));
    }

    let output = backend
        .run(&script_path, work_dir, &env)
        .map_err(|e| stage_error(task, "spawn command", e))?;

    let exit_code = output.status.code().unwrap_or(-1);
    fs::write(work_dir.join(STDOUT_FILE), &output.stdout)
        .map_err(|e| stage_error(task, "capture stdout", e))?;
    fs::write(work_dir.join(STDERR_FILE), &output.stderr)
        .map_err(|e| stage_error(task, "capture stderr", e))?;
    fs::write(work_dir.join(EXITCODE_FILE), format!("{}\n", exit_code))
        .map_err(|e| stage_error(task, "record exit code", e))?;

    if !output.status.success() {
        let tail = stderr_tail(&output.stderr);
        error!("Task '{}' exited with code {}: {}", task, exit_code, tail);
        return Err(EngineError::Execution {
            task: task.to_string(),
            message: format!("exit code {}: {}", exit_code, tail),
        });
    }

    let ports = verify_outputs(descriptor, work_dir)?;
    Ok(TaskOutputs {
        exit_code,
        ports,
        command,
    })
}

/// Stages every file reachable in the bound inputs into the work
/// directory under its basename.
fn stage_inputs(task: &str, inputs: &[Item], work_dir: &Path) -> Result<()> {
    let mut files = Vec::new();
    for item in inputs {
        item.collect_files(&mut files);
    }

    let mut staged: HashMap<String, PathBuf> = HashMap::new();
    for source in files {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::Execution {
                task: task.to_string(),
                message: format!("input path '{}' has no file name", source.display()),
            })?;

        if let Some(existing) = staged.get(&name) {
            if existing != &source {
                return Err(EngineError::Execution {
                    task: task.to_string(),
                    message: format!(
                        "staging collision on '{}': '{}' and '{}'",
                        name,
                        existing.display(),
                        source.display()
                    ),
                });
            }
            continue;
        }

        let target = work_dir.join(&name);
        if !target.exists() {
            link_or_copy(&source, &target).map_err(|e| EngineError::Execution {
                task: task.to_string(),
                message: format!("failed to stage '{}': {}", source.display(), e),
            })?;
            debug!("Staged {} -> {}", source.display(), target.display());
        }
        staged.insert(name, source);
    }
    Ok(())
}

#[cfg(unix)]
fn link_or_copy(source: &Path, target: &Path) -> std::io::Result<()> {
    let absolute = source.canonicalize()?;
    std::os::unix::fs::symlink(absolute, target)
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::copy(source, target).map(|_| ())
}

/// Writes the wrapper script for a rendered command.
fn write_script(work_dir: &Path, command: &str) -> std::io::Result<PathBuf> {
    let script_path = work_dir.join(SCRIPT_FILE);
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

/// Matches each declared output pattern against the work directory.
///
/// A mandatory pattern with zero matches after a clean exit, or a
/// single-file port matching several files, is the logic-error class.
fn verify_outputs(
    descriptor: &TaskDescriptor,
    work_dir: &Path,
) -> Result<Vec<(String, Vec<PathBuf>)>> {
    let task = descriptor.name.as_str();
    let options = glob::MatchOptions {
        // Keep `*` from swallowing the sandbox's own dotfiles.
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };

    let mut ports = Vec::with_capacity(descriptor.outputs.len());
    for port in &descriptor.outputs {
        let pattern = work_dir.join(&port.pattern);
        let pattern = pattern.to_string_lossy();
        let walker = glob::glob_with(&pattern, options).map_err(|e| {
            EngineError::Configuration(format!(
                "task '{}': invalid output pattern '{}': {}",
                task, port.pattern, e
            ))
        })?;

        let mut matches: Vec<PathBuf> = Vec::new();
        for entry in walker {
            let path = entry.map_err(|e| EngineError::Execution {
                task: task.to_string(),
                message: format!("cannot read output candidate: {}", e),
            })?;
            let relative = path
                .strip_prefix(work_dir)
                .unwrap_or(&path)
                .to_path_buf();
            matches.push(relative);
        }
        matches.sort();

        if matches.is_empty() && !port.optional {
            return Err(EngineError::MissingOutput {
                task: task.to_string(),
                message: format!(
                    "mandatory output pattern '{}' on port '{}' matched no files",
                    port.pattern, port.name
                ),
            });
        }
        if port.arity == OutputArity::Single && matches.len() > 1 {
            return Err(EngineError::MissingOutput {
                task: task.to_string(),
                message: format!(
                    "single-file port '{}' matched {} files via '{}'",
                    port.name,
                    matches.len(),
                    port.pattern
                ),
            });
        }

        ports.push((port.name.clone(), matches));
    }
    Ok(ports)
}

/// Materializes output files into the publish directory. Returns the
/// published paths.
pub fn publish_outputs(
    spec: &PublishSpec,
    work_dir: &Path,
    files: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&spec.dir)?;

    let mut published = Vec::with_capacity(files.len());
    for relative in files {
        let source = work_dir.join(relative);
        let name = relative
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| relative.clone());
        let target = spec.dir.join(name);

        if target.exists() {
            fs::remove_file(&target)?;
        }

        match spec.mode {
            PublishMode::Copy => {
                fs::copy(&source, &target)?;
            }
            PublishMode::Link => {
                if link_or_copy(&source, &target).is_err() {
                    fs::copy(&source, &target)?;
                }
            }
            PublishMode::Move => {
                if fs::rename(&source, &target).is_err() {
                    // Cross-device move.
                    fs::copy(&source, &target)?;
                    fs::remove_file(&source)?;
                }
            }
        }
        debug!("Published {}", target.display());
        published.push(target);
    }
    Ok(published)
}

/// Last few lines of captured stderr, flattened for error messages.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "(no stderr)".to_string()
    } else {
        tail
    }
}

/// Reads the stderr tail back from a work directory, for failure reports
/// assembled after the fact.
pub fn read_stderr_tail(work_dir: &Path) -> Option<String> {
    match fs::read(work_dir.join(STDERR_FILE)) {
        Ok(bytes) => Some(stderr_tail(&bytes)),
        Err(e) => {
            warn!(
                "Could not read {} in {}: {}",
                STDERR_FILE,
                work_dir.display(),
                e
            );
            None
        }
    }
}
