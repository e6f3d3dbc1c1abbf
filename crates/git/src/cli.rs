//! Process plumbing for the `git` CLI.
//!
//! Every working-tree mutation (clone, checkout, am, cherry-pick, add, push)
//! goes through a [`CommandRunner`]. The production runner spawns real
//! processes with `tokio::process`; tests substitute scripted runners so the
//! conflict and porting state machines can be driven deterministically.
use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    fmt,
    path::Path,
    process::Stdio,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use url::Url;
use utils::{shell::resolve_executable_path, text::REDACTED_PLACEHOLDER};

/// A command that exited with a non-zero status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("exit code {exit_code}: {}", self.combined_output())]
pub struct CommandFailure {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandFailure {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Both streams in one block, the way they are shown to operators.
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => "Command failed with no output".to_string(),
            (false, false) => format!("--- stderr\n{stderr}\n--- stdout\n{stdout}"),
            (false, true) => format!("--- stdout\n{stdout}"),
            (true, false) => format!("--- stderr\n{stderr}"),
        }
    }

    /// Case-insensitive search across stdout and stderr.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.stdout.to_ascii_lowercase().contains(&needle)
            || self.stderr.to_ascii_lowercase().contains(&needle)
    }
}

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("{program} executable not found or not runnable")]
    NotAvailable { program: String },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command failed with {0}")]
    CommandFailed(CommandFailure),
}

/// Program, arguments and extra environment for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// A `git` invocation that can never stop to prompt for input.
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self::new("git")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// First argument, i.e. the git subcommand (`am`, `cherry-pick`, ...).
    pub fn subcommand(&self) -> String {
        self.args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Credentials embedded in URL arguments are masked, so the rendering is
/// safe to log or echo.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", mask_url_password(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn mask_url_password(arg: &str) -> Cow<'_, str> {
    let Ok(url) = Url::parse(arg) else {
        return Cow::Borrowed(arg);
    };
    match url.password() {
        Some(password) if !password.is_empty() => Cow::Owned(arg.replace(
            &format!(":{password}@"),
            &format!(":{REDACTED_PLACEHOLDER}@"),
        )),
        _ => Cow::Borrowed(arg),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` inside `working_dir`; a non-zero exit is
    /// [`GitCliError::CommandFailed`].
    async fn run(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
    ) -> Result<CommandOutput, GitCliError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
    ) -> Result<CommandOutput, GitCliError> {
        let program = resolve_executable_path(&command.program).await.ok_or_else(|| {
            GitCliError::NotAvailable {
                program: command.program.clone(),
            }
        })?;

        let mut cmd = Command::new(&program);
        cmd.current_dir(working_dir)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }

        tracing::trace!(dir = ?working_dir, "Running command: {}", command);

        let out = cmd.output().await.map_err(|source| GitCliError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        // signal-terminated processes have no code
        let exit_code = out.status.code().unwrap_or(-1);

        if !out.status.success() {
            tracing::debug!(exit_code, "Command failed: {}", command);
            return Err(GitCliError::CommandFailed(CommandFailure {
                stdout,
                stderr,
                exit_code,
            }));
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Parsed change type from `git diff --name-status` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Unmerged,
    Unknown(String),
}

/// One entry from a name-status diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDiffEntry {
    pub change: ChangeType,
    pub path: String,
    pub old_path: Option<String>,
}

// Rename/copy scores like `R100` are matched on their first letter.
pub fn parse_name_status(output: &str) -> Vec<StatusDiffEntry> {
    let mut out = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let code = parts.next().unwrap_or("");
        let change = match code.chars().next().unwrap_or('?') {
            'A' => ChangeType::Added,
            'M' => ChangeType::Modified,
            'D' => ChangeType::Deleted,
            'R' => ChangeType::Renamed,
            'C' => ChangeType::Copied,
            'T' => ChangeType::TypeChanged,
            'U' => ChangeType::Unmerged,
            other => ChangeType::Unknown(other.to_string()),
        };

        match change {
            ChangeType::Renamed | ChangeType::Copied => {
                if let (Some(old), Some(new)) = (parts.next(), parts.next()) {
                    out.push(StatusDiffEntry {
                        change,
                        path: new.to_string(),
                        old_path: Some(old.to_string()),
                    });
                }
            }
            _ => {
                if let Some(p) = parts.next() {
                    out.push(StatusDiffEntry {
                        change,
                        path: p.to_string(),
                        old_path: None,
                    });
                }
            }
        }
    }
    out
}
