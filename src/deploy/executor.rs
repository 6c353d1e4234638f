//! Command execution for pipeline actions.
//!
//! [`CommandExecutor`] is the seam between the pipeline sequencer and the
//! outside world. [`ShellExecutor`] runs each command through `sh -c` in a
//! working directory; tests substitute a scripted executor. Every value
//! interpolated into a command string goes through [`shell_quote`].

use std::borrow::Cow;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

/// Quote `value` as a single POSIX shell word.
///
/// Values made only of characters the shell never interprets are returned
/// unchanged; anything else is wrapped in single quotes.
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("'\\''"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    Cow::Owned(out)
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one shell command to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError>;
}

/// Executes commands with `sh -c` inside `workdir`.
///
/// Child processes are killed if the future is dropped, so a stage timeout
/// does not leave builds running.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl ShellExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        tracing::debug!(%command, workdir = %self.workdir.display(), "Running command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_executor_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path()).with_env("GREETING", "hello");

        let output = executor.run("echo \"$GREETING\"; echo oops >&2").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_shell_executor_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path());

        let output = executor.run("exit 3").await.unwrap();
        assert!(!output.success());
        assert_eq!(output.code, Some(3));
    }

    #[tokio::test]
    async fn test_shell_executor_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path());

        executor.run("touch marker").await.unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_quoted_value_is_not_interpreted() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path());

        let hostile = "x; touch pwned 'quoted' $(touch pwned2)";
        let output = executor
            .run(&format!("printf %s {}", shell_quote(hostile)))
            .await
            .unwrap();
        assert_eq!(output.stdout, hostile);
        assert!(!dir.path().join("pwned").exists());
        assert!(!dir.path().join("pwned2").exists());
    }

    #[tokio::test]
    async fn test_shell_executor_missing_workdir() {
        let executor = ShellExecutor::new("/nonexistent/starter-kit-workdir");
        let err = executor.run("true").await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
