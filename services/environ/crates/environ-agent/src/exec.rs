//! Shell execution for the `execute` operation.
//!
//! SECURITY: `execute` runs arbitrary commands as the agent's user for
//! anyone able to publish on the agent's channel. [`ExecPolicy`] can turn it
//! off, restrict it to an allowlist of programs, and bound concurrency; its
//! defaults keep the unrestricted behaviour existing control planes rely on.

use std::future::Future;
use std::process::{Output, Stdio};
use std::time::Duration;

use environ_common::{AgentConfig, Outcome};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

use crate::error::ExecError;

/// Runs one command line through the host shell.
///
/// The production implementation is [`ShellRunner`]; test doubles can
/// return canned output without spawning processes.
pub trait CommandRunner: Send + Sync {
    fn run_shell(&self, cmd: &str) -> impl Future<Output = Result<Output, ExecError>> + Send;
}

/// Production `CommandRunner`: `sh -c` (or `cmd /C` on Windows) via tokio,
/// with an optional timeout that kills the child.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

fn shell_command(cmd: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut command = tokio::process::Command::new("cmd");
        command.arg("/C").arg(cmd);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
}

impl CommandRunner for ShellRunner {
    async fn run_shell(&self, cmd: &str) -> Result<Output, ExecError> {
        let mut child = shell_command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Launch)?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Drain both pipes while waiting, or a chatty child blocks on a
        // full pipe buffer and wait() never resolves.
        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                Ok::<Output, ExecError>(Output {
                    status: status.map_err(ExecError::Wait)?,
                    stdout,
                    stderr,
                })
            } => result,
            () = deadline => {
                let _ = child.kill().await;
                let secs = self.timeout.map_or(0, |t| t.as_secs());
                Err(ExecError::Timeout(secs))
            }
        }
    }
}

/// Gate in front of the runner.
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    pub enabled: bool,
    /// Permitted programs (first word of the command). `None` allows all.
    pub allowlist: Option<Vec<String>>,
    pub max_concurrent: usize,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: None,
            max_concurrent: 4,
        }
    }
}

impl ExecPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            enabled: config.exec_enabled,
            allowlist: config.exec_allowlist.clone(),
            max_concurrent: config.exec_max_concurrent,
        }
    }

    /// Refuse `cmd` before anything is spawned.
    ///
    /// The allowlist only inspects the first word; it is a guard against
    /// accidental use, not a sandbox, since the shell still interprets the
    /// rest of the line.
    pub fn check(&self, cmd: &str) -> Result<(), ExecError> {
        if !self.enabled {
            return Err(ExecError::Disabled);
        }
        let Some(program) = cmd.split_whitespace().next() else {
            return Err(ExecError::Empty);
        };
        match &self.allowlist {
            Some(allowed) if !allowed.iter().any(|p| p == program) => {
                Err(ExecError::NotAllowed(program.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// The `execute` operation: policy check, bounded concurrency, and
/// mapping of process output to an [`Outcome`].
#[derive(Debug)]
pub struct Shell<R = ShellRunner> {
    runner: R,
    policy: ExecPolicy,
    permits: Semaphore,
}

impl<R: CommandRunner> Shell<R> {
    pub fn new(runner: R, policy: ExecPolicy) -> Self {
        let permits = Semaphore::new(policy.max_concurrent.max(1));
        Self {
            runner,
            policy,
            permits,
        }
    }

    pub fn policy(&self) -> &ExecPolicy {
        &self.policy
    }

    /// Run `cmd` and report stdout as `msg`, or stderr as `error`.
    ///
    /// Any stderr output makes the result an error, even on exit status 0.
    /// A failing command with silent stderr reports its exit status.
    pub async fn execute(&self, cmd: &str) -> Outcome {
        if let Err(e) = self.policy.check(cmd) {
            tracing::warn!(error = %e, "execute refused");
            return Outcome::Error(e.to_string());
        }

        let Ok(_permit) = self.permits.acquire().await else {
            return Outcome::Error("execute is shutting down".to_string());
        };
        tracing::info!(cmd, "executing command");

        match self.runner.run_shell(cmd).await {
            Ok(output) => outcome_from_output(&output),
            Err(e) => {
                tracing::warn!(error = %e, "command failed to run");
                Outcome::Error(e.to_string())
            }
        }
    }
}

/// Map a finished process to the reply contract.
pub fn outcome_from_output(output: &Output) -> Outcome {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        return Outcome::Error(stderr.into_owned());
    }
    if !output.status.success() {
        return Outcome::Error(format!("command exited with {}", output.status));
    }
    Outcome::Msg(String::from_utf8_lossy(&output.stdout).into_owned())
}
