//! External command execution with a deadline.
//!
//! Commands run without a shell, with stdin closed and stdout/stderr
//! captured. The child is killed when the deadline elapses or when the
//! returned future is dropped.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Directories searched after `PATH`; admin tools often live in sbin.
const EXTRA_SEARCH_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/local/sbin", "/usr/local/bin"];

/// Maximum number of stderr bytes kept in [`ExecError::Failed`].
const MAX_STDERR_LEN: usize = 512;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The executable does not exist or is not executable.
    #[error("executable '{0}' not found")]
    NotFound(String),

    /// The deadline elapsed before the command finished.
    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The command exited unsuccessfully.
    ///
    /// `stdout` is kept because some tools (smartctl) report data together
    /// with a non-zero status.
    #[error("'{command}' exited with code {exit_code:?}: {stderr}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        stdout: Vec<u8>,
    },

    /// Spawning or waiting failed.
    #[error("failed to run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one executable with a fixed timeout.
#[derive(Debug, Clone)]
pub struct Executor {
    path: PathBuf,
    timeout: Duration,
}

impl Executor {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Resolve `name` on the search path and build an executor for it.
    ///
    /// # Errors
    /// Returns [`ExecError::NotFound`] if the executable cannot be located.
    pub fn lookup(name: &str, timeout: Duration) -> Result<Self, ExecError> {
        Ok(Self::new(resolve(name)?, timeout))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the executable with `args` and return its stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<Vec<u8>, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run(&self.path, args, self.timeout).await
    }
}

/// Seam between collectors and the commands they run.
///
/// [`Executor`] is the real implementation; tests substitute scripted fakes.
#[async_trait::async_trait]
pub trait CommandProbe: Send + Sync {
    /// Run the probe's executable with `args` and return its stdout.
    async fn run_args(&self, args: &[&str]) -> Result<Vec<u8>, ExecError>;
}

#[async_trait::async_trait]
impl CommandProbe for Executor {
    async fn run_args(&self, args: &[&str]) -> Result<Vec<u8>, ExecError> {
        self.run(args).await
    }
}

/// Locate an executable.
///
/// Names containing a path separator are checked as given. Bare names are
/// searched on `PATH`, then in the usual sbin directories.
///
/// # Errors
/// Returns [`ExecError::NotFound`] if nothing executable is found.
pub fn resolve(name: &str) -> Result<PathBuf, ExecError> {
    if name.trim().is_empty() {
        return Err(ExecError::NotFound(name.to_string()));
    }

    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(ExecError::NotFound(name.to_string()))
        };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .chain(EXTRA_SEARCH_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ExecError::NotFound(name.to_string()))
}

/// Run `path` with `args`, returning stdout on success.
///
/// # Errors
/// - [`ExecError::NotFound`] if the binary is absent
/// - [`ExecError::Timeout`] if `timeout` elapses (the child is killed)
/// - [`ExecError::Failed`] on a non-zero exit status
pub async fn run<I, S>(path: &Path, args: I, timeout: Duration) -> Result<Vec<u8>, ExecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let command = path.display().to_string();

    let child = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ExecError::NotFound(command.clone())
            }
            _ => ExecError::Io {
                command: command.clone(),
                source: e,
            },
        })?;

    tracing::trace!(command = %command, timeout_ms = timeout.as_millis(), "Running command");

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ExecError::Io { command, source: e }),
        Err(_) => return Err(ExecError::Timeout { command, timeout }),
    };

    if output.status.success() {
        return Ok(output.stdout);
    }

    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.len() > MAX_STDERR_LEN {
        let mut cut = MAX_STDERR_LEN;
        while !stderr.is_char_boundary(cut) {
            cut -= 1;
        }
        stderr.truncate(cut);
    }

    Err(ExecError::Failed {
        command,
        exit_code: output.status.code(),
        stderr,
        stdout: output.stdout,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command probe for collector tests.

    use std::sync::Mutex;

    use super::*;

    /// Answers invocations whose joined arguments contain a fragment.
    ///
    /// Later registrations take precedence over earlier ones.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        answers: Mutex<Vec<(String, Result<Vec<u8>, (Option<i32>, Vec<u8>)>)>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn on(self, fragment: &str, stdout: impl Into<Vec<u8>>) -> Self {
            self.set(fragment, stdout);
            self
        }

        /// Fail with `code`, still returning `stdout`.
        pub(crate) fn fail(self, fragment: &str, code: i32, stdout: impl Into<Vec<u8>>) -> Self {
            if let Ok(mut answers) = self.answers.lock() {
                answers.push((fragment.to_string(), Err((Some(code), stdout.into()))));
            }
            self
        }

        /// Replace the answer for `fragment` on a shared probe.
        pub(crate) fn set(&self, fragment: &str, stdout: impl Into<Vec<u8>>) {
            if let Ok(mut answers) = self.answers.lock() {
                answers.push((fragment.to_string(), Ok(stdout.into())));
            }
        }

        pub(crate) fn call_count(&self, fragment: &str) -> usize {
            self.calls
                .lock()
                .map(|c| c.iter().filter(|a| a.contains(fragment)).count())
                .unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl CommandProbe for ScriptedProbe {
        async fn run_args(&self, args: &[&str]) -> Result<Vec<u8>, ExecError> {
            let joined = args.join(" ");
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(joined.clone());
            }
            let answers = self
                .answers
                .lock()
                .map_err(|_| ExecError::NotFound("poisoned".into()))?;
            let answer = answers
                .iter()
                .rev()
                .find(|(fragment, _)| joined.contains(fragment.as_str()))
                .map(|(_, answer)| answer.clone());
            match answer {
                Some(Ok(stdout)) => Ok(stdout),
                Some(Err((exit_code, stdout))) => Err(ExecError::Failed {
                    command: joined,
                    exit_code,
                    stderr: String::new(),
                    stdout,
                }),
                None => Err(ExecError::NotFound(joined)),
            }
        }
    }
}
