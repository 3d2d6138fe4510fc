//! Supervision of a running extension subprocess.
//!
//! [`PluginProcess`] owns the child and hands its stdin/stdout pair to the
//! protocol layer. stderr is drained line by line into `tracing` so a chatty
//! plugin can never block on a full pipe.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::ExtensionError;

/// Tracing target for subprocess supervision.
const PROCESS_TARGET: &str = "codeloom_extension::process";

/// Everything needed to launch one extension process.
#[derive(Debug)]
pub(crate) struct LaunchSpec<'a> {
    pub(crate) name: &'a str,
    pub(crate) program: &'a Path,
    pub(crate) args: &'a [String],
    pub(crate) env: &'a BTreeMap<String, String>,
    pub(crate) working_dir: &'a Path,
}

/// A running extension process with piped standard streams.
///
/// The child is killed when this value is dropped.
#[derive(Debug)]
pub struct PluginProcess {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl PluginProcess {
    /// Spawns the process. Must be called from within a Tokio runtime.
    pub(crate) fn spawn(spec: &LaunchSpec<'_>) -> Result<Self, ExtensionError> {
        let spawn_error = |message: String, source: Option<io::Error>| ExtensionError::SpawnError {
            name: spec.name.to_owned(),
            message,
            source: source.map(Arc::new),
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| spawn_error(format!("no async runtime: {error}"), None))?;

        debug!(
            target: PROCESS_TARGET,
            extension = spec.name,
            program = %spec.program.display(),
            args = ?spec.args,
            "spawning extension process"
        );

        let mut child = Command::new(spec.program)
            .args(spec.args)
            .envs(spec.env)
            .current_dir(spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                spawn_error(
                    format!("cannot launch '{}'", spec.program.display()),
                    Some(error),
                )
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        if stdin.is_none() || stdout.is_none() {
            return Err(spawn_error(String::from("failed to capture stdio"), None));
        }
        if let Some(stderr) = child.stderr.take() {
            runtime.spawn(drain_stderr(spec.name.to_owned(), stderr));
        }

        debug!(
            target: PROCESS_TARGET,
            extension = spec.name,
            pid = child.id(),
            "extension process spawned"
        );

        Ok(Self {
            name: spec.name.to_owned(),
            child,
            stdin,
            stdout,
        })
    }

    /// Returns the extension name the process was started for.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the OS process id while the child has not been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Takes the `(stdout, stdin)` pair. Returns `None` once taken.
    pub fn take_stdio(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        let stdout = self.stdout.take()?;
        let stdin = self.stdin.take()?;
        Some((stdout, stdin))
    }

    /// Returns `true` while the child has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kills the child and reaps it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while signalling or waiting.
    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    /// Waits for the child to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while waiting.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }
}

async fn drain_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: PROCESS_TARGET, extension = %name, "stderr: {line}");
    }
}
