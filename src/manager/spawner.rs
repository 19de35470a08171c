//! Worker process spawner.
//!
//! Builds the runner invocation
//! `<runner> [runner_args...] <port> <module> <function> [args...]`
//! and spawns it with piped stdout/stderr (forwarded to logs by the
//! liveness monitor), a null stdin, and `kill_on_drop(true)` so a dropped
//! handle never leaks a worker.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::manager::table::AppId;
use crate::{AppError, Result};

/// Everything needed to start one worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Runner executable.
    pub runner: PathBuf,
    /// Arguments placed before the port (e.g. a script path for an interpreter).
    pub runner_args: Vec<String>,
    /// Port assigned to the worker.
    pub port: u16,
    /// App module name.
    pub module: String,
    /// App function name.
    pub function: String,
    /// Extra arguments forwarded to the app setup function.
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Full argument vector passed to the runner.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.runner_args.clone();
        argv.push(self.port.to_string());
        argv.push(self.module.clone());
        argv.push(self.function.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Build the (not yet spawned) command.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.runner);
        cmd.args(self.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Spawn the worker described by `spec`.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] if the OS refuses to start the process.
pub fn spawn_worker(id: &AppId, spec: &LaunchSpec) -> Result<Child> {
    let child = spec.command().spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn runner '{}' for app {id}: {err}",
            spec.runner.display()
        ))
    })?;

    info!(
        app_id = %id,
        pid = child.id().unwrap_or(0),
        port = spec.port,
        module = %spec.module,
        function = %spec.function,
        "app process spawned"
    );
    Ok(child)
}

/// Close a worker process: ask it to stop, wait up to `linger`, then kill.
///
/// Returns the exit code when one is available.
pub async fn close_process(id: &AppId, mut child: Child, linger: Duration) -> Option<i32> {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(app_id = %id, ?status, "app process already exited");
        return status.code();
    }

    request_stop(id, &child);

    match tokio::time::timeout(linger, child.wait()).await {
        Ok(Ok(status)) => {
            info!(app_id = %id, ?status, "app process closed");
            status.code()
        }
        Ok(Err(err)) => {
            warn!(app_id = %id, %err, "error waiting for app process");
            None
        }
        Err(_) => {
            warn!(app_id = %id, ?linger, "app process did not stop in time, killing");
            if let Err(err) = child.kill().await {
                warn!(app_id = %id, %err, "failed to kill app process");
            }
            None
        }
    }
}

#[cfg(unix)]
fn request_stop(id: &AppId, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(app_id = %id, %err, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn request_stop(_id: &AppId, _child: &Child) {
    // No graceful signal; the linger wait falls through to kill.
}
