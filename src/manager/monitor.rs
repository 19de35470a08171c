//! Liveness monitor: detects worker process exits.
//!
//! A single background task owns every tracked [`Child`] handle. It polls
//! them at [`POLL_INTERVAL`] and emits a [`MonitorEvent::Terminated`] for
//! each one that has exited, so an exited worker is reported within one
//! poll interval. Worker stdout/stderr are forwarded line by line into the
//! supervisor's log.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::manager::table::AppId;
use crate::{AppError, Result};

/// Interval between polls for child process exits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Notification emitted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A tracked worker process has exited.
    Terminated {
        /// App id of the worker.
        id: AppId,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
    },
}

enum Command {
    Track(AppId, Child),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Track(id, _) => f.debug_tuple("Track").field(id).finish(),
        }
    }
}

/// Handle to the monitor task.
#[derive(Debug)]
pub struct LivenessMonitor {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<HashMap<AppId, Child>>>>,
}

impl LivenessMonitor {
    /// Start the monitor task. Exit notifications are sent on `events`.
    #[must_use]
    pub fn spawn(events: mpsc::UnboundedSender<MonitorEvent>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let join = tokio::spawn(
            run(commands_rx, events, cancel.clone()).instrument(tracing::info_span!("monitor")),
        );
        Self {
            commands,
            cancel,
            join: Mutex::new(Some(join)),
        }
    }

    /// Hand a worker process over to the monitor.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Closed`] once the monitor has been stopped. The
    /// child is dropped (and therefore killed) in that case.
    pub fn track(&self, id: AppId, child: Child) -> Result<()> {
        self.commands
            .send(Command::Track(id, child))
            .map_err(|_| AppError::Closed("liveness monitor has stopped".into()))
    }

    /// Stop polling and return the children that were still being tracked.
    ///
    /// A second call returns an empty map.
    pub async fn stop(&self) -> HashMap<AppId, Child> {
        self.cancel.cancel();
        let Some(join) = self.join.lock().await.take() else {
            return HashMap::new();
        };
        match join.await {
            Ok(children) => children,
            Err(err) => {
                warn!(%err, "liveness monitor task failed");
                HashMap::new()
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        // The task exits on its next cycle; its children are dropped and killed.
        self.cancel.cancel();
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    cancel: CancellationToken,
) -> HashMap<AppId, Child> {
    let mut children: HashMap<AppId, Child> = HashMap::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        while let Ok(Command::Track(id, child)) = commands.try_recv() {
            adopt(&mut children, id, child);
        }

        for (id, exit_code) in poll_children(&mut children) {
            if events.send(MonitorEvent::Terminated { id, exit_code }).is_err() {
                debug!("monitor event receiver dropped");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    // Late registrations still belong to whoever stops us.
    while let Ok(Command::Track(id, child)) = commands.try_recv() {
        adopt(&mut children, id, child);
    }
    info!(remaining = children.len(), "liveness monitor stopped");
    children
}

fn adopt(children: &mut HashMap<AppId, Child>, id: AppId, mut child: Child) {
    forward_output(&id, &mut child);
    debug!(app_id = %id, pid = child.id().unwrap_or(0), "tracking app process");
    if let Some(previous) = children.insert(id.clone(), child) {
        warn!(app_id = %id, pid = previous.id().unwrap_or(0), "replaced tracked process");
    }
}

/// Check every tracked child; exited ones are removed and returned.
fn poll_children(children: &mut HashMap<AppId, Child>) -> Vec<(AppId, Option<i32>)> {
    let mut exited = Vec::new();
    for (id, child) in children.iter_mut() {
        match child.try_wait() {
            Ok(Some(status)) => exited.push((id.clone(), status.code())),
            Ok(None) => {}
            Err(err) => {
                warn!(app_id = %id, %err, "failed to poll app process status");
                exited.push((id.clone(), None));
            }
        }
    }
    for (id, exit_code) in &exited {
        children.remove(id);
        info!(app_id = %id, ?exit_code, "app process exited");
    }
    exited
}

/// Log the child's piped stdout and stderr line by line, tagged with `id`.
///
/// Takes the pipes out of `child`, so calling it again is a no-op.
pub fn forward_output(id: &AppId, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        forward_lines(id.clone(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(id.clone(), "stderr", stderr);
    }
}

fn forward_lines<R>(id: AppId, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => info!(app_id = %id, stream, "{line}"),
                Ok(None) => break,
                Err(err) => {
                    debug!(app_id = %id, stream, %err, "app output stream failed");
                    break;
                }
            }
        }
    });
}
