//! Supervisor façade: launch, ping, message, and teardown of worker apps.
//!
//! A [`Supervisor`] owns the process table, the liveness monitor, and a
//! reaper task that turns monitor exit notifications into table removals.
//! Launches are serialised so port allocation and insertion are atomic.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SupervisorConfig;
use crate::manager::monitor::{forward_output, LivenessMonitor, MonitorEvent};
use crate::manager::ports::lowest_free_port;
use crate::manager::spawner::{close_process, spawn_worker, LaunchSpec};
use crate::manager::table::{AppId, AppSummary, ProcessTable, WorkerRecord};
use crate::transport::context::TransportContext;
use crate::transport::endpoint::{Endpoint, EndpointOptions};
use crate::wire::protocol::{Reply, Request};
use crate::{AppError, Result};

/// Capacity of the lifecycle event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle notification published to [`Supervisor::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A worker passed its readiness handshake and was recorded.
    Launched {
        /// App id.
        id: AppId,
        /// Assigned port.
        port: u16,
        /// OS process id.
        pid: Option<u32>,
    },
    /// A worker exited (or was closed at teardown) and its record was removed.
    Terminated {
        /// App id.
        id: AppId,
        /// Port the worker held.
        port: u16,
        /// Exit code, when available.
        exit_code: Option<i32>,
    },
}

#[derive(Debug)]
struct Settings {
    base_port: u16,
    runner: PathBuf,
    runner_args: Vec<String>,
    startup_timeout: Duration,
    request_timeout: Option<Duration>,
    linger: Duration,
}

#[derive(Debug)]
struct Inner {
    settings: Settings,
    ctx: TransportContext,
    table: ProcessTable,
    monitor: LivenessMonitor,
    events: broadcast::Sender<AppEvent>,
    launch_lock: Mutex<()>,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running supervisor. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Start a supervisor: create the transport context, the liveness
    /// monitor, and the reaper. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid or the
    /// runner executable cannot be located.
    pub fn start(config: &SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let settings = Settings {
            base_port: config.base_port,
            runner: config.runner_path()?,
            runner_args: config.runner_args.clone(),
            startup_timeout: config.startup_timeout(),
            request_timeout: config.request_timeout(),
            linger: config.close_linger(),
        };

        let ctx = TransportContext::new(settings.linger);
        let table = ProcessTable::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        let monitor = LivenessMonitor::spawn(monitor_tx);
        let reaper = tokio::spawn(
            reap(monitor_rx, table.clone(), events.clone()).instrument(info_span!("reaper")),
        );

        info!(
            base_port = settings.base_port,
            runner = %settings.runner.display(),
            "supervisor started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                ctx,
                table,
                monitor,
                events,
                launch_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
                reaper: Mutex::new(Some(reaper)),
            }),
        })
    }

    /// Launch an app in a new worker process.
    ///
    /// Returns `Ok(false)` if a worker with this id is already live.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` after [`shutdown`](Self::shutdown),
    /// `AppError::PortExhausted` if no port is free, `AppError::Spawn` if the
    /// process cannot be started, and `AppError::Startup` if it does not
    /// answer the readiness probe in time.
    pub async fn launch_app(
        &self,
        id: impl Into<AppId>,
        module: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<bool> {
        let id = id.into();
        let _launch = self.inner.launch_lock.lock().await;
        self.ensure_open()?;

        if self.inner.table.contains(&id).await {
            warn!(app_id = %id, "app already running, launch ignored");
            return Ok(false);
        }

        let settings = &self.inner.settings;
        let port = lowest_free_port(settings.base_port, self.inner.table.used_ports().await)?;
        let spec = LaunchSpec {
            runner: settings.runner.clone(),
            runner_args: settings.runner_args.clone(),
            port,
            module: module.to_owned(),
            function: function.to_owned(),
            args,
        };
        let mut child = spawn_worker(&id, &spec)?;
        forward_output(&id, &mut child);
        let endpoint = Arc::new(Endpoint::new(
            &self.inner.ctx,
            port,
            EndpointOptions {
                connect_timeout: settings.startup_timeout,
                request_timeout: settings.request_timeout,
            },
        ));

        if let Err(err) = self.handshake(&id, &mut child, &endpoint).await {
            warn!(app_id = %id, port, %err, "app failed to start");
            endpoint.close().await;
            if let Err(kill_err) = child.kill().await {
                debug!(app_id = %id, %kill_err, "kill after failed startup");
            }
            return Err(err);
        }

        let pid = child.id();
        let inserted = self
            .inner
            .table
            .insert(WorkerRecord {
                id: id.clone(),
                port,
                pid,
                endpoint: Arc::clone(&endpoint),
                launched_at: Utc::now(),
            })
            .await;
        if !inserted {
            endpoint.close().await;
            return Ok(false);
        }

        if let Err(err) = self.inner.monitor.track(id.clone(), child) {
            self.inner.table.remove(&id).await;
            endpoint.close().await;
            return Err(err);
        }

        info!(app_id = %id, port, pid = pid.unwrap_or(0), module, function, "app launched");
        if self
            .inner
            .events
            .send(AppEvent::Launched { id, port, pid })
            .is_err()
        {
            debug!("no lifecycle subscribers");
        }
        Ok(true)
    }

    /// Probe a worker. `false` for unknown ids, a closed supervisor, or any
    /// transport failure.
    pub async fn ping_app(&self, id: impl Into<AppId>) -> bool {
        let id = id.into();
        if self.is_closed() {
            warn!(app_id = %id, "ping after shutdown");
            return false;
        }
        let Some(endpoint) = self.inner.table.endpoint(&id).await else {
            warn!(app_id = %id, "ping for unknown app");
            return false;
        };
        match endpoint.ping().await {
            Ok(pong) => pong,
            Err(err) => {
                warn!(app_id = %id, %err, "ping failed");
                false
            }
        }
    }

    /// Send `(target_name, target_property, value)` to a worker and return
    /// its reply. An error-valued reply is logged and still returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, `AppError::Closed`
    /// after shutdown, and `AppError::Transport` if the round trip fails.
    pub async fn message(
        &self,
        id: impl Into<AppId>,
        target_name: &str,
        target_property: &str,
        value: Value,
    ) -> Result<Reply> {
        let id = id.into();
        self.ensure_open()?;
        let endpoint = self
            .inner
            .table
            .endpoint(&id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("no app with id {id} running")))?;

        let reply = endpoint
            .request(Request::new(target_name, target_property, value))
            .await?;
        if let Some(failure) = reply.failure_ref() {
            warn!(
                app_id = %id,
                target_name,
                target_property,
                kind = %failure.kind,
                "app returned an error:\n{}",
                failure.render()
            );
        }
        Ok(reply)
    }

    /// Live apps, sorted by port.
    pub async fn list_apps(&self) -> Vec<AppSummary> {
        self.inner.table.summaries().await
    }

    /// Port assigned to a live app.
    pub async fn port_of(&self, id: impl Into<AppId>) -> Option<u16> {
        self.inner.table.port_of(&id.into()).await
    }

    /// Whether an app with this id is live.
    pub async fn contains(&self, id: impl Into<AppId>) -> bool {
        self.inner.table.contains(&id.into()).await
    }

    /// Receive lifecycle events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the app `id` is no longer live. Returns immediately for
    /// ids that are not running.
    pub async fn wait_terminated(&self, id: impl Into<AppId>) {
        let id = id.into();
        let mut events = self.subscribe();
        loop {
            if !self.inner.table.contains(&id).await {
                return;
            }
            match events.recv().await {
                Ok(AppEvent::Terminated { id: gone, .. }) if gone == id => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tear everything down: stop the monitor, close every process and
    /// endpoint, and terminate the transport context. A second call is a
    /// no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _launch = self.inner.launch_lock.lock().await;
        info!("supervisor shutting down");

        let mut children = self.inner.monitor.stop().await;
        if let Some(reaper) = self.inner.reaper.lock().await.take() {
            if let Err(err) = reaper.await {
                warn!(%err, "reaper task failed");
            }
        }

        let linger = self.inner.settings.linger;
        let records = self.inner.table.drain().await;
        let closing = records.into_iter().map(|record| {
            let child = children.remove(&record.id);
            self.close_record(record, child, linger)
        });
        join_all(closing).await;

        for (id, child) in children {
            close_process(&id, child, linger).await;
        }

        self.inner.ctx.terminate();
        info!("supervisor stopped");
    }

    async fn close_record(&self, record: WorkerRecord, child: Option<Child>, linger: Duration) {
        record.endpoint.close().await;
        let exit_code = match child {
            Some(child) => close_process(&record.id, child, linger).await,
            None => None,
        };
        if self
            .inner
            .events
            .send(AppEvent::Terminated {
                id: record.id,
                port: record.port,
                exit_code,
            })
            .is_err()
        {
            debug!("no lifecycle subscribers");
        }
    }

    async fn handshake(&self, id: &AppId, child: &mut Child, endpoint: &Endpoint) -> Result<()> {
        let startup = self.inner.settings.startup_timeout;
        let probe = async {
            tokio::select! {
                status = child.wait() => Err(match status {
                    Ok(status) => AppError::Startup(format!("app {id} exited during startup ({status})")),
                    Err(err) => AppError::Startup(format!("failed to wait for app {id}: {err}")),
                }),
                answer = endpoint.ping() => match answer {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(AppError::Startup(format!(
                        "app {id} answered the readiness probe without pong"
                    ))),
                    Err(err) => Err(AppError::Startup(format!(
                        "app {id} did not answer the readiness probe: {err}"
                    ))),
                },
            }
        };
        tokio::time::timeout(startup, probe)
            .await
            .map_err(|_| AppError::Startup(format!("app {id} not ready within {startup:?}")))?
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AppError::Closed("supervisor has been shut down".into()))
        } else {
            Ok(())
        }
    }
}

/// Consume monitor exit notifications: drop the record, close its endpoint,
/// and publish [`AppEvent::Terminated`]. Ends when the monitor stops.
async fn reap(
    mut exits: mpsc::UnboundedReceiver<MonitorEvent>,
    table: ProcessTable,
    events: broadcast::Sender<AppEvent>,
) {
    while let Some(MonitorEvent::Terminated { id, exit_code }) = exits.recv().await {
        let Some(record) = table.remove(&id).await else {
            debug!(app_id = %id, "exit for an app no longer in the table");
            continue;
        };
        record.endpoint.close().await;
        info!(app_id = %id, port = record.port, ?exit_code, "app reaped");
        if events
            .send(AppEvent::Terminated {
                id,
                port: record.port,
                exit_code,
            })
            .is_err()
        {
            debug!("no lifecycle subscribers");
        }
    }
    debug!("reaper stopped");
}
