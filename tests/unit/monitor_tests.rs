//! Unit tests for the liveness monitor.
#![cfg(unix)]

use std::io::Write;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use appvisor::manager::monitor::{LivenessMonitor, MonitorEvent};
use appvisor::{AppError, AppId};
use tokio::process::{Child, Command};
use serde_json::Value;
use tokio::sync::mpsc;

fn sh(script: &str) -> Child {
    Command::new("/bin/sh")
        .args(["-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn sh")
}

/// In-memory sink for JSON-formatted log lines.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    fn logged(&self, app_id: &str, stream: &str, message: &str) -> bool {
        self.events().iter().any(|event| {
            let fields = &event["fields"];
            fields["app_id"] == app_id && fields["stream"] == stream && fields["message"] == message
        })
    }
}

#[tokio::test]
async fn exit_is_reported_with_code() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = LivenessMonitor::spawn(tx);

    monitor
        .track(AppId::from("quick"), sh("echo hello; exit 4"))
        .expect("track");

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("exit detected in time")
        .expect("event");
    assert_eq!(
        event,
        MonitorEvent::Terminated {
            id: AppId::from("quick"),
            exit_code: Some(4),
        }
    );

    assert!(monitor.stop().await.is_empty());
}

#[tokio::test]
async fn only_exited_children_are_reported() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = LivenessMonitor::spawn(tx);

    monitor.track(AppId::Num(1), sh("exec sleep 30")).expect("track");
    monitor.track(AppId::Num(2), sh("exit 0")).expect("track");

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("exit detected in time")
        .expect("event");
    assert_eq!(
        event,
        MonitorEvent::Terminated {
            id: AppId::Num(2),
            exit_code: Some(0),
        }
    );

    let remaining = monitor.stop().await;
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains_key(&AppId::Num(1)));
}

#[tokio::test]
async fn stop_is_idempotent_and_rejects_new_children() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let monitor = LivenessMonitor::spawn(tx);

    assert!(monitor.stop().await.is_empty());
    assert!(monitor.stop().await.is_empty());

    let err = monitor
        .track(AppId::Num(9), sh("exec sleep 30"))
        .expect_err("monitor stopped");
    assert!(matches!(err, AppError::Closed(_)));
}

#[tokio::test]
async fn worker_output_is_logged_per_stream() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = LivenessMonitor::spawn(tx);
    monitor
        .track(AppId::Num(7), sh("echo out; echo err >&2"))
        .expect("track");

    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("exit detected in time")
        .expect("event");

    let forwarded = tokio::time::timeout(Duration::from_secs(5), async {
        while !(capture.logged("7", "stdout", "out") && capture.logged("7", "stderr", "err")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(forwarded.is_ok(), "captured: {:?}", capture.events());

    monitor.stop().await;
}
