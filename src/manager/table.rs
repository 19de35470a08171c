//! Manager-side process table: one [`WorkerRecord`] per live app.
//!
//! Insertion happens on launch and removal on reap or teardown. The table
//! lock is never held across a network round trip; callers clone the
//! endpoint `Arc` out and release the lock before talking to the worker.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::transport::endpoint::Endpoint;

/// Caller-supplied app identifier: an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppId {
    /// Numeric id.
    Num(i64),
    /// Named id.
    Name(String),
}

impl Display for AppId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for AppId {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<i32> for AppId {
    fn from(n: i32) -> Self {
        Self::Num(i64::from(n))
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self::Name(s.to_owned())
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self::Name(s)
    }
}

/// Book-keeping for one live worker.
#[derive(Debug)]
pub struct WorkerRecord {
    /// App id.
    pub id: AppId,
    /// Port the worker listens on.
    pub port: u16,
    /// OS process id, if the process reported one.
    pub pid: Option<u32>,
    /// Connecting endpoint to the worker.
    pub endpoint: Arc<Endpoint>,
    /// When the launch completed.
    pub launched_at: DateTime<Utc>,
}

/// Snapshot of a [`WorkerRecord`] without its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSummary {
    /// App id.
    pub id: AppId,
    /// Port the worker listens on.
    pub port: u16,
    /// OS process id.
    pub pid: Option<u32>,
    /// When the launch completed.
    pub launched_at: DateTime<Utc>,
}

impl From<&WorkerRecord> for AppSummary {
    fn from(record: &WorkerRecord) -> Self {
        Self {
            id: record.id.clone(),
            port: record.port,
            pid: record.pid,
            launched_at: record.launched_at,
        }
    }
}

/// Shared map of live workers keyed by app id.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    records: Arc<Mutex<HashMap<AppId, WorkerRecord>>>,
}

impl ProcessTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has a live record.
    pub async fn contains(&self, id: &AppId) -> bool {
        self.records.lock().await.contains_key(id)
    }

    /// Insert a record. Returns `false` if the id is already taken.
    pub async fn insert(&self, record: WorkerRecord) -> bool {
        let mut guard = self.records.lock().await;
        if guard.contains_key(&record.id) {
            return false;
        }
        guard.insert(record.id.clone(), record);
        true
    }

    /// Remove and return the record for `id`.
    pub async fn remove(&self, id: &AppId) -> Option<WorkerRecord> {
        self.records.lock().await.remove(id)
    }

    /// Remove and return every record.
    pub async fn drain(&self) -> Vec<WorkerRecord> {
        self.records.lock().await.drain().map(|(_, record)| record).collect()
    }

    /// Endpoint of the worker `id`.
    pub async fn endpoint(&self, id: &AppId) -> Option<Arc<Endpoint>> {
        self.records
            .lock()
            .await
            .get(id)
            .map(|record| Arc::clone(&record.endpoint))
    }

    /// Port of the worker `id`.
    pub async fn port_of(&self, id: &AppId) -> Option<u16> {
        self.records.lock().await.get(id).map(|record| record.port)
    }

    /// Ports currently assigned to live workers.
    pub async fn used_ports(&self) -> Vec<u16> {
        self.records
            .lock()
            .await
            .values()
            .map(|record| record.port)
            .collect()
    }

    /// Summaries of all live workers, sorted by port.
    pub async fn summaries(&self) -> Vec<AppSummary> {
        let mut out: Vec<AppSummary> = self
            .records
            .lock()
            .await
            .values()
            .map(AppSummary::from)
            .collect();
        out.sort_by_key(|summary| summary.port);
        out
    }
}
