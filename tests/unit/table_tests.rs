//! Unit tests for the process table and port allocation.

use std::sync::Arc;

use appvisor::manager::ports::lowest_free_port;
use appvisor::manager::table::{AppId, ProcessTable, WorkerRecord};
use appvisor::transport::context::TransportContext;
use appvisor::transport::endpoint::{Endpoint, EndpointOptions};
use chrono::Utc;

fn record(ctx: &TransportContext, id: impl Into<AppId>, port: u16) -> WorkerRecord {
    WorkerRecord {
        id: id.into(),
        port,
        pid: Some(4242),
        endpoint: Arc::new(Endpoint::new(ctx, port, EndpointOptions::default())),
        launched_at: Utc::now(),
    }
}

#[tokio::test]
async fn insert_rejects_duplicate_ids() {
    let ctx = TransportContext::default();
    let table = ProcessTable::new();

    assert!(table.insert(record(&ctx, 1, 12345)).await);
    assert!(!table.insert(record(&ctx, 1, 12346)).await);
    assert_eq!(table.summaries().await.len(), 1);
    assert_eq!(table.port_of(&AppId::Num(1)).await, Some(12345));
}

#[tokio::test]
async fn allocation_follows_live_records() {
    let ctx = TransportContext::default();
    let table = ProcessTable::new();
    let base = 12345;

    for (id, expected) in [("a", 12345), ("b", 12346), ("c", 12347)] {
        let port = lowest_free_port(base, table.used_ports().await).expect("port");
        assert_eq!(port, expected);
        assert!(table.insert(record(&ctx, id, port)).await);
    }

    table.remove(&AppId::from("b")).await.expect("b was live");
    let reused = lowest_free_port(base, table.used_ports().await).expect("port");
    assert_eq!(reused, 12346, "freed port is handed out again");
}

#[tokio::test]
async fn summaries_are_sorted_by_port() {
    let ctx = TransportContext::default();
    let table = ProcessTable::new();
    table.insert(record(&ctx, "late", 12350)).await;
    table.insert(record(&ctx, 7, 12345)).await;

    let ports: Vec<u16> = table.summaries().await.iter().map(|s| s.port).collect();
    assert_eq!(ports, vec![12345, 12350]);
}

#[tokio::test]
async fn drain_empties_the_table() {
    let ctx = TransportContext::default();
    let table = ProcessTable::new();
    table.insert(record(&ctx, 1, 12345)).await;
    table.insert(record(&ctx, 2, 12346)).await;

    let drained = table.drain().await;
    assert_eq!(drained.len(), 2);
    assert!(table.used_ports().await.is_empty());
    assert!(table.endpoint(&AppId::Num(1)).await.is_none());
}

#[test]
fn app_id_displays_and_serialises_untagged() {
    assert_eq!(AppId::from(7).to_string(), "7");
    assert_eq!(AppId::from("seven").to_string(), "seven");
    assert_eq!(serde_json::to_string(&AppId::Num(7)).unwrap(), "7");
    assert_eq!(
        serde_json::from_str::<AppId>("\"seven\"").unwrap(),
        AppId::from("seven")
    );
}
