//! Audit store integration tests
//!
//! End-to-end tests exercising the full AuditStore lifecycle over both
//! transports. Covers dedup, pause/resume, limits, filtering, paging,
//! selection, export, snapshot seeding, and settings persistence.

use a3s_audit::transport::{
    BroadcastHub, BroadcastTransport, Channel, StorageTransport, Transport,
};
use a3s_audit::{
    AuditConfig, AuditStore, BusMessage, ConnectionStatus, EventEntry, IngestOutcome,
    KeyValueStore, MemoryKeyValueStore, Settings, SortDirection, SortField, TransportKind,
};
use std::sync::Arc;
use std::time::Duration;

const CHANNEL: &str = "mfe-bus-v1";

fn msg(kind: &str, id: &str, ts: u64) -> BusMessage {
    BusMessage::new(kind).with_id(id).with_ts(ts)
}

/// A store listening on a fresh hub, plus another application's channel
fn broadcast_pair(storage: Option<Arc<dyn KeyValueStore>>) -> (AuditStore, Box<dyn Channel>) {
    let config = AuditConfig::default();
    let transport = BroadcastTransport::from_config(BroadcastHub::from_config(&config), &config);
    let other_app = transport.open().unwrap();
    let store = AuditStore::create(Some(transport.open().unwrap()), storage, config);
    (store, other_app)
}

fn ids(store: &AuditStore) -> Vec<String> {
    store.entries().map(|e| e.id.clone()).collect()
}

// ─── Dedup & Limits ──────────────────────────────────────────────

#[test]
fn test_same_id_twice_keeps_first() {
    let (mut store, app) = broadcast_pair(None);

    app.publish(msg("LOGIN", "a", 100));
    app.publish(msg("LOGIN", "a", 200));
    store.drain();

    assert_eq!(store.entries().len(), 1);
    assert_eq!(store.entries().next().unwrap().timestamp, 100);
}

#[test]
fn test_sixty_events_into_limit_fifty() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    kv.set("audit_widget_settings_v1", r#"{"paused":false,"limit":50}"#)
        .unwrap();
    let (mut store, app) = broadcast_pair(Some(kv));

    for i in 0..60 {
        app.publish(msg("EVT", &format!("e{}", i), i));
    }
    store.drain();

    assert_eq!(store.entries().len(), 50);
    let expected: Vec<String> = (10..60).rev().map(|i| format!("e{}", i)).collect();
    assert_eq!(ids(&store), expected);
}

#[test]
fn test_log_never_exceeds_capacity() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    store.set_limit(10);
    for i in 0..500 {
        store.ingest(msg("EVT", &format!("e{}", i), i));
        assert!(store.entries().len() <= 50);
    }
    store.set_limit(120);
    for i in 500..800 {
        store.ingest(msg("EVT", &format!("e{}", i), i));
        assert!(store.entries().len() <= 120);
    }
}

// ─── Pause / Resume ──────────────────────────────────────────────

#[test]
fn test_pause_resume_roundtrip() {
    let (mut store, app) = broadcast_pair(None);
    app.publish(msg("LIVE", "live", 1));
    store.drain();

    store.set_paused(true);
    for i in 0..5 {
        app.publish(msg("PAUSED", &format!("p{}", i), 10 + i));
    }
    // Duplicate of a buffered id
    app.publish(msg("PAUSED", "p2", 99));
    store.drain();

    assert_eq!(ids(&store), vec!["live"]);
    assert_eq!(store.log().pending_len(), 5);

    store.set_paused(false);
    assert_eq!(ids(&store), vec!["p4", "p3", "p2", "p1", "p0", "live"]);
    assert_eq!(store.log().pending_len(), 0);
}

#[test]
fn test_pending_stops_growing_at_capacity() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    store.set_paused(true);
    for i in 0..1500 {
        assert_eq!(
            store.ingest(msg("EVT", &format!("e{}", i), i)),
            IngestOutcome::Buffered
        );
    }
    assert_eq!(store.entries().len(), 0);
    assert_eq!(store.log().pending_len(), 1000);
}

// ─── Query & Export ──────────────────────────────────────────────

#[test]
fn test_error_query_scenario() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    store.ingest(msg("LOGIN_ERROR", "1", 1));
    store.ingest(msg("LOGIN_OK", "2", 2).with_payload(serde_json::json!("ok")));

    store.set_query("error");
    let view = store.view();
    assert_eq!(view.total, 1);
    assert_eq!(view.items[0].kind, "LOGIN_ERROR");
}

#[test]
fn test_pages_concatenate_to_sorted_view() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    for i in 0..47u64 {
        let kind = if i % 2 == 0 { "EVEN" } else { "ODD" };
        store.ingest(msg(kind, &format!("id-{:03}", i), (i * 37) % 101));
    }
    store.set_type_filter("EVEN");
    store.set_sort(SortField::Timestamp, SortDirection::Asc);
    store.set_page_size(5);

    let sorted: Vec<String> = store.sorted().iter().map(|e| e.id.clone()).collect();
    let total_pages = store.view().total_pages;
    let mut rebuilt = Vec::new();
    for page in 1..=total_pages {
        store.set_page(page);
        rebuilt.extend(store.view().items.iter().map(|e| e.id.clone()));
    }
    assert_eq!(rebuilt, sorted);
    assert_eq!(sorted.len(), 24);
}

#[test]
fn test_export_selected_sorted_by_id_desc() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    for id in ["a", "b", "c"] {
        store.ingest(msg("X", id, 1));
    }
    // Each header click flips the direction: Desc -> Asc -> Desc
    store.sort_by(SortField::Id);
    assert_eq!(store.view_state().sort_direction, SortDirection::Asc);
    store.sort_by(SortField::Id);
    assert_eq!(store.view_state().sort_direction, SortDirection::Desc);
    store.toggle_select("a");
    store.toggle_select("c");

    let doc = store.export().unwrap();
    assert!(doc.file_name.starts_with("audit-export-"));
    assert!(doc.file_name.ends_with(".json"));

    let parsed: Vec<EventEntry> = serde_json::from_str(&doc.contents).unwrap();
    let exported: Vec<&str> = parsed.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(exported, vec!["c", "a"]);
}

#[test]
fn test_selection_survives_filter_changes() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    store.ingest(msg("A", "a1", 1));
    store.ingest(msg("B", "b1", 2));
    store.toggle_select("a1");

    store.set_type_filter("B");
    assert!(store.selection().contains("a1"));

    // The selected entry is filtered out, so the whole view is exported
    let doc = store.export().unwrap();
    assert_eq!(doc.count, 1);
}

#[test]
fn test_export_falls_back_to_view_when_selection_hidden() {
    let mut store = AuditStore::create(None, None, AuditConfig::default());
    store.ingest(msg("LOGIN", "a", 1));
    store.ingest(msg("LOGOUT", "b", 2));
    store.ingest(msg("LOGOUT", "c", 3));
    store.toggle_select("a");
    store.set_type_filter("LOGOUT");

    let doc = store.export().unwrap();
    let parsed: Vec<EventEntry> = serde_json::from_str(&doc.contents).unwrap();
    let exported: Vec<&str> = parsed.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(doc.count, 2);
    assert_eq!(exported, vec!["c", "b"]);
    assert!(store.selection().contains("a"));
}

// ─── Startup & Persistence ───────────────────────────────────────

#[test]
fn test_snapshot_then_live_ingestion() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    kv.set(
        "mfe_users_v1",
        r#"[{"id":1,"name":"Ada","email":"ada@example.com","role":"admin"},
            {"id":2,"name":"Bob","email":"bob@example.com","role":"user"}]"#,
    )
    .unwrap();
    let (mut store, app) = broadcast_pair(Some(kv));

    assert_eq!(ids(&store), vec!["SNAP-1", "SNAP-2"]);

    app.publish(msg("USERS_SNAPSHOT", "SNAP-2", 5));
    app.publish(msg("USER_DELETED", "d1", 6));
    store.drain();

    assert_eq!(ids(&store), vec!["d1", "SNAP-1", "SNAP-2"]);
    assert_eq!(store.type_counts()["USERS_SNAPSHOT"], 2);
}

#[test]
fn test_settings_survive_restart() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());

    {
        let mut store = AuditStore::create(None, Some(kv.clone()), AuditConfig::default());
        store.set_paused(true);
        store.set_limit(75);
    }

    let store = AuditStore::create(None, Some(kv), AuditConfig::default());
    assert_eq!(
        store.settings(),
        Settings {
            paused: true,
            limit: 75
        }
    );
}

// ─── Storage Fallback ────────────────────────────────────────────

#[test]
fn test_storage_fallback_end_to_end() {
    let shared = MemoryKeyValueStore::new();
    let app_context = shared.attach();

    let primary = BroadcastTransport::new(BroadcastHub::unavailable(), CHANNEL);
    let fallback = StorageTransport::from_config(Arc::new(shared.clone()), &AuditConfig::default());
    let mut store = AuditStore::connect(
        &primary,
        &fallback,
        Some(Arc::new(shared)),
        AuditConfig::default(),
    );
    assert_eq!(
        store.status(),
        ConnectionStatus::Connected(TransportKind::Storage)
    );

    let app = StorageTransport::new(Arc::new(app_context.clone()), CHANNEL)
        .open()
        .unwrap();
    app.publish(msg("USER_CREATED", "u1", 10).with_payload(serde_json::json!({"name": "Ada"})));
    // Garbage written directly under the channel key is dropped
    app_context.set(CHANNEL, "not json").unwrap();
    app.publish(msg("USER_UPDATED", "u2", 11));

    store.drain();
    assert_eq!(ids(&store), vec!["u2", "u1"]);
}

#[tokio::test]
async fn test_async_ingestion_loop() {
    let (mut store, app) = broadcast_pair(None);

    tokio::spawn(async move {
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            app.publish(msg("TICK", &format!("t{}", i), i));
        }
    });

    for _ in 0..3 {
        let outcome = tokio::time::timeout(Duration::from_secs(2), store.next_message())
            .await
            .unwrap();
        assert_eq!(outcome, Some(IngestOutcome::Appended));
    }
    assert_eq!(ids(&store), vec!["t2", "t1", "t0"]);

    store.dispose();
    assert_eq!(store.status(), ConnectionStatus::Disconnected);
    assert!(store.next_message().await.is_none());
}
