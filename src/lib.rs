//! # a3s-audit
//!
//! Audit feed core for the A3S ecosystem: cross-context event ingestion,
//! deduplication, pause buffering, and query views.
//!
//! ## Overview
//!
//! `a3s-audit` listens for events other applications publish on a shared
//! same-origin bus, keeps a bounded, deduplicated live log of them, and
//! derives filtered, sorted, paginated views with selection and export.
//! Rendering is left to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_audit::{AuditConfig, AuditStore, BusMessage};
//! use a3s_audit::transport::{BroadcastHub, BroadcastTransport, Channel, Transport};
//!
//! let hub = BroadcastHub::default();
//! let transport = BroadcastTransport::new(hub, "mfe-bus-v1");
//!
//! // Another application on the same bus
//! let users_app = transport.open()?;
//!
//! let mut store = AuditStore::create(Some(transport.open()?), None, AuditConfig::default());
//! users_app.publish(BusMessage::new("USER_CREATED").with_payload(serde_json::json!({"id": 7})));
//!
//! store.drain();
//! assert_eq!(store.view().total, 1);
//! # Ok::<(), a3s_audit::AuditError>(())
//! ```
//!
//! ## Transports
//!
//! - **broadcast** — named in-process hub (primary)
//! - **storage** — key-value store change notifications (fallback)
//!
//! ## Architecture
//!
//! - **Transport / Channel / Subscription** — best-effort bus abstraction
//! - **EventLog** — dedup, pause/flush, bounded live log
//! - **query** — filter, sort, paginate, selection, export
//! - **AuditStore** — single owner wiring the above with settings persistence

pub mod config;
pub mod display;
pub mod error;
pub mod ingest;
pub mod query;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::AuditConfig;
pub use error::{AuditError, Result};
pub use ingest::{EventLog, IngestOutcome};
pub use query::{ExportDocument, Page, Selection, ViewState};
pub use state::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use store::{AuditStore, View};
pub use types::{
    BusMessage, ConnectionStatus, EventEntry, Filter, Payload, Settings, SnapshotRecord,
    SortDirection, SortField, TransportKind, TypeFilter,
};
